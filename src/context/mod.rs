//! Per-request context — the request, its route captures, and typed extensions.
//!
//! A [`Context`] is built for every dispatched request and handed to the
//! matching handler by value. The captures of the winning pattern live here
//! rather than in any shared table, so concurrent requests can never see each
//! other's variables, and nothing outlives the request.

use std::{
    any::{Any, TypeId},
    collections::HashMap,
};

use regex::Regex;

use crate::Request;

/// Type-erased request extensions map — used to inject per-request state
/// into handlers without requiring handlers to know about each other's types.
#[derive(Default)]
pub struct Extensions {
    map: HashMap<TypeId, Box<dyn Any + Send + Sync>>,
}

impl Extensions {
    /// Create a new empty extensions map
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value, replacing any previous value of the same type
    pub fn insert<T>(&mut self, value: T)
    where
        T: Send + Sync + 'static,
    {
        self.map.insert(TypeId::of::<T>(), Box::new(value));
    }

    pub fn get<T>(&self) -> Option<&T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get(&TypeId::of::<T>())
            .and_then(|value| value.downcast_ref::<T>())
    }

    pub fn get_mut<T>(&mut self) -> Option<&mut T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .get_mut(&TypeId::of::<T>())
            .and_then(|value| value.downcast_mut::<T>())
    }

    pub fn remove<T>(&mut self) -> Option<T>
    where
        T: Send + Sync + 'static,
    {
        self.map
            .remove(&TypeId::of::<T>())
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }
}

/// The capture groups of the pattern that matched a request.
///
/// Positional access is zero-based over the *groups* (the whole-match group 0
/// is not included), so for `^/(\w+)/(\d+)$` against `/users/42`,
/// `get(0)` is `"users"` and `get(1)` is `"42"`. Groups that did not
/// participate in the match are `None`. Named groups (`(?P<id>\d+)`) are also
/// reachable through [`name`](Self::name).
///
/// # Examples
///
/// ```
/// use regex::Regex;
/// use remux::context::Captures;
///
/// let re = Regex::new(r"^/users/(?P<id>\d+)(/edit)?$").unwrap();
/// let caps = Captures::from_match(&re, "/users/42").unwrap();
///
/// assert_eq!(caps.len(), 2);
/// assert_eq!(caps.get(0), Some("42"));
/// assert_eq!(caps.get(1), None);
/// assert_eq!(caps.name("id"), Some("42"));
/// ```
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct Captures {
    groups: Vec<Option<String>>,
    named: HashMap<String, String>,
}

impl Captures {
    /// An empty set of captures.
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs `re` against `haystack`; `None` if it doesn't match.
    pub fn from_match(re: &Regex, haystack: &str) -> Option<Self> {
        let caps = re.captures(haystack)?;

        let groups = caps
            .iter()
            .skip(1)
            .map(|m| m.map(|m| m.as_str().to_owned()))
            .collect();

        let named = re
            .capture_names()
            .flatten()
            .filter_map(|name| {
                caps.name(name)
                    .map(|m| (name.to_owned(), m.as_str().to_owned()))
            })
            .collect();

        Some(Self { groups, named })
    }

    /// The text of group `index` (zero-based, excluding the whole match).
    pub fn get(&self, index: usize) -> Option<&str> {
        self.groups.get(index)?.as_deref()
    }

    /// The text of the named group `name`.
    pub fn name(&self, name: &str) -> Option<&str> {
        self.named.get(name).map(String::as_str)
    }

    /// Number of groups in the pattern, matched or not.
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Iterates the groups in order.
    pub fn iter(&self) -> impl Iterator<Item = Option<&str>> {
        self.groups.iter().map(|g| g.as_deref())
    }
}

/// Everything a handler gets for one request.
pub struct Context {
    request: Request,
    vars: Captures,
    extensions: Extensions,
}

impl Context {
    /// A context with no captures.
    pub fn new(request: Request) -> Self {
        Self::with_vars(request, Captures::new())
    }

    /// A context carrying the captures of a matched route.
    pub fn with_vars(request: Request, vars: Captures) -> Self {
        Self {
            request,
            vars,
            extensions: Extensions::new(),
        }
    }

    pub fn request(&self) -> &Request {
        &self.request
    }

    pub fn request_mut(&mut self) -> &mut Request {
        &mut self.request
    }

    /// The captures of the pattern that routed this request.
    pub fn vars(&self) -> &Captures {
        &self.vars
    }

    pub(crate) fn set_vars(&mut self, vars: Captures) {
        self.vars = vars;
    }

    pub fn extensions(&self) -> &Extensions {
        &self.extensions
    }

    pub fn extensions_mut(&mut self) -> &mut Extensions {
        &mut self.extensions
    }

    /// Deserializes the request body as JSON.
    pub fn json<T>(&self) -> Result<T, serde_json::Error>
    where
        T: serde::de::DeserializeOwned,
    {
        serde_json::from_slice(self.request.body())
    }

    pub fn into_request(self) -> Request {
        self.request
    }
}
