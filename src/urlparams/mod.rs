//! `:name` placeholders in URL templates.
//!
//! A lighter alternative to regex captures when a handler only needs to pull
//! fixed-position segments out of a path.

use std::collections::HashMap;

/// Extracts the segments of `url` that line up with `:name` segments of
/// `format`.
///
/// Segments are compared by position only; literal segments are not checked
/// and extra segments on either side are ignored.
///
/// ```
/// let vars = remux::urlparams::parse("/fruit/:color/:name", "/fruit/green/pea");
/// assert_eq!(vars["color"], "green");
/// assert_eq!(vars["name"], "pea");
/// ```
pub fn parse(format: &str, url: &str) -> HashMap<String, String> {
    format
        .split('/')
        .zip(url.split('/'))
        .filter_map(|(pattern, segment)| {
            pattern
                .strip_prefix(':')
                .map(|name| (name.to_owned(), segment.to_owned()))
        })
        .collect()
}
