//! Response pipeline decisions
//!
//! Header-level rules around the translator: which responses are
//! translated, what happens to their caching headers, and which request
//! variables are seeded before the body starts.

use crate::esi::VariableStore;

/// Variable holding the request path
pub const REQUEST_PATH: &str = "REQUEST_PATH";
/// Variable holding the query string, without the leading `?`
pub const QUERY_STRING: &str = "QUERY_STRING";

/// `cache-control` for translated responses. Their content depends on
/// request-scoped variables, so shared caches must not reuse them.
pub const NO_SHARED_CACHE: &str = "max-age=0";

/// Translate only `text/*` bodies that are not content-encoded
pub fn should_translate(content_type: Option<&str>, content_encoding: Option<&str>) -> bool {
    let is_text = content_type
        .map(|ct| ct.trim_start().to_ascii_lowercase().starts_with("text/"))
        .unwrap_or(false);

    let is_identity = content_encoding
        .map(|ce| ce.trim().is_empty() || ce.trim().eq_ignore_ascii_case("identity"))
        .unwrap_or(true);

    is_text && is_identity
}

/// Split a `:path` into path and query string
pub fn split_path(path: &str) -> (&str, &str) {
    let path = path.split('#').next().unwrap_or_default();
    match path.split_once('?') {
        Some((p, q)) => (p, q),
        None => (path, ""),
    }
}

/// Seed `REQUEST_PATH` and `QUERY_STRING`, each wrapped in `"` like
/// attribute values in markup. First write wins, as for any assign.
pub fn seed_request_variables(vars: &mut VariableStore, path: &str) {
    let (request_path, query) = split_path(path);
    vars.insert(REQUEST_PATH, &format!("\"{}\"", request_path));
    vars.insert(QUERY_STRING, &format!("\"{}\"", query));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_translate() {
        assert!(should_translate(Some("text/html; charset=utf-8"), None));
        assert!(should_translate(Some("TEXT/plain"), Some("identity")));
        assert!(!should_translate(Some("application/json"), None));
        assert!(!should_translate(None, None));
        assert!(!should_translate(Some("text/html"), Some("gzip")));
    }

    #[test]
    fn test_split_path() {
        assert_eq!(split_path("/path?x=1"), ("/path", "x=1"));
        assert_eq!(split_path("/path"), ("/path", ""));
        assert_eq!(split_path("/p?a=1?b#frag"), ("/p", "a=1?b"));
    }

    #[test]
    fn test_seed_request_variables() {
        let mut vars = VariableStore::new();
        seed_request_variables(&mut vars, "/path?x=1");
        assert_eq!(vars.get(REQUEST_PATH), Some("\"/path\""));
        assert_eq!(vars.get(QUERY_STRING), Some("\"x=1\""));
    }

    #[test]
    fn test_seed_keeps_existing() {
        let mut vars = VariableStore::new();
        seed_request_variables(&mut vars, "/first");
        seed_request_variables(&mut vars, "/second?y=2");
        assert_eq!(vars.get(REQUEST_PATH), Some("\"/first\""));
        assert_eq!(vars.get(QUERY_STRING), Some("\"\""));
    }
}
