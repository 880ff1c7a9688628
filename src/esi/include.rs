//! `esi:include` handler
//!
//! Resolves the target URL of an include. The fetch itself is left to the
//! host (see `crate::subrequest`), so the handler returns a
//! `PendingInclude` that the caller completes with the fetched body.

use super::directive::{attribute, strip_quotes, IncludeAttrs};
use super::variables::VariableStore;

/// An include waiting for its sub-request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingInclude {
    /// Resolved target URL, possibly relative
    pub target: String,
    /// Original `<...>` bytes, written instead if the fetch fails
    pub raw: Vec<u8>,
    pub attrs: IncludeAttrs,
}

/// Work out the URL an include fetches.
///
/// A configured `fixed_url` overrides every include. Otherwise `$(..)` is
/// substituted over the whole tag, `src` is taken from the result and all
/// quote characters are removed. Relative URLs are returned as-is.
pub fn resolve_target(
    text: &str,
    src: &str,
    fixed_url: Option<&str>,
    vars: &VariableStore,
) -> String {
    if let Some(url) = fixed_url {
        return url.to_string();
    }

    let substituted = vars.substitute(text);
    let resolved = match attribute(&substituted, "src") {
        Some(value) => value.to_string(),
        None => vars.substitute(src),
    };

    strip_quotes(&resolved)
}

/// Build the pending include for a classified tag
pub fn prepare_include(
    text: &str,
    raw: Vec<u8>,
    attrs: IncludeAttrs,
    fixed_url: Option<&str>,
    vars: &VariableStore,
) -> PendingInclude {
    PendingInclude {
        target: resolve_target(text, &attrs.src, fixed_url, vars),
        raw,
        attrs,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_src() {
        let vars = VariableStore::new();
        let text = "esi:include src=\"/ping\"/";
        assert_eq!(resolve_target(text, "\"/ping\"", None, &vars), "/ping");
    }

    #[test]
    fn test_quoted_variable_value() {
        let mut vars = VariableStore::new();
        vars.insert("REQUEST_PATH", "\"/news\"");
        let text = "esi:include src=\"$(REQUEST_PATH)/frag\"/";
        assert_eq!(resolve_target(text, "\"$(REQUEST_PATH)/frag\"", None, &vars), "/news/frag");
    }

    #[test]
    fn test_unset_variable_kept() {
        let vars = VariableStore::new();
        let text = "esi:include src=\"/a?x=$(X)\"/";
        assert_eq!(resolve_target(text, "\"/a?x=$(X)\"", None, &vars), "/a?x=$(X)");
    }

    #[test]
    fn test_fixed_url_wins() {
        let mut vars = VariableStore::new();
        vars.insert("X", "1");
        let text = "esi:include src=\"/a?x=$(X)\"/";
        assert_eq!(
            resolve_target(text, "\"/a?x=$(X)\"", Some("http://shadow.internal/"), &vars),
            "http://shadow.internal/"
        );
    }

    #[test]
    fn test_prepare_keeps_raw_and_attrs() {
        let vars = VariableStore::new();
        let attrs = IncludeAttrs {
            src: "'http://a.example/x'".to_string(),
            ttl: Some("10".to_string()),
            ..Default::default()
        };
        let pending = prepare_include(
            "esi:include src='http://a.example/x' ttl=10/",
            b"<esi:include src='http://a.example/x' ttl=10/>".to_vec(),
            attrs.clone(),
            None,
            &vars,
        );
        assert_eq!(pending.target, "http://a.example/x");
        assert_eq!(pending.attrs, attrs);
        assert!(pending.raw.starts_with(b"<esi:include"));
    }
}
