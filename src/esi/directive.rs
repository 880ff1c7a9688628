//! Tag Classifier & Attribute Extractor
//!
//! Decides whether decoded tag text is an ESI directive and pulls out its
//! attributes with a small hand-written scanner (no regex in Wasm). The
//! scanner walks `key=value` pairs in order, so a key written inside a
//! quoted value is never mistaken for a real attribute.
//!
//! Matching is attribute-driven with fixed precedence: a tag carrying both
//! `name` and `value` is an assign, otherwise a tag carrying `src` is an
//! include, otherwise it is passed through untouched.

/// Literal prefix every directive starts with
pub const ESI_PREFIX: [u8; 4] = [b'e', b's', b'i', b':'];

/// Attributes of an `esi:include`. Only `src` drives behaviour; the rest
/// are kept so they can be wired up later without re-deriving the grammar.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct IncludeAttrs {
    pub src: String,
    pub method: Option<String>,
    pub entity: Option<String>,
    pub alt: Option<String>,
    pub onerror: Option<String>,
    pub maxwait: Option<String>,
    pub ttl: Option<String>,
}

/// Parsed view of one tag
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Directive {
    /// `<esi:assign name=".." value=".."/>`
    Assign { name: String, value: String },
    /// `<esi:include src=".."/>`
    Include(IncludeAttrs),
    /// Anything else, re-emitted literally
    Other,
}

/// True when the first four bytes are exactly `esi:`
pub fn is_esi(text: &[u8]) -> bool {
    text.get(..ESI_PREFIX.len()) == Some(&ESI_PREFIX[..])
}

/// Classify decoded tag text. With `assign_enabled` off the assign attempt
/// is skipped and the tag falls through to the include check.
pub fn classify(text: &str, assign_enabled: bool) -> Directive {
    if !is_esi(text.as_bytes()) {
        return Directive::Other;
    }

    if assign_enabled {
        if let Some((name, value)) = assign_attrs(text) {
            return Directive::Assign { name, value };
        }
    }

    match include_attrs(text) {
        Some(attrs) => Directive::Include(attrs),
        None => Directive::Other,
    }
}

/// `name` (quotes removed) and `value` (raw) of an assign, if both present
pub fn assign_attrs(text: &str) -> Option<(String, String)> {
    let pairs = attributes(text);
    let name = unquote(lookup(&pairs, "name")?);
    if name.is_empty() {
        return None;
    }
    let value = lookup(&pairs, "value")?;
    Some((name.to_string(), value.to_string()))
}

/// Include attributes, if `src` is present
pub fn include_attrs(text: &str) -> Option<IncludeAttrs> {
    let pairs = attributes(text);
    let owned = |key: &str| lookup(&pairs, key).map(str::to_string);
    Some(IncludeAttrs {
        src: owned("src")?,
        method: owned("method"),
        entity: owned("entity"),
        alt: owned("alt"),
        onerror: owned("onerror"),
        maxwait: owned("maxwait"),
        ttl: owned("ttl"),
    })
}

/// Raw value token of the first `key=...` attribute in `text`
pub fn attribute<'a>(text: &'a str, key: &str) -> Option<&'a str> {
    lookup(&attributes(text), key)
}

/// Every `key=value` pair of a tag, left to right.
///
/// A quoted value is kept with its quotes; an unquoted value runs to the
/// next whitespace, minus a `/` that closes the tag. Words without `=`
/// (the directive name, a closing `/`) are skipped. Text inside a quoted
/// value is never read as a key. An unterminated quote ends the walk.
pub fn attributes(text: &str) -> Vec<(&str, &str)> {
    let mut pairs = Vec::new();
    let mut rest = text;

    loop {
        rest = rest.trim_start_matches(|c: char| c.is_ascii_whitespace());
        if rest.is_empty() {
            break;
        }

        let key_end = rest
            .find(|c: char| c == '=' || c.is_ascii_whitespace())
            .unwrap_or(rest.len());
        let key = &rest[..key_end];
        rest = &rest[key_end..];

        let Some(after_eq) = rest.strip_prefix('=') else {
            continue;
        };

        match value_token(after_eq) {
            Some(value) => {
                pairs.push((key, value));
                rest = &after_eq[value.len()..];
            }
            None if after_eq.starts_with(['"', '\'']) => break,
            None => rest = after_eq,
        }
    }

    pairs
}

fn lookup<'a>(pairs: &[(&str, &'a str)], key: &str) -> Option<&'a str> {
    pairs.iter().find(|(k, _)| *k == key).map(|(_, v)| *v)
}

fn value_token(rest: &str) -> Option<&str> {
    match *rest.as_bytes().first()? {
        quote @ (b'"' | b'\'') => {
            // Substituted values may carry their own quotes, so prefer the
            // quote that actually ends the attribute over the first one.
            let body = &rest[1..];
            let mut closes = body.match_indices(quote as char).map(|(i, _)| i);
            let first = closes.clone().next()?;
            let end = closes.find(|&i| ends_attribute(&body[i + 1..])).unwrap_or(first);
            Some(&rest[..end + 2])
        }
        _ => {
            let end = rest
                .find(|c: char| c.is_ascii_whitespace())
                .unwrap_or(rest.len());
            let mut token = &rest[..end];
            if end == rest.len() {
                token = token.strip_suffix('/').unwrap_or(token);
            }
            (!token.is_empty()).then_some(token)
        }
    }
}

fn ends_attribute(after: &str) -> bool {
    after.is_empty() || after == "/" || after.starts_with(|c: char| c.is_ascii_whitespace())
}

/// Remove one pair of matching surrounding quotes
pub fn unquote(value: &str) -> &str {
    for quote in ['"', '\''] {
        if let Some(inner) = value
            .strip_prefix(quote)
            .and_then(|v| v.strip_suffix(quote))
        {
            return inner;
        }
    }
    value
}

/// Remove every quote character
pub fn strip_quotes(value: &str) -> String {
    value.chars().filter(|c| !matches!(c, '"' | '\'')).collect()
}
