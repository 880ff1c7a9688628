//! ESI Variable Store
//!
//! Name -> value table consulted by `$(NAME)` substitution and filled by
//! `esi:assign`. Insertion is first-write-wins: once a name is stored, later
//! assignments to it are ignored.
//!
//! The store is handed to each translator rather than living in ambient
//! state. Whether two requests see the same table is decided by the filter
//! when it creates the HTTP context (see `VariableScope`).

use serde::Deserialize;
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

/// Handle to a store. Proxy-wasm runs each worker single-threaded, so
/// `Rc<RefCell<_>>` is enough for sharing between contexts.
pub type SharedVariables = Rc<RefCell<VariableStore>>;

/// How far a variable assigned during one response is visible
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum VariableScope {
    /// Fresh store per request
    #[default]
    Request,
    /// One store shared by every request on the Envoy worker.
    ///
    /// Values assigned while serving one client are visible to every later
    /// request on the same worker, and first-write-wins means request
    /// variables such as `REQUEST_PATH` keep the first request's value.
    Worker,
}

/// Variable table with first-write-wins insertion
#[derive(Clone, Debug, Default)]
pub struct VariableStore {
    vars: HashMap<String, String>,
}

impl VariableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new store behind a shared handle
    pub fn shared() -> SharedVariables {
        Rc::new(RefCell::new(Self::new()))
    }

    /// Store `value` under `name` unless the name already exists.
    /// Returns `true` if the value was stored.
    pub fn insert(&mut self, name: &str, value: &str) -> bool {
        if self.vars.contains_key(name) {
            return false;
        }
        self.vars.insert(name.to_string(), value.to_string());
        true
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.vars.get(name).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.vars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Replace every `$(NAME)` token whose name is stored.
    ///
    /// Unknown names, empty names and tokens missing their `)` are left in
    /// place. Substituted values are not scanned again.
    pub fn substitute(&self, text: &str) -> String {
        if self.is_empty() {
            return text.to_string();
        }

        let mut out = String::with_capacity(text.len());
        let mut rest = text;

        while let Some(start) = rest.find("$(") {
            out.push_str(&rest[..start]);
            let after = &rest[start + 2..];

            let Some(end) = after.find(')') else {
                out.push_str(&rest[start..]);
                return out;
            };

            let name = &after[..end];
            match self.get(name) {
                Some(value) if !name.is_empty() => out.push_str(value),
                _ => out.push_str(&rest[start..start + 2 + end + 1]),
            }
            rest = &after[end + 1..];
        }

        out.push_str(rest);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_write_wins() {
        let mut vars = VariableStore::new();
        assert!(vars.insert("X", "\"1\""));
        assert!(!vars.insert("X", "\"2\""));
        assert_eq!(vars.get("X"), Some("\"1\""));
        assert_eq!(vars.len(), 1);
    }

    #[test]
    fn test_substitute_known() {
        let mut vars = VariableStore::new();
        vars.insert("HOST", "example.com");
        vars.insert("ID", "42");
        assert_eq!(
            vars.substitute("src=\"http://$(HOST)/item/$(ID)?again=$(ID)\""),
            "src=\"http://example.com/item/42?again=42\""
        );
    }

    #[test]
    fn test_substitute_miss_is_non_destructive() {
        let vars = VariableStore::new();
        assert_eq!(vars.substitute("value=\"$(X)\""), "value=\"$(X)\"");
        assert_eq!(vars.substitute("$()"), "$()");
        assert_eq!(vars.substitute("open $(X"), "open $(X");
    }

    #[test]
    fn test_substitute_not_recursive() {
        let mut vars = VariableStore::new();
        vars.insert("A", "$(B)");
        vars.insert("B", "b");
        assert_eq!(vars.substitute("$(A)"), "$(B)");
    }

    #[test]
    fn test_substitute_multibyte() {
        let mut vars = VariableStore::new();
        vars.insert("ö", "ü");
        assert_eq!(vars.substitute("€$(ö)€"), "€ü€");
    }

    #[test]
    fn test_shared_handle_sees_writes() {
        let shared = VariableStore::shared();
        let other = Rc::clone(&shared);
        shared.borrow_mut().insert("K", "v");
        assert_eq!(other.borrow().get("K"), Some("v"));
    }

    #[test]
    fn test_scope_parse() {
        let scope: VariableScope = serde_json::from_str("\"worker\"").unwrap();
        assert_eq!(scope, VariableScope::Worker);
        assert_eq!(VariableScope::default(), VariableScope::Request);
    }
}
