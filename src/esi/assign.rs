//! `esi:assign` handler
//!
//! Substitutes `$(..)` over the whole tag, stores the resulting `value`
//! under `name` (first write wins) and leaves the directive visible in the
//! output.

use log::{debug, info};

use super::directive::assign_attrs;
use super::variables::VariableStore;

/// What an assign did to the store
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AssignOutcome {
    /// Value stored under a new name
    Stored { name: String, value: String },
    /// Name already present; store unchanged
    Collision { name: String },
    /// Substitution removed `name` or `value`
    Malformed,
}

/// Result of handling one assign directive
#[derive(Debug)]
pub struct AssignResult {
    /// Bytes to write in place of the tag
    pub output: Vec<u8>,
    pub outcome: AssignOutcome,
}

/// Apply an assign directive given its decoded tag text
pub fn apply_assign(text: &str, vars: &mut VariableStore) -> AssignResult {
    let substituted = vars.substitute(text);

    let outcome = match assign_attrs(&substituted) {
        Some((name, value)) => {
            if vars.insert(&name, &value) {
                debug!("esi:assign {} = {}", name, value);
                AssignOutcome::Stored { name, value }
            } else {
                info!("esi:assign ignored, variable '{}' is already set", name);
                AssignOutcome::Collision { name }
            }
        }
        None => AssignOutcome::Malformed,
    };

    let mut output = Vec::with_capacity(substituted.len() + 2);
    output.push(b'<');
    output.extend_from_slice(substituted.as_bytes());
    output.push(b'>');

    AssignResult { output, outcome }
}
