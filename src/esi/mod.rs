//! Edge Side Includes processing
//!
//! This module provides:
//! - Variable store with `$(NAME)` substitution
//! - Directive classification and attribute extraction
//! - `esi:assign` and `esi:include` handlers
//! - The streaming translator that ties them to the tag scanner
//! - The body rewriter holding output across sub-request pauses

pub mod assign;
pub mod directive;
pub mod include;
pub mod rewriter;
pub mod translator;
pub mod variables;

pub use directive::{classify, Directive, IncludeAttrs};
pub use include::PendingInclude;
pub use rewriter::BodyRewriter;
pub use translator::{translate_stream, EsiTranslator, Step, TranslationStats, TranslatorOptions};
pub use variables::{SharedVariables, VariableScope, VariableStore};
