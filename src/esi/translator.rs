//! ESI Stream Translator
//!
//! Drives the tag scanner over incoming chunks and turns every complete tag
//! into replacement bytes: literal passthrough, an echoed assign, or an
//! include waiting for its sub-request.
//!
//! The translator does no I/O. It returns `Step`s in input order and the
//! caller writes `Emit`/`Echo` bytes and completes each `Fetch` before
//! writing anything that follows it. Every step keeps the input bytes it
//! came from, so a caller that gives up can still write the original. Tags are translated as soon as they close, so
//! the variables an include sees are exactly those assigned before it in
//! the stream.

use log::{debug, warn};
use std::future::Future;

use super::assign::{apply_assign, AssignOutcome};
use super::directive::{classify, is_esi, Directive};
use super::include::{prepare_include, PendingInclude};
use super::variables::SharedVariables;
use crate::config::FilterConfig;
use crate::streaming::{Segment, TagDecoder, TagScanner};
use crate::subrequest::FetchError;
use crate::telemetry;

/// Translator settings taken from the filter configuration
#[derive(Clone, Debug, Default)]
pub struct TranslatorOptions {
    /// Handle `esi:assign`
    pub assign_enabled: bool,
    /// Send every include to this URL
    pub fixed_url: Option<String>,
    /// Give up on tags longer than this
    pub max_tag_size: Option<usize>,
}

impl From<&FilterConfig> for TranslatorOptions {
    fn from(config: &FilterConfig) -> Self {
        Self {
            assign_enabled: config.assign,
            fixed_url: config.fixed_url.clone(),
            max_tag_size: config.max_tag_size,
        }
    }
}

/// One unit of translated output
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Step {
    /// Bytes to write as-is, identical to the input they came from
    Emit(Vec<u8>),
    /// An assign echoed with substitutions applied
    Echo { output: Vec<u8>, raw: Vec<u8> },
    /// Write the body fetched from `PendingInclude::target` here
    Fetch(PendingInclude),
}

impl Step {
    /// Input bytes this step was translated from
    pub fn into_raw(self) -> Vec<u8> {
        match self {
            Step::Emit(bytes) => bytes,
            Step::Echo { raw, .. } => raw,
            Step::Fetch(include) => include.raw,
        }
    }
}

/// Counters for one translation
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TranslationStats {
    pub tags: usize,
    pub assigns: usize,
    pub includes: usize,
    pub passthrough_tags: usize,
}

/// Incremental ESI translator for one response body
pub struct EsiTranslator {
    scanner: TagScanner,
    options: TranslatorOptions,
    vars: SharedVariables,
    stats: TranslationStats,
}

impl EsiTranslator {
    pub fn new(options: TranslatorOptions, vars: SharedVariables) -> Self {
        let scanner = match options.max_tag_size {
            Some(max) => TagScanner::with_max_tag_size(max),
            None => TagScanner::new(),
        };
        Self {
            scanner,
            options,
            vars,
            stats: TranslationStats::default(),
        }
    }

    /// Translate one chunk of the body
    pub fn push(&mut self, chunk: &[u8]) -> Vec<Step> {
        let overflows = self.scanner.overflows();
        let segments = self.scanner.feed(chunk);
        if self.scanner.overflows() > overflows {
            telemetry::audit_tag_overflow(self.options.max_tag_size.unwrap_or_default()).emit();
        }

        let mut steps = Vec::new();
        for segment in segments {
            match segment {
                Segment::Literal(bytes) => push_emit(&mut steps, bytes),
                Segment::Tag(fragments) => self.translate_tag(&fragments, &mut steps),
            }
        }
        steps
    }

    /// End of body. Returns the number of bytes of an unterminated tag that
    /// were dropped.
    pub fn finish(&mut self) -> usize {
        let dropped = self.scanner.finish();
        if dropped > 0 {
            telemetry::audit_unterminated_tag(dropped).emit();
        }
        dropped
    }

    /// Stop translating: return the raw bytes of any open tag so the caller
    /// can pass the rest of the body through untouched.
    pub fn abandon(&mut self) -> Option<Vec<u8>> {
        self.scanner.take_pending()
    }

    pub fn stats(&self) -> &TranslationStats {
        &self.stats
    }

    /// Get total bytes scanned
    pub fn bytes_scanned(&self) -> usize {
        self.scanner.bytes_scanned()
    }

    fn translate_tag(&mut self, fragments: &[Vec<u8>], steps: &mut Vec<Step>) {
        self.stats.tags += 1;

        let raw = enclose(fragments);
        // Check the prefix on raw bytes so non-ESI markup is never re-encoded
        if !is_esi(&raw[1..]) {
            self.stats.passthrough_tags += 1;
            push_emit(steps, raw);
            return;
        }

        let text = TagDecoder::decode_fragments(fragments);
        match classify(&text, self.options.assign_enabled) {
            Directive::Assign { .. } => {
                self.stats.assigns += 1;
                let result = apply_assign(&text, &mut self.vars.borrow_mut());
                match &result.outcome {
                    AssignOutcome::Stored { name, .. } => {
                        telemetry::audit_assigned(name).emit();
                    }
                    AssignOutcome::Collision { name } => {
                        telemetry::audit_collision(name).emit();
                    }
                    AssignOutcome::Malformed => {
                        debug!("esi:assign lost name or value after substitution");
                    }
                }
                steps.push(Step::Echo {
                    output: result.output,
                    raw,
                });
            }
            Directive::Include(attrs) => {
                self.stats.includes += 1;
                let pending = prepare_include(
                    &text,
                    raw,
                    attrs,
                    self.options.fixed_url.as_deref(),
                    &self.vars.borrow(),
                );
                debug!("esi:include resolved to '{}'", pending.target);
                steps.push(Step::Fetch(pending));
            }
            Directive::Other => {
                self.stats.passthrough_tags += 1;
                push_emit(steps, raw);
            }
        }
    }
}

/// Translate a whole body, awaiting each include before writing anything
/// that follows it. A failed fetch aborts the translation.
pub async fn translate_stream<I, F, Fut>(
    translator: &mut EsiTranslator,
    chunks: I,
    mut fetch: F,
) -> Result<Vec<u8>, FetchError>
where
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Result<String, FetchError>>,
{
    let mut output = Vec::new();

    for chunk in chunks {
        for step in translator.push(chunk.as_ref()) {
            match step {
                Step::Emit(bytes) | Step::Echo { output: bytes, .. } => {
                    output.extend_from_slice(&bytes)
                }
                Step::Fetch(include) => {
                    let body = fetch(include.target.clone()).await.map_err(|e| {
                        warn!("esi:include of '{}' failed: {}", include.target, e);
                        e
                    })?;
                    output.extend_from_slice(body.as_bytes());
                }
            }
        }
    }

    translator.finish();
    Ok(output)
}

/// Append bytes, merging with a preceding `Emit`
fn push_emit(steps: &mut Vec<Step>, bytes: Vec<u8>) {
    if bytes.is_empty() {
        return;
    }
    match steps.last_mut() {
        Some(Step::Emit(prev)) => prev.extend_from_slice(&bytes),
        _ => steps.push(Step::Emit(bytes)),
    }
}

/// Restore the `<`/`>` delimiters around raw tag fragments
fn enclose(fragments: &[Vec<u8>]) -> Vec<u8> {
    let len: usize = fragments.iter().map(Vec::len).sum();
    let mut raw = Vec::with_capacity(len + 2);
    raw.push(b'<');
    for fragment in fragments {
        raw.extend_from_slice(fragment);
    }
    raw.push(b'>');
    raw
}
