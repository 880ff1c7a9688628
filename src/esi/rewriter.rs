//! Body Rewriter
//!
//! Owns the translated-but-unwritten output of one response and the
//! failure policy, without touching the host. The filter feeds it body
//! input, drains what is ready, and reports how each include fetch ended.
//!
//! While an include is awaited, new input is only buffered: nothing after
//! the include is translated until its body is known. If the fetch fails,
//! the include and everything after it are written exactly as received.

use std::collections::VecDeque;
use std::mem;

use super::include::PendingInclude;
use super::translator::{EsiTranslator, Step, TranslationStats};

/// Step queue and pause/failure state for one response body
pub struct BodyRewriter {
    translator: EsiTranslator,
    queue: VecDeque<Step>,
    /// Include whose body is being fetched
    awaiting: Option<PendingInclude>,
    /// Input received while `awaiting`
    deferred: Vec<u8>,
    end_of_stream: bool,
    finished: bool,
    failed: bool,
}

impl BodyRewriter {
    pub fn new(translator: EsiTranslator) -> Self {
        Self {
            translator,
            queue: VecDeque::new(),
            awaiting: None,
            deferred: Vec::new(),
            end_of_stream: false,
            finished: false,
            failed: false,
        }
    }

    /// Accept body input; `end_of_stream` marks the last of it
    pub fn push(&mut self, input: &[u8], end_of_stream: bool) {
        self.end_of_stream |= end_of_stream;

        if self.awaiting.is_some() {
            self.deferred.extend_from_slice(input);
        } else {
            self.translate(input);
        }
    }

    /// Append ready output, stopping at the first include. Returns the
    /// target the caller must fetch before anything more is written.
    pub fn drain(&mut self, output: &mut Vec<u8>) -> Option<String> {
        if self.awaiting.is_some() {
            return None;
        }

        while let Some(step) = self.queue.pop_front() {
            match step {
                Step::Emit(bytes) | Step::Echo { output: bytes, .. } => {
                    output.extend_from_slice(&bytes)
                }
                Step::Fetch(include) => {
                    let target = include.target.clone();
                    self.awaiting = Some(include);
                    return Some(target);
                }
            }
        }

        None
    }

    /// The awaited include fetched `body`
    pub fn complete(&mut self, body: Vec<u8>) {
        if self.awaiting.take().is_none() {
            return;
        }
        if !body.is_empty() {
            self.queue.push_front(Step::Emit(body));
        }
        self.resume();
    }

    /// The awaited include failed. Its directive, every queued step, any
    /// open tag and all later input are written as received. Returns the
    /// failed include.
    pub fn fail(&mut self) -> Option<PendingInclude> {
        let include = self.awaiting.take();

        let mut raw = include
            .as_ref()
            .map(|include| include.raw.clone())
            .unwrap_or_default();
        for step in self.queue.drain(..) {
            raw.extend(step.into_raw());
        }
        if let Some(open_tag) = self.translator.abandon() {
            raw.extend(open_tag);
        }

        self.failed = true;
        if !raw.is_empty() {
            self.queue.push_back(Step::Emit(raw));
        }
        self.resume();

        include
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn stats(&self) -> &TranslationStats {
        self.translator.stats()
    }

    pub fn bytes_scanned(&self) -> usize {
        self.translator.bytes_scanned()
    }

    fn resume(&mut self) {
        let deferred = mem::take(&mut self.deferred);
        self.translate(&deferred);
    }

    fn translate(&mut self, input: &[u8]) {
        if self.failed {
            if !input.is_empty() {
                self.queue.push_back(Step::Emit(input.to_vec()));
            }
        } else {
            self.queue.extend(self.translator.push(input));
        }

        if self.end_of_stream && !self.finished {
            self.finished = true;
            if !self.failed {
                self.translator.finish();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::esi::{SharedVariables, TranslatorOptions, VariableStore};

    fn rewriter(vars: &SharedVariables) -> BodyRewriter {
        let options = TranslatorOptions {
            assign_enabled: true,
            ..Default::default()
        };
        BodyRewriter::new(EsiTranslator::new(options, vars.clone()))
    }

    fn drain_all(r: &mut BodyRewriter) -> (Vec<u8>, Option<String>) {
        let mut out = Vec::new();
        let target = r.drain(&mut out);
        (out, target)
    }

    #[test]
    fn test_include_completes_in_order() {
        let vars = VariableStore::shared();
        let mut r = rewriter(&vars);

        r.push(b"a<esi:include src=\"/x\"/>b", false);
        let (out, target) = drain_all(&mut r);
        assert_eq!(out, b"a");
        assert_eq!(target.as_deref(), Some("/x"));

        // Held back until the include lands
        r.push(b"c", true);
        assert_eq!(drain_all(&mut r), (Vec::new(), None));

        r.complete(b"X".to_vec());
        assert_eq!(drain_all(&mut r), (b"Xbc".to_vec(), None));
        assert!(!r.is_failed());
    }

    #[test]
    fn test_sequential_includes() {
        let vars = VariableStore::shared();
        let mut r = rewriter(&vars);
        r.push(b"<esi:include src=\"/a\"/>-<esi:include src=\"/b\"/>.", true);

        let mut out = Vec::new();
        assert_eq!(r.drain(&mut out).as_deref(), Some("/a"));
        r.complete(b"A".to_vec());
        assert_eq!(r.drain(&mut out).as_deref(), Some("/b"));
        r.complete(b"B".to_vec());
        assert_eq!(r.drain(&mut out), None);

        assert_eq!(out, b"A-B.");
        assert_eq!(r.stats().includes, 2);
    }

    #[test]
    fn test_failure_mid_chunk_writes_original_bytes() {
        let vars = VariableStore::shared();
        vars.borrow_mut().insert("X", "x");
        let mut r = rewriter(&vars);

        let input: &[u8] = b"<esi:include src=\"/bad\"/><esi:assign name=\"A\" value=\"$(X)\"/>tail";
        r.push(input, true);

        let mut out = Vec::new();
        assert_eq!(r.drain(&mut out).as_deref(), Some("/bad"));
        let failed = r.fail().unwrap();
        assert_eq!(failed.target, "/bad");
        assert_eq!(r.drain(&mut out), None);

        assert_eq!(out, input);
        assert!(r.is_failed());
    }

    #[test]
    fn test_failure_with_open_tag() {
        let vars = VariableStore::shared();
        let mut r = rewriter(&vars);

        let mut out = Vec::new();
        r.push(b"<esi:include src=\"/bad\"/>x<esi:ass", false);
        assert_eq!(r.drain(&mut out).as_deref(), Some("/bad"));
        r.fail();
        r.push(b"ign name=\"B\" value=\"1\"/><esi:include src=\"/y\"/>", true);
        assert_eq!(r.drain(&mut out), None);

        assert_eq!(
            out,
            b"<esi:include src=\"/bad\"/>x<esi:assign name=\"B\" value=\"1\"/><esi:include src=\"/y\"/>"
        );
        assert_eq!(vars.borrow().get("B"), None);
    }

    #[test]
    fn test_failure_after_input_arrived_during_fetch() {
        let vars = VariableStore::shared();
        let mut r = rewriter(&vars);

        let mut out = Vec::new();
        r.push(b"head<esi:include src=\"/bad\"/>", false);
        assert_eq!(r.drain(&mut out).as_deref(), Some("/bad"));

        r.push(b"<esi:assign name=\"L\" value=\"1\"/>", false);
        r.push(b"<esi:include src=\"/next\"/>", false);
        r.push(b"end", true);
        assert_eq!(r.drain(&mut out), None);

        r.fail();
        assert_eq!(r.drain(&mut out), None);

        assert_eq!(
            out,
            b"head<esi:include src=\"/bad\"/><esi:assign name=\"L\" value=\"1\"/><esi:include src=\"/next\"/>end"
        );
        assert_eq!(vars.borrow().get("L"), None);
        assert_eq!(r.stats().includes, 1);
    }

    #[test]
    fn test_input_during_fetch_translated_after_success() {
        let vars = VariableStore::shared();
        let mut r = rewriter(&vars);

        let mut out = Vec::new();
        r.push(b"<esi:include src=\"/first\"/>", false);
        assert_eq!(r.drain(&mut out).as_deref(), Some("/first"));

        r.push(b"<esi:assign name=\"L\" value=\"1\"/><esi:include src=\"/next?$(L)\"/>", true);
        r.complete(b"OK".to_vec());
        assert_eq!(r.drain(&mut out).as_deref(), Some("/next?1"));
        assert_eq!(vars.borrow().get("L"), Some("\"1\""));

        r.complete(Vec::new());
        assert_eq!(r.drain(&mut out), None);
        assert_eq!(out, b"OK<esi:assign name=\"L\" value=\"1\"/>");
    }

    #[test]
    fn test_second_include_fails_after_first_succeeds() {
        let vars = VariableStore::shared();
        let mut r = rewriter(&vars);
        r.push(b"<esi:include src=\"/a\"/>-<esi:include src=\"/b\"/>.", true);

        let mut out = Vec::new();
        r.drain(&mut out);
        r.complete(b"A".to_vec());
        r.drain(&mut out);
        r.fail();
        r.drain(&mut out);

        assert_eq!(out, b"A-<esi:include src=\"/b\"/>.");
    }

    #[test]
    fn test_complete_without_fetch_is_ignored() {
        let vars = VariableStore::shared();
        let mut r = rewriter(&vars);
        r.push(b"plain", true);
        r.complete(b"stray".to_vec());
        assert_eq!(drain_all(&mut r), (b"plain".to_vec(), None));
    }
}
