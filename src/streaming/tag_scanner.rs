//! Streaming Tag Scanner
//!
//! Splits a body into literal bytes and `<...>` tag spans as chunks arrive.
//! Literal bytes are handed back immediately; only the bytes of an open tag
//! are held, so memory is bounded by the longest tag rather than the body.
//!
//! The delimiters are the single bytes `<` (0x3C) and `>` (0x3E). Both are
//! ASCII, so they can never appear inside a multi-byte UTF-8 sequence and
//! the scanner can stay byte-oriented.

const TAG_OPEN: u8 = b'<';
const TAG_CLOSE: u8 = b'>';

/// A piece of scanner output, in input order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Bytes outside any tag, to be forwarded verbatim
    Literal(Vec<u8>),
    /// The raw fragments between a `<` and its `>`, delimiters removed
    Tag(Vec<Vec<u8>>),
}

/// Byte-level `<`/`>` state machine
#[derive(Debug, Default)]
pub struct TagScanner {
    /// Whether a `<` has been seen without its `>`
    scanning: bool,
    /// Fragments of the open tag, one per chunk it spans
    fragments: Vec<Vec<u8>>,
    /// Total bytes held in `fragments`
    buffered: usize,
    /// Longest tag body kept before giving up on it (None = unbounded)
    max_tag_size: Option<usize>,
    /// Total bytes fed
    bytes_scanned: usize,
    /// Tags abandoned for exceeding `max_tag_size`
    overflows: usize,
}

impl TagScanner {
    /// Create a scanner with an unbounded tag buffer
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a scanner that gives up on tags longer than `max_tag_size`.
    ///
    /// An abandoned tag is emitted literally (`<` plus everything buffered)
    /// and the scanner returns to passthrough mode.
    pub fn with_max_tag_size(max_tag_size: usize) -> Self {
        Self {
            max_tag_size: Some(max_tag_size),
            ..Self::default()
        }
    }

    /// Scan one chunk. A chunk may close a tag opened by an earlier chunk,
    /// contain several tags, or open one that closes later.
    pub fn feed(&mut self, chunk: &[u8]) -> Vec<Segment> {
        self.bytes_scanned += chunk.len();

        let mut segments = Vec::new();
        let mut rest = chunk;

        while !rest.is_empty() {
            if !self.scanning {
                match rest.iter().position(|&b| b == TAG_OPEN) {
                    Some(start) => {
                        if start > 0 {
                            segments.push(Segment::Literal(rest[..start].to_vec()));
                        }
                        self.scanning = true;
                        rest = &rest[start + 1..];
                    }
                    None => {
                        segments.push(Segment::Literal(rest.to_vec()));
                        rest = &[];
                    }
                }
                continue;
            }

            let close = rest.iter().position(|&b| b == TAG_CLOSE);
            let fragment = &rest[..close.unwrap_or(rest.len())];

            if self.exceeds_limit(fragment.len()) {
                segments.push(Segment::Literal(self.take_open_tag(fragment)));
                self.overflows += 1;
                // A closing `>` is left for passthrough mode
                rest = &rest[fragment.len()..];
                continue;
            }

            if !fragment.is_empty() {
                self.fragments.push(fragment.to_vec());
                self.buffered += fragment.len();
            }

            match close {
                Some(end) => {
                    self.scanning = false;
                    self.buffered = 0;
                    segments.push(Segment::Tag(std::mem::take(&mut self.fragments)));
                    rest = &rest[end + 1..];
                }
                None => rest = &[],
            }
        }

        segments
    }

    /// End of input. An unterminated tag is dropped; returns how many of
    /// its bytes were discarded.
    pub fn finish(&mut self) -> usize {
        let dropped = self.buffered;
        self.reset_open_tag();
        dropped
    }

    /// Abandon the open tag, if any, returning its raw bytes including the
    /// opening `<` so the caller can pass them through untouched.
    pub fn take_pending(&mut self) -> Option<Vec<u8>> {
        if !self.scanning {
            return None;
        }
        Some(self.take_open_tag(&[]))
    }

    /// Get total bytes scanned
    pub fn bytes_scanned(&self) -> usize {
        self.bytes_scanned
    }

    /// Number of tags abandoned for size
    pub fn overflows(&self) -> usize {
        self.overflows
    }

    fn exceeds_limit(&self, additional: usize) -> bool {
        self.max_tag_size
            .map_or(false, |max| self.buffered + additional > max)
    }

    fn take_open_tag(&mut self, tail: &[u8]) -> Vec<u8> {
        let mut raw = Vec::with_capacity(1 + self.buffered + tail.len());
        raw.push(TAG_OPEN);
        for fragment in &self.fragments {
            raw.extend_from_slice(fragment);
        }
        raw.extend_from_slice(tail);
        self.reset_open_tag();
        raw
    }

    fn reset_open_tag(&mut self) {
        self.scanning = false;
        self.fragments.clear();
        self.buffered = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Reassemble scanner output, restoring delimiters around tags
    fn render(segments: &[Segment]) -> Vec<u8> {
        let mut out = Vec::new();
        for segment in segments {
            match segment {
                Segment::Literal(bytes) => out.extend_from_slice(bytes),
                Segment::Tag(fragments) => {
                    out.push(b'<');
                    for f in fragments {
                        out.extend_from_slice(f);
                    }
                    out.push(b'>');
                }
            }
        }
        out
    }

    fn tags(segments: &[Segment]) -> Vec<Vec<u8>> {
        segments
            .iter()
            .filter_map(|s| match s {
                Segment::Tag(fragments) => Some(fragments.concat()),
                Segment::Literal(_) => None,
            })
            .collect()
    }

    #[test]
    fn test_plain_text() {
        let mut scanner = TagScanner::new();
        let segments = scanner.feed(b"no tags here");
        assert_eq!(segments, vec![Segment::Literal(b"no tags here".to_vec())]);
        assert_eq!(scanner.finish(), 0);
    }

    #[test]
    fn test_multiple_tags_in_one_chunk() {
        let mut scanner = TagScanner::new();
        let segments = scanner.feed(b"a<b>c<i>d");
        assert_eq!(
            segments,
            vec![
                Segment::Literal(b"a".to_vec()),
                Segment::Tag(vec![b"b".to_vec()]),
                Segment::Literal(b"c".to_vec()),
                Segment::Tag(vec![b"i".to_vec()]),
                Segment::Literal(b"d".to_vec()),
            ]
        );
    }

    #[test]
    fn test_empty_tag() {
        let mut scanner = TagScanner::new();
        let segments = scanner.feed(b"<>");
        assert_eq!(segments, vec![Segment::Tag(vec![])]);
    }

    #[test]
    fn test_tag_across_many_chunks() {
        let mut scanner = TagScanner::new();
        assert_eq!(scanner.feed(b"x<esi:"), vec![Segment::Literal(b"x".to_vec())]);
        assert!(scanner.feed(b"include ").is_empty());
        assert!(scanner.feed(b"").is_empty());
        let segments = scanner.feed(b"src=\"/a\"/>y");
        assert_eq!(
            segments,
            vec![
                Segment::Tag(vec![
                    b"esi:".to_vec(),
                    b"include ".to_vec(),
                    b"src=\"/a\"/".to_vec()
                ]),
                Segment::Literal(b"y".to_vec()),
            ]
        );
    }

    #[test]
    fn test_every_split_offset() {
        let input: &[u8] = b"head<esi:include src=\"/a\"/>mid<b>tail";
        let whole = TagScanner::new().feed(input);

        for split in 0..=input.len() {
            let mut scanner = TagScanner::new();
            let mut segments = scanner.feed(&input[..split]);
            segments.extend(scanner.feed(&input[split..]));

            assert_eq!(render(&segments), input, "split at {}", split);
            assert_eq!(tags(&segments), tags(&whole), "split at {}", split);
        }
    }

    #[test]
    fn test_unterminated_tag_dropped() {
        let mut scanner = TagScanner::new();
        let segments = scanner.feed(b"ok<esi:include src=");
        assert_eq!(segments, vec![Segment::Literal(b"ok".to_vec())]);
        assert_eq!(scanner.finish(), b"esi:include src=".len());
        assert_eq!(scanner.take_pending(), None);
    }

    #[test]
    fn test_overflow_emits_literal() {
        let mut scanner = TagScanner::with_max_tag_size(4);
        let segments = scanner.feed(b"a<abcdefg>b<ok>");
        assert_eq!(render(&segments), b"a<abcdefg>b<ok>");
        assert_eq!(tags(&segments), vec![b"ok".to_vec()]);
        assert_eq!(scanner.overflows(), 1);
    }

    #[test]
    fn test_overflow_across_chunks() {
        let mut scanner = TagScanner::with_max_tag_size(5);
        assert!(scanner.feed(b"<abc").is_empty());
        let segments = scanner.feed(b"def");
        assert_eq!(segments, vec![Segment::Literal(b"<abcdef".to_vec())]);
        assert_eq!(scanner.take_pending(), None);
        assert_eq!(scanner.feed(b">"), vec![Segment::Literal(b">".to_vec())]);
    }

    #[test]
    fn test_take_pending() {
        let mut scanner = TagScanner::new();
        scanner.feed(b"<esi:inc");
        scanner.feed(b"lude");
        assert_eq!(scanner.take_pending(), Some(b"<esi:include".to_vec()));
        assert_eq!(scanner.take_pending(), None);
        assert_eq!(scanner.finish(), 0);
    }
}
