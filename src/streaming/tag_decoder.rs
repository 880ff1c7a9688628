//! Incremental UTF-8 decoding for buffered tag fragments
//!
//! CRITICAL: A tag can arrive in any number of network chunks, and a
//! multi-byte character can split across any two of them. Decoding each
//! fragment on its own would turn the halves into replacement characters.
//! The decoder keeps the incomplete tail of one fragment and prepends it to
//! the next.
//!
//! A UTF-8 character can be 1-4 bytes:
//! - 1 byte:  0xxxxxxx (ASCII)
//! - 2 bytes: 110xxxxx 10xxxxxx
//! - 3 bytes: 1110xxxx 10xxxxxx 10xxxxxx
//! - 4 bytes: 11110xxx 10xxxxxx 10xxxxxx 10xxxxxx
//!
//! Malformed input never fails: it decodes to U+FFFD, the same way
//! `String::from_utf8_lossy` does.

/// Check if byte is a UTF-8 continuation byte (10xxxxxx)
#[inline]
pub fn is_continuation(byte: u8) -> bool {
    (byte & 0b1100_0000) == 0b1000_0000
}

/// Get expected length of UTF-8 sequence from first byte
#[inline]
pub fn sequence_length(first_byte: u8) -> usize {
    match first_byte {
        0x00..=0x7F => 1, // ASCII
        0xC0..=0xDF => 2, // 2-byte sequence
        0xE0..=0xEF => 3, // 3-byte sequence
        0xF0..=0xF7 => 4, // 4-byte sequence
        _ => 1,           // Invalid, treat as single byte
    }
}

/// Streaming UTF-8 decoder that carries split sequences between calls.
#[derive(Debug, Default)]
pub struct TagDecoder {
    /// Leftover bytes from the previous fragment (at most 3 for UTF-8)
    pending: [u8; 4],
    /// Number of leftover bytes
    pending_len: usize,
}

impl TagDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decode one fragment. Bytes of a trailing incomplete sequence are
    /// held back until the next call or `finish`.
    pub fn decode(&mut self, fragment: &[u8]) -> String {
        let mut bytes = Vec::with_capacity(self.pending_len + fragment.len());
        bytes.extend_from_slice(&self.pending[..self.pending_len]);
        bytes.extend_from_slice(fragment);
        self.pending_len = 0;

        let boundary = incomplete_tail_start(&bytes).unwrap_or(bytes.len());
        let tail = &bytes[boundary..];
        self.pending[..tail.len()].copy_from_slice(tail);
        self.pending_len = tail.len();

        String::from_utf8_lossy(&bytes[..boundary]).into_owned()
    }

    /// Flush anything still held back. An incomplete sequence becomes U+FFFD.
    pub fn finish(&mut self) -> String {
        let out = String::from_utf8_lossy(&self.pending[..self.pending_len]).into_owned();
        self.pending_len = 0;
        out
    }

    /// Decode the ordered fragments of one tag into its text.
    pub fn decode_fragments<B: AsRef<[u8]>>(fragments: &[B]) -> String {
        let mut decoder = Self::new();
        let mut text = String::new();
        for fragment in fragments {
            text.push_str(&decoder.decode(fragment.as_ref()));
        }
        text.push_str(&decoder.finish());
        text
    }
}

/// Start of an incomplete sequence at the end of `bytes`, if there is one.
fn incomplete_tail_start(bytes: &[u8]) -> Option<usize> {
    // Scan backwards at most 3 bytes for the lead byte of the last sequence
    let floor = bytes.len().saturating_sub(3);
    let mut i = bytes.len();
    while i > floor {
        i -= 1;
        if !is_continuation(bytes[i]) {
            let available = bytes.len() - i;
            return (available < sequence_length(bytes[i])).then_some(i);
        }
    }
    None
}
