//! Streaming module for chunk-at-a-time body rewriting
//!
//! This module provides streaming primitives that:
//! - Hold only the bytes of an open tag, never the whole body
//! - Handle UTF-8 boundaries across chunks
//! - Delimit tags with a byte-level state machine (no regex)

pub mod tag_decoder;
pub mod tag_scanner;

pub use tag_decoder::TagDecoder;
pub use tag_scanner::{Segment, TagScanner};
