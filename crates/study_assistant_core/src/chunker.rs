//! crates/study_assistant_core/src/chunker.rs
//!
//! Splits extracted document text into overlapping fixed-width segments for
//! embedding and retrieval. Windows are measured in `char`s so multi-byte
//! input never splits a code point. Boundaries may fall mid-sentence; that is
//! an accepted trade-off for determinism.

use crate::ports::{PortError, PortResult};

/// Splits `text` into windows of `size` chars, each advancing by
/// `size - overlap` from the previous one. The final chunk may be shorter.
///
/// Empty or whitespace-only input yields an empty vec. `size == 0` or
/// `overlap >= size` is an `InvalidInput` error.
pub fn chunk(text: &str, size: usize, overlap: usize) -> PortResult<Vec<String>> {
    if size == 0 {
        return Err(PortError::InvalidInput(
            "chunk size must be greater than zero".to_string(),
        ));
    }
    if overlap >= size {
        return Err(PortError::InvalidInput(format!(
            "chunk overlap {} must be smaller than chunk size {}",
            overlap, size
        )));
    }
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let chars: Vec<char> = text.chars().collect();
    let step = size - overlap;
    let mut chunks = Vec::new();
    let mut start = 0;

    while start < chars.len() {
        let end = (start + size).min(chars.len());
        chunks.push(chars[start..end].iter().collect());
        if end == chars.len() {
            break;
        }
        start += step;
    }

    Ok(chunks)
}
