//! Fixed-window text chunker with overlap.
//!
//! Splits extracted text into windows of `size` characters, each starting
//! `size - overlap` characters after the previous one. Offsets count Unicode
//! scalar values, so a chunk never cuts a multi-byte character in half.
//!
//! The chunk's position in the output is its `chunk_index`, which together
//! with the document id keys the persisted row.

use anyhow::{bail, Result};

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

/// Chunker with validated parameters (`size > overlap`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunker {
    size: usize,
    overlap: usize,
}

impl Chunker {
    /// Build a chunker. Fails when `size` is zero or `overlap >= size`,
    /// which would otherwise never advance.
    pub fn new(size: usize, overlap: usize) -> Result<Self> {
        if size == 0 {
            bail!("chunk size must be > 0");
        }
        if overlap >= size {
            bail!("chunk overlap ({}) must be smaller than chunk size ({})", overlap, size);
        }
        Ok(Self { size, overlap })
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    /// Split `text` into overlapping windows, in order.
    ///
    /// Chunk `i` starts at character `i * (size - overlap)`. Emission stops
    /// once a window reaches the end of the text, so no trailing window is
    /// ever fully contained in its predecessor. Empty input yields no chunks.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        let offsets: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        let len = offsets.len();
        let byte_at = |pos: usize| if pos >= len { text.len() } else { offsets[pos] };

        let step = self.size - self.overlap;
        let mut chunks = Vec::new();
        let mut start = 0;

        while start < len {
            let end = (start + self.size).min(len);
            chunks.push(text[byte_at(start)..byte_at(end)].to_string());
            if end == len {
                break;
            }
            start += step;
        }

        chunks
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn expected_count(len: usize, size: usize, overlap: usize) -> usize {
        let step = size - overlap;
        (len - overlap).div_ceil(step)
    }

    #[test]
    fn test_empty_text() {
        assert!(Chunker::default().chunk("").is_empty());
    }

    #[test]
    fn test_short_text_single_chunk() {
        let chunks = Chunker::default().chunk("Hello, world!");
        assert_eq!(chunks, vec!["Hello, world!".to_string()]);
    }

    #[test]
    fn test_2500_chars_make_three_chunks() {
        let text: String = (0..2500).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
        let chunks = Chunker::default().chunk(&text);
        assert_eq!(chunks.len(), 3);
        assert_eq!(chunks[0], text[0..1000]);
        assert_eq!(chunks[1], text[800..1800]);
        assert_eq!(chunks[2], text[1600..2500]);
    }

    #[test]
    fn test_chunk_count_formula() {
        let chunker = Chunker::new(10, 3).unwrap();
        for len in 4..200 {
            let text = "x".repeat(len);
            assert_eq!(
                chunker.chunk(&text).len(),
                expected_count(len, 10, 3),
                "length {}",
                len
            );
        }
    }

    #[test]
    fn test_start_offsets() {
        let text: String = (0..57).map(|i| char::from(b'0' + (i % 10) as u8)).collect();
        let chunker = Chunker::new(12, 5).unwrap();
        for (i, chunk) in chunker.chunk(&text).iter().enumerate() {
            let start = i * 7;
            assert!(text[start..].starts_with(chunk.as_str()), "chunk {}", i);
        }
    }

    #[test]
    fn test_last_chunk_not_padded() {
        let chunks = Chunker::new(10, 2).unwrap().chunk(&"y".repeat(13));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[1].len(), 5);
    }

    #[test]
    fn test_reconstruction_from_non_overlapping_parts() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(40);
        let chunker = Chunker::new(64, 16).unwrap();
        let chunks = chunker.chunk(&text);
        let mut rebuilt = chunks[0].clone();
        for chunk in &chunks[1..] {
            rebuilt.extend(chunk.chars().skip(16));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_multibyte_text_is_split_on_char_boundaries() {
        let text = "żółć gęślą jaźń ".repeat(20);
        let chunker = Chunker::new(7, 2).unwrap();
        let chunks = chunker.chunk(&text);
        assert!(chunks.iter().all(|c| c.chars().count() <= 7));
        let mut rebuilt = chunks[0].clone();
        for chunk in &chunks[1..] {
            rebuilt.extend(chunk.chars().skip(2));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn test_overlap_must_be_smaller_than_size() {
        assert!(Chunker::new(100, 100).is_err());
        assert!(Chunker::new(100, 150).is_err());
        assert!(Chunker::new(0, 0).is_err());
        assert!(Chunker::new(100, 0).is_ok());
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha Beta Gamma Delta ".repeat(100);
        let chunker = Chunker::default();
        assert_eq!(chunker.chunk(&text), chunker.chunk(&text));
    }
}
