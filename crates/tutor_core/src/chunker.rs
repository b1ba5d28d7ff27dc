//! crates/tutor_core/src/chunker.rs
//!
//! Splits extracted document text into overlapping fixed-size windows.

pub const DEFAULT_CHUNK_SIZE: usize = 1000;
pub const DEFAULT_CHUNK_OVERLAP: usize = 200;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ChunkerError {
    #[error("chunk size must be greater than zero")]
    ZeroChunkSize,
    #[error("overlap ({overlap}) must be smaller than the chunk size ({chunk_size})")]
    OverlapTooLarge { chunk_size: usize, overlap: usize },
}

/// A sliding-window chunker measured in characters, not bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TextChunker {
    chunk_size: usize,
    overlap: usize,
}

impl Default for TextChunker {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            overlap: DEFAULT_CHUNK_OVERLAP,
        }
    }
}

impl TextChunker {
    pub fn new(chunk_size: usize, overlap: usize) -> Result<Self, ChunkerError> {
        if chunk_size == 0 {
            return Err(ChunkerError::ZeroChunkSize);
        }
        if overlap >= chunk_size {
            return Err(ChunkerError::OverlapTooLarge {
                chunk_size,
                overlap,
            });
        }
        Ok(Self {
            chunk_size,
            overlap,
        })
    }

    /// Text no longer than one window is returned whole. Otherwise windows of
    /// `chunk_size` characters advance by `chunk_size - overlap`; the last
    /// window is the first one that reaches the end of the text.
    pub fn chunk(&self, text: &str) -> Vec<String> {
        // Byte offset of every char boundary, plus the end of the string.
        let mut boundaries: Vec<usize> = text.char_indices().map(|(i, _)| i).collect();
        let char_len = boundaries.len();
        boundaries.push(text.len());

        if char_len <= self.chunk_size {
            return vec![text.to_string()];
        }

        let step = self.chunk_size - self.overlap;
        let mut chunks = Vec::with_capacity(char_len / step + 1);
        let mut start = 0;
        loop {
            let end = (start + self.chunk_size).min(char_len);
            let slice = &text[boundaries[start]..boundaries[end]];
            if !slice.is_empty() {
                chunks.push(slice.to_string());
            }
            if end == char_len {
                break;
            }
            start += step;
        }
        chunks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_text_is_a_single_chunk() {
        let chunker = TextChunker::default();
        assert_eq!(chunker.chunk("short"), vec!["short".to_string()]);
    }

    #[test]
    fn empty_text_yields_one_empty_chunk() {
        let chunker = TextChunker::default();
        assert_eq!(chunker.chunk(""), vec![String::new()]);
    }

    #[test]
    fn rejects_overlap_not_smaller_than_size() {
        assert_eq!(
            TextChunker::new(100, 100),
            Err(ChunkerError::OverlapTooLarge {
                chunk_size: 100,
                overlap: 100
            })
        );
        assert!(TextChunker::new(100, 150).is_err());
        assert_eq!(TextChunker::new(0, 0), Err(ChunkerError::ZeroChunkSize));
    }

    #[test]
    fn windows_overlap_and_cover_the_text() {
        let chunker = TextChunker::new(10, 3).unwrap();
        let text: String = ('a'..='z').collect();
        let chunks = chunker.chunk(&text);

        // ceil((26 - 3) / 7) = 4
        assert_eq!(chunks.len(), 4);
        assert!(chunks.iter().all(|c| c.chars().count() <= 10));
        assert_eq!(chunks[0], "abcdefghij");
        assert_eq!(chunks[1], "hijklmnopq");
        assert!(chunks.last().unwrap().ends_with('z'));

        // Dropping each chunk's overlap prefix rebuilds the original.
        let mut rebuilt = chunks[0].clone();
        for chunk in &chunks[1..] {
            rebuilt.extend(chunk.chars().skip(3));
        }
        assert_eq!(rebuilt, text);
    }

    #[test]
    fn counts_characters_not_bytes() {
        let chunker = TextChunker::new(4, 1).unwrap();
        let chunks = chunker.chunk("éléphant");
        assert_eq!(chunks, vec!["élép", "phan", "nt"]);
    }

    #[test]
    fn chunk_count_matches_the_window_formula() {
        let chunker = TextChunker::default();
        for len in [1001usize, 1500, 1800, 1801, 5000, 12345] {
            let text = "x".repeat(len);
            let expected = (len - 200).div_ceil(800);
            assert_eq!(chunker.chunk(&text).len(), expected, "length {}", len);
        }
    }
}
