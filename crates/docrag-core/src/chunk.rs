//! Recursive separator-priority text splitter.
//!
//! Splits text into overlapping chunks bounded by `chunk_size` characters.
//! Separators are tried in priority order: paragraph (`\n\n`), line
//! (`\n`), sentence (`.`), word (` `), and finally single characters.
//!
//! # Algorithm
//!
//! 1. Pick the first separator that occurs in the text (the empty
//!    separator always matches and splits into characters).
//! 2. Split on it, keeping the separator at the start of the following
//!    piece so no text is lost.
//! 3. Pieces shorter than `chunk_size` are buffered; an oversized piece
//!    first flushes the buffer and is then split recursively with the
//!    remaining, finer separators.
//! 4. Buffered pieces are merged greedily into chunks up to `chunk_size`.
//!    When a chunk is emitted, pieces are dropped from the front until at
//!    most `chunk_overlap` characters remain; those seed the next chunk.
//! 5. Chunks are whitespace-trimmed; empty chunks are discarded.
//!
//! # Example
//!
//! ```rust
//! use docrag_core::chunk::TextSplitter;
//!
//! let splitter = TextSplitter::new(20, 0).unwrap();
//! let chunks = splitter.split_text("First paragraph.\n\nSecond paragraph.");
//! assert_eq!(chunks, vec!["First paragraph.", "Second paragraph."]);
//! ```

use std::collections::VecDeque;

use crate::models::Document;

/// Separators in preference order: paragraph, line, sentence, word, character.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ".", " ", ""];

/// Invalid splitter settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChunkingError {
    ZeroChunkSize,
    OverlapTooLarge { chunk_size: usize, chunk_overlap: usize },
}

impl std::fmt::Display for ChunkingError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ChunkingError::ZeroChunkSize => write!(f, "chunk size must be > 0"),
            ChunkingError::OverlapTooLarge {
                chunk_size,
                chunk_overlap,
            } => write!(
                f,
                "chunk overlap ({}) must not exceed chunk size ({})",
                chunk_overlap, chunk_size
            ),
        }
    }
}

impl std::error::Error for ChunkingError {}

/// Recursive character splitter. Sizes are measured in characters.
#[derive(Debug, Clone)]
pub struct TextSplitter {
    chunk_size: usize,
    chunk_overlap: usize,
    separators: Vec<String>,
}

impl TextSplitter {
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Result<Self, ChunkingError> {
        if chunk_size == 0 {
            return Err(ChunkingError::ZeroChunkSize);
        }
        if chunk_overlap > chunk_size {
            return Err(ChunkingError::OverlapTooLarge {
                chunk_size,
                chunk_overlap,
            });
        }
        Ok(Self {
            chunk_size,
            chunk_overlap,
            separators: DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect(),
        })
    }

    /// Replace the separator list. An empty string entry splits into characters.
    pub fn with_separators(mut self, separators: Vec<String>) -> Self {
        self.separators = separators;
        self
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split `text` into trimmed, non-empty chunks in document order.
    pub fn split_text(&self, text: &str) -> Vec<String> {
        self.split_recursive(text, &self.separators)
    }

    /// Split every document, copying its metadata onto each chunk.
    pub fn split_documents(&self, documents: &[Document]) -> Vec<Document> {
        let mut out = Vec::new();
        for doc in documents {
            for chunk in self.split_text(&doc.text) {
                out.push(Document {
                    text: chunk,
                    metadata: doc.metadata.clone(),
                });
            }
        }
        out
    }

    fn split_recursive(&self, text: &str, separators: &[String]) -> Vec<String> {
        let mut separator = separators.last().map(String::as_str).unwrap_or("");
        let mut finer: &[String] = &[];
        for (i, sep) in separators.iter().enumerate() {
            if sep.is_empty() {
                separator = "";
                break;
            }
            if text.contains(sep.as_str()) {
                separator = sep;
                finer = &separators[i + 1..];
                break;
            }
        }

        let mut chunks = Vec::new();
        let mut pending: Vec<&str> = Vec::new();

        for piece in split_keeping_separator(text, separator) {
            if char_len(piece) < self.chunk_size {
                pending.push(piece);
                continue;
            }
            if !pending.is_empty() {
                chunks.extend(self.merge_pieces(&pending));
                pending.clear();
            }
            if finer.is_empty() {
                let trimmed = piece.trim();
                if !trimmed.is_empty() {
                    chunks.push(trimmed.to_string());
                }
            } else {
                chunks.extend(self.split_recursive(piece, finer));
            }
        }

        if !pending.is_empty() {
            chunks.extend(self.merge_pieces(&pending));
        }
        chunks
    }

    fn merge_pieces(&self, pieces: &[&str]) -> Vec<String> {
        let mut merged = Vec::new();
        let mut window: VecDeque<&str> = VecDeque::new();
        let mut total = 0usize;

        for &piece in pieces {
            let len = char_len(piece);
            if total + len > self.chunk_size && !window.is_empty() {
                if let Some(chunk) = join_trimmed(&window) {
                    merged.push(chunk);
                }
                // Shrink to the overlap, and further if the next piece still won't fit
                while total > self.chunk_overlap || (total > 0 && total + len > self.chunk_size) {
                    match window.pop_front() {
                        Some(first) => total -= char_len(first),
                        None => break,
                    }
                }
            }
            window.push_back(piece);
            total += len;
        }

        if let Some(chunk) = join_trimmed(&window) {
            merged.push(chunk);
        }
        merged
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn join_trimmed(pieces: &VecDeque<&str>) -> Option<String> {
    let joined: String = pieces.iter().copied().collect();
    let trimmed = joined.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Split on `separator`, attaching each separator to the start of the
/// piece that follows it. Empty pieces are dropped.
fn split_keeping_separator<'a>(text: &'a str, separator: &str) -> Vec<&'a str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Metadata;
    use serde_json::json;

    #[test]
    fn test_rejects_invalid_settings() {
        assert_eq!(
            TextSplitter::new(0, 0).unwrap_err(),
            ChunkingError::ZeroChunkSize
        );
        assert!(matches!(
            TextSplitter::new(10, 11),
            Err(ChunkingError::OverlapTooLarge { .. })
        ));
        assert!(TextSplitter::new(10, 10).is_ok());
    }

    #[test]
    fn test_small_text_single_chunk() {
        let splitter = TextSplitter::new(800, 120).unwrap();
        assert_eq!(splitter.split_text("Hello, world!"), vec!["Hello, world!"]);
    }

    #[test]
    fn test_empty_and_blank_text() {
        let splitter = TextSplitter::new(800, 120).unwrap();
        assert!(splitter.split_text("").is_empty());
        assert!(splitter.split_text("  \n\n  ").is_empty());
    }

    #[test]
    fn test_separator_kept_with_following_piece() {
        assert_eq!(
            split_keeping_separator("a\n\nb\n\nc", "\n\n"),
            vec!["a", "\n\nb", "\n\nc"]
        );
        assert_eq!(
            split_keeping_separator("\n\nx", "\n\n"),
            vec!["\n\nx"]
        );
        assert_eq!(split_keeping_separator("héé", ""), vec!["h", "é", "é"]);
    }

    #[test]
    fn test_paragraphs_merge_until_full() {
        let splitter = TextSplitter::new(40, 0).unwrap();
        let text = "Alpha paragraph.\n\nBeta paragraph.\n\nGamma paragraph here.";
        let chunks = splitter.split_text(text);
        assert_eq!(
            chunks,
            vec!["Alpha paragraph.\n\nBeta paragraph.", "Gamma paragraph here."]
        );
    }

    #[test]
    fn test_chunks_respect_size() {
        let text = (0..200)
            .map(|i| format!("word{}", i))
            .collect::<Vec<_>>()
            .join(" ");
        let splitter = TextSplitter::new(50, 10).unwrap();
        let chunks = splitter.split_text(&text);
        assert!(chunks.len() > 1);
        for c in &chunks {
            assert!(c.chars().count() <= 50, "chunk too long: {:?}", c);
        }
    }

    #[test]
    fn test_overlap_repeats_trailing_words() {
        let splitter = TextSplitter::new(20, 10).unwrap();
        let chunks = splitter.split_text("one two three four five six seven eight");
        assert!(chunks.len() > 1);
        for pair in chunks.windows(2) {
            let last_word = pair[0].split_whitespace().last().unwrap();
            assert!(
                pair[1].contains(last_word),
                "expected overlap between {:?} and {:?}",
                pair[0],
                pair[1]
            );
        }
    }

    #[test]
    fn test_long_word_falls_back_to_characters() {
        let splitter = TextSplitter::new(4, 0).unwrap();
        let chunks = splitter.split_text("abcdefghij");
        assert_eq!(chunks, vec!["abcd", "efgh", "ij"]);
    }

    #[test]
    fn test_no_text_lost_without_overlap() {
        let text = "Sentence one. Sentence two.\nLine two here.\n\nNew paragraph with words.";
        let splitter = TextSplitter::new(16, 0).unwrap();
        let chunks = splitter.split_text(text);
        let rebuilt: String = chunks.concat();
        let squash = |s: &str| s.split_whitespace().collect::<String>();
        assert_eq!(squash(&rebuilt), squash(text));
    }

    #[test]
    fn test_split_documents_copies_metadata() {
        let mut meta = Metadata::new();
        meta.insert("source".to_string(), json!("docs/a.md"));
        let doc = Document {
            text: "First block.\n\nSecond block.".to_string(),
            metadata: meta,
        };
        let splitter = TextSplitter::new(14, 0).unwrap();
        let chunks = splitter.split_documents(&[doc]);
        assert_eq!(chunks.len(), 2);
        for c in &chunks {
            assert_eq!(c.source(), Some("docs/a.md"));
        }
    }

    #[test]
    fn test_deterministic() {
        let text = "Alpha\n\nBeta\n\nGamma\n\nDelta";
        let splitter = TextSplitter::new(8, 2).unwrap();
        assert_eq!(splitter.split_text(text), splitter.split_text(text));
    }
}
