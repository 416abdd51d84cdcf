//! Chunking of normalized document text
//!
//! Chunks are produced lazily by [`ChunkIter`]. Sizes count characters, not
//! bytes, and every cut lands on a UTF-8 boundary. Within each window the
//! chunker prefers a paragraph break, then a sentence end, then a line
//! break, then any space, and only falls back to a hard cut when the second
//! half of the window has none of those.

use std::path::{Path, PathBuf};

use chemkb_core::{Chunk, Provenance};

use crate::{LoadedDocument, ParserError, Result, Segment};

/// Sentence terminators searched when no paragraph break is available
const SENTENCE_ENDS: [&str; 7] = [". ", "! ", "? ", ".\n", "!\n", "?\n", "。"];

/// Configuration for document chunking
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkConfig {
    /// Target chunk size in characters
    pub chunk_size: usize,

    /// Characters repeated from the end of the previous chunk
    pub overlap: usize,

    /// Respect paragraph and sentence boundaries
    pub respect_boundaries: bool,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 1000,
            overlap: 200,
            respect_boundaries: true,
        }
    }
}

impl ChunkConfig {
    /// Create a config with boundary-aware splitting
    pub fn new(chunk_size: usize, overlap: usize) -> Self {
        Self {
            chunk_size,
            overlap,
            respect_boundaries: true,
        }
    }

    /// Toggle boundary-aware splitting
    pub fn with_boundaries(mut self, respect: bool) -> Self {
        self.respect_boundaries = respect;
        self
    }

    /// Reject sizes that could not make progress
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(ParserError::InvalidChunkConfig(
                "chunk_size must be positive".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(ParserError::InvalidChunkConfig(format!(
                "overlap {} must be smaller than chunk_size {}",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }
}

/// Splits documents into [`Chunk`]s
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    /// Create a chunker with a validated config
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    /// Lazily chunk a loaded document
    pub fn chunks<'a>(&self, doc: &'a LoadedDocument) -> ChunkIter<'a> {
        ChunkIter {
            text: &doc.content,
            segments: &doc.segments,
            source: &doc.path,
            config: self.config,
            position: 0,
            next_index: 0,
        }
    }

    /// Lazily chunk free text with no page metadata
    pub fn chunk_text<'a>(&self, text: &'a str) -> ChunkIter<'a> {
        ChunkIter {
            text,
            segments: &[],
            source: Path::new(""),
            config: self.config,
            position: 0,
            next_index: 0,
        }
    }
}

impl Default for Chunker {
    fn default() -> Self {
        Self {
            config: ChunkConfig::default(),
        }
    }
}

/// Lazy, finite iterator over the chunks of one text.
///
/// Cloning yields an independent iterator from the same position, so a
/// fresh `Chunker::chunks` call (or a clone taken up front) restarts it.
#[derive(Debug, Clone)]
pub struct ChunkIter<'a> {
    text: &'a str,
    segments: &'a [Segment],
    source: &'a Path,
    config: ChunkConfig,
    position: usize,
    next_index: u32,
}

impl<'a> ChunkIter<'a> {
    fn provenance_at(&self, offset: usize) -> Provenance {
        self.segments
            .iter()
            .find(|s| offset >= s.start && offset < s.end)
            .or_else(|| self.segments.last())
            .map(|s| Provenance {
                page: s.page,
                kind: s.kind,
            })
            .unwrap_or_default()
    }

    /// Where the next chunk starts after one ending at `end`
    fn next_start(&self, start: usize, end: usize) -> usize {
        if end >= self.text.len() || self.config.overlap == 0 {
            return end;
        }

        let back = self.text[start..end]
            .char_indices()
            .rev()
            .take(self.config.overlap)
            .last()
            .map(|(i, _)| start + i)
            .unwrap_or(end);

        // Always advance by at least one character
        let min_next = advance_chars(self.text, start, 1);
        back.max(min_next)
    }
}

impl<'a> Iterator for ChunkIter<'a> {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        if self.position >= self.text.len() {
            return None;
        }

        let start = self.position;
        let hard_end = advance_chars(self.text, start, self.config.chunk_size);
        let end = if hard_end >= self.text.len() {
            self.text.len()
        } else if self.config.respect_boundaries {
            find_break_point(self.text, start, hard_end, self.config.chunk_size)
        } else {
            hard_end
        };

        let chunk = Chunk {
            index: self.next_index,
            text: self.text[start..end].to_string(),
            source: PathBuf::from(self.source),
            provenance: self.provenance_at(start),
            start_offset: start,
            end_offset: end,
        };

        self.next_index += 1;
        self.position = self.next_start(start, end);
        Some(chunk)
    }
}

impl std::iter::FusedIterator for ChunkIter<'_> {}

/// Byte offset `n` characters after `from` (clamped to the text length)
fn advance_chars(text: &str, from: usize, n: usize) -> usize {
    text[from..]
        .char_indices()
        .nth(n)
        .map(|(i, _)| from + i)
        .unwrap_or(text.len())
}

/// Find a good break point in the second half of the window
fn find_break_point(text: &str, start: usize, hard_end: usize, chunk_size: usize) -> usize {
    let search_start = advance_chars(text, start, chunk_size / 2).min(hard_end);
    let window = &text[search_start..hard_end];

    // Look for paragraph break first
    if let Some(pos) = window.rfind("\n\n") {
        return search_start + pos + 2;
    }

    // Latest sentence end of any kind
    let sentence_end = SENTENCE_ENDS
        .iter()
        .filter_map(|pattern| window.rfind(pattern).map(|pos| pos + pattern.len()))
        .max();
    if let Some(end) = sentence_end {
        return search_start + end;
    }

    // Look for line break, then any space
    if let Some(pos) = window.rfind('\n') {
        return search_start + pos + 1;
    }
    if let Some(pos) = window.rfind(' ') {
        return search_start + pos + 1;
    }

    // Fall back to target
    hard_end
}
