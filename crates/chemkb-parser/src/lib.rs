//! chemkb Parser - Document loading and chunking
//!
//! Supports loading of:
//! - PDF documents (page text plus best-effort table detection)
//! - Markdown and plain text files
//!
//! Each loader implements the `DocumentLoader` trait and produces a
//! `LoadedDocument`: one normalized text stream whose page and table
//! boundaries are kept as segment metadata. The `chunk` module splits that
//! stream into retrievable units.

use std::io::Read;
use std::path::{Path, PathBuf};

use chemkb_core::{ContentKind, Provenance};
use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};
use thiserror::Error;

pub mod chunk;
pub mod pdf;
pub mod table;

pub use chunk::{ChunkConfig, ChunkIter, Chunker};
pub use pdf::PdfLoader;
pub use table::{extract_tables, ExtractionWarning, Table, TableExtraction};

// ============================================================================
// Error Types
// ============================================================================

/// Errors that can occur while loading a document
#[derive(Error, Debug)]
pub enum ParserError {
    /// File format is not supported
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// IO error while reading the file
    #[error("IO error reading file {path}: {source}")]
    IoError {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// PDF parsing error
    #[error("PDF parsing error: {0}")]
    PdfError(String),

    /// File is corrupted or malformed
    #[error("File is corrupted or malformed: {0}")]
    CorruptedFile(String),

    /// Encoding error
    #[error("Text encoding error: {0}")]
    EncodingError(String),

    /// Chunking parameters are unusable
    #[error("Invalid chunk configuration: {0}")]
    InvalidChunkConfig(String),
}

pub type Result<T> = std::result::Result<T, ParserError>;

// ============================================================================
// Loaded Document Types
// ============================================================================

/// Supported file types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileType {
    Pdf,
    Markdown,
    PlainText,
    Unknown,
}

impl FileType {
    /// Detect file type from extension
    pub fn from_extension(ext: &str) -> Self {
        match ext.to_lowercase().as_str() {
            "pdf" => Self::Pdf,
            "md" | "markdown" => Self::Markdown,
            "txt" => Self::PlainText,
            _ => Self::Unknown,
        }
    }

    /// Detect file type from path
    pub fn from_path(path: &Path) -> Self {
        path.extension()
            .and_then(|ext| ext.to_str())
            .map(Self::from_extension)
            .unwrap_or(Self::Unknown)
    }
}

impl std::fmt::Display for FileType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pdf => write!(f, "pdf"),
            Self::Markdown => write!(f, "markdown"),
            Self::PlainText => write!(f, "text"),
            Self::Unknown => write!(f, "unknown"),
        }
    }
}

/// A byte range of the normalized content with its origin
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Segment {
    /// 1-based page number
    pub page: Option<u32>,

    /// Page text or table markdown
    pub kind: ContentKind,

    /// Start byte offset in `LoadedDocument::content`
    pub start: usize,

    /// End byte offset (exclusive)
    pub end: usize,
}

/// Raw content of one page before normalization
#[derive(Debug, Clone, Default)]
pub struct PageContent {
    /// 1-based page number
    pub number: u32,

    /// Extracted page text
    pub text: String,

    /// Markdown blocks of tables detected on this page
    pub tables: Vec<String>,
}

/// A loaded document with normalized content
#[derive(Debug, Clone)]
pub struct LoadedDocument {
    /// Original file path
    pub path: PathBuf,

    /// Detected file type
    pub file_type: FileType,

    /// SHA-256 of the file bytes (hex)
    pub fingerprint: String,

    /// Number of pages in the source
    pub page_count: u32,

    /// When extraction ran
    pub extracted_at: DateTime<Utc>,

    /// Normalized text of every page, in page order
    pub content: String,

    /// Page/table spans covering `content`
    pub segments: Vec<Segment>,

    /// Non-fatal problems found during extraction
    pub warnings: Vec<ExtractionWarning>,
}

/// Separator placed between pages and between a page and its tables
const SEGMENT_SEPARATOR: &str = "\n\n";

impl LoadedDocument {
    /// Assemble a document from its pages
    ///
    /// Pages are normalized and concatenated; each page text and table block
    /// becomes one segment. Segments are contiguous: a separator belongs to
    /// the segment before it.
    pub fn from_pages(
        path: impl Into<PathBuf>,
        file_type: FileType,
        fingerprint: impl Into<String>,
        pages: Vec<PageContent>,
    ) -> Self {
        let page_count = pages.len() as u32;
        let mut content = String::new();
        let mut segments: Vec<Segment> = Vec::new();

        for page in pages {
            let pieces = std::iter::once((ContentKind::Text, page.text))
                .chain(page.tables.into_iter().map(|t| (ContentKind::Table, t)));

            for (kind, raw) in pieces {
                let text = normalize_text(&raw);
                if text.is_empty() {
                    continue;
                }
                if let Some(last) = segments.last_mut() {
                    content.push_str(SEGMENT_SEPARATOR);
                    last.end = content.len();
                }
                let start = content.len();
                content.push_str(&text);
                segments.push(Segment {
                    page: Some(page.number),
                    kind,
                    start,
                    end: content.len(),
                });
            }
        }

        Self {
            path: path.into(),
            file_type,
            fingerprint: fingerprint.into(),
            page_count,
            extracted_at: Utc::now(),
            content,
            segments,
            warnings: Vec::new(),
        }
    }

    /// Attach extraction warnings
    pub fn with_warnings(mut self, warnings: Vec<ExtractionWarning>) -> Self {
        self.warnings = warnings;
        self
    }

    /// Provenance of the content at a byte offset
    pub fn provenance_at(&self, offset: usize) -> Provenance {
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

    /// Get total character count
    pub fn char_count(&self) -> usize {
        self.content.chars().count()
    }

    /// Whether nothing was extracted
    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }
}

/// Normalize extracted text
///
/// Unifies line endings, drops form feeds and trailing whitespace, and
/// collapses runs of blank lines into a single paragraph break.
pub fn normalize_text(raw: &str) -> String {
    let unified = raw.replace("\r\n", "\n").replace('\r', "\n").replace('\x0C', "\n");

    let mut out = String::with_capacity(unified.len());
    let mut blank_run = 0usize;
    for line in unified.lines() {
        let line = line.trim_end();
        if line.is_empty() {
            blank_run += 1;
            continue;
        }
        if !out.is_empty() {
            out.push_str(if blank_run > 0 { "\n\n" } else { "\n" });
        }
        blank_run = 0;
        out.push_str(line);
    }

    out
}

/// SHA-256 of a byte buffer (hex)
pub fn fingerprint_bytes(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// SHA-256 of a file's contents (hex), streamed
pub fn fingerprint_file(path: &Path) -> Result<String> {
    let io_err = |e: std::io::Error| ParserError::IoError {
        path: path.display().to_string(),
        source: e,
    };

    let mut file = std::fs::File::open(path).map_err(io_err)?;
    let mut hasher = Sha256::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf).map_err(io_err)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(format!("{:x}", hasher.finalize()))
}

// ============================================================================
// Loader Trait
// ============================================================================

/// Trait for document loaders
pub trait DocumentLoader: Send + Sync {
    /// Load and normalize a document from a file path
    fn load(&self, path: &Path) -> Result<LoadedDocument>;

    /// Get supported file types
    fn supported_types(&self) -> &[FileType];

    /// Check if this loader can handle a file type
    fn can_load(&self, file_type: FileType) -> bool {
        self.supported_types().contains(&file_type)
    }
}

// ============================================================================
// Loader Registry
// ============================================================================

/// Registry of available loaders
pub struct LoaderRegistry {
    loaders: Vec<Box<dyn DocumentLoader>>,
}

impl LoaderRegistry {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self {
            loaders: Vec::new(),
        }
    }

    /// Registry with the PDF and plain text loaders
    pub fn with_defaults(extract_tables: bool) -> Self {
        let mut registry = Self::new();
        registry.register(PdfLoader::new().with_table_extraction(extract_tables));
        registry.register(PlainTextLoader);
        registry
    }

    /// Register a loader
    pub fn register<L: DocumentLoader + 'static>(&mut self, loader: L) {
        self.loaders.push(Box::new(loader));
    }

    /// Find a loader for a file type
    pub fn find_loader(&self, file_type: FileType) -> Option<&dyn DocumentLoader> {
        self.loaders
            .iter()
            .find(|l| l.can_load(file_type))
            .map(|l| l.as_ref())
    }

    /// Load a file using the appropriate loader
    pub fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let file_type = FileType::from_path(path);

        if file_type == FileType::Unknown {
            return Err(ParserError::UnsupportedFormat(
                path.extension()
                    .and_then(|e| e.to_str())
                    .unwrap_or("none")
                    .to_string(),
            ));
        }

        let loader = self
            .find_loader(file_type)
            .ok_or_else(|| ParserError::UnsupportedFormat(file_type.to_string()))?;

        loader.load(path)
    }
}

impl Default for LoaderRegistry {
    fn default() -> Self {
        Self::with_defaults(true)
    }
}

// ============================================================================
// Plain Text Loader
// ============================================================================

/// Plain text and markdown loader (single page)
pub struct PlainTextLoader;

impl DocumentLoader for PlainTextLoader {
    fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let bytes = std::fs::read(path).map_err(|e| ParserError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        let fingerprint = fingerprint_bytes(&bytes);

        let text = String::from_utf8(bytes)
            .map_err(|e| ParserError::EncodingError(format!("{}: {e}", path.display())))?;

        let page = PageContent {
            number: 1,
            text,
            tables: Vec::new(),
        };

        Ok(LoadedDocument::from_pages(
            path,
            FileType::from_path(path),
            fingerprint,
            vec![page],
        ))
    }

    fn supported_types(&self) -> &[FileType] {
        &[FileType::PlainText, FileType::Markdown]
    }
}

// ============================================================================
// Tests
// ============================================================================
