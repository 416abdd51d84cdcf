//! PDF document loader using pdf-extract
//!
//! Extracts text page by page and optionally runs table detection on each
//! page. Malformed files surface as errors; pdf-extract panics on some
//! malformed inputs, so extraction is isolated with `catch_unwind`.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::Path;

use tracing::{debug, warn};

use crate::table::extract_tables;
use crate::{
    fingerprint_bytes, DocumentLoader, FileType, LoadedDocument, PageContent, ParserError, Result,
};

/// Magic bytes every PDF starts with
const PDF_HEADER: &[u8] = b"%PDF-";

/// PDF document loader
pub struct PdfLoader {
    /// Whether to detect tables in page text
    pub extract_tables: bool,
}

impl PdfLoader {
    /// Create a new PDF loader with table detection enabled
    pub fn new() -> Self {
        Self {
            extract_tables: true,
        }
    }

    /// Enable or disable table detection
    pub fn with_table_extraction(mut self, enabled: bool) -> Self {
        self.extract_tables = enabled;
        self
    }

    /// Extract the text of every page from PDF bytes
    fn extract_pages(&self, path: &Path, bytes: &[u8]) -> Result<Vec<String>> {
        if !bytes.starts_with(PDF_HEADER) {
            return Err(ParserError::CorruptedFile(format!(
                "{}: missing PDF header",
                path.display()
            )));
        }

        match catch_unwind(AssertUnwindSafe(|| {
            pdf_extract::extract_text_from_mem_by_pages(bytes)
        })) {
            Ok(Ok(pages)) => Ok(pages),
            Ok(Err(e)) => Err(ParserError::PdfError(format!("{}: {e}", path.display()))),
            Err(_) => Err(ParserError::PdfError(format!(
                "{}: extractor aborted on malformed content",
                path.display()
            ))),
        }
    }
}

impl Default for PdfLoader {
    fn default() -> Self {
        Self::new()
    }
}

impl DocumentLoader for PdfLoader {
    fn load(&self, path: &Path) -> Result<LoadedDocument> {
        let bytes = std::fs::read(path).map_err(|e| ParserError::IoError {
            path: path.display().to_string(),
            source: e,
        })?;
        let fingerprint = fingerprint_bytes(&bytes);
        let raw_pages = self.extract_pages(path, &bytes)?;

        let mut warnings = Vec::new();
        let mut pages = Vec::with_capacity(raw_pages.len());
        for (i, text) in raw_pages.into_iter().enumerate() {
            let number = i as u32 + 1;
            let tables = if self.extract_tables {
                let extraction = extract_tables(&text, number);
                for warning in &extraction.warnings {
                    warn!(path = %path.display(), "{warning}");
                }
                warnings.extend(extraction.warnings.iter().cloned());
                extraction.markdown_blocks()
            } else {
                Vec::new()
            };
            pages.push(PageContent {
                number,
                text,
                tables,
            });
        }

        let doc = LoadedDocument::from_pages(path, FileType::Pdf, fingerprint, pages)
            .with_warnings(warnings);

        if doc.is_empty() {
            warn!(path = %path.display(), pages = doc.page_count, "No text extracted from PDF");
        } else {
            debug!(
                path = %path.display(),
                pages = doc.page_count,
                chars = doc.char_count(),
                "Extracted PDF text"
            );
        }

        Ok(doc)
    }

    fn supported_types(&self) -> &[FileType] {
        &[FileType::Pdf]
    }
}
