//! Best-effort table detection on extracted page text
//!
//! PDF text extraction flattens tables into lines whose cells are separated
//! by runs of spaces or tabs. Consecutive lines with the same number of such
//! columns are treated as a table and rendered as Markdown. Regions that look
//! tabular but have ragged rows are skipped with a warning; detection never
//! fails a page.

/// Minimum number of consecutive column-aligned lines forming a table
const MIN_TABLE_ROWS: usize = 2;

/// Minimum number of columns per row
const MIN_TABLE_COLUMNS: usize = 2;

/// A non-fatal problem found while extracting a page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractionWarning {
    /// 1-based page number
    pub page: u32,

    /// Human-readable description
    pub message: String,
}

impl std::fmt::Display for ExtractionWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "page {}: {}", self.page, self.message)
    }
}

/// A table extracted from a document
#[derive(Debug, Clone, Default)]
pub struct Table {
    /// Column headers
    pub headers: Vec<String>,

    /// Table rows
    pub rows: Vec<Vec<String>>,

    /// Page number where table appears
    pub page: Option<u32>,
}

impl Table {
    /// Create a new table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add headers
    pub fn with_headers(mut self, headers: Vec<String>) -> Self {
        self.headers = headers;
        self
    }

    /// Set the page
    pub fn with_page(mut self, page: u32) -> Self {
        self.page = Some(page);
        self
    }

    /// Add a row
    pub fn add_row(&mut self, row: Vec<String>) {
        self.rows.push(row);
    }

    /// Get number of columns
    pub fn num_columns(&self) -> usize {
        self.headers
            .len()
            .max(self.rows.first().map(|r| r.len()).unwrap_or(0))
    }

    /// Get number of rows
    pub fn num_rows(&self) -> usize {
        self.rows.len()
    }

    /// Convert to markdown format
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();

        if !self.headers.is_empty() {
            push_markdown_row(&mut md, &self.headers);

            md.push('|');
            for _ in &self.headers {
                md.push_str(" --- |");
            }
            md.push('\n');
        }

        for row in &self.rows {
            push_markdown_row(&mut md, row);
        }

        md
    }
}

fn push_markdown_row(md: &mut String, cells: &[String]) {
    md.push('|');
    for cell in cells {
        md.push(' ');
        md.push_str(&cell.replace('|', "\\|"));
        md.push_str(" |");
    }
    md.push('\n');
}

/// Tables found on one page plus any degradation warnings
#[derive(Debug, Clone, Default)]
pub struct TableExtraction {
    pub tables: Vec<Table>,
    pub warnings: Vec<ExtractionWarning>,
}

impl TableExtraction {
    /// Markdown blocks in page order
    pub fn markdown_blocks(&self) -> Vec<String> {
        self.tables.iter().map(Table::to_markdown).collect()
    }
}

/// Detect tables in the text of one page
pub fn extract_tables(page_text: &str, page: u32) -> TableExtraction {
    let mut extraction = TableExtraction::default();
    let mut region: Vec<Vec<String>> = Vec::new();

    for line in page_text.lines() {
        let cells = split_columns(line);
        if cells.len() >= MIN_TABLE_COLUMNS {
            region.push(cells);
        } else {
            close_region(&mut region, page, &mut extraction);
        }
    }
    close_region(&mut region, page, &mut extraction);

    extraction
}

fn close_region(region: &mut Vec<Vec<String>>, page: u32, extraction: &mut TableExtraction) {
    if region.len() < MIN_TABLE_ROWS {
        region.clear();
        return;
    }

    let rows = std::mem::take(region);
    let columns = rows[0].len();
    if rows.iter().any(|r| r.len() != columns) {
        extraction.warnings.push(ExtractionWarning {
            page,
            message: format!(
                "skipped table-like region of {} rows with inconsistent column counts",
                rows.len()
            ),
        });
        return;
    }

    let mut rows = rows.into_iter();
    let headers = rows.next().unwrap_or_default();
    let mut table = Table::new().with_headers(headers).with_page(page);
    for row in rows {
        table.add_row(row);
    }
    extraction.tables.push(table);
}

/// Split a line on tabs or runs of two or more spaces
fn split_columns(line: &str) -> Vec<String> {
    let mut cells = Vec::new();
    let mut current = String::new();
    let mut spaces = 0usize;

    for ch in line.trim().chars() {
        match ch {
            '\t' => {
                flush_cell(&mut cells, &mut current);
                spaces = 0;
            }
            ' ' => spaces += 1,
            _ => {
                if spaces >= 2 {
                    flush_cell(&mut cells, &mut current);
                } else if spaces == 1 {
                    current.push(' ');
                }
                spaces = 0;
                current.push(ch);
            }
        }
    }
    flush_cell(&mut cells, &mut current);

    cells
}

fn flush_cell(cells: &mut Vec<String>, current: &mut String) {
    let cell = current.trim();
    if !cell.is_empty() {
        cells.push(cell.to_string());
    }
    current.clear();
}
