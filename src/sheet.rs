//! Spreadsheet input and CSV output.
//!
//! Workbooks (`.xlsx`, `.xlsm`, `.xls`, `.xlsb`, `.ods`) are read with
//! calamine, `.csv` with the csv crate. Both land in the same `Table` of
//! loosely typed cells: the first row is the header, everything below is data.

use std::fmt;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};

use calamine::{open_workbook_auto, Data, Reader};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SheetError {
    #[error("failed to access {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("workbook error: {0}")]
    Workbook(#[from] calamine::Error),
    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),
    #[error("unsupported spreadsheet format: {0}")]
    UnsupportedFormat(PathBuf),
    #[error("workbook has no worksheets: {0}")]
    NoWorksheet(PathBuf),
    #[error("column not found: {0}")]
    MissingColumn(String),
}

// =============================================================================
// CELLS AND TABLES
// =============================================================================

#[derive(Debug, Clone, PartialEq, Default)]
pub enum Cell {
    #[default]
    Empty,
    Text(String),
    Number(f64),
}

impl Cell {
    /// Blank text counts as empty.
    pub fn is_empty(&self) -> bool {
        match self {
            Cell::Empty => true,
            Cell::Text(t) => t.trim().is_empty(),
            Cell::Number(_) => false,
        }
    }

    /// Numeric value, parsing text cells. `nan` and `inf` text is not a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Empty => None,
            Cell::Text(t) => t.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Cell::Number(n) => Some(*n),
        }
    }

    /// Trimmed text, `None` for empty cells. Integral numbers drop the
    /// fractional part so `7.0` reads as `"7"`.
    pub fn as_text(&self) -> Option<String> {
        if self.is_empty() {
            return None;
        }
        Some(self.to_string().trim().to_string())
    }
}

impl fmt::Display for Cell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Cell::Empty => Ok(()),
            Cell::Text(t) => f.write_str(t),
            Cell::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Cell::Number(n) => write!(f, "{n}"),
        }
    }
}

impl From<&Data> for Cell {
    fn from(data: &Data) -> Self {
        match data {
            Data::Empty => Cell::Empty,
            Data::String(s) => Cell::Text(s.clone()),
            Data::Float(f) => Cell::Number(*f),
            Data::Int(i) => Cell::Number(*i as f64),
            Data::Bool(b) => Cell::Text(b.to_string()),
            Data::DateTime(dt) => Cell::Number(dt.as_f64()),
            Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::Text(s.clone()),
            Data::Error(e) => Cell::Text(format!("#ERR:{e:?}")),
        }
    }
}

/// Header row plus data rows.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl Table {
    /// First column whose trimmed header equals `name`.
    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.headers.iter().position(|h| h.trim() == name.trim())
    }

    /// Cell at `(row, col)`; short rows read as empty.
    pub fn cell(&self, row: usize, col: usize) -> &Cell {
        static EMPTY: Cell = Cell::Empty;
        self.rows
            .get(row)
            .and_then(|r| r.get(col))
            .unwrap_or(&EMPTY)
    }

    /// Every cell of a named column, top to bottom.
    pub fn column(&self, name: &str) -> Result<Vec<&Cell>, SheetError> {
        let col = self
            .column_index(name)
            .ok_or_else(|| SheetError::MissingColumn(name.to_string()))?;
        Ok((0..self.rows.len()).map(|row| self.cell(row, col)).collect())
    }
}

// =============================================================================
// READING
// =============================================================================

/// Read the first worksheet of a workbook, or a CSV file.
pub fn read_table(path: &Path) -> Result<Table, SheetError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();

    match ext.as_str() {
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => read_workbook(path),
        "csv" => {
            let file = File::open(path).map_err(|source| SheetError::Io {
                path: path.to_path_buf(),
                source,
            })?;
            parse_csv(file)
        }
        _ => Err(SheetError::UnsupportedFormat(path.to_path_buf())),
    }
}

fn read_workbook(path: &Path) -> Result<Table, SheetError> {
    let mut workbook = open_workbook_auto(path)?;
    let first = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| SheetError::NoWorksheet(path.to_path_buf()))?;
    let range = workbook.worksheet_range(&first)?;

    let mut rows = range.rows();
    let headers = rows
        .next()
        .map(|r| r.iter().map(|c| Cell::from(c).to_string()).collect())
        .unwrap_or_default();
    let rows = rows
        .map(|r| r.iter().map(Cell::from).collect::<Vec<_>>())
        .filter(|r| !r.iter().all(Cell::is_empty))
        .collect();

    Ok(Table { headers, rows })
}

/// Parse CSV with a header row. Every non-blank field becomes `Cell::Text`.
pub fn parse_csv<R: Read>(reader: R) -> Result<Table, SheetError> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(reader);

    let headers = reader.headers()?.iter().map(str::to_string).collect();
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row: Vec<Cell> = record
            .iter()
            .map(|field| {
                if field.trim().is_empty() {
                    Cell::Empty
                } else {
                    Cell::Text(field.to_string())
                }
            })
            .collect();
        if !row.iter().all(Cell::is_empty) {
            rows.push(row);
        }
    }

    Ok(Table { headers, rows })
}

// =============================================================================
// SUBJECTS
// =============================================================================

/// One spreadsheet row to classify.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Subject {
    pub id: String,
    pub history: Option<String>,
}

/// Extract subjects from a table. Rows without an id are dropped; a missing
/// history column means no subject has history.
pub fn read_subjects(
    table: &Table,
    id_column: &str,
    history_column: &str,
) -> Result<Vec<Subject>, SheetError> {
    let id_col = table
        .column_index(id_column)
        .ok_or_else(|| SheetError::MissingColumn(id_column.to_string()))?;
    let history_col = table.column_index(history_column);

    Ok((0..table.rows.len())
        .filter_map(|row| {
            let id = table.cell(row, id_col).as_text()?;
            let history = history_col.and_then(|col| table.cell(row, col).as_text());
            Some(Subject { id, history })
        })
        .collect())
}

// =============================================================================
// WRITING
// =============================================================================

/// One output row as ordered column/value pairs.
pub type Record = Vec<(String, String)>;

/// Write records as CSV in one pass. The header is the union of all keys in
/// first-seen order; absent keys are written as empty fields.
pub fn write_records(path: &Path, records: &[Record]) -> Result<(), SheetError> {
    let mut headers: Vec<&str> = Vec::new();
    for record in records {
        for (key, _) in record {
            if !headers.contains(&key.as_str()) {
                headers.push(key);
            }
        }
    }

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| SheetError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }

    let mut writer = csv::Writer::from_path(path)?;
    if !headers.is_empty() {
        writer.write_record(&headers)?;
    }
    for record in records {
        let row = headers.iter().map(|h| {
            record
                .iter()
                .find(|(k, _)| k.as_str() == *h)
                .map(|(_, v)| v.as_str())
                .unwrap_or("")
        });
        writer.write_record(row)?;
    }
    writer.flush().map_err(|source| SheetError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    Ok(())
}
