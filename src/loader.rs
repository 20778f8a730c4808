use calamine::{Data, Reader, open_workbook_auto, open_workbook_auto_from_rs};
use std::fs;
use std::io::Cursor;
use std::path::Path;

use crate::error::{Result, TaggerError};

/// A header row plus string cells, as read from CSV or a workbook.
///
/// Every row has exactly `columns.len()` cells; short rows are padded with
/// empty strings and extra cells are dropped.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Table {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl Table {
    /// Build a table from a header and raw rows, normalising widths.
    ///
    /// Rows whose cells are all blank are skipped.
    pub fn new(columns: Vec<String>, raw_rows: Vec<Vec<String>>) -> Self {
        let columns: Vec<String> = columns.into_iter().map(|c| c.trim().to_string()).collect();
        let width = columns.len();
        let rows = raw_rows
            .into_iter()
            .filter(|row| row.iter().any(|cell| !cell.trim().is_empty()))
            .map(|mut row| {
                row.resize(width, String::new());
                row
            })
            .collect();
        Table { columns, rows }
    }

    /// Position of a column, matched case-insensitively and ignoring
    /// surrounding whitespace.
    pub fn find_column(&self, name: &str) -> Option<usize> {
        let wanted = name.trim().to_lowercase();
        self.columns
            .iter()
            .position(|c| c.trim().to_lowercase() == wanted)
    }

    /// Resolve each required column, failing with every missing name at once.
    pub fn require_columns(&self, table: &'static str, required: &[&str]) -> Result<Vec<usize>> {
        let mut found = Vec::with_capacity(required.len());
        let mut missing = Vec::new();
        for name in required {
            match self.find_column(name) {
                Some(idx) => found.push(idx),
                None => missing.push(name.to_string()),
            }
        }

        if missing.is_empty() {
            Ok(found)
        } else {
            Err(TaggerError::Validation {
                table,
                required: required.iter().map(|s| s.to_string()).collect(),
                missing,
                found: self.columns.clone(),
            })
        }
    }
}

/// Parse CSV text. The first record is the header.
///
/// Quoted fields may contain commas, newlines and doubled quotes. A quote
/// inside an unquoted field is kept as a literal character.
pub fn from_csv_str(name: &str, content: &str) -> Result<Table> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        records.push(record.iter().map(String::from).collect::<Vec<_>>());
    }

    if records.is_empty() {
        return Err(TaggerError::EmptyTable(name.to_string()));
    }
    let header = records.remove(0);
    Ok(Table::new(header, records))
}

/// Load a table from a CSV file on disk.
pub fn from_csv(filepath: impl AsRef<Path>) -> Result<Table> {
    let path = filepath.as_ref();
    let content = fs::read_to_string(path)?;
    from_csv_str(&path.display().to_string(), &content)
}

/// Load the first worksheet of an Excel/OpenDocument workbook on disk.
pub fn from_excel(filepath: impl AsRef<Path>) -> Result<Table> {
    let path = filepath.as_ref();
    let mut workbook = open_workbook_auto(path)?;
    first_sheet(&path.display().to_string(), &mut workbook)
}

/// Load the first worksheet of a workbook held in memory (an upload).
pub fn from_excel_bytes(name: &str, bytes: &[u8]) -> Result<Table> {
    let cursor = Cursor::new(bytes.to_vec());
    let mut workbook = open_workbook_auto_from_rs(cursor)?;
    first_sheet(name, &mut workbook)
}

fn first_sheet<RS>(name: &str, workbook: &mut calamine::Sheets<RS>) -> Result<Table>
where
    RS: std::io::Read + std::io::Seek,
{
    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| TaggerError::EmptyTable(name.to_string()))?;

    let range = workbook.worksheet_range(&sheet_name)?;
    let mut rows = range.rows();

    let header = rows
        .next()
        .ok_or_else(|| TaggerError::EmptyTable(name.to_string()))?
        .iter()
        .map(cell_to_string)
        .collect();
    let body = rows.map(|row| row.iter().map(cell_to_string).collect()).collect();

    Ok(Table::new(header, body))
}

fn cell_to_string(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        // Whole numbers come back as floats from most writers
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{:.0}", f),
        other => other.to_string(),
    }
}

/// Detect the file type by extension and load it.
pub fn load_table(filepath: impl AsRef<Path>) -> Result<Table> {
    let path = filepath.as_ref();
    match extension_of(&path.to_string_lossy()).as_deref() {
        Some("csv") => from_csv(path),
        Some("xlsx" | "xlsm" | "xls" | "ods") => from_excel(path),
        Some(ext) => Err(TaggerError::UnsupportedFormat(ext.to_string())),
        None => Err(TaggerError::UnsupportedFormat(format!(
            "{} has no extension",
            path.display()
        ))),
    }
}

/// Load an uploaded file from memory, choosing the parser from its name.
pub fn load_table_bytes(name: &str, bytes: &[u8]) -> Result<Table> {
    match extension_of(name).as_deref() {
        Some("csv") => {
            let content = String::from_utf8_lossy(bytes);
            from_csv_str(name, &content)
        }
        Some("xlsx" | "xlsm" | "xls" | "ods") => from_excel_bytes(name, bytes),
        Some(ext) => Err(TaggerError::UnsupportedFormat(ext.to_string())),
        None => Err(TaggerError::UnsupportedFormat(format!("{} has no extension", name))),
    }
}

fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_lowercase())
}
