use rust_xlsxwriter::{Format, Workbook, Worksheet};

use crate::error::{Result, TaggerError};
use crate::hierarchy::{SUBJECT, SUBTOPIC, TOPIC};
use crate::mapping::Mapping;
use crate::state::SessionState;

pub const EXPORT_FILE_NAME: &str = "tagged_questions.xlsx";
pub const EXPORT_SHEET_NAME: &str = "Tagged Questions";
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

/// Flattened export: one row per (question, mapping) pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Flatten the session into export rows.
///
/// A question with no mappings still produces one row with blank tags.
/// Columns are the uploaded question columns followed by Subject, Topic
/// and Subtopic.
pub fn export_rows(state: &SessionState) -> ExportTable {
    let mut columns = state
        .store
        .as_ref()
        .map(|store| store.columns.clone())
        .unwrap_or_default();
    columns.extend([SUBJECT, TOPIC, SUBTOPIC].map(String::from));

    let blank = [Mapping::default()];
    let mut rows = Vec::new();
    for (question, mappings) in state.questions().iter().zip(&state.mappings) {
        let mappings: &[Mapping] = if mappings.is_empty() { &blank } else { mappings };
        for mapping in mappings {
            let mut row = question.values.clone();
            row.extend(
                [&mapping.subject, &mapping.topic, &mapping.subtopic]
                    .map(|v| v.clone().unwrap_or_default()),
            );
            rows.push(row);
        }
    }

    ExportTable { columns, rows }
}

/// Convert the tagged session to XLSX bytes.
pub fn to_xlsx(state: &SessionState) -> Result<Vec<u8>> {
    let table = export_rows(state);

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name(EXPORT_SHEET_NAME)?;

    let header = Format::new().set_bold();
    for (c, name) in table.columns.iter().enumerate() {
        worksheet.write_string_with_format(0, c as u16, name, &header)?;
    }

    for (r, row) in table.rows.iter().enumerate() {
        for (c, value) in row.iter().enumerate() {
            if !value.is_empty() {
                worksheet.write_string((r + 1) as u32, c as u16, value)?;
            }
        }
    }

    workbook.push_worksheet(worksheet);

    let buffer = workbook.save_to_buffer()?;
    Ok(buffer)
}

/// Convert the tagged session to CSV text.
///
/// Fields containing the delimiter, quotes or line breaks are quoted.
pub fn to_csv(state: &SessionState) -> Result<String> {
    let table = export_rows(state);
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(Vec::new());

    writer.write_record(&table.columns)?;
    for row in &table.rows {
        writer.write_record(row)?;
    }

    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    String::from_utf8(bytes).map_err(|e| TaggerError::InvalidInput(e.to_string()))
}
