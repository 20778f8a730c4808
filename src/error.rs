use std::path::PathBuf;
use thiserror::Error;

use crate::mapping::TagField;

/// Every failure the tagger can report.
///
/// None of these abort an interactive session; callers surface them as a
/// message and keep the previous state. The only fatal case is
/// [`TaggerError::MissingHierarchy`] at startup.
#[derive(Debug, Error)]
pub enum TaggerError {
    /// A required column is absent from an uploaded table.
    #[error("{table} file must contain columns: {}. Missing: {}. Found columns: {}",
        .required.join(", "), .missing.join(", "), .found.join(", "))]
    Validation {
        table: &'static str,
        required: Vec<String>,
        missing: Vec<String>,
        found: Vec<String>,
    },

    /// A topic or subtopic that is not a child of the mapping's current parent.
    #[error("'{value}' is not a valid {field} under '{parent}'")]
    InvalidSelection {
        field: TagField,
        value: String,
        parent: String,
    },

    #[error("no question with id {0}")]
    UnknownQuestion(usize),

    #[error("question {question_id} has {len} mapping(s); index {index} is out of range")]
    Bounds {
        question_id: usize,
        index: usize,
        len: usize,
    },

    #[error("session artifact is unreadable: {0}")]
    DurabilityRead(String),

    #[error("failed to write session artifact: {0}")]
    DurabilityWrite(#[source] std::io::Error),

    #[error("no hierarchy table found (tried {})", .tried.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", "))]
    MissingHierarchy { tried: Vec<PathBuf> },

    #[error("{0} has no header row")]
    EmptyTable(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("unsupported file type: {0}")]
    UnsupportedFormat(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("spreadsheet error: {0}")]
    Spreadsheet(#[from] calamine::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("xlsx export error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("snapshot encoding error: {0}")]
    Snapshot(#[from] bincode::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, TaggerError>;

impl TaggerError {
    /// Errors caused by what the user asked for, as opposed to I/O trouble.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TaggerError::Validation { .. }
                | TaggerError::InvalidSelection { .. }
                | TaggerError::UnknownQuestion(_)
                | TaggerError::Bounds { .. }
                | TaggerError::EmptyTable(_)
                | TaggerError::InvalidInput(_)
                | TaggerError::UnsupportedFormat(_)
                | TaggerError::Csv(_)
        )
    }
}
