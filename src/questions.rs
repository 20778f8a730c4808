use serde::{Deserialize, Serialize};

use crate::error::{Result, TaggerError};
use crate::loader::{self, Table};

pub const QUESTION: &str = "Question";
pub const ANSWER: &str = "Answer";

/// One uploaded row. `values` lines up with [`QuestionStore::columns`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    /// 1-based row position in the uploaded file
    pub id: usize,
    pub values: Vec<String>,
}

/// The uploaded question set, immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionStore {
    pub source_name: String,
    pub columns: Vec<String>,
    /// Header spelling actually used for the question text
    pub question_col: String,
    pub answer_col: String,
    pub questions: Vec<Question>,
}

impl QuestionStore {
    /// Parse an uploaded questions file.
    ///
    /// Requires `Question` and `Answer` columns (matched case-insensitively);
    /// all other columns are kept and echoed on export.
    pub fn load(source_name: &str, bytes: &[u8]) -> Result<Self> {
        let table = loader::load_table_bytes(source_name, bytes)?;
        Self::from_table(source_name, table)
    }

    pub fn from_table(source_name: &str, table: Table) -> Result<Self> {
        let idx = table.require_columns("Questions", &[QUESTION, ANSWER])?;
        let question_col = table.columns[idx[0]].clone();
        let answer_col = table.columns[idx[1]].clone();

        let questions = table
            .rows
            .into_iter()
            .enumerate()
            .map(|(pos, values)| Question { id: pos + 1, values })
            .collect();

        Ok(QuestionStore {
            source_name: source_name.to_string(),
            columns: table.columns,
            question_col,
            answer_col,
            questions,
        })
    }

    pub fn len(&self) -> usize {
        self.questions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.questions.is_empty()
    }

    pub fn get(&self, id: usize) -> Result<&Question> {
        id.checked_sub(1)
            .and_then(|pos| self.questions.get(pos))
            .ok_or(TaggerError::UnknownQuestion(id))
    }

    /// Value of a named column for a question, or "" if the column is absent.
    pub fn field<'a>(&self, question: &'a Question, column: &str) -> &'a str {
        self.columns
            .iter()
            .position(|c| c == column)
            .and_then(|idx| question.values.get(idx))
            .map(String::as_str)
            .unwrap_or("")
    }

    pub fn text<'a>(&self, question: &'a Question) -> &'a str {
        self.field(question, &self.question_col)
    }

    pub fn answer<'a>(&self, question: &'a Question) -> &'a str {
        self.field(question, &self.answer_col)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_follow_row_order_and_extra_columns_survive() {
        let store = QuestionStore::load(
            "Questions.csv",
            b"Difficulty,question,Answer\nhard,Solve x+1=2,1\neasy,2+2,4\neasy,2+2,4\n",
        )
        .unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.columns, vec!["Difficulty", "question", "Answer"]);
        assert_eq!(store.question_col, "question");
        let first = store.get(1).unwrap();
        assert_eq!(store.text(first), "Solve x+1=2");
        assert_eq!(store.answer(first), "1");
        assert_eq!(store.field(first, "Difficulty"), "hard");
        // no deduplication
        assert_eq!(store.get(2).unwrap().values, store.get(3).unwrap().values);
    }

    #[test]
    fn unknown_ids_are_errors() {
        let store = QuestionStore::load("q.csv", b"Question,Answer\na,b\n").unwrap();
        assert!(matches!(store.get(0), Err(TaggerError::UnknownQuestion(0))));
        assert!(matches!(store.get(2), Err(TaggerError::UnknownQuestion(2))));
    }

    #[test]
    fn missing_answer_column_is_a_validation_error() {
        let err = QuestionStore::load("q.csv", b"Question,Notes\na,b\n").unwrap_err();
        match err {
            TaggerError::Validation { missing, .. } => assert_eq!(missing, vec!["Answer"]),
            other => panic!("expected validation error, got {:?}", other),
        }
    }
}
