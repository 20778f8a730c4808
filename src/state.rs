use chrono::{DateTime, Utc};

use crate::error::{Result, TaggerError};
use crate::hierarchy::Hierarchy;
use crate::mapping::{Mapping, TagField};
use crate::questions::{Question, QuestionStore};

/// Everything that survives a restart: the question set, each question's
/// mappings, and when it was last persisted.
///
/// `mappings[i]` belongs to the question with id `i + 1`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionState {
    pub store: Option<QuestionStore>,
    pub mappings: Vec<Vec<Mapping>>,
    pub last_saved: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start a fresh session over an uploaded question set.
    pub fn with_questions(store: QuestionStore) -> Self {
        let mappings = vec![Vec::new(); store.len()];
        SessionState {
            store: Some(store),
            mappings,
            last_saved: None,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.store.is_none()
    }

    pub fn questions(&self) -> &[Question] {
        self.store
            .as_ref()
            .map(|s| s.questions.as_slice())
            .unwrap_or(&[])
    }

    pub fn mappings(&self, question_id: usize) -> Result<&[Mapping]> {
        let pos = self.position(question_id)?;
        Ok(&self.mappings[pos])
    }

    fn position(&self, question_id: usize) -> Result<usize> {
        let len = self.store.as_ref().map_or(0, QuestionStore::len);
        match question_id.checked_sub(1) {
            Some(pos) if pos < len && pos < self.mappings.len() => Ok(pos),
            _ => Err(TaggerError::UnknownQuestion(question_id)),
        }
    }

    fn mapping_mut(&mut self, question_id: usize, index: usize) -> Result<&mut Mapping> {
        let pos = self.position(question_id)?;
        let list = &mut self.mappings[pos];
        let len = list.len();
        list.get_mut(index).ok_or(TaggerError::Bounds {
            question_id,
            index,
            len,
        })
    }

    /// Append an empty mapping; returns its index.
    pub fn add_mapping(&mut self, question_id: usize) -> Result<usize> {
        let pos = self.position(question_id)?;
        self.mappings[pos].push(Mapping::default());
        Ok(self.mappings[pos].len() - 1)
    }

    /// Remove the mapping at `index`, shifting later ones down.
    pub fn remove_mapping(&mut self, question_id: usize, index: usize) -> Result<Mapping> {
        let pos = self.position(question_id)?;
        let list = &mut self.mappings[pos];
        if index >= list.len() {
            return Err(TaggerError::Bounds {
                question_id,
                index,
                len: list.len(),
            });
        }
        Ok(list.remove(index))
    }

    pub fn set_field(
        &mut self,
        hierarchy: &Hierarchy,
        question_id: usize,
        index: usize,
        field: TagField,
        value: &str,
    ) -> Result<&Mapping> {
        let mapping = self.mapping_mut(question_id, index)?;
        mapping.set(hierarchy, field, value)?;
        Ok(mapping)
    }

    /// Drop mapping values the hierarchy no longer contains.
    ///
    /// Returns the number of mappings that changed.
    pub fn repair(&mut self, hierarchy: &Hierarchy) -> usize {
        self.mappings
            .iter_mut()
            .flatten()
            .map(|m| m.repair(hierarchy))
            .filter(|changed| *changed)
            .count()
    }

    /// `(tagged, total)`: a question counts as tagged once any of its
    /// mappings is complete.
    pub fn progress(&self) -> (usize, usize) {
        let tagged = self
            .mappings
            .iter()
            .filter(|list| list.iter().any(Mapping::is_complete))
            .count();
        (tagged, self.questions().len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn hierarchy() -> Hierarchy {
        Hierarchy::from_entries([
            ("Math", "Algebra", "Linear Equations"),
            ("Math", "Algebra", "Quadratics"),
            ("Science", "Physics", "Kinematics"),
        ])
    }

    fn state() -> SessionState {
        let store =
            QuestionStore::load("q.csv", b"Question,Answer\nSolve x+1=2,1\nWhat is g?,9.8\n")
                .unwrap();
        SessionState::with_questions(store)
    }

    #[test]
    fn add_and_remove_preserve_order() {
        let h = hierarchy();
        let mut s = state();
        for subject in ["Math", "Science", "Math"] {
            let idx = s.add_mapping(1).unwrap();
            s.set_field(&h, 1, idx, TagField::Subject, subject).unwrap();
        }

        let removed = s.remove_mapping(1, 1).unwrap();
        assert_eq!(removed.subject.as_deref(), Some("Science"));
        let subjects: Vec<_> = s.mappings(1).unwrap().iter().map(|m| m.subject.clone()).collect();
        assert_eq!(subjects, vec![Some("Math".to_string()), Some("Math".to_string())]);
    }

    #[test]
    fn out_of_range_removal_is_a_bounds_error() {
        let mut s = state();
        s.add_mapping(2).unwrap();
        let err = s.remove_mapping(2, 1).unwrap_err();
        assert!(matches!(
            err,
            TaggerError::Bounds { question_id: 2, index: 1, len: 1 }
        ));
        assert_eq!(s.mappings(2).unwrap().len(), 1);
    }

    #[test]
    fn unknown_question_is_rejected() {
        let mut s = state();
        assert!(matches!(s.add_mapping(3), Err(TaggerError::UnknownQuestion(3))));
        assert!(matches!(SessionState::new().add_mapping(1), Err(TaggerError::UnknownQuestion(1))));
    }

    #[test]
    fn scenario_cascade_after_full_tagging() {
        let h = hierarchy();
        let mut s = state();
        s.add_mapping(1).unwrap();
        s.set_field(&h, 1, 0, TagField::Subject, "Math").unwrap();
        s.set_field(&h, 1, 0, TagField::Topic, "Algebra").unwrap();
        s.set_field(&h, 1, 0, TagField::Subtopic, "Linear Equations").unwrap();
        assert_eq!(s.progress(), (1, 2));

        let m = s.set_field(&h, 1, 0, TagField::Subject, "Science").unwrap();
        assert_eq!(m, &Mapping::new("Science", "", ""));
        assert_eq!(s.progress(), (0, 2));
    }

    #[test]
    fn repair_counts_changed_mappings() {
        let mut s = state();
        s.mappings[0].push(Mapping::new("Math", "Algebra", "Quadratics"));
        s.mappings[0].push(Mapping::new("Math", "Calculus", "Limits"));
        s.mappings[1].push(Mapping::new("History", "", ""));
        assert_eq!(s.repair(&hierarchy()), 2);
        assert_eq!(s.mappings[0][1], Mapping::new("Math", "", ""));
    }
}
