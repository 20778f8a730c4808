//! Subject → Topic → Subtopic reference tree used to constrain tag choices.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use crate::error::{Result, TaggerError};
use crate::loader::{self, Table};

pub const SUBJECT: &str = "Subject";
pub const TOPIC: &str = "Topic";
pub const SUBTOPIC: &str = "Subtopic";

/// Deduplicated reference tree. Read-only once loaded.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Hierarchy {
    tree: BTreeMap<String, BTreeMap<String, BTreeSet<String>>>,
    combinations: usize,
}

impl Hierarchy {
    /// Load a hierarchy table (CSV or workbook) from disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let table = loader::load_table(path)?;
        Self::from_table(&table)
    }

    /// Load from the first of `candidates` that exists.
    pub fn load_first(candidates: &[PathBuf]) -> Result<(Self, PathBuf)> {
        let path = candidates
            .iter()
            .find(|p| p.is_file())
            .ok_or_else(|| TaggerError::MissingHierarchy {
                tried: candidates.to_vec(),
            })?;
        Ok((Self::load(path)?, path.clone()))
    }

    /// Build the tree from a table with Subject, Topic and Subtopic columns.
    pub fn from_table(table: &Table) -> Result<Self> {
        let idx = table.require_columns("Subjects", &[SUBJECT, TOPIC, SUBTOPIC])?;
        let mut hierarchy = Hierarchy::default();
        for row in &table.rows {
            hierarchy.insert(&row[idx[0]], &row[idx[1]], &row[idx[2]]);
        }
        Ok(hierarchy)
    }

    /// Build from literal triples.
    pub fn from_entries<'a, I>(entries: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, &'a str, &'a str)>,
    {
        let mut hierarchy = Hierarchy::default();
        for (subject, topic, subtopic) in entries {
            hierarchy.insert(subject, topic, subtopic);
        }
        hierarchy
    }

    fn insert(&mut self, subject: &str, topic: &str, subtopic: &str) {
        let (subject, topic, subtopic) = (subject.trim(), topic.trim(), subtopic.trim());
        if subject.is_empty() {
            return;
        }
        let topics = self.tree.entry(subject.to_string()).or_default();
        if topic.is_empty() {
            return;
        }
        let subtopics = topics.entry(topic.to_string()).or_default();
        if !subtopic.is_empty() && subtopics.insert(subtopic.to_string()) {
            self.combinations += 1;
        }
    }

    pub fn subjects(&self) -> Vec<&str> {
        self.tree.keys().map(String::as_str).collect()
    }

    /// Topics under `subject`; empty for an unknown subject.
    pub fn topics_for(&self, subject: &str) -> BTreeSet<&str> {
        self.tree
            .get(subject)
            .map(|topics| topics.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Subtopics under `(subject, topic)`; empty for unknown keys.
    pub fn subtopics_for(&self, subject: &str, topic: &str) -> BTreeSet<&str> {
        self.tree
            .get(subject)
            .and_then(|topics| topics.get(topic))
            .map(|subtopics| subtopics.iter().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn has_subject(&self, subject: &str) -> bool {
        self.tree.contains_key(subject)
    }

    pub fn has_topic(&self, subject: &str, topic: &str) -> bool {
        self.tree
            .get(subject)
            .is_some_and(|topics| topics.contains_key(topic))
    }

    pub fn has_subtopic(&self, subject: &str, topic: &str, subtopic: &str) -> bool {
        self.tree
            .get(subject)
            .and_then(|topics| topics.get(topic))
            .is_some_and(|subtopics| subtopics.contains(subtopic))
    }

    /// Number of distinct subject/topic/subtopic combinations.
    pub fn len(&self) -> usize {
        self.combinations
    }

    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Hierarchy {
        Hierarchy::from_entries([
            ("Math", "Algebra", "Linear Equations"),
            ("Math", "Algebra", "Quadratics"),
            ("Math", "Algebra", "Quadratics"),
            ("Math", "Geometry", "Triangles"),
            ("Science", "Physics", "Kinematics"),
        ])
    }

    #[test]
    fn topics_are_distinct_children_of_subject() {
        let h = sample();
        assert_eq!(h.topics_for("Math"), BTreeSet::from(["Algebra", "Geometry"]));
        assert_eq!(h.topics_for("Science"), BTreeSet::from(["Physics"]));
        assert!(h.topics_for("History").is_empty());
    }

    #[test]
    fn subtopics_are_scoped_to_subject_and_topic() {
        let h = sample();
        assert_eq!(
            h.subtopics_for("Math", "Algebra"),
            BTreeSet::from(["Linear Equations", "Quadratics"])
        );
        assert!(h.subtopics_for("Science", "Algebra").is_empty());
        assert!(h.subtopics_for("Nope", "Nope").is_empty());
    }

    #[test]
    fn duplicate_rows_count_once() {
        assert_eq!(sample().len(), 4);
    }

    #[test]
    fn from_table_requires_all_three_columns() {
        let table = Table::new(
            vec!["Subject".into(), "Topic".into()],
            vec![vec!["Math".into(), "Algebra".into()]],
        );
        match Hierarchy::from_table(&table) {
            Err(TaggerError::Validation { missing, .. }) => assert_eq!(missing, vec!["Subtopic"]),
            other => panic!("expected validation error, got {:?}", other),
        }
    }

    #[test]
    fn blank_cells_contribute_only_their_parents() {
        let table = Table::new(
            vec!["subject".into(), "topic".into(), "subtopic".into(), "Notes".into()],
            vec![
                vec!["History".into(), "".into(), "".into(), "x".into()],
                vec!["Math".into(), "Algebra".into(), "".into(), "".into()],
                vec!["".into(), "Orphan".into(), "Orphan".into(), "".into()],
            ],
        );
        let h = Hierarchy::from_table(&table).unwrap();
        assert_eq!(h.subjects(), vec!["History", "Math"]);
        assert!(h.has_topic("Math", "Algebra"));
        assert!(h.subtopics_for("Math", "Algebra").is_empty());
        assert_eq!(h.len(), 0);
    }

    #[test]
    fn load_first_reports_every_candidate() {
        let tried = vec![PathBuf::from("/nonexistent/a.xlsx"), PathBuf::from("/nonexistent/b.csv")];
        match Hierarchy::load_first(&tried) {
            Err(TaggerError::MissingHierarchy { tried: reported }) => assert_eq!(reported, tried),
            other => panic!("expected missing hierarchy, got {:?}", other),
        }
    }
}
