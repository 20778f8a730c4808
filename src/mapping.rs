use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::{Result, TaggerError};
use crate::hierarchy::Hierarchy;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TagField {
    Subject,
    Topic,
    Subtopic,
}

impl fmt::Display for TagField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TagField::Subject => "subject",
            TagField::Topic => "topic",
            TagField::Subtopic => "subtopic",
        })
    }
}

impl FromStr for TagField {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "subject" => Ok(TagField::Subject),
            "topic" => Ok(TagField::Topic),
            "subtopic" => Ok(TagField::Subtopic),
            other => Err(format!("unknown field '{}'", other)),
        }
    }
}

/// One tag assignment on a question. Any prefix of the triple may be set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Mapping {
    pub subject: Option<String>,
    pub topic: Option<String>,
    pub subtopic: Option<String>,
}

impl Mapping {
    pub fn new(subject: &str, topic: &str, subtopic: &str) -> Self {
        Mapping {
            subject: non_blank(subject),
            topic: non_blank(topic),
            subtopic: non_blank(subtopic),
        }
    }

    pub fn get(&self, field: TagField) -> Option<&str> {
        match field {
            TagField::Subject => self.subject.as_deref(),
            TagField::Topic => self.topic.as_deref(),
            TagField::Subtopic => self.subtopic.as_deref(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.subject.is_some() && self.topic.is_some() && self.subtopic.is_some()
    }

    /// Set one field, cascade-clearing children that stop being valid.
    ///
    /// A blank value clears the field and everything below it. Topic and
    /// subtopic must be children of the current parent; on failure the
    /// mapping is left untouched.
    pub fn set(&mut self, hierarchy: &Hierarchy, field: TagField, value: &str) -> Result<()> {
        let value = non_blank(value);
        match field {
            TagField::Subject => {
                if let Some(subject) = &value {
                    if !hierarchy.has_subject(subject) {
                        return Err(invalid(field, subject, "the hierarchy"));
                    }
                }
                self.subject = value;
            }
            TagField::Topic => {
                if let Some(topic) = &value {
                    let subject = self.subject.as_deref().unwrap_or("");
                    if !hierarchy.has_topic(subject, topic) {
                        return Err(invalid(field, topic, subject));
                    }
                }
                self.topic = value;
            }
            TagField::Subtopic => {
                if let Some(subtopic) = &value {
                    let subject = self.subject.as_deref().unwrap_or("");
                    let topic = self.topic.as_deref().unwrap_or("");
                    if !hierarchy.has_subtopic(subject, topic, subtopic) {
                        return Err(invalid(field, subtopic, topic));
                    }
                }
                self.subtopic = value;
            }
        }
        self.cascade(hierarchy);
        Ok(())
    }

    /// Clear any field that is not a child of the field above it.
    ///
    /// Returns true if anything was cleared.
    pub fn cascade(&mut self, hierarchy: &Hierarchy) -> bool {
        let before = self.clone();

        let topic_ok = match (&self.subject, &self.topic) {
            (Some(subject), Some(topic)) => hierarchy.has_topic(subject, topic),
            (_, None) => true,
            (None, Some(_)) => false,
        };
        if !topic_ok {
            self.topic = None;
        }

        let subtopic_ok = match (&self.subject, &self.topic, &self.subtopic) {
            (Some(subject), Some(topic), Some(subtopic)) => {
                hierarchy.has_subtopic(subject, topic, subtopic)
            }
            (_, _, None) => true,
            _ => false,
        };
        if !subtopic_ok {
            self.subtopic = None;
        }

        *self != before
    }

    /// Like [`cascade`](Self::cascade) but also drops a subject the
    /// hierarchy no longer knows. Used when restoring saved sessions.
    pub fn repair(&mut self, hierarchy: &Hierarchy) -> bool {
        let mut changed = false;
        if self
            .subject
            .as_deref()
            .is_some_and(|s| !hierarchy.has_subject(s))
        {
            self.subject = None;
            changed = true;
        }
        self.cascade(hierarchy) || changed
    }
}

fn invalid(field: TagField, value: &str, parent: &str) -> TaggerError {
    TaggerError::InvalidSelection {
        field,
        value: value.to_string(),
        parent: parent.to_string(),
    }
}

fn non_blank(value: &str) -> Option<String> {
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}
