//! Session snapshot schema and the on-disk artifact format.
//!
//! The artifact is a gzip-compressed bincode encoding of [`SessionSnapshot`].
//! The same schema is used, as pretty JSON, for manual backups.

use bincode::serialize_into;
use chrono::{DateTime, Utc};
use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufWriter, Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

use crate::error::{Result, TaggerError};
use crate::mapping::Mapping;
use crate::questions::{Question, QuestionStore};
use crate::state::SessionState;

pub const SNAPSHOT_VERSION: u32 = 1;

/// Largest decompressed artifact accepted on restore.
pub const MAX_ARTIFACT_BYTES: u64 = 256 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub version: u32,
    pub saved_at: Option<DateTime<Utc>>,
    pub source: Option<SnapshotSource>,
    pub questions: Vec<SnapshotQuestion>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSource {
    pub name: String,
    pub columns: Vec<String>,
    pub question_col: String,
    pub answer_col: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotQuestion {
    pub id: usize,
    pub values: Vec<String>,
    pub mappings: Vec<Mapping>,
}

impl SessionSnapshot {
    pub fn capture(state: &SessionState) -> Self {
        let source = state.store.as_ref().map(|store| SnapshotSource {
            name: store.source_name.clone(),
            columns: store.columns.clone(),
            question_col: store.question_col.clone(),
            answer_col: store.answer_col.clone(),
        });

        let questions = state
            .questions()
            .iter()
            .zip(&state.mappings)
            .map(|(q, mappings)| SnapshotQuestion {
                id: q.id,
                values: q.values.clone(),
                mappings: mappings.clone(),
            })
            .collect();

        SessionSnapshot {
            version: SNAPSHOT_VERSION,
            saved_at: state.last_saved,
            source,
            questions,
        }
    }

    /// Check the structure before anything is restored from it.
    pub fn validate(&self) -> Result<()> {
        if self.version != SNAPSHOT_VERSION {
            return Err(read_error(format!(
                "unsupported snapshot version {} (expected {})",
                self.version, SNAPSHOT_VERSION
            )));
        }

        let Some(source) = &self.source else {
            if !self.questions.is_empty() {
                return Err(read_error("questions present without a source file"));
            }
            return Ok(());
        };

        for col in [&source.question_col, &source.answer_col] {
            if !source.columns.contains(col) {
                return Err(read_error(format!("column '{}' missing from source columns", col)));
            }
        }

        for (pos, q) in self.questions.iter().enumerate() {
            if q.id != pos + 1 {
                return Err(read_error(format!(
                    "question ids are not sequential: expected {}, found {}",
                    pos + 1,
                    q.id
                )));
            }
            if q.values.len() != source.columns.len() {
                return Err(read_error(format!(
                    "question {} has {} values for {} columns",
                    q.id,
                    q.values.len(),
                    source.columns.len()
                )));
            }
        }

        Ok(())
    }

    /// Validate and turn back into live state.
    pub fn into_state(self) -> Result<SessionState> {
        self.validate()?;

        let Some(source) = self.source else {
            return Ok(SessionState {
                last_saved: self.saved_at,
                ..SessionState::default()
            });
        };

        let (questions, mappings) = self
            .questions
            .into_iter()
            .map(|q| (Question { id: q.id, values: q.values }, q.mappings))
            .unzip();

        Ok(SessionState {
            store: Some(QuestionStore {
                source_name: source.name,
                columns: source.columns,
                question_col: source.question_col,
                answer_col: source.answer_col,
                questions,
            }),
            mappings,
            last_saved: self.saved_at,
        })
    }
}

fn read_error(message: impl Into<String>) -> TaggerError {
    TaggerError::DurabilityRead(message.into())
}

/// Encode a session into the compressed artifact format.
pub fn encode<W: Write>(state: &SessionState, writer: W) -> Result<()> {
    let encoder = GzEncoder::new(writer, Compression::default());
    let mut writer = BufWriter::new(encoder);

    serialize_into(&mut writer, &SessionSnapshot::capture(state))?;

    let encoder = writer.into_inner().map_err(|e| e.into_error())?;
    encoder.finish()?;
    Ok(())
}

/// Decode and validate an artifact. Every failure is a `DurabilityRead`.
///
/// The payload is fully decompressed before bincode sees it, so length
/// prefixes are checked against the bytes actually present.
pub fn decode<R: Read>(reader: R) -> Result<SessionState> {
    let mut bytes = Vec::new();
    GzDecoder::new(reader)
        .take(MAX_ARTIFACT_BYTES + 1)
        .read_to_end(&mut bytes)
        .map_err(|e| read_error(e.to_string()))?;
    if bytes.len() as u64 > MAX_ARTIFACT_BYTES {
        return Err(read_error(format!(
            "artifact exceeds {} bytes when decompressed",
            MAX_ARTIFACT_BYTES
        )));
    }

    let snapshot: SessionSnapshot =
        bincode::deserialize(&bytes).map_err(|e| read_error(e.to_string()))?;

    snapshot.into_state()
}

/// Atomically replace the artifact at `path` with the encoded session.
pub fn save_session(state: &SessionState, path: &Path) -> Result<()> {
    replace_with(path, |file| encode(state, file))
}

/// Write a new version of `path` through `write`.
///
/// The data goes to a temporary file in the same directory, is synced, and
/// is then renamed over `path`. If `write` fails the temporary file is
/// discarded and the previous contents of `path` are untouched.
pub fn replace_with<F>(path: &Path, write: F) -> Result<()>
where
    F: FnOnce(&mut File) -> Result<()>,
{
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(dir)?;

    let mut tmp = NamedTempFile::new_in(dir)?;
    write(tmp.as_file_mut())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| TaggerError::Io(e.error))?;

    Ok(())
}

/// Read the artifact. `Ok(None)` if it does not exist.
pub fn load_session(path: &Path) -> Result<Option<SessionState>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(read_error(e.to_string())),
    };
    decode(file).map(Some)
}

/// Delete the artifact; a missing file counts as success.
pub fn remove_session(path: &Path) -> std::io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Serialize the session as a human-readable JSON backup.
pub fn to_backup_json(state: &SessionState) -> Result<String> {
    Ok(serde_json::to_string_pretty(&SessionSnapshot::capture(state))?)
}

/// Parse and validate a JSON backup.
pub fn from_backup_json(json: &str) -> Result<SessionState> {
    let snapshot: SessionSnapshot = serde_json::from_str(json)?;
    snapshot.into_state()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn tagged_state() -> SessionState {
        let store = QuestionStore::load(
            "Questions.csv",
            b"Question,Answer,Source\nSolve x+1=2,1,book\nWhat is g?,9.8,\n",
        )
        .unwrap();
        let mut state = SessionState::with_questions(store);
        state.mappings[0].push(Mapping::new("Math", "Algebra", "Linear Equations"));
        state.mappings[0].push(Mapping::new("Math", "", ""));
        state.last_saved = Some(Utc::now());
        state
    }

    #[test]
    fn artifact_round_trip_preserves_everything() {
        let state = tagged_state();
        let mut buffer = Vec::new();
        encode(&state, &mut buffer).unwrap();
        assert_eq!(decode(buffer.as_slice()).unwrap(), state);
    }

    #[test]
    fn empty_state_round_trips() {
        let mut buffer = Vec::new();
        encode(&SessionState::new(), &mut buffer).unwrap();
        assert_eq!(decode(buffer.as_slice()).unwrap(), SessionState::new());
    }

    #[test]
    fn garbage_is_a_read_error() {
        let err = decode(&b"definitely not gzip"[..]).unwrap_err();
        assert!(matches!(err, TaggerError::DurabilityRead(_)));
    }

    #[test]
    fn oversized_length_prefix_is_a_read_error() {
        // version 1, saved_at None, source Some, then a name claiming 2^40 bytes
        let mut payload = Vec::new();
        payload.extend_from_slice(&1u32.to_le_bytes());
        payload.push(0);
        payload.push(1);
        payload.extend_from_slice(&(1u64 << 40).to_le_bytes());
        payload.extend_from_slice(b"abc");

        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&payload).unwrap();
        let artifact = encoder.finish().unwrap();

        let err = decode(artifact.as_slice()).unwrap_err();
        assert!(matches!(err, TaggerError::DurabilityRead(_)));
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut snapshot = SessionSnapshot::capture(&tagged_state());
        snapshot.version = 99;
        assert!(matches!(snapshot.validate(), Err(TaggerError::DurabilityRead(_))));
    }

    #[test]
    fn ragged_rows_are_rejected() {
        let mut snapshot = SessionSnapshot::capture(&tagged_state());
        snapshot.questions[1].values.pop();
        assert!(snapshot.into_state().is_err());
    }

    #[test]
    fn backup_json_round_trips_and_validates() {
        let state = tagged_state();
        let json = to_backup_json(&state).unwrap();
        assert!(json.contains("\"subject\": \"Math\""));
        assert_eq!(from_backup_json(&json).unwrap(), state);

        let broken = json.replace("\"id\": 2", "\"id\": 7");
        assert!(matches!(from_backup_json(&broken), Err(TaggerError::DurabilityRead(_))));
        assert!(matches!(from_backup_json("{"), Err(TaggerError::Json(_))));
    }

    #[test]
    fn missing_artifact_loads_as_none_and_removes_cleanly() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.bin.gz");
        assert!(load_session(&path).unwrap().is_none());
        remove_session(&path).unwrap();
    }

    #[test]
    fn save_creates_parent_directories_and_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.bin.gz");

        save_session(&SessionState::new(), &path).unwrap();
        let state = tagged_state();
        save_session(&state, &path).unwrap();

        assert_eq!(load_session(&path).unwrap(), Some(state));
        let leftovers = fs::read_dir(path.parent().unwrap()).unwrap().count();
        assert_eq!(leftovers, 1);
    }

    #[test]
    fn failed_write_leaves_previous_artifact_intact() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.bin.gz");
        let state = tagged_state();
        save_session(&state, &path).unwrap();

        let result = replace_with(&path, |file| {
            file.write_all(b"\x1f\x8bhalf an artifact")?;
            Err(TaggerError::InvalidInput("encoder gave up".to_string()))
        });

        assert!(matches!(result, Err(TaggerError::InvalidInput(_))));
        assert_eq!(load_session(&path).unwrap(), Some(state));
        let leftovers = fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
