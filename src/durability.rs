//! Auto-save state machine guarding the session against restarts.
//!
//! ```text
//!   EMPTY --upload/restore--> ACTIVE --edit--> ACTIVE (dirty)
//!                               |  --tick--> ACTIVE (clean, timestamped)
//!                               '--clear--> EMPTY (artifact deleted)
//! ```
//!
//! Edits only mark the session dirty. Writes happen on the next timer tick,
//! so at most one interval of work can be lost.

use chrono::Utc;
use log::{debug, info, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use crate::error::{Result, TaggerError};
use crate::saving;
use crate::state::SessionState;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(10);

/// Consecutive failed saves before the warning escalates.
pub const WARN_AFTER_FAILURES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Empty,
    Active,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// The artifact was rewritten.
    Saved,
    /// Nothing changed since the last save.
    Clean,
    /// The interval has not elapsed yet.
    NotDue,
}

/// What startup found on disk.
#[derive(Debug)]
pub struct Restored {
    pub state: SessionState,
    /// Set when an artifact existed but could not be used.
    pub warning: Option<TaggerError>,
}

#[derive(Debug)]
pub struct DurabilityManager {
    path: PathBuf,
    interval: Duration,
    phase: Phase,
    dirty: bool,
    next_due: Option<Instant>,
    failures: u32,
    writes: u64,
}

impl DurabilityManager {
    pub fn new(path: impl Into<PathBuf>, interval: Duration) -> Self {
        DurabilityManager {
            path: path.into(),
            interval,
            phase: Phase::Empty,
            dirty: false,
            next_due: None,
            failures: 0,
            writes: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Consecutive failed writes since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Artifact writes performed by this manager.
    pub fn writes(&self) -> u64 {
        self.writes
    }

    /// Load the artifact if there is one.
    ///
    /// A corrupt or unreadable artifact never fails startup: it yields an
    /// empty session plus a warning, and the file is left in place.
    pub fn restore(&mut self) -> Restored {
        self.dirty = false;
        match saving::load_session(&self.path) {
            Ok(Some(state)) => {
                self.phase = if state.is_empty() { Phase::Empty } else { Phase::Active };
                info!(
                    "restored session from {} ({} question(s))",
                    self.path.display(),
                    state.questions().len()
                );
                Restored { state, warning: None }
            }
            Ok(None) => {
                self.phase = Phase::Empty;
                Restored {
                    state: SessionState::new(),
                    warning: None,
                }
            }
            Err(e) => {
                self.phase = Phase::Empty;
                warn!(
                    "ignoring unreadable session artifact {}: {}",
                    self.path.display(),
                    e
                );
                Restored {
                    state: SessionState::new(),
                    warning: Some(e),
                }
            }
        }
    }

    /// Record a mutation. Does not write.
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
        self.phase = Phase::Active;
    }

    /// Polling entry point: save if a tick is due and there is unsaved
    /// work. Callers that already run on a timer use [`save_if_dirty`].
    ///
    /// [`save_if_dirty`]: DurabilityManager::save_if_dirty
    pub fn tick(&mut self, state: &mut SessionState) -> Result<SaveOutcome> {
        self.tick_at(state, Instant::now())
    }

    /// Due times advance on a fixed schedule from the first tick, so a late
    /// tick does not push the following one back.
    pub fn tick_at(&mut self, state: &mut SessionState, now: Instant) -> Result<SaveOutcome> {
        if self.interval.is_zero() {
            return self.save_if_dirty(state);
        }
        if let Some(due) = self.next_due {
            if now < due {
                return Ok(SaveOutcome::NotDue);
            }
        }

        let mut due = self.next_due.unwrap_or(now);
        while due <= now {
            due += self.interval;
        }
        self.next_due = Some(due);
        self.save_if_dirty(state)
    }

    /// Write the session if it changed since the last successful save.
    ///
    /// On failure the session stays dirty so the next tick retries.
    pub fn save_if_dirty(&mut self, state: &mut SessionState) -> Result<SaveOutcome> {
        if !self.dirty {
            debug!("session clean; skipping save");
            return Ok(SaveOutcome::Clean);
        }

        let previous = state.last_saved;
        let now = Utc::now();
        state.last_saved = Some(now);

        if let Err(e) = saving::save_session(state, &self.path) {
            state.last_saved = previous;
            self.failures += 1;
            let io = match e {
                TaggerError::Io(io) => io,
                other => std::io::Error::other(other.to_string()),
            };
            if self.failures >= WARN_AFTER_FAILURES {
                warn!(
                    "session has not been saved after {} attempts: {}",
                    self.failures, io
                );
            } else {
                warn!("failed to save session to {}: {}", self.path.display(), io);
            }
            return Err(TaggerError::DurabilityWrite(io));
        }

        self.dirty = false;
        self.failures = 0;
        self.writes += 1;
        debug!("saved session to {} at {}", self.path.display(), now);
        Ok(SaveOutcome::Saved)
    }

    /// Delete the artifact and reset the session to empty.
    pub fn clear(&mut self, state: &mut SessionState) -> Result<()> {
        saving::remove_session(&self.path)?;
        *state = SessionState::new();
        self.dirty = false;
        self.failures = 0;
        self.phase = Phase::Empty;
        info!("cleared session and removed {}", self.path.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::questions::QuestionStore;
    use std::fs;

    fn state() -> SessionState {
        let store = QuestionStore::load("q.csv", b"Question,Answer\nSolve x+1=2,1\n").unwrap();
        SessionState::with_questions(store)
    }

    #[test]
    fn second_save_without_edits_is_a_no_op() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = DurabilityManager::new(dir.path().join("s.bin.gz"), DEFAULT_INTERVAL);
        let mut s = state();
        manager.mark_dirty();

        assert_eq!(manager.save_if_dirty(&mut s).unwrap(), SaveOutcome::Saved);
        assert_eq!(manager.save_if_dirty(&mut s).unwrap(), SaveOutcome::Clean);
        assert_eq!(manager.writes(), 1);
        assert!(s.last_saved.is_some());
    }

    #[test]
    fn tick_waits_for_the_interval() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = DurabilityManager::new(dir.path().join("s.bin.gz"), Duration::from_secs(10));
        let mut s = state();
        let start = Instant::now();

        manager.mark_dirty();
        assert_eq!(manager.tick_at(&mut s, start).unwrap(), SaveOutcome::Saved);

        manager.mark_dirty();
        let early = start + Duration::from_secs(3);
        assert_eq!(manager.tick_at(&mut s, early).unwrap(), SaveOutcome::NotDue);
        assert!(manager.is_dirty());

        let later = start + Duration::from_secs(10);
        assert_eq!(manager.tick_at(&mut s, later).unwrap(), SaveOutcome::Saved);
        assert_eq!(manager.writes(), 2);
    }

    #[test]
    fn on_time_tick_after_a_late_one_still_saves() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = DurabilityManager::new(dir.path().join("s.bin.gz"), Duration::from_secs(10));
        let mut s = state();
        let start = Instant::now();

        let wakeups = [0, 10_050, 20_000, 30_050, 40_000];
        let outcomes: Vec<SaveOutcome> = wakeups
            .iter()
            .map(|ms| {
                manager.mark_dirty();
                manager
                    .tick_at(&mut s, start + Duration::from_millis(*ms))
                    .unwrap()
            })
            .collect();

        assert_eq!(outcomes, vec![SaveOutcome::Saved; 5]);
        assert_eq!(manager.writes(), 5);
    }

    #[test]
    fn long_pause_does_not_queue_up_ticks() {
        let dir = tempfile::tempdir().unwrap();
        let mut manager = DurabilityManager::new(dir.path().join("s.bin.gz"), Duration::from_secs(10));
        let mut s = state();
        let start = Instant::now();

        manager.mark_dirty();
        manager.tick_at(&mut s, start).unwrap();
        manager.mark_dirty();
        let resumed = start + Duration::from_secs(95);
        assert_eq!(manager.tick_at(&mut s, resumed).unwrap(), SaveOutcome::Saved);

        manager.mark_dirty();
        let soon = resumed + Duration::from_secs(1);
        assert_eq!(manager.tick_at(&mut s, soon).unwrap(), SaveOutcome::NotDue);
        let next = start + Duration::from_secs(100);
        assert_eq!(manager.tick_at(&mut s, next).unwrap(), SaveOutcome::Saved);
    }

    #[test]
    fn failed_write_keeps_session_dirty() {
        let dir = tempfile::tempdir().unwrap();
        // A regular file where the parent directory should be
        let blocker = dir.path().join("blocker");
        fs::write(&blocker, b"x").unwrap();
        let mut manager = DurabilityManager::new(blocker.join("s.bin.gz"), DEFAULT_INTERVAL);
        let mut s = state();

        manager.mark_dirty();
        for attempt in 1..=WARN_AFTER_FAILURES {
            let err = manager.save_if_dirty(&mut s).unwrap_err();
            assert!(matches!(err, TaggerError::DurabilityWrite(_)));
            assert_eq!(manager.failures(), attempt);
        }
        assert!(manager.is_dirty());
        assert!(s.last_saved.is_none());
        assert_eq!(manager.writes(), 0);
    }

    #[test]
    fn clear_removes_artifact_and_tolerates_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin.gz");
        let mut manager = DurabilityManager::new(&path, DEFAULT_INTERVAL);
        let mut s = state();

        manager.mark_dirty();
        manager.save_if_dirty(&mut s).unwrap();
        assert!(path.exists());

        manager.clear(&mut s).unwrap();
        assert!(!path.exists());
        assert!(s.is_empty());
        assert_eq!(manager.phase(), Phase::Empty);

        manager.clear(&mut s).unwrap();
    }

    #[test]
    fn corrupt_artifact_restores_empty_with_warning() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin.gz");
        fs::write(&path, b"\x1f\x8bnot really gzip").unwrap();

        let mut manager = DurabilityManager::new(&path, DEFAULT_INTERVAL);
        let restored = manager.restore();

        assert!(restored.state.is_empty());
        assert!(matches!(restored.warning, Some(TaggerError::DurabilityRead(_))));
        assert_eq!(manager.phase(), Phase::Empty);
        assert!(path.exists());
    }

    #[test]
    fn restore_after_save_is_active_and_clean() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("s.bin.gz");
        let mut s = state();
        s.add_mapping(1).unwrap();

        let mut writer = DurabilityManager::new(&path, DEFAULT_INTERVAL);
        writer.mark_dirty();
        writer.save_if_dirty(&mut s).unwrap();

        let mut reader = DurabilityManager::new(&path, DEFAULT_INTERVAL);
        let restored = reader.restore();
        assert!(restored.warning.is_none());
        assert_eq!(restored.state, s);
        assert_eq!(reader.phase(), Phase::Active);
        assert!(!reader.is_dirty());
    }
}
