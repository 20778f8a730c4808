use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::Arc;

use crate::config::Config;
use crate::downloader;
use crate::durability::{DurabilityManager, Phase, SaveOutcome};
use crate::error::{Result, TaggerError};
use crate::hierarchy::Hierarchy;
use crate::mapping::{Mapping, TagField};
use crate::questions::QuestionStore;
use crate::saving;
use crate::state::SessionState;

/// One user's tagging session: the read-only hierarchy, the live state and
/// the durability manager that owns its lifecycle.
///
/// Every mutation goes through here so the session is marked dirty exactly
/// when something changed.
#[derive(Debug)]
pub struct Workspace {
    hierarchy: Arc<Hierarchy>,
    state: SessionState,
    durability: DurabilityManager,
}

impl Workspace {
    pub fn new(hierarchy: Arc<Hierarchy>, durability: DurabilityManager) -> Self {
        Workspace {
            hierarchy,
            state: SessionState::new(),
            durability,
        }
    }

    /// Build from config and restore any saved session.
    ///
    /// Only a missing or invalid hierarchy is fatal. An unreadable artifact
    /// is returned as the second element.
    pub fn open(config: &Config) -> Result<(Self, Option<TaggerError>)> {
        let (hierarchy, path) = Hierarchy::load_first(&config.hierarchy_candidates())?;
        info!(
            "loaded {} subject-topic-subtopic combinations from {}",
            hierarchy.len(),
            path.display()
        );
        let durability = DurabilityManager::new(&config.artifact, config.autosave_interval());
        let mut workspace = Workspace::new(Arc::new(hierarchy), durability);
        let warning = workspace.restore();
        Ok((workspace, warning))
    }

    /// Reload the saved session, repairing mappings against the hierarchy.
    pub fn restore(&mut self) -> Option<TaggerError> {
        let restored = self.durability.restore();
        self.state = restored.state;

        let repaired = self.state.repair(&self.hierarchy);
        if repaired > 0 {
            warn!(
                "{} restored mapping(s) referenced tags missing from the hierarchy and were cleared",
                repaired
            );
            self.durability.mark_dirty();
        }
        restored.warning
    }

    pub fn hierarchy(&self) -> &Hierarchy {
        &self.hierarchy
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn durability(&self) -> &DurabilityManager {
        &self.durability
    }

    pub fn phase(&self) -> Phase {
        self.durability.phase()
    }

    pub fn last_saved(&self) -> Option<DateTime<Utc>> {
        self.state.last_saved
    }

    /// Replace the session with a freshly uploaded question set.
    ///
    /// On error nothing changes.
    pub fn upload(&mut self, file_name: &str, bytes: &[u8]) -> Result<usize> {
        let store = QuestionStore::load(file_name, bytes)?;
        let count = store.len();
        let last_saved = self.state.last_saved;
        self.state = SessionState::with_questions(store);
        self.state.last_saved = last_saved;
        self.durability.mark_dirty();
        info!("loaded {} question(s) from {}", count, file_name);
        Ok(count)
    }

    pub fn add_mapping(&mut self, question_id: usize) -> Result<usize> {
        let index = self.state.add_mapping(question_id)?;
        self.durability.mark_dirty();
        Ok(index)
    }

    pub fn remove_mapping(&mut self, question_id: usize, index: usize) -> Result<Mapping> {
        let removed = self.state.remove_mapping(question_id, index)?;
        self.durability.mark_dirty();
        Ok(removed)
    }

    pub fn set_field(
        &mut self,
        question_id: usize,
        index: usize,
        field: TagField,
        value: &str,
    ) -> Result<Mapping> {
        let mapping = self
            .state
            .set_field(&self.hierarchy, question_id, index, field, value)?
            .clone();
        self.durability.mark_dirty();
        Ok(mapping)
    }

    /// Poll the auto-save timer.
    pub fn tick(&mut self) -> Result<SaveOutcome> {
        self.durability.tick(&mut self.state)
    }

    /// Save now if there are unsaved changes.
    pub fn flush(&mut self) -> Result<SaveOutcome> {
        self.durability.save_if_dirty(&mut self.state)
    }

    pub fn clear(&mut self) -> Result<()> {
        self.durability.clear(&mut self.state)
    }

    pub fn export_xlsx(&self) -> Result<Vec<u8>> {
        let bytes = downloader::to_xlsx(&self.state)?;
        info!("exported {} row(s) to xlsx", downloader::export_rows(&self.state).rows.len());
        Ok(bytes)
    }

    pub fn export_csv(&self) -> Result<String> {
        downloader::to_csv(&self.state)
    }

    pub fn backup_json(&self) -> Result<String> {
        saving::to_backup_json(&self.state)
    }

    /// Replace the session with a JSON backup, repairing it against the
    /// current hierarchy.
    pub fn import_backup(&mut self, json: &str) -> Result<usize> {
        let mut state = saving::from_backup_json(json)?;
        let repaired = state.repair(&self.hierarchy);
        if repaired > 0 {
            warn!("{} imported mapping(s) were cleared against the hierarchy", repaired);
        }
        state.last_saved = self.state.last_saved;
        self.state = state;
        self.durability.mark_dirty();
        Ok(self.state.questions().len())
    }
}
