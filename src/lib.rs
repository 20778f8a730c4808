/*!
# Question Tagger

A small tool for attaching Subject → Topic → Subtopic tags to a list of
questions loaded from a spreadsheet, and exporting the tagged result.

## Overview

A reference table (Subject, Topic, Subtopic) is loaded once at startup and
drives cascading selections. The user uploads a questions table (Question,
Answer, plus any other columns), attaches zero or more mappings to each
question, and exports one row per (question, mapping) pair.

In-progress work is protected against restarts by an auto-saved session
artifact on local disk.

## Architecture

### Reference & input
- **loader**: CSV and workbook (XLSX/XLS/ODS) reading into a header + string table
- **hierarchy**: the deduplicated Subject → Topic → Subtopic tree
- **questions**: the uploaded question set, ids by 1-based row position

### Editing
- **mapping**: a single (possibly partial) tag with cascade-clear rules
- **state**: the session aggregate and add/remove/set operations

### Durability
- **saving**: versioned snapshot schema, gzip + bincode artifact written
  through a temp file and atomic rename, JSON backups
- **durability**: dirty-flag auto-save state machine (EMPTY / ACTIVE)

### Output & surfaces
- **downloader**: XLSX and CSV export
- **workspace**: ties hierarchy, state and durability together
- **app**: axum HTTP surface (`web` feature)

## Session lifecycle

- Edits mark the session dirty; nothing is written immediately
- Each timer tick (default every 10 seconds) writes the session if dirty
- At startup the artifact is restored; a corrupt one is ignored with a warning
- Clearing deletes the artifact and empties the session

## REST API Endpoints (`web` feature)

- `GET /api/hierarchy/subjects`, `/api/hierarchy/topics`, `/api/hierarchy/subtopics`
- `GET /api/session` - questions, mappings, progress and last-saved time
- `POST /api/upload` - multipart questions file
- `POST /api/questions/{id}/mappings` - add a mapping
- `POST /api/questions/{id}/mappings/{index}` - set a field
- `DELETE /api/questions/{id}/mappings/{index}` - remove a mapping
- `POST /api/clear`, `GET /api/export`, `GET|POST /api/backup`
*/

pub mod config;
pub mod downloader;
pub mod durability;
pub mod error;
pub mod hierarchy;
pub mod loader;
pub mod mapping;
pub mod questions;
pub mod saving;
pub mod state;
pub mod workspace;

#[cfg(feature = "web")]
pub mod app;

pub use config::Config;
pub use durability::{DurabilityManager, Phase, SaveOutcome};
pub use error::{Result, TaggerError};
pub use hierarchy::Hierarchy;
pub use mapping::{Mapping, TagField};
pub use questions::{Question, QuestionStore};
pub use state::SessionState;
pub use workspace::Workspace;
