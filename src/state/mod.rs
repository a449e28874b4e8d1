//! Persisted build progress
//!
//! One record per build id. A record is written whole on every flush, and
//! terminal records (completed or failed) are never rewritten.

pub mod manager;
pub mod store;

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use structure_plan::BlockPos;

pub use manager::StateManager;
pub use store::FileStore;

/// Undo entries kept per build
pub const UNDO_HISTORY_LIMIT: usize = 1000;
/// Terminal records kept on disk
pub const TERMINAL_RETENTION: usize = 10;
/// Progress updates between periodic flushes
pub const DEFAULT_FLUSH_EVERY: u32 = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    InProgress,
    Completed,
    Failed,
}

impl BuildStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            BuildStatus::InProgress => "in_progress",
            BuildStatus::Completed => "completed",
            BuildStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        !matches!(self, BuildStatus::InProgress)
    }
}

/// What was being built; enough to recompile and check the plan on resume
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct BlueprintSummary {
    pub scene_ids: Vec<String>,
    pub seed: u32,
    pub plan_id: String,
    pub plan_hash: String,
    pub total_steps: usize,
    pub total_items: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Progress {
    pub current_step: usize,
    pub blocks_placed: u64,
    pub blocks_failed: u64,
    pub blocks_skipped: u64,
    #[serde(default)]
    pub blocks_unverified: u64,
    pub completed_steps: Vec<usize>,
}

/// Increment applied by `StateManager::update_progress`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProgressDelta {
    pub placed: u64,
    pub failed: u64,
    pub skipped: u64,
    pub unverified: u64,
}

impl ProgressDelta {
    pub fn placed() -> Self {
        Self { placed: 1, ..Self::default() }
    }

    pub fn failed() -> Self {
        Self { failed: 1, ..Self::default() }
    }

    pub fn skipped() -> Self {
        Self { placed: 1, skipped: 1, ..Self::default() }
    }

    pub fn unverified() -> Self {
        Self { placed: 1, unverified: 1, ..Self::default() }
    }
}

/// Block a placement replaced
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UndoEntry {
    pub pos: BlockPos,
    /// `None` when the cell could not be read beforehand
    pub previous: Option<String>,
    pub placed: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkOpRecord {
    pub id: String,
    pub command: String,
    pub block: String,
    pub changed: u64,
    pub step: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildState {
    pub build_id: String,
    pub started_at: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<u64>,
    pub start_pos: BlockPos,
    pub blueprint_summary: BlueprintSummary,
    pub progress: Progress,
    pub undo_history: VecDeque<UndoEntry>,
    pub bulk_op_history: Vec<BulkOpRecord>,
    pub status: BuildStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

impl BuildState {
    /// First step not yet completed.
    pub fn resume_from_step(&self) -> usize {
        (0..).find(|i| !self.progress.completed_steps.contains(i)).unwrap_or(0)
    }
}

/// Everything the executor needs to pick a build back up
#[derive(Debug, Clone, PartialEq)]
pub struct ResumeDescriptor {
    pub build_id: String,
    pub resume_from_step: usize,
    pub completed_steps: Vec<usize>,
    pub start_pos: BlockPos,
    pub progress: Progress,
    pub undo_history: VecDeque<UndoEntry>,
    pub bulk_op_history: Vec<BulkOpRecord>,
    pub blueprint_summary: BlueprintSummary,
}

impl ResumeDescriptor {
    pub fn from_state(state: &BuildState) -> Self {
        Self {
            build_id: state.build_id.clone(),
            resume_from_step: state.resume_from_step(),
            completed_steps: state.progress.completed_steps.clone(),
            start_pos: state.start_pos,
            progress: state.progress.clone(),
            undo_history: state.undo_history.clone(),
            bulk_op_history: state.bulk_op_history.clone(),
            blueprint_summary: state.blueprint_summary.clone(),
        }
    }

    pub fn plan_hash(&self) -> &str {
        &self.blueprint_summary.plan_hash
    }
}
