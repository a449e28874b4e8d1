use std::collections::VecDeque;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use structure_plan::BlockPos;
use tracing::{debug, info, warn};

use super::store::FileStore;
use super::{
    BlueprintSummary, BuildState, BuildStatus, BulkOpRecord, Progress, ProgressDelta, ResumeDescriptor,
    UndoEntry, DEFAULT_FLUSH_EVERY, TERMINAL_RETENTION, UNDO_HISTORY_LIMIT,
};
use crate::error::{Error, Result};

/// Owns the record of the build in progress. Constructed per session and
/// passed by `&mut`; there is exactly one writer.
#[derive(Debug)]
pub struct StateManager {
    store: FileStore,
    active: Option<BuildState>,
    updates_since_flush: u32,
    flush_every: u32,
    retention: usize,
    persistence_errors: Vec<String>,
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// `build-<13 digit millis>-<6 hex>`; lexical order is start order.
pub fn new_build_id() -> String {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut buf = [0u8; 3];
    let suffix = if getrandom::getrandom(&mut buf).is_ok() {
        let mut out = String::with_capacity(buf.len() * 2);
        for b in buf {
            out.push(HEX[(b >> 4) as usize] as char);
            out.push(HEX[(b & 0x0f) as usize] as char);
        }
        out
    } else {
        let nanos = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.subsec_nanos())
            .unwrap_or(0);
        format!("{:06x}", nanos & 0x00ff_ffff)
    };
    format!("build-{:013}-{}", now_millis(), suffix)
}

impl StateManager {
    pub fn new(store: FileStore) -> Self {
        Self {
            store,
            active: None,
            updates_since_flush: 0,
            flush_every: DEFAULT_FLUSH_EVERY,
            retention: TERMINAL_RETENTION,
            persistence_errors: Vec::new(),
        }
    }

    pub fn open(dir: impl Into<PathBuf>) -> Self {
        Self::new(FileStore::new(dir))
    }

    pub fn with_flush_every(mut self, updates: u32) -> Self {
        self.flush_every = updates.max(1);
        self
    }

    pub fn with_retention(mut self, records: usize) -> Self {
        self.retention = records;
        self
    }

    pub fn active(&self) -> Option<&BuildState> {
        self.active.as_ref()
    }

    pub fn active_build_id(&self) -> Option<&str> {
        self.active.as_ref().map(|s| s.build_id.as_str())
    }

    fn active_mut(&mut self) -> Result<&mut BuildState> {
        self.active.as_mut().ok_or(Error::NoActiveBuild)
    }

    pub fn start_build(&mut self, summary: BlueprintSummary, start_pos: BlockPos) -> String {
        let build_id = new_build_id();
        self.active = Some(BuildState {
            build_id: build_id.clone(),
            started_at: now_millis(),
            finished_at: None,
            start_pos,
            blueprint_summary: summary,
            progress: Progress::default(),
            undo_history: VecDeque::new(),
            bulk_op_history: Vec::new(),
            status: BuildStatus::InProgress,
            failure_reason: None,
        });
        info!(build_id = %build_id, "build started");
        self.flush();
        build_id
    }

    pub fn set_current_step(&mut self, index: usize) -> Result<()> {
        self.active_mut()?.progress.current_step = index;
        Ok(())
    }

    /// Apply counts; flushes every `flush_every` updates.
    pub fn update_progress(&mut self, delta: ProgressDelta) -> Result<()> {
        let progress = &mut self.active_mut()?.progress;
        progress.blocks_placed += delta.placed;
        progress.blocks_failed += delta.failed;
        progress.blocks_skipped += delta.skipped;
        progress.blocks_unverified += delta.unverified;
        self.tick();
        Ok(())
    }

    /// Mark a step done and flush immediately.
    pub fn complete_step(&mut self, index: usize) -> Result<()> {
        let progress = &mut self.active_mut()?.progress;
        if !progress.completed_steps.contains(&index) {
            progress.completed_steps.push(index);
            progress.completed_steps.sort_unstable();
        }
        progress.current_step = index + 1;
        debug!(step = index, "step completed");
        self.flush();
        Ok(())
    }

    pub fn record_undo(&mut self, entry: UndoEntry) -> Result<()> {
        let history = &mut self.active_mut()?.undo_history;
        if history.len() == UNDO_HISTORY_LIMIT {
            history.pop_front();
        }
        history.push_back(entry);
        Ok(())
    }

    pub fn record_bulk_op(&mut self, record: BulkOpRecord) -> Result<()> {
        self.active_mut()?.bulk_op_history.push(record);
        self.tick();
        Ok(())
    }

    /// Remove and return up to `count` undo entries, most recent first.
    pub fn take_undo(&mut self, count: usize) -> Result<Vec<UndoEntry>> {
        let history = &mut self.active_mut()?.undo_history;
        let n = count.min(history.len());
        let taken: Vec<UndoEntry> = (0..n).filter_map(|_| history.pop_back()).collect();
        self.flush();
        Ok(taken)
    }

    pub fn complete_build(&mut self) -> Result<BuildState> {
        self.finish(BuildStatus::Completed, None)
    }

    pub fn fail_build(&mut self, reason: impl Into<String>) -> Result<BuildState> {
        self.finish(BuildStatus::Failed, Some(reason.into()))
    }

    fn finish(&mut self, status: BuildStatus, reason: Option<String>) -> Result<BuildState> {
        let state = self.active_mut()?;
        state.status = status;
        state.failure_reason = reason;
        state.finished_at = Some(now_millis());
        info!(build_id = %state.build_id, status = status.as_str(), "build finished");
        self.flush();
        self.prune();
        self.active.take().ok_or(Error::NoActiveBuild)
    }

    /// Attach to an in-progress build: the named one, or the most recent.
    pub fn prepare_resume(&mut self, build_id: Option<&str>) -> Result<Option<ResumeDescriptor>> {
        let state = match build_id {
            Some(id) => {
                let state = self.store.load(id)?.ok_or_else(|| Error::BuildNotFound(id.to_string()))?;
                if state.status.is_terminal() {
                    return Err(Error::NotResumable {
                        build_id: id.to_string(),
                        status: state.status.as_str(),
                    });
                }
                state
            }
            None => match self
                .store
                .load_all()?
                .into_iter()
                .filter(|s| s.status == BuildStatus::InProgress)
                .max_by(|a, b| a.build_id.cmp(&b.build_id))
            {
                Some(state) => state,
                None => return Ok(None),
            },
        };
        let descriptor = ResumeDescriptor::from_state(&state);
        info!(
            build_id = %state.build_id,
            resume_from_step = descriptor.resume_from_step,
            "resuming build"
        );
        self.active = Some(state);
        self.updates_since_flush = 0;
        Ok(Some(descriptor))
    }

    pub fn list_builds(&self) -> Result<Vec<BuildState>> {
        self.store.load_all()
    }

    fn tick(&mut self) {
        self.updates_since_flush += 1;
        if self.updates_since_flush >= self.flush_every {
            self.flush();
        }
    }

    /// Write the active record. Failures are logged and remembered; the build
    /// carries on in memory.
    pub fn flush(&mut self) {
        self.updates_since_flush = 0;
        let Some(state) = self.active.as_ref() else { return };
        if let Err(e) = self.store.save(state) {
            warn!(build_id = %state.build_id, error = %e, "failed to persist build state");
            self.persistence_errors.push(e.to_string());
        }
    }

    pub fn take_persistence_errors(&mut self) -> Vec<String> {
        std::mem::take(&mut self.persistence_errors)
    }

    fn prune(&mut self) {
        let states = match self.store.load_all() {
            Ok(states) => states,
            Err(e) => {
                warn!(error = %e, "failed to list build records for pruning");
                return;
            }
        };
        let terminal: Vec<&BuildState> = states.iter().filter(|s| s.status.is_terminal()).collect();
        let excess = terminal.len().saturating_sub(self.retention);
        for state in &terminal[..excess] {
            debug!(build_id = %state.build_id, "pruning old build record");
            if let Err(e) = self.store.remove(&state.build_id) {
                warn!(build_id = %state.build_id, error = %e, "failed to prune build record");
            }
        }
    }
}
