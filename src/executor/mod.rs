//! Plan executor
//!
//! Applies a placement plan to a [`WorldTarget`] one step at a time. Each
//! discrete placement is pre-read, set, given a settle delay and read back;
//! failures back off and retry up to the configured budget. Completed steps
//! are persisted through the [`StateManager`] so an interrupted build resumes
//! at the first unfinished step.

pub mod events;
pub mod rate_limit;
pub mod report;
pub mod stations;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use structure_plan::palette::base_block_id;
use structure_plan::{BlockPos, BulkRegionOp, PlacementPlan, Step};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::state::{BulkOpRecord, ProgressDelta, ResumeDescriptor, StateManager, UndoEntry};
use crate::target::{GameMode, ReadResult, WorldTarget};

pub use events::{BuildEvent, EventCollector, EventHandler};
pub use rate_limit::RateLimiter;
pub use report::{BuildReport, BuildWarning, ErrorClass};
pub use stations::{in_reach, plan_stations, MovementMode, Station};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    /// Wait after the n-th failed attempt; the last entry repeats
    pub backoff_ms: Vec<u64>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_ms: vec![50, 100, 200],
        }
    }
}

impl RetryPolicy {
    /// Backoff after failed attempt `attempt` (1-based).
    pub fn backoff(&self, attempt: u32) -> Duration {
        let idx = (attempt.max(1) - 1) as usize;
        let ms = self
            .backoff_ms
            .get(idx)
            .or(self.backoff_ms.last())
            .copied()
            .unwrap_or(0);
        Duration::from_millis(ms)
    }
}

/// What to do when a placement lands in an unloaded chunk and cannot be read back
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnverifiablePolicy {
    /// Count it as placed and unverified
    #[default]
    AssumeSuccess,
    /// Retry, then count it as failed
    TreatAsFailure,
}

/// Executor configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub placements_per_second: f64,
    pub settle_delay_ms: u64,
    pub retry: RetryPolicy,
    pub movement: MovementMode,
    pub unverifiable_policy: UnverifiablePolicy,
    pub move_poll_interval_ms: u64,
    pub move_timeout_ms: u64,
    /// Distance at which a move counts as arrived
    pub arrival_tolerance: f64,
    pub progress_flush_every: u32,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            placements_per_second: 20.0,
            settle_delay_ms: 50,
            retry: RetryPolicy::default(),
            movement: MovementMode::default(),
            unverifiable_policy: UnverifiablePolicy::default(),
            move_poll_interval_ms: 100,
            move_timeout_ms: 3000,
            arrival_tolerance: 1.0,
            progress_flush_every: crate::state::DEFAULT_FLUSH_EVERY,
        }
    }
}

/// Builder for creating executors
pub struct ExecutorBuilder {
    config: ExecutorConfig,
}

impl Default for ExecutorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl ExecutorBuilder {
    pub fn new() -> Self {
        Self {
            config: ExecutorConfig::default(),
        }
    }

    pub fn from_config(config: ExecutorConfig) -> Self {
        Self { config }
    }

    pub fn placements_per_second(mut self, pps: f64) -> Self {
        self.config.placements_per_second = pps;
        self
    }

    pub fn settle_delay(mut self, delay: Duration) -> Self {
        self.config.settle_delay_ms = delay.as_millis() as u64;
        self
    }

    pub fn retry(mut self, retry: RetryPolicy) -> Self {
        self.config.retry = retry;
        self
    }

    pub fn movement(mut self, movement: MovementMode) -> Self {
        self.config.movement = movement;
        self
    }

    pub fn unverifiable_policy(mut self, policy: UnverifiablePolicy) -> Self {
        self.config.unverifiable_policy = policy;
        self
    }

    pub fn move_timeout(mut self, timeout: Duration) -> Self {
        self.config.move_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn build<T: WorldTarget>(self, target: T) -> Executor<T> {
        Executor::new(target, self.config)
    }
}

/// Shared stop flag, polled between placements and station moves
#[derive(Debug, Clone, Default)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

enum Verification {
    Confirmed,
    Unverified(String),
    Mismatch(String),
}

enum Outcome {
    Placed { attempts: u32 },
    Skipped,
    Unverified { reason: String },
    Failed { error: String },
}

enum Action {
    Station { vantage: BlockPos, cells: usize },
    Place { index: usize, ensure_reach: bool },
}

/// Ids match when their base blocks match and `found` carries every state
/// property `expected` asks for. Namespaces and property order are ignored;
/// extra properties on `found` (defaults the world reports) are allowed.
fn same_block(found: &str, expected: &str) -> bool {
    if base_block_id(found) != base_block_id(expected) {
        return false;
    }
    let found_state: Vec<&str> = state_properties(found).collect();
    state_properties(expected).all(|prop| found_state.contains(&prop))
}

fn state_properties(block: &str) -> impl Iterator<Item = &str> {
    block
        .split_once('[')
        .map(|(_, rest)| rest.trim_end_matches(']'))
        .unwrap_or("")
        .split(',')
        .map(str::trim)
        .filter(|prop| !prop.is_empty())
}

pub struct Executor<T> {
    target: T,
    config: ExecutorConfig,
    limiter: RateLimiter,
    cancel: CancelHandle,
    agent: Option<BlockPos>,
}

impl<T: WorldTarget> Executor<T> {
    pub fn new(target: T, config: ExecutorConfig) -> Self {
        let limiter = RateLimiter::new(config.placements_per_second, target.channel());
        Self {
            target,
            config,
            limiter,
            cancel: CancelHandle::default(),
            agent: None,
        }
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub fn target(&self) -> &T {
        &self.target
    }

    pub fn target_mut(&mut self) -> &mut T {
        &mut self.target
    }

    pub fn into_target(self) -> T {
        self.target
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Run `plan` for the build currently active in `state`, from step 0 or
    /// from the resume point. Plan coordinates are offset by the build's start
    /// position.
    pub async fn execute<H: EventHandler>(
        &mut self,
        plan: &PlacementPlan,
        state: &mut StateManager,
        resume: Option<&ResumeDescriptor>,
        events: &mut H,
    ) -> Result<BuildReport> {
        let started = Instant::now();
        let active = state.active().ok_or(Error::NoActiveBuild)?;
        let recorded = match resume {
            Some(r) => r.plan_hash().to_string(),
            None => active.blueprint_summary.plan_hash.clone(),
        };
        if recorded != plan.hash {
            return Err(Error::PlanMismatch {
                recorded,
                actual: plan.hash.clone(),
            });
        }
        let build_id = active.build_id.clone();
        let origin = active.start_pos;
        let start_step = resume.map(|r| r.resume_from_step).unwrap_or(0);

        let steps = plan.steps();
        let mut report = BuildReport {
            build_id: build_id.clone(),
            plan_hash: plan.hash.clone(),
            total_steps: steps.len(),
            resumed_from_step: start_step,
            steps_completed: start_step.min(steps.len()),
            ..BuildReport::default()
        };
        self.cancel.reset();
        self.agent = self.target.agent_position().await.ok().flatten();

        info!(
            build_id = %build_id,
            steps = steps.len(),
            resume_from_step = start_step,
            "executing plan"
        );
        events.on_event(BuildEvent::Started {
            build_id: build_id.clone(),
            total_steps: steps.len(),
            resume_from_step: start_step,
        });

        for step in steps.iter().skip(start_step) {
            if self.cancel.is_cancelled() {
                self.stop(step.index, state, &mut report, events);
                report.elapsed_ms = started.elapsed().as_millis() as u64;
                return Ok(report);
            }
            if !self.run_step(plan, step, origin, state, &mut report, events).await? {
                report.elapsed_ms = started.elapsed().as_millis() as u64;
                return Ok(report);
            }
        }

        state.complete_build()?;
        self.collect_persistence_errors(state, &mut report, None);
        report.elapsed_ms = started.elapsed().as_millis() as u64;
        info!(
            build_id = %build_id,
            placed = report.placed,
            failed = report.failed,
            skipped = report.skipped,
            unverified = report.unverified,
            "build completed"
        );
        events.on_event(BuildEvent::Finished {
            build_id,
            placed: report.placed,
            failed: report.failed,
        });
        Ok(report)
    }

    /// Returns `false` when the step was interrupted by cancellation.
    async fn run_step<H: EventHandler>(
        &mut self,
        plan: &PlacementPlan,
        step: &Step,
        origin: BlockPos,
        state: &mut StateManager,
        report: &mut BuildReport,
        events: &mut H,
    ) -> Result<bool> {
        state.set_current_step(step.index)?;
        let (placed_before, failed_before) = (report.placed, report.failed);
        debug!(step = step.index, bulk = step.bulk.len(), discrete = step.discrete.len(), "step started");
        events.on_event(BuildEvent::StepStarted {
            index: step.index,
            bulk_ops: step.bulk.len(),
            placements: step.discrete.len(),
        });

        for op in &plan.bulk_ops[step.bulk.clone()] {
            if self.cancel.is_cancelled() {
                self.stop(step.index, state, report, events);
                return Ok(false);
            }
            self.run_bulk_op(&op.translated(origin), step.index, state, report, events).await?;
        }

        let cells = self.order_cells(
            plan.discrete_placements[step.discrete.clone()]
                .iter()
                .map(|d| (d.pos().translate(origin), d.block.as_str()))
                .collect(),
            origin,
        );

        for action in self.plan_actions(&cells) {
            if self.cancel.is_cancelled() {
                self.stop(step.index, state, report, events);
                return Ok(false);
            }
            match action {
                Action::Station { vantage, cells } => {
                    if self.agent != Some(vantage) {
                        self.move_and_wait(vantage, step.index, report, events).await?;
                    }
                    events.on_event(BuildEvent::StationReached { vantage, cells });
                }
                Action::Place { index, ensure_reach } => {
                    let (pos, block) = cells[index];
                    if ensure_reach {
                        let reach = self.target.reach();
                        if !self.agent.is_some_and(|a| in_reach(a, pos, reach)) {
                            self.move_and_wait(pos, step.index, report, events).await?;
                        }
                    }
                    self.place_block(pos, block, step.index, state, report, events).await?;
                }
            }
        }

        state.complete_step(step.index)?;
        self.collect_persistence_errors(state, report, Some(step.index));
        report.steps_completed += 1;
        events.on_event(BuildEvent::StepCompleted {
            index: step.index,
            placed: report.placed - placed_before,
            failed: report.failed - failed_before,
        });
        Ok(true)
    }

    /// Order by height, then distance from the agent, then block.
    fn order_cells<'a>(&self, mut cells: Vec<(BlockPos, &'a str)>, origin: BlockPos) -> Vec<(BlockPos, &'a str)> {
        let agent = self.agent.unwrap_or(origin);
        cells.sort_by(|(a, ab), (b, bb)| {
            a.y.cmp(&b.y)
                .then_with(|| agent.distance_to(*a).total_cmp(&agent.distance_to(*b)))
                .then_with(|| ab.cmp(bb))
        });
        cells
    }

    fn plan_actions(&self, cells: &[(BlockPos, &str)]) -> Vec<Action> {
        match self.config.movement {
            MovementMode::Stations => {
                let positions: Vec<BlockPos> = cells.iter().map(|(p, _)| *p).collect();
                let start = self.agent.unwrap_or_else(|| positions.first().copied().unwrap_or_default());
                let mut actions = Vec::with_capacity(cells.len());
                for station in plan_stations(&positions, self.target.reach(), start) {
                    actions.push(Action::Station {
                        vantage: station.vantage,
                        cells: station.cells.len(),
                    });
                    actions.extend(station.cells.into_iter().map(|index| Action::Place {
                        index,
                        ensure_reach: false,
                    }));
                }
                actions
            }
            MovementMode::Sequential => (0..cells.len())
                .map(|index| Action::Place { index, ensure_reach: true })
                .collect(),
            MovementMode::None => (0..cells.len())
                .map(|index| Action::Place { index, ensure_reach: false })
                .collect(),
        }
    }

    fn stop<H: EventHandler>(&mut self, step: usize, state: &mut StateManager, report: &mut BuildReport, events: &mut H) {
        state.flush();
        self.collect_persistence_errors(state, report, Some(step));
        report.cancelled = true;
        info!(step, "build cancelled; progress kept for resume");
        events.on_event(BuildEvent::Cancelled { step });
    }

    fn collect_persistence_errors(&self, state: &mut StateManager, report: &mut BuildReport, step: Option<usize>) {
        for e in state.take_persistence_errors() {
            report.warn(step, ErrorClass::Persistence, e);
        }
    }

    async fn run_bulk_op<H: EventHandler>(
        &mut self,
        op: &BulkRegionOp,
        step: usize,
        state: &mut StateManager,
        report: &mut BuildReport,
        events: &mut H,
    ) -> Result<()> {
        let attempts = self.config.retry.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            self.limiter.acquire().await;
            match self.target.run_bulk(op).await {
                Ok(changed) => {
                    debug!(op = %op.id, command = op.command.as_str(), changed, "bulk op issued");
                    report.bulk_ops_issued += 1;
                    state.record_bulk_op(BulkOpRecord {
                        id: op.id.clone(),
                        command: op.command.as_str().to_string(),
                        block: op.block.clone(),
                        changed,
                        step,
                    })?;
                    events.on_event(BuildEvent::BulkOpIssued { id: op.id.clone(), changed });
                    return Ok(());
                }
                Err(e) if e.is_connection_loss() => {
                    warn!(op = %op.id, error = %e, "target lost during bulk op");
                    return Err(e);
                }
                Err(e) => {
                    last_error = e.to_string();
                    let backoff = self.config.retry.backoff(attempt);
                    debug!(op = %op.id, attempt, error = %e, backoff_ms = backoff.as_millis() as u64, "bulk op failed");
                    tokio::time::sleep(backoff).await;
                }
            }
        }
        warn!(op = %op.id, error = %last_error, "bulk op failed after retries");
        report.bulk_ops_failed += 1;
        report.warn(
            Some(step),
            ErrorClass::Placement,
            format!("bulk op {} failed: {}", op.id, last_error),
        );
        events.on_event(BuildEvent::BulkOpFailed {
            id: op.id.clone(),
            error: last_error,
        });
        Ok(())
    }

    async fn place_block<H: EventHandler>(
        &mut self,
        pos: BlockPos,
        block: &str,
        step: usize,
        state: &mut StateManager,
        report: &mut BuildReport,
        events: &mut H,
    ) -> Result<()> {
        let (outcome, previous) = self.place_with_retry(pos, block, events).await?;
        match outcome {
            Outcome::Placed { attempts } => {
                report.placed += 1;
                state.update_progress(ProgressDelta::placed())?;
                events.on_event(BuildEvent::BlockPlaced { pos, block: block.to_string(), attempts });
            }
            Outcome::Skipped => {
                report.placed += 1;
                report.skipped += 1;
                state.update_progress(ProgressDelta::skipped())?;
                events.on_event(BuildEvent::BlockSkipped { pos });
                return Ok(());
            }
            Outcome::Unverified { reason } => {
                debug!(x = pos.x, y = pos.y, z = pos.z, reason = %reason, "placement unverified");
                report.placed += 1;
                report.unverified += 1;
                report.warn(
                    Some(step),
                    ErrorClass::Environment,
                    format!("{} at {},{},{} unverified: {}", block, pos.x, pos.y, pos.z, reason),
                );
                state.update_progress(ProgressDelta::unverified())?;
                events.on_event(BuildEvent::BlockUnverified { pos, reason });
            }
            Outcome::Failed { error } => {
                warn!(x = pos.x, y = pos.y, z = pos.z, block, error = %error, "placement failed");
                report.failed += 1;
                report.warn(
                    Some(step),
                    ErrorClass::Placement,
                    format!("{} at {},{},{}: {}", block, pos.x, pos.y, pos.z, error),
                );
                state.update_progress(ProgressDelta::failed())?;
                events.on_event(BuildEvent::BlockFailed { pos, block: block.to_string(), error });
                return Ok(());
            }
        }
        state.record_undo(UndoEntry {
            pos,
            previous,
            placed: block.to_string(),
        })
    }

    /// Returns the outcome and the block the cell held beforehand, if it could
    /// be read. Losing the target is an error; anything else is an outcome.
    async fn place_with_retry<H: EventHandler>(
        &mut self,
        pos: BlockPos,
        block: &str,
        events: &mut H,
    ) -> Result<(Outcome, Option<String>)> {
        let previous = match self.target.read_block(pos).await {
            Ok(ReadResult::Block(current)) => {
                if same_block(&current, block) {
                    return Ok((Outcome::Skipped, Some(current)));
                }
                Some(current)
            }
            Ok(_) => None,
            Err(e) if e.is_connection_loss() => return Err(e),
            Err(e) => {
                debug!(x = pos.x, y = pos.y, z = pos.z, error = %e, "pre-read failed");
                None
            }
        };

        let attempts = self.config.retry.max_attempts.max(1);
        let mut last_error = String::new();
        for attempt in 1..=attempts {
            self.limiter.acquire().await;
            let error = match self.target.set_block(pos, block).await {
                Ok(()) => match self.verify(pos, block).await? {
                    Verification::Confirmed => return Ok((Outcome::Placed { attempts: attempt }, previous)),
                    Verification::Unverified(reason) => return Ok((Outcome::Unverified { reason }, previous)),
                    Verification::Mismatch(msg) => msg,
                },
                Err(e) if e.is_connection_loss() => return Err(e),
                Err(e) => e.to_string(),
            };
            let backoff = self.config.retry.backoff(attempt);
            debug!(x = pos.x, y = pos.y, z = pos.z, attempt, error = %error, "placement attempt failed");
            events.on_event(BuildEvent::AttemptFailed {
                pos,
                attempt,
                backoff_ms: backoff.as_millis() as u64,
                error: error.clone(),
            });
            tokio::time::sleep(backoff).await;
            last_error = error;
        }
        Ok((Outcome::Failed { error: last_error }, previous))
    }

    async fn verify(&mut self, pos: BlockPos, block: &str) -> Result<Verification> {
        let reach = self.target.reach();
        if self.target.mode() == GameMode::Creative && self.agent.is_some_and(|a| in_reach(a, pos, reach)) {
            return Ok(Verification::Confirmed);
        }
        tokio::time::sleep(Duration::from_millis(self.config.settle_delay_ms)).await;
        Ok(match self.target.read_block(pos).await {
            Ok(ReadResult::Block(found)) if same_block(&found, block) => Verification::Confirmed,
            Ok(ReadResult::Block(found)) => Verification::Mismatch(format!("expected {}, found {}", block, found)),
            Ok(ReadResult::Unloaded) => match self.config.unverifiable_policy {
                UnverifiablePolicy::AssumeSuccess => Verification::Unverified("chunk not loaded".into()),
                UnverifiablePolicy::TreatAsFailure => Verification::Mismatch("chunk not loaded".into()),
            },
            Ok(ReadResult::Unavailable) => Verification::Unverified("no verification channel".into()),
            Err(e) if e.is_connection_loss() => return Err(e),
            Err(e) => Verification::Mismatch(format!("read-back failed: {}", e)),
        })
    }

    /// Ask the agent to move, then poll its position until it arrives or the
    /// move times out. A timeout is only a warning.
    async fn move_and_wait<H: EventHandler>(
        &mut self,
        dest: BlockPos,
        step: usize,
        report: &mut BuildReport,
        events: &mut H,
    ) -> Result<()> {
        report.moves += 1;
        match self.target.move_to(dest).await {
            Ok(()) => {}
            Err(e) if e.is_connection_loss() => return Err(e),
            Err(e) => {
                warn!(error = %e, "move request failed");
                report.warn(Some(step), ErrorClass::Movement, format!("move to {},{},{} failed: {}", dest.x, dest.y, dest.z, e));
                return Ok(());
            }
        }
        let deadline = Instant::now() + Duration::from_millis(self.config.move_timeout_ms);
        loop {
            match self.target.agent_position().await {
                Ok(Some(p)) => {
                    self.agent = Some(p);
                    if p.distance_to(dest) <= self.config.arrival_tolerance {
                        return Ok(());
                    }
                }
                Ok(None) => {}
                Err(e) if e.is_connection_loss() => return Err(e),
                Err(e) => debug!(error = %e, "position poll failed"),
            }
            if Instant::now() >= deadline {
                warn!(x = dest.x, y = dest.y, z = dest.z, "agent did not arrive before move timeout");
                report.move_timeouts += 1;
                report.warn(
                    Some(step),
                    ErrorClass::Movement,
                    format!("move to {},{},{} timed out", dest.x, dest.y, dest.z),
                );
                events.on_event(BuildEvent::MoveTimedOut { target: dest });
                return Ok(());
            }
            tokio::time::sleep(Duration::from_millis(self.config.move_poll_interval_ms)).await;
        }
    }

    /// Restore the previous block of the `count` most recent placements.
    /// Cells whose previous block was never observed are cleared to air.
    pub async fn undo(&mut self, state: &mut StateManager, count: usize) -> Result<usize> {
        let entries = state.take_undo(count)?;
        let mut restored = 0;
        for entry in entries {
            let block = entry.previous.as_deref().unwrap_or("air");
            self.limiter.acquire().await;
            match self.target.set_block(entry.pos, block).await {
                Ok(()) => restored += 1,
                Err(e) if e.is_connection_loss() => return Err(e),
                Err(e) => warn!(x = entry.pos.x, y = entry.pos.y, z = entry.pos.z, error = %e, "undo failed"),
            }
        }
        info!(restored, "undo finished");
        Ok(restored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::{BlueprintSummary, BuildStatus};
    use crate::target::{Channel, SimulatedWorld};
    use std::collections::HashMap;
    use structure_plan::{
        compile_placement, BulkCommand, Checkpoint, ComponentNode, DiscretePlacement, PlacementOptions,
        PlacementStats, PlanCompiler, Region, Scene, ServerContext, Strategy,
    };
    use serde_json::json;

    fn p(x: i32, y: i32, z: i32) -> BlockPos {
        BlockPos::new(x, y, z)
    }

    fn test_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("structure-builder-exec-{}-{}", std::process::id(), name));
        let _ = std::fs::remove_dir_all(&dir);
        dir
    }

    /// Hand-built plan with one checkpoint every `per_step` placements.
    fn discrete_plan(cells: &[(BlockPos, &str)], per_step: usize) -> PlacementPlan {
        let discrete_placements: Vec<DiscretePlacement> = cells
            .iter()
            .enumerate()
            .map(|(i, (pos, block))| DiscretePlacement {
                x: pos.x,
                y: pos.y,
                z: pos.z,
                block: block.to_string(),
                batch_id: (i / 64) as u32,
            })
            .collect();
        let mut checkpoints = Vec::new();
        for end in (per_step..=cells.len()).step_by(per_step.max(1)) {
            checkpoints.push(Checkpoint {
                id: format!("cp-{:04}", checkpoints.len()),
                after_bulk_op_index: None,
                after_discrete_index: Some(end - 1),
            });
        }
        if cells.len() % per_step != 0 {
            checkpoints.push(Checkpoint {
                id: format!("cp-{:04}", checkpoints.len()),
                after_bulk_op_index: None,
                after_discrete_index: Some(cells.len() - 1),
            });
        }
        PlacementPlan {
            plan_id: "test".into(),
            hash: "test-hash".into(),
            strategy: Strategy::Discrete,
            bulk_ops: Vec::new(),
            discrete_placements,
            checkpoints,
            stats: PlacementStats::default(),
        }
    }

    fn summary_for(plan: &PlacementPlan) -> BlueprintSummary {
        BlueprintSummary {
            scene_ids: vec!["test".into()],
            seed: 1,
            plan_id: plan.plan_id.clone(),
            plan_hash: plan.hash.clone(),
            total_steps: plan.checkpoints.len(),
            total_items: plan.total_items(),
        }
    }

    fn compiled_plan(interval: u64) -> PlacementPlan {
        let scene = Scene::new("hamlet", "rustic")
            .with_component(
                ComponentNode::new("base", "foundation")
                    .with_params(json!({"width": 9, "depth": 9}))
                    .with_child(ComponentNode::new("hut", "room").at(1, 1, 1).with_params(json!({"width": 7, "depth": 7}))),
            )
            .with_component(ComponentNode::new("lane", "path").at(0, 0, 11).with_params(json!({"length": 14})))
            .with_component(ComponentNode::new("post", "pillar").at(12, 0, 0).with_params(json!({"height": 5})));
        let plan = PlanCompiler::default().compile(&scene, 9, &ServerContext::default()).unwrap();
        let opts = PlacementOptions { checkpoint_interval: interval, ..Default::default() };
        compile_placement(&plan, &opts).unwrap()
    }

    fn expected_world(plan: &PlacementPlan, origin: BlockPos) -> HashMap<BlockPos, String> {
        let mut world = HashMap::new();
        for op in &plan.bulk_ops {
            for (pos, block) in op.translated(origin).cells() {
                world.insert(pos, block);
            }
        }
        for d in &plan.discrete_placements {
            world.insert(d.pos().translate(origin), d.block.clone());
        }
        world
    }

    fn fast_executor(world: SimulatedWorld) -> Executor<SimulatedWorld> {
        ExecutorBuilder::new().movement(MovementMode::None).build(world)
    }

    #[tokio::test(start_paused = true)]
    async fn test_full_build_matches_plan() {
        let plan = compiled_plan(60);
        let origin = p(100, 64, -40);
        let mut state = StateManager::open(test_dir("full"));
        let build_id = state.start_build(summary_for(&plan), origin);

        let mut executor = fast_executor(SimulatedWorld::new());
        let mut events = EventCollector::new();
        let report = executor.execute(&plan, &mut state, None, &mut events).await.unwrap();

        assert!(report.is_complete());
        assert_eq!(report.failed, 0);
        assert_eq!(report.placed, plan.discrete_placements.len() as u64);
        assert_eq!(report.bulk_ops_issued, plan.bulk_ops.len() as u64);
        for (pos, block) in expected_world(&plan, origin) {
            assert_eq!(executor.target().block_at(pos).unwrap_or("air"), block, "at {:?}", pos);
        }
        assert!(matches!(events.events().last(), Some(BuildEvent::Finished { .. })));

        let stored = state.list_builds().unwrap();
        let record = stored.iter().find(|b| b.build_id == build_id).unwrap();
        assert!(record.status.is_terminal());
        assert_eq!(record.progress.completed_steps.len(), plan.checkpoints.len());
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_exhaustion_backs_off() {
        let target = p(2, 0, 0);
        let plan = discrete_plan(&[(target, "stone")], 1);
        let mut state = StateManager::open(test_dir("retry"));
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);

        let mut world = SimulatedWorld::new();
        world.drop_sets_at(target);
        let mut executor = fast_executor(world);
        let mut events = EventCollector::new();
        let start = Instant::now();
        let report = executor.execute(&plan, &mut state, None, &mut events).await.unwrap();

        assert_eq!(report.failed, 1);
        assert_eq!(report.placed, 0);
        assert_eq!(executor.target().calls.set, 3);
        let backoffs: Vec<u64> = events
            .events()
            .iter()
            .filter_map(|e| match e {
                BuildEvent::AttemptFailed { backoff_ms, .. } => Some(*backoff_ms),
                _ => None,
            })
            .collect();
        assert_eq!(backoffs, vec![50, 100, 200]);
        assert!(start.elapsed() >= Duration::from_millis(350));
        assert_eq!(report.warnings_of(ErrorClass::Placement).count(), 1);
        // a failed placement does not stop the build
        assert!(report.is_complete());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_rejection_recovers() {
        let target = p(1, 0, 0);
        let plan = discrete_plan(&[(target, "oak_planks")], 1);
        let mut state = StateManager::open(test_dir("transient"));
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);

        let mut world = SimulatedWorld::new();
        world.reject_next_sets(target, 2);
        let mut executor = fast_executor(world);
        let mut events = EventCollector::new();
        let report = executor.execute(&plan, &mut state, None, &mut events).await.unwrap();

        assert_eq!(report.placed, 1);
        assert_eq!(report.failed, 0);
        assert!(events
            .events()
            .iter()
            .any(|e| matches!(e, BuildEvent::BlockPlaced { attempts: 3, .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_existing_block_is_skipped() {
        let target = p(0, 1, 0);
        let plan = discrete_plan(&[(target, "minecraft:stone_bricks")], 1);
        let mut state = StateManager::open(test_dir("skip"));
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);

        let mut world = SimulatedWorld::new();
        world.put(target, "stone_bricks");
        let mut executor = fast_executor(world);
        let report = executor.execute(&plan, &mut state, None, &mut EventCollector::new()).await.unwrap();

        assert_eq!(report.skipped, 1);
        assert_eq!(report.placed, 1);
        assert_eq!(executor.target().calls.set, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_wrong_facing_stair_is_replaced() {
        let target = p(0, 0, 0);
        let plan = discrete_plan(&[(target, "oak_stairs[facing=east]")], 1);
        let mut state = StateManager::open(test_dir("stair-facing"));
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);

        let mut world = SimulatedWorld::new();
        world.put(target, "oak_stairs[facing=north]");
        let mut executor = fast_executor(world);
        let report = executor.execute(&plan, &mut state, None, &mut EventCollector::new()).await.unwrap();

        assert_eq!(report.skipped, 0);
        assert_eq!((report.placed, report.failed), (1, 0));
        assert_eq!(executor.target().calls.set, 1);
        assert_eq!(executor.target().block_at(target), Some("oak_stairs[facing=east]"));
    }

    #[test]
    fn test_same_block_compares_requested_state() {
        assert!(same_block("minecraft:stone", "stone"));
        assert!(same_block("oak_stairs[facing=east]", "oak_stairs"));
        assert!(same_block(
            "minecraft:oak_stairs[half=bottom,facing=east,waterlogged=false]",
            "oak_stairs[facing=east, half=bottom]"
        ));
        assert!(!same_block("oak_stairs[facing=north]", "oak_stairs[facing=east]"));
        assert!(!same_block("oak_stairs", "oak_stairs[facing=east]"));
        assert!(!same_block("oak_door[half=lower]", "oak_door[half=upper]"));
        assert!(!same_block("spruce_stairs[facing=east]", "oak_stairs[facing=east]"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unloaded_policy() {
        let target = p(40, 0, 40);
        let plan = discrete_plan(&[(target, "glass")], 1);
        let unloaded = || {
            let mut world = SimulatedWorld::new();
            world.unload(structure_plan::Bounds::from_corners(p(32, -64, 32), p(47, 320, 47)));
            world
        };

        let mut state = StateManager::open(test_dir("unloaded-assume"));
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);
        let mut executor = fast_executor(unloaded());
        let report = executor.execute(&plan, &mut state, None, &mut EventCollector::new()).await.unwrap();
        assert_eq!((report.placed, report.unverified, report.failed), (1, 1, 0));
        assert_eq!(report.warnings_of(ErrorClass::Environment).count(), 1);

        let mut state = StateManager::open(test_dir("unloaded-strict"));
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);
        let mut executor = ExecutorBuilder::new()
            .movement(MovementMode::None)
            .unverifiable_policy(UnverifiablePolicy::TreatAsFailure)
            .build(unloaded());
        let report = executor.execute(&plan, &mut state, None, &mut EventCollector::new()).await.unwrap();
        assert_eq!((report.placed, report.failed), (0, 1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_no_verification_channel_counts_unverified() {
        let plan = discrete_plan(&[(p(0, 0, 0), "dirt"), (p(1, 0, 0), "dirt")], 2);
        let mut state = StateManager::open(test_dir("blind"));
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);
        let mut executor = fast_executor(SimulatedWorld::new().without_verification());
        let report = executor.execute(&plan, &mut state, None, &mut EventCollector::new()).await.unwrap();
        assert_eq!((report.placed, report.unverified, report.failed), (2, 2, 0));
    }

    #[tokio::test(start_paused = true)]
    async fn test_creative_in_reach_skips_read_back() {
        let plan = discrete_plan(&[(p(1, 0, 0), "stone")], 1);
        let mut state = StateManager::open(test_dir("creative"));
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);
        let mut executor = fast_executor(SimulatedWorld::new().with_mode(GameMode::Creative));
        let report = executor.execute(&plan, &mut state, None, &mut EventCollector::new()).await.unwrap();
        assert_eq!(report.placed, 1);
        // pre-read only
        assert_eq!(executor.target().calls.read, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_then_resume_completes_structure() {
        let plan = compiled_plan(10);
        assert!(plan.checkpoints.len() > 3);
        let origin = p(0, 70, 0);
        let dir = test_dir("resume");

        let mut state = StateManager::open(&dir);
        let build_id = state.start_build(summary_for(&plan), origin);
        let mut executor = fast_executor(SimulatedWorld::new());
        let cancel = executor.cancel_handle();
        let mut stop_after_two = move |e: BuildEvent| {
            if let BuildEvent::StepCompleted { index: 1, .. } = e {
                cancel.cancel();
            }
        };
        let first = executor.execute(&plan, &mut state, None, &mut stop_after_two).await.unwrap();
        assert!(first.cancelled);
        assert_eq!(first.steps_completed, 2);

        let world = executor.into_target();
        let mut fresh = StateManager::open(&dir);
        let resume = fresh.prepare_resume(None).unwrap().unwrap();
        assert_eq!(resume.build_id, build_id);
        assert_eq!(resume.resume_from_step, 2);
        assert_eq!(resume.completed_steps, vec![0, 1]);

        let mut executor = fast_executor(world);
        let second = executor
            .execute(&plan, &mut fresh, Some(&resume), &mut EventCollector::new())
            .await
            .unwrap();
        assert!(second.is_complete());
        assert_eq!(second.resumed_from_step, 2);
        for (pos, block) in expected_world(&plan, origin) {
            assert_eq!(executor.target().block_at(pos).unwrap_or("air"), block);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_target_leaves_build_resumable() {
        let cells: Vec<(BlockPos, &str)> = (0..10).map(|x| (p(x, 0, 0), "stone")).collect();
        let plan = discrete_plan(&cells, 1);
        let dir = test_dir("disconnect");
        let mut state = StateManager::open(&dir);
        let build_id = state.start_build(summary_for(&plan), BlockPos::ORIGIN);

        let mut world = SimulatedWorld::new();
        // the third placement lands, then its read-back hits a dead link
        world.disconnect_after_sets(3);
        let mut executor = fast_executor(world);
        let err = executor
            .execute(&plan, &mut state, None, &mut EventCollector::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Disconnected { .. }));
        assert_eq!(executor.target().calls.set, 3);
        state.flush();

        let mut fresh = StateManager::open(&dir);
        let record = fresh
            .list_builds()
            .unwrap()
            .into_iter()
            .find(|b| b.build_id == build_id)
            .unwrap();
        assert_eq!(record.status, BuildStatus::InProgress);
        let resume = fresh.prepare_resume(None).unwrap().unwrap();
        assert_eq!(resume.completed_steps, vec![0, 1]);
        assert_eq!(resume.resume_from_step, 2);

        let mut relinked = SimulatedWorld::new();
        for (pos, block) in executor.target().blocks() {
            relinked.put(*pos, block.clone());
        }
        let mut executor = fast_executor(relinked);
        let report = executor
            .execute(&plan, &mut fresh, Some(&resume), &mut EventCollector::new())
            .await
            .unwrap();
        assert!(report.is_complete());
        // the interrupted cell already landed
        assert_eq!(report.skipped, 1);
        for (pos, block) in cells {
            assert_eq!(executor.target().block_at(pos), Some(block));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_target_during_bulk_op_is_not_retried() {
        let mut plan = discrete_plan(&[(p(0, 5, 0), "lantern")], 1);
        plan.bulk_ops.push(BulkRegionOp {
            id: "slab".into(),
            command: BulkCommand::Fill,
            block: "stone".into(),
            region: Region::Extent { from: p(0, 0, 0), to: p(9, 0, 9) },
            hollow: false,
            estimated_block_count: 100,
            checkpoint_after: false,
        });
        let mut state = StateManager::open(test_dir("bulk-disconnect"));
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);
        let mut world = SimulatedWorld::new();
        world.disconnect_after_sets(0);
        let mut executor = fast_executor(world);
        let err = executor
            .execute(&plan, &mut state, None, &mut EventCollector::new())
            .await
            .unwrap_err();
        assert!(err.is_connection_loss());
        assert_eq!(executor.target().calls.bulk, 1);
        assert_eq!(state.active().map(|b| b.status), Some(BuildStatus::InProgress));
    }

    #[tokio::test(start_paused = true)]
    async fn test_resume_refuses_changed_plan() {
        let plan = discrete_plan(&[(p(0, 0, 0), "stone")], 1);
        let dir = test_dir("mismatch");
        let mut state = StateManager::open(&dir);
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);
        let resume = {
            let mut fresh = StateManager::open(&dir);
            fresh.prepare_resume(None).unwrap().unwrap()
        };

        let mut changed = plan.clone();
        changed.hash = "other-hash".into();
        let mut executor = fast_executor(SimulatedWorld::new());
        let err = executor
            .execute(&changed, &mut state, Some(&resume), &mut EventCollector::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::PlanMismatch { .. }));
        assert_eq!(executor.target().calls.set, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stations_keep_every_cell_in_reach() {
        let cells: Vec<(BlockPos, &str)> = (0..40).map(|x| (p(x, 0, 0), "cobblestone")).collect();
        let plan = discrete_plan(&cells, 40);
        let mut state = StateManager::open(test_dir("stations"));
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);

        let world = SimulatedWorld::new().with_enforced_reach().with_agent(p(0, 0, 0));
        let mut executor = ExecutorBuilder::new().movement(MovementMode::Stations).build(world);
        let mut events = EventCollector::new();
        let report = executor.execute(&plan, &mut state, None, &mut events).await.unwrap();

        assert_eq!(report.failed, 0);
        assert_eq!(report.placed, 40);
        let stations = events
            .events()
            .iter()
            .filter(|e| matches!(e, BuildEvent::StationReached { .. }))
            .count();
        assert_eq!(stations, 8);
    }

    #[tokio::test(start_paused = true)]
    async fn test_without_movement_far_cells_fail() {
        let plan = discrete_plan(&[(p(30, 0, 0), "stone")], 1);
        let mut state = StateManager::open(test_dir("no-move"));
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);
        let mut executor = fast_executor(SimulatedWorld::new().with_enforced_reach());
        let report = executor.execute(&plan, &mut state, None, &mut EventCollector::new()).await.unwrap();
        assert_eq!(report.failed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_move_timeout_is_a_warning() {
        let plan = discrete_plan(&[(p(30, 0, 0), "stone")], 1);
        let mut state = StateManager::open(test_dir("stuck"));
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);
        let mut world = SimulatedWorld::new();
        world.set_stuck(true);
        let mut executor = ExecutorBuilder::new().movement(MovementMode::Sequential).build(world);
        let start = Instant::now();
        let report = executor.execute(&plan, &mut state, None, &mut EventCollector::new()).await.unwrap();

        assert_eq!(report.move_timeouts, 1);
        assert_eq!(report.warnings_of(ErrorClass::Movement).count(), 1);
        assert!(start.elapsed() >= Duration::from_millis(3000));
        // unenforced reach: the placement still lands
        assert_eq!(report.placed, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_bulk_failure_is_reported_and_build_continues() {
        let mut plan = discrete_plan(&[(p(0, 5, 0), "lantern")], 1);
        plan.bulk_ops.push(BulkRegionOp {
            id: "slab".into(),
            command: BulkCommand::Fill,
            block: "stone".into(),
            region: Region::Extent { from: p(0, 0, 0), to: p(9, 0, 9) },
            hollow: false,
            estimated_block_count: 100,
            checkpoint_after: false,
        });
        let mut state = StateManager::open(test_dir("bulk-fail"));
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);
        let mut world = SimulatedWorld::new();
        world.reject_next_bulk(3);
        let mut executor = fast_executor(world);
        let report = executor.execute(&plan, &mut state, None, &mut EventCollector::new()).await.unwrap();

        assert_eq!(report.bulk_ops_failed, 1);
        assert_eq!(report.bulk_ops_issued, 0);
        assert_eq!(report.placed, 1);
        assert_eq!(executor.target().calls.bulk, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_text_channel_is_throttled() {
        let cells: Vec<(BlockPos, &str)> = (0..5).map(|x| (p(x, 0, 0), "stone")).collect();
        let plan = discrete_plan(&cells, 5);
        let mut state = StateManager::open(test_dir("throttle"));
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);
        let world = SimulatedWorld::new().with_channel(Channel::TextCommand);
        let mut executor = ExecutorBuilder::new()
            .movement(MovementMode::None)
            .placements_per_second(1000.0)
            .settle_delay(Duration::ZERO)
            .build(world);
        let start = Instant::now();
        executor.execute(&plan, &mut state, None, &mut EventCollector::new()).await.unwrap();
        assert!(start.elapsed() >= Duration::from_millis(400));
    }

    #[tokio::test(start_paused = true)]
    async fn test_undo_restores_previous_blocks() {
        let cells = [
            (p(0, 0, 0), "gold_block"),
            (p(1, 0, 0), "gold_block"),
            (p(2, 0, 0), "gold_block"),
            (p(3, 0, 0), "gold_block"),
        ];
        let plan = discrete_plan(&cells, 3);
        let dir = test_dir("undo");
        let mut state = StateManager::open(&dir);
        state.start_build(summary_for(&plan), BlockPos::ORIGIN);

        let mut world = SimulatedWorld::new();
        world.put(p(0, 0, 0), "grass_block");
        world.put(p(1, 0, 0), "dirt");
        let mut executor = fast_executor(world);

        // stop after the first step so the build stays open
        let cancel = executor.cancel_handle();
        let mut stop_after_first = move |e: BuildEvent| {
            if let BuildEvent::StepCompleted { index: 0, .. } = e {
                cancel.cancel();
            }
        };
        let report = executor.execute(&plan, &mut state, None, &mut stop_after_first).await.unwrap();
        assert!(report.cancelled);

        let mut undo_state = StateManager::open(&dir);
        let resume = undo_state.prepare_resume(None).unwrap().unwrap();
        assert_eq!(resume.undo_history.len(), 3);

        let restored = executor.undo(&mut undo_state, 3).await.unwrap();
        assert_eq!(restored, 3);
        let world = executor.target();
        assert_eq!(world.block_at(p(0, 0, 0)), Some("grass_block"));
        assert_eq!(world.block_at(p(1, 0, 0)), Some("dirt"));
        assert_eq!(world.block_at(p(2, 0, 0)), None);
        assert_eq!(world.block_at(p(3, 0, 0)), None);
    }

    #[test]
    fn test_retry_backoff_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.backoff(1), Duration::from_millis(50));
        assert_eq!(policy.backoff(3), Duration::from_millis(200));
        assert_eq!(policy.backoff(7), Duration::from_millis(200));
        let empty = RetryPolicy { max_attempts: 2, backoff_ms: Vec::new() };
        assert_eq!(empty.backoff(1), Duration::ZERO);
    }
}
