//! In-memory world with scriptable faults

use ahash::{AHashMap, AHashSet};
use structure_plan::{BlockPos, Bounds, BulkRegionOp, Shape};
use tracing::trace;

use super::{Channel, GameMode, ReadResult, WorldTarget};
use crate::error::{Error, Result};

/// Default survival reach, in blocks
pub const DEFAULT_REACH: f64 = 5.0;

#[derive(Debug, Clone, Default)]
pub struct CallCounts {
    pub set: usize,
    pub read: usize,
    pub bulk: usize,
    pub moves: usize,
    pub position_polls: usize,
}

#[derive(Debug, Clone)]
pub struct SimulatedWorld {
    blocks: AHashMap<BlockPos, String>,
    unloaded: Vec<Bounds>,
    /// Remaining rejections per cell
    reject_set: AHashMap<BlockPos, u32>,
    /// Cells where sets report success but never stick
    drop_set: AHashSet<BlockPos>,
    reject_bulk: u32,
    /// Link drops once this many sets have succeeded
    disconnect_after: Option<usize>,
    verification: bool,
    agent: BlockPos,
    pending_move: Option<(BlockPos, u32)>,
    move_lag_polls: u32,
    stuck: bool,
    enforce_reach: bool,
    channel: Channel,
    mode: GameMode,
    reach: f64,
    pub calls: CallCounts,
    /// Every successful `set_block`, in order
    pub set_log: Vec<(BlockPos, String)>,
}

impl Default for SimulatedWorld {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedWorld {
    pub fn new() -> Self {
        Self {
            blocks: AHashMap::new(),
            unloaded: Vec::new(),
            reject_set: AHashMap::new(),
            drop_set: AHashSet::new(),
            reject_bulk: 0,
            disconnect_after: None,
            verification: true,
            agent: BlockPos::ORIGIN,
            pending_move: None,
            move_lag_polls: 0,
            stuck: false,
            enforce_reach: false,
            channel: Channel::DirectApi,
            mode: GameMode::Survival,
            reach: DEFAULT_REACH,
            calls: CallCounts::default(),
            set_log: Vec::new(),
        }
    }

    pub fn with_mode(mut self, mode: GameMode) -> Self {
        self.mode = mode;
        self
    }

    pub fn with_channel(mut self, channel: Channel) -> Self {
        self.channel = channel;
        self
    }

    pub fn with_reach(mut self, reach: f64) -> Self {
        self.reach = reach;
        self
    }

    pub fn with_agent(mut self, pos: BlockPos) -> Self {
        self.agent = pos;
        self
    }

    /// Reject sets farther than `reach` from the agent, as survival play does.
    pub fn with_enforced_reach(mut self) -> Self {
        self.enforce_reach = true;
        self
    }

    /// Remove the read-back channel entirely.
    pub fn without_verification(mut self) -> Self {
        self.verification = false;
        self
    }

    pub fn unload(&mut self, region: Bounds) {
        self.unloaded.push(region);
    }

    pub fn reject_next_sets(&mut self, pos: BlockPos, times: u32) {
        self.reject_set.insert(pos, times);
    }

    pub fn drop_sets_at(&mut self, pos: BlockPos) {
        self.drop_set.insert(pos);
    }

    pub fn reject_next_bulk(&mut self, times: u32) {
        self.reject_bulk = times;
    }

    /// Every call fails with [`Error::Disconnected`] once `sets` placements have landed.
    pub fn disconnect_after_sets(&mut self, sets: usize) {
        self.disconnect_after = Some(sets);
    }

    /// Agent needs this many position polls to arrive after a move.
    pub fn set_move_lag(&mut self, polls: u32) {
        self.move_lag_polls = polls;
    }

    /// Agent never arrives.
    pub fn set_stuck(&mut self, stuck: bool) {
        self.stuck = stuck;
    }

    pub fn put(&mut self, pos: BlockPos, block: impl Into<String>) {
        self.blocks.insert(pos, block.into());
    }

    pub fn block_at(&self, pos: BlockPos) -> Option<&str> {
        self.blocks.get(&pos).map(String::as_str)
    }

    pub fn blocks(&self) -> &AHashMap<BlockPos, String> {
        &self.blocks
    }

    pub fn agent(&self) -> BlockPos {
        self.agent
    }

    /// Write every cell of `shape` at once, as a region command would.
    pub fn apply_shape(&mut self, shape: &Shape, block: &str) -> u64 {
        let cells = shape.rasterize(block);
        let changed = cells.len() as u64;
        for (pos, block) in cells {
            self.blocks.insert(pos, block);
        }
        changed
    }

    fn is_unloaded(&self, pos: BlockPos) -> bool {
        self.unloaded.iter().any(|b| b.contains(pos))
    }

    fn check_link(&self) -> Result<()> {
        match self.disconnect_after {
            Some(limit) if self.set_log.len() >= limit => Err(Error::Disconnected {
                reason: "simulated link dropped".into(),
            }),
            _ => Ok(()),
        }
    }
}

impl WorldTarget for SimulatedWorld {
    async fn set_block(&mut self, pos: BlockPos, block: &str) -> Result<()> {
        self.calls.set += 1;
        self.check_link()?;
        if let Some(remaining) = self.reject_set.get_mut(&pos) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(Error::Rejected {
                    command: "set_block".into(),
                    reason: format!("cell {},{},{} is protected", pos.x, pos.y, pos.z),
                });
            }
        }
        if self.enforce_reach && self.agent.distance_to(pos) > self.reach {
            return Err(Error::Rejected {
                command: "set_block".into(),
                reason: format!("cell {},{},{} is out of reach", pos.x, pos.y, pos.z),
            });
        }
        trace!(x = pos.x, y = pos.y, z = pos.z, block, "sim set");
        self.set_log.push((pos, block.to_string()));
        if !self.drop_set.contains(&pos) {
            if block == "air" {
                self.blocks.remove(&pos);
            } else {
                self.blocks.insert(pos, block.to_string());
            }
        }
        Ok(())
    }

    async fn read_block(&mut self, pos: BlockPos) -> Result<ReadResult> {
        self.calls.read += 1;
        self.check_link()?;
        if !self.verification {
            return Ok(ReadResult::Unavailable);
        }
        if self.is_unloaded(pos) {
            return Ok(ReadResult::Unloaded);
        }
        Ok(ReadResult::Block(
            self.blocks.get(&pos).cloned().unwrap_or_else(|| "air".to_string()),
        ))
    }

    async fn run_bulk(&mut self, op: &BulkRegionOp) -> Result<u64> {
        self.calls.bulk += 1;
        self.check_link()?;
        if self.reject_bulk > 0 {
            self.reject_bulk -= 1;
            return Err(Error::Rejected {
                command: op.command.as_str().to_string(),
                reason: "too many blocks in region".into(),
            });
        }
        Ok(self.apply_shape(&op.shape(), &op.block))
    }

    async fn move_to(&mut self, pos: BlockPos) -> Result<()> {
        self.calls.moves += 1;
        self.check_link()?;
        self.pending_move = Some((pos, self.move_lag_polls));
        Ok(())
    }

    async fn agent_position(&mut self) -> Result<Option<BlockPos>> {
        self.calls.position_polls += 1;
        self.check_link()?;
        match self.pending_move {
            Some(_) if self.stuck => {}
            Some((target, 0)) => {
                self.agent = target;
                self.pending_move = None;
            }
            Some((target, remaining)) => self.pending_move = Some((target, remaining - 1)),
            None => {}
        }
        Ok(Some(self.agent))
    }

    fn channel(&self) -> Channel {
        self.channel
    }

    fn mode(&self) -> GameMode {
        self.mode
    }

    fn reach(&self) -> f64 {
        self.reach
    }
}
