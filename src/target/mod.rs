//! World targets
//!
//! The executor drives any [`WorldTarget`]: an in-memory [`SimulatedWorld`]
//! for tests and dry runs, or a [`RemoteTarget`] speaking newline-delimited
//! JSON to an external mutation layer.

pub mod protocol;
pub mod remote;
pub mod simulated;

use serde::{Deserialize, Serialize};
use structure_plan::{BlockPos, BulkRegionOp};

use crate::error::Result;

pub use protocol::{CommandResult, Request, Response};
pub use remote::{bind_socket, serve_simulated, RemoteTarget, TargetInfo};
pub use simulated::SimulatedWorld;

/// Outcome of reading one cell
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "block", rename_all = "snake_case")]
pub enum ReadResult {
    Block(String),
    /// Chunk not loaded; the cell cannot be observed
    Unloaded,
    /// Target has no read-back channel
    Unavailable,
}

/// How mutations reach the world
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    #[default]
    DirectApi,
    /// Chat-style commands, subject to server-side throttling
    TextCommand,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    #[default]
    Survival,
    Creative,
}

#[allow(async_fn_in_trait)]
pub trait WorldTarget {
    async fn set_block(&mut self, pos: BlockPos, block: &str) -> Result<()>;

    async fn read_block(&mut self, pos: BlockPos) -> Result<ReadResult>;

    /// Issue one region command; returns the number of cells the target reports changed.
    async fn run_bulk(&mut self, op: &BulkRegionOp) -> Result<u64>;

    /// Start moving the agent toward `pos`. Arrival is observed through `agent_position`.
    async fn move_to(&mut self, pos: BlockPos) -> Result<()>;

    async fn agent_position(&mut self) -> Result<Option<BlockPos>>;

    fn channel(&self) -> Channel;

    fn mode(&self) -> GameMode;

    /// Placement reach of the agent in blocks.
    fn reach(&self) -> f64;
}
