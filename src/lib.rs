//! Structure Builder
//!
//! Places compiled structure plans into a remote world, one verified block
//! at a time, with progress that survives crashes and disconnects.
//!
//! Architecture:
//! 1. `structure_plan` (workspace crate) - scene expansion and plan compilation
//! 2. `target` - The world being mutated: simulated or over a Unix socket
//! 3. `executor` - Retry, verification, movement and rate limiting
//! 4. `state` - Persisted build records and resume
//! 5. `session` - Compile, record and execute in one call

pub mod config;
pub mod error;
pub mod executor;
pub mod session;
pub mod state;
pub mod target;

pub use config::BuildConfig;
pub use error::{Error, Result};
pub use executor::{
    BuildEvent, BuildReport, CancelHandle, EventCollector, EventHandler, Executor, ExecutorBuilder,
    ExecutorConfig, MovementMode, RetryPolicy, UnverifiablePolicy,
};
pub use session::{compile_batch, compile_scene, BuildSession, CompiledBuild};
pub use state::{BuildState, BuildStatus, ResumeDescriptor, StateManager};
pub use target::{Channel, GameMode, ReadResult, RemoteTarget, SimulatedWorld, WorldTarget};
