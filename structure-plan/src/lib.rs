//! Structure plan compilation
//!
//! Architecture:
//! 1. `scene` - Component tree document consumed from upstream tooling
//! 2. `expander` - Walks the tree and runs each node's generator (`components`)
//! 3. `passes` - Ordered detail passes applied after expansion
//! 4. `compiler` - Produces a hashed `BuildPlan`
//! 5. `placement` - Splits a build plan into bulk ops and discrete placements
//!
//! Also includes:
//! - `rng` - Seeded generator shared by every stage that needs randomness
//! - `batch` - Run-length merge of discrete placements
//! - `palette` - Theme and material resolution
//! - `hash` - Canonical content hashing
//! - `legacy` - Flattened operation list for older execution layers

pub mod rng;
pub mod types;
pub mod geometry;
pub mod scene;
mod components;
pub mod expander;
pub mod palette;
pub mod passes;
pub mod compiler;
pub mod hash;
pub mod batch;
pub mod placement;
pub mod legacy;
mod error;

pub use error::{PlanError, Result};
pub use rng::{RngState, SeededRng};
pub use types::{BlockPos, Bounds, Facing, SlabHalf};
pub use geometry::{GeometryPrimitive, MaterialRef, Shape, ShapeKind};
pub use scene::{ComponentNode, Scene, Transform};
pub use components::ComponentKind;
pub use expander::{expand, expand_tree, MaterialScope};
pub use palette::{BuiltinThemes, MaterialCatalog, Palette, ThemeSource, VersionCatalog};
pub use passes::DetailPass;
pub use compiler::{BuildPlan, PlanCompiler, PlanStats, PlanWarning, ServerContext};
pub use hash::content_hash;
pub use batch::{optimize, BulkRun, Cell, OptimizeResult};
pub use placement::{
    compile_placement, state_at_checkpoint, BulkCommand, BulkRegionOp, Checkpoint,
    CheckpointSlice, DiscretePlacement, PlacementOptions, PlacementPlan, PlacementStats,
    Region, Step, Strategy,
};
pub use legacy::{to_legacy_ops, LegacyOp};
