//! Flattened operation list for execution layers that predate placement plans

use serde::{Deserialize, Serialize};

use crate::geometry::Shape;
use crate::placement::{BulkCommand, BulkRegionOp, PlacementPlan, Region};
use crate::types::BlockPos;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum LegacyOp {
    Fill {
        block: String,
        from: BlockPos,
        to: BlockPos,
        /// Accepted on input; hollow boxes are emitted as `walls`
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        hollow: bool,
    },
    /// Closed one-block shell of the box, floor and roof included
    Walls {
        block: String,
        from: BlockPos,
        to: BlockPos,
    },
    Sphere {
        block: String,
        center: BlockPos,
        radius: i32,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        hollow: bool,
    },
    Cylinder {
        block: String,
        base: BlockPos,
        radius: i32,
        height: i32,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        hollow: bool,
    },
    Set {
        block: String,
        pos: BlockPos,
    },
}

impl LegacyOp {
    /// Legacy form of one bulk region command.
    pub fn from_bulk(op: &BulkRegionOp) -> LegacyOp {
        let block = op.block.clone();
        let hollow = op.hollow;
        match (op.command, op.region) {
            (BulkCommand::Sphere, Region::Center { center, radius }) => LegacyOp::Sphere { block, center, radius, hollow },
            (BulkCommand::Cylinder, Region::Base { base, radius, height }) => {
                LegacyOp::Cylinder { block, base, radius, height, hollow }
            }
            (_, Region::Extent { from, to }) if hollow => LegacyOp::Walls { block, from, to },
            (_, Region::Extent { from, to }) => LegacyOp::Fill { block, from, to, hollow: false },
            // Mismatched command/region pairs are never produced by the compiler; keep the region's meaning.
            (_, Region::Center { center, radius }) => LegacyOp::Sphere { block, center, radius, hollow },
            (_, Region::Base { base, radius, height }) => LegacyOp::Cylinder { block, base, radius, height, hollow },
        }
    }

    pub fn block(&self) -> &str {
        match self {
            LegacyOp::Fill { block, .. }
            | LegacyOp::Walls { block, .. }
            | LegacyOp::Sphere { block, .. }
            | LegacyOp::Cylinder { block, .. }
            | LegacyOp::Set { block, .. } => block,
        }
    }

    /// Region this op writes.
    pub fn shape(&self) -> Shape {
        match *self {
            LegacyOp::Fill { from, to, hollow: true, .. } | LegacyOp::Walls { from, to, .. } => {
                Shape::HollowBox { from, to }
            }
            LegacyOp::Fill { from, to, .. } => Shape::Box { from, to },
            LegacyOp::Sphere { center, radius, hollow, .. } => Shape::Sphere { center, radius, hollow },
            LegacyOp::Cylinder { base, radius, height, hollow, .. } => Shape::Cylinder { base, radius, height, hollow },
            LegacyOp::Set { pos, .. } => Shape::Point { pos },
        }
    }
}

/// Flatten a placement plan in execution order.
pub fn to_legacy_ops(plan: &PlacementPlan) -> Vec<LegacyOp> {
    let mut ops = Vec::with_capacity(plan.total_items());
    ops.extend(plan.bulk_ops.iter().map(LegacyOp::from_bulk));
    ops.extend(
        plan.discrete_placements
            .iter()
            .map(|d| LegacyOp::Set { block: d.block.clone(), pos: d.pos() }),
    );
    ops
}
