//! Placement compiler
//!
//! Routes each primitive of a build plan to a bulk region command or to
//! discrete cell placements, merges long discrete runs, and cuts the result
//! into checkpointed steps.
//!
//! Execution order is every bulk op in order, then every discrete placement
//! in order. Discrete cells overwritten by a later bulk op are dropped and
//! duplicate discrete positions keep their last block, so the terminal world
//! state matches applying the primitives one after another.

use std::collections::HashSet;
use std::ops::Range;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::batch::{optimize, Cell};
use crate::compiler::BuildPlan;
use crate::error::{PlanError, Result};
use crate::geometry::{GeometryPrimitive, Shape};
use crate::hash::content_hash;
use crate::types::{BlockPos, Bounds};

/// Primitives at or below this many cells are never worth a bulk command.
pub const BULK_MIN_CELLS: u64 = 64;
pub const DISCRETE_BATCH_SIZE: usize = 64;
pub const BULK_COMMAND_LATENCY_SECS: f64 = 0.5;
pub const SUSTAINED_PLACEMENTS_PER_SEC: f64 = 10.0;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlacementOptions {
    pub prefer_bulk: bool,
    pub max_region_volume: u64,
    pub checkpoint_interval: u64,
    pub min_run_length: usize,
}

impl Default for PlacementOptions {
    fn default() -> Self {
        Self {
            prefer_bulk: true,
            max_region_volume: 32_768,
            checkpoint_interval: 500,
            min_run_length: 10,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BulkCommand {
    Fill,
    Sphere,
    Cylinder,
}

impl BulkCommand {
    pub fn as_str(self) -> &'static str {
        match self {
            BulkCommand::Fill => "fill",
            BulkCommand::Sphere => "sphere",
            BulkCommand::Cylinder => "cylinder",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Region {
    Extent { from: BlockPos, to: BlockPos },
    Center { center: BlockPos, radius: i32 },
    Base { base: BlockPos, radius: i32, height: i32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BulkRegionOp {
    pub id: String,
    pub command: BulkCommand,
    pub block: String,
    pub region: Region,
    #[serde(default)]
    pub hollow: bool,
    pub estimated_block_count: u64,
    pub checkpoint_after: bool,
}

impl BulkRegionOp {
    pub fn shape(&self) -> Shape {
        match (self.command, self.region) {
            (BulkCommand::Fill, Region::Extent { from, to }) if self.hollow => Shape::HollowBox { from, to },
            (BulkCommand::Sphere, Region::Center { center, radius }) => {
                Shape::Sphere { center, radius, hollow: self.hollow }
            }
            (BulkCommand::Cylinder, Region::Base { base, radius, height }) => {
                Shape::Cylinder { base, radius, height, hollow: self.hollow }
            }
            (_, Region::Extent { from, to }) => Shape::Box { from, to },
            (_, Region::Center { center, radius }) => Shape::Sphere { center, radius, hollow: self.hollow },
            (_, Region::Base { base, radius, height }) => {
                Shape::Cylinder { base, radius, height, hollow: self.hollow }
            }
        }
    }

    /// Cells this command is expected to write.
    pub fn cells(&self) -> Vec<(BlockPos, String)> {
        self.shape().rasterize(&self.block)
    }

    pub fn bounds(&self) -> Bounds {
        self.shape().bounds()
    }

    /// Same op with its region shifted by `by`.
    pub fn translated(&self, by: BlockPos) -> BulkRegionOp {
        let region = match self.region {
            Region::Extent { from, to } => Region::Extent { from: from.translate(by), to: to.translate(by) },
            Region::Center { center, radius } => Region::Center { center: center.translate(by), radius },
            Region::Base { base, radius, height } => Region::Base { base: base.translate(by), radius, height },
        };
        BulkRegionOp { region, ..self.clone() }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DiscretePlacement {
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub block: String,
    pub batch_id: u32,
}

impl DiscretePlacement {
    pub fn pos(&self) -> BlockPos {
        BlockPos::new(self.x, self.y, self.z)
    }
}

/// Boundary in exactly one of the two lists
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_bulk_op_index: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub after_discrete_index: Option<usize>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Bulk,
    Discrete,
    Hybrid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlacementStats {
    pub bulk_ops: usize,
    pub merged_runs: usize,
    pub discrete_placements: usize,
    pub estimated_bulk_cells: u64,
    pub batches: usize,
    pub checkpoints: usize,
    /// Excluded from the hash
    pub estimated_seconds: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlacementPlan {
    pub plan_id: String,
    pub hash: String,
    pub strategy: Strategy,
    pub bulk_ops: Vec<BulkRegionOp>,
    pub discrete_placements: Vec<DiscretePlacement>,
    pub checkpoints: Vec<Checkpoint>,
    pub stats: PlacementStats,
}

/// Slice of the plan between two consecutive checkpoints
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    pub index: usize,
    pub checkpoint_id: String,
    pub bulk: Range<usize>,
    pub discrete: Range<usize>,
}

impl Step {
    pub fn len(&self) -> usize {
        self.bulk.len() + self.discrete.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Plan prefix up to and including a checkpoint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CheckpointSlice<'a> {
    pub bulk_ops: &'a [BulkRegionOp],
    pub discrete_placements: &'a [DiscretePlacement],
}

impl PlacementPlan {
    pub fn compute_hash(&self) -> Result<String> {
        content_hash(self)
    }

    /// Partition the plan into steps, one per checkpoint.
    pub fn steps(&self) -> Vec<Step> {
        let mut steps = Vec::with_capacity(self.checkpoints.len());
        let (mut bulk_done, mut discrete_done) = (0, 0);
        for (index, cp) in self.checkpoints.iter().enumerate() {
            let (bulk_end, discrete_end) = match (cp.after_bulk_op_index, cp.after_discrete_index) {
                (Some(b), _) => (b + 1, discrete_done),
                (None, Some(d)) => (self.bulk_ops.len(), d + 1),
                (None, None) => (bulk_done, discrete_done),
            };
            steps.push(Step {
                index,
                checkpoint_id: cp.id.clone(),
                bulk: bulk_done..bulk_end,
                discrete: discrete_done..discrete_end,
            });
            bulk_done = bulk_end;
            discrete_done = discrete_end;
        }
        steps
    }

    pub fn total_items(&self) -> usize {
        self.bulk_ops.len() + self.discrete_placements.len()
    }
}

/// Prefix of the plan ending at checkpoint `id`. Pure slicing, no recomputation.
pub fn state_at_checkpoint<'a>(plan: &'a PlacementPlan, id: &str) -> Result<CheckpointSlice<'a>> {
    let cp = plan
        .checkpoints
        .iter()
        .find(|c| c.id == id)
        .ok_or_else(|| PlanError::UnknownCheckpoint(id.to_string()))?;
    Ok(match (cp.after_bulk_op_index, cp.after_discrete_index) {
        (Some(b), _) => CheckpointSlice {
            bulk_ops: &plan.bulk_ops[..=b],
            discrete_placements: &plan.discrete_placements[..0],
        },
        (None, Some(d)) => CheckpointSlice {
            bulk_ops: &plan.bulk_ops[..],
            discrete_placements: &plan.discrete_placements[..=d],
        },
        (None, None) => CheckpointSlice {
            bulk_ops: &plan.bulk_ops[..0],
            discrete_placements: &plan.discrete_placements[..0],
        },
    })
}

fn bulk_op_for(prim: &GeometryPrimitive, block: &str, id: String, shape: &Shape) -> Option<BulkRegionOp> {
    let (command, region, hollow) = match *shape {
        Shape::Box { from, to } => (BulkCommand::Fill, Region::Extent { from, to }, false),
        Shape::HollowBox { from, to } => (BulkCommand::Fill, Region::Extent { from, to }, true),
        Shape::Sphere { center, radius, hollow } => (BulkCommand::Sphere, Region::Center { center, radius }, hollow),
        Shape::Cylinder { base, radius, height, hollow } => {
            (BulkCommand::Cylinder, Region::Base { base, radius, height }, hollow)
        }
        _ => return None,
    };
    debug!(primitive = %prim.id, command = command.as_str(), "routed to bulk");
    Some(BulkRegionOp {
        id,
        command,
        block: block.to_string(),
        region,
        hollow,
        estimated_block_count: shape.estimated_cells(),
        checkpoint_after: false,
    })
}

/// Split an oversized solid box into horizontal slabs that each fit the volume cap.
fn split_box(from: BlockPos, to: BlockPos, max_volume: u64) -> Option<Vec<Shape>> {
    let b = Bounds::from_corners(from, to);
    let (dx, _, dz) = b.size();
    let footprint = (dx * dz) as u64;
    if footprint == 0 || footprint > max_volume {
        return None;
    }
    let slab = (max_volume / footprint).max(1) as i32;
    let mut out = Vec::new();
    let mut y = b.min.y;
    while y <= b.max.y {
        let top = (y + slab - 1).min(b.max.y);
        out.push(Shape::Box {
            from: BlockPos::new(b.min.x, y, b.min.z),
            to: BlockPos::new(b.max.x, top, b.max.z),
        });
        y = top + 1;
    }
    Some(out)
}

/// Shapes to issue as bulk commands for `prim`, or `None` to place it discretely.
fn bulk_shapes(prim: &GeometryPrimitive, opts: &PlacementOptions) -> Option<Vec<Shape>> {
    let cells = prim.estimated_cells();
    if !opts.prefer_bulk || !prim.kind().is_bulk_capable() || cells <= BULK_MIN_CELLS {
        return None;
    }
    if cells <= opts.max_region_volume {
        return Some(vec![prim.shape.clone()]);
    }
    match prim.shape {
        Shape::Box { from, to } => split_box(from, to, opts.max_region_volume),
        _ => {
            debug!(primitive = %prim.id, cells, "over volume cap, placing discretely");
            None
        }
    }
}

pub fn compile_placement(plan: &BuildPlan, opts: &PlacementOptions) -> Result<PlacementPlan> {
    if opts.checkpoint_interval == 0 {
        return Err(PlanError::InvalidOptions("checkpoint_interval must be positive".into()));
    }
    if opts.max_region_volume == 0 {
        return Err(PlanError::InvalidOptions("max_region_volume must be positive".into()));
    }

    // Stable by layer so foundations land before what rests on them.
    let mut ordered: Vec<&GeometryPrimitive> = plan.geometry.iter().collect();
    ordered.sort_by_key(|p| p.layer);

    let mut bulk_ops: Vec<BulkRegionOp> = Vec::new();
    let mut cells: IndexMap<BlockPos, String> = IndexMap::new();

    for prim in ordered {
        let block = prim.material.to_string();
        match bulk_shapes(prim, opts) {
            Some(shapes) => {
                let split = shapes.len() > 1;
                for (i, shape) in shapes.iter().enumerate() {
                    let id = if split { format!("{}#{}", prim.id, i) } else { prim.id.clone() };
                    if let Some(op) = bulk_op_for(prim, &block, id, shape) {
                        drop_overwritten(&mut cells, &op);
                        bulk_ops.push(op);
                    }
                }
            }
            None => {
                for (pos, b) in prim.shape.rasterize(&block) {
                    cells.insert(pos, b);
                }
            }
        }
    }

    let mut merged_runs = 0;
    let discrete_cells: Vec<Cell> = if opts.prefer_bulk {
        let input: Vec<Cell> = cells.into_iter().map(|(pos, block)| Cell::new(pos, block)).collect();
        let result = optimize(&input, opts.min_run_length);
        for run in result.bulk_runs {
            let max_len = opts.max_region_volume.min(i32::MAX as u64) as i32;
            let mut x = run.from.x;
            while x <= run.to.x {
                let end = (x + max_len - 1).min(run.to.x);
                let from = BlockPos::new(x, run.from.y, run.from.z);
                let to = BlockPos::new(end, run.from.y, run.from.z);
                bulk_ops.push(BulkRegionOp {
                    id: format!("run:{}", merged_runs),
                    command: BulkCommand::Fill,
                    block: run.block.clone(),
                    region: Region::Extent { from, to },
                    hollow: false,
                    estimated_block_count: (end - x + 1) as u64,
                    checkpoint_after: false,
                });
                merged_runs += 1;
                x = end + 1;
            }
        }
        result.remaining_cells
    } else {
        cells.into_iter().map(|(pos, block)| Cell::new(pos, block)).collect()
    };

    let discrete_placements: Vec<DiscretePlacement> = discrete_cells
        .into_iter()
        .enumerate()
        .map(|(i, c)| DiscretePlacement {
            x: c.pos.x,
            y: c.pos.y,
            z: c.pos.z,
            block: c.block,
            batch_id: (i / DISCRETE_BATCH_SIZE) as u32,
        })
        .collect();

    let checkpoints = insert_checkpoints(&mut bulk_ops, discrete_placements.len(), opts.checkpoint_interval);

    let strategy = match (bulk_ops.is_empty(), discrete_placements.is_empty()) {
        (false, false) => Strategy::Hybrid,
        (false, true) => Strategy::Bulk,
        (true, _) => Strategy::Discrete,
    };
    let estimated_bulk_cells = bulk_ops.iter().map(|op| op.estimated_block_count).sum();
    let stats = PlacementStats {
        bulk_ops: bulk_ops.len(),
        merged_runs,
        discrete_placements: discrete_placements.len(),
        estimated_bulk_cells,
        batches: discrete_placements.len().div_ceil(DISCRETE_BATCH_SIZE),
        checkpoints: checkpoints.len(),
        estimated_seconds: bulk_ops.len() as f64 * BULK_COMMAND_LATENCY_SECS
            + discrete_placements.len() as f64 / SUSTAINED_PLACEMENTS_PER_SEC,
    };

    let short_hash = &plan.hash[..plan.hash.len().min(12)];
    let mut placement = PlacementPlan {
        plan_id: format!("{}-{}", plan.scene_id, short_hash),
        hash: String::new(),
        strategy,
        bulk_ops,
        discrete_placements,
        checkpoints,
        stats,
    };
    placement.hash = placement.compute_hash()?;
    debug!(
        plan = %placement.plan_id,
        bulk = placement.stats.bulk_ops,
        discrete = placement.stats.discrete_placements,
        checkpoints = placement.stats.checkpoints,
        "compiled placement plan"
    );
    Ok(placement)
}

/// Remove pending discrete cells that a later bulk op overwrites.
fn drop_overwritten(cells: &mut IndexMap<BlockPos, String>, op: &BulkRegionOp) {
    let bounds = op.bounds();
    if !cells.keys().any(|p| bounds.contains(*p)) {
        return;
    }
    let covered: HashSet<BlockPos> = op.cells().into_iter().map(|(p, _)| p).collect();
    cells.retain(|p, _| !covered.contains(p));
}

/// Checkpoint whenever the running cell count crosses a multiple of `interval`,
/// then close the plan with a final checkpoint.
fn insert_checkpoints(bulk_ops: &mut [BulkRegionOp], discrete_len: usize, interval: u64) -> Vec<Checkpoint> {
    let mut checkpoints = Vec::new();
    let mut cumulative: u64 = 0;
    let mut next_threshold = interval;
    let mut last_closed = false;

    for (i, op) in bulk_ops.iter_mut().enumerate() {
        cumulative += op.estimated_block_count;
        last_closed = cumulative >= next_threshold;
        if last_closed {
            op.checkpoint_after = true;
            checkpoints.push(Checkpoint {
                id: format!("cp-{:04}", checkpoints.len()),
                after_bulk_op_index: Some(i),
                after_discrete_index: None,
            });
            next_threshold = (cumulative / interval + 1) * interval;
        }
    }
    for i in 0..discrete_len {
        cumulative += 1;
        last_closed = cumulative >= next_threshold;
        if last_closed {
            checkpoints.push(Checkpoint {
                id: format!("cp-{:04}", checkpoints.len()),
                after_bulk_op_index: None,
                after_discrete_index: Some(i),
            });
            next_threshold = (cumulative / interval + 1) * interval;
        }
    }

    if !last_closed {
        if discrete_len > 0 {
            checkpoints.push(Checkpoint {
                id: format!("cp-{:04}", checkpoints.len()),
                after_bulk_op_index: None,
                after_discrete_index: Some(discrete_len - 1),
            });
        } else if let Some(last) = bulk_ops.last_mut() {
            last.checkpoint_after = true;
            checkpoints.push(Checkpoint {
                id: format!("cp-{:04}", checkpoints.len()),
                after_bulk_op_index: Some(bulk_ops.len() - 1),
                after_discrete_index: None,
            });
        }
    }
    checkpoints
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compiler::{PlanCompiler, ServerContext};
    use crate::geometry::MaterialRef;
    use crate::palette::Palette;
    use crate::scene::{ComponentNode, Scene};
    use serde_json::json;
    use std::collections::HashMap;

    fn prim(id: &str, layer: i32, block: &str, shape: Shape) -> GeometryPrimitive {
        GeometryPrimitive {
            id: id.into(),
            source: id.into(),
            layer,
            material: MaterialRef::literal(block),
            shape,
        }
    }

    fn plan_of(geometry: Vec<GeometryPrimitive>) -> BuildPlan {
        BuildPlan::assemble("test".into(), 0, Palette::new("default"), geometry, Vec::new()).unwrap()
    }

    fn p(x: i32, y: i32, z: i32) -> BlockPos {
        BlockPos::new(x, y, z)
    }

    /// Apply ops then placements to an empty world, in plan order.
    fn apply(world: &mut HashMap<BlockPos, String>, bulk: &[BulkRegionOp], discrete: &[DiscretePlacement]) {
        for op in bulk {
            for (pos, b) in op.cells() {
                world.insert(pos, b);
            }
        }
        for d in discrete {
            world.insert(d.pos(), d.block.clone());
        }
    }

    fn village_plan() -> BuildPlan {
        let scene = Scene::new("village", "medieval")
            .with_component(
                ComponentNode::new("base", "foundation")
                    .with_params(json!({"width": 15, "depth": 11}))
                    .with_child(
                        ComponentNode::new("hall", "room")
                            .at(1, 1, 1)
                            .with_params(json!({"width": 13, "depth": 9, "height": 6})),
                    ),
            )
            .with_component(ComponentNode::new("keep", "tower").at(25, 0, 5).with_params(json!({"radius": 4, "height": 12})))
            .with_component(ComponentNode::new("lane", "path").at(0, 0, 14).with_params(json!({"length": 30})))
            .with_component(ComponentNode::new("stair", "stairs").at(16, 1, 2).with_params(json!({"length": 5, "facing": "east"})));
        PlanCompiler::default().compile(&scene, 7, &ServerContext::default()).unwrap()
    }

    #[test]
    fn test_large_sphere_goes_bulk_small_box_goes_discrete() {
        let plan = plan_of(vec![
            prim("ball", 1, "glass", Shape::Sphere { center: p(0, 20, 0), radius: 10, hollow: false }),
            prim("cube", 1, "stone", Shape::Box { from: p(40, 0, 0), to: p(42, 2, 2) }),
        ]);
        let opts = PlacementOptions { min_run_length: 100, ..Default::default() };
        let placement = compile_placement(&plan, &opts).unwrap();

        assert_eq!(placement.bulk_ops.len(), 1);
        assert_eq!(placement.bulk_ops[0].command, BulkCommand::Sphere);
        assert_eq!(placement.bulk_ops[0].estimated_block_count, 4189);
        assert_eq!(placement.discrete_placements.len(), 27);
        assert_eq!(placement.strategy, Strategy::Hybrid);
    }

    #[test]
    fn test_prefer_bulk_off_places_everything_discretely() {
        let plan = plan_of(vec![prim("ball", 1, "glass", Shape::Sphere { center: p(0, 0, 0), radius: 4, hollow: false })]);
        let opts = PlacementOptions { prefer_bulk: false, ..Default::default() };
        let placement = compile_placement(&plan, &opts).unwrap();
        assert!(placement.bulk_ops.is_empty());
        assert_eq!(placement.strategy, Strategy::Discrete);
        assert!(!placement.discrete_placements.is_empty());
    }

    #[test]
    fn test_oversized_box_split_into_slabs() {
        let plan = plan_of(vec![prim("slab", 0, "stone", Shape::Box { from: p(0, 0, 0), to: p(9, 9, 9) })]);
        let opts = PlacementOptions { max_region_volume: 300, ..Default::default() };
        let placement = compile_placement(&plan, &opts).unwrap();
        assert_eq!(placement.bulk_ops.len(), 4);
        assert!(placement.bulk_ops.iter().all(|op| op.estimated_block_count <= 300));
        let total: u64 = placement.bulk_ops.iter().map(|op| op.estimated_block_count).sum();
        assert_eq!(total, 1000);
    }

    #[test]
    fn test_oversized_sphere_falls_back_to_discrete() {
        let plan = plan_of(vec![prim("ball", 1, "glass", Shape::Sphere { center: p(0, 0, 0), radius: 10, hollow: true })]);
        let opts = PlacementOptions { max_region_volume: 500, ..Default::default() };
        let placement = compile_placement(&plan, &opts).unwrap();
        assert!(placement.bulk_ops.iter().all(|op| op.command == BulkCommand::Fill));
    }

    #[test]
    fn test_runs_merge_into_fill_ops() {
        let plan = plan_of(vec![prim("lane", 0, "gravel", Shape::Line { from: p(0, 0, 0), to: p(29, 0, 0) })]);
        let placement = compile_placement(&plan, &PlacementOptions::default()).unwrap();
        assert_eq!(placement.stats.merged_runs, 1);
        assert_eq!(placement.bulk_ops[0].region, Region::Extent { from: p(0, 0, 0), to: p(29, 0, 0) });
        assert!(placement.discrete_placements.is_empty());
    }

    #[test]
    fn test_discrete_overwritten_by_later_bulk_is_dropped() {
        let plan = plan_of(vec![
            prim("marker", 0, "gold_block", Shape::Point { pos: p(2, 2, 2) }),
            prim("cube", 1, "stone", Shape::Box { from: p(0, 0, 0), to: p(4, 4, 4) }),
        ]);
        let placement = compile_placement(&plan, &PlacementOptions::default()).unwrap();
        assert!(placement.discrete_placements.is_empty());

        let mut world = HashMap::new();
        apply(&mut world, &placement.bulk_ops, &placement.discrete_placements);
        assert_eq!(world[&p(2, 2, 2)], "stone");
    }

    #[test]
    fn test_every_checkpoint_has_one_boundary_and_plan_is_closed() {
        let placement = compile_placement(
            &village_plan(),
            &PlacementOptions { checkpoint_interval: 50, ..Default::default() },
        )
        .unwrap();
        assert!(placement.checkpoints.len() > 2);
        for cp in &placement.checkpoints {
            assert!(cp.after_bulk_op_index.is_some() ^ cp.after_discrete_index.is_some());
        }
        let steps = placement.steps();
        let covered: usize = steps.iter().map(|s| s.len()).sum();
        assert_eq!(covered, placement.total_items());
        assert_eq!(steps.last().unwrap().discrete.end, placement.discrete_placements.len());
    }

    #[test]
    fn test_checkpoint_is_prefix_and_resume_matches_full_run() {
        let placement = compile_placement(
            &village_plan(),
            &PlacementOptions { checkpoint_interval: 40, ..Default::default() },
        )
        .unwrap();

        let mut full = HashMap::new();
        apply(&mut full, &placement.bulk_ops, &placement.discrete_placements);

        let steps = placement.steps();
        for (k, cp) in placement.checkpoints.iter().enumerate() {
            let slice = state_at_checkpoint(&placement, &cp.id).unwrap();
            assert_eq!(slice.bulk_ops.len(), steps[k].bulk.end);
            assert_eq!(slice.discrete_placements.len(), steps[k].discrete.end);
            assert_eq!(slice.bulk_ops, &placement.bulk_ops[..slice.bulk_ops.len()]);

            let mut resumed = HashMap::new();
            apply(&mut resumed, slice.bulk_ops, slice.discrete_placements);
            for step in &steps[k + 1..] {
                apply(
                    &mut resumed,
                    &placement.bulk_ops[step.bulk.clone()],
                    &placement.discrete_placements[step.discrete.clone()],
                );
            }
            assert_eq!(resumed, full, "resume from {} diverged", cp.id);
        }
    }

    #[test]
    fn test_unknown_checkpoint() {
        let placement = compile_placement(&village_plan(), &PlacementOptions::default()).unwrap();
        assert!(matches!(
            state_at_checkpoint(&placement, "cp-9999"),
            Err(PlanError::UnknownCheckpoint(_))
        ));
    }

    #[test]
    fn test_placement_hash_deterministic_and_time_excluded() {
        let plan = village_plan();
        let a = compile_placement(&plan, &PlacementOptions::default()).unwrap();
        let mut b = compile_placement(&plan, &PlacementOptions::default()).unwrap();
        assert_eq!(a.hash, b.hash);
        b.stats.estimated_seconds += 10.0;
        assert_eq!(b.compute_hash().unwrap(), a.hash);
    }

    #[test]
    fn test_batches_are_bounded() {
        let plan = plan_of(vec![prim("cube", 1, "stone", Shape::Box { from: p(0, 0, 0), to: p(9, 9, 9) })]);
        let opts = PlacementOptions { prefer_bulk: false, ..Default::default() };
        let placement = compile_placement(&plan, &opts).unwrap();
        assert_eq!(placement.stats.batches, 1000usize.div_ceil(DISCRETE_BATCH_SIZE));
        let max_batch = placement.discrete_placements.iter().map(|d| d.batch_id).max().unwrap();
        assert_eq!(max_batch as usize, placement.stats.batches - 1);
    }

    #[test]
    fn test_zero_interval_rejected() {
        let opts = PlacementOptions { checkpoint_interval: 0, ..Default::default() };
        assert!(compile_placement(&village_plan(), &opts).is_err());
    }
}
