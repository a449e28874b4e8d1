//! Run-length merge of discrete placements
//!
//! Cells are sorted by (y, z, x) so that same-row neighbours are adjacent in
//! index order; a single linear scan then finds maximal x-runs of one block.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::BlockPos;

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cell {
    pub pos: BlockPos,
    pub block: String,
}

impl Cell {
    pub fn new(pos: BlockPos, block: impl Into<String>) -> Self {
        Self { pos, block: block.into() }
    }
}

/// Contiguous x-run of one block along a fixed (y, z) row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkRun {
    pub from: BlockPos,
    pub to: BlockPos,
    pub block: String,
    pub length: usize,
}

impl BulkRun {
    pub fn cells(&self) -> impl Iterator<Item = Cell> + '_ {
        (self.from.x..=self.to.x).map(move |x| Cell::new(BlockPos::new(x, self.from.y, self.from.z), self.block.clone()))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OptimizeResult {
    pub bulk_runs: Vec<BulkRun>,
    /// Cells not covered by any run, in (y, z, x) order
    pub remaining_cells: Vec<Cell>,
}

/// Merge runs of at least `min_run_length` same-block cells.
///
/// A position listed twice keeps its last block.
pub fn optimize(cells: &[Cell], min_run_length: usize) -> OptimizeResult {
    let mut sorted: BTreeMap<(i32, i32, i32), &str> = BTreeMap::new();
    for cell in cells {
        sorted.insert((cell.pos.y, cell.pos.z, cell.pos.x), cell.block.as_str());
    }
    let ordered: Vec<(BlockPos, &str)> = sorted
        .into_iter()
        .map(|((y, z, x), block)| (BlockPos::new(x, y, z), block))
        .collect();

    let min_run_length = min_run_length.max(1);
    let mut result = OptimizeResult::default();
    let mut i = 0;
    while i < ordered.len() {
        let (start, block) = ordered[i];
        let mut end = i;
        while end + 1 < ordered.len() {
            let (prev, _) = ordered[end];
            let (next, next_block) = ordered[end + 1];
            if next_block != block || next.y != prev.y || next.z != prev.z || next.x != prev.x + 1 {
                break;
            }
            end += 1;
        }

        let length = end - i + 1;
        if length >= min_run_length {
            result.bulk_runs.push(BulkRun {
                from: start,
                to: ordered[end].0,
                block: block.to_string(),
                length,
            });
        } else {
            result
                .remaining_cells
                .extend(ordered[i..=end].iter().map(|(pos, b)| Cell::new(*pos, *b)));
        }
        i = end + 1;
    }
    result
}
