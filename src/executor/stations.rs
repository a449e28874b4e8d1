//! Movement planning
//!
//! Cells are bucketed into cubes small enough that the cube centre reaches
//! every corner; each non-empty cube becomes one station.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use structure_plan::BlockPos;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MovementMode {
    /// One move per cluster of cells within reach of a vantage point
    #[default]
    Stations,
    /// Move per cell whenever it is out of reach
    Sequential,
    /// Never move the agent
    None,
}

/// Vantage point and the cells served from it
#[derive(Debug, Clone, PartialEq)]
pub struct Station {
    pub vantage: BlockPos,
    /// Indices into the cell list given to `plan_stations`, in input order
    pub cells: Vec<usize>,
}

/// Side of the largest cube whose centre is within `reach` of every cell.
pub fn station_cube_side(reach: f64) -> i32 {
    ((2.0 * reach / 3f64.sqrt()).floor() as i32).max(1)
}

pub fn in_reach(agent: BlockPos, cell: BlockPos, reach: f64) -> bool {
    agent.distance_to(cell) <= reach
}

/// Group `cells` into stations. Stations are visited bottom layer first, then
/// nearest-first from `start` within a layer.
pub fn plan_stations(cells: &[BlockPos], reach: f64, start: BlockPos) -> Vec<Station> {
    let side = station_cube_side(reach);
    let mut buckets: BTreeMap<(i32, i32, i32), Vec<usize>> = BTreeMap::new();
    for (i, c) in cells.iter().enumerate() {
        let key = (c.y.div_euclid(side), c.x.div_euclid(side), c.z.div_euclid(side));
        buckets.entry(key).or_default().push(i);
    }

    let mut stations: Vec<(i32, Station)> = buckets
        .into_iter()
        .map(|((ky, kx, kz), idx)| {
            let half = side / 2;
            let vantage = BlockPos::new(kx * side + half, ky * side + half, kz * side + half);
            (ky, Station { vantage, cells: idx })
        })
        .collect();

    let mut ordered = Vec::with_capacity(stations.len());
    let mut here = start;
    while !stations.is_empty() {
        let layer = stations.iter().map(|(ky, _)| *ky).min().unwrap_or(0);
        let mut best: Option<(usize, f64)> = None;
        for (i, (ky, s)) in stations.iter().enumerate() {
            if *ky != layer {
                continue;
            }
            let d = here.distance_to(s.vantage);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((i, d));
            }
        }
        let Some((i, _)) = best else { break };
        let (_, station) = stations.remove(i);
        here = station.vantage;
        ordered.push(station);
    }
    ordered
}

#[cfg(test)]
mod tests {
    use super::*;

    fn p(x: i32, y: i32, z: i32) -> BlockPos {
        BlockPos::new(x, y, z)
    }

    #[test]
    fn test_cube_side() {
        assert_eq!(station_cube_side(5.0), 5);
        assert_eq!(station_cube_side(4.5), 5);
        assert_eq!(station_cube_side(0.1), 1);
    }

    #[test]
    fn test_every_cell_in_reach_of_its_station() {
        let mut cells = Vec::new();
        for x in -7..13 {
            for y in 0..9 {
                for z in -3..4 {
                    cells.push(p(x, y, z));
                }
            }
        }
        for reach in [1.0, 3.0, 4.5, 6.0] {
            let stations = plan_stations(&cells, reach, p(0, 0, 0));
            let mut covered = vec![false; cells.len()];
            for s in &stations {
                for &i in &s.cells {
                    assert!(in_reach(s.vantage, cells[i], reach), "reach {reach}: {:?} from {:?}", cells[i], s.vantage);
                    assert!(!covered[i]);
                    covered[i] = true;
                }
            }
            assert!(covered.iter().all(|c| *c));
        }
    }

    #[test]
    fn test_lower_layers_first() {
        let cells = vec![p(0, 10, 0), p(40, 0, 0), p(0, 0, 0)];
        let stations = plan_stations(&cells, 5.0, p(0, 10, 0));
        let ys: Vec<i32> = stations.iter().map(|s| s.vantage.y).collect();
        assert!(ys.windows(2).all(|w| w[0] <= w[1]));
        // nearest first within the bottom layer
        assert_eq!(stations[0].cells, vec![2]);
    }
}
