//! Detail passes
//!
//! Passes run after expansion in the order the scene declares them. Any pass
//! may draw from the generator, so reordering passes changes the plan.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::components::{LAYER_DECORATION, LAYER_LIGHTING, LAYER_STRUCTURE};
use crate::geometry::{GeometryPrimitive, MaterialRef, Shape};
use crate::rng::SeededRng;
use crate::types::{BlockPos, Bounds};

const GROUND_COVER: &[(&str, f64)] = &[("grass", 6.0), ("fern", 2.0), ("dandelion", 1.0), ("poppy", 1.0)];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "pass", rename_all = "snake_case")]
pub enum DetailPass {
    /// Point lights on a grid over every floor-like primitive
    Lighting {
        #[serde(default = "default_spacing")]
        spacing: i32,
    },
    /// Random plants in a ring around the structure
    GroundCover {
        #[serde(default = "default_density")]
        density: f64,
        #[serde(default = "default_ring")]
        ring: i32,
    },
}

fn default_spacing() -> i32 {
    4
}

fn default_density() -> f64 {
    0.15
}

fn default_ring() -> i32 {
    2
}

impl DetailPass {
    pub fn default_lighting() -> Self {
        DetailPass::Lighting { spacing: default_spacing() }
    }

    pub fn name(&self) -> &'static str {
        match self {
            DetailPass::Lighting { .. } => "lighting",
            DetailPass::GroundCover { .. } => "ground_cover",
        }
    }

    /// Append this pass's primitives to `geometry`.
    pub fn apply(&self, geometry: &mut Vec<GeometryPrimitive>, rng: &mut SeededRng) {
        let added = match *self {
            DetailPass::Lighting { spacing } => lighting(geometry, spacing.max(2)),
            DetailPass::GroundCover { density, ring } => {
                ground_cover(geometry, density.clamp(0.0, 1.0), ring.max(1), rng)
            }
        };
        debug!(pass = self.name(), added = added.len(), "detail pass applied");
        geometry.extend(added);
    }
}

fn is_floor(p: &GeometryPrimitive) -> Option<Bounds> {
    if p.layer > LAYER_STRUCTURE {
        return None;
    }
    match p.shape {
        Shape::Box { from, to } if from.y == to.y => {
            let b = Bounds::from_corners(from, to);
            let (dx, _, dz) = b.size();
            (dx >= 3 && dz >= 3).then_some(b)
        }
        _ => None,
    }
}

fn lighting(geometry: &[GeometryPrimitive], spacing: i32) -> Vec<GeometryPrimitive> {
    let mut placed = BTreeSet::new();
    let mut out = Vec::new();
    for floor in geometry.iter().filter_map(is_floor) {
        let y = floor.max.y + 1;
        let mut x = floor.min.x + spacing / 2;
        while x < floor.max.x {
            let mut z = floor.min.z + spacing / 2;
            while z < floor.max.z {
                let pos = BlockPos::new(x, y, z);
                if placed.insert(pos) {
                    out.push(GeometryPrimitive {
                        id: format!("pass:lighting:{}", out.len()),
                        source: "pass:lighting".into(),
                        layer: LAYER_LIGHTING,
                        material: MaterialRef::symbol("light"),
                        shape: Shape::Point { pos },
                    });
                }
                z += spacing;
            }
            x += spacing;
        }
    }
    out
}

fn ground_cover(
    geometry: &[GeometryPrimitive],
    density: f64,
    ring: i32,
    rng: &mut SeededRng,
) -> Vec<GeometryPrimitive> {
    let Some(bounds) = geometry.iter().map(|p| p.shape.bounds()).reduce(Bounds::union) else {
        return Vec::new();
    };
    let y = bounds.min.y;
    let mut out = Vec::new();
    for x in (bounds.min.x - ring)..=(bounds.max.x + ring) {
        for z in (bounds.min.z - ring)..=(bounds.max.z + ring) {
            let inside = x >= bounds.min.x && x <= bounds.max.x && z >= bounds.min.z && z <= bounds.max.z;
            if inside || !rng.bool(density) {
                continue;
            }
            if let Some(plant) = rng.weighted_pick(GROUND_COVER) {
                out.push(GeometryPrimitive {
                    id: format!("pass:ground_cover:{}", out.len()),
                    source: "pass:ground_cover".into(),
                    layer: LAYER_DECORATION,
                    material: MaterialRef::literal(*plant),
                    shape: Shape::Point { pos: BlockPos::new(x, y, z) },
                });
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn floor(w: i32, d: i32) -> GeometryPrimitive {
        GeometryPrimitive {
            id: "f:0".into(),
            source: "f".into(),
            layer: LAYER_STRUCTURE,
            material: MaterialRef::symbol("floor"),
            shape: Shape::Box { from: BlockPos::new(0, 0, 0), to: BlockPos::new(w - 1, 0, d - 1) },
        }
    }

    #[test]
    fn test_lighting_places_on_floor_grid() {
        let mut geometry = vec![floor(9, 9)];
        DetailPass::Lighting { spacing: 4 }.apply(&mut geometry, &mut SeededRng::new(0));
        let lights: Vec<_> = geometry.iter().filter(|p| p.layer == LAYER_LIGHTING).collect();
        // x,z in {2, 6}
        assert_eq!(lights.len(), 4);
        assert!(lights.iter().all(|p| matches!(p.shape, Shape::Point { pos } if pos.y == 1)));
    }

    #[test]
    fn test_lighting_ignores_narrow_strips() {
        let mut geometry = vec![floor(9, 2)];
        DetailPass::default_lighting().apply(&mut geometry, &mut SeededRng::new(0));
        assert_eq!(geometry.len(), 1);
    }

    #[test]
    fn test_ground_cover_stays_outside_bounds_and_is_seeded() {
        let run = |seed| {
            let mut geometry = vec![floor(5, 5)];
            DetailPass::GroundCover { density: 0.5, ring: 2 }.apply(&mut geometry, &mut SeededRng::new(seed));
            geometry
        };
        let a = run(77);
        let b = run(77);
        assert_eq!(a, b);
        assert!(a.len() > 1);
        for p in &a[1..] {
            let Shape::Point { pos } = p.shape else { panic!("expected point") };
            assert!(pos.x < 0 || pos.x > 4 || pos.z < 0 || pos.z > 4);
        }
    }

    #[test]
    fn test_pass_serde_tag() {
        let pass: DetailPass = serde_json::from_str(r#"{"pass": "ground_cover"}"#).unwrap();
        assert_eq!(pass, DetailPass::GroundCover { density: 0.15, ring: 2 });
    }
}
