//! Geometric primitives produced by expansion
//!
//! Each primitive knows its closed-form cell estimate (used for statistics and
//! bulk routing) and how to rasterize itself into individual cells.

use std::f64::consts::PI;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::types::{BlockPos, Bounds, Facing, SlabHalf};

/// Literal block id or `$role` token resolved against the palette
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum MaterialRef {
    Literal(String),
    Symbol(String),
}

impl MaterialRef {
    pub fn literal(name: impl Into<String>) -> Self {
        MaterialRef::Literal(name.into())
    }

    pub fn symbol(role: impl Into<String>) -> Self {
        MaterialRef::Symbol(role.into())
    }

    pub fn is_symbolic(&self) -> bool {
        matches!(self, MaterialRef::Symbol(_))
    }

    /// Literal block id, if already resolved
    pub fn as_literal(&self) -> Option<&str> {
        match self {
            MaterialRef::Literal(name) => Some(name),
            MaterialRef::Symbol(_) => None,
        }
    }
}

impl From<String> for MaterialRef {
    fn from(s: String) -> Self {
        match s.strip_prefix('$') {
            Some(role) => MaterialRef::Symbol(role.to_string()),
            None => MaterialRef::Literal(s),
        }
    }
}

impl From<&str> for MaterialRef {
    fn from(s: &str) -> Self {
        MaterialRef::from(s.to_string())
    }
}

impl From<MaterialRef> for String {
    fn from(m: MaterialRef) -> Self {
        m.to_string()
    }
}

impl fmt::Display for MaterialRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MaterialRef::Literal(name) => write!(f, "{}", name),
            MaterialRef::Symbol(role) => write!(f, "${}", role),
        }
    }
}

/// Shape of a primitive
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Shape {
    Box { from: BlockPos, to: BlockPos },
    HollowBox { from: BlockPos, to: BlockPos },
    Sphere { center: BlockPos, radius: i32, #[serde(default)] hollow: bool },
    Cylinder { base: BlockPos, radius: i32, height: i32, #[serde(default)] hollow: bool },
    Line { from: BlockPos, to: BlockPos },
    Point { pos: BlockPos },
    Stair { pos: BlockPos, facing: Facing },
    Slab { pos: BlockPos, half: SlabHalf },
    Door { pos: BlockPos, facing: Facing },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ShapeKind {
    Box,
    HollowBox,
    Sphere,
    Cylinder,
    Line,
    Point,
    Stair,
    Slab,
    Door,
}

impl ShapeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ShapeKind::Box => "box",
            ShapeKind::HollowBox => "hollow_box",
            ShapeKind::Sphere => "sphere",
            ShapeKind::Cylinder => "cylinder",
            ShapeKind::Line => "line",
            ShapeKind::Point => "point",
            ShapeKind::Stair => "stair",
            ShapeKind::Slab => "slab",
            ShapeKind::Door => "door",
        }
    }

    /// Shapes a single region command can produce server-side
    pub fn is_bulk_capable(self) -> bool {
        matches!(
            self,
            ShapeKind::Box | ShapeKind::HollowBox | ShapeKind::Sphere | ShapeKind::Cylinder
        )
    }
}

impl Shape {
    pub fn kind(&self) -> ShapeKind {
        match self {
            Shape::Box { .. } => ShapeKind::Box,
            Shape::HollowBox { .. } => ShapeKind::HollowBox,
            Shape::Sphere { .. } => ShapeKind::Sphere,
            Shape::Cylinder { .. } => ShapeKind::Cylinder,
            Shape::Line { .. } => ShapeKind::Line,
            Shape::Point { .. } => ShapeKind::Point,
            Shape::Stair { .. } => ShapeKind::Stair,
            Shape::Slab { .. } => ShapeKind::Slab,
            Shape::Door { .. } => ShapeKind::Door,
        }
    }

    /// Closed-form estimate of mutated cells. Hollow shapes subtract the interior.
    pub fn estimated_cells(&self) -> u64 {
        match *self {
            Shape::Box { from, to } => Bounds::from_corners(from, to).volume(),
            Shape::HollowBox { from, to } => {
                let (dx, dy, dz) = Bounds::from_corners(from, to).size();
                let outer = dx * dy * dz;
                let inner = (dx - 2).max(0) * (dy - 2).max(0) * (dz - 2).max(0);
                (outer - inner) as u64
            }
            Shape::Sphere { radius, hollow, .. } => {
                let r = radius.max(0) as f64;
                let mut v = 4.0 / 3.0 * PI * r.powi(3);
                if hollow {
                    v -= 4.0 / 3.0 * PI * (r - 1.0).max(0.0).powi(3);
                }
                (v.round() as u64).max(1)
            }
            Shape::Cylinder { radius, height, hollow, .. } => {
                let r = radius.max(0) as f64;
                let h = height.max(0) as f64;
                let mut area = PI * r * r;
                if hollow {
                    area -= PI * (r - 1.0).max(0.0).powi(2);
                }
                ((area * h).round() as u64).max(1)
            }
            Shape::Line { from, to } => {
                let d = (to.x - from.x)
                    .abs()
                    .max((to.y - from.y).abs())
                    .max((to.z - from.z).abs());
                d as u64 + 1
            }
            Shape::Point { .. } | Shape::Stair { .. } | Shape::Slab { .. } => 1,
            Shape::Door { .. } => 2,
        }
    }

    pub fn bounds(&self) -> Bounds {
        match *self {
            Shape::Box { from, to } | Shape::HollowBox { from, to } | Shape::Line { from, to } => {
                Bounds::from_corners(from, to)
            }
            Shape::Sphere { center, radius, .. } => {
                let r = radius.max(0);
                Bounds::from_corners(center.offset(-r, -r, -r), center.offset(r, r, r))
            }
            Shape::Cylinder { base, radius, height, .. } => {
                let r = radius.max(0);
                let top = (height.max(1)) - 1;
                Bounds::from_corners(base.offset(-r, 0, -r), base.offset(r, top, r))
            }
            Shape::Point { pos } | Shape::Stair { pos, .. } | Shape::Slab { pos, .. } => {
                Bounds::point(pos)
            }
            Shape::Door { pos, .. } => Bounds::from_corners(pos, pos.offset(0, 1, 0)),
        }
    }

    pub fn translate(&self, by: BlockPos) -> Shape {
        match *self {
            Shape::Box { from, to } => Shape::Box { from: from.translate(by), to: to.translate(by) },
            Shape::HollowBox { from, to } => Shape::HollowBox {
                from: from.translate(by),
                to: to.translate(by),
            },
            Shape::Sphere { center, radius, hollow } => Shape::Sphere {
                center: center.translate(by),
                radius,
                hollow,
            },
            Shape::Cylinder { base, radius, height, hollow } => Shape::Cylinder {
                base: base.translate(by),
                radius,
                height,
                hollow,
            },
            Shape::Line { from, to } => Shape::Line { from: from.translate(by), to: to.translate(by) },
            Shape::Point { pos } => Shape::Point { pos: pos.translate(by) },
            Shape::Stair { pos, facing } => Shape::Stair { pos: pos.translate(by), facing },
            Shape::Slab { pos, half } => Shape::Slab { pos: pos.translate(by), half },
            Shape::Door { pos, facing } => Shape::Door { pos: pos.translate(by), facing },
        }
    }

    /// Rasterize into `(position, block)` cells, in a fixed iteration order.
    pub fn rasterize(&self, block: &str) -> Vec<(BlockPos, String)> {
        let mut out = Vec::new();
        match *self {
            Shape::Box { from, to } => {
                let b = Bounds::from_corners(from, to);
                for y in b.min.y..=b.max.y {
                    for z in b.min.z..=b.max.z {
                        for x in b.min.x..=b.max.x {
                            out.push((BlockPos::new(x, y, z), block.to_string()));
                        }
                    }
                }
            }
            Shape::HollowBox { from, to } => {
                let b = Bounds::from_corners(from, to);
                for y in b.min.y..=b.max.y {
                    for z in b.min.z..=b.max.z {
                        for x in b.min.x..=b.max.x {
                            let interior = x > b.min.x
                                && x < b.max.x
                                && y > b.min.y
                                && y < b.max.y
                                && z > b.min.z
                                && z < b.max.z;
                            if !interior {
                                out.push((BlockPos::new(x, y, z), block.to_string()));
                            }
                        }
                    }
                }
            }
            Shape::Sphere { center, radius, hollow } => {
                let r = radius.max(0);
                let outer = (r * r) as i64;
                let inner = ((r - 1).max(0) * (r - 1).max(0)) as i64;
                for dy in -r..=r {
                    for dz in -r..=r {
                        for dx in -r..=r {
                            let d2 = (dx * dx + dy * dy + dz * dz) as i64;
                            if d2 > outer || (hollow && r > 0 && d2 < inner) {
                                continue;
                            }
                            out.push((center.offset(dx, dy, dz), block.to_string()));
                        }
                    }
                }
            }
            Shape::Cylinder { base, radius, height, hollow } => {
                let r = radius.max(0);
                let outer = (r * r) as i64;
                let inner = ((r - 1).max(0) * (r - 1).max(0)) as i64;
                for dy in 0..height.max(1) {
                    for dz in -r..=r {
                        for dx in -r..=r {
                            let d2 = (dx * dx + dz * dz) as i64;
                            if d2 > outer || (hollow && r > 0 && d2 < inner) {
                                continue;
                            }
                            out.push((base.offset(dx, dy, dz), block.to_string()));
                        }
                    }
                }
            }
            Shape::Line { from, to } => {
                let dx = (to.x - from.x) as f64;
                let dy = (to.y - from.y) as f64;
                let dz = (to.z - from.z) as f64;
                let steps = dx.abs().max(dy.abs()).max(dz.abs()) as i32;
                if steps == 0 {
                    out.push((from, block.to_string()));
                } else {
                    for i in 0..=steps {
                        let t = i as f64 / steps as f64;
                        let p = BlockPos::new(
                            from.x + (dx * t).round() as i32,
                            from.y + (dy * t).round() as i32,
                            from.z + (dz * t).round() as i32,
                        );
                        out.push((p, block.to_string()));
                    }
                }
            }
            Shape::Point { pos } => out.push((pos, block.to_string())),
            Shape::Stair { pos, facing } => {
                out.push((pos, format!("{}[facing={}]", block, facing.as_str())));
            }
            Shape::Slab { pos, half } => {
                out.push((pos, format!("{}[type={}]", block, half.as_str())));
            }
            Shape::Door { pos, facing } => {
                out.push((pos, format!("{}[facing={},half=lower]", block, facing.as_str())));
                out.push((
                    pos.offset(0, 1, 0),
                    format!("{}[facing={},half=upper]", block, facing.as_str()),
                ));
            }
        }
        out
    }
}

/// One primitive in a build plan
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryPrimitive {
    /// Stable id, `<node id>:<ordinal>`
    pub id: String,
    /// Node that produced this primitive
    pub source: String,
    pub layer: i32,
    pub material: MaterialRef,
    pub shape: Shape,
}

impl GeometryPrimitive {
    pub fn kind(&self) -> ShapeKind {
        self.shape.kind()
    }

    pub fn estimated_cells(&self) -> u64 {
        self.shape.estimated_cells()
    }
}
