//! Parametric component generators
//!
//! Every component type is a variant of `ComponentKind`; the generator for a
//! node is picked by an exhaustive match, so a new kind does not compile until
//! it has a generator.

use crate::expander::MaterialScope;
use crate::geometry::{GeometryPrimitive, MaterialRef, Shape};
use crate::rng::SeededRng;
use crate::scene::ComponentNode;
use crate::types::{BlockPos, Facing, SlabHalf};

// Layer numbers drive detail-pass and resume ordering.
pub const LAYER_FOUNDATION: i32 = 0;
pub const LAYER_STRUCTURE: i32 = 1;
pub const LAYER_SUPPORT: i32 = 2;
pub const LAYER_ROOF: i32 = 3;
pub const LAYER_FIXTURE: i32 = 4;
pub const LAYER_LIGHTING: i32 = 5;
pub const LAYER_DECORATION: i32 = 6;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ComponentKind {
    Box,
    Wall,
    Floor,
    Foundation,
    Room,
    Tower,
    Roof,
    Pillar,
    Window,
    Door,
    Stairs,
    Slab,
    Dome,
    Path,
    Fence,
    Light,
    Tree,
}

impl ComponentKind {
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "box" => ComponentKind::Box,
            "wall" => ComponentKind::Wall,
            "floor" => ComponentKind::Floor,
            "foundation" => ComponentKind::Foundation,
            "room" => ComponentKind::Room,
            "tower" => ComponentKind::Tower,
            "roof" => ComponentKind::Roof,
            "pillar" | "column" => ComponentKind::Pillar,
            "window" => ComponentKind::Window,
            "door" => ComponentKind::Door,
            "stairs" | "staircase" => ComponentKind::Stairs,
            "slab" => ComponentKind::Slab,
            "dome" => ComponentKind::Dome,
            "path" => ComponentKind::Path,
            "fence" => ComponentKind::Fence,
            "light" | "lamp" => ComponentKind::Light,
            "tree" => ComponentKind::Tree,
            _ => return None,
        })
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComponentKind::Box => "box",
            ComponentKind::Wall => "wall",
            ComponentKind::Floor => "floor",
            ComponentKind::Foundation => "foundation",
            ComponentKind::Room => "room",
            ComponentKind::Tower => "tower",
            ComponentKind::Roof => "roof",
            ComponentKind::Pillar => "pillar",
            ComponentKind::Window => "window",
            ComponentKind::Door => "door",
            ComponentKind::Stairs => "stairs",
            ComponentKind::Slab => "slab",
            ComponentKind::Dome => "dome",
            ComponentKind::Path => "path",
            ComponentKind::Fence => "fence",
            ComponentKind::Light => "light",
            ComponentKind::Tree => "tree",
        }
    }

    /// Run this kind's generator for one node.
    pub(crate) fn generate(self, em: &mut Emitter<'_>, rng: &mut SeededRng) {
        match self {
            ComponentKind::Box => gen_box(em),
            ComponentKind::Wall => gen_wall(em),
            ComponentKind::Floor => gen_floor(em),
            ComponentKind::Foundation => gen_foundation(em),
            ComponentKind::Room => gen_room(em),
            ComponentKind::Tower => gen_tower(em),
            ComponentKind::Roof => gen_roof(em),
            ComponentKind::Pillar => gen_pillar(em),
            ComponentKind::Window => gen_window(em),
            ComponentKind::Door => gen_door(em),
            ComponentKind::Stairs => gen_stairs(em),
            ComponentKind::Slab => gen_slab(em),
            ComponentKind::Dome => gen_dome(em),
            ComponentKind::Path => gen_path(em),
            ComponentKind::Fence => gen_fence(em),
            ComponentKind::Light => gen_light(em),
            ComponentKind::Tree => gen_tree(em, rng),
        }
    }
}

/// Collects primitives for a single node, translating local shapes to world space.
pub(crate) struct Emitter<'a> {
    node: &'a ComponentNode,
    origin: BlockPos,
    scope: &'a MaterialScope,
    out: Vec<GeometryPrimitive>,
}

impl<'a> Emitter<'a> {
    pub(crate) fn new(node: &'a ComponentNode, origin: BlockPos, scope: &'a MaterialScope) -> Self {
        Self { node, origin, scope, out: Vec::new() }
    }

    pub(crate) fn finish(self) -> Vec<GeometryPrimitive> {
        self.out
    }

    fn int(&self, key: &str, default: i32) -> i32 {
        self.node.param_i32(key, default)
    }

    /// `material` param wins over the role's scoped binding.
    fn material(&self, role: &str) -> MaterialRef {
        match self.node.param_str("material") {
            Some(m) => MaterialRef::from(m),
            None => self.scope.resolve(role),
        }
    }

    fn role(&self, role: &str) -> MaterialRef {
        self.scope.resolve(role)
    }

    fn facing(&self) -> Facing {
        self.node
            .param_str("facing")
            .and_then(Facing::from_name)
            .unwrap_or_default()
    }

    /// Along-x unless `axis` is `"z"`
    fn along_z(&self) -> bool {
        self.node.param_str("axis") == Some("z")
    }

    fn push(&mut self, layer: i32, material: MaterialRef, local: Shape) {
        let id = format!("{}:{}", self.node.id, self.out.len());
        self.out.push(GeometryPrimitive {
            id,
            source: self.node.id.clone(),
            layer,
            material,
            shape: local.translate(self.origin),
        });
    }
}

fn p(x: i32, y: i32, z: i32) -> BlockPos {
    BlockPos::new(x, y, z)
}

fn gen_box(em: &mut Emitter<'_>) {
    let w = em.int("width", 3).max(1);
    let h = em.int("height", 3).max(1);
    let d = em.int("depth", 3).max(1);
    let (from, to) = (p(0, 0, 0), p(w - 1, h - 1, d - 1));
    let shape = if em.node.param_bool("hollow", false) {
        Shape::HollowBox { from, to }
    } else {
        Shape::Box { from, to }
    };
    let m = em.material("primary");
    em.push(LAYER_STRUCTURE, m, shape);
}

fn gen_wall(em: &mut Emitter<'_>) {
    let len = em.int("length", 5).max(1);
    let h = em.int("height", 3).max(1);
    let t = em.int("thickness", 1).max(1);
    let to = if em.along_z() { p(t - 1, h - 1, len - 1) } else { p(len - 1, h - 1, t - 1) };
    let m = em.material("primary");
    em.push(LAYER_STRUCTURE, m, Shape::Box { from: p(0, 0, 0), to });
}

fn gen_floor(em: &mut Emitter<'_>) {
    let w = em.int("width", 5).max(1);
    let d = em.int("depth", 5).max(1);
    let m = em.material("floor");
    em.push(LAYER_STRUCTURE, m, Shape::Box { from: p(0, 0, 0), to: p(w - 1, 0, d - 1) });
}

fn gen_foundation(em: &mut Emitter<'_>) {
    let w = em.int("width", 7).max(1);
    let d = em.int("depth", 7).max(1);
    let h = em.int("height", 1).max(1);
    let m = em.material("foundation");
    em.push(LAYER_FOUNDATION, m, Shape::Box { from: p(0, 0, 0), to: p(w - 1, h - 1, d - 1) });
}

fn gen_room(em: &mut Emitter<'_>) {
    let w = em.int("width", 7).max(3);
    let d = em.int("depth", 7).max(3);
    let h = em.int("height", 4).max(3);
    let shell = em.material("primary");
    em.push(LAYER_STRUCTURE, shell, Shape::HollowBox { from: p(0, 0, 0), to: p(w - 1, h - 1, d - 1) });

    let floor = em.role("floor");
    em.push(LAYER_STRUCTURE, floor, Shape::Box { from: p(1, 0, 1), to: p(w - 2, 0, d - 2) });

    if em.node.param_bool("door", true) {
        let door = em.role("door");
        em.push(LAYER_FIXTURE, door, Shape::Door { pos: p(w / 2, 1, 0), facing: Facing::North });
    }
    if em.node.param_bool("windows", true) && w >= 5 {
        let glass = em.role("window");
        let wy = (h / 2).max(1).min(h - 2);
        em.push(LAYER_FIXTURE, glass.clone(), Shape::Point { pos: p(1, wy, d - 1) });
        em.push(LAYER_FIXTURE, glass, Shape::Point { pos: p(w - 2, wy, d - 1) });
    }
}

fn gen_tower(em: &mut Emitter<'_>) {
    let r = em.int("radius", 3).max(1);
    let h = em.int("height", 10).max(1);
    let hollow = em.node.param_bool("hollow", true);
    let shell = em.material("primary");
    em.push(LAYER_STRUCTURE, shell, Shape::Cylinder { base: p(0, 0, 0), radius: r, height: h, hollow });

    if em.node.param_bool("roof", true) {
        let roof = em.role("roof");
        for i in 0..=r {
            em.push(
                LAYER_ROOF,
                roof.clone(),
                Shape::Cylinder { base: p(0, h + i, 0), radius: r - i, height: 1, hollow: false },
            );
        }
    }
}

fn gen_roof(em: &mut Emitter<'_>) {
    let w = em.int("width", 7).max(1);
    let d = em.int("depth", 7).max(1);
    let m = em.material("roof");
    if em.node.param_str("style") == Some("flat") {
        em.push(LAYER_ROOF, m, Shape::Box { from: p(0, 0, 0), to: p(w - 1, 0, d - 1) });
        return;
    }
    // Stepped pyramid, one layer inset per level.
    let mut i = 0;
    while w - 2 * i > 0 && d - 2 * i > 0 {
        em.push(
            LAYER_ROOF,
            m.clone(),
            Shape::Box { from: p(i, i, i), to: p(w - 1 - i, i, d - 1 - i) },
        );
        i += 1;
    }
}

fn gen_pillar(em: &mut Emitter<'_>) {
    let h = em.int("height", 4).max(1);
    let m = em.material("trim");
    em.push(LAYER_SUPPORT, m, Shape::Line { from: p(0, 0, 0), to: p(0, h - 1, 0) });
}

fn gen_window(em: &mut Emitter<'_>) {
    let w = em.int("width", 2).max(1);
    let h = em.int("height", 2).max(1);
    let to = if em.along_z() { p(0, h - 1, w - 1) } else { p(w - 1, h - 1, 0) };
    let m = em.material("window");
    em.push(LAYER_FIXTURE, m, Shape::Box { from: p(0, 0, 0), to });
}

fn gen_door(em: &mut Emitter<'_>) {
    let facing = em.facing();
    let m = em.material("door");
    em.push(LAYER_FIXTURE, m, Shape::Door { pos: p(0, 0, 0), facing });
}

fn gen_stairs(em: &mut Emitter<'_>) {
    let len = em.int("length", 4).max(1);
    let facing = em.facing();
    let (sx, sz) = facing.step();
    let m = em.material("stairs");
    for i in 0..len {
        em.push(LAYER_SUPPORT, m.clone(), Shape::Stair { pos: p(sx * i, i, sz * i), facing });
    }
}

fn gen_slab(em: &mut Emitter<'_>) {
    let half = match em.node.param_str("half") {
        Some("top") => SlabHalf::Top,
        _ => SlabHalf::Bottom,
    };
    let m = em.material("slab");
    em.push(LAYER_FIXTURE, m, Shape::Slab { pos: p(0, 0, 0), half });
}

fn gen_dome(em: &mut Emitter<'_>) {
    let r = em.int("radius", 5).max(1);
    let m = em.material("roof");
    em.push(LAYER_ROOF, m, Shape::Sphere { center: p(0, 0, 0), radius: r, hollow: true });
}

fn gen_path(em: &mut Emitter<'_>) {
    let len = em.int("length", 8).max(1);
    let to = if em.along_z() { p(0, 0, len - 1) } else { p(len - 1, 0, 0) };
    let m = em.material("path");
    em.push(LAYER_FOUNDATION, m, Shape::Line { from: p(0, 0, 0), to });
}

fn gen_fence(em: &mut Emitter<'_>) {
    let len = em.int("length", 6).max(1);
    let to = if em.along_z() { p(0, 0, len - 1) } else { p(len - 1, 0, 0) };
    let m = em.material("fence");
    em.push(LAYER_SUPPORT, m, Shape::Line { from: p(0, 0, 0), to });
}

fn gen_light(em: &mut Emitter<'_>) {
    let m = em.material("light");
    em.push(LAYER_LIGHTING, m, Shape::Point { pos: p(0, 0, 0) });
}

fn gen_tree(em: &mut Emitter<'_>, rng: &mut SeededRng) {
    let trunk = rng.int(4, 7) as i32;
    let crown = rng.int(2, 3) as i32;
    let log = em.role("log");
    let leaves = em.role("leaves");
    em.push(LAYER_DECORATION, log, Shape::Line { from: p(0, 0, 0), to: p(0, trunk - 1, 0) });
    em.push(
        LAYER_DECORATION,
        leaves,
        Shape::Sphere { center: p(0, trunk, 0), radius: crown, hollow: false },
    );
}
