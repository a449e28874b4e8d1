//! Plan compiler
//!
//! Scene + seed -> hashed `BuildPlan`. Everything that feeds the hash is a
//! pure function of the scene, the seed, the theme tables and the server
//! version; `compiled_at` is the only wall-clock field and is excluded.

use std::collections::{BTreeMap, BTreeSet};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::components::{ComponentKind, LAYER_STRUCTURE};
use crate::error::Result;
use crate::expander::{expand_tree, expand_tree_at, MaterialScope};
use crate::geometry::{GeometryPrimitive, MaterialRef, Shape};
use crate::hash::content_hash;
use crate::palette::{
    fallback_material, BuiltinThemes, MaterialCatalog, Palette, ThemeSource, VersionCatalog,
    DEFAULT_MATERIAL,
};
use crate::rng::SeededRng;
use crate::scene::{ComponentNode, Scene};
use crate::types::{BlockPos, Bounds};

/// Target server facts that affect material validity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerContext {
    pub version: String,
}

impl ServerContext {
    pub fn new(version: impl Into<String>) -> Self {
        Self { version: version.into() }
    }
}

impl Default for ServerContext {
    fn default() -> Self {
        Self::new("1.20.4")
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningKind {
    UnknownTheme,
    UnknownComponent,
    UnknownMaterial,
    InvalidMaterial,
}

/// Recoverable resolution problem surfaced with the plan
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PlanWarning {
    pub kind: WarningKind,
    pub subject: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeStats {
    pub count: usize,
    pub estimated_cells: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PlanStats {
    pub primitive_count: usize,
    pub estimated_cells: u64,
    pub by_type: BTreeMap<String, TypeStats>,
    pub by_layer: BTreeMap<i32, usize>,
    pub materials: BTreeMap<String, usize>,
}

impl PlanStats {
    pub fn from_geometry(geometry: &[GeometryPrimitive]) -> Self {
        let mut stats = PlanStats::default();
        for p in geometry {
            let cells = p.estimated_cells();
            stats.primitive_count += 1;
            stats.estimated_cells += cells;
            let entry = stats.by_type.entry(p.kind().as_str().to_string()).or_default();
            entry.count += 1;
            entry.estimated_cells += cells;
            *stats.by_layer.entry(p.layer).or_default() += 1;
            *stats.materials.entry(p.material.to_string()).or_default() += 1;
        }
        stats
    }
}

/// Compiled, hashed, read-only description of a structure
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BuildPlan {
    pub scene_id: String,
    pub seed: u32,
    pub bounds: Option<Bounds>,
    pub resolved_palette: Palette,
    pub geometry: Vec<GeometryPrimitive>,
    pub stats: PlanStats,
    pub warnings: Vec<PlanWarning>,
    /// Unix millis; excluded from the hash
    pub compiled_at: u64,
    pub hash: String,
}

impl BuildPlan {
    /// Recompute the content hash from the current fields.
    pub fn compute_hash(&self) -> Result<String> {
        content_hash(self)
    }

    /// Assemble a plan from already-resolved geometry.
    pub(crate) fn assemble(
        scene_id: String,
        seed: u32,
        resolved_palette: Palette,
        geometry: Vec<GeometryPrimitive>,
        warnings: Vec<PlanWarning>,
    ) -> Result<BuildPlan> {
        let bounds = geometry.iter().map(|p| p.shape.bounds()).reduce(Bounds::union);
        let stats = PlanStats::from_geometry(&geometry);
        let mut plan = BuildPlan {
            scene_id,
            seed,
            bounds,
            resolved_palette,
            geometry,
            stats,
            warnings,
            compiled_at: now_millis(),
            hash: String::new(),
        };
        plan.hash = plan.compute_hash()?;
        Ok(plan)
    }

    /// Merge independently compiled plans into one, translating each by its origin.
    ///
    /// Primitive ids are prefixed with the source plan's scene id so they stay unique.
    pub fn merge(batch_id: &str, parts: Vec<(BuildPlan, BlockPos)>) -> Result<BuildPlan> {
        let mut geometry = Vec::new();
        let mut warnings = Vec::new();
        let mut palette = Palette::new("batch");
        let seed = parts.first().map(|(p, _)| p.seed).unwrap_or(0);
        for (plan, origin) in parts {
            for (role, block) in &plan.resolved_palette.entries {
                palette
                    .entries
                    .entry(format!("{}.{}", plan.scene_id, role))
                    .or_insert_with(|| block.clone());
            }
            for mut prim in plan.geometry {
                prim.id = format!("{}/{}", plan.scene_id, prim.id);
                prim.source = format!("{}/{}", plan.scene_id, prim.source);
                prim.shape = prim.shape.translate(origin);
                geometry.push(prim);
            }
            warnings.extend(plan.warnings);
        }
        BuildPlan::assemble(batch_id.to_string(), seed, palette, geometry, warnings)
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

/// Orchestrates expansion, detail passes, material resolution and hashing.
pub struct PlanCompiler<T = BuiltinThemes, C = VersionCatalog> {
    themes: T,
    catalog: C,
}

impl Default for PlanCompiler {
    fn default() -> Self {
        Self::new(BuiltinThemes, VersionCatalog)
    }
}

struct Warnings(BTreeSet<PlanWarning>);

impl Warnings {
    fn push(&mut self, kind: WarningKind, subject: &str, message: String) {
        let w = PlanWarning { kind, subject: subject.to_string(), message };
        if !self.0.contains(&w) {
            warn!(kind = ?w.kind, subject = %w.subject, "{}", w.message);
            self.0.insert(w);
        }
    }
}

impl<T: ThemeSource, C: MaterialCatalog> PlanCompiler<T, C> {
    pub fn new(themes: T, catalog: C) -> Self {
        Self { themes, catalog }
    }

    pub fn compile(&self, scene: &Scene, seed: u32, ctx: &ServerContext) -> Result<BuildPlan> {
        scene.validate()?;
        let mut warnings = Warnings(BTreeSet::new());

        let palette = self.resolve_palette(&scene.theme, ctx, &mut warnings);

        let mut rng = SeededRng::new(seed);
        let scope = MaterialScope::new();
        let mut geometry = Vec::new();
        for node in &scene.components {
            collect_unknown_kinds(node, &mut warnings);
            if ComponentKind::from_name(&node.kind).is_some() {
                geometry.extend(expand_tree(node, &mut rng, &scope));
            } else {
                geometry.push(fallback_box(node));
                let origin = node.transform.position;
                let node_scope = scope.child(&node.materials);
                for child in &node.children {
                    geometry.extend(expand_tree_at(child, origin, &mut rng, &node_scope));
                }
            }
        }

        for pass in &scene.detail_passes {
            pass.apply(&mut geometry, &mut rng);
        }

        for prim in &mut geometry {
            let block = self.resolve_material(&prim.material, &palette, ctx, &mut warnings);
            prim.material = MaterialRef::Literal(block);
        }

        let plan = BuildPlan::assemble(
            scene.id.clone(),
            seed,
            palette,
            geometry,
            warnings.0.into_iter().collect(),
        )?;
        info!(
            scene = %plan.scene_id,
            seed,
            primitives = plan.stats.primitive_count,
            cells = plan.stats.estimated_cells,
            hash = %plan.hash,
            "compiled build plan"
        );
        Ok(plan)
    }

    fn resolve_palette(&self, theme: &str, ctx: &ServerContext, warnings: &mut Warnings) -> Palette {
        let mut palette = match self.themes.palette(theme) {
            Some(p) => p,
            None => {
                warnings.push(
                    WarningKind::UnknownTheme,
                    theme,
                    format!("theme '{}' not found, using default", theme),
                );
                self.themes.palette("default").unwrap_or_else(|| Palette::new("default"))
            }
        };

        for (role, block) in palette.entries.iter_mut() {
            if self.catalog.is_valid(block, &ctx.version) {
                continue;
            }
            let replacement = fallback_material(role)
                .filter(|f| self.catalog.is_valid(f, &ctx.version))
                .unwrap_or(DEFAULT_MATERIAL);
            warnings.push(
                WarningKind::InvalidMaterial,
                block,
                format!(
                    "'{}' unavailable on {} for role '{}', using '{}'",
                    block, ctx.version, role, replacement
                ),
            );
            *block = replacement.to_string();
        }
        palette
    }

    /// Literal -> validated literal; symbol -> palette -> role fallback -> default.
    fn resolve_material(
        &self,
        material: &MaterialRef,
        palette: &Palette,
        ctx: &ServerContext,
        warnings: &mut Warnings,
    ) -> String {
        match material {
            MaterialRef::Literal(name) => {
                if self.catalog.is_valid(name, &ctx.version) {
                    name.clone()
                } else {
                    warnings.push(
                        WarningKind::InvalidMaterial,
                        name,
                        format!("'{}' unavailable on {}, using '{}'", name, ctx.version, DEFAULT_MATERIAL),
                    );
                    DEFAULT_MATERIAL.to_string()
                }
            }
            MaterialRef::Symbol(role) => {
                if let Some(block) = palette.get(role) {
                    return block.to_string();
                }
                if let Some(block) = fallback_material(role).filter(|b| self.catalog.is_valid(b, &ctx.version)) {
                    return block.to_string();
                }
                warnings.push(
                    WarningKind::UnknownMaterial,
                    &material.to_string(),
                    format!("no material for '{}', using '{}'", material, DEFAULT_MATERIAL),
                );
                DEFAULT_MATERIAL.to_string()
            }
        }
    }
}

fn collect_unknown_kinds(root: &ComponentNode, warnings: &mut Warnings) {
    let mut stack = vec![root];
    while let Some(node) = stack.pop() {
        if ComponentKind::from_name(&node.kind).is_none() {
            warnings.push(
                WarningKind::UnknownComponent,
                &node.id,
                format!("unknown component type '{}'", node.kind),
            );
        }
        stack.extend(node.children.iter());
    }
}

fn fallback_box(node: &ComponentNode) -> GeometryPrimitive {
    let pos = node.transform.position;
    GeometryPrimitive {
        id: format!("{}:0", node.id),
        source: node.id.clone(),
        layer: LAYER_STRUCTURE,
        material: MaterialRef::symbol("primary"),
        shape: Shape::Box { from: pos, to: pos },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::passes::DetailPass;
    use serde_json::json;

    fn cottage() -> Scene {
        let mut scene = Scene::new("cottage", "medieval")
            .with_component(
                ComponentNode::new("base", "foundation")
                    .with_params(json!({"width": 9, "depth": 9}))
                    .with_child(
                        ComponentNode::new("hall", "room")
                            .at(1, 1, 1)
                            .with_params(json!({"width": 7, "depth": 7, "height": 5}))
                            .with_child(ComponentNode::new("roof", "roof").at(0, 5, 0)),
                    ),
            )
            .with_component(ComponentNode::new("oak", "tree").at(14, 0, 3));
        scene.detail_passes.push(DetailPass::GroundCover { density: 0.2, ring: 2 });
        scene
    }

    #[test]
    fn test_compile_is_deterministic() {
        let compiler = PlanCompiler::default();
        let ctx = ServerContext::default();
        let a = compiler.compile(&cottage(), 1234, &ctx).unwrap();
        let b = compiler.compile(&cottage(), 1234, &ctx).unwrap();
        assert_eq!(a.hash, b.hash);
        assert_eq!(a.geometry.len(), b.geometry.len());
        assert_eq!(a.seed, 1234);
        assert_eq!(a.compute_hash().unwrap(), a.hash);
    }

    #[test]
    fn test_hash_ignores_compile_time() {
        let compiler = PlanCompiler::default();
        let mut plan = compiler.compile(&cottage(), 9, &ServerContext::default()).unwrap();
        plan.compiled_at += 60_000;
        assert_eq!(plan.compute_hash().unwrap(), plan.hash);
    }

    #[test]
    fn test_seed_is_recorded_per_compile() {
        let compiler = PlanCompiler::default();
        let ctx = ServerContext::default();
        let a = compiler.compile(&cottage(), 1, &ctx).unwrap();
        let b = compiler.compile(&cottage(), 2, &ctx).unwrap();
        assert_eq!(a.seed, 1);
        assert_eq!(b.seed, 2);
    }

    #[test]
    fn test_all_materials_resolved() {
        let plan = PlanCompiler::default()
            .compile(&cottage(), 5, &ServerContext::default())
            .unwrap();
        assert!(plan.geometry.iter().all(|p| !p.material.is_symbolic()));
        let walls = plan.geometry.iter().find(|p| p.id == "hall:0").unwrap();
        assert_eq!(walls.material, MaterialRef::literal("cobblestone"));
    }

    #[test]
    fn test_unknown_top_level_type_falls_back_to_box() {
        let scene = Scene::new("s", "default").with_component(
            ComponentNode::new("ufo", "spaceship")
                .at(3, 4, 5)
                .with_child(ComponentNode::new("beacon", "light").at(0, 1, 0)),
        );
        let plan = PlanCompiler::default().compile(&scene, 0, &ServerContext::default()).unwrap();
        assert_eq!(
            plan.geometry[0].shape,
            Shape::Box { from: BlockPos::new(3, 4, 5), to: BlockPos::new(3, 4, 5) }
        );
        assert_eq!(plan.geometry[1].shape, Shape::Point { pos: BlockPos::new(3, 5, 5) });
        assert!(plan.warnings.iter().any(|w| w.kind == WarningKind::UnknownComponent));
    }

    #[test]
    fn test_version_invalid_material_replaced() {
        let scene = Scene::new("s", "cherry").with_component(ComponentNode::new("w", "wall"));
        let plan = PlanCompiler::default()
            .compile(&scene, 0, &ServerContext::new("1.19.2"))
            .unwrap();
        assert_eq!(plan.geometry[0].material, MaterialRef::literal("stone_bricks"));
        assert!(plan.warnings.iter().any(|w| w.kind == WarningKind::InvalidMaterial));
    }

    #[test]
    fn test_unknown_symbol_uses_default() {
        let scene = Scene::new("s", "default").with_component(
            ComponentNode::new("w", "wall").with_params(json!({"material": "$mystery"})),
        );
        let plan = PlanCompiler::default().compile(&scene, 0, &ServerContext::default()).unwrap();
        assert_eq!(plan.geometry[0].material, MaterialRef::literal(DEFAULT_MATERIAL));
        assert!(plan.warnings.iter().any(|w| w.kind == WarningKind::UnknownMaterial));
    }

    #[test]
    fn test_hollow_stats_subtract_interior() {
        let scene = Scene::new("s", "default").with_component(
            ComponentNode::new("b", "box").with_params(json!({"width": 5, "height": 5, "depth": 5, "hollow": true})),
        );
        let mut scene = scene;
        scene.detail_passes.clear();
        let plan = PlanCompiler::default().compile(&scene, 0, &ServerContext::default()).unwrap();
        assert_eq!(plan.stats.estimated_cells, 125 - 27);
        assert_eq!(plan.stats.by_type["hollow_box"].count, 1);
    }

    #[test]
    fn test_merge_translates_and_prefixes() {
        let compiler = PlanCompiler::default();
        let ctx = ServerContext::default();
        let mut scene = Scene::new("lamp", "default").with_component(ComponentNode::new("l", "light"));
        scene.detail_passes.clear();
        let plan = compiler.compile(&scene, 0, &ctx).unwrap();

        let merged = BuildPlan::merge(
            "village",
            vec![(plan.clone(), BlockPos::ORIGIN), (plan, BlockPos::new(20, 0, 0))],
        )
        .unwrap();
        assert_eq!(merged.geometry.len(), 2);
        assert_eq!(merged.geometry[1].shape, Shape::Point { pos: BlockPos::new(20, 0, 0) });
        assert_eq!(merged.geometry[0].id, "lamp/l:0");
        assert_eq!(merged.compute_hash().unwrap(), merged.hash);
    }
}
