//! Geometry expansion
//!
//! Walks a component tree with an explicit worklist. Each entry carries the
//! accumulated translation of its ancestors and the material scope inherited
//! from them; transforms are translation-only.

use std::collections::BTreeMap;

use tracing::{debug, warn};

use crate::components::{ComponentKind, Emitter};
use crate::geometry::{GeometryPrimitive, MaterialRef};
use crate::rng::SeededRng;
use crate::scene::ComponentNode;
use crate::types::BlockPos;

/// Role bindings inherited down the tree
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MaterialScope {
    bindings: BTreeMap<String, String>,
}

impl MaterialScope {
    pub fn new() -> Self {
        Self::default()
    }

    /// Scope for a node: the parent's bindings with the node's overrides on top.
    pub fn child(&self, overrides: &BTreeMap<String, String>) -> MaterialScope {
        if overrides.is_empty() {
            return self.clone();
        }
        let mut bindings = self.bindings.clone();
        for (role, block) in overrides {
            bindings.insert(role.clone(), block.clone());
        }
        MaterialScope { bindings }
    }

    /// Bound literal for the role, or the symbolic token for later palette resolution.
    pub fn resolve(&self, role: &str) -> MaterialRef {
        match self.bindings.get(role) {
            Some(block) => MaterialRef::from(block.as_str()),
            None => MaterialRef::symbol(role),
        }
    }
}

/// Expand a single node (not its children) at the given world origin.
///
/// Unknown component types log a warning and produce nothing.
pub fn expand(
    node: &ComponentNode,
    origin: BlockPos,
    rng: &mut SeededRng,
    scope: &MaterialScope,
) -> Vec<GeometryPrimitive> {
    let Some(kind) = ComponentKind::from_name(&node.kind) else {
        warn!(node = %node.id, kind = %node.kind, "unknown component type, skipping");
        return Vec::new();
    };
    if node.transform.rotation.is_some() || node.transform.scale.is_some() {
        debug!(node = %node.id, "rotation/scale ignored, translation only");
    }

    let mut em = Emitter::new(node, origin, scope);
    kind.generate(&mut em, rng);
    em.finish()
}

/// Expand a node and all of its descendants in pre-order.
pub fn expand_tree(
    root: &ComponentNode,
    rng: &mut SeededRng,
    scope: &MaterialScope,
) -> Vec<GeometryPrimitive> {
    expand_tree_at(root, BlockPos::ORIGIN, rng, scope)
}

pub(crate) fn expand_tree_at(
    root: &ComponentNode,
    parent_offset: BlockPos,
    rng: &mut SeededRng,
    scope: &MaterialScope,
) -> Vec<GeometryPrimitive> {
    let mut out = Vec::new();
    let mut stack: Vec<(&ComponentNode, BlockPos, MaterialScope)> =
        vec![(root, parent_offset, scope.clone())];

    while let Some((node, offset, inherited)) = stack.pop() {
        let origin = offset.translate(node.transform.position);
        let node_scope = inherited.child(&node.materials);
        out.extend(expand(node, origin, rng, &node_scope));

        // Reverse push keeps declaration order on pop.
        for child in node.children.iter().rev() {
            stack.push((child, origin, node_scope.clone()));
        }
    }
    out
}
