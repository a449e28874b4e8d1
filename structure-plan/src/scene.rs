//! Scene document
//!
//! The component tree handed over by upstream tooling. Only structural checks
//! happen here; the full schema is validated before the scene reaches us.

use std::collections::{BTreeMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{PlanError, Result};
use crate::passes::DetailPass;
use crate::types::BlockPos;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Scene {
    pub id: String,
    #[serde(default = "default_theme")]
    pub theme: String,
    pub components: Vec<ComponentNode>,
    #[serde(default = "default_passes")]
    pub detail_passes: Vec<DetailPass>,
}

fn default_theme() -> String {
    "default".into()
}

fn default_passes() -> Vec<DetailPass> {
    vec![DetailPass::default_lighting()]
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Transform {
    #[serde(default)]
    pub position: BlockPos,
    /// Accepted but not applied; expansion is translation-only
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotation: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComponentNode {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub transform: Transform,
    #[serde(default)]
    pub params: Value,
    /// Role overrides (`primary` -> `spruce_planks`) for this subtree
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub materials: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ComponentNode>,
}

impl ComponentNode {
    pub fn new(id: impl Into<String>, kind: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: kind.into(),
            transform: Transform::default(),
            params: Value::Null,
            materials: BTreeMap::new(),
            children: Vec::new(),
        }
    }

    pub fn at(mut self, x: i32, y: i32, z: i32) -> Self {
        self.transform.position = BlockPos::new(x, y, z);
        self
    }

    pub fn with_params(mut self, params: Value) -> Self {
        self.params = params;
        self
    }

    pub fn with_material(mut self, role: impl Into<String>, block: impl Into<String>) -> Self {
        self.materials.insert(role.into(), block.into());
        self
    }

    pub fn with_child(mut self, child: ComponentNode) -> Self {
        self.children.push(child);
        self
    }

    pub fn param_i32(&self, key: &str, default: i32) -> i32 {
        self.params
            .get(key)
            .and_then(|v| v.as_i64())
            .map(|v| v as i32)
            .unwrap_or(default)
    }

    pub fn param_bool(&self, key: &str, default: bool) -> bool {
        self.params.get(key).and_then(|v| v.as_bool()).unwrap_or(default)
    }

    pub fn param_str<'a>(&'a self, key: &str) -> Option<&'a str> {
        self.params.get(key).and_then(|v| v.as_str())
    }
}

impl Scene {
    pub fn new(id: impl Into<String>, theme: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            theme: theme.into(),
            components: Vec::new(),
            detail_passes: default_passes(),
        }
    }

    pub fn with_component(mut self, node: ComponentNode) -> Self {
        self.components.push(node);
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Structural checks: non-empty ids, unique node ids across the tree.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(PlanError::InvalidScene {
                path: "id".into(),
                reason: "scene id is empty".into(),
            });
        }

        let mut seen = HashSet::new();
        let mut stack: Vec<(&ComponentNode, String)> = self
            .components
            .iter()
            .enumerate()
            .map(|(i, n)| (n, format!("components[{}]", i)))
            .collect();

        while let Some((node, path)) = stack.pop() {
            if node.id.trim().is_empty() {
                return Err(PlanError::InvalidScene {
                    path,
                    reason: "component id is empty".into(),
                });
            }
            if !seen.insert(node.id.as_str()) {
                return Err(PlanError::DuplicateComponent(node.id.clone()));
            }
            for (i, child) in node.children.iter().enumerate() {
                stack.push((child, format!("{}.children[{}]", path, i)));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_scene_document() {
        let scene = Scene::from_json(
            r#"{
                "id": "cottage",
                "theme": "medieval",
                "components": [{
                    "id": "base",
                    "type": "foundation",
                    "transform": {"position": {"x": 0, "y": 0, "z": 0}, "rotation": 90},
                    "params": {"width": 7, "depth": 5},
                    "children": [{"id": "walls", "type": "room", "params": {"height": 4}}]
                }]
            }"#,
        )
        .unwrap();

        assert_eq!(scene.theme, "medieval");
        assert_eq!(scene.components[0].param_i32("width", 0), 7);
        assert_eq!(scene.components[0].children[0].kind, "room");
        assert_eq!(scene.detail_passes.len(), 1);
        assert!(scene.validate().is_ok());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let scene = Scene::new("s", "default").with_component(
            ComponentNode::new("a", "wall").with_child(ComponentNode::new("a", "wall")),
        );
        assert!(matches!(scene.validate(), Err(PlanError::DuplicateComponent(id)) if id == "a"));
    }

    #[test]
    fn test_empty_scene_id_rejected() {
        let scene = Scene::new(" ", "default");
        assert!(matches!(scene.validate(), Err(PlanError::InvalidScene { .. })));
    }

    #[test]
    fn test_param_defaults() {
        let node = ComponentNode::new("n", "wall").with_params(json!({"height": 3, "hollow": true}));
        assert_eq!(node.param_i32("height", 1), 3);
        assert_eq!(node.param_i32("length", 5), 5);
        assert!(node.param_bool("hollow", false));
        assert_eq!(node.param_str("material"), None);
    }
}
