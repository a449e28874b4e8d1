//! Theme palettes and material validity
//!
//! The full theme/material tables live upstream; this module defines the
//! traits they plug into plus a small built-in table so plans compile
//! without them.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Used whenever nothing else resolves.
pub const DEFAULT_MATERIAL: &str = "stone";

/// Resolved role -> block id table for one theme
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Palette {
    pub theme: String,
    pub entries: IndexMap<String, String>,
}

impl Palette {
    pub fn new(theme: impl Into<String>) -> Self {
        Self { theme: theme.into(), entries: IndexMap::new() }
    }

    pub fn with(mut self, role: &str, block: &str) -> Self {
        self.entries.insert(role.to_string(), block.to_string());
        self
    }

    pub fn get(&self, role: &str) -> Option<&str> {
        self.entries.get(role).map(|s| s.as_str())
    }
}

/// Supplies the palette for a theme name
pub trait ThemeSource {
    fn palette(&self, theme: &str) -> Option<Palette>;
}

/// Decides whether a block id exists on the target server
pub trait MaterialCatalog {
    fn is_valid(&self, block: &str, server_version: &str) -> bool;
}

/// Theme-independent role defaults, consulted when the palette lacks a role.
pub fn fallback_material(role: &str) -> Option<&'static str> {
    Some(match role {
        "primary" => "stone_bricks",
        "secondary" => "cobblestone",
        "accent" => "polished_andesite",
        "trim" => "oak_log",
        "foundation" => "cobblestone",
        "floor" => "oak_planks",
        "roof" => "dark_oak_planks",
        "window" => "glass_pane",
        "door" => "oak_door",
        "stairs" => "stone_brick_stairs",
        "slab" => "stone_brick_slab",
        "light" => "lantern",
        "path" => "gravel",
        "fence" => "oak_fence",
        "log" => "oak_log",
        "leaves" => "oak_leaves",
        "ground" => "grass_block",
        _ => return None,
    })
}

/// Small built-in theme table
#[derive(Debug, Clone, Copy, Default)]
pub struct BuiltinThemes;

impl ThemeSource for BuiltinThemes {
    fn palette(&self, theme: &str) -> Option<Palette> {
        let palette = match theme {
            "default" => Palette::new(theme)
                .with("primary", "stone_bricks")
                .with("secondary", "cobblestone")
                .with("floor", "oak_planks")
                .with("roof", "dark_oak_planks")
                .with("window", "glass_pane")
                .with("light", "lantern"),
            "medieval" => Palette::new(theme)
                .with("primary", "cobblestone")
                .with("secondary", "stone_bricks")
                .with("trim", "spruce_log")
                .with("floor", "spruce_planks")
                .with("roof", "dark_oak_planks")
                .with("door", "spruce_door")
                .with("window", "glass_pane")
                .with("stairs", "cobblestone_stairs")
                .with("light", "lantern")
                .with("path", "gravel"),
            "modern" => Palette::new(theme)
                .with("primary", "white_concrete")
                .with("secondary", "light_gray_concrete")
                .with("trim", "black_concrete")
                .with("floor", "polished_andesite")
                .with("roof", "gray_concrete")
                .with("door", "iron_door")
                .with("window", "glass")
                .with("stairs", "quartz_stairs")
                .with("light", "sea_lantern"),
            "rustic" => Palette::new(theme)
                .with("primary", "oak_planks")
                .with("secondary", "cobblestone")
                .with("trim", "stripped_oak_log")
                .with("floor", "spruce_planks")
                .with("roof", "spruce_planks")
                .with("door", "oak_door")
                .with("window", "glass_pane")
                .with("light", "torch")
                .with("fence", "spruce_fence"),
            "cherry" => Palette::new(theme)
                .with("primary", "cherry_planks")
                .with("trim", "cherry_log")
                .with("roof", "cherry_planks")
                .with("door", "cherry_door")
                .with("leaves", "cherry_leaves"),
            _ => return None,
        };
        Some(palette)
    }
}

/// Blocks introduced after 1.16, keyed by prefix, with the release that added them.
const INTRODUCED: &[(&str, (u32, u32))] = &[
    ("deepslate", (1, 17)),
    ("copper_bulb", (1, 21)),
    ("copper", (1, 17)),
    ("amethyst", (1, 17)),
    ("mud_brick", (1, 19)),
    ("mangrove", (1, 19)),
    ("cherry", (1, 20)),
    ("bamboo_planks", (1, 20)),
    ("tuff_brick", (1, 21)),
];

/// Version-aware validity check for block ids
#[derive(Debug, Clone, Copy, Default)]
pub struct VersionCatalog;

impl VersionCatalog {
    fn parse_version(version: &str) -> Option<(u32, u32)> {
        let mut parts = version.trim().split('.');
        let major = parts.next()?.parse().ok()?;
        let minor = parts.next()?.parse().ok()?;
        Some((major, minor))
    }
}

/// Strip namespace and block state: `minecraft:oak_door[half=upper]` -> `oak_door`
pub fn base_block_id(block: &str) -> &str {
    let without_state = block.split('[').next().unwrap_or(block);
    without_state.strip_prefix("minecraft:").unwrap_or(without_state)
}

impl MaterialCatalog for VersionCatalog {
    fn is_valid(&self, block: &str, server_version: &str) -> bool {
        let id = base_block_id(block);
        if id.is_empty()
            || !id
                .chars()
                .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == ':')
        {
            return false;
        }
        let Some(server) = Self::parse_version(server_version) else {
            return true;
        };
        INTRODUCED
            .iter()
            .find(|(prefix, _)| id.starts_with(prefix))
            .map(|(_, since)| server >= *since)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_theme_lookup() {
        let p = BuiltinThemes.palette("medieval").unwrap();
        assert_eq!(p.get("primary"), Some("cobblestone"));
        assert!(BuiltinThemes.palette("vaporwave").is_none());
    }

    #[test]
    fn test_version_gate() {
        let cat = VersionCatalog;
        assert!(cat.is_valid("cherry_planks", "1.20.4"));
        assert!(!cat.is_valid("cherry_planks", "1.19.2"));
        assert!(!cat.is_valid("deepslate_bricks", "1.16.5"));
        assert!(cat.is_valid("minecraft:stone", "1.8"));
        assert!(cat.is_valid("cherry_planks", "snapshot"));
    }

    #[test]
    fn test_malformed_ids_rejected() {
        assert!(!VersionCatalog.is_valid("Stone Bricks", "1.20"));
        assert!(!VersionCatalog.is_valid("", "1.20"));
    }

    #[test]
    fn test_base_block_id() {
        assert_eq!(base_block_id("minecraft:oak_door[half=upper]"), "oak_door");
        assert_eq!(base_block_id("glass"), "glass");
    }
}
