//! Free-form per-tile metadata.
//!
//! Metadata is an arbitrary JSON object; the engine only interprets a handful
//! of keys:
//!
//! - `lines_to_say`: dialogue lines for `STATIC_NPC` tiles
//! - `teleport_map` / `teleport_pos`: destination for `TELEPORTER` tiles
//! - `function`: registered handler name for `CUSTOM_CODE` tiles
//! - `animation`: `[[tile_id, duration_ms], ...]` for `ANIMATED` tiles

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub const LINES_TO_SAY_KEY: &str = "lines_to_say";
pub const TELEPORT_MAP_KEY: &str = "teleport_map";
pub const TELEPORT_POS_KEY: &str = "teleport_pos";
pub const FUNCTION_KEY: &str = "function";
pub const ANIMATION_KEY: &str = "animation";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TileMetadata(Map<String, Value>);

impl From<Map<String, Value>> for TileMetadata {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

impl TileMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.insert(key.into(), value)
    }

    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Copy every key of `other` into `self`, overriding existing keys.
    pub fn merge(&mut self, other: &TileMetadata) {
        for (key, value) in &other.0 {
            self.0.insert(key.clone(), value.clone());
        }
    }

    /// Dialogue lines. A bare string counts as a single line.
    pub fn lines_to_say(&self) -> Option<Vec<String>> {
        match self.get(LINES_TO_SAY_KEY)? {
            Value::String(line) => Some(vec![line.clone()]),
            Value::Array(items) => Some(
                items
                    .iter()
                    .map(|item| match item {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect(),
            ),
            _ => None,
        }
    }

    pub fn teleport_map(&self) -> Option<&str> {
        self.get(TELEPORT_MAP_KEY)?.as_str()
    }

    pub fn teleport_pos(&self) -> Option<(i64, i64)> {
        match self.get(TELEPORT_POS_KEY)?.as_array()?.as_slice() {
            [x, y] => Some((x.as_i64()?, y.as_i64()?)),
            _ => None,
        }
    }

    pub fn function(&self) -> Option<&str> {
        self.get(FUNCTION_KEY)?.as_str()
    }

    /// `(tile_id, duration_ms)` frames, if an `animation` key is present.
    pub fn animation(&self) -> Result<Option<Vec<(i64, u64)>>, String> {
        let Some(value) = self.get(ANIMATION_KEY) else {
            return Ok(None);
        };
        let items = value
            .as_array()
            .ok_or_else(|| format!("'{ANIMATION_KEY}' must be a list of [id, duration] pairs"))?;
        items
            .iter()
            .enumerate()
            .map(|(i, item)| {
                frame_pair(item).ok_or_else(|| format!("animation frame {i} is not [id, duration]"))
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    pub fn set_animation(&mut self, frames: &[(u32, u64)]) {
        let list = frames
            .iter()
            .map(|&(id, duration)| Value::Array(vec![Value::from(id), Value::from(duration)]))
            .collect();
        self.0.insert(ANIMATION_KEY.to_string(), Value::Array(list));
    }
}

/// `[id, duration]` with an integer id and a non-negative duration.
fn frame_pair(item: &Value) -> Option<(i64, u64)> {
    match item.as_array()?.as_slice() {
        [id, duration] => Some((id.as_i64()?, duration.as_u64()?)),
        _ => None,
    }
}
