//! Engine configuration loaded from an INI file.
//!
//! ```ini
//! [resources]
//! tilesheets_dir = /tilesheets
//! maps_dir = /maps
//!
//! [loop]
//! tick_ms = 16
//! max_frame_ms = 250
//! ```
//!
//! Missing keys keep their defaults, so an empty or partial file is valid.

use std::path::Path;

use configparser::ini::Ini;

const DEFAULT_TILESHEETS_DIR: &str = "/tilesheets";
const DEFAULT_MAPS_DIR: &str = "/maps";
const DEFAULT_TICK_MS: u64 = 16;
const DEFAULT_MAX_FRAME_MS: u64 = 250;

/// Where loaders look for content inside a resource pack.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceLayout {
    pub tilesheets_dir: String,
    pub maps_dir: String,
}

impl Default for ResourceLayout {
    fn default() -> Self {
        Self {
            tilesheets_dir: DEFAULT_TILESHEETS_DIR.to_string(),
            maps_dir: DEFAULT_MAPS_DIR.to_string(),
        }
    }
}

impl ResourceLayout {
    pub fn tilesheet_dir(&self, name: &str) -> String {
        format!("{}/{}", self.tilesheets_dir.trim_end_matches('/'), name)
    }

    pub fn map_path(&self, name: &str) -> String {
        format!("{}/{}.json", self.maps_dir.trim_end_matches('/'), name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EngineConfig {
    pub layout: ResourceLayout,
    /// Fixed simulation step in milliseconds.
    pub tick_ms: u64,
    /// Longest real frame fed into the tick clock before it is capped.
    pub max_frame_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            layout: ResourceLayout::default(),
            tick_ms: DEFAULT_TICK_MS,
            max_frame_ms: DEFAULT_MAX_FRAME_MS,
        }
    }
}

impl EngineConfig {
    pub fn load_from_file(path: &Path) -> Result<Self, String> {
        let mut ini = Ini::new();
        ini.load(path)
            .map_err(|e| format!("Failed to load config file {}: {e}", path.display()))?;
        let config = Self::from_ini(&ini)?;
        log::info!(
            "Loaded config from {}: tilesheets={}, maps={}, tick={}ms",
            path.display(),
            config.layout.tilesheets_dir,
            config.layout.maps_dir,
            config.tick_ms
        );
        Ok(config)
    }

    pub fn from_ini_str(text: &str) -> Result<Self, String> {
        let mut ini = Ini::new();
        ini.read(text.to_string())
            .map_err(|e| format!("Failed to parse config: {e}"))?;
        Self::from_ini(&ini)
    }

    fn from_ini(ini: &Ini) -> Result<Self, String> {
        let mut config = Self::default();

        if let Some(dir) = ini.get("resources", "tilesheets_dir") {
            config.layout.tilesheets_dir = dir;
        }
        if let Some(dir) = ini.get("resources", "maps_dir") {
            config.layout.maps_dir = dir;
        }
        if let Some(tick) = ini.getuint("loop", "tick_ms")? {
            config.tick_ms = tick;
        }
        if let Some(max) = ini.getuint("loop", "max_frame_ms")? {
            config.max_frame_ms = max;
        }

        if config.tick_ms == 0 {
            return Err("Config validation failed: tick_ms must be > 0".to_string());
        }
        if config.max_frame_ms < config.tick_ms {
            return Err(format!(
                "Config validation failed: max_frame_ms ({}) must be >= tick_ms ({})",
                config.max_frame_ms, config.tick_ms
            ));
        }
        Ok(config)
    }
}
