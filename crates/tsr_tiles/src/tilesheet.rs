//! Tilesheets: one image cut into a grid of equally sized tiles.
//!
//! Tile ids run in raster order (`id = row * tile_count_x + column`). A sheet
//! lives in its own directory of the resource pack:
//!
//! ```text
//! /tilesheets/<name>/tilesheet.png
//! /tilesheets/<name>/tilesheet.json   (or tilesheet.ini)
//! ```
//!
//! JSON sidecar:
//!
//! ```json
//! {
//!   "tile_size": "16x16",
//!   "flags": { "0": ["SOLID"], "5": ["SOLID", "DESTRUCTIBLE"] },
//!   "animations": [[8, 200, 9], [9, 200, 8]],
//!   "metadata": { "12": { "lines_to_say": ["Welcome!"] } }
//! }
//! ```
//!
//! INI sidecar:
//!
//! ```ini
//! [tilesheet]
//! tile_size = 16x16
//! [flags]
//! 0 = SOLID
//! 5 = SOLID, DESTRUCTIBLE
//! [animations]
//! 8 = 200, 9
//! 9 = 200, 8
//! ```
//!
//! Each animation entry is a `(tile_id, duration_ms, next_tile_id)` link.
//! Links are followed from the first unvisited id until an id repeats; the
//! collected frames become one animation keyed by that first ("proper") id,
//! which is flagged `ANIMATED`. Other ids in the chain stay static.
//!
//! A sheet is immutable once built.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

use configparser::ini::Ini;
use image::RgbaImage;
use serde::Deserialize;
use tsr_core::config::ResourceLayout;
use tsr_core::{PackError, ResourcePack};

use crate::error::TileError;
use crate::flags::TileFlags;
use crate::metadata::TileMetadata;
use crate::tile::{Tile, EMPTY_TILE_ID};

pub const TILESHEET_IMAGE: &str = "tilesheet.png";
pub const TILESHEET_JSON: &str = "tilesheet.json";
pub const TILESHEET_INI: &str = "tilesheet.ini";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct AnimationLink {
    pub tile_id: u32,
    pub duration: u64,
    pub next_tile_id: u32,
}

impl AnimationLink {
    pub fn new(tile_id: u32, duration: u64, next_tile_id: u32) -> Self {
        Self {
            tile_id,
            duration,
            next_tile_id,
        }
    }
}

/// Everything a sidecar file says about a sheet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TilesheetDescriptor {
    pub tile_width: u32,
    pub tile_height: u32,
    pub flags: HashMap<u32, TileFlags>,
    pub metadata: HashMap<u32, TileMetadata>,
    pub animations: Vec<AnimationLink>,
}

#[derive(Debug, Deserialize)]
struct TilesheetJson {
    tile_size: String,
    #[serde(default)]
    flags: HashMap<u32, Vec<String>>,
    #[serde(default)]
    animations: Vec<(u32, u64, u32)>,
    #[serde(default)]
    metadata: HashMap<u32, TileMetadata>,
}

impl TilesheetDescriptor {
    pub fn new(tile_width: u32, tile_height: u32) -> Self {
        Self {
            tile_width,
            tile_height,
            ..Self::default()
        }
    }

    pub fn from_json(text: &str, path: &str) -> Result<Self, TileError> {
        let raw: TilesheetJson = serde_json::from_str(text).map_err(|source| TileError::Json {
            path: path.to_string(),
            source,
        })?;
        let (tile_width, tile_height) =
            parse_tile_size(&raw.tile_size).map_err(|message| TileError::Metadata {
                path: path.to_string(),
                message,
            })?;
        let flags = raw
            .flags
            .into_iter()
            .map(|(id, names)| TileFlags::from_names(&names).map(|parsed| (id, parsed)))
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Self {
            tile_width,
            tile_height,
            flags,
            metadata: raw.metadata,
            animations: raw
                .animations
                .into_iter()
                .map(|(id, duration, next)| AnimationLink::new(id, duration, next))
                .collect(),
        })
    }

    pub fn from_ini(text: &str, path: &str) -> Result<Self, TileError> {
        let invalid = |message: String| TileError::Metadata {
            path: path.to_string(),
            message,
        };
        let mut ini = Ini::new();
        ini.read(text.to_string()).map_err(invalid)?;

        let size = ini
            .get("tilesheet", "tile_size")
            .ok_or_else(|| invalid("missing [tilesheet] tile_size".to_string()))?;
        let (tile_width, tile_height) = parse_tile_size(&size).map_err(invalid)?;
        let mut descriptor = Self::new(tile_width, tile_height);

        let sections = ini.get_map_ref();
        if let Some(flags) = sections.get("flags") {
            for (key, value) in flags {
                let id = parse_id(key).map_err(invalid)?;
                let names = value.as_deref().unwrap_or("");
                let parsed =
                    TileFlags::from_names(names.split(',').filter(|n| !n.trim().is_empty()))?;
                descriptor.flags.insert(id, parsed);
            }
        }
        if let Some(animations) = sections.get("animations") {
            for (key, value) in animations {
                let id = parse_id(key).map_err(invalid)?;
                let value = value.as_deref().unwrap_or("");
                let parts: Vec<&str> = value.split(',').map(str::trim).collect();
                let [duration, next] = parts.as_slice() else {
                    return Err(invalid(format!(
                        "animation for tile {id} must be 'duration, next_tile_id', got '{value}'"
                    )));
                };
                let duration = duration
                    .parse::<u64>()
                    .map_err(|e| invalid(format!("animation duration for tile {id}: {e}")))?;
                let next = parse_id(next).map_err(invalid)?;
                descriptor
                    .animations
                    .push(AnimationLink::new(id, duration, next));
            }
            // Section order is not preserved by the parser; keep proper ids stable.
            descriptor.animations.sort_by_key(|link| link.tile_id);
        }
        Ok(descriptor)
    }
}

fn parse_id(text: &str) -> Result<u32, String> {
    text.trim()
        .parse::<u32>()
        .map_err(|e| format!("invalid tile id '{}': {e}", text.trim()))
}

/// Parse `"WxH"` (or a single number for square tiles).
pub fn parse_tile_size(text: &str) -> Result<(u32, u32), String> {
    let text = text.trim();
    let (w, h) = match text.split_once(['x', 'X']) {
        Some((w, h)) => (w, h),
        None => (text, text),
    };
    let parse = |s: &str| {
        s.trim()
            .parse::<u32>()
            .map_err(|e| format!("invalid tile size '{text}': {e}"))
    };
    let size = (parse(w)?, parse(h)?);
    if size.0 == 0 || size.1 == 0 {
        return Err(format!("invalid tile size '{text}': dimensions must be > 0"));
    }
    Ok(size)
}

/// Follow animation links into frame lists keyed by proper id.
fn resolve_animation_chains(
    sheet: &str,
    links: &[AnimationLink],
) -> Result<BTreeMap<u32, Vec<(u32, u64)>>, TileError> {
    let by_id: HashMap<u32, &AnimationLink> =
        links.iter().map(|link| (link.tile_id, link)).collect();
    let mut seen = HashSet::new();
    let mut chains = BTreeMap::new();

    for link in links {
        if seen.contains(&link.tile_id) {
            continue;
        }
        let proper_id = link.tile_id;
        let mut frames = Vec::new();
        let mut current = proper_id;
        while seen.insert(current) {
            let step = by_id
                .get(&current)
                .ok_or_else(|| TileError::BrokenAnimationChain {
                    sheet: sheet.to_string(),
                    start: proper_id,
                    missing: current,
                })?;
            frames.push((current, step.duration));
            current = step.next_tile_id;
        }
        log::debug!(
            "Tilesheet '{}': animation {} has {} frames",
            sheet,
            proper_id,
            frames.len()
        );
        chains.insert(proper_id, frames);
    }
    Ok(chains)
}

#[derive(Debug, Clone)]
pub struct Tilesheet {
    name: String,
    image: Arc<RgbaImage>,
    tile_width: u32,
    tile_height: u32,
    tile_count_x: u32,
    tile_count_y: u32,
    tiles: Vec<Arc<RgbaImage>>,
    empty: Arc<RgbaImage>,
    flags: HashMap<u32, TileFlags>,
    metadata: HashMap<u32, TileMetadata>,
    animations: BTreeMap<u32, Vec<(u32, u64)>>,
}

impl Tilesheet {
    pub fn from_parts(
        name: impl Into<String>,
        image: RgbaImage,
        descriptor: TilesheetDescriptor,
    ) -> Result<Self, TileError> {
        let name = name.into();
        let (width, height) = image.dimensions();
        let TilesheetDescriptor {
            tile_width,
            tile_height,
            mut flags,
            metadata,
            animations: links,
        } = descriptor;

        if tile_width == 0
            || tile_height == 0
            || width % tile_width != 0
            || height % tile_height != 0
        {
            return Err(TileError::Dimensions {
                sheet: name,
                width,
                height,
                tile_width,
                tile_height,
            });
        }
        let tile_count_x = width / tile_width;
        let tile_count_y = height / tile_height;
        let count = tile_count_x * tile_count_y;
        let out_of_range = |id: u32| TileError::BadTileName {
            sheet: name.clone(),
            id: i64::from(id),
        };

        let mut tiles = Vec::with_capacity(count as usize);
        for id in 0..count {
            let x = id % tile_count_x * tile_width;
            let y = id / tile_count_x * tile_height;
            let tile = image::imageops::crop_imm(&image, x, y, tile_width, tile_height).to_image();
            tiles.push(Arc::new(tile));
        }

        if let Some(&id) = flags.keys().chain(metadata.keys()).find(|&&id| id >= count) {
            return Err(out_of_range(id));
        }
        if let Some(link) = links
            .iter()
            .find(|link| link.tile_id >= count || link.next_tile_id >= count)
        {
            let id = if link.tile_id >= count {
                link.tile_id
            } else {
                link.next_tile_id
            };
            return Err(out_of_range(id));
        }

        let animations = resolve_animation_chains(&name, &links)?;
        for &proper_id in animations.keys() {
            *flags.entry(proper_id).or_default() |= TileFlags::ANIMATED;
        }
        // ANIMATED ids outside every chain carry their frames in metadata.
        for (&id, tile_flags) in &flags {
            if !tile_flags.contains(TileFlags::ANIMATED) || animations.contains_key(&id) {
                continue;
            }
            let frames = metadata
                .get(&id)
                .map(TileMetadata::animation)
                .transpose()
                .map_err(|message| TileError::Metadata {
                    path: format!("{name}#{id}"),
                    message,
                })?
                .flatten()
                .filter(|frames| !frames.is_empty())
                .ok_or_else(|| TileError::MissingAnimation {
                    sheet: name.clone(),
                    id,
                })?;
            let in_range = 0..i64::from(count);
            if let Some(&(frame_id, _)) = frames.iter().find(|(f, _)| !in_range.contains(f)) {
                return Err(TileError::BadTileName {
                    sheet: name.clone(),
                    id: frame_id,
                });
            }
        }

        Ok(Self {
            empty: Arc::new(RgbaImage::new(tile_width, tile_height)),
            name,
            image: Arc::new(image),
            tile_width,
            tile_height,
            tile_count_x,
            tile_count_y,
            tiles,
            flags,
            metadata,
            animations,
        })
    }

    /// Load `<tilesheets_dir>/<name>/tilesheet.png` and its sidecar
    /// (`tilesheet.json`, falling back to `tilesheet.ini`).
    pub fn from_resource_pack<P: ResourcePack + ?Sized>(
        pack: &P,
        layout: &ResourceLayout,
        name: &str,
    ) -> Result<Self, TileError> {
        let dir = layout.tilesheet_dir(name);
        let image_path = format!("{dir}/{TILESHEET_IMAGE}");
        let bytes = pack.read_bytes(&image_path)?;
        let image = image::load_from_memory(&bytes)
            .map_err(|source| TileError::Image {
                path: image_path.clone(),
                source,
            })?
            .to_rgba8();

        let json_path = format!("{dir}/{TILESHEET_JSON}");
        let ini_path = format!("{dir}/{TILESHEET_INI}");
        let descriptor = if pack.exists(&json_path) {
            let text = read_text(pack, &json_path)?;
            TilesheetDescriptor::from_json(&text, &json_path)?
        } else if pack.exists(&ini_path) {
            let text = read_text(pack, &ini_path)?;
            TilesheetDescriptor::from_ini(&text, &ini_path)?
        } else {
            return Err(PackError::FileNotFound(json_path).into());
        };

        let sheet = Self::from_parts(name, image, descriptor)?;
        log::info!(
            "Loaded tilesheet '{}': {}x{} tiles of {}x{}px, {} animations",
            sheet.name,
            sheet.tile_count_x,
            sheet.tile_count_y,
            sheet.tile_width,
            sheet.tile_height,
            sheet.animations.len()
        );
        Ok(sheet)
    }

    /// Tile `id`; `-1` gives the transparent empty tile.
    ///
    /// The sheet does not know its own position in any map's tilesheet
    /// table, so the tile's `sheet_index()` is `None`. A [`TileFactory`]
    /// records it when a map builds its cells.
    ///
    /// [`TileFactory`]: crate::tile::TileFactory
    pub fn get_tile(&self, id: i32) -> Result<Tile, TileError> {
        if id == EMPTY_TILE_ID {
            return Ok(Tile::blank(self.empty.clone(), TileFlags::empty()));
        }
        let index = self.checked_index(i64::from(id))?;
        let flags = self.flags_for(index);
        let mut metadata = self.metadata.get(&index).cloned().unwrap_or_default();
        if let Some(frames) = self.animations.get(&index) {
            metadata.set_animation(frames);
        }
        Tile::from_sheet(self, id, flags, metadata)
    }

    /// Pixel offset of tile `id` within the sheet image.
    pub fn get_tile_position(&self, id: u32) -> (u32, u32) {
        (
            id % self.tile_count_x * self.tile_width,
            id / self.tile_count_x * self.tile_height,
        )
    }

    /// Fresh crop of tile `id` from the sheet image.
    pub fn get_tile_subsurface(&self, id: u32) -> Result<RgbaImage, TileError> {
        let index = self.checked_index(i64::from(id))?;
        let (x, y) = self.get_tile_position(index);
        let (width, height) = self.tile_size();
        Ok(image::imageops::crop_imm(&*self.image, x, y, width, height).to_image())
    }

    pub(crate) fn checked_index(&self, id: i64) -> Result<u32, TileError> {
        u32::try_from(id)
            .ok()
            .filter(|&index| index < self.tile_count())
            .ok_or_else(|| TileError::BadTileName {
                sheet: self.name.clone(),
                id,
            })
    }

    /// Pre-sliced image of an in-range tile.
    pub(crate) fn tile_image(&self, index: u32) -> &Arc<RgbaImage> {
        &self.tiles[index as usize]
    }

    pub(crate) fn empty_image(&self) -> &Arc<RgbaImage> {
        &self.empty
    }

    pub fn flags_for(&self, id: u32) -> TileFlags {
        self.flags.get(&id).copied().unwrap_or_default()
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn image(&self) -> &Arc<RgbaImage> {
        &self.image
    }

    pub fn tiles(&self) -> &[Arc<RgbaImage>] {
        &self.tiles
    }

    pub fn tile_size(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    pub fn tile_count_x(&self) -> u32 {
        self.tile_count_x
    }

    pub fn tile_count_y(&self) -> u32 {
        self.tile_count_y
    }

    pub fn tile_count(&self) -> u32 {
        self.tile_count_x * self.tile_count_y
    }

    /// Frames of the animation whose proper id is `id`.
    pub fn animation(&self, id: u32) -> Option<&[(u32, u64)]> {
        self.animations.get(&id).map(Vec::as_slice)
    }

    pub fn animation_ids(&self) -> impl Iterator<Item = u32> + '_ {
        self.animations.keys().copied()
    }
}

fn read_text<P: ResourcePack + ?Sized>(pack: &P, path: &str) -> Result<String, TileError> {
    let bytes = pack.read_bytes(path)?;
    String::from_utf8(bytes.into_owned()).map_err(|e| TileError::Metadata {
        path: path.to_string(),
        message: format!("not valid UTF-8: {e}"),
    })
}

/// Decoded sheets by name, shared between every map that uses them.
#[derive(Debug, Default)]
pub struct TilesheetStore {
    sheets: HashMap<String, Arc<Tilesheet>>,
}

impl TilesheetStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, name: &str) -> Option<&Arc<Tilesheet>> {
        self.sheets.get(name)
    }

    pub fn insert(&mut self, sheet: Tilesheet) -> Arc<Tilesheet> {
        let sheet = Arc::new(sheet);
        self.sheets.insert(sheet.name().to_string(), sheet.clone());
        sheet
    }

    /// Cached sheet `name`, loading it from `pack` on first use.
    pub fn load<P: ResourcePack + ?Sized>(
        &mut self,
        pack: &P,
        layout: &ResourceLayout,
        name: &str,
    ) -> Result<Arc<Tilesheet>, TileError> {
        if let Some(sheet) = self.sheets.get(name) {
            return Ok(sheet.clone());
        }
        let sheet = Tilesheet::from_resource_pack(pack, layout, name)?;
        Ok(self.insert(sheet))
    }

    pub fn len(&self) -> usize {
        self.sheets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sheets.is_empty()
    }

    pub fn clear(&mut self) {
        self.sheets.clear();
    }
}
