//! Layered tilemaps.
//!
//! A map is a `layer x row x column` grid of cells, each naming a tile as
//! `"sheet:id"` (or `"-1"` for nothing). Map files live at
//! `<maps_dir>/<name>.json`:
//!
//! ```json
//! {
//!   "tilesheets": [{ "name": "overworld" }],
//!   "layers": [
//!     [["0:0", "0:1"], ["0:2", "0:3"]],
//!     [["-1", "-1"], ["0:7", "-1"]]
//!   ],
//!   "player": { "start_pos": [1, 0], "layer": 0 },
//!   "npcs": [
//!     { "position": [0, 1], "flags": ["STATIC_NPC"],
//!       "metadata": { "lines_to_say": ["Hello"] } }
//!   ]
//! }
//! ```
//!
//! Every cell is resolved into a [`Tile`] when the map is built, so a bad
//! reference fails the whole load. Collision and interaction are not layer
//! scoped: the flags and metadata of every layer, plus NPC placements,
//! accumulate onto the layer-0 cell at the same position.
//!
//! Layer surfaces are drawn on the first [`Tilemap::update`] and kept; later
//! updates only redraw tiles whose animation frame changed.

use std::borrow::Cow;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;

use glam::UVec2;
use image::{imageops, RgbaImage};
use serde::{Deserialize, Serialize};
use tsr_core::config::ResourceLayout;
use tsr_core::ResourcePack;

use crate::error::TileError;
use crate::flags::TileFlags;
use crate::interact::{self, HandlerRegistry, Interaction, InteractionContext};
use crate::metadata::{TileMetadata, ANIMATION_KEY};
use crate::tile::{SheetTileFactory, Tile, TileFactory, EMPTY_TILE_ID};
use crate::tilesheet::{Tilesheet, TilesheetStore};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TilesheetRef {
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerSpec {
    pub start_pos: [u32; 2],
    #[serde(default)]
    pub layer: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NpcPlacement {
    /// `[x, y]` in tiles.
    pub position: [u32; 2],
    /// Empty means `STATIC_NPC`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<String>,
    #[serde(default, skip_serializing_if = "TileMetadata::is_empty")]
    pub metadata: TileMetadata,
}

/// On-disk map description.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MapFile {
    pub tilesheets: Vec<TilesheetRef>,
    pub layers: Vec<Vec<Vec<String>>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub player: Option<PlayerSpec>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub npcs: Vec<NpcPlacement>,
}

/// Parsed cell string.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellRef {
    Empty,
    Tile { sheet: usize, id: u32 },
}

impl FromStr for CellRef {
    type Err = String;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        let text = text.trim();
        if text == "-1" {
            return Ok(Self::Empty);
        }
        let (sheet, id) = text
            .split_once(':')
            .ok_or_else(|| "expected 'sheet:id' or '-1'".to_string())?;
        let sheet = sheet
            .trim()
            .parse::<usize>()
            .map_err(|e| format!("bad tilesheet index: {e}"))?;
        let id = id
            .trim()
            .parse::<i64>()
            .map_err(|e| format!("bad tile id: {e}"))?;
        if id == i64::from(EMPTY_TILE_ID) {
            return Ok(Self::Empty);
        }
        let id = u32::try_from(id).map_err(|_| format!("bad tile id: {id}"))?;
        Ok(Self::Tile { sheet, id })
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Empty => write!(f, "{EMPTY_TILE_ID}"),
            Self::Tile { sheet, id } => write!(f, "{sheet}:{id}"),
        }
    }
}

/// One resolved grid position on one layer.
///
/// `flags` and `metadata` start as the tile's own; on layer 0 they also
/// collect everything stacked above and any NPC placed there.
#[derive(Debug, Clone)]
pub struct Cell {
    pub tile: Tile,
    pub flags: TileFlags,
    pub metadata: TileMetadata,
    source: CellRef,
}

impl Cell {
    fn new(tile: Tile, source: CellRef) -> Self {
        Self {
            flags: tile.flags(),
            metadata: tile.metadata().clone(),
            tile,
            source,
        }
    }

    pub fn source(&self) -> CellRef {
        self.source
    }

    pub fn interact(&self, ctx: &InteractionContext<'_>) -> Option<Interaction> {
        interact::dispatch(self.flags, &self.metadata, ctx)
    }

    /// Fold a cell from a higher layer into this one. Animation frames stay
    /// with the tile that owns them.
    fn absorb(&mut self, upper: &Cell) {
        self.flags |= upper.flags;
        for (key, value) in upper.metadata.as_map() {
            if key != ANIMATION_KEY {
                self.metadata.insert(key.clone(), value.clone());
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayerStart {
    pub position: UVec2,
    pub layer: usize,
}

#[derive(Debug, Clone)]
pub struct Tilemap {
    tilesheets: Vec<Arc<Tilesheet>>,
    layers: Vec<Vec<Vec<Cell>>>,
    width: u32,
    height: u32,
    tile_width: u32,
    tile_height: u32,
    player: Option<PlayerStart>,
    npcs: Vec<NpcPlacement>,
    surfaces: Vec<RgbaImage>,
}

impl Tilemap {
    /// Load `<maps_dir>/<name>.json` and every sheet it references.
    pub fn from_resource_pack<P: ResourcePack + ?Sized>(
        pack: &P,
        layout: &ResourceLayout,
        store: &mut TilesheetStore,
        name: &str,
    ) -> Result<Self, TileError> {
        let path = layout.map_path(name);
        let bytes = pack.read_bytes(&path)?;
        let map: MapFile = serde_json::from_slice(&bytes).map_err(|source| TileError::Json {
            path: path.clone(),
            source,
        })?;
        let sheets = map
            .tilesheets
            .iter()
            .map(|sheet| store.load(pack, layout, &sheet.name))
            .collect::<Result<Vec<_>, _>>()?;
        let tilemap = Self::from_map_file(&map, sheets)?;
        log::info!(
            "Loaded map '{}': {}x{} tiles, {} layers, {} npcs",
            name,
            tilemap.width,
            tilemap.height,
            tilemap.layers.len(),
            tilemap.npcs.len()
        );
        Ok(tilemap)
    }

    pub fn from_json_str(text: &str, tilesheets: Vec<Arc<Tilesheet>>) -> Result<Self, TileError> {
        let map: MapFile = serde_json::from_str(text).map_err(|source| TileError::Json {
            path: "<string>".to_string(),
            source,
        })?;
        Self::from_map_file(&map, tilesheets)
    }

    /// Build from a parsed map file. `tilesheets[i]` backs sheet index `i`.
    pub fn from_map_file(
        map: &MapFile,
        tilesheets: Vec<Arc<Tilesheet>>,
    ) -> Result<Self, TileError> {
        Self::from_map_file_with(map, tilesheets, &SheetTileFactory)
    }

    pub fn from_map_file_with<F: TileFactory + ?Sized>(
        map: &MapFile,
        tilesheets: Vec<Arc<Tilesheet>>,
        factory: &F,
    ) -> Result<Self, TileError> {
        if map.tilesheets.len() != tilesheets.len() {
            return Err(TileError::TilesheetCount {
                expected: map.tilesheets.len(),
                found: tilesheets.len(),
            });
        }
        for (expected, sheet) in map.tilesheets.iter().zip(&tilesheets) {
            if expected.name != sheet.name() {
                log::warn!(
                    "Map expects tilesheet '{}' but got '{}'",
                    expected.name,
                    sheet.name()
                );
            }
        }

        let mut grid = Vec::with_capacity(map.layers.len());
        for (layer, rows) in map.layers.iter().enumerate() {
            let mut parsed_rows = Vec::with_capacity(rows.len());
            for (row, cols) in rows.iter().enumerate() {
                let parsed = cols
                    .iter()
                    .enumerate()
                    .map(|(col, cell)| {
                        cell.parse::<CellRef>()
                            .map_err(|reason| TileError::BadCell {
                                cell: cell.clone(),
                                layer,
                                row,
                                col,
                                reason,
                            })
                    })
                    .collect::<Result<Vec<_>, _>>()?;
                parsed_rows.push(parsed);
            }
            grid.push(parsed_rows);
        }

        Self::build(tilesheets, grid, map.player.as_ref(), &map.npcs, factory)
    }

    /// Build from an in-memory grid with no player or NPCs.
    pub fn from_raw(
        tilesheets: Vec<Arc<Tilesheet>>,
        layers: Vec<Vec<Vec<CellRef>>>,
    ) -> Result<Self, TileError> {
        Self::build(tilesheets, layers, None, &[], &SheetTileFactory)
    }

    fn build<F: TileFactory + ?Sized>(
        tilesheets: Vec<Arc<Tilesheet>>,
        grid: Vec<Vec<Vec<CellRef>>>,
        player: Option<&PlayerSpec>,
        npcs: &[NpcPlacement],
        factory: &F,
    ) -> Result<Self, TileError> {
        let first_layer = grid.first().ok_or(TileError::NoLayers)?;
        let height = first_layer.len();
        let width = first_layer.first().map_or(0, Vec::len);
        for (layer, rows) in grid.iter().enumerate() {
            if rows.len() != height {
                return Err(TileError::LayerMismatch {
                    layer,
                    expected: height,
                    found: rows.len(),
                });
            }
            for (row, cols) in rows.iter().enumerate() {
                if cols.len() != width {
                    return Err(TileError::RowMismatch {
                        layer,
                        row,
                        expected: width,
                        found: cols.len(),
                    });
                }
            }
        }

        let first_sheet = tilesheets.first().ok_or(TileError::NoTilesheets)?;
        let (tile_width, tile_height) = first_sheet.tile_size();
        if let Some(sheet) = tilesheets
            .iter()
            .find(|s| s.tile_size() != (tile_width, tile_height))
        {
            return Err(TileError::TileSizeMismatch {
                sheet: sheet.name().to_string(),
                expected: (tile_width, tile_height),
                found: sheet.tile_size(),
            });
        }

        let mut layers = Vec::with_capacity(grid.len());
        for (layer, rows) in grid.into_iter().enumerate() {
            let mut resolved_rows = Vec::with_capacity(height);
            for (row, cols) in rows.into_iter().enumerate() {
                let mut resolved = Vec::with_capacity(width);
                for (col, cell) in cols.into_iter().enumerate() {
                    let bad_cell = |reason: String| TileError::BadCell {
                        cell: cell.to_string(),
                        layer,
                        row,
                        col,
                        reason,
                    };
                    let made = match cell {
                        CellRef::Empty => factory.make_tile(first_sheet, 0, EMPTY_TILE_ID),
                        CellRef::Tile { sheet, id } => {
                            let source = tilesheets.get(sheet).ok_or_else(|| {
                                bad_cell(format!("no tilesheet with index {sheet}"))
                            })?;
                            let id = i32::try_from(id).map_err(|e| bad_cell(e.to_string()))?;
                            factory.make_tile(source, sheet, id)
                        }
                    };
                    let tile = made.map_err(|source| TileError::TileInCell {
                        layer,
                        row,
                        col,
                        source: Box::new(source),
                    })?;
                    resolved.push(Cell::new(tile, cell));
                }
                resolved_rows.push(resolved);
            }
            layers.push(resolved_rows);
        }

        let (width, height) = (width as u32, height as u32);
        let out_of_bounds = |what: String, [x, y]: [u32; 2]| TileError::OutOfBounds {
            what,
            x,
            y,
            width,
            height,
        };

        let player = match player {
            Some(spec) => {
                let [x, y] = spec.start_pos;
                if x >= width || y >= height || spec.layer >= layers.len() {
                    return Err(out_of_bounds(
                        format!("player start on layer {}", spec.layer),
                        spec.start_pos,
                    ));
                }
                Some(PlayerStart {
                    position: UVec2::new(x, y),
                    layer: spec.layer,
                })
            }
            None => None,
        };

        let mut map = Self {
            tilesheets,
            layers,
            width,
            height,
            tile_width,
            tile_height,
            player,
            npcs: npcs.to_vec(),
            surfaces: Vec::new(),
        };
        map.merge_upper_layers();

        for (i, npc) in npcs.iter().enumerate() {
            let [x, y] = npc.position;
            if x >= width || y >= height {
                return Err(out_of_bounds(format!("npc {i}"), npc.position));
            }
            let flags = if npc.flags.is_empty() {
                TileFlags::STATIC_NPC
            } else {
                TileFlags::from_names(&npc.flags)?
            };
            let cell = &mut map.layers[0][y as usize][x as usize];
            cell.flags |= flags;
            cell.metadata.merge(&npc.metadata);
        }

        Ok(map)
    }

    fn merge_upper_layers(&mut self) {
        let Some((base, upper)) = self.layers.split_first_mut() else {
            return;
        };
        for layer in upper.iter() {
            for (base_row, row) in base.iter_mut().zip(layer) {
                for (base_cell, cell) in base_row.iter_mut().zip(row) {
                    base_cell.absorb(cell);
                }
            }
        }
    }

    /// Advance every tile by `timedelta` ms and return the layer surfaces,
    /// bottom layer first.
    pub fn update(&mut self, timedelta: u64) -> &[RgbaImage] {
        if self.surfaces.is_empty() {
            for layer in &mut self.layers {
                for cell in layer.iter_mut().flatten() {
                    cell.tile.update(timedelta);
                }
            }
            self.surfaces = (0..self.layers.len())
                .map(|l| self.render_layer(l))
                .collect();
            log::debug!(
                "Materialized {} layer surfaces of {}x{}px",
                self.surfaces.len(),
                self.width_in_pixels(),
                self.height_in_pixels()
            );
            return &self.surfaces;
        }

        let (tw, th) = (self.tile_width, self.tile_height);
        for (layer, surface) in self.layers.iter_mut().zip(&mut self.surfaces) {
            for (row, cells) in layer.iter_mut().enumerate() {
                for (col, cell) in cells.iter_mut().enumerate() {
                    if cell.tile.update(timedelta) {
                        let (x, y) = (col as u32 * tw, row as u32 * th);
                        let image: &RgbaImage = cell.tile.image();
                        imageops::replace(surface, image, i64::from(x), i64::from(y));
                    }
                }
            }
        }
        &self.surfaces
    }

    fn render_layer(&self, layer: usize) -> RgbaImage {
        let mut surface = RgbaImage::new(self.width_in_pixels(), self.height_in_pixels());
        for (row, cells) in self.layers[layer].iter().enumerate() {
            for (col, cell) in cells.iter().enumerate() {
                if cell.tile.is_empty() {
                    continue;
                }
                let x = col as u32 * self.tile_width;
                let y = row as u32 * self.tile_height;
                let image: &RgbaImage = cell.tile.image();
                imageops::replace(&mut surface, image, i64::from(x), i64::from(y));
            }
        }
        surface
    }

    /// All layers flattened bottom to top with alpha blending.
    pub fn composite(&self) -> RgbaImage {
        let mut out = RgbaImage::new(self.width_in_pixels(), self.height_in_pixels());
        for layer in 0..self.layers.len() {
            let surface = match self.surfaces.get(layer) {
                Some(surface) => Cow::Borrowed(surface),
                None => Cow::Owned(self.render_layer(layer)),
            };
            imageops::overlay(&mut out, &*surface, 0, 0);
        }
        out
    }

    pub fn is_materialized(&self) -> bool {
        !self.surfaces.is_empty()
    }

    pub fn surfaces(&self) -> &[RgbaImage] {
        &self.surfaces
    }

    /// `tile_data[layer][row][col]`.
    pub fn tile_data(&self) -> &[Vec<Vec<Cell>>] {
        &self.layers
    }

    pub fn cell(&self, layer: usize, row: usize, col: usize) -> Option<&Cell> {
        self.layers.get(layer)?.get(row)?.get(col)
    }

    /// Merged layer-0 cell at tile `(x, y)`.
    fn base_cell(&self, x: u32, y: u32) -> Option<&Cell> {
        self.cell(0, y as usize, x as usize)
    }

    /// Aggregated flags at `(x, y)`; empty outside the map.
    pub fn flags_at(&self, x: u32, y: u32) -> TileFlags {
        self.base_cell(x, y)
            .map_or(TileFlags::empty(), |cell| cell.flags)
    }

    pub fn metadata_at(&self, x: u32, y: u32) -> Option<&TileMetadata> {
        self.base_cell(x, y).map(|cell| &cell.metadata)
    }

    /// Out-of-bounds positions are not solid.
    pub fn is_solid_at(&self, x: u32, y: u32) -> bool {
        self.flags_at(x, y).contains(TileFlags::SOLID)
    }

    pub fn interact_at(&self, x: u32, y: u32, handlers: &HandlerRegistry) -> Option<Interaction> {
        let cell = self.base_cell(x, y)?;
        cell.interact(&InteractionContext::new(handlers).at(x, y, 0))
    }

    pub fn layer_count(&self) -> usize {
        self.layers.len()
    }

    pub fn width_in_tiles(&self) -> u32 {
        self.width
    }

    pub fn height_in_tiles(&self) -> u32 {
        self.height
    }

    pub fn width_in_pixels(&self) -> u32 {
        self.width * self.tile_width
    }

    pub fn height_in_pixels(&self) -> u32 {
        self.height * self.tile_height
    }

    pub fn tile_size(&self) -> (u32, u32) {
        (self.tile_width, self.tile_height)
    }

    /// Top-left pixel of tile `tile`.
    pub fn pixel_position(&self, tile: UVec2) -> UVec2 {
        tile * UVec2::new(self.tile_width, self.tile_height)
    }

    /// Tile containing `pixel`, if it is on the map.
    pub fn tile_at_pixel(&self, pixel: UVec2) -> Option<UVec2> {
        let tile = pixel / UVec2::new(self.tile_width, self.tile_height);
        (tile.x < self.width && tile.y < self.height).then_some(tile)
    }

    pub fn player_start(&self) -> Option<PlayerStart> {
        self.player
    }

    pub fn npcs(&self) -> &[NpcPlacement] {
        &self.npcs
    }

    pub fn tilesheets(&self) -> &[Arc<Tilesheet>] {
        &self.tilesheets
    }

    pub fn to_map_file(&self) -> MapFile {
        MapFile {
            tilesheets: self
                .tilesheets
                .iter()
                .map(|sheet| TilesheetRef {
                    name: sheet.name().to_string(),
                })
                .collect(),
            layers: self
                .layers
                .iter()
                .map(|rows| {
                    rows.iter()
                        .map(|cells| cells.iter().map(|cell| cell.source.to_string()).collect())
                        .collect()
                })
                .collect(),
            player: self.player.map(|p| PlayerSpec {
                start_pos: p.position.to_array(),
                layer: p.layer,
            }),
            npcs: self.npcs.clone(),
        }
    }

    pub fn to_json_string(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&self.to_map_file())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{quad_pack, quad_sheet, quad_sheet_image, BLUE, GREEN, RED, WHITE};
    use crate::tilesheet::{AnimationLink, TilesheetDescriptor};
    use serde_json::json;

    fn cells(rows: &[&[&str]]) -> Vec<Vec<CellRef>> {
        rows.iter()
            .map(|row| row.iter().map(|c| c.parse().expect("cell")).collect())
            .collect()
    }

    fn quad_map() -> MapFile {
        serde_json::from_value(json!({
            "tilesheets": [{ "name": "quad" }],
            "layers": [[["0:0", "0:1"], ["0:2", "0:3"]]]
        }))
        .expect("map")
    }

    #[test]
    fn cell_ref_parses_and_displays() {
        assert_eq!("-1".parse::<CellRef>(), Ok(CellRef::Empty));
        assert_eq!("0:-1".parse::<CellRef>(), Ok(CellRef::Empty));
        assert_eq!(
            " 2:17 ".parse::<CellRef>(),
            Ok(CellRef::Tile { sheet: 2, id: 17 })
        );
        assert_eq!(CellRef::Tile { sheet: 2, id: 17 }.to_string(), "2:17");
        assert_eq!(CellRef::Empty.to_string(), "-1");
        assert!("7".parse::<CellRef>().is_err());
        assert!("a:1".parse::<CellRef>().is_err());
        assert!("0:-3".parse::<CellRef>().is_err());
    }

    #[test]
    fn two_by_two_map_composites_sheet_colors() {
        let sheet = Arc::new(quad_sheet(&[], &[]));
        let mut map = Tilemap::from_map_file(&quad_map(), vec![sheet]).expect("map");
        assert_eq!((map.width_in_pixels(), map.height_in_pixels()), (2, 2));

        // Cells and sheet tiles both run in raster order.
        assert_eq!(map.update(0).len(), 1);
        let surface = map.surfaces()[0].clone();
        assert_eq!(*surface.get_pixel(0, 0), RED);
        assert_eq!(*surface.get_pixel(1, 0), GREEN);
        assert_eq!(*surface.get_pixel(0, 1), BLUE);
        assert_eq!(*surface.get_pixel(1, 1), WHITE);
        assert_eq!(map.composite(), surface);
    }

    #[test]
    fn surfaces_are_materialized_on_first_update() {
        let sheet = Arc::new(quad_sheet(&[], &[]));
        let mut map = Tilemap::from_raw(vec![sheet], vec![cells(&[&["0:1"]])]).expect("map");
        assert!(!map.is_materialized());
        assert_eq!(*map.composite().get_pixel(0, 0), GREEN);
        assert!(!map.is_materialized());
        map.update(0);
        assert!(map.is_materialized());
    }

    #[test]
    fn animated_cells_are_redrawn() {
        let links = [AnimationLink::new(0, 100, 3), AnimationLink::new(3, 100, 0)];
        let sheet = Arc::new(quad_sheet(&[], &links));
        let mut map = Tilemap::from_raw(vec![sheet], vec![cells(&[&["0:0", "0:1"]])]).expect("map");

        assert_eq!(*map.update(0)[0].get_pixel(0, 0), RED);
        assert_eq!(*map.update(99)[0].get_pixel(0, 0), RED);
        let surface = &map.update(1)[0];
        assert_eq!(*surface.get_pixel(0, 0), WHITE);
        assert_eq!(*surface.get_pixel(1, 0), GREEN);
        assert_eq!(*map.update(100)[0].get_pixel(0, 0), RED);
    }

    #[test]
    fn upper_layers_draw_over_lower_and_empty_cells_are_transparent() {
        let sheet = Arc::new(quad_sheet(&[], &[]));
        let layers = vec![cells(&[&["0:0", "0:0"]]), cells(&[&["-1", "0:2"]])];
        let mut map = Tilemap::from_raw(vec![sheet], layers).expect("map");
        let surfaces = map.update(0);
        assert_eq!(surfaces[1].get_pixel(0, 0).0[3], 0);
        let composite = map.composite();
        assert_eq!(*composite.get_pixel(0, 0), RED);
        assert_eq!(*composite.get_pixel(1, 0), BLUE);
    }

    #[test]
    fn flags_and_metadata_accumulate_on_layer_zero() {
        let mut descriptor = TilesheetDescriptor::new(1, 1);
        descriptor.flags.insert(2, TileFlags::SOLID);
        descriptor.flags.insert(3, TileFlags::DESTRUCTIBLE);
        let upper: TileMetadata =
            serde_json::from_value(json!({ "note": "upper", "shared": 2 })).expect("meta");
        let base: TileMetadata =
            serde_json::from_value(json!({ "shared": 1, "base_only": true })).expect("meta");
        descriptor.metadata.insert(2, upper);
        descriptor.metadata.insert(1, base);
        descriptor.animations = vec![AnimationLink::new(3, 10, 3)];
        let sheet = Tilesheet::from_parts("quad", quad_sheet_image(), descriptor).expect("sheet");
        let sheet = Arc::new(sheet);

        let layers = vec![
            cells(&[&["0:1", "0:0"]]),
            cells(&[&["0:2", "-1"]]),
            cells(&[&["-1", "0:3"]]),
        ];
        let map = Tilemap::from_raw(vec![sheet], layers).expect("map");

        assert!(map.is_solid_at(0, 0));
        assert!(!map.is_solid_at(1, 0));
        assert_eq!(
            map.flags_at(1, 0),
            TileFlags::DESTRUCTIBLE | TileFlags::ANIMATED
        );
        let merged = map.metadata_at(0, 0).expect("metadata");
        assert_eq!(merged.get("note"), Some(&json!("upper")));
        assert_eq!(merged.get("shared"), Some(&json!(2)));
        assert_eq!(merged.get("base_only"), Some(&json!(true)));
        assert!(map
            .metadata_at(1, 0)
            .expect("metadata")
            .get(ANIMATION_KEY)
            .is_none());

        let upper = map.cell(1, 0, 0).expect("upper cell");
        assert_eq!(upper.flags, TileFlags::SOLID);
        assert!(!map.cell(0, 0, 0).expect("base").tile.is_solid());
    }

    #[test]
    fn out_of_bounds_queries_are_harmless() {
        let sheet = Arc::new(quad_sheet(&[(0, TileFlags::SOLID)], &[]));
        let map = Tilemap::from_raw(vec![sheet], vec![cells(&[&["0:0"]])]).expect("map");
        assert!(map.is_solid_at(0, 0));
        assert!(!map.is_solid_at(5, 0));
        assert_eq!(map.flags_at(0, 9), TileFlags::empty());
        assert!(map.metadata_at(3, 3).is_none());
        assert!(map.interact_at(3, 3, &HandlerRegistry::new()).is_none());
    }

    #[test]
    fn npc_placement_joins_cell_and_speaks() {
        let sheet = Arc::new(quad_sheet(&[], &[]));
        let mut map_file = quad_map();
        map_file.npcs.push(NpcPlacement {
            position: [1, 0],
            flags: Vec::new(),
            metadata: serde_json::from_value(json!({ "lines_to_say": ["hi"] })).expect("meta"),
        });
        let map = Tilemap::from_map_file(&map_file, vec![sheet]).expect("map");
        assert!(map.flags_at(1, 0).contains(TileFlags::STATIC_NPC));
        assert_eq!(
            map.interact_at(1, 0, &HandlerRegistry::new()),
            Some(Interaction::Say(vec!["hi".to_string()]))
        );
        assert_eq!(map.interact_at(0, 0, &HandlerRegistry::new()), None);
    }

    #[test]
    fn custom_code_cells_reach_registered_handlers() {
        let sheet = Arc::new(quad_sheet(&[], &[]));
        let mut map_file = quad_map();
        map_file.npcs.push(NpcPlacement {
            position: [0, 1],
            flags: vec!["CUSTOM_CODE".to_string()],
            metadata: serde_json::from_value(json!({ "function": "lever" })).expect("meta"),
        });
        let map = Tilemap::from_map_file(&map_file, vec![sheet]).expect("map");
        let mut handlers = HandlerRegistry::new();
        handlers.register("lever", |ctx, _| {
            Some(json!([ctx.position.0, ctx.position.1]))
        });
        assert_eq!(
            map.interact_at(0, 1, &handlers),
            Some(Interaction::Custom(json!([0, 1])))
        );
    }

    #[test]
    fn json_round_trip_preserves_layout() {
        let sheet = Arc::new(quad_sheet(&[(3, TileFlags::SOLID)], &[]));
        let mut map_file: MapFile = serde_json::from_value(json!({
            "tilesheets": [{ "name": "quad" }],
            "layers": [
                [["0:0", "-1", "0:3"], ["0:1", "0:2", "-1"]],
                [["-1", "0:3", "-1"], ["-1", "-1", "0:0"]]
            ],
            "player": { "start_pos": [2, 1], "layer": 1 }
        }))
        .expect("map");
        map_file.npcs.push(NpcPlacement {
            position: [0, 0],
            flags: vec!["TELEPORTER".to_string()],
            metadata: serde_json::from_value(json!({ "teleport_map": "cave" })).expect("meta"),
        });
        let map = Tilemap::from_map_file(&map_file, vec![sheet.clone()]).expect("map");

        let text = map.to_json_string().expect("serialize");
        let reparsed = Tilemap::from_json_str(&text, vec![sheet]).expect("reparse");

        assert_eq!(reparsed.to_map_file(), map_file);
        assert_eq!(reparsed.player_start(), map.player_start());
        let before = map.tile_data().iter().flatten().flatten();
        let after = reparsed.tile_data().iter().flatten().flatten();
        for (a, b) in before.zip(after) {
            assert_eq!(a.tile.id(), b.tile.id());
            assert_eq!(a.flags, b.flags);
            assert_eq!(a.metadata, b.metadata);
        }
        assert!(reparsed.is_solid_at(1, 0));
    }

    #[test]
    fn loads_map_and_sheets_from_pack() {
        let mut pack = quad_pack(r#"{ "tile_size": "1x1", "flags": { "3": ["SOLID"] } }"#);
        let layout = ResourceLayout::default();
        pack.mkdir_all(&layout.maps_dir).expect("mkdir");
        let map_json = serde_json::to_vec(&json!({
            "tilesheets": [{ "name": "quad" }, { "name": "quad" }],
            "layers": [[["0:3", "1:1"]]],
            "player": { "start_pos": [1, 0] }
        }))
        .expect("json");
        pack.write_file(&layout.map_path("field"), map_json)
            .expect("write map");

        let mut store = TilesheetStore::new();
        let mut map =
            Tilemap::from_resource_pack(&pack, &layout, &mut store, "field").expect("load");
        assert_eq!(store.len(), 1);
        assert!(Arc::ptr_eq(&map.tilesheets()[0], &map.tilesheets()[1]));
        assert!(map.is_solid_at(0, 0));
        assert_eq!(
            map.player_start(),
            Some(PlayerStart {
                position: UVec2::new(1, 0),
                layer: 0
            })
        );
        assert_eq!(
            map.cell(0, 0, 1).expect("cell").tile.sheet_index(),
            Some(1)
        );
        assert_eq!(*map.update(0)[0].get_pixel(1, 0), GREEN);
    }

    #[test]
    fn missing_map_is_file_not_found() {
        let pack = quad_pack(r#"{ "tile_size": "1x1" }"#);
        let mut store = TilesheetStore::new();
        let err = Tilemap::from_resource_pack(&pack, &ResourceLayout::default(), &mut store, "nope")
            .expect_err("no map");
        assert!(matches!(
            err,
            TileError::Pack(tsr_core::PackError::FileNotFound(_))
        ));
    }

    #[test]
    fn structural_errors_abort_the_load() {
        let sheet = Arc::new(quad_sheet(&[], &[]));
        let sheets = || vec![sheet.clone()];

        assert!(matches!(
            Tilemap::from_raw(sheets(), Vec::new()),
            Err(TileError::NoLayers)
        ));
        assert!(matches!(
            Tilemap::from_raw(Vec::new(), vec![cells(&[&["-1"]])]),
            Err(TileError::NoTilesheets)
        ));
        let short_layer = vec![cells(&[&["0:0"], &["0:0"]]), cells(&[&["0:0"]])];
        assert!(matches!(
            Tilemap::from_raw(sheets(), short_layer),
            Err(TileError::LayerMismatch {
                layer: 1,
                expected: 2,
                found: 1
            })
        ));
        assert!(matches!(
            Tilemap::from_raw(sheets(), vec![cells(&[&["0:0", "0:1"], &["0:0"]])]),
            Err(TileError::RowMismatch {
                layer: 0,
                row: 1,
                expected: 2,
                found: 1
            })
        ));
        let err = Tilemap::from_raw(sheets(), vec![cells(&[&["0:9"]])]).expect_err("id 9");
        match err {
            TileError::TileInCell {
                layer: 0,
                row: 0,
                col: 0,
                source,
            } => assert!(matches!(*source, TileError::BadTileName { id: 9, .. })),
            other => panic!("expected TileInCell, got {other:?}"),
        }
        assert!(matches!(
            Tilemap::from_raw(sheets(), vec![cells(&[&["-1", "3:0"]])]),
            Err(TileError::BadCell { col: 1, .. })
        ));

        let mut bad_string = quad_map();
        bad_string.layers[0][1][0] = "zero:two".to_string();
        assert!(matches!(
            Tilemap::from_map_file(&bad_string, sheets()),
            Err(TileError::BadCell {
                layer: 0,
                row: 1,
                col: 0,
                ..
            })
        ));
        assert!(matches!(
            Tilemap::from_map_file(&quad_map(), Vec::new()),
            Err(TileError::TilesheetCount {
                expected: 1,
                found: 0
            })
        ));
    }

    #[test]
    fn mixed_tile_sizes_are_rejected() {
        let small = Arc::new(quad_sheet(&[], &[]));
        let big = Tilesheet::from_parts("big", RgbaImage::new(4, 4), TilesheetDescriptor::new(2, 2))
            .expect("sheet");
        let err = Tilemap::from_raw(vec![small, Arc::new(big)], vec![cells(&[&["0:0"]])])
            .expect_err("sizes differ");
        assert!(matches!(
            err,
            TileError::TileSizeMismatch {
                expected: (1, 1),
                found: (2, 2),
                ..
            }
        ));
    }

    #[test]
    fn player_and_npcs_must_be_on_the_map() {
        let sheet = Arc::new(quad_sheet(&[], &[]));
        let mut off_map = quad_map();
        off_map.player = Some(PlayerSpec {
            start_pos: [2, 0],
            layer: 0,
        });
        assert!(matches!(
            Tilemap::from_map_file(&off_map, vec![sheet.clone()]),
            Err(TileError::OutOfBounds {
                x: 2,
                y: 0,
                width: 2,
                height: 2,
                ..
            })
        ));

        let mut bad_layer = quad_map();
        bad_layer.player = Some(PlayerSpec {
            start_pos: [0, 0],
            layer: 1,
        });
        assert!(matches!(
            Tilemap::from_map_file(&bad_layer, vec![sheet.clone()]),
            Err(TileError::OutOfBounds { .. })
        ));

        let mut npc = quad_map();
        npc.npcs.push(NpcPlacement {
            position: [0, 5],
            flags: Vec::new(),
            metadata: TileMetadata::new(),
        });
        assert!(matches!(
            Tilemap::from_map_file(&npc, vec![sheet]),
            Err(TileError::OutOfBounds { y: 5, .. })
        ));
    }

    #[test]
    fn pixel_and_tile_coordinates_convert() {
        let image = RgbaImage::new(32, 16);
        let sheet = Tilesheet::from_parts("big", image, TilesheetDescriptor::new(16, 16))
            .expect("sheet");
        let grid = cells(&[&["0:0", "0:1", "-1"], &["-1", "-1", "0:1"]]);
        let map = Tilemap::from_raw(vec![Arc::new(sheet)], vec![grid]).expect("map");
        assert_eq!((map.width_in_pixels(), map.height_in_pixels()), (48, 32));
        assert_eq!(map.pixel_position(UVec2::new(2, 1)), UVec2::new(32, 16));
        assert_eq!(
            map.tile_at_pixel(UVec2::new(47, 31)),
            Some(UVec2::new(2, 1))
        );
        assert_eq!(map.tile_at_pixel(UVec2::new(48, 0)), None);
    }
}
