//! Single addressable tiles.
//!
//! A [`Tile`] is either empty (id `-1`, always a transparent image of one
//! tile's size), static (a shared subimage of its tilesheet), or animated (an
//! [`AnimatedSprite`] whose current frame is republished as the tile image on
//! every update). Tiles never own their sheet; they remember the index of the
//! sheet in whatever table built them and share the sheet's decoded pixels.

use std::sync::Arc;

use image::RgbaImage;
use tsr_core::animation::AnimatedSprite;

use crate::error::TileError;
use crate::flags::TileFlags;
use crate::interact::{self, Interaction, InteractionContext};
use crate::metadata::TileMetadata;
use crate::tilesheet::Tilesheet;

/// Id of the empty, transparent tile.
pub const EMPTY_TILE_ID: i32 = -1;

#[derive(Debug, Clone)]
pub struct Tile {
    sheet: Option<usize>,
    id: i32,
    flags: TileFlags,
    metadata: TileMetadata,
    animation: Option<AnimatedSprite>,
    image: Arc<RgbaImage>,
}

impl Tile {
    /// Transparent tile of `width` x `height` pixels. `flags` are kept for
    /// queries but never change what is drawn.
    pub fn empty(width: u32, height: u32, flags: TileFlags) -> Self {
        Self::blank(Arc::new(RgbaImage::new(width, height)), flags)
    }

    pub(crate) fn blank(image: Arc<RgbaImage>, flags: TileFlags) -> Self {
        Self {
            sheet: None,
            id: EMPTY_TILE_ID,
            flags,
            metadata: TileMetadata::new(),
            animation: None,
            image,
        }
    }

    /// Resolve tile `id` of `sheet` with the given behaviour.
    ///
    /// When `flags` contains `ANIMATED` the metadata must carry an
    /// `animation` list; each `(tile_id, duration)` entry becomes one frame.
    pub fn from_sheet(
        sheet: &Tilesheet,
        id: i32,
        flags: TileFlags,
        metadata: TileMetadata,
    ) -> Result<Self, TileError> {
        if id == EMPTY_TILE_ID {
            return Ok(Self::blank(sheet.empty_image().clone(), flags));
        }
        let index = sheet.checked_index(i64::from(id))?;

        if !flags.contains(TileFlags::ANIMATED) {
            return Ok(Self {
                sheet: None,
                id,
                flags,
                metadata,
                animation: None,
                image: sheet.tile_image(index).clone(),
            });
        }

        let frames = metadata
            .animation()
            .map_err(|message| TileError::Metadata {
                path: format!("{}#{}", sheet.name(), id),
                message,
            })?
            .ok_or_else(|| TileError::MissingAnimation {
                sheet: sheet.name().to_string(),
                id: index,
            })?;
        let frames = frames
            .into_iter()
            .map(|(frame_id, duration)| {
                let frame_index = sheet.checked_index(frame_id)?;
                Ok((sheet.tile_image(frame_index).clone(), duration))
            })
            .collect::<Result<Vec<_>, TileError>>()?;
        let sprite = AnimatedSprite::from_frames(frames)?;
        let image = sprite.image().clone();

        Ok(Self {
            sheet: None,
            id,
            flags,
            metadata,
            animation: Some(sprite),
            image,
        })
    }

    /// Record which sheet (by table index) this tile came from.
    pub fn with_sheet_index(mut self, sheet_index: usize) -> Self {
        if self.id != EMPTY_TILE_ID {
            self.sheet = Some(sheet_index);
        }
        self
    }

    /// Advance the animation, if any. Returns `true` when the image changed.
    pub fn update(&mut self, timedelta: u64) -> bool {
        let Some(sprite) = self.animation.as_mut() else {
            return false;
        };
        if sprite.update(timedelta) {
            self.image = sprite.image().clone();
            true
        } else {
            false
        }
    }

    pub fn interact(&self, ctx: &InteractionContext<'_>) -> Option<Interaction> {
        interact::dispatch(self.flags, &self.metadata, ctx)
    }

    pub fn id(&self) -> i32 {
        self.id
    }

    /// Index of the tilesheet in the table that built this tile.
    ///
    /// Only a [`TileFactory`] knows that table, so tiles fetched straight from
    /// [`Tilesheet::get_tile`] report `None`, as do empty tiles.
    pub fn sheet_index(&self) -> Option<usize> {
        self.sheet
    }

    pub fn is_empty(&self) -> bool {
        self.id == EMPTY_TILE_ID
    }

    pub fn flags(&self) -> TileFlags {
        self.flags
    }

    pub fn metadata(&self) -> &TileMetadata {
        &self.metadata
    }

    pub fn image(&self) -> &Arc<RgbaImage> {
        &self.image
    }

    pub fn animation(&self) -> Option<&AnimatedSprite> {
        self.animation.as_ref()
    }

    pub fn is_solid(&self) -> bool {
        self.flags.contains(TileFlags::SOLID)
    }

    pub fn is_destructible(&self) -> bool {
        self.flags.contains(TileFlags::DESTRUCTIBLE)
    }

    pub fn is_animated(&self) -> bool {
        self.flags.contains(TileFlags::ANIMATED)
    }
}

/// Builds the tile for one map cell. Maps take a factory so games can attach
/// their own per-tile state without touching the loader.
pub trait TileFactory {
    fn make_tile(&self, sheet: &Tilesheet, sheet_index: usize, id: i32) -> Result<Tile, TileError>;
}

/// Default factory: whatever the sheet's flag and animation tables say.
#[derive(Debug, Default, Clone, Copy)]
pub struct SheetTileFactory;

impl TileFactory for SheetTileFactory {
    fn make_tile(&self, sheet: &Tilesheet, sheet_index: usize, id: i32) -> Result<Tile, TileError> {
        Ok(sheet.get_tile(id)?.with_sheet_index(sheet_index))
    }
}
