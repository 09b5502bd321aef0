pub mod error;
pub mod flags;
pub mod interact;
pub mod metadata;
pub mod tile;
pub mod tilemap;
pub mod tilesheet;

#[cfg(test)]
mod testing;

pub use error::TileError;
pub use flags::TileFlags;
pub use interact::{HandlerRegistry, Interaction, InteractionContext};
pub use metadata::TileMetadata;
pub use tile::{SheetTileFactory, Tile, TileFactory, EMPTY_TILE_ID};
pub use tilemap::{Cell, CellRef, MapFile, PlayerStart, Tilemap};
pub use tilesheet::{Tilesheet, TilesheetStore};
