use tsr_core::animation::AnimationError;
use tsr_core::PackError;

/// Failures while loading or querying tilesheets and tilemaps.
///
/// Load errors are fatal for the whole sheet or map: nothing is partially
/// constructed.
#[derive(Debug, thiserror::Error)]
pub enum TileError {
    #[error(transparent)]
    Pack(#[from] PackError),

    #[error("failed to decode image {path}: {source}")]
    Image {
        path: String,
        #[source]
        source: image::ImageError,
    },

    #[error("failed to parse {path}: {source}")]
    Json {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid metadata in {path}: {message}")]
    Metadata { path: String, message: String },

    #[error(transparent)]
    Animation(#[from] AnimationError),

    #[error("tilesheet '{sheet}': image {width}x{height} is not a multiple of the tile size")]
    Dimensions {
        sheet: String,
        width: u32,
        height: u32,
        tile_width: u32,
        tile_height: u32,
    },

    #[error("tilesheet '{sheet}': no tile with id {id}")]
    BadTileName { sheet: String, id: i64 },

    #[error("unknown tile flag '{0}'")]
    UnknownFlag(String),

    #[error(
        "tilesheet '{sheet}': animation starting at tile {start} links to undefined tile {missing}"
    )]
    BrokenAnimationChain {
        sheet: String,
        start: u32,
        missing: u32,
    },

    #[error("tilesheet '{sheet}': tile {id} is flagged ANIMATED but has no animation frames")]
    MissingAnimation { sheet: String, id: u32 },

    #[error("map has no layers")]
    NoLayers,

    #[error("map references no tilesheets")]
    NoTilesheets,

    #[error("map lists {expected} tilesheets but {found} were supplied")]
    TilesheetCount { expected: usize, found: usize },

    #[error("layer {layer} has {found} rows, expected {expected}")]
    LayerMismatch {
        layer: usize,
        expected: usize,
        found: usize,
    },

    #[error("layer {layer} row {row} has {found} columns, expected {expected}")]
    RowMismatch {
        layer: usize,
        row: usize,
        expected: usize,
        found: usize,
    },

    #[error("tilesheet '{sheet}' uses {found:?} tiles but the map uses {expected:?}")]
    TileSizeMismatch {
        sheet: String,
        expected: (u32, u32),
        found: (u32, u32),
    },

    #[error("bad cell '{cell}' at layer {layer}, row {row}, column {col}: {reason}")]
    BadCell {
        cell: String,
        layer: usize,
        row: usize,
        col: usize,
        reason: String,
    },

    /// The tile factory failed for one cell; `source` keeps its typed error.
    #[error("layer {layer}, row {row}, column {col}: {source}")]
    TileInCell {
        layer: usize,
        row: usize,
        col: usize,
        #[source]
        source: Box<TileError>,
    },

    #[error("{what} at ({x}, {y}) is outside the {width}x{height} map")]
    OutOfBounds {
        what: String,
        x: u32,
        y: u32,
        width: u32,
        height: u32,
    },
}
