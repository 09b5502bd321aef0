pub mod animation;
pub mod config;
pub mod error;
pub mod resources;
pub mod time;

pub use error::PackError;
pub use resources::{normalize, ResourcePack, VirtualResourcePack};
