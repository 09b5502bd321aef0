//! Shared fixtures for the crate's unit tests.

use std::io::Cursor;

use image::{ImageFormat, Rgba, RgbaImage};
use tsr_core::config::ResourceLayout;
use tsr_core::VirtualResourcePack;

use crate::flags::TileFlags;
use crate::tilesheet::{
    AnimationLink, Tilesheet, TilesheetDescriptor, TILESHEET_IMAGE, TILESHEET_JSON,
};

pub const RED: Rgba<u8> = Rgba([255, 0, 0, 255]);
pub const GREEN: Rgba<u8> = Rgba([0, 255, 0, 255]);
pub const BLUE: Rgba<u8> = Rgba([0, 0, 255, 255]);
pub const WHITE: Rgba<u8> = Rgba([255, 255, 255, 255]);

/// 2x2 pixel sheet of 1x1 tiles: 0 red, 1 green, 2 blue, 3 white.
pub fn quad_sheet_image() -> RgbaImage {
    let mut image = RgbaImage::new(2, 2);
    image.put_pixel(0, 0, RED);
    image.put_pixel(1, 0, GREEN);
    image.put_pixel(0, 1, BLUE);
    image.put_pixel(1, 1, WHITE);
    image
}

pub fn quad_sheet(flags: &[(u32, TileFlags)], links: &[AnimationLink]) -> Tilesheet {
    let mut descriptor = TilesheetDescriptor::new(1, 1);
    descriptor.flags = flags.iter().copied().collect();
    descriptor.animations = links.to_vec();
    Tilesheet::from_parts("quad", quad_sheet_image(), descriptor).expect("quad sheet")
}

pub fn png_bytes(image: &RgbaImage) -> Vec<u8> {
    let mut out = Cursor::new(Vec::new());
    image
        .write_to(&mut out, ImageFormat::Png)
        .expect("encode png");
    out.into_inner()
}

/// Pack holding the quad sheet under `/tilesheets/quad` with `sidecar_json`.
pub fn quad_pack(sidecar_json: &str) -> VirtualResourcePack {
    let mut pack = VirtualResourcePack::new();
    let dir = ResourceLayout::default().tilesheet_dir("quad");
    pack.mkdir_all(&dir).expect("mkdir");
    pack.write_file(
        &format!("{dir}/{TILESHEET_IMAGE}"),
        png_bytes(&quad_sheet_image()),
    )
    .expect("write png");
    pack.write_file(
        &format!("{dir}/{TILESHEET_JSON}"),
        sidecar_json.as_bytes().to_vec(),
    )
    .expect("write json");
    pack
}
