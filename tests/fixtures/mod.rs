//! Catalog fixtures shared by the in-process tests

use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;

/// Dimensions of the seeded base photo.
pub const PHOTO_WIDTH: u32 = 64;
pub const PHOTO_HEIGHT: u32 = 48;

pub const PHOTO_KEY: &str = "uploads/owner.png";

/// A catalog item with its main image key.
#[derive(Debug, Clone, Copy)]
pub struct ItemFixture {
    pub item_id: i64,
    pub category: &'static str,
    pub image_key: &'static str,
}

impl ItemFixture {
    /// Catalog display name.
    pub fn name(&self) -> String {
        format!("{} #{}", self.category, self.item_id)
    }
}

pub const TOP: ItemFixture = ItemFixture {
    item_id: 1,
    category: "top",
    image_key: "items/1/main.png",
};

pub const BOTTOM: ItemFixture = ItemFixture {
    item_id: 2,
    category: "bottom",
    image_key: "items/2/main.png",
};

pub const OUTER: ItemFixture = ItemFixture {
    item_id: 3,
    category: "outer",
    image_key: "items/3/main.png",
};

/// Listed in the catalog, but its image object was never uploaded.
pub const BROKEN: ItemFixture = ItemFixture {
    item_id: 4,
    category: "top",
    image_key: "items/4/missing.png",
};

pub const ALL_ITEMS: &[ItemFixture] = &[TOP, BOTTOM, OUTER, BROKEN];

/// Solid-colour PNG of the given size.
pub fn png(width: u32, height: u32) -> Vec<u8> {
    let mut bytes = Vec::new();
    DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, image::Rgb([40, 90, 160])))
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .expect("encode png");
    bytes
}
