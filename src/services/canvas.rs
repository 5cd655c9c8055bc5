use image::{DynamicImage, GenericImageView, ImageFormat, Rgb, RgbImage, Rgba, RgbaImage};
use std::io::Cursor;

use crate::services::images::ImageData;

/// Blank PNG with the photo's dimensions, handed to every compositing step so
/// the output frame keeps the source photo's geometry.
///
/// Photos with an alpha channel get a transparent canvas, others a white one.
pub fn blank_canvas(photo: &ImageData) -> Result<ImageData, CanvasError> {
    let decoded = image::load_from_memory(&photo.bytes)?;
    let (width, height) = decoded.dimensions();
    if width == 0 || height == 0 {
        return Err(CanvasError::EmptyPhoto);
    }

    let canvas = if decoded.color().has_alpha() {
        DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([255, 255, 255, 0])))
    } else {
        DynamicImage::ImageRgb8(RgbImage::from_pixel(width, height, Rgb([255, 255, 255])))
    };

    let mut bytes = Vec::new();
    canvas.write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)?;

    Ok(ImageData::new(bytes, "image/png"))
}

#[derive(Debug, thiserror::Error)]
pub enum CanvasError {
    #[error("Failed to process photo: {0}")]
    Image(#[from] image::ImageError),

    #[error("Photo has no pixels")]
    EmptyPhoto,
}
