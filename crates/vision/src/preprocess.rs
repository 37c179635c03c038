//! OCR preprocessing pipeline
//!
//! Raw captures of small UI fonts recognize poorly; recognition backends get
//! a grayscale, contrast-stretched, upscaled copy instead.

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma};

/// Prepare a captured region for text recognition: grayscale conversion,
/// linear contrast stretch, then upscale by `upscale_factor` (values <= 1.0
/// skip the resize). The input is never mutated.
pub fn prepare_for_ocr(region: &DynamicImage, upscale_factor: f32) -> DynamicImage {
    let gray = region.to_luma8();
    let stretched = stretch_contrast(&gray);

    let result = if upscale_factor > 1.0 {
        let w = ((stretched.width() as f32 * upscale_factor).round() as u32).max(1);
        let h = ((stretched.height() as f32 * upscale_factor).round() as u32).max(1);
        imageops::resize(&stretched, w, h, FilterType::Lanczos3)
    } else {
        stretched
    };

    DynamicImage::ImageLuma8(result)
}

/// Linear contrast stretch to the full [0, 255] range. A flat image is
/// returned unchanged (stretch would be undefined).
fn stretch_contrast(gray: &GrayImage) -> GrayImage {
    let mut min = u8::MAX;
    let mut max = u8::MIN;
    for p in gray.pixels() {
        min = min.min(p.0[0]);
        max = max.max(p.0[0]);
    }

    if max <= min {
        return gray.clone();
    }

    let range = (max - min) as f32;
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let v = gray.get_pixel(x, y).0[0];
        Luma([(((v - min) as f32 / range) * 255.0).round() as u8])
    })
}
