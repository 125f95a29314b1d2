//! Screenshot preprocessing before OCR
//!
//! Profile headers (handle, follower counter) sit at the top of the screen, so only
//! that band is kept. The band is reduced to one luminance channel, contrast-stretched
//! and doubled in size, which gives the OCR engine larger, crisper glyphs.
//!
//! Every step is deterministic: the same input bytes always yield the same pixels.

use std::io::Cursor;

use image::imageops::FilterType;
use image::{DynamicImage, GrayImage, ImageFormat};

use crate::error::AudienceError;

/// Share of the image height kept from the top, as a fraction `NUM / DEN`.
const CROP_NUM: u64 = 2;
const CROP_DEN: u64 = 5;

const UPSCALE_FACTOR: u32 = 2;

/// Decode, crop to the top 40%, grayscale, auto-contrast and upscale by 2.
pub fn normalize(image_bytes: &[u8]) -> Result<GrayImage, AudienceError> {
    let decoded = image::load_from_memory(image_bytes)
        .map_err(|e| AudienceError::InvalidImage(e.to_string()))?;

    if decoded.width() == 0 || decoded.height() == 0 {
        return Err(AudienceError::InvalidImage("image has no pixels".to_string()));
    }

    let cropped = crop_top(&decoded);
    let mut gray = cropped.to_luma8();
    autocontrast(&mut gray);
    Ok(upscale(&gray))
}

/// Run [`normalize`] and encode the result as PNG, the format handed to OCR engines.
pub fn preprocess_for_ocr(image_bytes: &[u8]) -> Result<Vec<u8>, AudienceError> {
    let normalized = normalize(image_bytes)?;
    encode_png(&normalized)
}

pub fn encode_png(image: &GrayImage) -> Result<Vec<u8>, AudienceError> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .map_err(|e| AudienceError::InvalidImage(format!("PNG encoding failed: {}", e)))?;
    Ok(buffer.into_inner())
}

fn crop_top(image: &DynamicImage) -> DynamicImage {
    let height = image.height() as u64;
    let kept = ((height * CROP_NUM) / CROP_DEN).clamp(1, height) as u32;
    image.crop_imm(0, 0, image.width(), kept)
}

/// Linear stretch so the darkest pixel becomes 0 and the brightest 255.
/// A single-tone image has nothing to stretch and is left as is.
fn autocontrast(image: &mut GrayImage) {
    let (mut low, mut high) = (u8::MAX, u8::MIN);
    for pixel in image.pixels() {
        low = low.min(pixel.0[0]);
        high = high.max(pixel.0[0]);
    }
    if high <= low {
        return;
    }

    let range = (high - low) as u32;
    for pixel in image.pixels_mut() {
        let shifted = (pixel.0[0] - low) as u32;
        pixel.0[0] = ((shifted * 255 + range / 2) / range) as u8;
    }
}

fn upscale(image: &GrayImage) -> GrayImage {
    image::imageops::resize(
        image,
        image.width() * UPSCALE_FACTOR,
        image.height() * UPSCALE_FACTOR,
        FilterType::CatmullRom,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Luma, Rgb, RgbImage};

    fn png_bytes(image: &DynamicImage) -> Vec<u8> {
        let mut buffer = Cursor::new(Vec::new());
        image.write_to(&mut buffer, ImageFormat::Png).unwrap();
        buffer.into_inner()
    }

    /// Left half mid-gray, right half light-gray: low contrast on purpose.
    fn two_tone_screenshot(width: u32, height: u32) -> Vec<u8> {
        let img = RgbImage::from_fn(width, height, |x, _| {
            if x < width / 2 {
                Rgb([100, 100, 100])
            } else {
                Rgb([150, 150, 150])
            }
        });
        png_bytes(&DynamicImage::ImageRgb8(img))
    }

    #[test]
    fn test_normalize_crops_top_band_and_doubles_size() {
        let normalized = normalize(&two_tone_screenshot(100, 200)).unwrap();
        assert_eq!(normalized.width(), 200);
        assert_eq!(normalized.height(), 160);
    }

    #[test]
    fn test_normalize_stretches_contrast_to_full_range() {
        let normalized = normalize(&two_tone_screenshot(40, 50)).unwrap();
        let min = normalized.pixels().map(|p| p.0[0]).min().unwrap();
        let max = normalized.pixels().map(|p| p.0[0]).max().unwrap();
        assert_eq!(min, 0);
        assert_eq!(max, 255);
    }

    #[test]
    fn test_normalize_keeps_at_least_one_row() {
        let normalized = normalize(&two_tone_screenshot(10, 1)).unwrap();
        assert_eq!(normalized.height(), 2);
    }

    #[test]
    fn test_normalize_is_deterministic() {
        let bytes = two_tone_screenshot(30, 60);
        assert_eq!(normalize(&bytes).unwrap(), normalize(&bytes).unwrap());
    }

    #[test]
    fn test_flat_image_is_left_unchanged_by_autocontrast() {
        let mut flat = GrayImage::from_pixel(4, 4, Luma([90]));
        autocontrast(&mut flat);
        assert!(flat.pixels().all(|p| p.0[0] == 90));
    }

    #[test]
    fn test_undecodable_bytes_are_invalid_image() {
        let result = normalize(b"definitely not an image");
        assert!(matches!(result, Err(AudienceError::InvalidImage(_))));
    }

    #[test]
    fn test_preprocess_for_ocr_emits_png() {
        let png = preprocess_for_ocr(&two_tone_screenshot(20, 20)).unwrap();
        assert_eq!(&png[..8], b"\x89PNG\r\n\x1a\n");
    }
}
