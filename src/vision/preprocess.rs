//! Image preparation before recognition
//!
//! Screenshots of social posts are often small or low contrast. When enabled,
//! images are converted to grayscale and upscaled so the short side reaches a
//! minimum size, which noticeably helps Tesseract with thin handle fonts.

use image::imageops::FilterType;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;
use tracing::{debug, warn};

use crate::config::OcrPreprocessing;

/// Image bytes ready for the engine, with a file extension matching their format
pub struct PreparedImage {
    pub data: Vec<u8>,
    pub extension: &'static str,
}

/// Prepare raw image bytes according to `settings`.
///
/// Undecodable images are passed through untouched; the engine decides
/// whether it can read them.
pub fn prepare_image(bytes: &[u8], settings: &OcrPreprocessing) -> PreparedImage {
    if settings.enabled {
        match image::load_from_memory(bytes) {
            Ok(img) => match encode_png(&apply_preprocessing(img, settings)) {
                Ok(data) => {
                    return PreparedImage {
                        data,
                        extension: "png",
                    }
                }
                Err(e) => warn!("Failed to encode preprocessed image, using original: {}", e),
            },
            Err(e) => warn!("Failed to decode image for preprocessing, using original: {}", e),
        }
    }

    PreparedImage {
        data: bytes.to_vec(),
        extension: guess_extension(bytes),
    }
}

/// Grayscale and upscale a decoded image
pub fn apply_preprocessing(img: DynamicImage, settings: &OcrPreprocessing) -> DynamicImage {
    let mut img = if settings.grayscale {
        DynamicImage::ImageLuma8(img.to_luma8())
    } else {
        img
    };

    let scale = upscale_factor(img.width(), img.height(), settings.min_dimension, settings.max_scale);
    if scale > 1.0 {
        let new_width = (img.width() as f32 * scale).round() as u32;
        let new_height = (img.height() as f32 * scale).round() as u32;
        debug!(
            "Upscaling {}x{} -> {}x{} for OCR",
            img.width(),
            img.height(),
            new_width,
            new_height
        );
        img = img.resize_exact(new_width, new_height, FilterType::CatmullRom);
    }

    img
}

/// Factor needed for the short side to reach `min_dimension`, capped at `max_scale`
fn upscale_factor(width: u32, height: u32, min_dimension: u32, max_scale: u32) -> f32 {
    let short_side = width.min(height);
    if short_side == 0 || short_side >= min_dimension {
        return 1.0;
    }
    (min_dimension as f32 / short_side as f32).min(max_scale.max(1) as f32)
}

fn encode_png(img: &DynamicImage) -> image::ImageResult<Vec<u8>> {
    let mut buf = Cursor::new(Vec::new());
    img.write_to(&mut buf, ImageFormat::Png)?;
    Ok(buf.into_inner())
}

fn guess_extension(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .ok()
        .and_then(|f| f.extensions_str().first().copied())
        .unwrap_or("png")
}
