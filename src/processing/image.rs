use std::io::Cursor;

use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, ImageFormat};
use imageproc::contrast::adaptive_threshold;
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::morphology::close;
use log::debug;

use crate::config::InputConfig;
use crate::models::RawDocument;
use crate::utils::TravelError;

/// Regions smaller than this are upscaled before recognition.
pub const MIN_RECOGNITION_WIDTH: u32 = 200;
pub const MIN_RECOGNITION_HEIGHT: u32 = 100;

const BLUR_SIGMA: f32 = 0.8;
const THRESHOLD_BLOCK_RADIUS: u32 = 5;

pub struct ImageProcessor;

impl ImageProcessor {
    /// Check the declared type and size, then decode to grayscale.
    pub fn decode(document: &RawDocument, limits: &InputConfig) -> Result<GrayImage, TravelError> {
        let mime = normalize_mime(&document.mime_type);
        if !limits.allowed_mime_types.iter().any(|allowed| allowed.eq_ignore_ascii_case(&mime)) {
            return Err(TravelError::UnsupportedMimeType(document.mime_type.clone()));
        }
        if document.bytes.len() > limits.max_file_size {
            return Err(TravelError::DocumentTooLarge {
                size: document.bytes.len(),
                limit: limits.max_file_size,
            });
        }

        let img = image::load_from_memory(&document.bytes)?;
        debug!("Decoded {} document: {}x{}", mime, img.width(), img.height());
        Ok(img.to_luma8())
    }

    /// Cleans a cropped stamp up for recognition: blur, binarize, close, upscale.
    pub fn preprocess_region(region: &GrayImage) -> GrayImage {
        let blurred = gaussian_blur_f32(region, BLUR_SIGMA);
        let binary = adaptive_threshold(&blurred, THRESHOLD_BLOCK_RADIUS);
        let closed = close(&binary, Norm::LInf, 1);
        Self::upscale_if_small(closed)
    }

    pub fn upscale_if_small(img: GrayImage) -> GrayImage {
        match upscaled_dimensions(img.width(), img.height()) {
            Some((width, height)) => {
                debug!(
                    "Upscaling region {}x{} -> {}x{}",
                    img.width(),
                    img.height(),
                    width,
                    height
                );
                imageops::resize(&img, width, height, FilterType::CatmullRom)
            }
            None => img,
        }
    }

    pub fn crop(img: &GrayImage, x: u32, y: u32, width: u32, height: u32) -> GrayImage {
        imageops::crop_imm(img, x, y, width, height).to_image()
    }

    pub fn encode_png(img: &GrayImage) -> Result<Vec<u8>, TravelError> {
        let mut buffer = Vec::with_capacity(img.width() as usize * img.height() as usize / 4);
        DynamicImage::ImageLuma8(img.clone()).write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)?;
        Ok(buffer)
    }
}

/// Target size when the region is under the minimum, scaled by the larger ratio.
pub fn upscaled_dimensions(width: u32, height: u32) -> Option<(u32, u32)> {
    if width == 0 || height == 0 {
        return None;
    }
    if height >= MIN_RECOGNITION_HEIGHT && width >= MIN_RECOGNITION_WIDTH {
        return None;
    }
    let scale = f64::max(
        MIN_RECOGNITION_HEIGHT as f64 / height as f64,
        MIN_RECOGNITION_WIDTH as f64 / width as f64,
    );
    Some(((width as f64 * scale) as u32, (height as f64 * scale) as u32))
}

/// `image/JPEG; name=x.jpg` -> `image/jpeg`
fn normalize_mime(mime: &str) -> String {
    mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase()
}
