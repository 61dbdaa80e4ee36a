// src/services/image_processor.rs
use crate::errors::PageGenError;
use crate::models::ReferenceImage;
use base64::{Engine as _, engine::general_purpose};
use image::{GenericImageView, ImageFormat as ImgFormat};

/// Hard limit on decoded upload dimensions, before any downscaling.
const MAX_SOURCE_DIMENSION: u32 = 8192;

/// Validates and downsizes uploaded reference photos before they are used
/// as synthesis references.
pub struct ImageProcessor {
    max_dimension: u32,
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new(2048)
    }
}

impl ImageProcessor {
    pub fn new(max_dimension: u32) -> Self {
        Self { max_dimension }
    }

    /// Returns the image unchanged when it fits, otherwise a PNG re-encode
    /// scaled so the longest edge equals the configured maximum. Undecodable
    /// data and sources beyond the hard dimension limit are rejected.
    pub fn resize_if_needed(&self, data: &[u8]) -> Result<(Vec<u8>, ImgFormat), PageGenError> {
        let format = image::guess_format(data)
            .map_err(|e| PageGenError::ImageProcessing(format!("Invalid image format: {}", e)))?;
        let img = image::load_from_memory_with_format(data, format)
            .map_err(|e| PageGenError::ImageProcessing(format!("Failed to load image: {}", e)))?;

        let (width, height) = img.dimensions();
        if width > MAX_SOURCE_DIMENSION || height > MAX_SOURCE_DIMENSION {
            return Err(PageGenError::ImageProcessing(format!(
                "{}x{} upload exceeds the {}px source limit",
                width, height, MAX_SOURCE_DIMENSION
            )));
        }

        if width <= self.max_dimension && height <= self.max_dimension {
            return Ok((data.to_vec(), format));
        }

        let ratio = (self.max_dimension as f32 / width.max(height) as f32).min(1.0);
        let new_width = ((width as f32 * ratio) as u32).max(1);
        let new_height = ((height as f32 * ratio) as u32).max(1);

        let resized = img.resize(new_width, new_height, image::imageops::FilterType::Lanczos3);

        let mut output = Vec::new();
        resized
            .write_to(&mut std::io::Cursor::new(&mut output), ImgFormat::Png)
            .map_err(|e| {
                PageGenError::ImageProcessing(format!("Failed to encode resized image: {}", e))
            })?;

        Ok((output, ImgFormat::Png))
    }

    /// Downsizes and base64-encodes an uploaded photo.
    pub fn to_reference_image(&self, data: &[u8]) -> Result<ReferenceImage, PageGenError> {
        let (bytes, format) = self.resize_if_needed(data)?;

        Ok(ReferenceImage {
            data: general_purpose::STANDARD.encode(bytes),
            mime_type: mime_for(format).to_string(),
        })
    }
}

fn mime_for(format: ImgFormat) -> &'static str {
    match format {
        ImgFormat::Jpeg => "image/jpeg",
        ImgFormat::Gif => "image/gif",
        ImgFormat::WebP => "image/webp",
        ImgFormat::Bmp => "image/bmp",
        _ => "image/png",
    }
}
