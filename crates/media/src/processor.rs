//! Upload normalization.

use std::io::Cursor;

use image::ImageFormat;
use image::imageops::FilterType;

use crate::{MediaError, Result};

/// Width and height of every stored picture.
pub const OUTPUT_SIZE: u32 = 350;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1_000_000;

const ACCEPTED_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

/// Validates uploads and re-encodes them as square PNGs.
#[derive(Debug, Clone, Copy)]
pub struct ImageProcessor {
    max_upload_bytes: usize,
}

impl Default for ImageProcessor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_UPLOAD_BYTES)
    }
}

impl ImageProcessor {
    pub fn new(max_upload_bytes: usize) -> Self {
        Self { max_upload_bytes }
    }

    pub fn max_upload_bytes(&self) -> usize {
        self.max_upload_bytes
    }

    /// Checks the name and size of an upload, then decodes it, scales and
    /// crops it to fill [`OUTPUT_SIZE`] square and returns the PNG bytes.
    #[tracing::instrument(skip(self, bytes), fields(size = bytes.len()))]
    pub fn process_image(&self, filename: &str, bytes: &[u8]) -> Result<Vec<u8>> {
        if !has_image_extension(filename) {
            return Err(MediaError::UnsupportedFile);
        }
        if bytes.len() > self.max_upload_bytes {
            return Err(MediaError::TooLarge {
                limit: self.max_upload_bytes,
                actual: bytes.len(),
            });
        }

        let decoded = image::load_from_memory(bytes).map_err(MediaError::Decode)?;
        let resized = decoded.resize_to_fill(OUTPUT_SIZE, OUTPUT_SIZE, FilterType::Lanczos3);

        let mut out = Cursor::new(Vec::new());
        resized
            .write_to(&mut out, ImageFormat::Png)
            .map_err(MediaError::Encode)?;

        metrics::counter!("images_processed_total").increment(1);
        Ok(out.into_inner())
    }
}

fn has_image_extension(filename: &str) -> bool {
    filename
        .rsplit_once('.')
        .is_some_and(|(_, ext)| ACCEPTED_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
}
