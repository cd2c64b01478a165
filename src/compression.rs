//! Best-effort shrinking of image attachments before upload.
//!
//! Compression never fails an action: any error is logged and the original bytes are
//! used unchanged.

use image::{GenericImageView, codecs::jpeg::JpegEncoder, imageops::FilterType};
use tracing::{info, warn};

use crate::attachment::{AttachmentFile, with_extension};

const MIN_QUALITY: u8 = 40;
const QUALITY_STEP: u8 = 10;
const BYTES_PER_MB: f64 = 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CompressionOptions {
    pub max_size_mb: f64,
    pub max_edge_px: u32,
    pub quality: u8,
}

impl Default for CompressionOptions {
    fn default() -> Self {
        Self {
            max_size_mb: 1.0,
            max_edge_px: 1920,
            quality: 85,
        }
    }
}

impl CompressionOptions {
    fn max_bytes(&self) -> usize {
        (self.max_size_mb * BYTES_PER_MB) as usize
    }
}

#[derive(Debug, Clone)]
pub struct CompressionOutcome {
    pub file: AttachmentFile,
    pub original_size: u64,
    pub compressed_size: u64,
}

impl CompressionOutcome {
    fn unchanged(file: AttachmentFile) -> Self {
        let size = file.size();
        Self {
            file,
            original_size: size,
            compressed_size: size,
        }
    }

    pub fn was_compressed(&self) -> bool {
        self.compressed_size < self.original_size
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CompressionError {
    #[error("failed to process image: {0}")]
    Image(#[from] image::ImageError),
    #[error("compression worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Shrink `file` when it is an image, on the blocking pool. Non-images pass through.
pub async fn compress(file: AttachmentFile, options: CompressionOptions) -> CompressionOutcome {
    if !file.is_image() {
        return CompressionOutcome::unchanged(file);
    }

    let source = file.bytes.clone();
    let result = tokio::task::spawn_blocking(move || compress_image_bytes(&source, options))
        .await
        .map_err(CompressionError::from)
        .and_then(|inner| inner);

    match result {
        Ok(bytes) if bytes.len() < file.bytes.len() => {
            let original_size = file.size();
            let compressed = AttachmentFile::new(
                with_extension(&file.file_name, "jpg"),
                mime::IMAGE_JPEG.to_string(),
                bytes,
            );
            info!(
                file = %file.file_name,
                original_size,
                compressed_size = compressed.size(),
                "image compressed"
            );
            CompressionOutcome {
                compressed_size: compressed.size(),
                file: compressed,
                original_size,
            }
        }
        Ok(_) => CompressionOutcome::unchanged(file),
        Err(err) => {
            warn!(?err, file = %file.file_name, "image compression failed; using original file");
            CompressionOutcome::unchanged(file)
        }
    }
}

/// Decode, downscale to the edge limit and re-encode as JPEG, lowering quality until
/// the output fits the size limit or the quality floor is reached.
pub fn compress_image_bytes(
    bytes: &[u8],
    options: CompressionOptions,
) -> Result<Vec<u8>, CompressionError> {
    let image = image::load_from_memory(bytes)?;
    let (width, height) = image.dimensions();
    let image = if width.max(height) > options.max_edge_px {
        image.resize(options.max_edge_px, options.max_edge_px, FilterType::Lanczos3)
    } else {
        image
    };
    let rgb = image.to_rgb8();

    let max_bytes = options.max_bytes();
    let mut quality = options.quality.clamp(MIN_QUALITY, 100);
    loop {
        let mut encoded = Vec::new();
        JpegEncoder::new_with_quality(&mut encoded, quality).encode_image(&rgb)?;
        if encoded.len() <= max_bytes || quality <= MIN_QUALITY {
            return Ok(encoded);
        }
        quality = quality.saturating_sub(QUALITY_STEP).max(MIN_QUALITY);
    }
}
