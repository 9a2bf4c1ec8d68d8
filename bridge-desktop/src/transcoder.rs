//! WebP derivative encoder.
//!
//! Decoding goes through `image`, which also gives us the EXIF orientation;
//! the pixels are rotated upright and re-encoded, so no source metadata
//! survives into the derivative.

use async_trait::async_trait;
use bridge_traits::{
    error::{BridgeError, Result},
    transcode::{DerivativeProfile, TranscodedImage, Transcoder},
};
use bytes::Bytes;
use image::{
    imageops::FilterType, metadata::Orientation, DynamicImage, GenericImageView, GrayImage,
    ImageDecoder, ImageReader,
};
use std::io::Cursor;
use tracing::{debug, instrument};

/// Candidate crop offsets examined along the long axis of a cover.
const COVER_CROP_CANDIDATES: u32 = 8;

#[derive(Debug, Clone)]
pub struct ImageTranscoder {
    filter: FilterType,
}

impl ImageTranscoder {
    pub fn new() -> Self {
        Self {
            filter: FilterType::Lanczos3,
        }
    }

    /// Faster, lower quality resampling. Handy for tests and small hosts.
    pub fn with_filter(filter: FilterType) -> Self {
        Self { filter }
    }
}

impl Default for ImageTranscoder {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transcoder for ImageTranscoder {
    #[instrument(skip(self, bytes), fields(input_len = bytes.len(), profile = %profile))]
    async fn transcode(&self, bytes: Bytes, profile: DerivativeProfile) -> Result<TranscodedImage> {
        let filter = self.filter;
        let encoded =
            tokio::task::spawn_blocking(move || encode_derivative(&bytes, profile, filter))
                .await
                .map_err(|e| {
                    BridgeError::OperationFailed(format!("Transcode task failed: {}", e))
                })??;

        debug!(
            width = encoded.width,
            height = encoded.height,
            output_len = encoded.bytes.len(),
            "Derivative encoded"
        );
        Ok(encoded)
    }
}

fn encode_derivative(
    bytes: &[u8],
    profile: DerivativeProfile,
    filter: FilterType,
) -> Result<TranscodedImage> {
    let img = decode_upright(bytes)?;

    let resized = match profile.target() {
        (max_width, None) => {
            if img.width() > max_width {
                img.resize(max_width, u32::MAX, filter)
            } else {
                img
            }
        }
        (width, Some(height)) => cover_crop(&img, width, height, filter),
    };

    let (width, height) = resized.dimensions();
    let pixels = if resized.color().has_alpha() {
        DynamicImage::ImageRgba8(resized.to_rgba8())
    } else {
        DynamicImage::ImageRgb8(resized.to_rgb8())
    };

    let encoder = webp::Encoder::from_image(&pixels)
        .map_err(|reason| BridgeError::OperationFailed(format!("WebP encoding: {}", reason)))?;
    // WebPMemory is !Send; copy it out before leaving the blocking task.
    let encoded = encoder.encode(f32::from(profile.quality())).to_vec();

    Ok(TranscodedImage {
        bytes: Bytes::from(encoded),
        width,
        height,
    })
}

fn decode_upright(bytes: &[u8]) -> Result<DynamicImage> {
    let mut decoder = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()?
        .into_decoder()
        .map_err(|e| BridgeError::OperationFailed(format!("Image decode failed: {}", e)))?;

    let orientation = decoder.orientation().unwrap_or(Orientation::NoTransforms);
    let mut img = DynamicImage::from_decoder(decoder)
        .map_err(|e| BridgeError::OperationFailed(format!("Image decode failed: {}", e)))?;
    img.apply_orientation(orientation);

    Ok(img)
}

/// Scale so the image covers `width`x`height`, then cut the window with the
/// most luminance entropy along the overflowing axis.
fn cover_crop(img: &DynamicImage, width: u32, height: u32, filter: FilterType) -> DynamicImage {
    let (src_w, src_h) = img.dimensions();
    let scale = f64::max(
        f64::from(width) / f64::from(src_w.max(1)),
        f64::from(height) / f64::from(src_h.max(1)),
    );
    let scaled_w = ((f64::from(src_w) * scale).round() as u32).max(width);
    let scaled_h = ((f64::from(src_h) * scale).round() as u32).max(height);

    let scaled = img.resize_exact(scaled_w, scaled_h, filter);
    let (x, y) = entropy_anchor(&scaled.to_luma8(), width, height);
    scaled.crop_imm(x, y, width, height)
}

fn entropy_anchor(luma: &GrayImage, width: u32, height: u32) -> (u32, u32) {
    let (w, h) = luma.dimensions();
    let slack_x = w.saturating_sub(width);
    let slack_y = h.saturating_sub(height);
    let horizontal = slack_x >= slack_y;
    let slack = if horizontal { slack_x } else { slack_y };
    if slack == 0 {
        return (0, 0);
    }

    let steps = COVER_CROP_CANDIDATES.min(slack);
    let mut best = (0, 0);
    let mut best_entropy = f64::MIN;
    for step in 0..=steps {
        let offset = (u64::from(slack) * u64::from(step) / u64::from(steps)) as u32;
        let (x, y) = if horizontal { (offset, 0) } else { (0, offset) };
        let entropy = window_entropy(luma, x, y, width, height);
        if entropy > best_entropy {
            best_entropy = entropy;
            best = (x, y);
        }
    }
    best
}

fn window_entropy(luma: &GrayImage, x: u32, y: u32, width: u32, height: u32) -> f64 {
    let mut histogram = [0u32; 256];
    let mut samples = 0u32;
    // Every other pixel is plenty for ranking windows.
    for py in (y..y + height).step_by(2) {
        for px in (x..x + width).step_by(2) {
            histogram[luma.get_pixel(px, py)[0] as usize] += 1;
            samples += 1;
        }
    }
    if samples == 0 {
        return 0.0;
    }

    histogram
        .iter()
        .filter(|&&count| count > 0)
        .map(|&count| {
            let p = f64::from(count) / f64::from(samples);
            -p * p.log2()
        })
        .sum()
}
