use bytes::Bytes;
use image::DynamicImage;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::{CompressionType, FilterType as PngFilter, PngEncoder};
use image::imageops::FilterType;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

const MIB: u64 = 1024 * 1024;

/// One rung of the source-size ladder: inputs up to `up_to_bytes` get these
/// output bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SizeTier {
    pub up_to_bytes: u64,
    pub max_dimension: u32,
    pub quality: u8,
}

/// Tuning knobs for the transform pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformConfig {
    /// Inputs at or below this size skip the pipeline entirely.
    pub passthrough_max_bytes: u64,
    /// Source-size ladder, checked in order. Inputs larger than every rung
    /// use the last one.
    pub tiers: Vec<SizeTier>,
    /// Stop re-encoding once the output is at or below this size.
    pub target_ceiling_bytes: u64,
    /// Total encode attempts per image, minimum one.
    pub max_attempts: u32,
    /// Dimension multiplier applied between attempts, in percent.
    pub dimension_step_percent: u32,
    /// Quality drop applied between attempts.
    pub quality_step: u8,
    /// Quality never drops below this.
    pub quality_floor: u8,
    /// Keep the original unless the transform saves at least this much, in
    /// percent of the original size.
    pub min_reduction_percent: u32,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            passthrough_max_bytes: 2 * MIB,
            tiers: vec![
                SizeTier {
                    up_to_bytes: 8 * MIB,
                    max_dimension: 2048,
                    quality: 80,
                },
                SizeTier {
                    up_to_bytes: 20 * MIB,
                    max_dimension: 1600,
                    quality: 70,
                },
                SizeTier {
                    up_to_bytes: u64::MAX,
                    max_dimension: 1280,
                    quality: 60,
                },
            ],
            target_ceiling_bytes: MIB,
            max_attempts: 3,
            dimension_step_percent: 75,
            quality_step: 10,
            quality_floor: 40,
            min_reduction_percent: 5,
        }
    }
}

/// Result of running the pipeline over one file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransformOutput {
    pub bytes: Bytes,
    pub content_type: String,
    /// Encode attempts that were made; zero means the input passed through
    /// untouched.
    pub attempts: u32,
}

struct Shrunk {
    bytes: Vec<u8>,
    content_type: &'static str,
    attempts: u32,
}

/// Formats the pipeline re-encodes. Everything else passes through
/// untouched so animations and exotic formats are never flattened.
fn is_eligible(content_type: &str) -> bool {
    matches!(content_type, "image/jpeg" | "image/png")
}

fn select_tier(tiers: &[SizeTier], size: u64) -> Option<SizeTier> {
    tiers
        .iter()
        .copied()
        .find(|tier| size <= tier.up_to_bytes)
        .or_else(|| tiers.last().copied())
}

/// Shrink an image to fit the configured ceilings.
///
/// Synchronous and CPU-bound; callers on an async runtime should wrap it
/// in `spawn_blocking`. Never fails: any decode or encode problem falls
/// back to the original bytes.
pub fn transform(config: &TransformConfig, bytes: Bytes, content_type: &str) -> TransformOutput {
    let original_len = bytes.len() as u64;

    if original_len <= config.passthrough_max_bytes || !is_eligible(content_type) {
        return passthrough(bytes, content_type, 0);
    }
    let Some(tier) = select_tier(&config.tiers, original_len) else {
        return passthrough(bytes, content_type, 0);
    };

    match shrink(config, &bytes, tier) {
        Ok(shrunk) => {
            let keep_threshold = original_len
                .saturating_mul(100u64.saturating_sub(config.min_reduction_percent as u64))
                / 100;
            if shrunk.bytes.len() as u64 > keep_threshold {
                debug!(
                    "transform: keeping original, {} -> {} bytes saves too little",
                    original_len,
                    shrunk.bytes.len()
                );
                return passthrough(bytes, content_type, shrunk.attempts);
            }
            if shrunk.bytes.len() as u64 > config.target_ceiling_bytes {
                warn!(
                    "transform: {} bytes still above the {} byte ceiling after {} attempts",
                    shrunk.bytes.len(),
                    config.target_ceiling_bytes,
                    shrunk.attempts
                );
            }
            TransformOutput {
                bytes: Bytes::from(shrunk.bytes),
                content_type: shrunk.content_type.to_string(),
                attempts: shrunk.attempts,
            }
        }
        Err(err) => {
            warn!("transform: falling back to original bytes: {err}");
            passthrough(bytes, content_type, 0)
        }
    }
}

fn passthrough(bytes: Bytes, content_type: &str, attempts: u32) -> TransformOutput {
    TransformOutput {
        bytes,
        content_type: content_type.to_string(),
        attempts,
    }
}

fn shrink(config: &TransformConfig, bytes: &[u8], tier: SizeTier) -> image::ImageResult<Shrunk> {
    let img = image::load_from_memory(bytes)?;
    // Alpha survives only in PNG; everything opaque goes to JPEG where the
    // quality knob actually buys size.
    let keep_alpha = img.color().has_alpha();

    let mut max_dim = tier.max_dimension.max(1);
    // A floor above the quality scale would invert the clamp bounds.
    let quality_floor = config.quality_floor.min(100);
    let mut quality = tier.quality.clamp(quality_floor, 100);
    let mut attempts = 1u32;
    let mut best = encode_fit(&img, max_dim, quality, keep_alpha)?;

    while best.len() as u64 > config.target_ceiling_bytes && attempts < config.max_attempts {
        max_dim = ((max_dim as u64 * config.dimension_step_percent as u64) / 100).max(1) as u32;
        quality = quality
            .saturating_sub(config.quality_step)
            .max(quality_floor);
        attempts += 1;
        let candidate = encode_fit(&img, max_dim, quality, keep_alpha)?;
        if candidate.len() < best.len() {
            best = candidate;
        }
    }

    Ok(Shrunk {
        bytes: best,
        content_type: if keep_alpha { "image/png" } else { "image/jpeg" },
        attempts,
    })
}

/// Encode `img` bounded to `max_dim` on its longer side. Images already
/// within bounds are never upscaled.
fn encode_fit(
    img: &DynamicImage,
    max_dim: u32,
    quality: u8,
    keep_alpha: bool,
) -> image::ImageResult<Vec<u8>> {
    let resized;
    let current = if img.width() > max_dim || img.height() > max_dim {
        resized = img.resize(max_dim, max_dim, FilterType::Lanczos3);
        &resized
    } else {
        img
    };

    let mut out = Vec::new();
    if keep_alpha {
        let encoder =
            PngEncoder::new_with_quality(&mut out, CompressionType::Best, PngFilter::Adaptive);
        current.write_with_encoder(encoder)?;
    } else {
        let encoder = JpegEncoder::new_with_quality(&mut out, quality);
        // The JPEG encoder takes no paletted or 16-bit buffers.
        DynamicImage::ImageRgb8(current.to_rgb8()).write_with_encoder(encoder)?;
    }
    Ok(out)
}
