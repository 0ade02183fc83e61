//! Pure Rust engine on the `image` crate.
//!
//! ## Crate mapping
//!
//! | Step | Crate / function |
//! |---|---|
//! | Decode (JPEG, PNG, WebP) | `image::ImageReader` with format sniffing |
//! | Size guard | planned output area checked against `max_output_pixels` |
//! | Crop | `DynamicImage::crop_imm` on the planned region |
//! | Resample | `DynamicImage::resize_exact` with `Lanczos3` |
//! | Encode → JPEG | `image::codecs::jpeg::JpegEncoder` (quality) |
//! | Encode → PNG | `image::codecs::png::PngEncoder` |
//! | Encode → WebP | `image::codecs::webp::WebPEncoder` (lossless only) |
//! | Encode → AVIF | `image::codecs::avif::AvifEncoder` (rav1e, speed 6) |

use super::calculations::plan;
use super::{Engine, EngineError, Rendered};
use crate::fingerprint::SourceId;
use crate::variant::{Dimensions, Format, VariantSpec};
use image::imageops::FilterType;
use image::{DynamicImage, ImageReader};
use std::collections::BTreeMap;
use std::path::{Component, Path, PathBuf};

/// Reads sources from local directories, one per named storage.
pub struct RustEngine {
    roots: BTreeMap<String, PathBuf>,
    max_output_pixels: u64,
}

impl RustEngine {
    /// Output area allowed when none is configured: 50 megapixels.
    pub const DEFAULT_MAX_OUTPUT_PIXELS: u64 = 50_000_000;

    pub fn new(roots: BTreeMap<String, PathBuf>) -> Self {
        Self {
            roots,
            max_output_pixels: Self::DEFAULT_MAX_OUTPUT_PIXELS,
        }
    }

    /// Refuse to render outputs larger than `pixels` (width × height).
    pub fn with_max_output_pixels(mut self, pixels: u64) -> Self {
        self.max_output_pixels = pixels;
        self
    }

    fn source_path(&self, source: &SourceId) -> Result<PathBuf, EngineError> {
        let root = self.roots.get(&source.storage).ok_or_else(|| {
            EngineError::SourceUnreadable(format!("unknown storage {:?}", source.storage))
        })?;
        let name = Path::new(&source.name);
        let contained = name
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !contained {
            return Err(EngineError::SourceUnreadable(format!(
                "source name {:?} escapes its storage",
                source.name
            )));
        }
        Ok(root.join(name))
    }

    fn load(&self, source: &SourceId) -> Result<DynamicImage, EngineError> {
        let path = self.source_path(source)?;
        ImageReader::open(&path)
            .and_then(|reader| reader.with_guessed_format())
            .map_err(|e| EngineError::SourceUnreadable(format!("{}: {e}", path.display())))?
            .decode()
            .map_err(|e| {
                EngineError::SourceUnreadable(format!("failed to decode {}: {e}", path.display()))
            })
    }
}

impl Engine for RustEngine {
    fn process(&self, source: &SourceId, spec: &VariantSpec) -> Result<Rendered, EngineError> {
        let img = self.load(source)?;
        let source_dims = Dimensions {
            width: img.width(),
            height: img.height(),
        };
        let plan = plan(source_dims, spec);
        let area = u64::from(plan.output.width) * u64::from(plan.output.height);
        if area > self.max_output_pixels {
            return Err(EngineError::ProcessingFailed(format!(
                "output {} exceeds the {} pixel limit",
                plan.output, self.max_output_pixels
            )));
        }

        let cropped = if plan.crops(source_dims) {
            let r = plan.region;
            img.crop_imm(r.x, r.y, r.width, r.height)
        } else {
            img
        };
        let output =
            cropped.resize_exact(plan.output.width, plan.output.height, FilterType::Lanczos3);

        let bytes = encode(&output, spec.format, spec.quality.value())?;
        Ok(Rendered {
            bytes,
            dimensions: plan.output,
            format: spec.format,
        })
    }
}

fn encode(img: &DynamicImage, format: Format, quality: u8) -> Result<Vec<u8>, EngineError> {
    let mut bytes = Vec::new();
    let result = match format {
        Format::Jpeg => {
            // JPEG has no alpha channel
            let rgb = DynamicImage::ImageRgb8(img.to_rgb8());
            let encoder = image::codecs::jpeg::JpegEncoder::new_with_quality(&mut bytes, quality);
            rgb.write_with_encoder(encoder)
        }
        Format::Png => img.write_with_encoder(image::codecs::png::PngEncoder::new(&mut bytes)),
        Format::Webp => {
            let rgba = DynamicImage::ImageRgba8(img.to_rgba8());
            rgba.write_with_encoder(image::codecs::webp::WebPEncoder::new_lossless(&mut bytes))
        }
        Format::Avif => {
            let encoder =
                image::codecs::avif::AvifEncoder::new_with_speed_quality(&mut bytes, 6, quality);
            img.write_with_encoder(encoder)
        }
    };
    result.map_err(|e| EngineError::ProcessingFailed(format!("{format} encode failed: {e}")))?;
    Ok(bytes)
}
