//! Concrete output descriptions.
//!
//! A [`VariantSpec`] describes *one* artifact to produce from a source image:
//! the final pixel width, an optional aspect ratio, how to crop, encoding
//! quality and format, and the density multiplier it was derived with. Specs
//! are produced by the [`options`](crate::options) resolver and consumed by the
//! [`engine`](crate::engine); they never carry display-only data such as alt
//! text, so two equal specs always describe byte-for-byte the same work.
//!
//! ## Types
//!
//! - [`Quality`]: Lossy encoding quality (1–100, default 80). Rejected outside that range.
//! - [`Ratio`]: Width divided by height, positive and finite.
//! - [`Crop`]: No crop, or an anchor point in percent of the source.
//! - [`FocalWindow`]: Region of interest in percent (`left, top, right, bottom`).
//! - [`Format`]: Output encoding.
//! - [`Dimensions`]: Pixel size of a decoded or rendered image.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Quality setting for lossy image encoding (1-100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct Quality(u8);

impl Quality {
    /// Returns `None` outside `1..=100`.
    pub fn new(value: i64) -> Option<Self> {
        (1..=100).contains(&value).then(|| Self(value as u8))
    }

    pub fn value(self) -> u8 {
        self.0
    }
}

impl Default for Quality {
    fn default() -> Self {
        Self(80)
    }
}

impl TryFrom<u8> for Quality {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value as i64).ok_or_else(|| format!("quality must be 1-100, got {value}"))
    }
}

impl From<Quality> for u8 {
    fn from(quality: Quality) -> Self {
        quality.0
    }
}

/// Aspect ratio as width / height.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "f64", into = "f64")]
pub struct Ratio(f64);

impl Ratio {
    pub fn new(value: f64) -> Option<Self> {
        (value.is_finite() && value > 0.0).then_some(Self(value))
    }

    pub fn value(self) -> f64 {
        self.0
    }

    /// Height for `width` at this ratio, never below one pixel.
    pub fn height_for(self, width: u32) -> u32 {
        ((width as f64 / self.0).round() as u32).max(1)
    }
}

impl TryFrom<f64> for Ratio {
    type Error = String;

    fn try_from(value: f64) -> Result<Self, Self::Error> {
        Self::new(value).ok_or_else(|| format!("ratio must be positive, got {value}"))
    }
}

impl From<Ratio> for f64 {
    fn from(ratio: Ratio) -> Self {
        ratio.0
    }
}

/// Crop behaviour when the source aspect differs from the target.
///
/// Anchor coordinates are percentages of the source: `(0, 0)` keeps the
/// top-left corner, `(50, 50)` keeps the center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Crop {
    None,
    Anchor { x: f64, y: f64 },
}

impl Crop {
    pub fn center() -> Self {
        Crop::Anchor { x: 50.0, y: 50.0 }
    }

    /// Returns `None` if either coordinate falls outside `0..=100`.
    pub fn anchor(x: f64, y: f64) -> Option<Self> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        (in_range(x) && in_range(y)).then(|| Crop::Anchor {
            x: positive_zero(x),
            y: positive_zero(y),
        })
    }
}

/// `-0.0` renders the same pixels as `0.0` and must fingerprint the same.
fn positive_zero(v: f64) -> f64 {
    if v == 0.0 { 0.0 } else { v }
}

/// Region of interest, in percent of the source dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FocalWindow {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl FocalWindow {
    /// Validates bounds: every edge within `0..=100`, `left < right`, `top < bottom`.
    pub fn new(left: f64, top: f64, right: f64, bottom: f64) -> Option<Self> {
        let in_range = |v: f64| (0.0..=100.0).contains(&v);
        let valid = [left, top, right, bottom].into_iter().all(in_range)
            && left < right
            && top < bottom;
        valid.then(|| Self {
            left: positive_zero(left),
            top: positive_zero(top),
            right: positive_zero(right),
            bottom: positive_zero(bottom),
        })
    }

    /// Center of the window, in percent.
    pub fn center(&self) -> (f64, f64) {
        (
            (self.left + self.right) / 2.0,
            (self.top + self.bottom) / 2.0,
        )
    }
}

/// Output encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Format {
    #[default]
    Webp,
    Jpeg,
    Png,
    Avif,
}

impl Format {
    /// Parse a format name. Accepts `jpg` as an alias for `jpeg`.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.trim().to_ascii_lowercase().as_str() {
            "webp" => Some(Format::Webp),
            "jpeg" | "jpg" => Some(Format::Jpeg),
            "png" => Some(Format::Png),
            "avif" => Some(Format::Avif),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Format::Webp => "webp",
            Format::Jpeg => "jpeg",
            Format::Png => "png",
            Format::Avif => "avif",
        }
    }

    pub fn extension(self) -> &'static str {
        match self {
            Format::Jpeg => "jpg",
            other => other.name(),
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Format::Webp => "image/webp",
            Format::Jpeg => "image/jpeg",
            Format::Png => "image/png",
            Format::Avif => "image/avif",
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl fmt::Display for Dimensions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// One concrete transformation request.
///
/// `width` is the final pixel width, already multiplied by `density`.
/// `ratio == None` keeps the source aspect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariantSpec {
    pub width: u32,
    pub ratio: Option<Ratio>,
    pub crop: Crop,
    pub contain: bool,
    pub focal_window: Option<FocalWindow>,
    pub quality: Quality,
    pub format: Format,
    pub density: f64,
}

impl VariantSpec {
    /// Target height, when the spec constrains it.
    pub fn height(&self) -> Option<u32> {
        self.ratio.map(|r| r.height_for(self.width))
    }

    /// Derive a density variant: width multiplied and rounded, never below one pixel.
    pub fn scaled(&self, density: f64) -> VariantSpec {
        VariantSpec {
            width: ((self.width as f64 * density).round() as u32).max(1),
            density,
            ..self.clone()
        }
    }
}
