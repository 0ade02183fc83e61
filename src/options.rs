//! Option resolution.
//!
//! Callers describe what they want with loosely-typed [`RawOptions`] (named
//! widths like `"screen-md"`, ratios like `"16/9"` or `"golden"`, crop
//! keywords, a `sizes` table keyed by max-width or media query). The
//! [`Resolver`] normalizes those into a [`ResolvedSpec`]: one base
//! [`VariantSpec`] plus its breakpoint and density expansions.
//!
//! ## Expansion order
//!
//! ```text
//! base → breakpoints (declaration order) → densities (declaration order) → large-breakpoint density
//! ```
//!
//! Given `{width: 300, sizes: {print: {width: 450, quality: 90}, "800": 100}, densities: [2]}`
//! and an empty non-scalable set, the result is:
//!
//! ```text
//! base            300  q80
//! print           450  q90
//! (max-width: 800px) 100  q80
//! density 2x      600  q80
//! large 2x        900  q90   ← widest eligible breakpoint × largest density
//! ```
//!
//! With the stock configuration `print` is non-scalable, so the large
//! density variant comes from `(max-width: 800px)` instead (200px).
//!
//! Resolution is pure: no I/O, and the same input always produces the same
//! ordered output.

use crate::config::Settings;
use crate::variant::{Crop, FocalWindow, Format, Quality, Ratio, VariantSpec};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum OptionsError {
    #[error("width is required")]
    MissingWidth,
    #[error("invalid width: {0}")]
    InvalidWidth(String),
    #[error("invalid ratio: {0}")]
    InvalidRatio(String),
    #[error("unknown crop keyword: {0}")]
    UnknownCrop(String),
    #[error("crop anchor out of range: ({0}, {1})")]
    CropOutOfRange(f64, f64),
    #[error("invalid focal window: {0:?}")]
    InvalidFocalWindow([f64; 4]),
    #[error("quality must be 1-100, got {0}")]
    InvalidQuality(i64),
    #[error("density must be a positive number, got {0}")]
    InvalidDensity(f64),
    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("invalid size entry {key:?}: {reason}")]
    InvalidSize { key: String, reason: String },
}

// ============================================================================
// Raw option tokens
// ============================================================================

/// A width given as pixels or as a named alias.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WidthToken {
    Pixels(i64),
    Named(String),
}

/// A ratio given as a number, a `[w, h]` pair, or a string
/// (`"16/9"`, `"16:9"`, a named alias, or `"source"` to keep the source aspect).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RatioToken {
    Value(f64),
    Pair([f64; 2]),
    Named(String),
}

/// Crop as a flag, a keyword (`center`, `tl`, `tr`, `bl`, `br`, `t`, `b`,
/// `l`, `r`), or an `[x, y]` anchor in percent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CropToken {
    Flag(bool),
    Keyword(String),
    Anchor([f64; 2]),
}

/// One `sizes` entry: a bare width, or a table of overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SizeToken {
    Width(WidthToken),
    Overrides(SizeOverrides),
}

/// Fields a breakpoint may override. Unset fields inherit from the base.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SizeOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<WidthToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio: Option<RatioToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contain: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_window: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
}

/// User-supplied transformation options.
///
/// Unset fields fall back to the configured `[defaults]`. `alt` is carried
/// for display only and never affects which artifacts are produced.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct RawOptions {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub width: Option<WidthToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio: Option<RatioToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub crop: Option<CropToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub contain: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub focal_window: Option<[f64; 4]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quality: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub densities: Option<Vec<f64>>,
    #[serde(skip_serializing_if = "IndexMap::is_empty")]
    pub sizes: IndexMap<String, SizeToken>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub alt: Option<String>,
}

impl RawOptions {
    /// Returns a copy with every field set in `overlay` replacing this one.
    ///
    /// A non-empty `sizes` table in the overlay replaces the whole table.
    pub fn extend(&self, overlay: &RawOptions) -> RawOptions {
        RawOptions {
            width: overlay.width.clone().or_else(|| self.width.clone()),
            ratio: overlay.ratio.clone().or_else(|| self.ratio.clone()),
            crop: overlay.crop.clone().or_else(|| self.crop.clone()),
            contain: overlay.contain.or(self.contain),
            focal_window: overlay.focal_window.or(self.focal_window),
            quality: overlay.quality.or(self.quality),
            densities: overlay.densities.clone().or_else(|| self.densities.clone()),
            sizes: if overlay.sizes.is_empty() {
                self.sizes.clone()
            } else {
                overlay.sizes.clone()
            },
            format: overlay.format.clone().or_else(|| self.format.clone()),
            alt: overlay.alt.clone().or_else(|| self.alt.clone()),
        }
    }
}

// ============================================================================
// Resolved output
// ============================================================================

/// Breakpoint key: a max-width in pixels or a free-form media condition.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakpointKey {
    MaxWidth(u32),
    Media(String),
}

impl BreakpointKey {
    /// Integer keys become max-width breakpoints; anything else is a media condition.
    pub fn parse(raw: &str) -> Result<Self, OptionsError> {
        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Err(OptionsError::InvalidSize {
                key: raw.to_string(),
                reason: "empty key".into(),
            });
        }
        match trimmed.parse::<u32>() {
            Ok(0) => Err(OptionsError::InvalidSize {
                key: raw.to_string(),
                reason: "max-width must be positive".into(),
            }),
            Ok(n) => Ok(BreakpointKey::MaxWidth(n)),
            Err(_) => Ok(BreakpointKey::Media(trimmed.to_string())),
        }
    }

    /// Rendered media condition, as it appears in a `sizes` attribute.
    pub fn media_query(&self) -> String {
        match self {
            BreakpointKey::MaxWidth(n) => format!("(max-width: {n}px)"),
            BreakpointKey::Media(media) => media.clone(),
        }
    }
}

impl fmt::Display for BreakpointKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.media_query())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Breakpoint {
    pub key: BreakpointKey,
    pub spec: VariantSpec,
}

/// Why a variant exists.
#[derive(Debug, Clone, PartialEq)]
pub enum Role {
    Base,
    Breakpoint(BreakpointKey),
    Density(f64),
    LargeDensity { key: BreakpointKey, density: f64 },
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::Base => f.write_str("base"),
            Role::Breakpoint(key) => write!(f, "{key}"),
            Role::Density(d) => write!(f, "{d}x"),
            Role::LargeDensity { key, density } => write!(f, "{key} {density}x"),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Variant {
    pub role: Role,
    pub spec: VariantSpec,
}

/// Canonical expansion of one set of options.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedSpec {
    pub base: VariantSpec,
    pub breakpoints: Vec<Breakpoint>,
    pub densities: Vec<VariantSpec>,
    pub large_density: Option<(BreakpointKey, VariantSpec)>,
}

impl ResolvedSpec {
    /// All variants in canonical order. A spec equal to an earlier one is dropped.
    pub fn variants(&self) -> Vec<Variant> {
        let mut candidates = vec![Variant {
            role: Role::Base,
            spec: self.base.clone(),
        }];
        candidates.extend(self.breakpoints.iter().map(|bp| Variant {
            role: Role::Breakpoint(bp.key.clone()),
            spec: bp.spec.clone(),
        }));
        candidates.extend(self.densities.iter().map(|spec| Variant {
            role: Role::Density(spec.density),
            spec: spec.clone(),
        }));
        if let Some((key, spec)) = &self.large_density {
            candidates.push(Variant {
                role: Role::LargeDensity {
                    key: key.clone(),
                    density: spec.density,
                },
                spec: spec.clone(),
            });
        }

        let mut variants: Vec<Variant> = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            if !variants.iter().any(|v| v.spec == candidate.spec) {
                variants.push(candidate);
            }
        }
        variants
    }

    /// HTML `sizes` attribute value: one entry per breakpoint, then the base width.
    pub fn sizes_attr(&self) -> String {
        let mut parts: Vec<String> = self
            .breakpoints
            .iter()
            .map(|bp| format!("{} {}px", bp.key.media_query(), bp.spec.width))
            .collect();
        parts.push(format!("{}px", self.base.width));
        parts.join(", ")
    }
}

// ============================================================================
// Resolver
// ============================================================================

/// Option defaults applied when a field is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OptionDefaults {
    pub quality: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ratio: Option<RatioToken>,
    pub crop: CropToken,
    pub contain: bool,
    pub densities: Vec<f64>,
    pub format: String,
}

impl Default for OptionDefaults {
    fn default() -> Self {
        Self {
            quality: 80,
            ratio: Some(RatioToken::Named("video".into())),
            crop: CropToken::Flag(true),
            contain: true,
            densities: vec![2.0],
            format: "webp".into(),
        }
    }
}

/// Normalizes raw options into resolved specs.
///
/// Built once from configuration and immutable afterwards.
#[derive(Debug, Clone)]
pub struct Resolver {
    widths: BTreeMap<String, u32>,
    ratios: BTreeMap<String, f64>,
    defaults: OptionDefaults,
    non_scalable: Vec<String>,
}

impl Resolver {
    pub fn new(settings: &Settings) -> Self {
        Self {
            widths: settings.aliases.widths.clone(),
            ratios: settings.aliases.ratios.clone(),
            defaults: settings.defaults.clone(),
            non_scalable: settings.resolver.non_scalable_media.clone(),
        }
    }

    pub fn resolve(&self, raw: &RawOptions) -> Result<ResolvedSpec, OptionsError> {
        let width = self.width(raw.width.as_ref().ok_or(OptionsError::MissingWidth)?)?;
        let ratio = match raw.ratio.as_ref().or(self.defaults.ratio.as_ref()) {
            Some(token) => self.ratio(token)?,
            None => None,
        };
        let base = VariantSpec {
            width,
            ratio,
            crop: crop(raw.crop.as_ref().unwrap_or(&self.defaults.crop))?,
            contain: raw.contain.unwrap_or(self.defaults.contain),
            focal_window: raw.focal_window.map(focal_window).transpose()?,
            quality: quality(raw.quality.unwrap_or(self.defaults.quality))?,
            format: format(raw.format.as_deref().unwrap_or(&self.defaults.format))?,
            density: 1.0,
        };

        let declared = raw.densities.as_ref().unwrap_or(&self.defaults.densities);
        for &d in declared {
            if !(d.is_finite() && d > 0.0) {
                return Err(OptionsError::InvalidDensity(d));
            }
        }
        let densities: Vec<VariantSpec> = declared.iter().map(|&d| base.scaled(d)).collect();

        let mut breakpoints: Vec<Breakpoint> = Vec::with_capacity(raw.sizes.len());
        for (raw_key, token) in &raw.sizes {
            let key = BreakpointKey::parse(raw_key)?;
            if breakpoints.iter().any(|bp| bp.key == key) {
                return Err(OptionsError::InvalidSize {
                    key: raw_key.clone(),
                    reason: "duplicate breakpoint".into(),
                });
            }
            let spec = self
                .breakpoint_spec(&base, token)
                .map_err(|err| match err {
                    OptionsError::InvalidSize { .. } => err,
                    other => OptionsError::InvalidSize {
                        key: raw_key.clone(),
                        reason: other.to_string(),
                    },
                })?;
            breakpoints.push(Breakpoint { key, spec });
        }

        let large_density = declared
            .iter()
            .copied()
            .reduce(f64::max)
            .and_then(|max_density| {
                self.widest_scalable(&breakpoints)
                    .map(|bp| (bp.key.clone(), bp.spec.scaled(max_density)))
            });

        Ok(ResolvedSpec {
            base,
            breakpoints,
            densities,
            large_density,
        })
    }

    /// Parse the configured defaults the way [`resolve`](Self::resolve)
    /// would, so a bad default fails at load time rather than per request.
    pub fn check_defaults(&self) -> Result<(), OptionsError> {
        let defaults = &self.defaults;
        quality(defaults.quality)?;
        format(&defaults.format)?;
        if let Some(&d) = defaults
            .densities
            .iter()
            .find(|d| !(d.is_finite() && **d > 0.0))
        {
            return Err(OptionsError::InvalidDensity(d));
        }
        if let Some(token) = &defaults.ratio {
            self.ratio(token)?;
        }
        crop(&defaults.crop)?;
        Ok(())
    }

    /// Whether a breakpoint's media condition matches the non-scalable set.
    pub fn is_non_scalable(&self, key: &BreakpointKey) -> bool {
        let media = key.media_query();
        self.non_scalable
            .iter()
            .any(|token| !token.is_empty() && media.contains(token.as_str()))
    }

    /// The widest eligible breakpoint; the first one wins a tie.
    fn widest_scalable<'a>(&self, breakpoints: &'a [Breakpoint]) -> Option<&'a Breakpoint> {
        breakpoints
            .iter()
            .filter(|bp| !self.is_non_scalable(&bp.key))
            .fold(None, |widest: Option<&Breakpoint>, bp| match widest {
                Some(w) if w.spec.width >= bp.spec.width => Some(w),
                _ => Some(bp),
            })
    }

    fn breakpoint_spec(
        &self,
        base: &VariantSpec,
        token: &SizeToken,
    ) -> Result<VariantSpec, OptionsError> {
        match token {
            SizeToken::Width(width) => Ok(VariantSpec {
                width: self.width(width)?,
                ..base.clone()
            }),
            SizeToken::Overrides(o) => Ok(VariantSpec {
                width: match &o.width {
                    Some(w) => self.width(w)?,
                    None => base.width,
                },
                ratio: match &o.ratio {
                    Some(r) => self.ratio(r)?,
                    None => base.ratio,
                },
                crop: o.crop.as_ref().map(crop).transpose()?.unwrap_or(base.crop),
                contain: o.contain.unwrap_or(base.contain),
                focal_window: match o.focal_window {
                    Some(fw) => Some(focal_window(fw)?),
                    None => base.focal_window,
                },
                quality: o.quality.map(quality).transpose()?.unwrap_or(base.quality),
                format: o
                    .format
                    .as_deref()
                    .map(format)
                    .transpose()?
                    .unwrap_or(base.format),
                density: 1.0,
            }),
        }
    }

    fn width(&self, token: &WidthToken) -> Result<u32, OptionsError> {
        match token {
            WidthToken::Pixels(px) => positive_width(*px, &px.to_string()),
            WidthToken::Named(name) => {
                let trimmed = name.trim();
                if let Some(&px) = self.widths.get(trimmed) {
                    return Ok(px);
                }
                match trimmed.parse::<i64>() {
                    Ok(px) => positive_width(px, name),
                    Err(_) => Err(OptionsError::InvalidWidth(name.clone())),
                }
            }
        }
    }

    fn ratio(&self, token: &RatioToken) -> Result<Option<Ratio>, OptionsError> {
        let value = match token {
            RatioToken::Value(v) => *v,
            RatioToken::Pair([w, h]) => w / h,
            RatioToken::Named(name) => {
                let trimmed = name.trim();
                if trimmed == "source" {
                    return Ok(None);
                }
                match self.ratios.get(trimmed) {
                    Some(&v) => v,
                    None => parse_ratio(trimmed)
                        .ok_or_else(|| OptionsError::InvalidRatio(name.clone()))?,
                }
            }
        };
        Ratio::new(value)
            .map(Some)
            .ok_or_else(|| OptionsError::InvalidRatio(format!("{token:?}")))
    }
}

fn positive_width(px: i64, raw: &str) -> Result<u32, OptionsError> {
    u32::try_from(px)
        .ok()
        .filter(|&w| w > 0)
        .ok_or_else(|| OptionsError::InvalidWidth(raw.to_string()))
}

/// Parse `"a/b"`, `"a:b"` or a plain number.
fn parse_ratio(raw: &str) -> Option<f64> {
    match raw.split_once(['/', ':']) {
        Some((w, h)) => {
            let w: f64 = w.trim().parse().ok()?;
            let h: f64 = h.trim().parse().ok()?;
            Some(w / h)
        }
        None => raw.parse().ok(),
    }
}

fn crop(token: &CropToken) -> Result<Crop, OptionsError> {
    match token {
        CropToken::Flag(true) => Ok(Crop::center()),
        CropToken::Flag(false) => Ok(Crop::None),
        CropToken::Anchor([x, y]) => {
            Crop::anchor(*x, *y).ok_or(OptionsError::CropOutOfRange(*x, *y))
        }
        CropToken::Keyword(keyword) => {
            let (x, y) = match keyword.trim() {
                "center" => (50.0, 50.0),
                "tl" => (0.0, 0.0),
                "tr" => (100.0, 0.0),
                "bl" => (0.0, 100.0),
                "br" => (100.0, 100.0),
                "t" => (50.0, 0.0),
                "b" => (50.0, 100.0),
                "l" => (0.0, 50.0),
                "r" => (100.0, 50.0),
                _ => return Err(OptionsError::UnknownCrop(keyword.clone())),
            };
            Ok(Crop::Anchor { x, y })
        }
    }
}

fn focal_window(raw: [f64; 4]) -> Result<FocalWindow, OptionsError> {
    let [left, top, right, bottom] = raw;
    FocalWindow::new(left, top, right, bottom).ok_or(OptionsError::InvalidFocalWindow(raw))
}

fn quality(raw: i64) -> Result<Quality, OptionsError> {
    Quality::new(raw).ok_or(OptionsError::InvalidQuality(raw))
}

fn format(raw: &str) -> Result<Format, OptionsError> {
    Format::from_name(raw).ok_or_else(|| OptionsError::UnsupportedFormat(raw.to_string()))
}
