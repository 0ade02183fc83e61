//! Configuration module.
//!
//! Handles loading, validating, and merging `config.toml`. Stock defaults are
//! the base layer; a `config.toml` in the project root overrides any subset of
//! keys.
//!
//! ## Configuration Options
//!
//! ```toml
//! # Every key is optional; the values below are the defaults
//!
//! [aliases.widths]          # Named widths usable as `width = "md"`
//! xs = 320
//! sm = 384
//! md = 448
//! lg = 512
//! screen-sm = 640
//! screen-md = 768
//! screen-lg = 1024
//! screen-xl = 1280
//! screen-2xl = 1536
//!
//! [aliases.ratios]          # Named ratios usable as `ratio = "video"`
//! square = 1.0
//! video = 1.7777777777777777
//! video_vertical = 0.5625
//! golden = 1.618033988749895
//! golden_vertical = 0.6180339887498948
//!
//! [defaults]                # Applied when an option is unset
//! quality = 80
//! ratio = "video"
//! crop = true
//! contain = true
//! densities = [2.0]
//! format = "webp"
//!
//! [resolver]
//! non_scalable_media = ["print"]
//!
//! [queue]
//! stale_after = 600         # Seconds before a Building entry is stale
//! # max_errors = 3          # Skip entries that failed more often
//!
//! [ledger]
//! path = ".img-variants/ledger.json"
//!
//! [storage]
//! root = "media/variants"
//! base_url = "/media/variants"
//!
//! [sources]                 # Storage name → directory holding originals
//! default = "media"
//!
//! [processing]
//! max_processes = 4         # Build threads, capped at the core count
//! max_output_pixels = 50000000
//! ```
//!
//! A misspelled key is an error, not a silent no-op.

use crate::engine::RustEngine;
use crate::options::{OptionDefaults, Resolver};
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
    #[error("Config validation error: {0}")]
    Validation(String),
}

/// Settings loaded from `config.toml`.
///
/// All fields have defaults. User config files need only specify the values
/// they want to override. Unknown keys are rejected.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    /// Named widths and ratios accepted in options.
    pub aliases: AliasesConfig,
    /// Values used when an option is unset.
    pub defaults: OptionDefaults,
    /// Breakpoint expansion settings.
    pub resolver: ResolverConfig,
    /// Queue processing thresholds.
    pub queue: QueueConfig,
    /// Ledger file location.
    pub ledger: LedgerConfig,
    /// Where generated artifacts are written and served from.
    pub storage: StorageConfig,
    /// Storage name → directory of source images.
    pub sources: BTreeMap<String, String>,
    /// Worker pool size for `build`.
    pub processing: ProcessingConfig,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            aliases: AliasesConfig::default(),
            defaults: OptionDefaults::default(),
            resolver: ResolverConfig::default(),
            queue: QueueConfig::default(),
            ledger: LedgerConfig::default(),
            storage: StorageConfig::default(),
            sources: default_sources(),
            processing: ProcessingConfig::default(),
        }
    }
}

impl Settings {
    /// Validate config values are within acceptable ranges.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some((name, _)) = self.aliases.widths.iter().find(|(_, w)| **w == 0) {
            return Err(ConfigError::Validation(format!(
                "aliases.widths.{name} must be positive"
            )));
        }
        if let Some((name, _)) = self
            .aliases
            .ratios
            .iter()
            .find(|(_, r)| !(r.is_finite() && **r > 0.0))
        {
            return Err(ConfigError::Validation(format!(
                "aliases.ratios.{name} must be a positive number"
            )));
        }
        Resolver::new(self)
            .check_defaults()
            .map_err(|e| ConfigError::Validation(format!("defaults: {e}")))?;
        if self.queue.stale_after == 0 {
            return Err(ConfigError::Validation(
                "queue.stale_after must be positive".into(),
            ));
        }
        if self.ledger.path.trim().is_empty() {
            return Err(ConfigError::Validation(
                "ledger.path must not be empty".into(),
            ));
        }
        if self.storage.root.trim().is_empty() {
            return Err(ConfigError::Validation(
                "storage.root must not be empty".into(),
            ));
        }
        if self.processing.max_output_pixels == 0 {
            return Err(ConfigError::Validation(
                "processing.max_output_pixels must be positive".into(),
            ));
        }
        Ok(())
    }

    /// Ledger file resolved against the project root.
    pub fn ledger_path(&self, root: &Path) -> PathBuf {
        root.join(&self.ledger.path)
    }

    /// Artifact directory resolved against the project root.
    pub fn storage_root(&self, root: &Path) -> PathBuf {
        root.join(&self.storage.root)
    }

    /// Source directories resolved against the project root.
    pub fn source_roots(&self, root: &Path) -> BTreeMap<String, PathBuf> {
        self.sources
            .iter()
            .map(|(name, dir)| (name.clone(), root.join(dir)))
            .collect()
    }
}

/// Named widths and ratios.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AliasesConfig {
    pub widths: BTreeMap<String, u32>,
    pub ratios: BTreeMap<String, f64>,
}

impl Default for AliasesConfig {
    fn default() -> Self {
        let widths = [
            ("xs", 320),
            ("sm", 384),
            ("md", 448),
            ("lg", 512),
            ("screen-sm", 640),
            ("screen-md", 768),
            ("screen-lg", 1024),
            ("screen-xl", 1280),
            ("screen-2xl", 1536),
        ];
        let golden = 1.618033988749895;
        let ratios = [
            ("square", 1.0),
            ("video", 16.0 / 9.0),
            ("video_vertical", 9.0 / 16.0),
            ("golden", golden),
            ("golden_vertical", 1.0 / golden),
        ];
        Self {
            widths: widths
                .into_iter()
                .map(|(name, w)| (name.to_string(), w))
                .collect(),
            ratios: ratios
                .into_iter()
                .map(|(name, r)| (name.to_string(), r))
                .collect(),
        }
    }
}

/// Breakpoint expansion settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ResolverConfig {
    /// Media tokens that mark a breakpoint as fixed-size. A breakpoint whose
    /// media condition contains any of these never gets the large-density
    /// variant.
    pub non_scalable_media: Vec<String>,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            non_scalable_media: vec!["print".to_string()],
        }
    }
}

/// Queue processing thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct QueueConfig {
    /// Seconds after which a Building entry counts as stale.
    pub stale_after: u64,
    /// Entries with more recorded failures than this are skipped.
    /// When absent, there is no bound.
    pub max_errors: Option<u32>,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stale_after: 600,
            max_errors: None,
        }
    }
}

impl QueueConfig {
    pub fn stale_threshold(&self) -> TimeDelta {
        stale_threshold(self.stale_after)
    }
}

/// Convert a seconds count into a staleness threshold.
pub fn stale_threshold(seconds: u64) -> TimeDelta {
    i64::try_from(seconds)
        .ok()
        .and_then(TimeDelta::try_seconds)
        .unwrap_or(TimeDelta::MAX)
}

/// Ledger file location, relative to the project root.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LedgerConfig {
    pub path: String,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            path: ".img-variants/ledger.json".to_string(),
        }
    }
}

/// Artifact storage location.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageConfig {
    /// Directory for generated files, relative to the project root.
    pub root: String,
    /// Public URL prefix the directory is served under.
    pub base_url: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root: "media/variants".to_string(),
            base_url: "/media/variants".to_string(),
        }
    }
}

/// Worker pool size and render limits for `build`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProcessingConfig {
    /// Upper bound on build threads. Unset means one per core; larger
    /// values are capped at the core count.
    pub max_processes: Option<usize>,
    /// Largest output (width × height) a build may render. Bigger requests
    /// fail as build errors instead of exhausting memory.
    pub max_output_pixels: u64,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            max_processes: None,
            max_output_pixels: RustEngine::DEFAULT_MAX_OUTPUT_PIXELS,
        }
    }
}

/// Thread count for the build pool: `max_processes` capped to `1..=cores`,
/// or every core when unset.
pub fn effective_threads(config: &ProcessingConfig) -> usize {
    let cores = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1);
    match config.max_processes {
        Some(limit) => limit.clamp(1, cores),
        None => cores,
    }
}

// =============================================================================
// Loading
// =============================================================================

fn default_sources() -> BTreeMap<String, String> {
    BTreeMap::from([("default".to_string(), "media".to_string())])
}

/// [`Settings::default`] as a TOML table: the bottom layer under any
/// user `config.toml`.
pub fn stock_defaults_value() -> toml::Value {
    toml::Value::try_from(Settings::default()).expect("default config must serialize")
}

/// Lay `top` over `base`. Tables combine key by key at every depth; any
/// other value in `top` (arrays included) wins outright.
pub fn merge_toml(base: toml::Value, top: toml::Value) -> toml::Value {
    use toml::Value::Table;
    match (base, top) {
        (Table(mut table), Table(top)) => {
            for (key, value) in top {
                let value = match table.remove(&key) {
                    Some(below) => merge_toml(below, value),
                    None => value,
                };
                table.insert(key, value);
            }
            Table(table)
        }
        (_, top) => top,
    }
}

/// Parse `<root>/config.toml`. `None` when the file does not exist.
pub fn load_raw_config(root: &Path) -> Result<Option<toml::Value>, ConfigError> {
    match fs::read_to_string(root.join("config.toml")) {
        Ok(text) => Ok(Some(toml::from_str(&text)?)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Deserialize `base` with the optional user layer on top, then validate.
pub fn resolve_config(
    base: toml::Value,
    user: Option<toml::Value>,
) -> Result<Settings, ConfigError> {
    let layered = match user {
        Some(user) => merge_toml(base, user),
        None => base,
    };
    let settings: Settings = layered.try_into()?;
    settings.validate()?;
    Ok(settings)
}

/// Settings for the project at `root`: stock defaults overridden by
/// `<root>/config.toml` when present. Unknown keys are an error.
pub fn load_config(root: &Path) -> Result<Settings, ConfigError> {
    resolve_config(stock_defaults_value(), load_raw_config(root)?)
}

/// Returns a fully-commented stock `config.toml` with all keys and explanations.
///
/// Used by the `gen-config` CLI command.
pub fn stock_config_toml() -> &'static str {
    r##"# img-variants Configuration
# ==========================
# All settings are optional. Remove or comment out any you don't need.
# Values shown below are the defaults.
# Unknown keys will cause an error.

# ---------------------------------------------------------------------------
# Aliases
# ---------------------------------------------------------------------------
# Named widths accepted wherever a width is expected ("width": "md").
[aliases.widths]
xs = 320
sm = 384
md = 448
lg = 512
screen-sm = 640
screen-md = 768
screen-lg = 1024
screen-xl = 1280
screen-2xl = 1536

# Named ratios (width / height). "a/b" and "a:b" strings are also accepted.
[aliases.ratios]
square = 1.0
video = 1.7777777777777777
video_vertical = 0.5625
golden = 1.618033988749895
golden_vertical = 0.6180339887498948

# ---------------------------------------------------------------------------
# Option defaults
# ---------------------------------------------------------------------------
[defaults]
# Lossy encoding quality (1 = worst, 100 = best).
quality = 80

# Aspect ratio when none is given. Use "source" to keep the source aspect.
ratio = "video"

# true = center crop, false = no crop, or a keyword: tl tr bl br t b l r.
crop = true

# When not cropping, fit inside the target box instead of covering it.
contain = true

# Extra pixel-density variants generated for every image.
densities = [2.0]

# Output format: webp, jpeg, png or avif.
format = "webp"

# ---------------------------------------------------------------------------
# Breakpoint expansion
# ---------------------------------------------------------------------------
[resolver]
# Breakpoints whose media condition contains any of these never receive
# the large-density variant.
non_scalable_media = ["print"]

# ---------------------------------------------------------------------------
# Queue
# ---------------------------------------------------------------------------
[queue]
# Seconds after which a Building entry is considered stale.
stale_after = 600

# Skip entries that failed more often than this. Omit for no bound.
# max_errors = 3

# ---------------------------------------------------------------------------
# Ledger
# ---------------------------------------------------------------------------
[ledger]
path = ".img-variants/ledger.json"

# ---------------------------------------------------------------------------
# Storage
# ---------------------------------------------------------------------------
[storage]
# Directory for generated files.
root = "media/variants"

# URL prefix the directory is served under.
base_url = "/media/variants"

# ---------------------------------------------------------------------------
# Sources
# ---------------------------------------------------------------------------
# Storage name -> directory holding the original images.
[sources]
default = "media"

# ---------------------------------------------------------------------------
# Processing
# ---------------------------------------------------------------------------
[processing]
# Build threads. Unset means one per CPU core; larger values are capped.
# max_processes = 4

# Largest output image (width x height) a build may render. Larger
# requests are recorded as build errors.
max_output_pixels = 50000000
"##
}
