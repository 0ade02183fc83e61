//! # img-variants
//!
//! Deterministic responsive image variants with a queued build ledger.
//! Callers describe what they want (a width, a ratio, a crop, breakpoints,
//! pixel densities); the crate names every resulting variant by a fingerprint
//! and tracks whether it has been built. Rendering happens out of band, so a
//! request never waits on image processing.
//!
//! # Architecture: Resolve, Enqueue, Build
//!
//! ```text
//! 1. Resolve   raw options  →  ResolvedSpec     (aliases, defaults, breakpoints, densities)
//! 2. Enqueue   specs        →  ledger entries   (one fingerprint per variant, status Queued)
//! 3. Build     ledger       →  storage          (claim, render, write, mark Built)
//! ```
//!
//! Stage 1 is pure. Stage 2 is cheap and safe to run on every request because
//! it only ever adds Queued entries for identities the ledger has never seen.
//! Stage 3 runs in a separate process (`img-variants build`) and is safe to run
//! on several machines at once: the ledger grants each claim to exactly one
//! worker.
//!
//! # Module Map
//!
//! | Module | Role |
//! |--------|------|
//! | [`options`] | Raw option tokens and their resolution into canonical variant specs |
//! | [`variant`] | Value types shared by every stage: `VariantSpec`, `Format`, `Crop`, `Dimensions` |
//! | [`fingerprint`] | Stable 128-bit identity of a (source, spec) pair |
//! | [`ledger`] | Build-state machine with in-memory and file-locked JSON backends |
//! | [`engine`] | Source decoding, crop geometry, resize and encode |
//! | [`storage`] | Content-addressed artifact store keyed by identity |
//! | [`queue`] | Parallel processor that drains Queued entries and recovers stale builds |
//! | [`batch`] | Request-scoped dedup: one ledger read for many images, URLs and `srcset` |
//! | [`status`] | Ledger health report and CI gates |
//! | [`config`] | `config.toml` loading, stock defaults and validation |
//! | [`output`] | CLI output formatting |
//!
//! # Design Decisions
//!
//! ## Identity Is the Only Key
//!
//! An artifact's name is the hex fingerprint of its source and spec. Two
//! requests for the same variant, from any process, land on the same ledger
//! entry and the same file. Display data such as `alt` text never reaches the
//! fingerprint.
//!
//! ## Errors Are Sticky
//!
//! A failed build stays failed until someone runs `img-variants requeue`. The
//! processor never retries automatically, so a corrupt source cannot burn CPU
//! on every run. `error_count` survives requeues and lets `--max-errors` skip
//! repeat offenders.
//!
//! ## Pure-Rust Imaging
//!
//! Decoding, resampling (Lanczos3) and encoding use the `image` crate only. No
//! system libraries are required.

pub mod batch;
pub mod config;
pub mod engine;
pub mod fingerprint;
pub mod ledger;
pub mod options;
pub mod output;
pub mod queue;
pub mod status;
pub mod storage;
pub mod variant;

#[cfg(test)]
pub(crate) mod test_helpers;
