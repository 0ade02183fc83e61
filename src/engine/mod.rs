//! Pixel transformation.
//!
//! An [`Engine`] turns a source image plus a [`VariantSpec`] into encoded
//! bytes. The queue and batch layers only see this trait, so the rest of the
//! crate never touches pixels.
//!
//! Failures are classified, because the ledger treats them differently:
//!
//! | Error | Ledger state | Retried |
//! |---|---|---|
//! | [`EngineError::SourceUnreadable`] | `SourceError` | only by explicit requeue |
//! | [`EngineError::ProcessingFailed`] | `BuildError` | via requeue, bounded by `max_errors` |
//!
//! The production implementation is [`RustEngine`]; geometry lives in the
//! pure [`calculations`] module.

pub mod calculations;
mod rust_engine;

pub use rust_engine::RustEngine;

use crate::fingerprint::SourceId;
use crate::ledger::ErrorKind;
use crate::variant::{Dimensions, Format, VariantSpec};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("source unreadable: {0}")]
    SourceUnreadable(String),
    #[error("processing failed: {0}")]
    ProcessingFailed(String),
}

impl EngineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            EngineError::SourceUnreadable(_) => ErrorKind::Source,
            EngineError::ProcessingFailed(_) => ErrorKind::Build,
        }
    }
}

/// Encoded output of one transformation.
#[derive(Debug, Clone, PartialEq)]
pub struct Rendered {
    pub bytes: Vec<u8>,
    pub dimensions: Dimensions,
    pub format: Format,
}

/// Image transformation backend. Must be `Sync` so the queue can fan out
/// across rayon workers.
pub trait Engine: Sync {
    fn process(&self, source: &SourceId, spec: &VariantSpec) -> Result<Rendered, EngineError>;
}
