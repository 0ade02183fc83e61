//! Build ledger: the persistent record of every identity's build state.
//!
//! ```text
//! Queued ──mark_building──► Building ──mark_built──► Built
//!   ▲                          │
//!   │                          ├──mark_error(Source)──► SourceError ──┐
//!   │                          └──mark_error(Build)───► BuildError ───┤
//!   │                                                                 │
//!   └───────── requeue / recover_stale (stale Building) ◄─────────────┘
//! ```
//!
//! The transition rules live in one place ([`BuildStatus::allowed_transitions`]
//! and the shared table) so every backend enforces identical semantics:
//!
//! - [`MemoryLedger`] keeps entries in a mutex-guarded map (one process).
//! - [`JsonLedger`] keeps them in a JSON file and holds an exclusive file lock
//!   across each read-modify-write, so several worker processes can share it.
//!
//! `mark_building` is the only synchronization point between workers: it is an
//! atomic compare-and-transition, and exactly one of several concurrent callers
//! for the same identity succeeds. The losers get [`LedgerError::NotQueued`],
//! which callers treat as "someone else has it".
//!
//! A `Building` entry whose `status_changed` is older than the caller's
//! threshold is *stale*: the worker that claimed it is presumed dead. Stale
//! entries may be claimed again by `mark_building`, and are moved back to
//! `Queued` by `recover_stale` / `requeue`.

pub mod clock;
mod json;
mod memory;
mod table;

pub use clock::{Clock, ManualClock, SystemClock};
pub use json::JsonLedger;
pub use memory::MemoryLedger;

use crate::fingerprint::{Identity, SourceId};
use crate::variant::{Dimensions, VariantSpec};
use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("{identity} is not queued (currently {status})")]
    NotQueued {
        identity: Identity,
        status: BuildStatus,
    },
    #[error("cannot move {identity} from {from} to {to}")]
    InvalidTransition {
        identity: Identity,
        from: BuildStatus,
        to: BuildStatus,
    },
    #[error("unknown identity {0}")]
    UnknownIdentity(Identity),
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("ledger file {path} is unusable: {reason}")]
    Corrupt { path: PathBuf, reason: String },
}

/// Build state of one identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BuildStatus {
    Queued,
    Building,
    Built,
    SourceError,
    BuildError,
}

impl BuildStatus {
    /// States reachable from `self` through normal processing.
    ///
    /// `reset` is the one operation allowed to ignore these rules.
    pub fn allowed_transitions(self) -> &'static [BuildStatus] {
        use BuildStatus::*;
        match self {
            Queued => &[Building],
            Building => &[Built, SourceError, BuildError, Queued],
            Built => &[],
            SourceError | BuildError => &[Queued],
        }
    }

    pub fn can_transition_to(self, to: BuildStatus) -> bool {
        self.allowed_transitions().contains(&to)
    }

    pub fn is_error(self) -> bool {
        matches!(self, BuildStatus::SourceError | BuildStatus::BuildError)
    }

    pub fn label(self) -> &'static str {
        match self {
            BuildStatus::Queued => "queued",
            BuildStatus::Building => "building",
            BuildStatus::Built => "built",
            BuildStatus::SourceError => "source error",
            BuildStatus::BuildError => "build error",
        }
    }
}

impl fmt::Display for BuildStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Failure classification recorded by `mark_error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The source could not be opened or decoded. Not retried automatically.
    Source,
    /// Transformation, encoding or storage failed.
    Build,
}

impl ErrorKind {
    pub fn status(self) -> BuildStatus {
        match self {
            ErrorKind::Source => BuildStatus::SourceError,
            ErrorKind::Build => BuildStatus::BuildError,
        }
    }
}

/// Everything needed to produce one artifact.
#[derive(Debug, Clone, PartialEq)]
pub struct Job {
    pub identity: Identity,
    pub source: SourceId,
    pub spec: VariantSpec,
}

/// Persistent record for one identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerEntry {
    pub identity: Identity,
    pub source: SourceId,
    pub spec: VariantSpec,
    pub status: BuildStatus,
    pub created: DateTime<Utc>,
    pub status_changed: DateTime<Utc>,
    pub error_count: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dimensions: Option<Dimensions>,
}

impl LedgerEntry {
    /// A Building entry last touched more than `stale_after` before `now`.
    pub fn is_stale(&self, now: DateTime<Utc>, stale_after: TimeDelta) -> bool {
        self.status == BuildStatus::Building && now - self.status_changed > stale_after
    }

    pub fn within_error_bound(&self, max_errors: Option<u32>) -> bool {
        max_errors.is_none_or(|max| self.error_count <= max)
    }

    pub fn job(&self) -> Job {
        Job {
            identity: self.identity,
            source: self.source.clone(),
            spec: self.spec.clone(),
        }
    }
}

/// Result of `ensure_queued`.
#[derive(Debug, Clone, PartialEq)]
pub struct Enqueued {
    pub entry: LedgerEntry,
    /// `false` when the identity was already known.
    pub created: bool,
}

/// Which entries `requeue` moves back to Queued.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RequeueFilter {
    /// Only entries with at most this many recorded failures. `None` = all.
    pub max_errors: Option<u32>,
    /// Also requeue stale Building entries.
    pub include_stale: bool,
    pub stale_after: TimeDelta,
}

/// Result of a stale sweep.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StaleSweep {
    /// Stale Building entries moved back to Queued.
    pub recovered: Vec<Identity>,
    /// Building entries still within the threshold, left untouched.
    pub in_progress: usize,
}

/// Storage engine for build state.
///
/// Implementations must make each method atomic with respect to concurrent
/// callers, in particular `mark_building`.
pub trait Ledger: Send + Sync {
    /// Create a Queued entry if none exists; otherwise return the existing one.
    fn ensure_queued(&self, job: &Job) -> Result<Enqueued, LedgerError>;

    /// Batched `ensure_queued`.
    fn ensure_queued_all(&self, jobs: &[Job]) -> Result<Vec<Enqueued>, LedgerError> {
        jobs.iter().map(|job| self.ensure_queued(job)).collect()
    }

    /// Claim an entry for building. Succeeds from Queued or from a stale
    /// Building entry; anything else is [`LedgerError::NotQueued`].
    fn mark_building(
        &self,
        identity: &Identity,
        stale_after: TimeDelta,
    ) -> Result<LedgerEntry, LedgerError>;

    /// Building → Built. Clears the error count.
    fn mark_built(
        &self,
        identity: &Identity,
        dimensions: Dimensions,
    ) -> Result<LedgerEntry, LedgerError>;

    /// Building → SourceError / BuildError. Increments the error count.
    fn mark_error(&self, identity: &Identity, kind: ErrorKind) -> Result<LedgerEntry, LedgerError>;

    /// Move errored (and optionally stale) entries back to Queued. Returns the count moved.
    fn requeue(&self, filter: &RequeueFilter) -> Result<usize, LedgerError>;

    /// Explicitly restart one entry from any state.
    fn reset(&self, identity: &Identity) -> Result<LedgerEntry, LedgerError>;

    /// Move stale Building entries within the error bound back to Queued.
    fn recover_stale(
        &self,
        stale_after: TimeDelta,
        max_errors: Option<u32>,
    ) -> Result<StaleSweep, LedgerError>;

    /// Queued entries within the error bound.
    fn queued(&self, max_errors: Option<u32>) -> Result<Vec<LedgerEntry>, LedgerError>;

    /// Current entries for the given identities. Unknown identities are absent.
    fn bulk_status(
        &self,
        identities: &[Identity],
    ) -> Result<HashMap<Identity, LedgerEntry>, LedgerError>;

    /// Every entry, ordered by identity.
    fn snapshot(&self) -> Result<Vec<LedgerEntry>, LedgerError>;
}
