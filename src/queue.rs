//! Out-of-band generation of queued artifacts.
//!
//! A [`QueueProcessor`] run:
//!
//! 1. Sweeps stale `Building` entries back to `Queued` (their worker is
//!    presumed dead). Recent `Building` entries are left alone and counted.
//! 2. Takes every `Queued` entry within the error bound and builds them in
//!    parallel with rayon: claim with `mark_building`, render with the
//!    [`Engine`], write with the [`Storage`], then `mark_built` or
//!    `mark_error`.
//!
//! Losing a claim to another worker ([`LedgerError::NotQueued`]) is normal and
//! counted as `lost`; the entry is never retried by this run. So is finishing
//! after a stale claim was taken over and settled elsewhere: the late result
//! is discarded. Engine and
//! storage failures are recorded in the ledger and never abort the run; only
//! ledger failures do.
//!
//! Progress is reported through an optional channel of [`BuildEvent`]s so the
//! CLI can print as work completes without the processor doing any output.

use crate::engine::Engine;
use crate::fingerprint::{Identity, SourceId};
use crate::ledger::{ErrorKind, Job, Ledger, LedgerEntry, LedgerError};
use crate::storage::{ArtifactKey, Storage};
use crate::variant::Dimensions;
use chrono::TimeDelta;
use rayon::prelude::*;
use std::fmt;
use std::sync::mpsc::Sender;
use tracing::{info, warn};

/// Progress event for one identity.
#[derive(Debug, Clone, PartialEq)]
pub enum BuildEvent {
    Built {
        identity: Identity,
        source: SourceId,
        dimensions: Dimensions,
    },
    Failed {
        identity: Identity,
        source: SourceId,
        kind: ErrorKind,
        message: String,
    },
    Lost {
        identity: Identity,
    },
}

/// Result of building one claimed job.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Built(Dimensions),
    Failed { kind: ErrorKind, message: String },
    /// Another worker holds the claim.
    Lost,
}

/// Tally of one processor run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Report {
    /// Queued entries attempted.
    pub processed: usize,
    pub built: usize,
    pub errored: usize,
    /// Stale Building entries moved back to Queued.
    pub recovered: usize,
    /// Building entries still within the stale threshold, left untouched.
    pub skipped_stale: usize,
    /// Claims lost to another worker.
    pub lost: usize,
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} processed: {} built, {} failed",
            self.processed, self.built, self.errored
        )?;
        if self.lost > 0 {
            write!(f, ", {} claimed elsewhere", self.lost)?;
        }
        if self.recovered > 0 {
            write!(f, " ({} stale recovered)", self.recovered)?;
        }
        if self.skipped_stale > 0 {
            write!(f, " ({} in progress elsewhere)", self.skipped_stale)?;
        }
        Ok(())
    }
}

/// Claim, render, store and record one job.
///
/// Engine and storage failures become ledger errors and an
/// [`Outcome::Failed`]; only ledger failures are returned as `Err`.
pub(crate) fn build_one(
    ledger: &dyn Ledger,
    engine: &dyn Engine,
    storage: &dyn Storage,
    job: &Job,
    stale_after: TimeDelta,
) -> Result<Outcome, LedgerError> {
    match ledger.mark_building(&job.identity, stale_after) {
        Ok(_) => {}
        Err(LedgerError::NotQueued { .. }) => return Ok(Outcome::Lost),
        Err(e) => return Err(e),
    }

    let rendered = match engine.process(&job.source, &job.spec) {
        Ok(rendered) => rendered,
        Err(e) => return record_failure(ledger, job, e.kind(), e.to_string()),
    };

    let key = ArtifactKey::new(job.identity, rendered.format);
    if let Err(e) = storage.put(&key, &rendered.bytes) {
        return record_failure(ledger, job, ErrorKind::Build, e.to_string());
    }

    let finished = ledger.mark_built(&job.identity, rendered.dimensions);
    settle(job, finished, Outcome::Built(rendered.dimensions))
}

fn record_failure(
    ledger: &dyn Ledger,
    job: &Job,
    kind: ErrorKind,
    message: String,
) -> Result<Outcome, LedgerError> {
    warn!(identity = %job.identity, source = %job.source, ?kind, "{message}");
    let finished = ledger.mark_error(&job.identity, kind);
    settle(job, finished, Outcome::Failed { kind, message })
}

/// A claim that went stale may have been taken over and finished by another
/// worker before this one reports back. The ledger then refuses the
/// transition, and the late result is dropped as a lost race.
fn settle(
    job: &Job,
    finished: Result<LedgerEntry, LedgerError>,
    outcome: Outcome,
) -> Result<Outcome, LedgerError> {
    match finished {
        Ok(_) => Ok(outcome),
        Err(LedgerError::InvalidTransition { from, .. }) => {
            info!(
                identity = %job.identity,
                status = %from,
                "claim superseded by another worker"
            );
            Ok(Outcome::Lost)
        }
        Err(e) => Err(e),
    }
}

/// Runs the ledger's queued work through an engine into storage.
pub struct QueueProcessor<'a> {
    ledger: &'a dyn Ledger,
    engine: &'a dyn Engine,
    storage: &'a dyn Storage,
    events: Option<Sender<BuildEvent>>,
}

impl<'a> QueueProcessor<'a> {
    pub fn new(ledger: &'a dyn Ledger, engine: &'a dyn Engine, storage: &'a dyn Storage) -> Self {
        Self {
            ledger,
            engine,
            storage,
            events: None,
        }
    }

    pub fn with_events(mut self, events: Sender<BuildEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// One pass over the ledger. See the [module docs](self) for the steps.
    pub fn run(
        &self,
        stale_after: TimeDelta,
        max_errors: Option<u32>,
    ) -> Result<Report, LedgerError> {
        let sweep = self.ledger.recover_stale(stale_after, max_errors)?;
        for identity in &sweep.recovered {
            info!(%identity, "stale build detected, requeued");
        }

        let queued = self.ledger.queued(max_errors)?;
        let outcomes: Vec<Outcome> = queued
            .par_iter()
            .map(|entry| {
                let job = entry.job();
                let outcome =
                    build_one(self.ledger, self.engine, self.storage, &job, stale_after)?;
                self.emit(&job, &outcome);
                Ok(outcome)
            })
            .collect::<Result<_, LedgerError>>()?;

        let mut report = Report {
            processed: outcomes.len(),
            recovered: sweep.recovered.len(),
            skipped_stale: sweep.in_progress,
            ..Report::default()
        };
        for outcome in &outcomes {
            match outcome {
                Outcome::Built(_) => report.built += 1,
                Outcome::Failed { .. } => report.errored += 1,
                Outcome::Lost => report.lost += 1,
            }
        }
        info!(
            processed = report.processed,
            built = report.built,
            errored = report.errored,
            lost = report.lost,
            "queue run complete"
        );
        Ok(report)
    }

    fn emit(&self, job: &Job, outcome: &Outcome) {
        let Some(tx) = &self.events else {
            return;
        };
        let event = match outcome {
            Outcome::Built(dimensions) => BuildEvent::Built {
                identity: job.identity,
                source: job.source.clone(),
                dimensions: *dimensions,
            },
            Outcome::Failed { kind, message } => BuildEvent::Failed {
                identity: job.identity,
                source: job.source.clone(),
                kind: *kind,
                message: message.clone(),
            },
            Outcome::Lost => BuildEvent::Lost {
                identity: job.identity,
            },
        };
        // Receiver gone means nobody is listening
        let _ = tx.send(event);
    }
}
