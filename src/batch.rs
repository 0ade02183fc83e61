//! Request-scoped deduplication of image lookups.
//!
//! A page render typically asks for the same few images many times, each
//! with several variants. A [`Batch`] collects those requests first and
//! touches the ledger once:
//!
//! ```text
//! add(a) ─┐                             ┌─► url(a), srcset(a)
//! add(b) ─┼─► identities (deduplicated) ─► load ─► one bulk_status
//! add(a) ─┘                             │        + one ensure_queued_all for misses
//!                                       └─► build(mode) ─► each identity at most once
//! ```
//!
//! - `add` is pure: it resolves options and fingerprints variants.
//! - `load` fetches only identities not yet cached, so adding more requests
//!   after a load costs one more bulk read for the new identities only.
//! - Accessors that need ledger state load implicitly, but only when their
//!   handle is unresolved.
//! - Newly created ledger entries are announced on the optional
//!   [`QueuedEvent`] channel so a worker can pick them up.
//!
//! Out-of-band failures never surface here: a variant that failed to build
//! simply reads as "not built yet".

use crate::engine::Engine;
use crate::fingerprint::{Identity, SourceId, fingerprint};
use crate::ledger::{BuildStatus, Job, Ledger, LedgerEntry, LedgerError};
use crate::options::{OptionsError, RawOptions, Resolver};
use crate::queue::{Outcome, build_one};
use crate::storage::{ArtifactKey, Storage};
use chrono::TimeDelta;
use indexmap::IndexMap;
use std::collections::{HashMap, HashSet};
use std::sync::mpsc::Sender;
use thiserror::Error;
use tracing::{debug, info};

#[derive(Error, Debug)]
pub enum BatchError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),
    #[error("request handle {0} does not belong to this batch")]
    UnknownHandle(usize),
}

/// Opaque reference to one `add` call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct RequestHandle(usize);

/// Which of a request's variants to consider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildMode {
    /// Only the base variant (the `src` image).
    Base,
    /// Every variant except the base.
    Srcset,
    /// Everything.
    #[default]
    All,
}

/// Identities newly created in the ledger by a `load`.
#[derive(Debug, Clone, PartialEq)]
pub struct QueuedEvent {
    pub identities: Vec<Identity>,
}

/// One `srcset` candidate.
#[derive(Debug, Clone, PartialEq)]
pub struct SrcsetItem {
    pub url: String,
    pub width: u32,
}

/// Tally of one inline `build`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildSummary {
    pub built: usize,
    pub failed: usize,
    /// Already built with the artifact present.
    pub present: usize,
    /// Claimed by another worker.
    pub in_progress: usize,
    /// Recorded as failed earlier; left for requeue.
    pub skipped_errors: usize,
}

struct Item {
    alt: Option<String>,
    sizes: String,
    /// Canonical order; the first is the base variant.
    identities: Vec<Identity>,
}

pub struct Batch<'a> {
    resolver: &'a Resolver,
    ledger: &'a dyn Ledger,
    storage: &'a dyn Storage,
    events: Option<Sender<QueuedEvent>>,
    items: Vec<Item>,
    jobs: IndexMap<Identity, Job>,
    entries: HashMap<Identity, LedgerEntry>,
    loads: usize,
    generated: HashSet<Identity>,
}

impl<'a> Batch<'a> {
    pub fn new(resolver: &'a Resolver, ledger: &'a dyn Ledger, storage: &'a dyn Storage) -> Self {
        Self {
            resolver,
            ledger,
            storage,
            events: None,
            items: Vec::new(),
            jobs: IndexMap::new(),
            entries: HashMap::new(),
            loads: 0,
            generated: HashSet::new(),
        }
    }

    pub fn with_events(mut self, events: Sender<QueuedEvent>) -> Self {
        self.events = Some(events);
        self
    }

    /// Register a request. No I/O.
    pub fn add(
        &mut self,
        source: SourceId,
        options: &RawOptions,
    ) -> Result<RequestHandle, OptionsError> {
        let resolved = self.resolver.resolve(options)?;
        let mut identities = Vec::new();
        for variant in resolved.variants() {
            let identity = fingerprint(&source, &variant.spec);
            self.jobs.entry(identity).or_insert_with(|| Job {
                identity,
                source: source.clone(),
                spec: variant.spec,
            });
            identities.push(identity);
        }
        self.items.push(Item {
            alt: options.alt.clone(),
            sizes: resolved.sizes_attr(),
            identities,
        });
        Ok(RequestHandle(self.items.len() - 1))
    }

    /// Fetch ledger state for every identity not yet cached, enqueueing the
    /// ones the ledger has never seen. Returns how many identities were fetched.
    pub fn load(&mut self) -> Result<usize, LedgerError> {
        let pending: Vec<Identity> = self
            .jobs
            .keys()
            .filter(|id| !self.entries.contains_key(*id))
            .copied()
            .collect();
        if pending.is_empty() {
            return Ok(0);
        }

        self.loads += 1;
        let found = self.ledger.bulk_status(&pending)?;
        let missing: Vec<Job> = pending
            .iter()
            .filter(|id| !found.contains_key(*id))
            .filter_map(|id| self.jobs.get(id).cloned())
            .collect();
        debug!(
            fetched = pending.len(),
            known = found.len(),
            missing = missing.len(),
            "batch load"
        );
        self.entries.extend(found);

        if !missing.is_empty() {
            let enqueued = self.ledger.ensure_queued_all(&missing)?;
            let mut created = Vec::new();
            for e in enqueued {
                if e.created {
                    created.push(e.entry.identity);
                }
                self.entries.insert(e.entry.identity, e.entry);
            }
            if let Some(tx) = &self.events
                && !created.is_empty()
            {
                let _ = tx.send(QueuedEvent {
                    identities: created,
                });
            }
        }
        Ok(pending.len())
    }

    /// Whether every identity of `handle` has cached ledger state. No I/O.
    pub fn is_resolved(&self, handle: RequestHandle) -> Result<bool, BatchError> {
        let item = self.item(handle)?;
        Ok(item.identities.iter().all(|id| self.entries.contains_key(id)))
    }

    /// Whether every variant selected by `mode` is built.
    pub fn is_built(&mut self, handle: RequestHandle, mode: BuildMode) -> Result<bool, BatchError> {
        self.ensure_resolved(handle)?;
        let targets = self.targets(handle, mode)?;
        Ok(targets.iter().all(|id| self.status(id) == Some(BuildStatus::Built)))
    }

    /// URL of the base variant, once built.
    pub fn url(&mut self, handle: RequestHandle) -> Result<Option<String>, BatchError> {
        self.ensure_resolved(handle)?;
        let base = self.item(handle)?.identities[0];
        Ok(self.built_url(&base))
    }

    /// Built variants with their pixel widths, in canonical order. A width
    /// already listed is not repeated.
    pub fn srcset(&mut self, handle: RequestHandle) -> Result<Vec<SrcsetItem>, BatchError> {
        self.ensure_resolved(handle)?;
        let mut seen = HashSet::new();
        let mut items = Vec::new();
        for id in &self.item(handle)?.identities {
            let Some(url) = self.built_url(id) else {
                continue;
            };
            let width = self.jobs[id].spec.width;
            if seen.insert(width) {
                items.push(SrcsetItem { url, width });
            }
        }
        Ok(items)
    }

    /// `srcset` rendered as an HTML attribute value: `"url 300w, url 600w"`.
    pub fn srcset_attr(&mut self, handle: RequestHandle) -> Result<String, BatchError> {
        Ok(self
            .srcset(handle)?
            .iter()
            .map(|item| format!("{} {}w", item.url, item.width))
            .collect::<Vec<_>>()
            .join(", "))
    }

    pub fn alt(&self, handle: RequestHandle) -> Result<Option<&str>, BatchError> {
        Ok(self.item(handle)?.alt.as_deref())
    }

    /// HTML `sizes` attribute value.
    pub fn sizes(&self, handle: RequestHandle) -> Result<&str, BatchError> {
        Ok(&self.item(handle)?.sizes)
    }

    /// Identities of `handle` in canonical order, base first.
    pub fn identities(&self, handle: RequestHandle) -> Result<&[Identity], BatchError> {
        Ok(&self.item(handle)?.identities)
    }

    /// Number of bulk ledger reads so far.
    pub fn load_count(&self) -> usize {
        self.loads
    }

    /// Generate missing artifacts inline for every request.
    ///
    /// Each identity is attempted at most once per batch. A `Built` entry
    /// whose artifact has gone missing from storage is reset and rebuilt;
    /// errored entries are left for requeue.
    pub fn build(
        &mut self,
        mode: BuildMode,
        engine: &dyn Engine,
        stale_after: TimeDelta,
    ) -> Result<BuildSummary, BatchError> {
        self.load()?;

        let mut targets = Vec::new();
        let mut seen = HashSet::new();
        for index in 0..self.items.len() {
            for id in self.targets(RequestHandle(index), mode)? {
                if !self.generated.contains(&id) && seen.insert(id) {
                    targets.push(id);
                }
            }
        }

        let mut summary = BuildSummary::default();
        let mut touched = Vec::new();
        for id in targets {
            let job = self.jobs[&id].clone();
            match self.status(&id) {
                Some(BuildStatus::Built) => {
                    if self.storage.exists(&ArtifactKey::new(id, job.spec.format)) {
                        summary.present += 1;
                        continue;
                    }
                    debug!(identity = %id, "artifact missing, rebuilding");
                    self.ledger.reset(&id)?;
                }
                Some(status) if status.is_error() => {
                    summary.skipped_errors += 1;
                    continue;
                }
                _ => {}
            }

            self.generated.insert(id);
            touched.push(id);
            match build_one(self.ledger, engine, self.storage, &job, stale_after)? {
                Outcome::Built(_) => summary.built += 1,
                Outcome::Failed { .. } => summary.failed += 1,
                Outcome::Lost => summary.in_progress += 1,
            }
        }

        if !touched.is_empty() {
            self.loads += 1;
            let refreshed = self.ledger.bulk_status(&touched)?;
            self.entries.extend(refreshed);
        }
        info!(
            built = summary.built,
            failed = summary.failed,
            present = summary.present,
            "batch build complete"
        );
        Ok(summary)
    }

    fn item(&self, handle: RequestHandle) -> Result<&Item, BatchError> {
        self.items
            .get(handle.0)
            .ok_or(BatchError::UnknownHandle(handle.0))
    }

    fn ensure_resolved(&mut self, handle: RequestHandle) -> Result<(), BatchError> {
        if !self.is_resolved(handle)? {
            self.load()?;
        }
        Ok(())
    }

    fn targets(&self, handle: RequestHandle, mode: BuildMode) -> Result<Vec<Identity>, BatchError> {
        let ids = &self.item(handle)?.identities;
        Ok(match mode {
            BuildMode::Base => ids[..1].to_vec(),
            BuildMode::Srcset => ids[1..].to_vec(),
            BuildMode::All => ids.clone(),
        })
    }

    fn status(&self, id: &Identity) -> Option<BuildStatus> {
        self.entries.get(id).map(|e| e.status)
    }

    fn built_url(&self, id: &Identity) -> Option<String> {
        if self.status(id) != Some(BuildStatus::Built) {
            return None;
        }
        let format = self.jobs[id].spec.format;
        Some(self.storage.url(&ArtifactKey::new(*id, format)))
    }
}
