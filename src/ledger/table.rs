//! Transition logic shared by every ledger backend.
//!
//! Backends own the locking and persistence; this table owns the rules. Every
//! operation takes `now` explicitly so the logic stays pure and testable.

use super::{
    BuildStatus, Enqueued, ErrorKind, Job, LedgerEntry, LedgerError, RequeueFilter, StaleSweep,
};
use crate::fingerprint::Identity;
use crate::variant::Dimensions;
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::{BTreeMap, HashMap};
use tracing::debug;

#[derive(Debug, Clone, Default)]
pub(crate) struct LedgerTable {
    entries: BTreeMap<Identity, LedgerEntry>,
}

impl LedgerTable {
    pub fn from_entries(entries: impl IntoIterator<Item = LedgerEntry>) -> Self {
        Self {
            entries: entries.into_iter().map(|e| (e.identity, e)).collect(),
        }
    }

    /// Entries ordered by identity.
    pub fn entries(&self) -> impl Iterator<Item = &LedgerEntry> {
        self.entries.values()
    }

    pub fn ensure_queued(&mut self, job: &Job, now: DateTime<Utc>) -> Enqueued {
        if let Some(existing) = self.entries.get(&job.identity) {
            return Enqueued {
                entry: existing.clone(),
                created: false,
            };
        }
        let entry = LedgerEntry {
            identity: job.identity,
            source: job.source.clone(),
            spec: job.spec.clone(),
            status: BuildStatus::Queued,
            created: now,
            status_changed: now,
            error_count: 0,
            last_error: None,
            dimensions: None,
        };
        debug!(identity = %job.identity, source = %job.source, "queued");
        self.entries.insert(job.identity, entry.clone());
        Enqueued {
            entry,
            created: true,
        }
    }

    pub fn mark_building(
        &mut self,
        identity: &Identity,
        now: DateTime<Utc>,
        stale_after: TimeDelta,
    ) -> Result<LedgerEntry, LedgerError> {
        let entry = self.get_mut(identity)?;
        let claimable =
            entry.status == BuildStatus::Queued || entry.is_stale(now, stale_after);
        if !claimable {
            return Err(LedgerError::NotQueued {
                identity: *identity,
                status: entry.status,
            });
        }
        entry.status = BuildStatus::Building;
        entry.status_changed = now;
        debug!(%identity, "building");
        Ok(entry.clone())
    }

    pub fn mark_built(
        &mut self,
        identity: &Identity,
        dimensions: Dimensions,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerError> {
        let entry = self.transition(identity, BuildStatus::Built, now)?;
        entry.error_count = 0;
        entry.last_error = None;
        entry.dimensions = Some(dimensions);
        debug!(%identity, %dimensions, "built");
        Ok(entry.clone())
    }

    pub fn mark_error(
        &mut self,
        identity: &Identity,
        kind: ErrorKind,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerError> {
        let entry = self.transition(identity, kind.status(), now)?;
        entry.error_count = entry.error_count.saturating_add(1);
        entry.last_error = Some(kind);
        debug!(%identity, status = %entry.status, errors = entry.error_count, "failed");
        Ok(entry.clone())
    }

    pub fn requeue(&mut self, filter: &RequeueFilter, now: DateTime<Utc>) -> usize {
        let mut moved = 0;
        for entry in self.entries.values_mut() {
            let eligible = entry.status.is_error()
                || (filter.include_stale && entry.is_stale(now, filter.stale_after));
            if eligible && entry.within_error_bound(filter.max_errors) {
                entry.status = BuildStatus::Queued;
                entry.status_changed = now;
                moved += 1;
            }
        }
        debug!(moved, "requeued");
        moved
    }

    pub fn reset(
        &mut self,
        identity: &Identity,
        now: DateTime<Utc>,
    ) -> Result<LedgerEntry, LedgerError> {
        let entry = self.get_mut(identity)?;
        entry.status = BuildStatus::Queued;
        entry.status_changed = now;
        entry.dimensions = None;
        debug!(%identity, "reset");
        Ok(entry.clone())
    }

    pub fn recover_stale(
        &mut self,
        now: DateTime<Utc>,
        stale_after: TimeDelta,
        max_errors: Option<u32>,
    ) -> StaleSweep {
        let mut sweep = StaleSweep::default();
        for entry in self.entries.values_mut() {
            if entry.status != BuildStatus::Building {
                continue;
            }
            if entry.is_stale(now, stale_after) && entry.within_error_bound(max_errors) {
                entry.status = BuildStatus::Queued;
                entry.status_changed = now;
                sweep.recovered.push(entry.identity);
            } else if !entry.is_stale(now, stale_after) {
                sweep.in_progress += 1;
            }
        }
        sweep
    }

    pub fn queued(&self, max_errors: Option<u32>) -> Vec<LedgerEntry> {
        self.entries
            .values()
            .filter(|e| e.status == BuildStatus::Queued && e.within_error_bound(max_errors))
            .cloned()
            .collect()
    }

    pub fn bulk_status(&self, identities: &[Identity]) -> HashMap<Identity, LedgerEntry> {
        identities
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| (*id, e.clone())))
            .collect()
    }

    pub fn snapshot(&self) -> Vec<LedgerEntry> {
        self.entries.values().cloned().collect()
    }

    fn get_mut(&mut self, identity: &Identity) -> Result<&mut LedgerEntry, LedgerError> {
        self.entries
            .get_mut(identity)
            .ok_or(LedgerError::UnknownIdentity(*identity))
    }

    fn transition(
        &mut self,
        identity: &Identity,
        to: BuildStatus,
        now: DateTime<Utc>,
    ) -> Result<&mut LedgerEntry, LedgerError> {
        let entry = self.get_mut(identity)?;
        if !entry.status.can_transition_to(to) {
            return Err(LedgerError::InvalidTransition {
                identity: *identity,
                from: entry.status,
                to,
            });
        }
        entry.status = to;
        entry.status_changed = now;
        Ok(entry)
    }
}
