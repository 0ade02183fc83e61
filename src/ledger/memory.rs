use super::table::LedgerTable;
use super::{
    Clock, Enqueued, ErrorKind, Job, Ledger, LedgerEntry, LedgerError, RequeueFilter, StaleSweep,
    SystemClock,
};
use crate::fingerprint::Identity;
use crate::variant::Dimensions;
use chrono::TimeDelta;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;

/// Process-local ledger. Every operation holds one mutex for its duration.
pub struct MemoryLedger {
    table: Mutex<LedgerTable>,
    clock: Arc<dyn Clock>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Mutex::new(LedgerTable::default()),
            clock,
        }
    }

    /// Seed the ledger with existing entries.
    pub fn from_entries(entries: Vec<LedgerEntry>, clock: Arc<dyn Clock>) -> Self {
        Self {
            table: Mutex::new(LedgerTable::from_entries(entries)),
            clock,
        }
    }
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl Ledger for MemoryLedger {
    fn ensure_queued(&self, job: &Job) -> Result<Enqueued, LedgerError> {
        let now = self.clock.now();
        Ok(self.table.lock().ensure_queued(job, now))
    }

    fn ensure_queued_all(&self, jobs: &[Job]) -> Result<Vec<Enqueued>, LedgerError> {
        let now = self.clock.now();
        let mut table = self.table.lock();
        Ok(jobs.iter().map(|job| table.ensure_queued(job, now)).collect())
    }

    fn mark_building(
        &self,
        identity: &Identity,
        stale_after: TimeDelta,
    ) -> Result<LedgerEntry, LedgerError> {
        let now = self.clock.now();
        self.table.lock().mark_building(identity, now, stale_after)
    }

    fn mark_built(
        &self,
        identity: &Identity,
        dimensions: Dimensions,
    ) -> Result<LedgerEntry, LedgerError> {
        let now = self.clock.now();
        self.table.lock().mark_built(identity, dimensions, now)
    }

    fn mark_error(&self, identity: &Identity, kind: ErrorKind) -> Result<LedgerEntry, LedgerError> {
        let now = self.clock.now();
        self.table.lock().mark_error(identity, kind, now)
    }

    fn requeue(&self, filter: &RequeueFilter) -> Result<usize, LedgerError> {
        let now = self.clock.now();
        Ok(self.table.lock().requeue(filter, now))
    }

    fn reset(&self, identity: &Identity) -> Result<LedgerEntry, LedgerError> {
        let now = self.clock.now();
        self.table.lock().reset(identity, now)
    }

    fn recover_stale(
        &self,
        stale_after: TimeDelta,
        max_errors: Option<u32>,
    ) -> Result<StaleSweep, LedgerError> {
        let now = self.clock.now();
        Ok(self.table.lock().recover_stale(now, stale_after, max_errors))
    }

    fn queued(&self, max_errors: Option<u32>) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.table.lock().queued(max_errors))
    }

    fn bulk_status(
        &self,
        identities: &[Identity],
    ) -> Result<HashMap<Identity, LedgerEntry>, LedgerError> {
        Ok(self.table.lock().bulk_status(identities))
    }

    fn snapshot(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        Ok(self.table.lock().snapshot())
    }
}
