//! JSON-file ledger shared between processes.
//!
//! Layout on disk:
//!
//! ```text
//! <path>        {"version": 1, "entries": [ ...sorted by identity... ]}
//! <path>.lock   empty; held with an OS file lock during every operation
//! ```
//!
//! Mutations take an exclusive lock, load the table, apply the change, write
//! `<path>.tmp` and rename it over `<path>`, then release. Reads take a shared
//! lock. A missing ledger file is an empty ledger; an unreadable one is an
//! error and is never overwritten.

use super::table::LedgerTable;
use super::{
    Clock, Enqueued, ErrorKind, Job, Ledger, LedgerEntry, LedgerError, RequeueFilter, StaleSweep,
    SystemClock,
};
use crate::fingerprint::Identity;
use crate::variant::Dimensions;
use chrono::TimeDelta;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

const LEDGER_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct LedgerFile {
    version: u32,
    entries: Vec<LedgerEntry>,
}

pub struct JsonLedger {
    path: PathBuf,
    clock: Arc<dyn Clock>,
}

/// Held lock file; the OS lock is released when this drops.
struct LockGuard {
    _file: File,
}

impl JsonLedger {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_clock(path, Arc::new(SystemClock))
    }

    pub fn with_clock(path: impl Into<PathBuf>, clock: Arc<dyn Clock>) -> Self {
        Self {
            path: path.into(),
            clock,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn lock_path(&self) -> PathBuf {
        sibling(&self.path, "lock")
    }

    fn open_lock(&self) -> Result<File, LedgerError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            fs::create_dir_all(parent)?;
        }
        Ok(OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(self.lock_path())?)
    }

    fn lock_exclusive(&self) -> Result<LockGuard, LedgerError> {
        let file = self.open_lock()?;
        file.lock()?;
        Ok(LockGuard { _file: file })
    }

    fn lock_shared(&self) -> Result<LockGuard, LedgerError> {
        let file = self.open_lock()?;
        file.lock_shared()?;
        Ok(LockGuard { _file: file })
    }

    fn load(&self) -> Result<LedgerTable, LedgerError> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(LedgerTable::default());
            }
            Err(e) => return Err(e.into()),
        };
        let file: LedgerFile = serde_json::from_str(&raw).map_err(|e| LedgerError::Corrupt {
            path: self.path.clone(),
            reason: e.to_string(),
        })?;
        if file.version != LEDGER_VERSION {
            return Err(LedgerError::Corrupt {
                path: self.path.clone(),
                reason: format!(
                    "version {} (expected {LEDGER_VERSION})",
                    file.version
                ),
            });
        }
        Ok(LedgerTable::from_entries(file.entries))
    }

    fn save(&self, table: &LedgerTable) -> Result<(), LedgerError> {
        let file = LedgerFile {
            version: LEDGER_VERSION,
            entries: table.entries().cloned().collect(),
        };
        let tmp = sibling(&self.path, "tmp");
        {
            let mut writer = BufWriter::new(File::create(&tmp)?);
            serde_json::to_writer_pretty(&mut writer, &file)?;
            writer.flush()?;
        }
        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Exclusive read-modify-write.
    fn update<T>(
        &self,
        apply: impl FnOnce(&mut LedgerTable) -> Result<T, LedgerError>,
    ) -> Result<T, LedgerError> {
        let _guard = self.lock_exclusive()?;
        let mut table = self.load()?;
        let out = apply(&mut table)?;
        self.save(&table)?;
        Ok(out)
    }

    fn read<T>(&self, view: impl FnOnce(&LedgerTable) -> T) -> Result<T, LedgerError> {
        let _guard = self.lock_shared()?;
        let table = self.load()?;
        Ok(view(&table))
    }
}

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(".");
    name.push(suffix);
    PathBuf::from(name)
}

impl Ledger for JsonLedger {
    fn ensure_queued(&self, job: &Job) -> Result<Enqueued, LedgerError> {
        let now = self.clock.now();
        self.update(|table| Ok(table.ensure_queued(job, now)))
    }

    fn ensure_queued_all(&self, jobs: &[Job]) -> Result<Vec<Enqueued>, LedgerError> {
        let now = self.clock.now();
        self.update(|table| Ok(jobs.iter().map(|job| table.ensure_queued(job, now)).collect()))
    }

    fn mark_building(
        &self,
        identity: &Identity,
        stale_after: TimeDelta,
    ) -> Result<LedgerEntry, LedgerError> {
        let now = self.clock.now();
        self.update(|table| table.mark_building(identity, now, stale_after))
    }

    fn mark_built(
        &self,
        identity: &Identity,
        dimensions: Dimensions,
    ) -> Result<LedgerEntry, LedgerError> {
        let now = self.clock.now();
        self.update(|table| table.mark_built(identity, dimensions, now))
    }

    fn mark_error(&self, identity: &Identity, kind: ErrorKind) -> Result<LedgerEntry, LedgerError> {
        let now = self.clock.now();
        self.update(|table| table.mark_error(identity, kind, now))
    }

    fn requeue(&self, filter: &RequeueFilter) -> Result<usize, LedgerError> {
        let now = self.clock.now();
        self.update(|table| Ok(table.requeue(filter, now)))
    }

    fn reset(&self, identity: &Identity) -> Result<LedgerEntry, LedgerError> {
        let now = self.clock.now();
        self.update(|table| table.reset(identity, now))
    }

    fn recover_stale(
        &self,
        stale_after: TimeDelta,
        max_errors: Option<u32>,
    ) -> Result<StaleSweep, LedgerError> {
        let now = self.clock.now();
        self.update(|table| Ok(table.recover_stale(now, stale_after, max_errors)))
    }

    fn queued(&self, max_errors: Option<u32>) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.read(|table| table.queued(max_errors))
    }

    fn bulk_status(
        &self,
        identities: &[Identity],
    ) -> Result<HashMap<Identity, LedgerEntry>, LedgerError> {
        self.read(|table| table.bulk_status(identities))
    }

    fn snapshot(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.read(|table| table.snapshot())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{BuildStatus, ManualClock};
    use crate::test_helpers::{sample_job, t0};
    use tempfile::TempDir;

    const STALE: TimeDelta = TimeDelta::seconds(600);

    fn ledger_in(tmp: &TempDir) -> JsonLedger {
        JsonLedger::with_clock(
            tmp.path().join("state/ledger.json"),
            Arc::new(ManualClock::new(t0())),
        )
    }

    #[test]
    fn missing_file_is_empty_ledger() {
        let tmp = TempDir::new().unwrap();
        let ledger = ledger_in(&tmp);
        assert!(ledger.snapshot().unwrap().is_empty());
        assert!(!ledger.path().exists());
    }

    #[test]
    fn state_persists_across_instances() {
        let tmp = TempDir::new().unwrap();
        let job = sample_job("a.jpg", 300);
        {
            let ledger = ledger_in(&tmp);
            ledger.ensure_queued(&job).unwrap();
            ledger.mark_building(&job.identity, STALE).unwrap();
            ledger
                .mark_built(&job.identity, Dimensions { width: 300, height: 169 })
                .unwrap();
        }
        let reopened = ledger_in(&tmp);
        let entries = reopened.snapshot().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, BuildStatus::Built);
        assert_eq!(entries[0].spec, job.spec);
        assert_eq!(entries[0].source, job.source);
    }

    #[test]
    fn file_records_version_and_sorted_entries() {
        let tmp = TempDir::new().unwrap();
        let ledger = ledger_in(&tmp);
        let jobs: Vec<Job> = (0..4).map(|i| sample_job(&format!("{i}.jpg"), 300)).collect();
        ledger.ensure_queued_all(&jobs).unwrap();

        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(ledger.path()).unwrap()).unwrap();
        assert_eq!(raw["version"], 1);
        let ids: Vec<&str> = raw["entries"]
            .as_array()
            .unwrap()
            .iter()
            .map(|e| e["identity"].as_str().unwrap())
            .collect();
        let mut sorted = ids.clone();
        sorted.sort();
        assert_eq!(ids, sorted);
        assert!(!sibling(ledger.path(), "tmp").exists());
    }

    #[test]
    fn corrupt_file_is_an_error_and_left_alone() {
        let tmp = TempDir::new().unwrap();
        let ledger = ledger_in(&tmp);
        fs::create_dir_all(ledger.path().parent().unwrap()).unwrap();
        fs::write(ledger.path(), "{not json").unwrap();

        let job = sample_job("a.jpg", 300);
        assert!(matches!(
            ledger.ensure_queued(&job),
            Err(LedgerError::Corrupt { .. })
        ));
        assert_eq!(fs::read_to_string(ledger.path()).unwrap(), "{not json");
    }

    #[test]
    fn unknown_version_is_rejected() {
        let tmp = TempDir::new().unwrap();
        let ledger = ledger_in(&tmp);
        fs::create_dir_all(ledger.path().parent().unwrap()).unwrap();
        fs::write(ledger.path(), r#"{"version": 99, "entries": []}"#).unwrap();
        assert!(matches!(
            ledger.snapshot(),
            Err(LedgerError::Corrupt { .. })
        ));
    }

    #[test]
    fn concurrent_claims_across_handles_have_one_winner() {
        let tmp = TempDir::new().unwrap();
        let job = sample_job("a.jpg", 300);
        ledger_in(&tmp).ensure_queued(&job).unwrap();

        let wins = std::thread::scope(|s| {
            let handles: Vec<_> = (0..6)
                .map(|_| {
                    s.spawn(|| {
                        let ledger = ledger_in(&tmp);
                        ledger.mark_building(&job.identity, STALE).is_ok()
                    })
                })
                .collect();
            handles
                .into_iter()
                .map(|h| h.join().unwrap())
                .filter(|won| *won)
                .count()
        });
        assert_eq!(wins, 1);
    }
}
