//! Shared test utilities for the img-variants test suite.
//!
//! Provides fixed timestamps, sample specs and jobs, a synthetic JPEG writer,
//! an in-memory [`Storage`], and a [`Ledger`] wrapper that counts bulk reads.
//!
//! # Usage
//!
//! ```rust
//! use crate::test_helpers::*;
//!
//! let ledger = CountingLedger::new();
//! let storage = MemoryStorage::new();
//! let job = sample_job("photos/cat.jpg", 300);
//! ledger.ensure_queued(&job).unwrap();
//! assert_eq!(ledger.bulk_reads(), 0);
//! ```

use crate::fingerprint::{Identity, SourceId, fingerprint};
use crate::ledger::{
    Enqueued, ErrorKind, Job, Ledger, LedgerEntry, LedgerError, MemoryLedger, RequeueFilter,
    StaleSweep,
};
use crate::storage::{ArtifactKey, Storage, StorageError};
use crate::variant::{Crop, Dimensions, Format, Quality, Ratio, VariantSpec};
use chrono::{DateTime, TimeDelta, Utc};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

// =========================================================================
// Fixtures
// =========================================================================

/// Fixed start time for clock-driven tests.
pub fn t0() -> DateTime<Utc> {
    DateTime::from_timestamp(1_700_000_000, 0).unwrap()
}

/// 16:9 center-cropped WebP at quality 80.
pub fn sample_spec(width: u32) -> VariantSpec {
    VariantSpec {
        width,
        ratio: Ratio::new(16.0 / 9.0),
        crop: Crop::center(),
        contain: true,
        focal_window: None,
        quality: Quality::default(),
        format: Format::Webp,
        density: 1.0,
    }
}

pub fn sample_job(name: &str, width: u32) -> Job {
    let source = SourceId::new(name);
    let spec = sample_spec(width);
    Job {
        identity: fingerprint(&source, &spec),
        source,
        spec,
    }
}

/// Write a small valid JPEG with a gradient so crops are distinguishable.
pub fn write_test_jpeg(path: &Path, width: u32, height: u32) {
    use image::{ImageEncoder, RgbImage};

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    let img = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x % 256) as u8, (y % 256) as u8, 128])
    });
    let file = std::fs::File::create(path).unwrap();
    let writer = std::io::BufWriter::new(file);
    image::codecs::jpeg::JpegEncoder::new(writer)
        .write_image(img.as_raw(), width, height, image::ExtendedColorType::Rgb8)
        .unwrap();
}

// =========================================================================
// In-memory storage
// =========================================================================

/// Storage backed by a map. Uses Mutex (not RefCell) so it is Sync.
#[derive(Default)]
pub struct MemoryStorage {
    blobs: Mutex<HashMap<ArtifactKey, Vec<u8>>>,
    fail_writes: bool,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Storage whose every `put` fails.
    pub fn failing() -> Self {
        Self {
            fail_writes: true,
            ..Self::default()
        }
    }

    pub fn remove(&self, key: &ArtifactKey) {
        self.blobs.lock().unwrap().remove(key);
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().unwrap().len()
    }
}

impl Storage for MemoryStorage {
    fn put(&self, key: &ArtifactKey, bytes: &[u8]) -> Result<String, StorageError> {
        if self.fail_writes {
            return Err(StorageError::Io(std::io::Error::other("disk full")));
        }
        self.blobs.lock().unwrap().insert(*key, bytes.to_vec());
        Ok(key.relative_path())
    }

    fn exists(&self, key: &ArtifactKey) -> bool {
        self.blobs.lock().unwrap().contains_key(key)
    }

    fn read(&self, key: &ArtifactKey) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.blobs.lock().unwrap().get(key).cloned())
    }

    fn url(&self, key: &ArtifactKey) -> String {
        format!("/media/{}", key.relative_path())
    }
}

// =========================================================================
// Counting ledger
// =========================================================================

/// [`MemoryLedger`] that counts bulk reads and batched enqueues.
#[derive(Default)]
pub struct CountingLedger {
    inner: MemoryLedger,
    bulk_reads: AtomicUsize,
    bulk_enqueues: AtomicUsize,
}

impl CountingLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bulk_reads(&self) -> usize {
        self.bulk_reads.load(Ordering::SeqCst)
    }

    pub fn bulk_enqueues(&self) -> usize {
        self.bulk_enqueues.load(Ordering::SeqCst)
    }
}

impl Ledger for CountingLedger {
    fn ensure_queued(&self, job: &Job) -> Result<Enqueued, LedgerError> {
        self.inner.ensure_queued(job)
    }

    fn ensure_queued_all(&self, jobs: &[Job]) -> Result<Vec<Enqueued>, LedgerError> {
        self.bulk_enqueues.fetch_add(1, Ordering::SeqCst);
        self.inner.ensure_queued_all(jobs)
    }

    fn mark_building(
        &self,
        identity: &Identity,
        stale_after: TimeDelta,
    ) -> Result<LedgerEntry, LedgerError> {
        self.inner.mark_building(identity, stale_after)
    }

    fn mark_built(
        &self,
        identity: &Identity,
        dimensions: Dimensions,
    ) -> Result<LedgerEntry, LedgerError> {
        self.inner.mark_built(identity, dimensions)
    }

    fn mark_error(&self, identity: &Identity, kind: ErrorKind) -> Result<LedgerEntry, LedgerError> {
        self.inner.mark_error(identity, kind)
    }

    fn requeue(&self, filter: &RequeueFilter) -> Result<usize, LedgerError> {
        self.inner.requeue(filter)
    }

    fn reset(&self, identity: &Identity) -> Result<LedgerEntry, LedgerError> {
        self.inner.reset(identity)
    }

    fn recover_stale(
        &self,
        stale_after: TimeDelta,
        max_errors: Option<u32>,
    ) -> Result<StaleSweep, LedgerError> {
        self.inner.recover_stale(stale_after, max_errors)
    }

    fn queued(&self, max_errors: Option<u32>) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.inner.queued(max_errors)
    }

    fn bulk_status(
        &self,
        identities: &[Identity],
    ) -> Result<HashMap<Identity, LedgerEntry>, LedgerError> {
        self.bulk_reads.fetch_add(1, Ordering::SeqCst);
        self.inner.bulk_status(identities)
    }

    fn snapshot(&self) -> Result<Vec<LedgerEntry>, LedgerError> {
        self.inner.snapshot()
    }
}
