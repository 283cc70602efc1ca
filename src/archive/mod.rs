//! Storage backends for durable point data.
//!
//! The [`Archive`] trait is the abstraction point between the write buffer /
//! read engine and a concrete store. The file-based [`AsciiArchive`] is the
//! primary implementation; [`NoopArchive`] discards everything and exists for
//! deployments that disable archiving. Backends are selected by constructing
//! the wanted variant through [`BackendKind::build`], never by name lookup.

pub mod ascii;
pub mod layout;
pub mod noop;

pub use ascii::AsciiArchive;
pub use noop::NoopArchive;

use crate::error::Result;
use crate::point::{PointDef, PointId, Reading, TimeRange, Timestamp};
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Default rotation size limit for an active archive file.
pub const DEFAULT_MAX_FILE_SIZE: u64 = 1_000_000;

/// Default rotation age limit for an active archive file.
pub const DEFAULT_MAX_FILE_AGE: Duration = Duration::from_secs(86_400);

/// Default number of flush worker threads.
pub const DEFAULT_WORKERS: usize = 2;

/// Default cap on records returned by a single extract.
pub const DEFAULT_MAX_RECORDS: usize = 5_000;

/// Configuration for a file-based archive backend.
#[derive(Debug, Clone)]
pub struct ArchiveConfig {
    /// Root directory of the archive tree.
    pub root: PathBuf,
    /// Scratch directory for transparent decompression; defaults to a
    /// `.tmp` directory under the root.
    pub temp_dir: Option<PathBuf>,
    /// Size in bytes past which the active file is rotated.
    pub max_file_size: u64,
    /// Age past which the active file is rotated.
    pub max_file_age: Duration,
    /// Number of flush worker threads.
    pub workers: usize,
    /// Maximum records returned to a single query; protects the server from
    /// unbounded result sets.
    pub max_records: usize,
}

impl ArchiveConfig {
    /// Creates a configuration with default limits rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            temp_dir: None,
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            max_file_age: DEFAULT_MAX_FILE_AGE,
            workers: DEFAULT_WORKERS,
            max_records: DEFAULT_MAX_RECORDS,
        }
    }
}

/// Shared handle to one point's pending (not yet durable) readings.
pub type PendingSlot = Arc<Mutex<Vec<Reading>>>;

/// Set of points with a flush currently in flight.
///
/// At most one flush per point may be in flight at a time; the scheduler
/// acquires an [`InFlightGuard`] before submitting and the guard's drop
/// releases the point, so a worker panic cannot wedge a point forever.
#[derive(Debug, Default)]
pub struct InFlightSet {
    inner: Mutex<HashSet<PointId>>,
}

impl InFlightSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the point currently has a flush in flight.
    pub fn contains(&self, id: &PointId) -> bool {
        self.inner.lock().expect("in-flight lock poisoned").contains(id)
    }

    fn release(&self, id: &PointId) {
        self.inner.lock().expect("in-flight lock poisoned").remove(id);
    }
}

/// Guard marking one point as being archived.
#[derive(Debug)]
pub struct InFlightGuard {
    set: Arc<InFlightSet>,
    id: PointId,
}

impl InFlightGuard {
    /// Flags `id` as in flight, or returns `None` when a flush for it is
    /// already running.
    pub fn acquire(set: &Arc<InFlightSet>, id: PointId) -> Option<Self> {
        let mut inner = set.inner.lock().expect("in-flight lock poisoned");
        if !inner.insert(id.clone()) {
            return None;
        }
        drop(inner);
        Some(Self {
            set: Arc::clone(set),
            id,
        })
    }
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.release(&self.id);
    }
}

/// One unit of flush work: a point, a snapshot of its pending readings, and
/// the handles needed to recover from failure.
///
/// The snapshot was swapped out of the pending slot when the job was built;
/// the slot may be refilling concurrently with new readings. Durability is
/// at-least-once: a crash between the durable write and the snapshot having
/// been taken out of the pending slot can replay the same readings into the
/// next file.
#[derive(Debug)]
pub struct FlushJob {
    point: PointId,
    records: Vec<Reading>,
    pending: PendingSlot,
    _guard: InFlightGuard,
}

impl FlushJob {
    /// Builds a flush job from a snapshot and its recovery handles.
    pub fn new(
        point: PointId,
        records: Vec<Reading>,
        pending: PendingSlot,
        guard: InFlightGuard,
    ) -> Self {
        Self {
            point,
            records,
            pending,
            _guard: guard,
        }
    }

    /// The point this job archives.
    pub fn point(&self) -> &PointId {
        &self.point
    }

    /// The snapshot of readings to be written, oldest first.
    pub fn records(&self) -> &[Reading] {
        &self.records
    }

    /// Puts the snapshot back at the front of the pending slot so a later
    /// flush retries it, preserving per-point FIFO order. Consumes the job;
    /// the in-flight guard is released on return.
    pub fn restore(self) {
        let Self {
            point: _,
            records,
            pending,
            _guard,
        } = self;
        {
            let mut slot = pending.lock().expect("pending lock poisoned");
            let newer = std::mem::replace(&mut *slot, records);
            slot.extend(newer);
        }
        // The point stays flagged until its readings are back in the slot.
        drop(_guard);
    }
}

/// A durable store for point readings.
///
/// Implementations perform `flush` asynchronously; when submission itself
/// fails they must [`FlushJob::restore`] the snapshot before returning the
/// error so no data is lost.
pub trait Archive: Send + Sync {
    /// Submits a batch of readings for durable storage.
    fn flush(&self, job: FlushJob) -> Result<()>;

    /// Extracts all readings for the point within `range`, oldest first.
    /// The result may be truncated at the backend's record cap.
    fn extract(&self, point: &PointId, range: TimeRange) -> Result<Vec<Reading>>;

    /// Returns the last reading at or before `ts`, if any.
    fn preceding(&self, point: &PointId, ts: Timestamp) -> Result<Option<Reading>>;

    /// Returns the first reading at or after `ts`, if any.
    fn following(&self, point: &PointId, ts: Timestamp) -> Result<Option<Reading>>;

    /// Deletes files that have aged past the point's retention policy.
    fn purge_old_data(&self, def: &PointDef) -> Result<()>;
}

/// Selects which backend implementation to construct.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BackendKind {
    /// File-based archive of compressed text files.
    #[default]
    Ascii,
    /// Discards all data.
    Noop,
}

impl BackendKind {
    /// Builds the selected backend from the configuration.
    pub fn build(self, config: ArchiveConfig) -> Result<Arc<dyn Archive>> {
        match self {
            BackendKind::Ascii => Ok(Arc::new(AsciiArchive::new(config)?)),
            BackendKind::Noop => Ok(Arc::new(NoopArchive::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Value;

    fn slot(readings: Vec<Reading>) -> PendingSlot {
        Arc::new(Mutex::new(readings))
    }

    #[test]
    fn test_in_flight_guard_releases_on_drop() {
        let set = Arc::new(InFlightSet::new());
        let id = PointId::new("a.b", "s");

        let guard = InFlightGuard::acquire(&set, id.clone()).unwrap();
        assert!(set.contains(&id));
        assert!(InFlightGuard::acquire(&set, id.clone()).is_none());

        drop(guard);
        assert!(!set.contains(&id));
        assert!(InFlightGuard::acquire(&set, id).is_some());
    }

    #[test]
    fn test_restore_prepends_snapshot() {
        let set = Arc::new(InFlightSet::new());
        let id = PointId::new("a.b", "s");
        let pending = slot(vec![Reading::new(30, Value::Int32(3))]);
        let guard = InFlightGuard::acquire(&set, id.clone()).unwrap();

        let job = FlushJob::new(
            id.clone(),
            vec![
                Reading::new(10, Value::Int32(1)),
                Reading::new(20, Value::Int32(2)),
            ],
            Arc::clone(&pending),
            guard,
        );
        job.restore();

        let got: Vec<_> = pending.lock().unwrap().iter().map(|r| r.timestamp).collect();
        assert_eq!(got, vec![10, 20, 30]);
        assert!(!set.contains(&id));
    }
}
