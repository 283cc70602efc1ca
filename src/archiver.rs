//! Write buffer and flush scheduling.
//!
//! Producers hand readings to [`Archiver::archive`], which only appends to a
//! per-point pending list and never touches disk. A scheduler thread sweeps
//! the pending lists and submits a point's snapshot to the storage backend
//! once the point is *due*: enough records accumulated, or the newest
//! pending record has gone stale. Both thresholds carry a per-point jitter
//! derived from the point name so thousands of points do not become due in
//! lock-step. A purge thread independently walks the registered points once
//! a day and asks the backend to drop data past each point's retention.
//!
//! The one invariant everything else leans on: a point never has two flushes
//! in flight at once. The scheduler skips any point whose in-flight guard is
//! held, and the guard is released only when the flush worker is done with
//! the snapshot.

use crate::archive::{Archive, FlushJob, InFlightGuard, InFlightSet, PendingSlot};
use crate::point::{now, PointDef, PointId, Reading};
use std::collections::hash_map::DefaultHasher;
use std::collections::HashMap;
use std::hash::{Hash, Hasher};
use std::sync::{Arc, Condvar, Mutex, RwLock};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

/// Base number of pending records before a point is due for flushing.
pub const DEFAULT_MIN_RECORDS: usize = 50;

/// Maximum additive jitter on the record-count threshold.
pub const DEFAULT_RECORD_JITTER: u64 = 15;

/// Base staleness of the newest pending record before a point is due.
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(180);

/// Maximum additive jitter on the staleness threshold.
pub const DEFAULT_AGE_JITTER: Duration = Duration::from_secs(60);

/// Configuration for the flush scheduler and purge loop.
#[derive(Debug, Clone)]
pub struct ArchiverConfig {
    /// Pending records before a point is due (plus jitter).
    pub min_records: usize,
    /// Upper bound of the per-point jitter added to `min_records`.
    pub record_jitter: u64,
    /// Staleness of the newest pending record before a point is due
    /// (plus jitter).
    pub max_age: Duration,
    /// Upper bound of the per-point jitter added to `max_age`.
    pub age_jitter: Duration,
    /// Sleep between scheduler sweeps.
    pub sweep_interval: Duration,
    /// Pause after each flush submission, so a sweep does not saturate the
    /// backend.
    pub submit_pause: Duration,
    /// Delay before the first purge cycle, letting the system settle.
    pub purge_startup_delay: Duration,
    /// Interval between purge cycles.
    pub purge_interval: Duration,
    /// Pause between points within one purge cycle, bounding I/O pressure.
    pub purge_point_pause: Duration,
}

impl Default for ArchiverConfig {
    fn default() -> Self {
        Self {
            min_records: DEFAULT_MIN_RECORDS,
            record_jitter: DEFAULT_RECORD_JITTER,
            max_age: DEFAULT_MAX_AGE,
            age_jitter: DEFAULT_AGE_JITTER,
            sweep_interval: Duration::from_millis(50),
            submit_pause: Duration::from_millis(1),
            purge_startup_delay: Duration::from_secs(120),
            purge_interval: Duration::from_secs(86_400),
            purge_point_pause: Duration::from_millis(250),
        }
    }
}

/// Condvar-backed shutdown flag the background loops park on, so even the
/// daily purge sleep ends promptly at shutdown.
#[derive(Debug, Default)]
struct ShutdownSignal {
    flag: Mutex<bool>,
    cv: Condvar,
}

impl ShutdownSignal {
    fn set(&self) {
        *self.flag.lock().expect("shutdown lock poisoned") = true;
        self.cv.notify_all();
    }

    fn is_set(&self) -> bool {
        *self.flag.lock().expect("shutdown lock poisoned")
    }

    /// Sleeps for `timeout` or until shutdown; returns true once shut down.
    fn wait_timeout(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut flag = self.flag.lock().expect("shutdown lock poisoned");
        while !*flag {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, _) = self
                .cv
                .wait_timeout(flag, deadline - now)
                .expect("shutdown lock poisoned");
            flag = guard;
        }
        true
    }
}

struct Shared {
    backend: Arc<dyn Archive>,
    config: ArchiverConfig,
    /// Pending readings per point. The outer lock is held only to look up or
    /// insert a slot; appends and snapshots take the per-point lock.
    pending: Mutex<HashMap<PointId, PendingSlot>>,
    in_flight: Arc<InFlightSet>,
    points: RwLock<HashMap<PointId, PointDef>>,
    shutdown: ShutdownSignal,
}

/// Buffers readings per point and flushes them to a storage backend.
pub struct Archiver {
    shared: Arc<Shared>,
    scheduler: Option<JoinHandle<()>>,
    purger: Option<JoinHandle<()>>,
}

impl Archiver {
    /// Creates an archiver without background threads.
    ///
    /// Useful for embedding: drive it with [`Archiver::sweep_once`] and
    /// [`Archiver::purge_once`], or call [`Archiver::start_threads`].
    pub fn new(backend: Arc<dyn Archive>, config: ArchiverConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                backend,
                config,
                pending: Mutex::new(HashMap::new()),
                in_flight: Arc::new(InFlightSet::new()),
                points: RwLock::new(HashMap::new()),
                shutdown: ShutdownSignal::default(),
            }),
            scheduler: None,
            purger: None,
        }
    }

    /// Creates an archiver and starts its scheduler and purge threads.
    pub fn start(backend: Arc<dyn Archive>, config: ArchiverConfig) -> Self {
        let mut archiver = Self::new(backend, config);
        archiver.start_threads();
        archiver
    }

    /// Spawns the scheduler and purge threads if not yet running.
    pub fn start_threads(&mut self) {
        if self.scheduler.is_none() {
            let shared = Arc::clone(&self.shared);
            self.scheduler = Some(
                thread::Builder::new()
                    .name("point-archiver".to_string())
                    .spawn(move || scheduler_loop(shared))
                    .expect("spawn archiver scheduler"),
            );
        }
        if self.purger.is_none() {
            let shared = Arc::clone(&self.shared);
            self.purger = Some(
                thread::Builder::new()
                    .name("old-data-purger".to_string())
                    .spawn(move || purge_loop(shared))
                    .expect("spawn archiver purger"),
            );
        }
    }

    /// Registers a point so the purge loop knows its retention policy.
    pub fn register(&self, def: PointDef) {
        self.shared
            .points
            .write()
            .expect("registry lock poisoned")
            .insert(def.id.clone(), def);
    }

    /// Buffers a reading for later flushing. Never blocks on disk I/O.
    /// Readings arriving after shutdown began are dropped.
    pub fn archive(&self, id: &PointId, reading: Reading) {
        if self.shared.shutdown.is_set() {
            debug!(point = %id, "Dropping reading received during shutdown");
            return;
        }
        let slot = self.shared.slot(id);
        slot.lock().expect("pending lock poisoned").push(reading);
    }

    /// Returns true while any point still has unflushed readings.
    pub fn has_pending(&self) -> bool {
        let pending = self.shared.pending.lock().expect("pending map lock poisoned");
        pending
            .values()
            .any(|slot| !slot.lock().expect("pending lock poisoned").is_empty())
    }

    /// Runs one scheduler sweep, submitting every due point (every non-empty
    /// point when `flush_all` is set). Returns the number of submissions.
    pub fn sweep_once(&self, flush_all: bool) -> usize {
        self.shared.sweep_once(flush_all)
    }

    /// Runs one purge cycle over all registered points with a retention
    /// policy.
    pub fn purge_once(&self) {
        self.shared.purge_once();
    }

    /// Best-effort drain: flushes pending data once more, stops the
    /// background threads and waits for them.
    pub fn shutdown(&mut self) {
        self.shared.shutdown.set();
        if let Some(handle) = self.scheduler.take() {
            if handle.join().is_err() {
                error!("Archiver scheduler panicked");
            }
        } else {
            // No scheduler thread: drain synchronously.
            self.shared.sweep_once(true);
        }
        if let Some(handle) = self.purger.take() {
            if handle.join().is_err() {
                error!("Archiver purger panicked");
            }
        }
    }
}

impl Drop for Archiver {
    fn drop(&mut self) {
        if self.scheduler.is_some() || self.purger.is_some() {
            self.shutdown();
        }
    }
}

impl Shared {
    fn slot(&self, id: &PointId) -> PendingSlot {
        let mut pending = self.pending.lock().expect("pending map lock poisoned");
        Arc::clone(pending.entry(id.clone()).or_default())
    }

    /// Jitter in `0..bound` derived from the point's full name, stable for
    /// the lifetime of the process.
    fn jitter(id: &PointId, bound: u64) -> u64 {
        if bound == 0 {
            return 0;
        }
        let mut hasher = DefaultHasher::new();
        id.full_name().hash(&mut hasher);
        hasher.finish() % bound
    }

    fn is_due(&self, id: &PointId, len: usize, newest: i64) -> bool {
        let min_records =
            self.config.min_records + Self::jitter(id, self.config.record_jitter) as usize;
        if len >= min_records {
            return true;
        }
        let age_jitter = Duration::from_micros(Self::jitter(
            id,
            self.config.age_jitter.as_micros() as u64,
        ));
        let cutoff = now() - (self.config.max_age + age_jitter).as_micros() as i64;
        newest <= cutoff
    }

    fn sweep_once(&self, flush_all: bool) -> usize {
        let slots: Vec<(PointId, PendingSlot)> = {
            let pending = self.pending.lock().expect("pending map lock poisoned");
            pending
                .iter()
                .map(|(id, slot)| (id.clone(), Arc::clone(slot)))
                .collect()
        };

        let mut submitted = 0;
        for (id, slot) in slots {
            let (len, newest) = {
                let guard = slot.lock().expect("pending lock poisoned");
                match guard.last() {
                    Some(last) => (guard.len(), last.timestamp),
                    None => continue,
                }
            };
            if !flush_all && !self.is_due(&id, len, newest) {
                continue;
            }

            let Some(guard) = InFlightGuard::acquire(&self.in_flight, id.clone()) else {
                warn!(point = %id, "Point is already being archived");
                continue;
            };
            let records = {
                let mut pending = slot.lock().expect("pending lock poisoned");
                std::mem::take(&mut *pending)
            };
            if records.is_empty() {
                continue;
            }

            debug!(point = %id, records = records.len(), "Submitting flush");
            let job = FlushJob::new(id.clone(), records, Arc::clone(&slot), guard);
            if let Err(err) = self.backend.flush(job) {
                error!(point = %id, error = %err, "Flush submission failed");
                continue;
            }
            submitted += 1;

            if !self.config.submit_pause.is_zero() {
                thread::sleep(self.config.submit_pause);
            }
        }
        submitted
    }

    fn purge_once(&self) {
        let defs: Vec<PointDef> = {
            let points = self.points.read().expect("registry lock poisoned");
            points.values().cloned().collect()
        };
        for def in defs {
            if self.shutdown.is_set() {
                return;
            }
            if def.retention_days.is_some() {
                debug!(point = %def.id, "Purging old archive data");
                if let Err(err) = self.backend.purge_old_data(&def) {
                    warn!(point = %def.id, error = %err, "Purge failed");
                }
            }
            // Short pause so the purge never hogs the disk.
            self.shutdown.wait_timeout(self.config.purge_point_pause);
        }
    }
}

fn scheduler_loop(shared: Arc<Shared>) {
    loop {
        let draining = shared.shutdown.is_set();
        let submitted = shared.sweep_once(draining);
        if draining {
            info!(submitted, "Archiver drained on shutdown");
            break;
        }
        if submitted > 0 {
            debug!(submitted, "Scheduler sweep complete");
        }
        shared.shutdown.wait_timeout(shared.config.sweep_interval);
    }
}

fn purge_loop(shared: Arc<Shared>) {
    if shared.shutdown.wait_timeout(shared.config.purge_startup_delay) {
        return;
    }
    loop {
        let cycle_start = Instant::now();
        shared.purge_once();

        let elapsed = cycle_start.elapsed();
        let sleep = shared.config.purge_interval.saturating_sub(elapsed);
        if shared.shutdown.wait_timeout(sleep) {
            return;
        }
    }
}
