//! Read engine: merges the hot buffer with archived data.
//!
//! A range query is served from the hot buffer alone whenever the buffer
//! reaches back to the start of the request; otherwise the storage backend
//! supplies the cold history and the buffer supplies the tail. The merge
//! de-duplicates the overlap and refuses to append the buffer when the
//! backend result was truncated at its record cap, since appending would
//! hide a gap in the middle of the result. Results can be down-sampled to a
//! target cardinality by deterministic bucket decimation.

use crate::archive::Archive;
use crate::buffer::HotBuffer;
use crate::error::Result;
use crate::point::{PointId, Reading, TimeRange, Timestamp};
use std::sync::Arc;
use tracing::warn;

/// Answers point queries from the hot buffer and a storage backend.
pub struct QueryEngine {
    buffer: Arc<HotBuffer>,
    archive: Arc<dyn Archive>,
}

impl QueryEngine {
    /// Creates an engine over the given buffer and backend.
    pub fn new(buffer: Arc<HotBuffer>, archive: Arc<dyn Archive>) -> Self {
        Self { buffer, archive }
    }

    /// Returns all readings for the point within `range`, oldest first,
    /// down-sampled to at most `max_samples` records when `max_samples > 1`.
    ///
    /// Backend failures degrade to whatever the hot buffer holds; an
    /// availability gap is preferable to failing the caller.
    pub fn query(
        &self,
        id: &PointId,
        range: TimeRange,
        max_samples: usize,
    ) -> Result<Vec<Reading>> {
        let buffered = self.buffer.slice(id, range);

        // When the buffer reaches back to the start of the request, nothing
        // older can be missing from it: skip the backend entirely.
        if let Some(earliest) = self.buffer.earliest_timestamp(id) {
            if earliest <= range.start {
                return Ok(downsample(buffered, range, max_samples));
            }
        }

        let mut merged = match self.archive.extract(id, range) {
            Ok(records) => records,
            Err(err) => {
                warn!(point = %id, error = %err, "Archive extract failed, serving buffer only");
                Vec::new()
            }
        };

        if self.append_buffer(id, &merged, range) {
            if let Some(first) = buffered.first() {
                let buffer_start = first.timestamp;
                // Drop the overlap so no timestamp appears twice.
                while merged
                    .last()
                    .is_some_and(|r| r.timestamp >= buffer_start)
                {
                    merged.pop();
                }
                merged.extend(buffered);
            }
        }

        Ok(downsample(merged, range, max_samples))
    }

    /// Decides whether the hot buffer may be appended to a backend result.
    ///
    /// The backend caps result sets; a capped result must not get the buffer
    /// appended after it, or the records cut off in between would silently
    /// vanish from the middle. Truncation is detected by asking whether a
    /// record following the last returned one still falls inside the range.
    fn append_buffer(&self, id: &PointId, archived: &[Reading], range: TimeRange) -> bool {
        let Some(last) = archived.last() else {
            return true;
        };
        match self.archive.following(id, last.timestamp + 1) {
            Ok(Some(next)) => next.timestamp > range.end,
            Ok(None) => true,
            Err(err) => {
                warn!(point = %id, error = %err, "Truncation check failed, keeping buffer off");
                false
            }
        }
    }

    /// Returns the last reading at or before `ts`, checking the hot buffer
    /// before the backend.
    pub fn preceding(&self, id: &PointId, ts: Timestamp) -> Result<Option<Reading>> {
        let window = self.buffer.snapshot(id);
        if window.first().is_some_and(|r| r.timestamp <= ts) {
            return Ok(window.iter().rev().find(|r| r.timestamp <= ts).cloned());
        }
        self.archive.preceding(id, ts)
    }

    /// Returns the first reading at or after `ts`, checking the hot buffer
    /// before the backend.
    pub fn following(&self, id: &PointId, ts: Timestamp) -> Result<Option<Reading>> {
        let window = self.buffer.snapshot(id);
        if window.first().is_some_and(|r| r.timestamp <= ts) {
            // The buffer spans ts: if an answer exists anywhere, it is here.
            return Ok(window.iter().find(|r| r.timestamp >= ts).cloned());
        }
        let deep = self.archive.following(id, ts)?;
        // The buffer's oldest record may still be the nearest follower when
        // the archive holds nothing at or after ts.
        Ok(deep.or_else(|| window.into_iter().next()))
    }
}

/// Deterministic one-pass decimation to at most `max_samples` records.
///
/// The range is divided into `max_samples` equal-width buckets; the first
/// record at or after each bucket boundary is kept. Not a statistical
/// aggregate.
fn downsample(data: Vec<Reading>, range: TimeRange, max_samples: usize) -> Vec<Reading> {
    if max_samples <= 1 || data.len() <= max_samples {
        return data;
    }

    let increment = (range.span() / max_samples as i64).max(1);
    let mut kept = Vec::with_capacity(max_samples);
    let mut next_sample = range.start;
    let mut i = 0;

    while i < data.len() && next_sample <= range.end && kept.len() < max_samples {
        while i < data.len() && data[i].timestamp < next_sample {
            i += 1;
        }
        if i >= data.len() {
            break;
        }
        kept.push(data[i].clone());
        next_sample += increment;
        i += 1;
    }
    kept
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::{FlushJob, NoopArchive};
    use crate::point::{PointDef, Value};
    use std::sync::Mutex;

    /// Backend serving a fixed record list, with an optional result cap.
    #[derive(Default)]
    struct FixedArchive {
        records: Vec<Reading>,
        cap: Option<usize>,
        extracts: Mutex<usize>,
    }

    impl FixedArchive {
        fn with_records(timestamps: &[Timestamp]) -> Self {
            Self {
                records: timestamps.iter().map(|&ts| reading(ts)).collect(),
                cap: None,
                extracts: Mutex::new(0),
            }
        }
    }

    impl Archive for FixedArchive {
        fn flush(&self, _job: FlushJob) -> Result<()> {
            Ok(())
        }

        fn extract(&self, _point: &PointId, range: TimeRange) -> Result<Vec<Reading>> {
            *self.extracts.lock().unwrap() += 1;
            let mut res: Vec<Reading> = self
                .records
                .iter()
                .filter(|r| range.contains(r.timestamp))
                .cloned()
                .collect();
            if let Some(cap) = self.cap {
                res.truncate(cap);
            }
            Ok(res)
        }

        fn preceding(&self, _point: &PointId, ts: Timestamp) -> Result<Option<Reading>> {
            Ok(self
                .records
                .iter()
                .rev()
                .find(|r| r.timestamp <= ts)
                .cloned())
        }

        fn following(&self, _point: &PointId, ts: Timestamp) -> Result<Option<Reading>> {
            Ok(self.records.iter().find(|r| r.timestamp >= ts).cloned())
        }

        fn purge_old_data(&self, _def: &PointDef) -> Result<()> {
            Ok(())
        }
    }

    fn reading(ts: Timestamp) -> Reading {
        Reading::new(ts, Value::Float64(ts as f64))
    }

    fn id() -> PointId {
        PointId::new("weather.temp", "site")
    }

    fn buffer_with(timestamps: &[Timestamp]) -> Arc<HotBuffer> {
        let buffer = Arc::new(HotBuffer::new());
        let def = PointDef::new(id()).with_buffer_capacity(1_000);
        for &ts in timestamps {
            buffer.update(&def, reading(ts));
        }
        buffer
    }

    fn timestamps(readings: &[Reading]) -> Vec<Timestamp> {
        readings.iter().map(|r| r.timestamp).collect()
    }

    #[test]
    fn test_buffer_alone_covers_request() {
        let archive = Arc::new(FixedArchive::with_records(&[10, 20]));
        let engine = QueryEngine::new(buffer_with(&[100, 200, 300]), archive.clone());

        let res = engine.query(&id(), TimeRange::new(100, 300), 0).unwrap();
        assert_eq!(timestamps(&res), vec![100, 200, 300]);
        assert_eq!(*archive.extracts.lock().unwrap(), 0);
    }

    #[test]
    fn test_merge_dedups_overlap() {
        // Archive holds 10..=40; buffer holds 30..=60. The merged result
        // must carry each timestamp once.
        let archive = Arc::new(FixedArchive::with_records(&[10, 20, 30, 40]));
        let engine = QueryEngine::new(buffer_with(&[30, 40, 50, 60]), archive);

        let res = engine.query(&id(), TimeRange::new(0, 100), 0).unwrap();
        assert_eq!(timestamps(&res), vec![10, 20, 30, 40, 50, 60]);
    }

    #[test]
    fn test_merge_idempotent() {
        let archive = Arc::new(FixedArchive::with_records(&[10, 20, 30]));
        let engine = QueryEngine::new(buffer_with(&[30, 40]), archive);

        let first = engine.query(&id(), TimeRange::new(0, 100), 0).unwrap();
        let second = engine.query(&id(), TimeRange::new(0, 100), 0).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_truncated_backend_result_keeps_buffer_off() {
        // The backend caps at 2 records although 3 fall in range; appending
        // the buffer would hide the gap at 30.
        let mut archive = FixedArchive::with_records(&[10, 20, 30]);
        archive.cap = Some(2);
        let engine = QueryEngine::new(buffer_with(&[40, 50]), Arc::new(archive));

        let res = engine.query(&id(), TimeRange::new(0, 100), 0).unwrap();
        assert_eq!(timestamps(&res), vec![10, 20]);
    }

    #[test]
    fn test_empty_buffer_serves_archive() {
        let archive = Arc::new(FixedArchive::with_records(&[10, 20]));
        let engine = QueryEngine::new(Arc::new(HotBuffer::new()), archive);

        let res = engine.query(&id(), TimeRange::new(0, 100), 0).unwrap();
        assert_eq!(timestamps(&res), vec![10, 20]);
    }

    #[test]
    fn test_downsample_bounds() {
        let all: Vec<Timestamp> = (0..100).collect();
        let archive = Arc::new(FixedArchive::with_records(&all));
        let engine = QueryEngine::new(Arc::new(HotBuffer::new()), archive);

        let res = engine.query(&id(), TimeRange::new(0, 99), 10).unwrap();
        assert!(res.len() <= 10);
        // The first record is the first of its bucket and is never skipped.
        assert_eq!(res[0].timestamp, 0);
    }

    #[test]
    fn test_downsample_disabled_below_two() {
        let all: Vec<Timestamp> = (0..10).collect();
        let archive = Arc::new(FixedArchive::with_records(&all));
        let engine = QueryEngine::new(Arc::new(HotBuffer::new()), archive);

        let res = engine.query(&id(), TimeRange::new(0, 9), 1).unwrap();
        assert_eq!(res.len(), 10);
    }

    #[test]
    fn test_preceding_prefers_buffer() {
        let archive = Arc::new(FixedArchive::with_records(&[10, 20]));
        let engine = QueryEngine::new(buffer_with(&[100, 200]), archive);

        assert_eq!(
            engine.preceding(&id(), 150).unwrap().unwrap().timestamp,
            100
        );
        // Buffer cannot answer: falls through to the archive.
        assert_eq!(engine.preceding(&id(), 50).unwrap().unwrap().timestamp, 20);
    }

    #[test]
    fn test_following_falls_back_to_buffer_head() {
        // Archive has nothing at or after ts; the buffer's oldest record is
        // the nearest follower.
        let archive = Arc::new(FixedArchive::with_records(&[10, 20]));
        let engine = QueryEngine::new(buffer_with(&[100, 200]), archive);

        assert_eq!(engine.following(&id(), 50).unwrap().unwrap().timestamp, 100);
        assert_eq!(engine.following(&id(), 15).unwrap().unwrap().timestamp, 20);
        assert_eq!(
            engine.following(&id(), 150).unwrap().unwrap().timestamp,
            200
        );
    }

    #[test]
    fn test_following_none_past_all_data() {
        let archive = Arc::new(FixedArchive::with_records(&[10]));
        let engine = QueryEngine::new(buffer_with(&[100]), archive);
        assert!(engine.following(&id(), 300).unwrap().is_none());
    }

    #[test]
    fn test_noop_backend_serves_buffer_only() {
        let engine = QueryEngine::new(buffer_with(&[100, 200]), Arc::new(NoopArchive::new()));
        let res = engine.query(&id(), TimeRange::new(0, 300), 0).unwrap();
        assert_eq!(timestamps(&res), vec![100, 200]);
    }
}
