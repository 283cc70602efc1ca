//! In-memory hot buffer: a bounded recent-history window per point.
//!
//! The hot buffer holds the most recent readings for every point so that
//! queries over the near past never touch disk. It is purely a cache of
//! recent history; durability is the archive's job. Readings arrive through
//! [`HotBuffer::update`] in production order, and the oldest entries are
//! evicted once a point exceeds its configured capacity.

use crate::point::{PointDef, PointId, Reading, TimeRange, Timestamp};
use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

/// Bounded per-point window of recent readings.
#[derive(Debug, Default)]
pub struct HotBuffer {
    table: RwLock<HashMap<PointId, VecDeque<Reading>>>,
}

impl HotBuffer {
    /// Creates an empty hot buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a reading to the point's window, evicting the oldest entries
    /// beyond the point's capacity. Null-valued readings are not buffered.
    pub fn update(&self, def: &PointDef, reading: Reading) {
        if reading.value.is_null() {
            return;
        }
        let mut table = self.table.write().expect("hot buffer lock poisoned");
        let window = table.entry(def.id.clone()).or_default();
        while window.len() >= def.buffer_capacity.max(1) {
            window.pop_front();
        }
        window.push_back(reading);
    }

    /// Returns the most recent reading for the point, if any.
    pub fn latest(&self, id: &PointId) -> Option<Reading> {
        let table = self.table.read().expect("hot buffer lock poisoned");
        table.get(id).and_then(|w| w.back().cloned())
    }

    /// Returns the timestamp of the oldest buffered reading for the point.
    pub fn earliest_timestamp(&self, id: &PointId) -> Option<Timestamp> {
        let table = self.table.read().expect("hot buffer lock poisoned");
        table.get(id).and_then(|w| w.front().map(|r| r.timestamp))
    }

    /// Returns a copy of the point's buffered readings within `range`.
    pub fn slice(&self, id: &PointId, range: TimeRange) -> Vec<Reading> {
        let table = self.table.read().expect("hot buffer lock poisoned");
        match table.get(id) {
            Some(window) => window
                .iter()
                .filter(|r| range.contains(r.timestamp))
                .cloned()
                .collect(),
            None => Vec::new(),
        }
    }

    /// Returns a copy of the point's entire buffered window, oldest first.
    pub fn snapshot(&self, id: &PointId) -> Vec<Reading> {
        let table = self.table.read().expect("hot buffer lock poisoned");
        match table.get(id) {
            Some(window) => window.iter().cloned().collect(),
            None => Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::point::Value;

    fn def(capacity: usize) -> PointDef {
        PointDef::new(PointId::new("weather.temp", "site")).with_buffer_capacity(capacity)
    }

    fn reading(ts: Timestamp) -> Reading {
        Reading::new(ts, Value::Float64(ts as f64))
    }

    #[test]
    fn test_update_and_latest() {
        let buffer = HotBuffer::new();
        let def = def(10);
        buffer.update(&def, reading(100));
        buffer.update(&def, reading(200));
        assert_eq!(buffer.latest(&def.id).unwrap().timestamp, 200);
        assert_eq!(buffer.earliest_timestamp(&def.id), Some(100));
    }

    #[test]
    fn test_eviction_keeps_newest() {
        let buffer = HotBuffer::new();
        let def = def(3);
        for ts in 1..=5 {
            buffer.update(&def, reading(ts));
        }
        let snap = buffer.snapshot(&def.id);
        assert_eq!(snap.len(), 3);
        assert_eq!(snap[0].timestamp, 3);
        assert_eq!(snap[2].timestamp, 5);
    }

    #[test]
    fn test_slice_restricts_to_range() {
        let buffer = HotBuffer::new();
        let def = def(10);
        for ts in [100, 200, 300, 400] {
            buffer.update(&def, reading(ts));
        }
        let got = buffer.slice(&def.id, TimeRange::new(150, 350));
        assert_eq!(
            got.iter().map(|r| r.timestamp).collect::<Vec<_>>(),
            vec![200, 300]
        );
    }

    #[test]
    fn test_null_readings_not_buffered() {
        let buffer = HotBuffer::new();
        let def = def(10);
        buffer.update(&def, Reading::new(100, Value::Null));
        assert!(buffer.latest(&def.id).is_none());
    }

    #[test]
    fn test_unknown_point_is_empty() {
        let buffer = HotBuffer::new();
        let id = PointId::new("no.such", "point");
        assert!(buffer.latest(&id).is_none());
        assert!(buffer.slice(&id, TimeRange::new(0, i64::MAX)).is_empty());
    }
}
