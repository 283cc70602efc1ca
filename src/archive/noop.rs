//! Backend that accepts and discards all data.

use crate::archive::{Archive, FlushJob};
use crate::error::Result;
use crate::point::{PointDef, PointId, Reading, TimeRange, Timestamp};

/// A discarding backend for deployments that disable archiving.
#[derive(Debug, Default)]
pub struct NoopArchive;

impl NoopArchive {
    /// Creates the backend.
    pub fn new() -> Self {
        Self
    }
}

impl Archive for NoopArchive {
    fn flush(&self, job: FlushJob) -> Result<()> {
        drop(job);
        Ok(())
    }

    fn extract(&self, _point: &PointId, _range: TimeRange) -> Result<Vec<Reading>> {
        Ok(Vec::new())
    }

    fn preceding(&self, _point: &PointId, _ts: Timestamp) -> Result<Option<Reading>> {
        Ok(None)
    }

    fn following(&self, _point: &PointId, _ts: Timestamp) -> Result<Option<Reading>> {
        Ok(None)
    }

    fn purge_old_data(&self, _def: &PointDef) -> Result<()> {
        Ok(())
    }
}
