//! Cairn - Tiered archive for monitored point data.
//!
//! This crate records timestamped scalar readings from many independent
//! monitored channels and answers range queries over them, even when the
//! data volume vastly exceeds memory.
//!
//! # Components
//!
//! - [`Archiver`]: write buffer and flush scheduler
//! - [`AsciiArchive`]: file-based storage backend with rotation, compression
//!   and retention purging
//! - [`HotBuffer`]: bounded in-memory window of recent readings
//! - [`QueryEngine`]: merges buffer and archive, with down-sampling
//!
//! # Example
//!
//! ```rust,ignore
//! use cairn::{
//!     Archiver, ArchiverConfig, ArchiveConfig, BackendKind, HotBuffer,
//!     PointDef, PointId, QueryEngine, Reading, TimeRange, Value,
//! };
//! use std::sync::Arc;
//!
//! let backend = BackendKind::Ascii.build(ArchiveConfig::new("/var/lib/cairn"))?;
//! let mut archiver = Archiver::start(Arc::clone(&backend), ArchiverConfig::default());
//! let buffer = Arc::new(HotBuffer::new());
//! let engine = QueryEngine::new(Arc::clone(&buffer), Arc::clone(&backend));
//!
//! let def = PointDef::new(PointId::new("weather.temp", "site")).with_retention_days(365);
//! archiver.register(def.clone());
//!
//! // Producers feed both the hot buffer and the archiver.
//! let reading = Reading::new(cairn::now(), Value::Float64(21.5));
//! buffer.update(&def, reading.clone());
//! archiver.archive(&def.id, reading);
//!
//! // Readers merge buffer and archive transparently.
//! let history = engine.query(&def.id, TimeRange::new(0, cairn::now()), 1000)?;
//! ```

#![deny(missing_docs)]

pub mod archive;
pub mod archiver;
pub mod buffer;
pub mod codec;
pub mod error;
pub mod point;
pub mod query;

pub use archive::{
    Archive, ArchiveConfig, AsciiArchive, BackendKind, FlushJob, InFlightGuard, InFlightSet,
    NoopArchive, PendingSlot,
};
pub use archiver::{Archiver, ArchiverConfig};
pub use buffer::HotBuffer;
pub use error::{ArchiveError, Result};
pub use point::{now, PointDef, PointId, Reading, TimeRange, Timestamp, Value};
pub use query::QueryEngine;
