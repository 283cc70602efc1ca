//! Core data model: point identity, typed values and timestamped readings.
//!
//! A *point* is one monitored channel, identified by a hierarchical dotted
//! name plus a source qualifier (e.g. `weather.temp` from `site`). Each
//! update to a point is a [`Reading`]: a timestamp, a typed [`Value`] and an
//! alarm flag.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Timestamp in microseconds since the Unix epoch.
pub type Timestamp = i64;

/// Microseconds in one day.
pub const MICROS_PER_DAY: i64 = 86_400_000_000;

/// Returns the current time as a [`Timestamp`].
pub fn now() -> Timestamp {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_micros() as i64
}

/// An inclusive time interval `[start, end]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimeRange {
    /// Earliest time of interest (inclusive).
    pub start: Timestamp,
    /// Most recent time of interest (inclusive).
    pub end: Timestamp,
}

impl TimeRange {
    /// Creates a new inclusive time range.
    pub fn new(start: Timestamp, end: Timestamp) -> Self {
        Self { start, end }
    }

    /// Returns true if `ts` falls within this range.
    pub fn contains(&self, ts: Timestamp) -> bool {
        ts >= self.start && ts <= self.end
    }

    /// Returns the width of the range in microseconds.
    pub fn span(&self) -> i64 {
        self.end - self.start
    }
}

/// Identity of a monitored point: hierarchical dotted name plus source.
///
/// The identity doubles as the on-disk location: dots in `name` become path
/// separators, with `source` as the final directory component.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PointId {
    /// Hierarchical dotted point name, e.g. `weather.temp`.
    pub name: String,
    /// Source qualifier, e.g. the station or host producing the data.
    pub source: String,
}

impl PointId {
    /// Creates a point identity from its name and source.
    pub fn new(name: impl Into<String>, source: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source: source.into(),
        }
    }

    /// Returns the fully qualified `source.name` form.
    pub fn full_name(&self) -> String {
        format!("{}.{}", self.source, self.name)
    }
}

impl fmt::Display for PointId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.source, self.name)
    }
}

/// Default per-point capacity of the in-memory hot buffer.
pub const DEFAULT_BUFFER_CAPACITY: usize = 50;

/// Archive-relevant definition of a point.
///
/// Parsing point definitions from configuration is an external concern; the
/// archive only consumes the fields below.
#[derive(Debug, Clone)]
pub struct PointDef {
    /// The point's identity.
    pub id: PointId,
    /// Days to keep archived data; `None` keeps data forever.
    pub retention_days: Option<u32>,
    /// Capacity of the point's in-memory hot buffer.
    pub buffer_capacity: usize,
}

impl PointDef {
    /// Creates a definition with no retention limit and the default buffer
    /// capacity.
    pub fn new(id: PointId) -> Self {
        Self {
            id,
            retention_days: None,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
        }
    }

    /// Sets the retention period in days.
    pub fn with_retention_days(mut self, days: u32) -> Self {
        self.retention_days = Some(days);
        self
    }

    /// Sets the hot-buffer capacity.
    pub fn with_buffer_capacity(mut self, capacity: usize) -> Self {
        self.buffer_capacity = capacity;
        self
    }
}

/// A scalar value carried by a reading.
///
/// The set is fixed; there is no schema evolution beyond it. Each variant
/// maps to one type tag in the on-disk record format (see [`crate::codec`]).
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// 64-bit float (`dbl`).
    Float64(f64),
    /// 32-bit float (`flt`).
    Float32(f32),
    /// 32-bit integer (`int`).
    Int32(i32),
    /// 16-bit integer (`short`).
    Int16(i16),
    /// 64-bit integer (`long`).
    Int64(i64),
    /// Boolean (`bool`).
    Bool(bool),
    /// Text (`str`). Tabs are replaced by spaces on encode.
    Text(String),
    /// Angle in radians (`ang`).
    Angle(f64),
    /// Hour angle in radians (`hr`).
    HourAngle(f64),
    /// Absolute time (`abst`), microseconds since the Unix epoch.
    Instant(Timestamp),
    /// Time interval (`relt`), microseconds.
    Interval(i64),
    /// Large integer (`big`).
    BigInt(i128),
    /// No value (`null`).
    Null,
}

impl Value {
    /// Returns the on-disk type tag for this value.
    pub fn type_tag(&self) -> &'static str {
        match self {
            Value::Float64(_) => "dbl",
            Value::Float32(_) => "flt",
            Value::Int32(_) => "int",
            Value::Int16(_) => "short",
            Value::Int64(_) => "long",
            Value::Bool(_) => "bool",
            Value::Text(_) => "str",
            Value::Angle(_) => "ang",
            Value::HourAngle(_) => "hr",
            Value::Instant(_) => "abst",
            Value::Interval(_) => "relt",
            Value::BigInt(_) => "big",
            Value::Null => "null",
        }
    }

    /// Returns true for [`Value::Null`].
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }
}

/// One timestamped update for a point.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    /// Time the value was produced.
    pub timestamp: Timestamp,
    /// The value itself.
    pub value: Value,
    /// True if the reading was in an alarm condition when produced.
    pub alarm: bool,
}

impl Reading {
    /// Creates a non-alarming reading.
    pub fn new(timestamp: Timestamp, value: Value) -> Self {
        Self {
            timestamp,
            value,
            alarm: false,
        }
    }

    /// Creates an alarming reading.
    pub fn alarming(timestamp: Timestamp, value: Value) -> Self {
        Self {
            timestamp,
            value,
            alarm: true,
        }
    }
}
