//! On-disk layout: directory mapping, file naming and the file-set index.
//!
//! Every point owns one directory under the archive root; dots in the point
//! name become path separators and the source qualifier is the final
//! component. Archive files inside it are named for the GMT minute of their
//! first record, `YYYYMMDD-HHMM`, with an optional compression suffix. The
//! file-set index answers "which files can hold data for this interval"
//! without opening any of them.

use crate::error::{ArchiveError, Result};
use crate::point::{PointId, TimeRange, Timestamp};
use chrono::{DateTime, NaiveDateTime, Utc};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Suffix marking a compressed, retired archive file.
pub const COMPRESSED_SUFFIX: &str = ".gz";

/// Format of the timestamp embedded in archive file names (GMT).
const FILE_NAME_FORMAT: &str = "%Y%m%d-%H%M";

/// Returns true if the file name denotes a compressed archive file.
pub fn is_compressed(name: &str) -> bool {
    name.ends_with(COMPRESSED_SUFFIX)
}

/// Strips the compression suffix, if present.
pub fn base_name(name: &str) -> &str {
    name.strip_suffix(COMPRESSED_SUFFIX).unwrap_or(name)
}

/// Builds the archive file name for the given start time.
pub fn file_name_for(ts: Timestamp) -> String {
    let dt = DateTime::<Utc>::from_timestamp_micros(ts).unwrap_or_default();
    dt.format(FILE_NAME_FORMAT).to_string()
}

/// Recovers the start time embedded in an archive file name.
///
/// The compression suffix is stripped first. Fails with
/// [`ArchiveError::BadFileName`] when the remainder is not `YYYYMMDD-HHMM`.
pub fn file_time(name: &str) -> Result<Timestamp> {
    let base = base_name(name);
    let parsed = NaiveDateTime::parse_from_str(base, FILE_NAME_FORMAT).map_err(|_| {
        ArchiveError::BadFileName {
            name: name.to_string(),
        }
    })?;
    Ok(parsed.and_utc().timestamp_micros())
}

/// Returns the archive directory for a point.
pub fn point_dir(root: &Path, id: &PointId) -> PathBuf {
    let mut dir = root.to_path_buf();
    for part in id.name.split('.') {
        dir.push(part);
    }
    dir.push(&id.source);
    dir
}

/// Lists the archive files in a directory, time-ordered.
///
/// Hidden files and names that do not parse are skipped (with a warning for
/// the latter); a missing directory yields an empty list. When a compressed
/// and a plain file share a start minute (rotation within one minute), the
/// compressed one is older and sorts first; beyond that, ties keep listing
/// order.
pub(crate) fn list_files(dir: &Path) -> Result<Vec<(Timestamp, String)>> {
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry?;
        let name = match entry.file_name().into_string() {
            Ok(name) => name,
            Err(_) => continue,
        };
        if name.starts_with('.') {
            continue;
        }
        match file_time(&name) {
            Ok(ts) => files.push((ts, name)),
            Err(_) => {
                warn!(dir = %dir.display(), file = %name, "Skipping badly named archive file");
            }
        }
    }
    files.sort_by_key(|(ts, name)| (*ts, !is_compressed(name)));
    Ok(files)
}

/// Selects the minimal file set that can hold data for `range`.
///
/// One pass over the time-ordered listing: the last file starting before
/// `range.start` is the straddling predecessor (its content runs up to the
/// next file's start), every file starting inside the range is a hit, and
/// the scan stops at the first file starting past `range.end`. When no file
/// starts inside the range, the most recent predecessor alone is returned
/// since it may still hold qualifying tail data.
pub fn files_covering(dir: &Path, range: TimeRange) -> Result<Vec<String>> {
    let files = list_files(dir)?;
    let mut res = Vec::new();
    let mut hit = false;
    let mut prev: Option<&str> = None;

    for (ts, name) in &files {
        if *ts < range.start {
            prev = Some(name);
        } else if *ts > range.end {
            if !hit {
                if let Some(prev) = prev {
                    hit = true;
                    res.push(prev.to_string());
                }
            }
            break;
        } else {
            if !hit {
                hit = true;
                if let Some(prev) = prev {
                    res.push(prev.to_string());
                }
            }
            res.push(name.clone());
        }
    }
    if !hit {
        if let Some(prev) = prev {
            res.push(prev.to_string());
        }
    }

    Ok(res)
}

/// Returns the file chronologically preceding `name` in the directory.
pub fn file_before(dir: &Path, name: &str) -> Result<Option<String>> {
    let reference = file_time(name)?;
    let files = list_files(dir)?;
    let found = files
        .into_iter()
        .filter(|(ts, _)| *ts < reference)
        .min_by_key(|(ts, _)| reference - *ts);
    Ok(found.map(|(_, name)| name))
}

/// Returns the file chronologically following `name` in the directory.
pub fn file_after(dir: &Path, name: &str) -> Result<Option<String>> {
    let reference = file_time(name)?;
    let files = list_files(dir)?;
    let found = files
        .into_iter()
        .filter(|(ts, _)| *ts > reference)
        .min_by_key(|(ts, _)| *ts - reference);
    Ok(found.map(|(_, name)| name))
}
