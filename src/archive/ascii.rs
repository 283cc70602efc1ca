//! File-based archive backend storing compressed text files.
//!
//! Each record is appended to a text file living in a directory hierarchy
//! derived from the point name. When the active file gets too large or too
//! old it is compressed in place and subsequent data goes to a new file.
//! Compression is transparent to readers: compressed files are inflated to a
//! private scratch copy while a query runs.
//!
//! Flush jobs run on a fixed pool of worker threads fed by a bounded
//! channel; the blocking send is the backpressure that keeps a slow disk
//! from queuing unbounded work.

use crate::archive::{layout, Archive, ArchiveConfig, FlushJob};
use crate::codec::{decode_line, encode_line};
use crate::error::Result;
use crate::point::{now, PointDef, PointId, Reading, TimeRange, Timestamp, MICROS_PER_DAY};
use crossbeam_channel::{bounded, Receiver, Sender};
use flate2::read::GzDecoder;
use flate2::{Compression, GzBuilder};
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufRead, BufReader, BufWriter, Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use tempfile::NamedTempFile;
use tracing::{debug, error, warn};

/// Archive backend writing tab-separated text files, compressed on rotation.
pub struct AsciiArchive {
    inner: Arc<Inner>,
    tx: Option<Sender<FlushJob>>,
    workers: Vec<JoinHandle<()>>,
}

struct Inner {
    config: ArchiveConfig,
    temp_dir: PathBuf,
    /// Current uncompressed file per point, populated lazily and dropped
    /// when the cached file is found missing.
    active_files: Mutex<HashMap<PointId, PathBuf>>,
}

impl AsciiArchive {
    /// Creates the backend and starts its flush worker pool.
    pub fn new(config: ArchiveConfig) -> Result<Self> {
        fs::create_dir_all(&config.root)?;
        let temp_dir = config
            .temp_dir
            .clone()
            .unwrap_or_else(|| config.root.join(".tmp"));
        let workers = config.workers.max(1);

        let inner = Arc::new(Inner {
            config,
            temp_dir,
            active_files: Mutex::new(HashMap::new()),
        });

        // Capacity pool+1: submitters block once every worker is busy and
        // one job is already waiting.
        let (tx, rx) = bounded::<FlushJob>(workers + 1);
        let handles = (0..workers)
            .map(|i| {
                let inner = Arc::clone(&inner);
                let rx = rx.clone();
                thread::Builder::new()
                    .name(format!("archive-worker-{i}"))
                    .spawn(move || worker_loop(inner, rx))
                    .expect("spawn archive worker")
            })
            .collect();

        Ok(Self {
            inner,
            tx: Some(tx),
            workers: handles,
        })
    }

    /// The configuration this backend was built with.
    pub fn config(&self) -> &ArchiveConfig {
        &self.inner.config
    }
}

impl Archive for AsciiArchive {
    fn flush(&self, job: FlushJob) -> Result<()> {
        let Some(tx) = self.tx.as_ref() else {
            job.restore();
            return Err(crate::error::ArchiveError::Shutdown);
        };
        match tx.send(job) {
            Ok(()) => Ok(()),
            Err(send_err) => {
                send_err.0.restore();
                Err(crate::error::ArchiveError::Shutdown)
            }
        }
    }

    fn extract(&self, point: &PointId, range: TimeRange) -> Result<Vec<Reading>> {
        let dir = layout::point_dir(&self.inner.config.root, point);
        let files = layout::files_covering(&dir, range)?;

        let mut res = Vec::new();
        for name in &files {
            if let Err(err) = self.inner.load_file(&mut res, &dir.join(name), Some(range)) {
                warn!(point = %point, file = %name, error = %err,
                    "Skipping unreadable archive file");
            }
            if res.len() >= self.inner.config.max_records {
                warn!(point = %point, cap = self.inner.config.max_records,
                    "Truncating archive query at the record cap");
                break;
            }
        }
        Ok(res)
    }

    fn preceding(&self, point: &PointId, ts: Timestamp) -> Result<Option<Reading>> {
        let dir = layout::point_dir(&self.inner.config.root, point);
        let mut files = layout::files_covering(&dir, TimeRange::new(ts, ts))?;
        if files.is_empty() {
            return Ok(None);
        }
        // Widen by one file so a record just before the first file's start
        // is not missed.
        if let Some(prev) = layout::file_before(&dir, &files[0])? {
            files.insert(0, prev);
        }

        let buf = self.inner.load_all(&dir, &files, point);
        for pair in buf.windows(2) {
            if pair[0].timestamp <= ts && pair[1].timestamp > ts {
                return Ok(Some(pair[0].clone()));
            }
        }
        // No bracketing pair: the request is at or past the newest data.
        Ok(buf.last().filter(|r| r.timestamp <= ts).cloned())
    }

    fn following(&self, point: &PointId, ts: Timestamp) -> Result<Option<Reading>> {
        let dir = layout::point_dir(&self.inner.config.root, point);
        let mut files = layout::files_covering(&dir, TimeRange::new(ts, ts))?;
        if files.is_empty() {
            return Ok(None);
        }
        if let Some(next) = layout::file_after(&dir, files.last().expect("non-empty"))? {
            files.push(next);
        }

        let buf = self.inner.load_all(&dir, &files, point);
        for pair in buf.windows(2) {
            if pair[0].timestamp < ts && pair[1].timestamp >= ts {
                return Ok(Some(pair[1].clone()));
            }
        }
        // No bracketing pair: the oldest loaded record may itself follow ts.
        Ok(buf.first().filter(|r| r.timestamp >= ts).cloned())
    }

    fn purge_old_data(&self, def: &PointDef) -> Result<()> {
        let Some(days) = def.retention_days else {
            return Ok(());
        };
        let dir = layout::point_dir(&self.inner.config.root, &def.id);
        let horizon = now() - days as i64 * MICROS_PER_DAY;
        let files = layout::files_covering(&dir, TimeRange::new(0, horizon))?;

        // The last covering file may still hold unexpired tail data, and the
        // newest file in a directory is never deleted.
        if files.len() > 1 {
            for name in &files[..files.len() - 1] {
                match fs::remove_file(dir.join(name)) {
                    Ok(()) => debug!(point = %def.id, file = %name, "Purged expired archive file"),
                    Err(err) => warn!(point = %def.id, file = %name, error = %err,
                        "Could not delete expired archive file"),
                }
            }
        }
        Ok(())
    }
}

impl Drop for AsciiArchive {
    fn drop(&mut self) {
        // Closing the channel lets the workers drain remaining jobs and exit.
        self.tx.take();
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Archive worker panicked");
            }
        }
    }
}

fn worker_loop(inner: Arc<Inner>, rx: Receiver<FlushJob>) {
    for job in rx.iter() {
        match inner.write_batch(job.point(), job.records()) {
            Ok(()) => {
                debug!(point = %job.point(), records = job.records().len(), "Flushed");
            }
            Err(err) => {
                error!(point = %job.point(), error = %err,
                    "Flush failed; readings stay pending");
                job.restore();
            }
        }
    }
}

impl Inner {
    /// Appends the batch to the point's active file, rotating first when the
    /// file has aged out or grown past the size limit.
    fn write_batch(&self, point: &PointId, records: &[Reading]) -> Result<()> {
        let dir = layout::point_dir(&self.config.root, point);
        let path = self.resolve_active(point, &dir)?;
        let path = self.rotate_if_needed(path, &dir)?;

        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        let mut writer = BufWriter::new(file);
        for reading in records {
            writeln!(writer, "{}", encode_line(reading))?;
        }
        writer.flush()?;
        writer.get_ref().sync_all()?;

        self.active_files
            .lock()
            .expect("file cache lock poisoned")
            .insert(point.clone(), path);
        Ok(())
    }

    /// Finds the file currently being appended to for the point: the cached
    /// path if it still exists, otherwise the most recent uncompressed file
    /// in the directory, otherwise a brand-new empty file.
    fn resolve_active(&self, point: &PointId, dir: &Path) -> Result<PathBuf> {
        let cached = self
            .active_files
            .lock()
            .expect("file cache lock poisoned")
            .get(point)
            .cloned();
        if let Some(path) = cached {
            if path.is_file() {
                return Ok(path);
            }
            debug!(point = %point, file = %path.display(), "Active archive file disappeared");
        }

        fs::create_dir_all(dir)?;
        let files = layout::list_files(dir)?;
        match files.last() {
            Some((_, name)) if !layout::is_compressed(name) => Ok(dir.join(name)),
            _ => self.create_active(dir),
        }
    }

    fn create_active(&self, dir: &Path) -> Result<PathBuf> {
        let path = dir.join(layout::file_name_for(now()));
        OpenOptions::new().create(true).append(true).open(&path)?;
        debug!(file = %path.display(), "Created archive file");
        Ok(path)
    }

    fn rotate_if_needed(&self, path: PathBuf, dir: &Path) -> Result<PathBuf> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default()
            .to_string();
        let started = layout::file_time(&name)?;
        let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
        let age_limit = now() - self.config.max_file_age.as_micros() as i64;

        if started >= age_limit && size <= self.config.max_file_size {
            return Ok(path);
        }

        // The active file is now archival: compress it in place and delete
        // the plain copy. If the plain copy cannot be deleted, delete the
        // compressed one instead so the data is never duplicated.
        compress_file(&path)?;
        if let Err(err) = fs::remove_file(&path) {
            warn!(file = %path.display(), error = %err,
                "Cannot delete uncompressed file, removing compressed copy");
            let _ = fs::remove_file(compressed_path(&path));
        }
        self.create_active(dir)
    }

    /// Loads candidate files in order into one buffer, containing per-file
    /// errors so a single unreadable file never loses the rest.
    fn load_all(&self, dir: &Path, files: &[String], point: &PointId) -> Vec<Reading> {
        let mut buf = Vec::new();
        for name in files {
            if let Err(err) = self.load_file(&mut buf, &dir.join(name), None) {
                warn!(point = %point, file = %name, error = %err,
                    "Skipping unreadable archive file");
            }
        }
        buf
    }

    /// Decodes one archive file into `res`, decompressing to a scratch copy
    /// when needed. Records before `range.start` are skipped; reading stops
    /// past `range.end` or at the record cap. Undecodable lines are skipped.
    fn load_file(
        &self,
        res: &mut Vec<Reading>,
        path: &Path,
        range: Option<TimeRange>,
    ) -> Result<()> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or_default();

        let mut scratch = None;
        let reader: Box<dyn BufRead> = if layout::is_compressed(name) {
            let tmp = self.decompress_to_scratch(path)?;
            let file = tmp.reopen()?;
            // Hold the scratch file so it is deleted only after the read.
            scratch = Some(tmp);
            Box::new(BufReader::new(file))
        } else {
            Box::new(BufReader::new(File::open(path)?))
        };

        for line in reader.lines() {
            let line = line?;
            if line.is_empty() {
                continue;
            }
            match decode_line(&line) {
                Ok(reading) => {
                    if let Some(range) = range {
                        if reading.timestamp < range.start {
                            continue;
                        }
                        if reading.timestamp > range.end {
                            break;
                        }
                    }
                    if res.len() >= self.config.max_records {
                        break;
                    }
                    res.push(reading);
                }
                Err(err) => {
                    debug!(file = %path.display(), error = %err, "Skipping bad record line");
                }
            }
        }

        drop(scratch);
        Ok(())
    }

    fn decompress_to_scratch(&self, path: &Path) -> Result<NamedTempFile> {
        fs::create_dir_all(&self.temp_dir)?;
        let mut tmp = NamedTempFile::new_in(&self.temp_dir)?;
        let mut decoder = GzDecoder::new(BufReader::new(File::open(path)?));
        io::copy(&mut decoder, &mut tmp)?;
        tmp.as_file_mut().rewind()?;
        Ok(tmp)
    }
}

fn compressed_path(path: &Path) -> PathBuf {
    let mut name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    name.push_str(layout::COMPRESSED_SUFFIX);
    path.with_file_name(name)
}

/// Compresses the file in place; the compressed copy sits next to the
/// original with the compression suffix appended and records the original
/// file name in its header.
fn compress_file(path: &Path) -> Result<()> {
    let name = path
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string();
    let mut source = BufReader::new(File::open(path)?);
    let target = File::create(compressed_path(path))?;
    let mut encoder = GzBuilder::new()
        .filename(name)
        .write(BufWriter::new(target), Compression::default());
    io::copy(&mut source, &mut encoder)?;
    encoder.finish()?.into_inner().map_err(|e| e.into_error())?;
    Ok(())
}
