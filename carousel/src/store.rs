//! The RRD coordinator.
//!
//! [`Store`] is the only component that knows the full schema. It owns one
//! storage handle behind the [`Storage`](crate::storage::Storage) trait,
//! routes every write to every archive with per-column aggregation, selects
//! one archive per range read, and exposes the convenience operations
//! (`last`, `info`, name/index resolution).
//!
//! The schema is read-only after open; schema changes go through
//! [`crate::reshape`], which rewrites the file.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use parking_lot::RwLock;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::schema::{validate_schema, AggFunc, Archive, Column};
use crate::storage::{BinaryFileStorage, Storage};
use crate::value::{Row, Value};

/// An open round-robin database.
pub struct Store {
    path: PathBuf,
    readonly: bool,
    columns: Vec<Column>,
    archives: Vec<Archive>,
    storage: Box<dyn Storage>,
    // Layered above the storage lock: writers must see a settled view of all
    // archives, not just one slot.
    gate: RwLock<()>,
}

/// Schema and usage statistics for an open database.
#[derive(Debug, Clone)]
pub struct FileInfo {
    /// Path of the database file.
    pub path: PathBuf,
    /// Column definitions.
    pub columns: Vec<Column>,
    /// Per-archive statistics.
    pub archives: Vec<ArchiveInfo>,
}

/// Statistics for one archive.
#[derive(Debug, Clone)]
pub struct ArchiveInfo {
    /// Archive name.
    pub name: String,
    /// Configured ring size.
    pub rows: i32,
    /// Sampling step in seconds.
    pub step: i64,
    /// Number of non-empty rows.
    pub used_rows: usize,
    /// Smallest stored timestamp, -1 when empty.
    pub min_ts: i64,
    /// Largest stored timestamp, -1 when empty.
    pub max_ts: i64,
    /// Number of valid cells across all rows.
    pub valid_cells: u64,
    /// Lower bound of the retention window, -1 when empty.
    pub retention_floor: i64,
}

impl Store {
    /// Creates a new database file with the given schema.
    ///
    /// # Errors
    ///
    /// Fails on an invalid schema (empty, duplicate or over-long names,
    /// non-positive step or rows, inverted bounds), if the file already
    /// exists, or if the lock cannot be acquired.
    pub fn create<P: AsRef<Path>>(path: P, columns: Vec<Column>, archives: Vec<Archive>) -> Result<Self> {
        validate_schema(&columns, &archives)?;
        let storage = BinaryFileStorage::create(&path, &columns, &archives)?;
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            readonly: false,
            columns,
            archives,
            storage: Box::new(storage),
            gate: RwLock::new(()),
        })
    }

    /// Opens an existing database file.
    pub fn open<P: AsRef<Path>>(path: P, readonly: bool) -> Result<Self> {
        let storage = BinaryFileStorage::open(&path, readonly)?;
        let columns = storage.columns().to_vec();
        let archives = storage.archives();
        Ok(Self {
            path: path.as_ref().to_path_buf(),
            readonly,
            columns,
            archives,
            storage: Box::new(storage),
            gate: RwLock::new(()),
        })
    }

    /// Builds a store over an arbitrary storage backend.
    ///
    /// This is the seam used to run the coordinator against
    /// [`MemoryStorage`](crate::storage::MemoryStorage) in tests.
    pub fn with_storage(
        columns: Vec<Column>,
        archives: Vec<Archive>,
        storage: Box<dyn Storage>,
    ) -> Result<Self> {
        validate_schema(&columns, &archives)?;
        Ok(Self {
            path: PathBuf::new(),
            readonly: false,
            columns,
            archives,
            storage,
            gate: RwLock::new(()),
        })
    }

    /// Flushes and closes the database.
    pub fn close(self) -> Result<()> {
        debug!(path = %self.path.display(), "closing database");
        self.storage.close()
    }

    /// Flushes dirty state to disk.
    pub fn flush(&self) -> Result<()> {
        let _g = self.gate.write();
        self.storage.flush()
    }

    /// Column definitions.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Archive definitions, finest first.
    pub fn archives(&self) -> &[Archive] {
        &self.archives
    }

    /// Path of the database file (empty for non-file backends).
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether the handle was opened read-only.
    pub fn readonly(&self) -> bool {
        self.readonly
    }

    /// Stores a single sample into one column.
    pub fn put(&self, ts: i64, column: usize, value: f32) -> Result<()> {
        self.put_values(&[Value::new(ts, column, value)])
    }

    /// Stores a set of samples sharing one timestamp.
    ///
    /// Samples outside their column's `[minimum, maximum]` are logged and
    /// dropped. The remaining samples update every archive in declaration
    /// order: the timestamp is quantized to the archive's step, the previous
    /// cells at that slot are fetched, and each column's aggregation
    /// function merges old and new before the slot is written back. A stale
    /// write aborts the remaining archive updates.
    pub fn put_values(&self, samples: &[Value]) -> Result<()> {
        let _g = self.gate.write();
        if self.readonly {
            return Err(Error::ReadOnly);
        }

        let mut filtered: Vec<&Value> = Vec::with_capacity(samples.len());
        for sample in samples {
            let col = self
                .columns
                .get(sample.column)
                .ok_or_else(|| Error::UnknownColumn(sample.column.to_string()))?;
            if !col.accepts(sample.value) {
                warn!(
                    column = %col.name,
                    value = sample.value,
                    "sample outside column bounds, dropping"
                );
                continue;
            }
            filtered.push(sample);
        }

        if filtered.is_empty() {
            debug!("no samples left to store");
            return Ok(());
        }

        let cols: Vec<usize> = filtered.iter().map(|v| v.column).collect();

        for (aid, archive) in self.archives.iter().enumerate() {
            let ts = archive.quantize(filtered[0].ts);
            debug!(archive = %archive.name, ts, "updating archive");

            let previous = self.storage.get(aid, ts, &cols)?;
            let merged: Vec<Value> = match previous {
                Some(previous) => filtered
                    .iter()
                    .zip(previous.iter())
                    .map(|(sample, prev)| {
                        let function = self.columns[sample.column].function;
                        let mut v = function.apply(prev, sample);
                        v.ts = ts;
                        v
                    })
                    .collect(),
                None => filtered
                    .iter()
                    .map(|sample| {
                        let mut v = (*sample).clone();
                        v.ts = ts;
                        v.counter = 1;
                        v.valid = true;
                        if self.columns[v.column].function == AggFunc::Count {
                            v.value = 1.0;
                        }
                        v
                    })
                    .collect(),
            };

            self.storage.put(aid, ts, &merged)?;
        }
        Ok(())
    }

    /// Reads the slot for `ts`, walking archives finest-first.
    ///
    /// An empty `columns` slice projects all columns. Returns `None` when no
    /// archive holds the quantized timestamp.
    pub fn get(&self, ts: i64, columns: &[usize]) -> Result<Option<Row>> {
        let _g = self.gate.read();
        let columns = self.effective_columns(columns)?;

        for (aid, archive) in self.archives.iter().enumerate() {
            let quantized = archive.quantize(ts);
            if let Some(values) = self.storage.get(aid, quantized, &columns)? {
                debug!(archive = %archive.name, ts = quantized, "slot found");
                return Ok(Some(Row {
                    ts: quantized,
                    values,
                }));
            }
        }
        Ok(None)
    }

    /// Largest timestamp stored in the finest archive, -1 when empty.
    pub fn last(&self) -> Result<i64> {
        let _g = self.gate.read();
        self.last_locked()
    }

    /// Reads all rows in `[lo, hi]` from the best-fitting archive.
    ///
    /// `hi < 0` means unbounded. The archive chosen is the finest one whose
    /// retention window still covers `lo`, relative to the latest stored
    /// timestamp (or the wall clock when `real_time` is set); if none
    /// qualifies the coarsest archive serves the request. Rows come back in
    /// logical time order even when the ring has wrapped. With
    /// `include_invalid`, gaps in the range are filled with all-invalid rows
    /// at the archive's step.
    pub fn get_range(
        &self,
        lo: i64,
        hi: i64,
        columns: &[usize],
        include_invalid: bool,
        real_time: bool,
    ) -> Result<Vec<Row>> {
        let _g = self.gate.read();
        let columns = self.effective_columns(columns)?;

        if hi >= 0 && lo > hi {
            return Ok(Vec::new());
        }

        let last = if real_time {
            wall_clock()
        } else {
            self.last_locked()?
        };

        let (aid, begin, end) = self.select_archive(lo, hi, last);
        debug!(archive = aid, begin, end, last, "range query");

        let mut it = self.storage.iterate(aid, begin, end, &columns)?;
        let mut rows = Vec::new();
        while let Some(row) = it.next_row()? {
            rows.push(row);
        }
        let mut rows = reorder_wrapped(rows);

        if include_invalid {
            let fill_end = if end < 0 { last } else { end };
            rows = fill_gaps(begin, fill_end, self.archives[aid].step, rows, &columns);
        }
        Ok(rows)
    }

    /// Reports schema plus per-archive usage statistics.
    pub fn info(&self) -> Result<FileInfo> {
        let _g = self.gate.read();
        let all: Vec<usize> = (0..self.columns.len()).collect();

        let mut archives = Vec::with_capacity(self.archives.len());
        for (aid, archive) in self.archives.iter().enumerate() {
            let mut info = ArchiveInfo {
                name: archive.name.clone(),
                rows: archive.rows,
                step: archive.step,
                used_rows: 0,
                min_ts: -1,
                max_ts: -1,
                valid_cells: 0,
                retention_floor: -1,
            };

            let mut it = self.storage.iterate(aid, 0, -1, &all)?;
            while let Some(row) = it.next_row()? {
                info.used_rows += 1;
                if info.min_ts == -1 || row.ts < info.min_ts {
                    info.min_ts = row.ts;
                }
                if row.ts > info.max_ts {
                    info.max_ts = row.ts;
                }
                info.valid_cells += row.values.iter().filter(|v| v.valid).count() as u64;
            }
            if info.used_rows > 0 {
                info.retention_floor = archive.retention_floor(info.max_ts);
            }
            archives.push(info);
        }

        Ok(FileInfo {
            path: self.path.clone(),
            columns: self.columns.clone(),
            archives,
        })
    }

    /// Resolves a column given its decimal index or name.
    pub fn resolve_column(&self, name: &str) -> Result<usize> {
        let name = name.trim();
        if let Ok(idx) = name.parse::<usize>() {
            if idx < self.columns.len() {
                return Ok(idx);
            }
            return Err(Error::UnknownColumn(name.to_string()));
        }
        self.columns
            .iter()
            .position(|c| c.name == name)
            .ok_or_else(|| Error::UnknownColumn(name.to_string()))
    }

    /// Resolves a list of column indices or names.
    pub fn resolve_columns(&self, names: &[String]) -> Result<Vec<usize>> {
        names.iter().map(|n| self.resolve_column(n)).collect()
    }

    /// Resolves an archive given its decimal index or name.
    pub fn resolve_archive(&self, name: &str) -> Result<usize> {
        let name = name.trim();
        if let Ok(idx) = name.parse::<usize>() {
            if idx < self.archives.len() {
                return Ok(idx);
            }
            return Err(Error::UnknownArchive(name.to_string()));
        }
        self.archives
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| Error::UnknownArchive(name.to_string()))
    }

    /// Direct slot write, bypassing aggregation. Used by dump loading and
    /// the schema-rewrite copy loop.
    pub(crate) fn raw_put(&self, archive: usize, ts: i64, values: &[Value]) -> Result<()> {
        self.storage.put(archive, ts, values)
    }

    /// Direct row iteration for dump and schema rewrites.
    pub(crate) fn raw_iterate(
        &self,
        archive: usize,
        columns: &[usize],
    ) -> Result<Box<dyn crate::storage::RowsIterator + '_>> {
        self.storage.iterate(archive, 0, -1, columns)
    }

    pub(crate) fn all_column_ids(&self) -> Vec<usize> {
        (0..self.columns.len()).collect()
    }

    fn effective_columns(&self, columns: &[usize]) -> Result<Vec<usize>> {
        if columns.is_empty() {
            return Ok(self.all_column_ids());
        }
        for &c in columns {
            if c >= self.columns.len() {
                return Err(Error::UnknownColumn(c.to_string()));
            }
        }
        Ok(columns.to_vec())
    }

    /// Scans the finest archive for its largest timestamp. The physical
    /// order is a monotonic run up to the wrap boundary, so the scan stops
    /// at the first decrease; everything beyond is older.
    fn last_locked(&self) -> Result<i64> {
        let mut last = -1i64;
        let mut it = self.storage.iterate(0, 0, -1, &[])?;
        while let Some(row) = it.next_row()? {
            if row.ts > last {
                last = row.ts;
            } else {
                break;
            }
        }
        Ok(last)
    }

    /// Picks the finest archive whose retention still covers `lo`; falls
    /// back to the coarsest. Returns the archive index and the quantized
    /// iteration bounds.
    fn select_archive(&self, lo: i64, hi: i64, last: i64) -> (usize, i64, i64) {
        for (aid, archive) in self.archives.iter().enumerate() {
            if lo >= archive.retention_floor(last) {
                return (aid, archive.quantize(lo), hi);
            }
        }
        let aid = self.archives.len() - 1;
        (aid, self.archives[aid].quantize(lo), hi)
    }
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("readonly", &self.readonly)
            .field("columns", &self.columns)
            .field("archives", &self.archives)
            .finish_non_exhaustive()
    }
}

/// Restores logical time order for rows read in physical ring order.
///
/// A wrapped ring reads as two monotonic runs: the newest rows first, then
/// the older remainder after the wrap boundary. Everything from the first
/// descending transition onward logically precedes the head run.
pub(crate) fn reorder_wrapped(rows: Vec<Row>) -> Vec<Row> {
    let wrap = rows.windows(2).position(|w| w[1].ts < w[0].ts);
    match wrap {
        Some(i) => {
            let mut out = Vec::with_capacity(rows.len());
            out.extend_from_slice(&rows[i + 1..]);
            out.extend_from_slice(&rows[..=i]);
            out
        }
        None => rows,
    }
}

/// Fills gaps in `[begin, end]` at `step` with all-invalid rows.
fn fill_gaps(begin: i64, end: i64, step: i64, rows: Vec<Row>, columns: &[usize]) -> Vec<Row> {
    let empty_values: Vec<Value> = columns.iter().map(|&c| Value::empty(-1, c)).collect();

    let mut out = Vec::new();
    let mut next = 0usize;
    let mut ts = begin;
    while ts <= end {
        if next < rows.len() && rows[next].ts == ts {
            out.push(rows[next].clone());
            next += 1;
        } else {
            let mut values = empty_values.clone();
            for v in &mut values {
                v.ts = ts;
            }
            out.push(Row { ts, values });
        }
        ts += step;
    }
    out
}

fn wall_clock() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
