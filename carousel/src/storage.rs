//! Binary file storage for the carousel round-robin database.
//!
//! This module owns the on-disk layout and exposes slot-level primitives; it
//! never interprets aggregation semantics. The coordinator talks to it
//! through the [`Storage`] trait so the file backend can be swapped for
//! [`MemoryStorage`] in tests.
//!
//! # File Format
//!
//! All integers and floats are little-endian.
//!
//! ```text
//! [0..16)    Header: version i32, columns i16, archives i16, magic i64
//! [16..)     Column table: 20 bytes per column in v1
//!            (name[16], function i32), 32 bytes in v2
//!            (v1 fields + flags i32 + minimum f32 + maximum f32)
//! [..]       Archive table: 44 bytes per archive
//!            (name[16], step i64, rows i32, byte size i64, file offset i64)
//! [..]       Archive blocks, concatenated in declaration order; each block
//!            is rows × row_size bytes, a row being ts i64 + one 16-byte
//!            cell per column. Empty rows carry ts = -1 and zeroed cells.
//! ```
//!
//! # Concurrency
//!
//! A single writer per file is enforced by an advisory lock on the
//! `<path>.lock` sibling. Within the process all methods serialize under one
//! reader/writer lock; readers may run concurrently, writers exclude
//! everything. Cross-cell atomicity is not guaranteed; readers tolerate a
//! racing put because every cell carries its own valid flag.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use fs2::FileExt as _;
use parking_lot::RwLock;
use tracing::debug;

use crate::error::{Error, Result, SchemaError, StoreError};
use crate::schema::{Archive, Column, MAX_NAME_LEN};
use crate::value::{Row, Value, CELL_SIZE, EMPTY_TS};

/// Current file format version.
pub const FILE_VERSION: i32 = 2;

/// Magic number identifying a carousel database file.
pub const FILE_MAGIC: i64 = 1_038_472_294_759_683_202;

/// Size of the file header in bytes.
pub const HEADER_SIZE: u64 = 4 + 2 + 2 + 8;

/// Size of a version-1 column record in bytes.
pub const COLUMN_RECORD_V1: u64 = 16 + 4;

/// Size of a version-2 column record in bytes.
pub const COLUMN_RECORD_V2: u64 = 16 + 4 + 4 + 4 + 4;

/// Size of an archive record in bytes.
pub const ARCHIVE_RECORD: u64 = 16 + 8 + 4 + 8 + 8;

/// Slot-level storage capabilities the coordinator depends on.
///
/// Construction (`create`/`open`) stays on the concrete types since it
/// returns `Self`; everything after open goes through this trait.
pub trait Storage: Send + Sync {
    /// Writes `values` into the slot addressed by `ts`.
    ///
    /// If the slot holds the same timestamp, only the named cells are
    /// overwritten. If it holds an older timestamp (or is empty), the whole
    /// row is reset to the new timestamp first. If it holds a newer
    /// timestamp the write fails with [`Error::StaleWrite`] and the slot is
    /// left untouched.
    fn put(&self, archive: usize, ts: i64, values: &[Value]) -> Result<()>;

    /// Reads the requested column cells from the slot addressed by `ts`.
    ///
    /// Returns `None` when the slot is empty or holds a different timestamp.
    fn get(&self, archive: usize, ts: i64, columns: &[usize]) -> Result<Option<Vec<Value>>>;

    /// Returns a forward iterator over the archive's rows in physical order.
    ///
    /// Rows with a timestamp below `begin` are skipped; a timestamp above
    /// `end` (when `end >= 0`) terminates the iteration. Rows are not
    /// reordered.
    fn iterate<'a>(
        &'a self,
        archive: usize,
        begin: i64,
        end: i64,
        columns: &[usize],
    ) -> Result<Box<dyn RowsIterator + 'a>>;

    /// Flushes buffered state to the backing medium.
    fn flush(&self) -> Result<()>;

    /// Flushes (when writable) and releases the backing resources.
    fn close(self: Box<Self>) -> Result<()>;
}

/// Forward row iterator; restartable only by constructing a new one.
pub trait RowsIterator {
    /// Returns the next row, or `None` at end of stream.
    fn next_row(&mut self) -> Result<Option<Row>>;
}

/// One archive's placement within the file.
#[derive(Debug, Clone)]
struct ArchiveBlock {
    archive: Archive,
    offset: u64,
    size: u64,
}

impl ArchiveBlock {
    /// Byte offset of the slot addressed by `ts`.
    ///
    /// Slot index is `(ts / step) mod rows`; `rem_euclid` keeps the index
    /// non-negative for pre-epoch timestamps.
    fn row_offset(&self, ts: i64, row_size: u64) -> u64 {
        let slot = (ts / self.archive.step).rem_euclid(i64::from(self.archive.rows));
        self.offset + row_size * slot as u64
    }
}

/// Seek-addressed binary file backend.
#[derive(Debug)]
pub struct BinaryFileStorage {
    path: PathBuf,
    file: RwLock<File>,
    lock: File,
    lock_path: PathBuf,
    readonly: bool,
    version: i32,
    columns: Vec<Column>,
    archives: Vec<ArchiveBlock>,
    row_size: u64,
}

impl BinaryFileStorage {
    /// Creates a new database file with the given schema.
    ///
    /// The advisory lock is acquired before the file is created, so a held
    /// lock cannot leave a partial file behind. Fails if the file already
    /// exists. The archive region is written out in full (empty rows) and
    /// synced before returning.
    pub fn create<P: AsRef<Path>>(path: P, columns: &[Column], archives: &[Archive]) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_path = lock_path_for(&path);
        let lock = acquire_lock(&lock_path)?;
        debug!(path = %path.display(), "creating database file");

        match Self::create_locked(&path, columns, archives) {
            Ok((file, blocks, row_size)) => Ok(Self {
                path,
                file: RwLock::new(file),
                lock,
                lock_path,
                readonly: false,
                version: FILE_VERSION,
                columns: columns.to_vec(),
                archives: blocks,
                row_size,
            }),
            Err(e) => {
                drop(lock);
                let _ = fs::remove_file(&lock_path);
                Err(e)
            }
        }
    }

    /// Opens an existing database file and reads its schema tables.
    ///
    /// Versions up to [`FILE_VERSION`] are accepted; version-1 files surface
    /// their columns without bounds. The `readonly` flag is process-internal:
    /// the advisory lock is exclusive either way.
    pub fn open<P: AsRef<Path>>(path: P, readonly: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let lock_path = lock_path_for(&path);
        let lock = acquire_lock(&lock_path)?;
        debug!(path = %path.display(), readonly, "opening database file");

        match Self::open_locked(&path, readonly) {
            Ok((file, version, columns, archives, row_size)) => Ok(Self {
                path,
                file: RwLock::new(file),
                lock,
                lock_path,
                readonly,
                version,
                columns,
                archives,
                row_size,
            }),
            Err(e) => {
                drop(lock);
                let _ = fs::remove_file(&lock_path);
                Err(e)
            }
        }
    }

    /// Columns read from (or written to) the file's column table.
    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    /// Archive definitions read from the file's archive table.
    pub fn archives(&self) -> Vec<Archive> {
        self.archives.iter().map(|b| b.archive.clone()).collect()
    }

    /// Format version of the open file.
    pub fn version(&self) -> i32 {
        self.version
    }

    /// Path of the open file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn create_locked(
        path: &Path,
        columns: &[Column],
        archives: &[Archive],
    ) -> Result<(File, Vec<ArchiveBlock>, u64)> {
        let file = match OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(path)
        {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                return Err(StoreError::AlreadyExists {
                    path: path.to_path_buf(),
                }
                .into());
            }
            Err(e) => return Err(e.into()),
        };

        let row_size = row_size_for(columns.len());
        let tables_len = HEADER_SIZE
            + COLUMN_RECORD_V2 * columns.len() as u64
            + ARCHIVE_RECORD * archives.len() as u64;
        let blocks = layout_archives(archives, row_size, tables_len);

        let mut w = BufWriter::new(&file);
        write_header(&mut w, FILE_VERSION, columns.len() as i16, archives.len() as i16)?;
        for col in columns {
            write_column(&mut w, col)?;
        }
        for block in &blocks {
            write_archive_record(&mut w, block)?;
        }

        let mut empty = vec![0u8; row_size as usize];
        empty[0..8].copy_from_slice(&EMPTY_TS.to_le_bytes());
        for block in &blocks {
            for _ in 0..block.archive.rows {
                w.write_all(&empty)?;
            }
        }
        w.flush()?;
        drop(w);
        file.sync_all()?;

        Ok((file, blocks, row_size))
    }

    #[allow(clippy::type_complexity)]
    fn open_locked(
        path: &Path,
        readonly: bool,
    ) -> Result<(File, i32, Vec<Column>, Vec<ArchiveBlock>, u64)> {
        let file = OpenOptions::new().read(true).write(!readonly).open(path)?;

        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact_at(&mut header, 0)
            .map_err(|_| truncated(path, "file shorter than header"))?;

        let version = i32::from_le_bytes(header[0..4].try_into().unwrap());
        let columns_count = i16::from_le_bytes(header[4..6].try_into().unwrap());
        let archives_count = i16::from_le_bytes(header[6..8].try_into().unwrap());
        let magic = i64::from_le_bytes(header[8..16].try_into().unwrap());

        if magic != FILE_MAGIC {
            return Err(StoreError::BadMagic { found: magic }.into());
        }
        if !(1..=FILE_VERSION).contains(&version) {
            return Err(StoreError::UnsupportedVersion {
                found: version,
                newest: FILE_VERSION,
            }
            .into());
        }
        if columns_count < 1 || archives_count < 1 {
            return Err(truncated(path, "empty column or archive table"));
        }

        let record = if version == 1 {
            COLUMN_RECORD_V1
        } else {
            COLUMN_RECORD_V2
        };

        let mut columns = Vec::with_capacity(columns_count as usize);
        for i in 0..columns_count as u64 {
            let mut buf = vec![0u8; record as usize];
            file.read_exact_at(&mut buf, HEADER_SIZE + record * i)
                .map_err(|_| truncated(path, "column table"))?;

            let name = read_name(&buf[0..MAX_NAME_LEN]);
            let func_id = i32::from_le_bytes(buf[16..20].try_into().unwrap());
            let function = crate::schema::AggFunc::from_id(func_id)
                .ok_or(SchemaError::UnknownFunction(func_id.to_string()))?;

            let (minimum, maximum) = if version >= 2 {
                let flags = i32::from_le_bytes(buf[20..24].try_into().unwrap());
                let min = f32::from_le_bytes(buf[24..28].try_into().unwrap());
                let max = f32::from_le_bytes(buf[28..32].try_into().unwrap());
                ((flags & 1 != 0).then_some(min), (flags & 2 != 0).then_some(max))
            } else {
                (None, None)
            };

            columns.push(Column {
                name,
                function,
                minimum,
                maximum,
            });
        }

        let row_size = row_size_for(columns.len());
        let archives_base = HEADER_SIZE + record * columns_count as u64;
        let mut archives = Vec::with_capacity(archives_count as usize);
        for i in 0..archives_count as u64 {
            let mut buf = [0u8; ARCHIVE_RECORD as usize];
            file.read_exact_at(&mut buf, archives_base + ARCHIVE_RECORD * i)
                .map_err(|_| truncated(path, "archive table"))?;

            let name = read_name(&buf[0..MAX_NAME_LEN]);
            let step = i64::from_le_bytes(buf[16..24].try_into().unwrap());
            let rows = i32::from_le_bytes(buf[24..28].try_into().unwrap());
            let size = i64::from_le_bytes(buf[28..36].try_into().unwrap());
            let offset = i64::from_le_bytes(buf[36..44].try_into().unwrap());
            if step <= 0 || rows <= 0 || size < 0 || offset < 0 {
                return Err(truncated(path, "nonsensical archive record"));
            }

            archives.push(ArchiveBlock {
                archive: Archive { name, step, rows },
                offset: offset as u64,
                size: size as u64,
            });
        }

        Ok((file, version, columns, archives, row_size))
    }
}

impl Storage for BinaryFileStorage {
    fn put(&self, archive: usize, ts: i64, values: &[Value]) -> Result<()> {
        if self.readonly {
            return Err(Error::ReadOnly);
        }
        let file = self.file.write();
        let block = &self.archives[archive];
        let row_offset = block.row_offset(ts, self.row_size);

        // Invalidate the row when its timestamp changes.
        let stored = read_i64_at(&file, row_offset)?;
        if stored != ts {
            if stored > ts {
                return Err(Error::StaleWrite {
                    stored,
                    incoming: ts,
                });
            }
            let mut row = vec![0u8; self.row_size as usize];
            row[0..8].copy_from_slice(&ts.to_le_bytes());
            file.write_all_at(&row, row_offset)?;
        }

        let mut cell = [0u8; CELL_SIZE];
        for v in values {
            v.encode(&mut cell);
            file.write_all_at(&cell, row_offset + 8 + (CELL_SIZE * v.column) as u64)?;
        }
        Ok(())
    }

    fn get(&self, archive: usize, ts: i64, columns: &[usize]) -> Result<Option<Vec<Value>>> {
        let file = self.file.read();
        let block = &self.archives[archive];
        let row_offset = block.row_offset(ts, self.row_size);

        let stored = read_i64_at(&file, row_offset)?;
        if stored != ts {
            return Ok(None);
        }

        let mut values = Vec::with_capacity(columns.len());
        let mut cell = [0u8; CELL_SIZE];
        for &col in columns {
            file.read_exact_at(&mut cell, row_offset + 8 + (CELL_SIZE * col) as u64)?;
            values.push(Value::decode(stored, col, &cell));
        }
        Ok(Some(values))
    }

    fn iterate<'a>(
        &'a self,
        archive: usize,
        begin: i64,
        end: i64,
        columns: &[usize],
    ) -> Result<Box<dyn RowsIterator + 'a>> {
        Ok(Box::new(FileRows {
            storage: self,
            archive,
            columns: columns.to_vec(),
            begin,
            end,
            next_slot: 0,
        }))
    }

    fn flush(&self) -> Result<()> {
        self.file.read().sync_all()?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        if !self.readonly {
            self.file.read().sync_all()?;
        }
        Ok(())
    }
}

impl Drop for BinaryFileStorage {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.lock);
        let _ = fs::remove_file(&self.lock_path);
    }
}

/// Iterator over one archive's rows in physical slot order.
struct FileRows<'a> {
    storage: &'a BinaryFileStorage,
    archive: usize,
    columns: Vec<usize>,
    begin: i64,
    end: i64,
    next_slot: u64,
}

impl RowsIterator for FileRows<'_> {
    fn next_row(&mut self) -> Result<Option<Row>> {
        let file = self.storage.file.read();
        let block = &self.storage.archives[self.archive];
        let rows = i64::from(block.archive.rows) as u64;

        while self.next_slot < rows {
            let row_offset = block.offset + self.next_slot * self.storage.row_size;
            self.next_slot += 1;

            let ts = read_i64_at(&file, row_offset)?;
            if ts == EMPTY_TS || ts < self.begin {
                continue;
            }
            if self.end >= 0 && ts > self.end {
                self.next_slot = rows;
                return Ok(None);
            }

            let mut values = Vec::with_capacity(self.columns.len());
            let mut cell = [0u8; CELL_SIZE];
            for &col in &self.columns {
                file.read_exact_at(&mut cell, row_offset + 8 + (CELL_SIZE * col) as u64)?;
                values.push(Value::decode(ts, col, &cell));
            }
            return Ok(Some(Row { ts, values }));
        }
        Ok(None)
    }
}

/// In-memory backend with the same slot semantics as the file backend.
///
/// Used to test the coordinator without touching the filesystem.
#[derive(Debug)]
pub struct MemoryStorage {
    archives: Vec<Archive>,
    rows: RwLock<Vec<Vec<MemRow>>>,
}

#[derive(Debug, Clone)]
struct MemRow {
    ts: i64,
    cells: Vec<Value>,
}

impl MemoryStorage {
    /// Creates an empty in-memory database for the given schema.
    pub fn new(columns: &[Column], archives: &[Archive]) -> Self {
        let rows = archives
            .iter()
            .map(|a| {
                (0..a.rows)
                    .map(|_| MemRow {
                        ts: EMPTY_TS,
                        cells: (0..columns.len()).map(|c| Value::empty(EMPTY_TS, c)).collect(),
                    })
                    .collect()
            })
            .collect();
        Self {
            archives: archives.to_vec(),
            rows: RwLock::new(rows),
        }
    }

    fn slot(&self, archive: usize, ts: i64) -> usize {
        let a = &self.archives[archive];
        (ts / a.step).rem_euclid(i64::from(a.rows)) as usize
    }
}

impl Storage for MemoryStorage {
    fn put(&self, archive: usize, ts: i64, values: &[Value]) -> Result<()> {
        let slot = self.slot(archive, ts);
        let mut rows = self.rows.write();
        let row = &mut rows[archive][slot];

        if row.ts != ts {
            if row.ts > ts {
                return Err(Error::StaleWrite {
                    stored: row.ts,
                    incoming: ts,
                });
            }
            row.ts = ts;
            for (c, cell) in row.cells.iter_mut().enumerate() {
                *cell = Value::empty(ts, c);
            }
        }
        for v in values {
            let mut v = v.clone();
            v.ts = ts;
            let column = v.column;
            row.cells[column] = v;
        }
        Ok(())
    }

    fn get(&self, archive: usize, ts: i64, columns: &[usize]) -> Result<Option<Vec<Value>>> {
        let slot = self.slot(archive, ts);
        let rows = self.rows.read();
        let row = &rows[archive][slot];
        if row.ts != ts {
            return Ok(None);
        }
        Ok(Some(columns.iter().map(|&c| row.cells[c].clone()).collect()))
    }

    fn iterate<'a>(
        &'a self,
        archive: usize,
        begin: i64,
        end: i64,
        columns: &[usize],
    ) -> Result<Box<dyn RowsIterator + 'a>> {
        // Snapshot under the read lock, applying the same skip and
        // termination rules as the file iterator.
        let rows = self.rows.read();
        let mut out = Vec::new();
        for row in &rows[archive] {
            if row.ts == EMPTY_TS || row.ts < begin {
                continue;
            }
            if end >= 0 && row.ts > end {
                break;
            }
            out.push(Row {
                ts: row.ts,
                values: columns.iter().map(|&c| row.cells[c].clone()).collect(),
            });
        }
        Ok(Box::new(MemRows {
            rows: out.into_iter(),
        }))
    }

    fn flush(&self) -> Result<()> {
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

struct MemRows {
    rows: std::vec::IntoIter<Row>,
}

impl RowsIterator for MemRows {
    fn next_row(&mut self) -> Result<Option<Row>> {
        Ok(self.rows.next())
    }
}

/// Row width for a column count: 8-byte timestamp plus the cells.
///
/// Computed once at open; all seek math goes through this.
pub fn row_size_for(columns: usize) -> u64 {
    8 + (CELL_SIZE * columns) as u64
}

fn layout_archives(archives: &[Archive], row_size: u64, base_offset: u64) -> Vec<ArchiveBlock> {
    let mut offset = base_offset;
    archives
        .iter()
        .map(|a| {
            let size = i64::from(a.rows) as u64 * row_size;
            let block = ArchiveBlock {
                archive: a.clone(),
                offset,
                size,
            };
            offset += size;
            block
        })
        .collect()
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(".lock");
    PathBuf::from(os)
}

fn acquire_lock(lock_path: &Path) -> Result<File> {
    let lock = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(lock_path)?;
    lock.try_lock_exclusive().map_err(|_| StoreError::Locked {
        path: lock_path.to_path_buf(),
    })?;
    Ok(lock)
}

fn truncated(path: &Path, reason: &str) -> Error {
    StoreError::Truncated {
        path: path.to_path_buf(),
        reason: reason.to_string(),
    }
    .into()
}

fn read_i64_at(file: &File, offset: u64) -> Result<i64> {
    let mut buf = [0u8; 8];
    file.read_exact_at(&mut buf, offset)?;
    Ok(i64::from_le_bytes(buf))
}

fn read_name(buf: &[u8]) -> String {
    let len = buf.iter().rposition(|&b| b != 0).map_or(0, |i| i + 1);
    String::from_utf8_lossy(&buf[..len]).into_owned()
}

fn write_name<W: Write>(w: &mut W, name: &str) -> io::Result<()> {
    let mut buf = [0u8; MAX_NAME_LEN];
    let bytes = name.as_bytes();
    let n = bytes.len().min(MAX_NAME_LEN);
    buf[..n].copy_from_slice(&bytes[..n]);
    w.write_all(&buf)
}

fn write_header<W: Write>(w: &mut W, version: i32, columns: i16, archives: i16) -> io::Result<()> {
    w.write_all(&version.to_le_bytes())?;
    w.write_all(&columns.to_le_bytes())?;
    w.write_all(&archives.to_le_bytes())?;
    w.write_all(&FILE_MAGIC.to_le_bytes())
}

fn write_column<W: Write>(w: &mut W, col: &Column) -> io::Result<()> {
    write_name(w, &col.name)?;
    w.write_all(&col.function.id().to_le_bytes())?;

    let mut flags: i32 = 0;
    if col.minimum.is_some() {
        flags |= 1;
    }
    if col.maximum.is_some() {
        flags |= 2;
    }
    w.write_all(&flags.to_le_bytes())?;
    w.write_all(&col.minimum.unwrap_or(0.0).to_le_bytes())?;
    w.write_all(&col.maximum.unwrap_or(0.0).to_le_bytes())
}

fn write_archive_record<W: Write>(w: &mut W, block: &ArchiveBlock) -> io::Result<()> {
    write_name(w, &block.archive.name)?;
    w.write_all(&block.archive.step.to_le_bytes())?;
    w.write_all(&block.archive.rows.to_le_bytes())?;
    w.write_all(&(block.size as i64).to_le_bytes())?;
    w.write_all(&(block.offset as i64).to_le_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AggFunc;
    use tempfile::tempdir;

    fn test_columns() -> Vec<Column> {
        vec![
            Column::new("c1", AggFunc::Last),
            Column::new("c2", AggFunc::Average),
        ]
    }

    fn test_archives() -> Vec<Archive> {
        vec![Archive::new("a0", 1, 10), Archive::new("a1", 10, 5)]
    }

    #[test]
    fn test_create_open_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.rdb");

        let columns = test_columns();
        let archives = test_archives();
        let storage = BinaryFileStorage::create(&path, &columns, &archives).unwrap();
        assert_eq!(storage.version(), FILE_VERSION);
        drop(storage);

        let storage = BinaryFileStorage::open(&path, true).unwrap();
        assert_eq!(storage.columns(), columns.as_slice());
        assert_eq!(storage.archives(), archives);
    }

    #[test]
    fn test_file_size_identity() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("size.rdb");

        let mut columns = test_columns();
        columns[1].minimum = Some(0.0);
        columns[1].maximum = Some(100.0);
        let archives = test_archives();
        let storage = BinaryFileStorage::create(&path, &columns, &archives).unwrap();
        drop(storage);

        let row_size = row_size_for(columns.len());
        let expected = HEADER_SIZE
            + COLUMN_RECORD_V2 * columns.len() as u64
            + ARCHIVE_RECORD * archives.len() as u64
            + archives
                .iter()
                .map(|a| i64::from(a.rows) as u64 * row_size)
                .sum::<u64>();
        assert_eq!(fs::metadata(&path).unwrap().len(), expected);
    }

    #[test]
    fn test_bounds_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("bounds.rdb");

        let mut columns = test_columns();
        columns[0].minimum = Some(-5.0);
        columns[1].maximum = Some(99.5);
        drop(BinaryFileStorage::create(&path, &columns, &test_archives()).unwrap());

        let storage = BinaryFileStorage::open(&path, true).unwrap();
        assert_eq!(storage.columns()[0].minimum, Some(-5.0));
        assert_eq!(storage.columns()[0].maximum, None);
        assert_eq!(storage.columns()[1].minimum, None);
        assert_eq!(storage.columns()[1].maximum, Some(99.5));
    }

    #[test]
    fn test_create_refuses_existing_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("exists.rdb");
        drop(BinaryFileStorage::create(&path, &test_columns(), &test_archives()).unwrap());

        let err = BinaryFileStorage::create(&path, &test_columns(), &test_archives()).unwrap_err();
        assert!(matches!(
            err,
            Error::Store(StoreError::AlreadyExists { .. })
        ));
    }

    #[test]
    fn test_lock_contention() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("locked.rdb");
        let held = BinaryFileStorage::create(&path, &test_columns(), &test_archives()).unwrap();

        let err = BinaryFileStorage::open(&path, true).unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::Locked { .. })));
        drop(held);

        // Released on drop; a later open succeeds.
        BinaryFileStorage::open(&path, true).unwrap();
    }

    #[test]
    fn test_put_get_roundtrip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("putget.rdb");
        let storage = BinaryFileStorage::create(&path, &test_columns(), &test_archives()).unwrap();

        let mut v = Value::new(3, 0, 7.5);
        v.counter = 1;
        storage.put(0, 3, &[v.clone()]).unwrap();

        let got = storage.get(0, 3, &[0, 1]).unwrap().unwrap();
        assert_eq!(got[0].value, 7.5);
        assert_eq!(got[0].counter, 1);
        assert!(got[0].valid);
        // The other column was reset along with the row.
        assert!(!got[1].valid);

        // Absent: different timestamp in the same slot.
        assert!(storage.get(0, 13, &[0]).unwrap().is_none());
        // Absent: empty slot.
        assert!(storage.get(0, 4, &[0]).unwrap().is_none());
    }

    #[test]
    fn test_newer_timestamp_resets_row() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reset.rdb");
        let storage = BinaryFileStorage::create(&path, &test_columns(), &test_archives()).unwrap();

        storage.put(0, 3, &[Value::new(3, 0, 1.0), Value::new(3, 1, 2.0)]).unwrap();
        // Same slot, next lap of the ring, only column 0 written.
        storage.put(0, 13, &[Value::new(13, 0, 9.0)]).unwrap();

        let got = storage.get(0, 13, &[0, 1]).unwrap().unwrap();
        assert_eq!(got[0].value, 9.0);
        assert!(!got[1].valid);
        assert!(storage.get(0, 3, &[0]).unwrap().is_none());
    }

    #[test]
    fn test_stale_write_leaves_slot_untouched() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("stale.rdb");
        let storage = BinaryFileStorage::create(&path, &test_columns(), &test_archives()).unwrap();

        storage.put(0, 23, &[Value::new(23, 0, 5.0)]).unwrap();
        let err = storage.put(0, 13, &[Value::new(13, 0, 1.0)]).unwrap_err();
        assert!(matches!(
            err,
            Error::StaleWrite {
                stored: 23,
                incoming: 13
            }
        ));

        let got = storage.get(0, 23, &[0]).unwrap().unwrap();
        assert_eq!(got[0].value, 5.0);
    }

    #[test]
    fn test_readonly_put_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ro.rdb");
        drop(BinaryFileStorage::create(&path, &test_columns(), &test_archives()).unwrap());

        let storage = BinaryFileStorage::open(&path, true).unwrap();
        let err = storage.put(0, 1, &[Value::new(1, 0, 1.0)]).unwrap_err();
        assert!(matches!(err, Error::ReadOnly));
    }

    #[test]
    fn test_iterate_skips_and_terminates() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("iter.rdb");
        let storage = BinaryFileStorage::create(&path, &test_columns(), &test_archives()).unwrap();

        for ts in [2i64, 4, 6, 8] {
            storage.put(0, ts, &[Value::new(ts, 0, ts as f32)]).unwrap();
        }

        // Physical order, empty slots skipped.
        let mut it = storage.iterate(0, 0, -1, &[0]).unwrap();
        let mut seen = Vec::new();
        while let Some(row) = it.next_row().unwrap() {
            seen.push(row.ts);
        }
        assert_eq!(seen, vec![2, 4, 6, 8]);

        // begin skips, end terminates; the iterator stays exhausted.
        let mut it = storage.iterate(0, 3, 6, &[0]).unwrap();
        assert_eq!(it.next_row().unwrap().unwrap().ts, 4);
        assert_eq!(it.next_row().unwrap().unwrap().ts, 6);
        assert!(it.next_row().unwrap().is_none());
        assert!(it.next_row().unwrap().is_none());
    }

    #[test]
    fn test_bad_magic_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("magic.rdb");

        let mut bytes = Vec::new();
        write_header(&mut bytes, FILE_VERSION, 1, 1).unwrap();
        bytes[8] ^= 0xff;
        fs::write(&path, &bytes).unwrap();

        let err = BinaryFileStorage::open(&path, true).unwrap_err();
        assert!(matches!(err, Error::Store(StoreError::BadMagic { .. })));
    }

    #[test]
    fn test_newer_version_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("version.rdb");

        let mut bytes = Vec::new();
        write_header(&mut bytes, FILE_VERSION + 1, 1, 1).unwrap();
        fs::write(&path, &bytes).unwrap();

        let err = BinaryFileStorage::open(&path, true).unwrap_err();
        assert!(matches!(
            err,
            Error::Store(StoreError::UnsupportedVersion { .. })
        ));
    }

    /// Builds a version-1 file by hand: one `last` column, one archive of
    /// four one-second slots, a single stored row at ts = 2.
    pub(crate) fn write_v1_fixture(path: &Path) {
        let mut bytes = Vec::new();
        write_header(&mut bytes, 1, 1, 1).unwrap();

        write_name(&mut bytes, "c0").unwrap();
        bytes.extend_from_slice(&AggFunc::Last.id().to_le_bytes());

        let row_size = row_size_for(1);
        let offset = HEADER_SIZE + COLUMN_RECORD_V1 + ARCHIVE_RECORD;
        write_name(&mut bytes, "a0").unwrap();
        bytes.extend_from_slice(&1i64.to_le_bytes());
        bytes.extend_from_slice(&4i32.to_le_bytes());
        bytes.extend_from_slice(&(4 * row_size as i64).to_le_bytes());
        bytes.extend_from_slice(&(offset as i64).to_le_bytes());

        let mut empty = vec![0u8; row_size as usize];
        empty[0..8].copy_from_slice(&EMPTY_TS.to_le_bytes());
        let mut full = empty.clone();
        full[0..8].copy_from_slice(&2i64.to_le_bytes());
        let mut cell = [0u8; CELL_SIZE];
        let mut v = Value::new(2, 0, 7.0);
        v.counter = 1;
        v.encode(&mut cell);
        full[8..8 + CELL_SIZE].copy_from_slice(&cell);

        // Slots 0, 1, 3 empty; slot 2 holds ts = 2.
        bytes.extend_from_slice(&empty);
        bytes.extend_from_slice(&empty);
        bytes.extend_from_slice(&full);
        bytes.extend_from_slice(&empty);

        fs::write(path, &bytes).unwrap();
    }

    #[test]
    fn test_version1_file_readable() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("v1.rdb");
        write_v1_fixture(&path);

        let storage = BinaryFileStorage::open(&path, true).unwrap();
        assert_eq!(storage.version(), 1);
        assert_eq!(storage.columns().len(), 1);
        assert_eq!(storage.columns()[0].name, "c0");
        assert_eq!(storage.columns()[0].function, AggFunc::Last);
        assert_eq!(storage.columns()[0].minimum, None);
        assert_eq!(storage.columns()[0].maximum, None);

        let got = storage.get(0, 2, &[0]).unwrap().unwrap();
        assert_eq!(got[0].value, 7.0);
        assert_eq!(got[0].counter, 1);
        assert!(got[0].valid);
    }

    #[test]
    fn test_memory_storage_parity() {
        let storage = MemoryStorage::new(&test_columns(), &test_archives());

        storage.put(0, 3, &[Value::new(3, 0, 7.5)]).unwrap();
        let got = storage.get(0, 3, &[0, 1]).unwrap().unwrap();
        assert_eq!(got[0].value, 7.5);
        assert!(!got[1].valid);
        assert!(storage.get(0, 13, &[0]).unwrap().is_none());

        storage.put(0, 13, &[Value::new(13, 0, 9.0)]).unwrap();
        assert!(storage.get(0, 3, &[0]).unwrap().is_none());

        let err = storage.put(0, 3, &[Value::new(3, 0, 1.0)]).unwrap_err();
        assert!(matches!(err, Error::StaleWrite { .. }));

        let mut it = storage.iterate(0, 0, -1, &[0]).unwrap();
        assert_eq!(it.next_row().unwrap().unwrap().ts, 13);
        assert!(it.next_row().unwrap().is_none());
    }
}
