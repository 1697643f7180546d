//! Offline schema mutations.
//!
//! Every mutation is a rewrite: open the source read-only, create
//! `<path>.new` with the target schema, stream the rows across (remapping
//! columns and archives where needed), close both files, remove the source
//! and rename the destination over it. If the copy fails after the
//! destination exists, `<path>.new` is left in place for inspection and the
//! original is untouched.

use std::fs;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{Error, Result, SchemaError};
use crate::schema::{truncate_name, Archive, Column};
use crate::store::{reorder_wrapped, Store};
use crate::value::Value;

/// Attribute changes applied by [`change_column`].
///
/// Only the name and the validity bounds of a column may change; the
/// aggregation function is fixed at creation.
#[derive(Debug, Clone, Default)]
pub struct ColumnChange {
    /// New name; truncated to 16 bytes.
    pub name: Option<String>,
    /// New minimum bound.
    pub minimum: Option<f32>,
    /// New maximum bound.
    pub maximum: Option<f32>,
    /// Drop the minimum bound.
    pub clear_minimum: bool,
    /// Drop the maximum bound.
    pub clear_maximum: bool,
}

/// Appends new columns to the schema, keeping all stored data.
///
/// A new column whose name collides with an existing one is renamed to
/// `col<N>`, N being the column count at the time of the collision. Existing
/// rows keep their cells; the new columns start out invalid everywhere.
pub fn add_columns<P: AsRef<Path>>(path: P, columns: Vec<Column>) -> Result<()> {
    let path = path.as_ref();
    let src = Store::open(path, true)?;

    let mut dst_columns = src.columns().to_vec();
    for mut col in columns {
        if dst_columns.iter().any(|c| c.name == col.name) {
            let name = format!("col{}", dst_columns.len());
            warn!(old = %col.name, new = %name, "column name collision, renaming");
            col.name = name;
        }
        dst_columns.push(col);
    }
    let dst_archives = src.archives().to_vec();

    rewrite(src, path, dst_columns, dst_archives, &[], &[], None)
}

/// Removes the columns at the given indices, dropping their data.
///
/// Remaining columns are compacted; their cells move to the new indices.
pub fn del_columns<P: AsRef<Path>>(path: P, columns: &[usize]) -> Result<()> {
    let path = path.as_ref();
    let src = Store::open(path, true)?;

    for &c in columns {
        if c >= src.columns().len() {
            return Err(Error::UnknownColumn(c.to_string()));
        }
    }

    let dst_columns: Vec<Column> = src
        .columns()
        .iter()
        .enumerate()
        .filter(|(idx, _)| !columns.contains(idx))
        .map(|(_, c)| c.clone())
        .collect();
    let dst_archives = src.archives().to_vec();

    rewrite(src, path, dst_columns, dst_archives, columns, &[], None)
}

/// Appends new, empty archives after the existing ones.
pub fn add_archives<P: AsRef<Path>>(path: P, archives: Vec<Archive>) -> Result<()> {
    let path = path.as_ref();
    let src = Store::open(path, true)?;

    let dst_columns = src.columns().to_vec();
    let mut dst_archives = src.archives().to_vec();
    dst_archives.extend(archives);

    rewrite(src, path, dst_columns, dst_archives, &[], &[], None)
}

/// Removes the archives at the given indices, dropping their data.
///
/// Surviving archives are renumbered consecutively.
pub fn del_archives<P: AsRef<Path>>(path: P, archives: &[usize]) -> Result<()> {
    let path = path.as_ref();
    let src = Store::open(path, true)?;

    for &a in archives {
        if a >= src.archives().len() {
            return Err(Error::UnknownArchive(a.to_string()));
        }
    }

    let dst_columns = src.columns().to_vec();
    let dst_archives: Vec<Archive> = src
        .archives()
        .iter()
        .enumerate()
        .filter(|(idx, _)| !archives.contains(idx))
        .map(|(_, a)| a.clone())
        .collect();

    rewrite(src, path, dst_columns, dst_archives, &[], archives, None)
}

/// Changes the row count of one archive (index or name).
///
/// The archive's rows are re-inserted through the normal put path, so the
/// resized ring keeps whatever still fits modulo its new size.
pub fn resize_archive<P: AsRef<Path>>(path: P, archive: &str, rows: i32) -> Result<()> {
    let path = path.as_ref();
    let src = Store::open(path, true)?;

    let aid = src.resolve_archive(archive)?;
    if rows <= 0 {
        return Err(SchemaError::InvalidRows(i64::from(rows)).into());
    }
    if src.archives()[aid].rows == rows {
        return Err(SchemaError::RowsUnchanged(rows).into());
    }

    let dst_columns = src.columns().to_vec();
    let mut dst_archives = src.archives().to_vec();
    dst_archives[aid].rows = rows;

    rewrite(src, path, dst_columns, dst_archives, &[], &[], Some(aid))
}

/// Changes the name and bounds of one column (index or name).
pub fn change_column<P: AsRef<Path>>(path: P, column: &str, change: ColumnChange) -> Result<()> {
    let path = path.as_ref();
    let src = Store::open(path, true)?;

    let cid = src.resolve_column(column)?;
    let mut dst_columns = src.columns().to_vec();
    let col = &mut dst_columns[cid];
    if let Some(name) = &change.name {
        col.name = truncate_name(name);
    }
    if change.clear_minimum {
        col.minimum = None;
    } else if let Some(min) = change.minimum {
        col.minimum = Some(min);
    }
    if change.clear_maximum {
        col.maximum = None;
    } else if let Some(max) = change.maximum {
        col.maximum = Some(max);
    }
    let dst_archives = src.archives().to_vec();

    rewrite(src, path, dst_columns, dst_archives, &[], &[], None)
}

/// Rewrites the file with the same schema in the newest format version.
pub fn upgrade<P: AsRef<Path>>(path: P) -> Result<()> {
    let path = path.as_ref();
    let src = Store::open(path, true)?;
    let dst_columns = src.columns().to_vec();
    let dst_archives = src.archives().to_vec();
    rewrite(src, path, dst_columns, dst_archives, &[], &[], None)
}

impl Store {
    /// Writes the open database into a fresh file with the same schema.
    pub fn save_as<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let dst = Store::create(path, self.columns().to_vec(), self.archives().to_vec())?;
        copy_data(self, &dst, &[], &[], None)?;
        dst.close()
    }
}

fn rewrite(
    src: Store,
    path: &Path,
    dst_columns: Vec<Column>,
    dst_archives: Vec<Archive>,
    skip_columns: &[usize],
    skip_archives: &[usize],
    resized: Option<usize>,
) -> Result<()> {
    let tmp = suffixed(path, ".new");
    debug!(src = %path.display(), dst = %tmp.display(), "rewriting schema");

    let dst = Store::create(&tmp, dst_columns, dst_archives)?;
    copy_data(&src, &dst, skip_columns, skip_archives, resized)?;
    dst.close()?;
    src.close()?;

    debug!("replacing original file");
    fs::remove_file(path)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

/// Streams rows from `src` to `dst`, skipping and remapping as requested.
///
/// The archive marked `resized` is copied in logical time order so the
/// destination's stale-write check never fires; other archives keep their
/// physical order, which maps slot-for-slot.
fn copy_data(
    src: &Store,
    dst: &Store,
    skip_columns: &[usize],
    skip_archives: &[usize],
    resized: Option<usize>,
) -> Result<()> {
    let mut cols: Vec<usize> = Vec::new();
    let mut remap: Option<Vec<usize>> = None;
    if skip_columns.is_empty() {
        cols = src.all_column_ids();
    } else {
        let mut map = vec![usize::MAX; src.columns().len()];
        for c in 0..src.columns().len() {
            if !skip_columns.contains(&c) {
                map[c] = cols.len();
                cols.push(c);
            }
        }
        remap = Some(map);
    }

    let put_row = |dst_aid: usize, row: crate::value::Row| -> Result<()> {
        let values: Vec<Value> = match &remap {
            Some(map) => row
                .values
                .into_iter()
                .map(|mut v| {
                    v.column = map[v.column];
                    v
                })
                .collect(),
            None => row.values,
        };
        dst.raw_put(dst_aid, row.ts, &values)
    };

    let mut dst_aid = 0usize;
    for src_aid in 0..src.archives().len() {
        if skip_archives.contains(&src_aid) {
            continue;
        }

        if resized == Some(src_aid) {
            let mut rows = Vec::new();
            let mut it = src.raw_iterate(src_aid, &cols)?;
            while let Some(row) = it.next_row()? {
                rows.push(row);
            }
            drop(it);
            for row in reorder_wrapped(rows) {
                put_row(dst_aid, row)?;
            }
        } else {
            let mut it = src.raw_iterate(src_aid, &cols)?;
            while let Some(row) = it.next_row()? {
                put_row(dst_aid, row)?;
            }
        }
        dst_aid += 1;
    }
    Ok(())
}

fn suffixed(path: &Path, suffix: &str) -> PathBuf {
    let mut os = path.as_os_str().to_os_string();
    os.push(suffix);
    PathBuf::from(os)
}
