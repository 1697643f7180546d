//! JSON dump and restore.
//!
//! The dump document is human-editable: the column schema, the archive
//! schema, and per-archive row lists where each row carries its timestamp
//! and only its valid cells (column id, value, counter). Loading a dump
//! reconstructs a fresh database file; the valid flag is forced on for every
//! dumped cell, timestamps and counters survive untouched.

use std::io::{Read, Write};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::schema::{Archive, Column};
use crate::store::Store;
use crate::value::Value;

/// The dump document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Dump {
    /// Column definitions.
    pub columns: Vec<Column>,
    /// Archive definitions.
    pub archives: Vec<Archive>,
    /// Row data per archive.
    pub data: Vec<ArchiveData>,
}

/// Rows of one archive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveData {
    /// Index of the archive these rows belong to.
    pub archive_id: usize,
    /// Non-empty rows in physical order.
    pub rows: Vec<DumpRow>,
}

/// One dumped row: a timestamp and its valid cells.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpRow {
    /// Quantized row timestamp.
    pub ts: i64,
    /// Valid cells only.
    pub values: Vec<DumpCell>,
}

/// One dumped cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpCell {
    /// Column index.
    pub column: usize,
    /// Stored value.
    pub value: f32,
    /// Stored sample counter.
    pub counter: i64,
}

impl Store {
    /// Builds the dump document for the whole database.
    pub fn dump(&self) -> Result<Dump> {
        let all = self.all_column_ids();
        let mut data = Vec::with_capacity(self.archives().len());

        for aid in 0..self.archives().len() {
            let mut rows = Vec::new();
            let mut it = self.raw_iterate(aid, &all)?;
            while let Some(row) = it.next_row()? {
                rows.push(DumpRow {
                    ts: row.ts,
                    values: row
                        .values
                        .iter()
                        .filter(|v| v.valid)
                        .map(|v| DumpCell {
                            column: v.column,
                            value: v.value,
                            counter: v.counter,
                        })
                        .collect(),
                });
            }
            data.push(ArchiveData {
                archive_id: aid,
                rows,
            });
        }

        Ok(Dump {
            columns: self.columns().to_vec(),
            archives: self.archives().to_vec(),
            data,
        })
    }

    /// Serializes the dump document as pretty-printed JSON.
    pub fn dump_to_writer<W: Write>(&self, writer: W) -> Result<()> {
        let dump = self.dump()?;
        serde_json::to_writer_pretty(writer, &dump)?;
        Ok(())
    }
}

/// Reconstructs a database file at `path` from a dump document.
pub fn load_dump<P: AsRef<Path>>(dump: &Dump, path: P) -> Result<Store> {
    let store = Store::create(path, dump.columns.clone(), dump.archives.clone())?;

    for ad in &dump.data {
        if ad.archive_id >= dump.archives.len() {
            return Err(Error::UnknownArchive(ad.archive_id.to_string()));
        }
        for row in &ad.rows {
            let values: Vec<Value> = row
                .values
                .iter()
                .map(|c| Value {
                    ts: row.ts,
                    column: c.column,
                    value: c.value,
                    counter: c.counter,
                    valid: true,
                })
                .collect();
            store.raw_put(ad.archive_id, row.ts, &values)?;
        }
    }
    Ok(store)
}

/// Parses a JSON dump document and reconstructs a database file at `path`.
pub fn load_from_reader<R: Read, P: AsRef<Path>>(reader: R, path: P) -> Result<Store> {
    let dump: Dump = serde_json::from_reader(reader)?;
    load_dump(&dump, path)
}
