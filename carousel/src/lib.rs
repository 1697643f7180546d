//! # carousel
//!
//! Single-file, fixed-size round-robin database for time-series data.
//!
//! A carousel database is one file holding a schema of columns — each with
//! an aggregation function (average, sum, min, max, count, last) and
//! optional validity bounds — and a set of archives, each a ring of rows
//! with a fixed sampling step and row count. Because archives are ring
//! buffers, the footprint is bounded and predictable, and old data expires
//! by being overwritten rather than deleted.
//!
//! ## Key Properties
//!
//! - One flat binary file, fixed-width rows, little-endian throughout
//! - Write-time aggregation: every archive merges incoming samples into the
//!   slot they land on, per column function
//! - Range reads pick the finest archive whose retention still covers the
//!   request and iterate the ring in logical time order
//! - Single writer per file via an advisory lock on a `.lock` sibling
//! - Schema changes (add/remove/resize columns and archives) rewrite the
//!   file offline and atomically rename it into place
//!
//! ## Example
//!
//! ```rust,no_run
//! use carousel::{AggFunc, Archive, Column, Store};
//!
//! # fn main() -> carousel::Result<()> {
//! let store = Store::create(
//!     "metrics.rdb",
//!     vec![
//!         Column::new("load", AggFunc::Average),
//!         Column::new("requests", AggFunc::Sum),
//!     ],
//!     vec![
//!         Archive::new("fine", 60, 1440),     // 1m samples for a day
//!         Archive::new("coarse", 3600, 720),  // 1h samples for a month
//!     ],
//! )?;
//!
//! store.put(1_700_000_000, 0, 0.42)?;
//! let rows = store.get_range(1_699_990_000, 1_700_000_000, &[], false, false)?;
//! for row in rows {
//!     println!("{} {:?}", row.ts, row.values);
//! }
//! store.close()?;
//! # Ok(())
//! # }
//! ```

pub mod dump;
pub mod error;
pub mod resample;
pub mod reshape;
pub mod schema;
pub mod storage;
pub mod store;
pub mod value;

pub use error::{Error, Result, SchemaError, StoreError};
pub use schema::{parse_archives_spec, parse_columns_spec, AggFunc, Archive, Column};
pub use storage::{BinaryFileStorage, MemoryStorage, RowsIterator, Storage};
pub use store::{ArchiveInfo, FileInfo, Store};
pub use value::{Row, Value};
