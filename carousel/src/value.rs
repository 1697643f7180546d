//! Value cells and rows.
//!
//! Every row in an archive holds one [`Value`] cell per column. On disk a
//! cell is 16 bytes: value (f32), counter (i64), valid flag (i32), all
//! little-endian. A cell is meaningful only while its valid flag is set; the
//! bytes are written regardless so that every row has the same fixed width.

use serde::{Deserialize, Serialize};

/// On-disk size of one value cell in bytes.
pub const CELL_SIZE: usize = 4 + 8 + 4;

/// Timestamp sentinel marking an empty row slot.
pub const EMPTY_TS: i64 = -1;

/// A single cell: one column's slot content, or one incoming sample.
///
/// `ts` and `column` are routing metadata and are not part of the cell's
/// on-disk encoding (the timestamp is stored once per row).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Value {
    /// Timestamp this cell belongs to.
    pub ts: i64,
    /// Index of the column this cell belongs to.
    pub column: usize,
    /// The stored or incoming sample value.
    pub value: f32,
    /// Number of samples merged into this cell.
    pub counter: i64,
    /// Whether the cell holds meaningful data.
    pub valid: bool,
}

impl Value {
    /// Creates a valid incoming sample.
    pub fn new(ts: i64, column: usize, value: f32) -> Self {
        Self {
            ts,
            column,
            value,
            counter: 0,
            valid: true,
        }
    }

    /// Creates an invalid placeholder cell for `column`.
    pub fn empty(ts: i64, column: usize) -> Self {
        Self {
            ts,
            column,
            value: 0.0,
            counter: 0,
            valid: false,
        }
    }

    /// Encodes the cell into its fixed 16-byte representation.
    pub(crate) fn encode(&self, buf: &mut [u8; CELL_SIZE]) {
        buf[0..4].copy_from_slice(&self.value.to_le_bytes());
        buf[4..12].copy_from_slice(&self.counter.to_le_bytes());
        let valid: i32 = if self.valid { 1 } else { 0 };
        buf[12..16].copy_from_slice(&valid.to_le_bytes());
    }

    /// Decodes a cell read from `buf`, attaching routing metadata.
    pub(crate) fn decode(ts: i64, column: usize, buf: &[u8; CELL_SIZE]) -> Self {
        let value = f32::from_le_bytes(buf[0..4].try_into().unwrap());
        let counter = i64::from_le_bytes(buf[4..12].try_into().unwrap());
        let valid = i32::from_le_bytes(buf[12..16].try_into().unwrap()) == 1;
        Self {
            ts,
            column,
            value,
            counter,
            valid,
        }
    }
}

/// One row of an archive: a timestamp plus the requested column cells.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Row {
    /// Quantized timestamp of the row.
    pub ts: i64,
    /// Cells in the order the columns were requested.
    pub values: Vec<Value>,
}
