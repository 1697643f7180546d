//! Post-query row processing.
//!
//! Helpers applied to a range-query result after the fact: averaging down
//! to a coarser step, thinning to a point budget, and re-checking values
//! against column bounds. None of them touch storage.

use crate::schema::Column;
use crate::value::{Row, Value};

/// Averages rows into buckets of `step` seconds.
///
/// Rows whose timestamps fall into the same `ts / step` bucket collapse
/// into one row holding, per column position, the mean of the valid values
/// (the counter becomes the number of contributors). Inputs of fewer than
/// two rows, or a non-positive step, pass through unchanged.
pub fn average_by_time(rows: Vec<Row>, step: i64) -> Vec<Row> {
    if rows.len() < 2 || step <= 0 {
        return rows;
    }

    let mut out = Vec::new();
    let mut bucket: Vec<Row> = Vec::new();
    let mut bucket_ts = i64::MIN;
    for row in rows {
        let ts = row.ts / step;
        if ts != bucket_ts && !bucket.is_empty() {
            out.push(average_rows(&bucket));
            bucket.clear();
        }
        bucket_ts = ts;
        bucket.push(row);
    }
    if !bucket.is_empty() {
        out.push(average_rows(&bucket));
    }
    out
}

/// Thins a row set down to at most `max_rows` points by time-averaging.
///
/// The bucket width is derived from the spanned interval; small inputs pass
/// through unchanged.
pub fn average_to_points(rows: Vec<Row>, max_rows: usize) -> Vec<Row> {
    if rows.len() < 2 || rows.len() < max_rows || max_rows == 0 {
        return rows;
    }
    let min_ts = rows[0].ts;
    let max_ts = rows[rows.len() - 1].ts;
    let step = (max_ts - min_ts) / max_rows as i64;
    average_by_time(rows, step)
}

/// Re-marks cells against their column's bounds.
///
/// A valid cell whose value falls outside `[minimum, maximum]` of its
/// column comes back invalid; everything else is untouched.
pub fn mark_out_of_bounds(rows: Vec<Row>, columns: &[Column]) -> Vec<Row> {
    rows.into_iter()
        .map(|mut row| {
            for v in &mut row.values {
                if v.valid {
                    if let Some(col) = columns.get(v.column) {
                        v.valid = col.accepts(v.value);
                    }
                }
            }
            row
        })
        .collect()
}

#[allow(clippy::cast_precision_loss)]
fn average_rows(bucket: &[Row]) -> Row {
    let ts = bucket[0].ts;
    let columns = bucket[0].values.len();

    let mut values = Vec::with_capacity(columns);
    for c in 0..columns {
        let mut acc = Value::empty(ts, bucket[0].values[c].column);
        for row in bucket {
            let v = &row.values[c];
            if v.valid {
                acc.value += v.value;
                acc.counter += 1;
                acc.valid = true;
            }
        }
        if acc.valid {
            acc.value /= acc.counter as f32;
        }
        values.push(acc);
    }
    Row { ts, values }
}
