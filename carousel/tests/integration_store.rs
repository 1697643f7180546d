//! End-to-end tests for the write/read/range paths of the coordinator.

use carousel::{AggFunc, Archive, Column, Error, Store};
use tempfile::tempdir;

/// Six columns, one per aggregation function.
fn six_columns() -> Vec<Column> {
    vec![
        Column::new("c1", AggFunc::Last),
        Column::new("c2", AggFunc::Average),
        Column::new("c3", AggFunc::Sum),
        Column::new("c4", AggFunc::Minimum),
        Column::new("c5", AggFunc::Maximum),
        Column::new("c6", AggFunc::Count),
    ]
}

/// The canonical three-tier layout: seconds, tens, hundreds.
fn three_archives() -> Vec<Archive> {
    vec![
        Archive::new("a0", 1, 10),
        Archive::new("a1", 10, 10),
        Archive::new("a2", 100, 10),
    ]
}

fn put_all_columns(store: &Store, ts: i64, value: f32) {
    for col in 0..store.columns().len() {
        store.put(ts, col, value).unwrap();
    }
}

#[test]
fn test_create_open_schema_roundtrip() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("schema.rdb");

    let mut columns = six_columns();
    columns[1].minimum = Some(-10.0);
    columns[1].maximum = Some(10.0);
    let archives = three_archives();

    let store = Store::create(&path, columns.clone(), archives.clone()).unwrap();
    store.close().unwrap();

    let store = Store::open(&path, true).unwrap();
    assert_eq!(store.columns(), columns.as_slice());
    assert_eq!(store.archives(), archives.as_slice());
    store.close().unwrap();
}

#[test]
fn test_fresh_database_is_empty() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("empty.rdb");
    let store = Store::create(&path, six_columns(), three_archives()).unwrap();

    for ts in [0i64, 1, 59, 1000, 123_456_789] {
        assert!(store.get(ts, &[]).unwrap().is_none());
    }
    assert_eq!(store.last().unwrap(), -1);
    store.close().unwrap();
}

#[test]
fn test_aggregation_all_functions_single_step() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("agg.rdb");
    let store = Store::create(&path, six_columns(), vec![Archive::new("a0", 1, 10)]).unwrap();

    for v in [1.0f32, 3.0, 0.0, 4.0] {
        put_all_columns(&store, 1, v);
    }

    let row = store.get(1, &[]).unwrap().unwrap();
    let got: Vec<f32> = row.values.iter().map(|v| v.value).collect();
    assert_eq!(got, vec![4.0, 2.0, 8.0, 0.0, 4.0, 4.0]);
    assert!(row.values.iter().all(|v| v.valid && v.counter == 4));

    // Second slot, two samples.
    for v in [2.0f32, 6.0] {
        put_all_columns(&store, 2, v);
    }
    let row = store.get(2, &[]).unwrap().unwrap();
    let got: Vec<f32> = row.values.iter().map(|v| v.value).collect();
    assert_eq!(got, vec![6.0, 4.0, 8.0, 2.0, 6.0, 2.0]);

    store.close().unwrap();
}

#[test]
fn test_repeated_puts_idempotent_for_last_min_max() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("idem.rdb");
    let store = Store::create(&path, six_columns(), vec![Archive::new("a0", 1, 10)]).unwrap();

    put_all_columns(&store, 3, 5.0);
    put_all_columns(&store, 3, 5.0);

    let row = store.get(3, &[0, 3, 4]).unwrap().unwrap();
    for v in &row.values {
        assert_eq!(v.value, 5.0);
        assert_eq!(v.counter, 2);
    }
    // sum and count do change.
    let row = store.get(3, &[2, 5]).unwrap().unwrap();
    assert_eq!(row.values[0].value, 10.0);
    assert_eq!(row.values[1].value, 2.0);

    store.close().unwrap();
}

#[test]
fn test_ring_keeps_only_last_n_samples() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ring.rdb");
    let store = Store::create(
        &path,
        vec![Column::new("v", AggFunc::Last)],
        three_archives(),
    )
    .unwrap();

    for t in 0..600i64 {
        store.put(t, 0, t as f32).unwrap();
    }
    assert_eq!(store.last().unwrap(), 599);

    let dump = store.dump().unwrap();

    // Finest archive: exactly the last 10 samples, value == timestamp.
    let a0: Vec<(i64, f32)> = dump.data[0]
        .rows
        .iter()
        .map(|r| (r.ts, r.values[0].value))
        .collect();
    assert_eq!(
        a0,
        (590..600).map(|t| (t, t as f32)).collect::<Vec<_>>()
    );

    // Ten-second archive: buckets 500..590, each holding the last sample of
    // its bucket.
    let a1: Vec<(i64, f32)> = dump.data[1]
        .rows
        .iter()
        .map(|r| (r.ts, r.values[0].value))
        .collect();
    assert_eq!(
        a1,
        (50..60).map(|b| (b * 10, (b * 10 + 9) as f32)).collect::<Vec<_>>()
    );

    // Hundred-second archive: buckets 0..500 so far.
    let a2: Vec<(i64, f32)> = dump.data[2]
        .rows
        .iter()
        .map(|r| (r.ts, r.values[0].value))
        .collect();
    assert_eq!(
        a2,
        (0..6).map(|b| (b * 100, (b * 100 + 99) as f32)).collect::<Vec<_>>()
    );

    store.close().unwrap();
}

#[test]
fn test_sparse_puts_and_slot_overwrites() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("sparse.rdb");
    let store = Store::create(
        &path,
        vec![Column::new("v", AggFunc::Last)],
        vec![Archive::new("a0", 1, 10)],
    )
    .unwrap();

    // Later samples reuse slots; two of the puts arrive late and fail.
    for t in [1i64, 3, 5, 10, 11, 12, 13, 14, 20, 38, 54] {
        store.put(t, 0, t as f32).unwrap();
    }
    assert!(store.put(8, 0, 8.0).is_err());
    assert!(store.put(44, 0, 44.0).is_err());

    let missing = [1i64, 3, 10, 14, 8, 44];
    for t in [1i64, 3, 5, 10, 11, 12, 13, 14, 20, 38, 54, 8, 44] {
        let row = store.get(t, &[0]).unwrap();
        if missing.contains(&t) {
            assert!(row.is_none(), "t={t} should have been overwritten");
        } else {
            let row = row.unwrap();
            assert_eq!(row.ts, t);
            assert_eq!(row.values[0].value, t as f32);
        }
    }
    store.close().unwrap();
}

#[test]
fn test_stale_write_and_wrap() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("stale.rdb");
    let store = Store::create(
        &path,
        vec![Column::new("v", AggFunc::Last)],
        vec![Archive::new("a0", 1, 10)],
    )
    .unwrap();

    store.put(10, 0, 10.0).unwrap();
    store.put(610, 0, 610.0).unwrap();
    store.put(1810, 0, 1810.0).unwrap();

    let err = store.put(1210, 0, 1210.0).unwrap_err();
    assert!(matches!(
        err,
        Error::StaleWrite {
            stored: 1810,
            incoming: 1210
        }
    ));

    // Earlier laps of the slot were overwritten; the newest survives.
    assert!(store.get(10, &[0]).unwrap().is_none());
    assert!(store.get(610, &[0]).unwrap().is_none());
    let row = store.get(1810, &[0]).unwrap().unwrap();
    assert_eq!(row.values[0].value, 1810.0);

    store.close().unwrap();
}

#[test]
fn test_get_range_archive_selection() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("range.rdb");
    let store = Store::create(
        &path,
        vec![Column::new("v", AggFunc::Last)],
        three_archives(),
    )
    .unwrap();

    for t in [1i64, 5, 10, 20, 100, 150, 200, 250, 300, 400, 450, 490, 495, 500] {
        store.put(t, 0, t as f32).unwrap();
    }

    // The whole history only fits the coarsest archive.
    let rows = store.get_range(0, -1, &[], false, false).unwrap();
    let got: Vec<(i64, f32)> = rows.iter().map(|r| (r.ts, r.values[0].value)).collect();
    assert_eq!(
        got,
        vec![
            (0, 20.0),
            (100, 150.0),
            (200, 250.0),
            (300, 300.0),
            (400, 495.0),
            (500, 500.0),
        ]
    );

    // A short recent range is served by the finest archive.
    let rows = store.get_range(491, 500, &[], false, false).unwrap();
    let got: Vec<(i64, f32)> = rows.iter().map(|r| (r.ts, r.values[0].value)).collect();
    assert_eq!(got, vec![(495, 495.0), (500, 500.0)]);

    // Same selection with an open end.
    let rows = store.get_range(491, -1, &[], false, false).unwrap();
    let got: Vec<i64> = rows.iter().map(|r| r.ts).collect();
    assert_eq!(got, vec![495, 500]);

    // A middle window lands on the coarsest archive.
    let rows = store.get_range(100, 300, &[], false, false).unwrap();
    let got: Vec<(i64, f32)> = rows.iter().map(|r| (r.ts, r.values[0].value)).collect();
    assert_eq!(got, vec![(100, 150.0), (200, 250.0), (300, 300.0)]);

    store.close().unwrap();
}

#[test]
fn test_get_range_include_invalid_fills_gaps() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("fill.rdb");
    let store = Store::create(
        &path,
        vec![Column::new("v", AggFunc::Last)],
        three_archives(),
    )
    .unwrap();

    for t in [1i64, 5, 10, 20, 100, 150, 200, 250, 300, 400, 450, 490, 495, 500] {
        store.put(t, 0, t as f32).unwrap();
    }

    let rows = store.get_range(491, 500, &[], true, false).unwrap();
    assert_eq!(rows.len(), 10);
    for (i, row) in rows.iter().enumerate() {
        let ts = 491 + i as i64;
        assert_eq!(row.ts, ts);
        if ts == 495 || ts == 500 {
            assert!(row.values[0].valid);
            assert_eq!(row.values[0].value, ts as f32);
        } else {
            assert!(!row.values[0].valid, "ts={ts} should be a gap");
        }
    }
    store.close().unwrap();
}

#[test]
fn test_get_range_wrapped_ring_is_in_logical_order() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("wrap.rdb");
    let store = Store::create(
        &path,
        vec![Column::new("v", AggFunc::Last)],
        vec![Archive::new("a0", 1, 10)],
    )
    .unwrap();

    // 8..17 wraps: slots 8, 9 hold the oldest rows.
    for t in 8i64..18 {
        store.put(t, 0, t as f32).unwrap();
    }

    let rows = store.get_range(8, -1, &[], false, false).unwrap();
    let got: Vec<i64> = rows.iter().map(|r| r.ts).collect();
    assert_eq!(got, (8..18).collect::<Vec<_>>());

    store.close().unwrap();
}

#[test]
fn test_out_of_bounds_samples_are_dropped() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("bounds.rdb");

    let mut columns = vec![Column::new("t", AggFunc::Average)];
    columns[0].minimum = Some(-40.0);
    columns[0].maximum = Some(60.0);
    let store = Store::create(&path, columns, vec![Archive::new("a0", 1, 10)]).unwrap();

    // Dropped, not an error; nothing lands in the slot.
    store.put(5, 0, 100.0).unwrap();
    store.put(5, 0, -41.0).unwrap();
    assert!(store.get(5, &[]).unwrap().is_none());

    // The edges themselves are acceptable.
    store.put(5, 0, 60.0).unwrap();
    let row = store.get(5, &[]).unwrap().unwrap();
    assert_eq!(row.values[0].value, 60.0);

    store.close().unwrap();
}

#[test]
fn test_readonly_rejects_writes() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("ro.rdb");
    Store::create(&path, six_columns(), three_archives())
        .unwrap()
        .close()
        .unwrap();

    let store = Store::open(&path, true).unwrap();
    assert!(matches!(store.put(1, 0, 1.0), Err(Error::ReadOnly)));
    store.close().unwrap();
}

#[test]
fn test_info_statistics() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("info.rdb");
    let store = Store::create(
        &path,
        vec![Column::new("v", AggFunc::Last), Column::new("w", AggFunc::Sum)],
        vec![Archive::new("a0", 1, 10), Archive::new("a1", 10, 10)],
    )
    .unwrap();

    store.put(13, 0, 1.0).unwrap();
    store.put(15, 0, 2.0).unwrap();
    store.put_values(&[carousel::Value::new(20, 0, 3.0), carousel::Value::new(20, 1, 4.0)])
        .unwrap();

    let info = store.info().unwrap();
    assert_eq!(info.columns.len(), 2);
    assert_eq!(info.archives.len(), 2);

    let a0 = &info.archives[0];
    assert_eq!(a0.name, "a0");
    assert_eq!(a0.rows, 10);
    assert_eq!(a0.step, 1);
    assert_eq!(a0.used_rows, 3);
    assert_eq!(a0.min_ts, 13);
    assert_eq!(a0.max_ts, 20);
    assert_eq!(a0.valid_cells, 4);
    assert_eq!(a0.retention_floor, 10);

    let a1 = &info.archives[1];
    assert_eq!(a1.used_rows, 2); // buckets 10 and 20
    assert_eq!(a1.min_ts, 10);
    assert_eq!(a1.max_ts, 20);

    store.close().unwrap();
}

#[test]
fn test_put_values_multiple_columns_one_call() {
    let dir = tempdir().unwrap();
    let path = dir.path().join("multi.rdb");
    let store = Store::create(&path, six_columns(), vec![Archive::new("a0", 1, 10)]).unwrap();

    store
        .put_values(&[
            carousel::Value::new(7, 0, 1.5),
            carousel::Value::new(7, 2, 2.5),
        ])
        .unwrap();

    let row = store.get(7, &[]).unwrap().unwrap();
    assert!(row.values[0].valid);
    assert_eq!(row.values[0].value, 1.5);
    assert!(!row.values[1].valid);
    assert!(row.values[2].valid);
    assert_eq!(row.values[2].value, 2.5);

    store.close().unwrap();
}
