use tid_tree::{AttrLen, AttrSpec, Config, Datum, Slice, Snapshot, Store, Tid};
use test_log::test;

fn int_store() -> tid_tree::Result<(Store, tid_tree::Tree)> {
    let store = Store::new(Config::default());
    let tree = store.tree(1, AttrSpec::new(AttrLen::Fixed(8), true))?;
    Ok((store, tree))
}

fn int_datum(value: u64) -> Datum {
    Some(Slice::from(value.to_le_bytes()))
}

fn as_int(datum: &Datum) -> u64 {
    let bytes = datum.as_ref().expect("non-null");
    u64::from_le_bytes(bytes.as_ref().try_into().expect("8 bytes"))
}

#[test]
fn first_insert_assigns_tids_from_one() -> tid_tree::Result<()> {
    let (_store, tree) = int_store()?;

    let tids = tree.insert(&[int_datum(10), int_datum(11), int_datum(12)], 1, 0)?;
    assert_eq!(vec![Tid::new(1), Tid::new(2), Tid::new(3)], tids);

    let snapshot = Snapshot::new(2, 1);
    let rows = tree
        .scan(Tid::new(1), snapshot)?
        .collect::<tid_tree::Result<Vec<_>>>()?;

    assert_eq!(3, rows.len());
    for (i, (tid, value)) in rows.iter().enumerate() {
        assert_eq!(Tid::new(i as u64 + 1), *tid);
        assert_eq!(10 + i as u64, as_int(value));
    }

    Ok(())
}

#[test]
fn thousand_sequential_integers() -> tid_tree::Result<()> {
    let (_store, tree) = int_store()?;

    // values are tid + 9
    let values: Vec<Datum> = (0..1000u64).map(|i| int_datum(10 + i)).collect();
    let tids = tree.insert(&values, 1, 0)?;
    assert_eq!(1000, tids.len());
    assert_eq!(Tid::new(1), tids[0]);
    assert_eq!(Tid::new(1000), tids[999]);

    assert_eq!(Tid::new(1001), tree.last_tid()?);

    let snapshot = Snapshot::new(2, 1);

    // a scan from the middle yields exactly the tail
    let rows = tree
        .scan(Tid::new(500), snapshot)?
        .collect::<tid_tree::Result<Vec<_>>>()?;
    assert_eq!(501, rows.len());
    assert_eq!(Tid::new(500), rows[0].0);
    assert_eq!(509, as_int(&rows[0].1));
    assert_eq!(Tid::new(1000), rows[500].0);

    // point fetch deep inside an array run
    let fetched = tree.fetch(Tid::new(750), &snapshot)?.expect("tid exists");
    assert_eq!(759, as_int(&fetched));

    Ok(())
}

#[test]
fn scan_tids_strictly_increase() -> tid_tree::Result<()> {
    let (_store, tree) = int_store()?;

    let values: Vec<Datum> = (0..300u64).map(int_datum).collect();
    tree.insert(&values, 1, 0)?;

    let snapshot = Snapshot::new(2, 1);
    let mut previous = None;

    for row in tree.scan(Tid::new(17), snapshot)? {
        let (tid, _) = row?;
        assert!(tid >= Tid::new(17));
        if let Some(prev) = previous {
            assert!(tid > prev, "{tid} must be greater than {prev}");
        }
        previous = Some(tid);
    }

    Ok(())
}

#[test]
fn null_runs_coalesce_and_scan_back() -> tid_tree::Result<()> {
    let (_store, tree) = int_store()?;

    let values = vec![
        int_datum(1),
        None,
        None,
        None,
        int_datum(5),
        None,
    ];
    let tids = tree.insert(&values, 1, 0)?;
    assert_eq!(6, tids.len());

    let snapshot = Snapshot::new(2, 1);
    let rows = tree
        .scan(Tid::new(1), snapshot)?
        .collect::<tid_tree::Result<Vec<_>>>()?;

    assert_eq!(6, rows.len());
    assert_eq!(1, as_int(&rows[0].1));
    assert!(rows[1].1.is_none());
    assert!(rows[2].1.is_none());
    assert!(rows[3].1.is_none());
    assert_eq!(5, as_int(&rows[4].1));
    assert!(rows[5].1.is_none());

    // NULL round-trips through fetch too
    assert_eq!(Some(None), tree.fetch(Tid::new(3), &snapshot)?);

    Ok(())
}

#[test]
fn varlen_values_round_trip() -> tid_tree::Result<()> {
    let store = Store::new(Config::default());
    let tree = store.tree(2, AttrSpec::new(AttrLen::Variable, false))?;

    // mix of short-header and long-header sizes
    let values: Vec<Datum> = vec![
        Some(Slice::from(b"a".as_slice())),
        Some(Slice::from(vec![7u8; 126])),
        Some(Slice::from(vec![8u8; 127])),
        Some(Slice::from(vec![9u8; 1000])),
        Some(Slice::from(b"".as_slice())),
    ];
    let tids = tree.insert(&values, 1, 0)?;

    let snapshot = Snapshot::new(2, 1);

    // every element of the run fetches back byte-identical to what a
    // scan emits at the same position
    let rows = tree
        .scan(Tid::new(1), snapshot)?
        .collect::<tid_tree::Result<Vec<_>>>()?;
    assert_eq!(values.len(), rows.len());

    for (k, tid) in tids.iter().enumerate() {
        let fetched = tree.fetch(*tid, &snapshot)?.expect("tid exists");
        assert_eq!(values[k], fetched);
        assert_eq!(rows[k].1, fetched);
    }

    Ok(())
}

#[test]
fn empty_tree_scans_inert() -> tid_tree::Result<()> {
    let (_store, tree) = int_store()?;

    let snapshot = Snapshot::new(1, 0);
    assert_eq!(0, tree.scan(Tid::MIN, snapshot)?.count());
    assert_eq!(None, tree.fetch(Tid::new(5), &snapshot)?);

    Ok(())
}

#[test]
fn scan_from_past_the_end_is_empty() -> tid_tree::Result<()> {
    let (_store, tree) = int_store()?;
    tree.insert(&[int_datum(1), int_datum(2)], 1, 0)?;

    let snapshot = Snapshot::new(2, 1);
    assert_eq!(0, tree.scan(Tid::new(100), snapshot)?.count());

    Ok(())
}

#[test]
fn last_tid_on_empty_tree_is_min() -> tid_tree::Result<()> {
    let (_store, tree) = int_store()?;
    assert_eq!(Tid::MIN, tree.last_tid()?);
    Ok(())
}

#[test]
fn oversized_datum_is_rejected() -> tid_tree::Result<()> {
    let store = Store::new(Config::default());
    let tree = store.tree(1, AttrSpec::new(AttrLen::Variable, false))?;

    let huge = vec![1u8; store.config().max_datum_size + 1];
    let result = tree.insert(&[Some(Slice::from(huge))], 1, 0);
    assert!(matches!(result, Err(tid_tree::Error::DatumTooLarge(_))));

    Ok(())
}
