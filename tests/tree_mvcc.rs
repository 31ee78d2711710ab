use tid_tree::{
    undo::{LockMode, UndoKind},
    AttrLen, AttrSpec, Config, Datum, Slice, Snapshot, Store, Tid, UpdateResult,
};
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
fn delete_respects_snapshots() -> tid_tree::Result<()> {
    let (_store, tree) = int_store()?;

    // insert at an explicit TID, as a sibling column tree would
    let (tids, _) =
        tree.insert_with(&[int_datum(10)], Some(&[Tid::new(5)]), 1, 0, None)?;
    assert_eq!(vec![Tid::new(5)], tids);

    // xid 2 deletes it
    let deleter = Snapshot::new(2, 1);
    assert_eq!(UpdateResult::Ok, tree.delete(Tid::new(5), 2, 0, &deleter)?);

    // a snapshot that sees the delete finds nothing
    let after = Snapshot::new(3, 2);
    assert_eq!(0, tree.scan(Tid::MIN, after)?.count());
    assert_eq!(None, tree.fetch(Tid::new(5), &after)?);

    // an older snapshot still sees the row
    let before = Snapshot::new(4, 1);
    let rows = tree
        .scan(Tid::MIN, before)?
        .collect::<tid_tree::Result<Vec<_>>>()?;
    assert_eq!(1, rows.len());
    assert_eq!(Tid::new(5), rows[0].0);
    assert_eq!(10, as_int(&rows[0].1));

    Ok(())
}

#[test]
fn delete_conflicts_are_reported_without_change() -> tid_tree::Result<()> {
    let (_store, tree) = int_store()?;
    let tids = tree.insert(&[int_datum(1)], 1, 0)?;
    let tid = tids[0];

    // delete by xid 2
    assert_eq!(UpdateResult::Ok, tree.delete(tid, 2, 0, &Snapshot::new(2, 1))?);

    // deleting again in the same transaction: self-modified
    assert_eq!(
        UpdateResult::SelfModified,
        tree.delete(tid, 2, 0, &Snapshot::new(2, 1))?,
    );

    // another transaction that sees the delete: already deleted
    assert_eq!(
        UpdateResult::Deleted,
        tree.delete(tid, 3, 0, &Snapshot::new(3, 2))?,
    );

    // a transaction that does not see the deleter: being modified
    assert_eq!(
        UpdateResult::BeingModified,
        tree.delete(tid, 4, 0, &Snapshot::new(4, 1))?,
    );

    // a missing TID is the caller's bug
    assert!(matches!(
        tree.delete(Tid::new(99), 2, 0, &Snapshot::new(2, 1)),
        Err(tid_tree::Error::ItemNotFound(_)),
    ));

    Ok(())
}

#[test]
fn update_splits_array_and_moves_row_right() -> tid_tree::Result<()> {
    let (_store, tree) = int_store()?;

    // one array-coalesced run of ten rows, values are tid + 100
    let values: Vec<Datum> = (1..=10u64).map(|i| int_datum(100 + i)).collect();
    tree.insert(&values, 1, 0)?;

    let updater = Snapshot::new(2, 1);
    let (result, new_tid) = tree.update(Tid::new(3), int_datum(99), 2, 0, &updater)?;
    assert_eq!(UpdateResult::Ok, result);

    // the new version lands one past the previous rightmost TID
    assert_eq!(Some(Tid::new(11)), new_tid);

    let snapshot = Snapshot::new(3, 2);
    let rows = tree
        .scan(Tid::MIN, snapshot)?
        .collect::<tid_tree::Result<Vec<_>>>()?;

    let tids: Vec<u64> = rows.iter().map(|(t, _)| t.raw()).collect();
    assert_eq!(vec![1, 2, 4, 5, 6, 7, 8, 9, 10, 11], tids);

    for (tid, value) in &rows {
        if *tid == Tid::new(11) {
            assert_eq!(99, as_int(value));
        } else {
            assert_eq!(100 + tid.raw(), as_int(value));
        }
    }

    // an old snapshot still sees the original row version
    let before = Snapshot::new(4, 1);
    let fetched = tree.fetch(Tid::new(3), &before)?.expect("old version");
    assert_eq!(103, as_int(&fetched));
    assert_eq!(None, tree.fetch(Tid::new(11), &before)?);

    Ok(())
}

#[test]
fn update_conflict_surfaces_without_new_version() -> tid_tree::Result<()> {
    let (_store, tree) = int_store()?;
    let tids = tree.insert(&[int_datum(7)], 1, 0)?;
    let tid = tids[0];

    tree.delete(tid, 2, 0, &Snapshot::new(2, 1))?;

    let (result, new_tid) = tree.update(tid, int_datum(8), 3, 0, &Snapshot::new(3, 2))?;
    assert_eq!(UpdateResult::Deleted, result);
    assert_eq!(None, new_tid);

    // nothing was inserted
    assert_eq!(Tid::new(2), tree.last_tid()?);

    Ok(())
}

#[test]
fn lock_tuple_chains_undo_and_rejects_moved_rows() -> tid_tree::Result<()> {
    let (store, tree) = int_store()?;
    let (tids, insert_undo) = tree.insert_with(&[int_datum(1)], None, 1, 0, None)?;
    let tid = tids[0];

    assert_eq!(
        UpdateResult::Ok,
        tree.lock_tuple(tid, 2, 0, LockMode::Exclusive, &Snapshot::new(2, 1))?,
    );

    // the lock record chains back to the insert record
    let locked = tree.fetch(tid, &Snapshot::new(3, 2))?;
    assert!(locked.is_some(), "lock must not hide the row");

    let head = store
        .undo_log()
        .lookup(store.undo_log().oldest_ptr())
        .expect("insert record retained");
    assert!(matches!(head.kind, UndoKind::Insert { .. }));
    assert_eq!(insert_undo, store.undo_log().oldest_ptr());

    // locking a deleted tuple is a hard error
    tree.delete(tid, 3, 0, &Snapshot::new(3, 2))?;
    assert!(matches!(
        tree.lock_tuple(tid, 4, 0, LockMode::Share, &Snapshot::new(4, 3)),
        Err(tid_tree::Error::LockDeleted(_)),
    ));

    Ok(())
}

#[test]
fn updated_row_cannot_be_locked() -> tid_tree::Result<()> {
    let (_store, tree) = int_store()?;
    let tids = tree.insert(&[int_datum(1)], 1, 0)?;
    let tid = tids[0];

    let (result, _) = tree.update(tid, int_datum(2), 2, 0, &Snapshot::new(2, 1))?;
    assert_eq!(UpdateResult::Ok, result);

    assert!(matches!(
        tree.lock_tuple(tid, 3, 0, LockMode::Share, &Snapshot::new(3, 2)),
        Err(tid_tree::Error::LockUpdated(_)),
    ));

    Ok(())
}

#[test]
fn insert_invisible_to_older_snapshots() -> tid_tree::Result<()> {
    let (_store, tree) = int_store()?;
    tree.insert(&[int_datum(1)], 5, 0)?;

    // snapshot from before xid 5 committed
    let old = Snapshot::new(3, 3);
    assert_eq!(0, tree.scan(Tid::MIN, old)?.count());

    // the inserting transaction sees its own row
    let own = Snapshot::new(5, 3);
    assert_eq!(1, tree.scan(Tid::MIN, own)?.count());

    Ok(())
}
