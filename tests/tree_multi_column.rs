use tid_tree::{AttrLen, AttrSpec, Config, Datum, Slice, Snapshot, Store, Tid};
use test_log::test;

fn int_datum(value: u64) -> Datum {
    Some(Slice::from(value.to_le_bytes()))
}

fn as_int(datum: &Datum) -> u64 {
    let bytes = datum.as_ref().expect("non-null");
    u64::from_le_bytes(bytes.as_ref().try_into().expect("8 bytes"))
}

#[test]
fn sibling_columns_share_tids_and_undo() -> tid_tree::Result<()> {
    let store = Store::new(Config::default());
    let ids = store.tree(1, AttrSpec::new(AttrLen::Fixed(8), true))?;
    let names = store.tree(2, AttrSpec::new(AttrLen::Variable, false))?;

    // the first column assigns TIDs and creates the insert undo record
    let id_values: Vec<Datum> = (0..50u64).map(int_datum).collect();
    let (tids, undo) = ids.insert_with(&id_values, None, 1, 0, None)?;

    // sibling columns reuse both
    let name_values: Vec<Datum> = (0..50u64)
        .map(|i| Some(Slice::from(format!("row-{i}").as_bytes())))
        .collect();
    let (name_tids, name_undo) = names.insert_with(&name_values, Some(&tids), 1, 0, Some(undo))?;

    assert_eq!(tids, name_tids);
    assert_eq!(undo, name_undo);

    // both trees serve the same rows under the same snapshot
    let snapshot = Snapshot::new(2, 1);
    for (k, tid) in tids.iter().enumerate() {
        let id = ids.fetch(*tid, &snapshot)?.expect("row exists");
        assert_eq!(k as u64, as_int(&id));

        let name = names.fetch(*tid, &snapshot)?.expect("row exists");
        assert_eq!(
            format!("row-{k}").as_bytes(),
            name.as_ref().expect("non-null").as_ref(),
        );
    }

    // per-column trees stay independent structures
    assert_eq!(Tid::new(51), ids.last_tid()?);
    assert_eq!(Tid::new(51), names.last_tid()?);

    Ok(())
}

#[test]
fn conflicting_descriptor_is_rejected() -> tid_tree::Result<()> {
    let store = Store::new(Config::default());
    store.tree(1, AttrSpec::new(AttrLen::Fixed(8), true))?;

    assert!(matches!(
        store.tree(1, AttrSpec::new(AttrLen::Variable, false)),
        Err(tid_tree::Error::AttrSpecMismatch),
    ));

    Ok(())
}

#[test]
fn undo_records_chain_across_versions() -> tid_tree::Result<()> {
    let store = Store::new(Config::default());
    let tree = store.tree(1, AttrSpec::new(AttrLen::Fixed(8), true))?;

    let (tids, insert_undo) = tree.insert_with(&[int_datum(7)], None, 1, 0, None)?;
    let tid = tids[0];

    tree.delete(tid, 2, 0, &Snapshot::new(2, 1))?;

    // the delete undo record points back at the insert record
    let mut delete_rec = None;
    let log = store.undo_log();
    let mut ptr = insert_undo;
    loop {
        ptr = tid_tree::UndoPtr::from_raw(ptr.raw() + 1);
        match log.lookup(ptr) {
            Some(rec) => {
                if matches!(rec.kind, tid_tree::undo::UndoKind::Delete) && rec.tid == tid {
                    delete_rec = Some(rec);
                    break;
                }
            }
            None => break,
        }
    }

    let delete_rec = delete_rec.expect("delete record exists");
    assert_eq!(insert_undo, delete_rec.prev);
    assert_eq!(2, delete_rec.xid);

    Ok(())
}
