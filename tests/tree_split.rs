use rand::{rngs::StdRng, RngCore, SeedableRng};
use tid_tree::{
    AttrLen, AttrSpec, BlockId, Config, Datum, Slice, Snapshot, Store, Tid,
};
use test_log::test;

const ATTNO: u16 = 1;

/// Collects the level-0 right-link chain, left to right.
fn leaf_chain(store: &Store) -> Vec<(BlockId, Tid, Tid, bool)> {
    let pool = store.pool();

    // find the leftmost leaf
    let mut leftmost = None;
    for raw in 0..pool.len() as u32 {
        let blk = BlockId::from_raw(raw);
        let handle = pool.get(blk).expect("allocated");
        let page = handle.read().expect("lock");
        if page.level() == 0 && page.lokey() == Tid::MIN {
            leftmost = Some(blk);
        }
    }

    let mut chain = Vec::new();
    let mut next = leftmost.expect("tree has a leftmost leaf");

    loop {
        let handle = pool.get(next).expect("allocated");
        let page = handle.read().expect("lock");
        chain.push((next, page.lokey(), page.hikey(), page.follow_right()));

        if !page.next().is_valid() {
            break;
        }
        next = page.next();
    }

    chain
}

fn incompressible_rows(n: usize, len: usize) -> Vec<Datum> {
    let mut rng = StdRng::seed_from_u64(0xBAD5_EED);

    (0..n)
        .map(|_| {
            let mut buf = vec![0u8; len];
            rng.fill_bytes(&mut buf);
            Some(Slice::from(buf))
        })
        .collect()
}

#[test]
fn leaf_split_preserves_full_scan() -> tid_tree::Result<()> {
    let store = Store::new(Config::default());
    let tree = store.tree(ATTNO, AttrSpec::new(AttrLen::Variable, false))?;

    // enough incompressible data for several leaves
    let values = incompressible_rows(60, 1000);
    let tids = tree.insert(&values, 1, 0)?;
    assert_eq!(60, tids.len());

    let chain = leaf_chain(&store);
    assert!(chain.len() >= 2, "expected a leaf split, got {chain:?}");

    let snapshot = Snapshot::new(2, 1);
    let rows = tree
        .scan(Tid::MIN, snapshot)?
        .collect::<tid_tree::Result<Vec<_>>>()?;

    assert_eq!(60, rows.len());
    for (k, (tid, value)) in rows.iter().enumerate() {
        assert_eq!(tids[k], *tid);
        assert_eq!(values[k], *value);
    }

    Ok(())
}

#[test]
fn deep_tree_keeps_every_row_once_in_order() -> tid_tree::Result<()> {
    let store = Store::new(Config::default());
    let tree = store.tree(ATTNO, AttrSpec::new(AttrLen::Variable, false))?;

    // Several thousand incompressible rows: hundreds of leaves, more
    // downlinks than one internal page holds, so the root splits too.
    let values = incompressible_rows(5000, 1000);

    // insert in a few batches, like a bulk load would
    let mut all_tids = Vec::new();
    for batch in values.chunks(1000) {
        all_tids.extend(tree.insert(batch, 1, 0)?);
    }

    let chain = leaf_chain(&store);
    assert!(
        chain.len() > 600,
        "expected hundreds of leaves, got {}",
        chain.len(),
    );

    // the whole key space is covered, in order, with no gaps
    assert_eq!(Tid::MIN, chain[0].1);
    assert_eq!(Tid::MAX_PLUS_ONE, chain.last().expect("non-empty").2);
    for pair in chain.windows(2) {
        let (_, _, hikey, follow_right) = pair[0];
        let (_, lokey, _, _) = pair[1];
        assert!(hikey == lokey || follow_right, "broken right-link chain");
    }

    // no split was left unparented
    assert!(chain.iter().all(|(_, _, _, fr)| !fr));

    // a full scan sees every row exactly once, in TID order
    let snapshot = Snapshot::new(2, 1);
    let rows = tree
        .scan(Tid::MIN, snapshot)?
        .collect::<tid_tree::Result<Vec<_>>>()?;

    assert_eq!(5000, rows.len());
    for (k, (tid, value)) in rows.iter().enumerate() {
        assert_eq!(all_tids[k], *tid, "row {k} out of order");
        assert_eq!(values[k], *value, "row {k} bytes differ");
    }

    // point lookups still resolve through the deeper tree
    assert_eq!(values[4321], tree.fetch(all_tids[4321], &snapshot)?.expect("exists"));
    assert_eq!(values[0], tree.fetch(all_tids[0], &snapshot)?.expect("exists"));

    assert_eq!(Tid::new(5001), tree.last_tid()?);

    Ok(())
}

#[test]
fn insert_after_split_continues_from_rightmost() -> tid_tree::Result<()> {
    let store = Store::new(Config::default());
    let tree = store.tree(ATTNO, AttrSpec::new(AttrLen::Variable, false))?;

    let first = incompressible_rows(40, 1000);
    let tids = tree.insert(&first, 1, 0)?;
    assert_eq!(Tid::new(40), *tids.last().expect("non-empty"));

    let second = incompressible_rows(3, 500);
    let more = tree.insert(&second, 1, 0)?;
    assert_eq!(vec![Tid::new(41), Tid::new(42), Tid::new(43)], more);

    let snapshot = Snapshot::new(2, 1);
    assert_eq!(43, tree.scan(Tid::MIN, snapshot)?.count());

    Ok(())
}
