//! Restarting a node on the same data directory rebuilds the same DAG
//! state from the persisted vertices.
//!
//! Run with:
//!   cargo test -p braid-node --test replay

mod common;

use std::collections::BTreeSet;

use braid_core::vertex::VertexLike;
use braid_events::Event;
use braid_storage::StateDb;

use common::{block, spend, start_node, test_mode_settings, tx};

#[test]
fn restart_restores_best_chain_and_voids() {
    let dir = tempfile::tempdir().unwrap();
    let settings = test_mode_settings();
    let g = settings.genesis_timestamp;
    let tokens = settings.genesis_tokens;

    let (best, t, b2, vertex_count) = {
        let node = start_node(settings.clone(), StateDb::open(dir.path()).unwrap());
        let gtxs = node.genesis_txs;
        let b1 = block(&settings, node.genesis_block, gtxs, 1, 1.0, g + 10);
        let t = tx(gtxs, vec![spend(node.genesis_block, 0)], tokens, 1.0, g + 20);
        let b2 = block(&settings, b1.hash(), [t.hash(), gtxs[1]], 2, 1.0, g + 30);
        let b2x = block(&settings, b1.hash(), gtxs, 2, 1.0, g + 31);
        let b3x = block(&settings, b2x.hash(), gtxs, 3, 2.0, g + 41);
        for v in [&b1, &t, &b2, &b2x, &b3x] {
            assert!(node.submit(v));
        }
        assert_eq!(node.best(), b3x.hash());
        assert_eq!(node.voided_by(&t.hash()), BTreeSet::from([t.hash()]));

        node.manager.borrow_mut().stop().unwrap();
        let count = node.manager.borrow().store().len();
        (b3x.hash(), t.hash(), b2.hash(), count)
    };

    let node = start_node(settings, StateDb::open(dir.path()).unwrap());
    let m = node.manager.borrow();
    assert_eq!(m.store().len(), vertex_count);
    assert_eq!(m.get_best_block().unwrap().hash, best);
    assert_eq!(m.get_metadata(&t).unwrap().voided_by, BTreeSet::from([t]));
    assert!(m.get_metadata(&b2).unwrap().voided_by.contains(&b2));
    assert_eq!(m.get_metadata(&b2).unwrap().confirms, vec![t]);
}

#[test]
fn start_is_announced_once() {
    let node = start_node(test_mode_settings(), StateDb::temporary().unwrap());
    node.manager.borrow_mut().start().unwrap();
    assert!(!node.take_events().contains(&Event::ManagerStart));

    node.manager.borrow_mut().stop().unwrap();
    assert!(node.take_events().contains(&Event::ManagerStop));
    assert!(!node.manager.borrow().is_started());
    assert!(!node.manager.borrow().can_start_producing());
}
