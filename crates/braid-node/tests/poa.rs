//! Three PoA signers sharing one manager on a manual clock: the in-turn
//! signer lands the block on schedule, out-of-turn signers come a few
//! seconds late and lose.
//!
//! Run with:
//!   cargo test -p braid-node --test poa

mod common;

use std::rc::Rc;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::SeedableRng;

use braid_core::settings::{ConsensusSettings, PoaSettings, PoaSignerSettings, Settings};
use braid_crypto::PoaKeyPair;
use braid_events::ManualReactor;
use braid_node::PoaBlockProducer;
use braid_storage::StateDb;

use common::start_node_at;

const AVG: u64 = 10;

fn poa_settings(keys: &[PoaKeyPair]) -> Settings {
    let mut s = Settings::unittests();
    s.avg_time_between_blocks = AVG;
    s.consensus = ConsensusSettings::Poa(PoaSettings {
        signers: keys
            .iter()
            .map(|k| PoaSignerSettings {
                public_key: k.public_key.clone(),
            })
            .collect(),
        wait_sync_delay: 5,
    });
    s
}

#[test]
fn in_turn_signer_wins_each_height() {
    let keys: Vec<PoaKeyPair> = (0..3).map(|_| PoaKeyPair::generate()).collect();
    let signer_ids: Vec<_> = keys.iter().map(|k| k.signer_id).collect();
    let settings = poa_settings(&keys);
    let g = settings.genesis_timestamp;

    let reactor = Rc::new(ManualReactor::new(g));
    let node = start_node_at(settings, StateDb::temporary().unwrap(), reactor.clone());
    node.manager.borrow_mut().set_synced(true);

    let producers: Vec<PoaBlockProducer> = keys
        .into_iter()
        .enumerate()
        .map(|(i, k)| {
            PoaBlockProducer::with_rng(node.manager.clone(), k, StdRng::seed_from_u64(i as u64)).unwrap()
        })
        .collect();
    let mut indices: Vec<usize> = producers.iter().map(|p| p.signer_index()).collect();
    indices.sort();
    assert_eq!(indices, vec![0, 1, 2]);
    for p in &producers {
        p.start();
    }

    // Height 1 belongs to index 1; the others are due at g+11..=g+13.
    reactor.advance_to(g + 15);
    {
        let m = node.manager.borrow();
        let best = m.get_best_block().unwrap();
        assert_eq!(best.height, 1);
        assert_eq!(best.timestamp, g + (AVG as i64));
        assert_eq!(best.weight, 2.0);

        let in_turn = producers.iter().position(|p| p.signer_index() == 1).unwrap();
        assert_eq!(best.poa.as_ref().unwrap().signer_id, signer_ids[in_turn]);

        let rivals: Vec<_> = m
            .store()
            .block_tips()
            .iter()
            .filter(|h| **h != best.hash)
            .map(|h| m.get_vertex(h).unwrap().as_block().unwrap().clone())
            .collect();
        assert_eq!(rivals.len(), 2);
        for rival in rivals {
            assert_eq!(rival.height, 1);
            assert_eq!(rival.weight, 1.0);
            assert!((g + 11..=g + 13).contains(&rival.timestamp));
            assert!(m.get_metadata(&rival.hash).unwrap().is_voided());
        }
    }

    // Height 2 belongs to index 2, due one interval after the first block.
    reactor.advance_to(g + 25);
    {
        let m = node.manager.borrow();
        let best = m.get_best_block().unwrap();
        assert_eq!(best.height, 2);
        assert_eq!(best.timestamp, g + 2 * AVG as i64);
        let in_turn = producers.iter().position(|p| p.signer_index() == 2).unwrap();
        assert_eq!(best.poa.as_ref().unwrap().signer_id, signer_ids[in_turn]);
    }

    for p in &producers {
        p.stop();
    }
}

#[test]
fn block_template_starts_after_the_genesis_transactions() {
    let keys = vec![PoaKeyPair::generate()];
    let settings = poa_settings(&keys);
    let g = settings.genesis_timestamp;
    let node = start_node_at(settings, StateDb::temporary().unwrap(), Rc::new(ManualReactor::new(g)));

    let template = node.manager.borrow().generate_block_template(None).unwrap();
    assert_eq!(template.height, 1);
    assert_eq!(template.timestamp_min, g + 3);
    assert_eq!(template.parent, node.genesis_block);
}

#[test]
fn producer_idles_until_synced() {
    let keys = vec![PoaKeyPair::generate()];
    let settings = poa_settings(&keys);
    let g = settings.genesis_timestamp;
    let reactor = Rc::new(ManualReactor::new(g));
    let node = start_node_at(settings, StateDb::temporary().unwrap(), reactor.clone());

    let producer = PoaBlockProducer::new(node.manager.clone(), keys.into_iter().next().unwrap()).unwrap();
    producer.start();
    reactor.advance(Duration::from_secs(60));
    assert_eq!(node.best(), node.genesis_block);

    node.manager.borrow_mut().set_synced(true);
    // The sync check at g+65 flips the phase; the tick at g+70 finds the
    // block overdue and produces it at once.
    reactor.advance(Duration::from_secs(AVG));
    assert_eq!(node.manager.borrow().get_best_block().unwrap().height, 1);
    producer.stop();
}
