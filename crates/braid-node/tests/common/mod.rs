//! Shared fixtures for the node integration tests: a manager on a manual
//! clock with an event recorder, plus builders for hand-made vertices.

#![allow(dead_code)]

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::Arc;

use braid_consensus::tokens_issued_per_block;
use braid_core::settings::Settings;
use braid_core::types::{Amount, Timestamp, VertexHash};
use braid_core::vertex::{BlockData, PowAlgorithm, TxData, TxInput, TxOutput, Vertex, VertexLike};
use braid_crypto::finalize_hash;
use braid_events::{Event, EventBus, ManualReactor};
use braid_genesis::genesis_vertices;
use braid_node::{Manager, SharedManager};
use braid_storage::StateDb;

pub struct Node {
    pub manager: SharedManager,
    pub reactor: Rc<ManualReactor>,
    pub events: Rc<RefCell<Vec<Event>>>,
    pub genesis_block: VertexHash,
    pub genesis_txs: [VertexHash; 2],
}

impl Node {
    /// Drain queued deliveries and hand back everything recorded so far.
    pub fn take_events(&self) -> Vec<Event> {
        self.reactor.run_pending();
        std::mem::take(&mut *self.events.borrow_mut())
    }

    pub fn submit(&self, vertex: &Vertex) -> bool {
        self.manager.borrow_mut().submit_vertex(vertex.clone())
    }

    pub fn voided_by(&self, hash: &VertexHash) -> std::collections::BTreeSet<VertexHash> {
        self.manager.borrow().get_metadata(hash).unwrap().voided_by.clone()
    }

    pub fn best(&self) -> VertexHash {
        self.manager.borrow().get_best_block().unwrap().hash
    }

    pub fn settings(&self) -> Arc<Settings> {
        self.manager.borrow().settings().clone()
    }
}

/// Unit-test settings with proof-of-work checks off.
pub fn test_mode_settings() -> Settings {
    let mut s = Settings::unittests();
    s.test_mode = true;
    s
}

/// A started manager whose clock sits well past genesis.
pub fn start_node(settings: Settings, db: StateDb) -> Node {
    let reactor = Rc::new(ManualReactor::new(settings.genesis_timestamp + 10_000));
    start_node_at(settings, db, reactor)
}

pub fn start_node_at(settings: Settings, db: StateDb, reactor: Rc<ManualReactor>) -> Node {
    let genesis = genesis_vertices(&settings);
    let bus = EventBus::new(reactor.clone());
    let events = Rc::new(RefCell::new(Vec::new()));
    let sink = events.clone();
    bus.subscribe_all(move |e: &Event| sink.borrow_mut().push(e.clone()));

    let manager = Manager::new(Arc::new(settings), db, reactor.clone(), bus).into_shared();
    manager.borrow_mut().start().unwrap();
    let node = Node {
        manager,
        reactor,
        events,
        genesis_block: genesis.block.hash(),
        genesis_txs: [genesis.txs[0].hash(), genesis.txs[1].hash()],
    };
    node.take_events();
    node
}

pub fn tx(
    parents: [VertexHash; 2],
    inputs: Vec<TxInput>,
    value: Amount,
    weight: f64,
    timestamp: Timestamp,
) -> Vertex {
    tx_outputs(parents, inputs, &[value], weight, timestamp)
}

/// A transaction paying one output per entry of `values`.
pub fn tx_outputs(
    parents: [VertexHash; 2],
    inputs: Vec<TxInput>,
    values: &[Amount],
    weight: f64,
    timestamp: Timestamp,
) -> Vertex {
    let mut v = Vertex::Transaction(TxData {
        hash: VertexHash::ZERO,
        parents: parents.to_vec(),
        weight,
        timestamp,
        nonce: 0,
        inputs,
        outputs: values
            .iter()
            .map(|value| TxOutput {
                value: *value,
                script: vec![1],
            })
            .collect(),
    });
    finalize_hash(&mut v);
    v
}

/// Score of an integrated block.
pub fn score(node: &Node, hash: &VertexHash) -> braid_core::types::Work {
    node.manager.borrow().get_metadata(hash).unwrap().score
}

pub fn spend(tx_id: VertexHash, index: u8) -> TxInput {
    TxInput {
        tx_id,
        index,
        data: vec![],
    }
}

pub fn block(
    settings: &Settings,
    parent: VertexHash,
    tx_parents: [VertexHash; 2],
    height: u64,
    weight: f64,
    timestamp: Timestamp,
) -> Vertex {
    let mut v = Vertex::Block(BlockData {
        hash: VertexHash::ZERO,
        parents: vec![parent, tx_parents[0], tx_parents[1]],
        weight,
        timestamp,
        nonce: 0,
        height,
        outputs: vec![TxOutput {
            value: tokens_issued_per_block(settings, height),
            script: vec![2],
        }],
        algorithm: PowAlgorithm::Sha3,
        data: vec![],
        poa: None,
    });
    finalize_hash(&mut v);
    v
}
