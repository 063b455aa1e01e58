use braid_core::error::RejectReason;
use braid_core::settings::Settings;
use braid_core::types::{Amount, VertexHash};
use braid_core::vertex::{BlockData, TxData, TxOutput, Vertex, VertexLike};
use braid_crypto::{vertex_hash, verify_pow};
use braid_storage::VertexStore;
use std::collections::BTreeSet;
use std::sync::Arc;

use crate::poa::PoaSigners;

/// Structural and cryptographic checks run after admission. Implementations
/// see only already-accepted vertices through `store`.
pub trait VertexVerifier {
    fn verify(&self, store: &VertexStore, vertex: &Vertex) -> Result<(), RejectReason>;
}

/// Default verifier: parent shape, timestamps, heights, inputs and outputs,
/// hash integrity and the network's proof (PoW or PoA signature).
#[derive(Clone, Debug)]
pub struct StructuralVerifier {
    settings: Arc<Settings>,
    signers: Option<PoaSigners>,
}

impl StructuralVerifier {
    pub fn new(settings: Arc<Settings>) -> Self {
        let signers = settings.poa().map(PoaSigners::new);
        Self { settings, signers }
    }

    fn verify_block(&self, store: &VertexStore, block: &BlockData) -> Result<(), RejectReason> {
        // ── Parents: [block, tx, tx] ─────────────────────────────────────────
        if !block.has_expected_parent_count() {
            return Err(RejectReason::InvalidParents(format!(
                "block needs 3 parents, got {}",
                block.parents.len()
            )));
        }
        let parent = block
            .block_parent()
            .and_then(|p| store.get_block(&p))
            .ok_or_else(|| RejectReason::InvalidParents("first parent must be a block".into()))?;
        for tx_parent in block.tx_parents() {
            if !store.get(tx_parent).map_or(false, Vertex::is_transaction) {
                return Err(RejectReason::InvalidParents(format!(
                    "{} is not a transaction",
                    tx_parent.short()
                )));
            }
        }

        // ── Height and distance to the parent block ──────────────────────────
        if block.height != parent.height + 1 {
            return Err(RejectReason::InvalidHeight {
                expected: parent.height + 1,
                got: block.height,
            });
        }
        let distance = block.timestamp - parent.timestamp;
        if distance > self.settings.max_distance_between_blocks {
            return Err(RejectReason::BlockTooFarFromParent {
                distance,
                max: self.settings.max_distance_between_blocks,
            });
        }

        self.verify_outputs(&block.outputs, false)?;

        // ── Proof ────────────────────────────────────────────────────────────
        match &self.signers {
            Some(signers) => signers.verify_block(block),
            None => {
                if block.poa.is_some() {
                    return Err(RejectReason::UnexpectedPoaSignature);
                }
                Ok(())
            }
        }
    }

    fn verify_tx(&self, store: &VertexStore, tx: &TxData) -> Result<(), RejectReason> {
        // ── Parents: exactly two transactions ────────────────────────────────
        if !tx.has_expected_parent_count() {
            return Err(RejectReason::InvalidParents(format!(
                "transaction needs 2 parents, got {}",
                tx.parents.len()
            )));
        }
        for parent in &tx.parents {
            if !store.get(parent).map_or(false, Vertex::is_transaction) {
                return Err(RejectReason::InvalidParents(format!(
                    "{} is not a transaction",
                    parent.short()
                )));
            }
        }

        // ── Inputs ───────────────────────────────────────────────────────────
        if tx.inputs.len() > self.settings.max_num_inputs {
            return Err(RejectReason::TooManyInputs {
                max: self.settings.max_num_inputs,
                got: tx.inputs.len(),
            });
        }
        let mut seen: BTreeSet<(VertexHash, u8)> = BTreeSet::new();
        let mut total_in: Amount = 0;
        for input in &tx.inputs {
            if !seen.insert((input.tx_id, input.index)) {
                return Err(RejectReason::DuplicateInput {
                    tx_id: input.tx_id,
                    index: input.index,
                });
            }
            let spent = store
                .get(&input.tx_id)
                .ok_or(RejectReason::MissingInput { tx_id: input.tx_id })?;
            let output = spent.outputs().get(input.index as usize).ok_or(
                RejectReason::InvalidInputIndex {
                    tx_id: input.tx_id,
                    index: input.index,
                },
            )?;
            total_in = total_in
                .checked_add(output.value)
                .ok_or(RejectReason::AmountOverflow)?;
        }

        // ── Outputs and balance ──────────────────────────────────────────────
        let total_out = self.verify_outputs(&tx.outputs, true)?;
        if total_in != total_out {
            return Err(RejectReason::InputOutputMismatch {
                inputs: total_in,
                outputs: total_out,
            });
        }

        // ── Proof ────────────────────────────────────────────────────────────
        if !self.settings.test_mode && !verify_pow(&Vertex::Transaction(tx.clone())) {
            return Err(RejectReason::InvalidPow);
        }
        Ok(())
    }

    /// Count limit, positive values, no overflow. Returns the total.
    fn verify_outputs(&self, outputs: &[TxOutput], required: bool) -> Result<Amount, RejectReason> {
        if required && outputs.is_empty() {
            return Err(RejectReason::NoOutputs);
        }
        if outputs.len() > self.settings.max_num_outputs {
            return Err(RejectReason::TooManyOutputs {
                max: self.settings.max_num_outputs,
                got: outputs.len(),
            });
        }
        let mut total: Amount = 0;
        for output in outputs {
            if output.value == 0 {
                return Err(RejectReason::ZeroOutput);
            }
            total = total
                .checked_add(output.value)
                .ok_or(RejectReason::AmountOverflow)?;
        }
        Ok(total)
    }
}

impl VertexVerifier for StructuralVerifier {
    fn verify(&self, store: &VertexStore, vertex: &Vertex) -> Result<(), RejectReason> {
        // ── 1. Hash integrity ────────────────────────────────────────────────
        if vertex_hash(vertex) != vertex.hash() {
            return Err(RejectReason::HashMismatch);
        }

        // ── 2. No repeated parents ───────────────────────────────────────────
        let unique: BTreeSet<&VertexHash> = vertex.parents().iter().collect();
        if unique.len() != vertex.parents().len() {
            return Err(RejectReason::InvalidParents("repeated parent".into()));
        }

        // ── 3. Strictly after every dependency ───────────────────────────────
        for dep in vertex.dependencies() {
            if let Some(dep_vertex) = store.get(&dep) {
                if vertex.timestamp() <= dep_vertex.timestamp() {
                    return Err(RejectReason::TimestampNotAfterDependency {
                        timestamp: vertex.timestamp(),
                        min: dep_vertex.timestamp() + 1,
                    });
                }
            }
        }

        // ── 4. Kind-specific structure and proof ─────────────────────────────
        match vertex {
            Vertex::Block(block) => {
                self.verify_block(store, block)?;
                if self.signers.is_none() && !self.settings.test_mode && !verify_pow(vertex) {
                    return Err(RejectReason::InvalidPow);
                }
                Ok(())
            }
            Vertex::Transaction(tx) => self.verify_tx(store, tx),
        }
    }
}

/// Block rewards spent by `vertex` must be buried under at least
/// `reward_spend_min_blocks` best-chain blocks. The genesis premine is
/// exempt.
pub fn verify_reward_lock(settings: &Settings, store: &VertexStore, vertex: &Vertex) -> Result<(), RejectReason> {
    let best_height = store.best_height().unwrap_or(0);
    for input in vertex.inputs() {
        let Some(block) = store.get_block(&input.tx_id) else {
            continue;
        };
        if store.is_genesis(&block.hash) {
            continue;
        }
        let unlock_height = block.height.saturating_add(settings.reward_spend_min_blocks);
        if best_height < unlock_height {
            return Err(RejectReason::RewardLocked {
                block: block.hash,
                unlock_height,
                best_height,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::metadata::VertexMetadata;
    use braid_core::vertex::{PowAlgorithm, TxInput};
    use braid_crypto::finalize_hash;
    use braid_storage::StateDb;

    fn settings() -> Arc<Settings> {
        let mut s = Settings::unittests();
        s.test_mode = true;
        Arc::new(s)
    }

    fn hashed(mut v: Vertex) -> Vertex {
        finalize_hash(&mut v);
        v
    }

    fn out(value: Amount) -> TxOutput {
        TxOutput { value, script: vec![0xab] }
    }

    fn genesis_tx(ts: i64, value: Amount) -> Vertex {
        hashed(Vertex::Transaction(TxData {
            hash: VertexHash::ZERO,
            parents: vec![],
            weight: 1.0,
            timestamp: ts,
            nonce: ts as u64,
            inputs: vec![],
            outputs: vec![out(value)],
        }))
    }

    struct Fixture {
        store: VertexStore,
        block: VertexHash,
        t1: VertexHash,
        t2: VertexHash,
    }

    fn fixture() -> Fixture {
        let mut store = VertexStore::new(StateDb::temporary().unwrap());
        let block = hashed(Vertex::Block(BlockData {
            hash: VertexHash::ZERO,
            parents: vec![],
            weight: 1.0,
            timestamp: 100,
            nonce: 0,
            height: 0,
            outputs: vec![out(1_000)],
            algorithm: PowAlgorithm::Sha3,
            data: vec![],
            poa: None,
        }));
        let t1 = genesis_tx(101, 50);
        let t2 = genesis_tx(102, 70);
        let hashes = (block.hash(), t1.hash(), t2.hash());
        for v in [block, t1, t2] {
            let h = v.hash();
            store.put(v, VertexMetadata::new(h, 2, 0, 0)).unwrap();
        }
        Fixture {
            store,
            block: hashes.0,
            t1: hashes.1,
            t2: hashes.2,
        }
    }

    fn spend(f: &Fixture, inputs: Vec<TxInput>, outputs: Vec<TxOutput>, ts: i64) -> Vertex {
        hashed(Vertex::Transaction(TxData {
            hash: VertexHash::ZERO,
            parents: vec![f.t1, f.t2],
            weight: 1.0,
            timestamp: ts,
            nonce: 0,
            inputs,
            outputs,
        }))
    }

    fn input(tx_id: VertexHash, index: u8) -> TxInput {
        TxInput { tx_id, index, data: vec![] }
    }

    fn child_block(f: &Fixture, height: u64, ts: i64, outputs: Vec<TxOutput>) -> Vertex {
        hashed(Vertex::Block(BlockData {
            hash: VertexHash::ZERO,
            parents: vec![f.block, f.t1, f.t2],
            weight: 1.0,
            timestamp: ts,
            nonce: 0,
            height,
            outputs,
            algorithm: PowAlgorithm::Sha3,
            data: vec![],
            poa: None,
        }))
    }

    #[test]
    fn balanced_spend_is_accepted() {
        let f = fixture();
        let v = StructuralVerifier::new(settings());
        let tx = spend(&f, vec![input(f.t1, 0), input(f.t2, 0)], vec![out(100), out(20)], 200);
        assert_eq!(v.verify(&f.store, &tx), Ok(()));
    }

    #[test]
    fn tampered_hash_is_rejected() {
        let f = fixture();
        let v = StructuralVerifier::new(settings());
        let mut tx = spend(&f, vec![input(f.t1, 0)], vec![out(50)], 200);
        tx.set_hash(VertexHash::from_bytes([9; 32]));
        assert_eq!(v.verify(&f.store, &tx), Err(RejectReason::HashMismatch));
    }

    #[test]
    fn input_errors() {
        let f = fixture();
        let v = StructuralVerifier::new(settings());

        let unbalanced = spend(&f, vec![input(f.t1, 0)], vec![out(49)], 200);
        assert_eq!(
            v.verify(&f.store, &unbalanced),
            Err(RejectReason::InputOutputMismatch { inputs: 50, outputs: 49 })
        );

        let bad_index = spend(&f, vec![input(f.t1, 3)], vec![out(50)], 200);
        assert_eq!(
            v.verify(&f.store, &bad_index),
            Err(RejectReason::InvalidInputIndex { tx_id: f.t1, index: 3 })
        );

        let twice = spend(&f, vec![input(f.t1, 0), input(f.t1, 0)], vec![out(100)], 200);
        assert_eq!(
            v.verify(&f.store, &twice),
            Err(RejectReason::DuplicateInput { tx_id: f.t1, index: 0 })
        );

        let ghost = VertexHash::from_bytes([7; 32]);
        let missing = spend(&f, vec![input(ghost, 0)], vec![out(1)], 200);
        assert_eq!(v.verify(&f.store, &missing), Err(RejectReason::MissingInput { tx_id: ghost }));

        let empty = spend(&f, vec![], vec![], 200);
        assert_eq!(v.verify(&f.store, &empty), Err(RejectReason::NoOutputs));
    }

    #[test]
    fn timestamp_must_follow_parents() {
        let f = fixture();
        let v = StructuralVerifier::new(settings());
        let tx = spend(&f, vec![input(f.t1, 0)], vec![out(50)], 102);
        assert_eq!(
            v.verify(&f.store, &tx),
            Err(RejectReason::TimestampNotAfterDependency { timestamp: 102, min: 103 })
        );
    }

    #[test]
    fn block_height_and_distance() {
        let f = fixture();
        let v = StructuralVerifier::new(settings());
        assert_eq!(v.verify(&f.store, &child_block(&f, 1, 200, vec![out(10)])), Ok(()));
        assert_eq!(
            v.verify(&f.store, &child_block(&f, 2, 200, vec![out(10)])),
            Err(RejectReason::InvalidHeight { expected: 1, got: 2 })
        );
        let far = 100 + Settings::unittests().max_distance_between_blocks + 1;
        assert!(matches!(
            v.verify(&f.store, &child_block(&f, 1, far, vec![out(10)])),
            Err(RejectReason::BlockTooFarFromParent { .. })
        ));
        assert_eq!(
            v.verify(&f.store, &child_block(&f, 1, 200, vec![out(0)])),
            Err(RejectReason::ZeroOutput)
        );
    }

    #[test]
    fn block_parents_must_be_block_then_txs() {
        let f = fixture();
        let v = StructuralVerifier::new(settings());
        let swapped = hashed(Vertex::Block(BlockData {
            hash: VertexHash::ZERO,
            parents: vec![f.t1, f.block, f.t2],
            weight: 1.0,
            timestamp: 200,
            nonce: 0,
            height: 1,
            outputs: vec![out(10)],
            algorithm: PowAlgorithm::Sha3,
            data: vec![],
            poa: None,
        }));
        assert!(matches!(v.verify(&f.store, &swapped), Err(RejectReason::InvalidParents(_))));
    }

    #[test]
    fn block_reward_unlocks_after_enough_blocks() {
        let mut f = fixture();
        let s = settings();
        let lock = s.reward_spend_min_blocks;
        let tx = spend(&f, vec![input(f.block, 0)], vec![out(1_000)], 5_000);
        // Structurally fine either way.
        assert_eq!(StructuralVerifier::new(s.clone()).verify(&f.store, &tx), Ok(()));

        let mut tip = f.block;
        f.store.set_best_block(tip);
        for height in 1..=lock {
            assert_eq!(
                verify_reward_lock(&s, &f.store, &tx),
                Err(RejectReason::RewardLocked {
                    block: f.block,
                    unlock_height: lock,
                    best_height: height - 1,
                })
            );
            let next = hashed(Vertex::Block(BlockData {
                hash: VertexHash::ZERO,
                parents: vec![tip, f.t1, f.t2],
                weight: 1.0,
                timestamp: 200 + height as i64,
                nonce: 0,
                height,
                outputs: vec![out(10)],
                algorithm: PowAlgorithm::Sha3,
                data: vec![],
                poa: None,
            }));
            tip = next.hash();
            f.store.put(next, VertexMetadata::new(tip, 2, height, 0)).unwrap();
            f.store.set_best_block(tip);
        }
        assert_eq!(f.store.best_height(), Some(lock));
        assert_eq!(verify_reward_lock(&s, &f.store, &tx), Ok(()));
    }

    #[test]
    fn genesis_premine_is_never_locked() {
        let mut f = fixture();
        f.store.mark_genesis(f.block);
        f.store.set_best_block(f.block);
        let tx = spend(&f, vec![input(f.block, 0)], vec![out(1_000)], 5_000);
        assert_eq!(verify_reward_lock(&settings(), &f.store, &tx), Ok(()));
    }

    #[test]
    fn pow_is_enforced_outside_test_mode() {
        let f = fixture();
        let mut s = Settings::unittests();
        s.test_mode = false;
        let v = StructuralVerifier::new(Arc::new(s));
        let mut tx = spend(&f, vec![input(f.t1, 0)], vec![out(50)], 200);
        if let Vertex::Transaction(t) = &mut tx {
            t.weight = 64.0;
        }
        let tx = hashed(tx);
        assert_eq!(v.verify(&f.store, &tx), Err(RejectReason::InvalidPow));
    }
}
