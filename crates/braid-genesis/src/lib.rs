//! braid-genesis
//!
//! Builds the genesis vertices of a network from its `Settings` and writes
//! them straight into a `VertexStore`, bypassing validation (genesis
//! vertices have no parents and are trusted by definition).
//!
//! The genesis set is one block and two transactions:
//!
//! 1. Genesis block        height 0, issues `genesis_tokens` to `genesis_output_script`
//! 2. Genesis transaction  `genesis_timestamp + 1`, no inputs or outputs
//! 3. Genesis transaction  `genesis_timestamp + 2`, no inputs or outputs
//!
//! The two transactions are the first pair of transaction parents every
//! later vertex builds on. Both count as confirmed by the genesis block.

use braid_core::error::BraidError;
use braid_core::metadata::VertexMetadata;
use braid_core::settings::Settings;
use braid_core::types::VertexHash;
use braid_core::vertex::{BlockData, PowAlgorithm, TxData, TxOutput, Vertex, VertexLike};
use braid_core::weight::weight_to_work;
use braid_core::GENESIS_BLOCK_HEIGHT;
use braid_crypto::finalize_hash;
use braid_storage::VertexStore;
use tracing::info;

/// The genesis vertices, hashes final.
#[derive(Clone, Debug, PartialEq)]
pub struct GenesisVertices {
    pub block: Vertex,
    pub txs: [Vertex; 2],
}

/// Hashes of the applied genesis set.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct GenesisHashes {
    pub block: VertexHash,
    pub txs: [VertexHash; 2],
}

/// Deterministic genesis for `settings`: equal settings give equal hashes.
pub fn genesis_vertices(settings: &Settings) -> GenesisVertices {
    let mut block = Vertex::Block(BlockData {
        hash: VertexHash::ZERO,
        parents: vec![],
        weight: settings.min_block_weight,
        timestamp: settings.genesis_timestamp,
        nonce: 0,
        height: GENESIS_BLOCK_HEIGHT,
        outputs: vec![TxOutput {
            value: settings.genesis_tokens,
            script: settings.genesis_output_script.clone(),
        }],
        algorithm: PowAlgorithm::Sha3,
        data: settings.network.as_bytes().to_vec(),
        poa: None,
    });
    finalize_hash(&mut block);

    let txs = [1, 2].map(|offset| {
        let mut tx = Vertex::Transaction(TxData {
            hash: VertexHash::ZERO,
            parents: vec![],
            weight: settings.min_tx_weight,
            timestamp: settings.genesis_timestamp + offset,
            nonce: 0,
            inputs: vec![],
            outputs: vec![],
        });
        finalize_hash(&mut tx);
        tx
    });

    GenesisVertices { block, txs }
}

/// Write the genesis set into an empty `store` and make the genesis block
/// the best block.
pub fn apply_genesis(store: &mut VertexStore, settings: &Settings) -> Result<GenesisHashes, BraidError> {
    info!(network = %settings.network, "applying genesis");
    let GenesisVertices { block, txs } = genesis_vertices(settings);
    let block_hash = block.hash();
    let tx_hashes = [txs[0].hash(), txs[1].hash()];

    // ── 1. Genesis block ─────────────────────────────────────────────────────
    let block_work = weight_to_work(block.weight());
    let mut block_meta =
        VertexMetadata::new(block_hash, block_work, GENESIS_BLOCK_HEIGHT, settings.genesis_timestamp);
    block_meta.score = block_work;
    block_meta.confirms = tx_hashes.to_vec();
    store.put(block, block_meta)?;
    store.mark_genesis(block_hash);

    // ── 2. Genesis transactions ──────────────────────────────────────────────
    for tx in txs {
        let hash = tx.hash();
        let mut meta = VertexMetadata::new(hash, weight_to_work(tx.weight()), 0, settings.genesis_timestamp);
        meta.confirmed_by.insert(block_hash);
        meta.first_block = Some(block_hash);
        store.put(tx, meta)?;
        store.mark_genesis(hash);
    }

    // ── 3. Best chain ────────────────────────────────────────────────────────
    store.add_candidate(block_hash, block_work);
    store.set_best_block(block_hash);
    store.persist()?;

    info!(
        block = %block_hash,
        tx1 = %tx_hashes[0].short(),
        tx2 = %tx_hashes[1].short(),
        tokens = settings.genesis_tokens,
        "genesis applied"
    );
    Ok(GenesisHashes {
        block: block_hash,
        txs: tx_hashes,
    })
}
