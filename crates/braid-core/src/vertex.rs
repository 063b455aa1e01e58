use serde::{Deserialize, Serialize};

use crate::constants::{BLOCK_PARENTS, TX_PARENTS};
use crate::types::{Amount, SignerId, Timestamp, VertexHash};

// ── Outputs and inputs ────────────────────────────────────────────────────────

/// A spendable output. Blocks issue new supply through theirs; transactions
/// move existing supply.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    pub value: Amount,
    /// Opaque locking script. Script execution belongs to the verifier.
    pub script: Vec<u8>,
}

/// Reference to output `index` of vertex `tx_id`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub tx_id: VertexHash,
    pub index: u8,
    /// Unlocking data for the referenced output's script.
    pub data: Vec<u8>,
}

// ── Block ─────────────────────────────────────────────────────────────────────

/// Hash function a block's proof-of-work is computed with.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PowAlgorithm {
    Sha3,
    Blake3,
}

/// Proof-of-Authority signature over a block's signing body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoaSignature {
    pub signer_id: SignerId,
    pub signature: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockData {
    pub hash: VertexHash,
    /// `[block_parent, tx_parent_1, tx_parent_2]`; empty for genesis.
    pub parents: Vec<VertexHash>,
    pub weight: f64,
    pub timestamp: Timestamp,
    pub nonce: u64,
    pub height: u64,
    pub outputs: Vec<TxOutput>,
    pub algorithm: PowAlgorithm,
    /// Free-form miner data.
    pub data: Vec<u8>,
    pub poa: Option<PoaSignature>,
}

impl BlockData {
    pub fn block_parent(&self) -> Option<VertexHash> {
        self.parents.first().copied()
    }

    pub fn tx_parents(&self) -> &[VertexHash] {
        if self.parents.len() > 1 {
            &self.parents[1..]
        } else {
            &[]
        }
    }

    /// Bytes covered by the PoA signature: every field except the hash,
    /// the nonce and the signature itself.
    pub fn signing_bytes(&self) -> Vec<u8> {
        let body = BlockSigningBody {
            parents: &self.parents,
            weight: self.weight,
            timestamp: self.timestamp,
            height: self.height,
            outputs: &self.outputs,
            algorithm: self.algorithm,
            data: &self.data,
        };
        bincode::serialize(&body).expect("block body serialization is infallible")
    }

    pub fn has_expected_parent_count(&self) -> bool {
        self.parents.len() == BLOCK_PARENTS
    }
}

// ── Transaction ───────────────────────────────────────────────────────────────

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TxData {
    pub hash: VertexHash,
    /// Two transaction parents; empty for genesis transactions.
    pub parents: Vec<VertexHash>,
    pub weight: f64,
    pub timestamp: Timestamp,
    pub nonce: u64,
    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl TxData {
    pub fn has_expected_parent_count(&self) -> bool {
        self.parents.len() == TX_PARENTS
    }
}

// ── Hashing bodies ────────────────────────────────────────────────────────────

#[derive(Serialize)]
struct BlockSigningBody<'a> {
    parents: &'a Vec<VertexHash>,
    weight: f64,
    timestamp: Timestamp,
    height: u64,
    outputs: &'a Vec<TxOutput>,
    algorithm: PowAlgorithm,
    data: &'a Vec<u8>,
}

/// Everything that feeds a vertex hash except the nonce, which is appended
/// separately so the body stays stable while mining.
#[derive(Serialize)]
enum VertexBody<'a> {
    Block {
        signing: BlockSigningBody<'a>,
        poa: &'a Option<PoaSignature>,
    },
    Transaction {
        parents: &'a Vec<VertexHash>,
        weight: f64,
        timestamp: Timestamp,
        inputs: &'a Vec<TxInput>,
        outputs: &'a Vec<TxOutput>,
    },
}

// ── Vertex ────────────────────────────────────────────────────────────────────

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VertexKind {
    Block,
    Transaction,
}

/// A node of the ledger DAG.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Vertex {
    Block(BlockData),
    Transaction(TxData),
}

/// Accessors shared by blocks and transactions.
pub trait VertexLike {
    fn hash(&self) -> VertexHash;
    fn parents(&self) -> &[VertexHash];
    fn weight(&self) -> f64;
    fn timestamp(&self) -> Timestamp;
    fn outputs(&self) -> &[TxOutput];

    fn is_genesis(&self) -> bool {
        self.parents().is_empty()
    }

    fn sum_outputs(&self) -> Option<Amount> {
        self.outputs()
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }
}

impl VertexLike for BlockData {
    fn hash(&self) -> VertexHash {
        self.hash
    }
    fn parents(&self) -> &[VertexHash] {
        &self.parents
    }
    fn weight(&self) -> f64 {
        self.weight
    }
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
    fn outputs(&self) -> &[TxOutput] {
        &self.outputs
    }
}

impl VertexLike for TxData {
    fn hash(&self) -> VertexHash {
        self.hash
    }
    fn parents(&self) -> &[VertexHash] {
        &self.parents
    }
    fn weight(&self) -> f64 {
        self.weight
    }
    fn timestamp(&self) -> Timestamp {
        self.timestamp
    }
    fn outputs(&self) -> &[TxOutput] {
        &self.outputs
    }
}

impl VertexLike for Vertex {
    fn hash(&self) -> VertexHash {
        match self {
            Vertex::Block(b) => b.hash,
            Vertex::Transaction(t) => t.hash,
        }
    }
    fn parents(&self) -> &[VertexHash] {
        match self {
            Vertex::Block(b) => &b.parents,
            Vertex::Transaction(t) => &t.parents,
        }
    }
    fn weight(&self) -> f64 {
        match self {
            Vertex::Block(b) => b.weight,
            Vertex::Transaction(t) => t.weight,
        }
    }
    fn timestamp(&self) -> Timestamp {
        match self {
            Vertex::Block(b) => b.timestamp,
            Vertex::Transaction(t) => t.timestamp,
        }
    }
    fn outputs(&self) -> &[TxOutput] {
        match self {
            Vertex::Block(b) => &b.outputs,
            Vertex::Transaction(t) => &t.outputs,
        }
    }
}

impl Vertex {
    pub fn kind(&self) -> VertexKind {
        match self {
            Vertex::Block(_) => VertexKind::Block,
            Vertex::Transaction(_) => VertexKind::Transaction,
        }
    }

    pub fn is_block(&self) -> bool {
        matches!(self, Vertex::Block(_))
    }

    pub fn is_transaction(&self) -> bool {
        matches!(self, Vertex::Transaction(_))
    }

    pub fn as_block(&self) -> Option<&BlockData> {
        match self {
            Vertex::Block(b) => Some(b),
            Vertex::Transaction(_) => None,
        }
    }

    pub fn as_tx(&self) -> Option<&TxData> {
        match self {
            Vertex::Transaction(t) => Some(t),
            Vertex::Block(_) => None,
        }
    }

    pub fn nonce(&self) -> u64 {
        match self {
            Vertex::Block(b) => b.nonce,
            Vertex::Transaction(t) => t.nonce,
        }
    }

    pub fn set_nonce(&mut self, nonce: u64) {
        match self {
            Vertex::Block(b) => b.nonce = nonce,
            Vertex::Transaction(t) => t.nonce = nonce,
        }
    }

    pub fn set_hash(&mut self, hash: VertexHash) {
        match self {
            Vertex::Block(b) => b.hash = hash,
            Vertex::Transaction(t) => t.hash = hash,
        }
    }

    /// Inputs spent by this vertex. Blocks spend nothing.
    pub fn inputs(&self) -> &[TxInput] {
        match self {
            Vertex::Block(_) => &[],
            Vertex::Transaction(t) => &t.inputs,
        }
    }

    /// Block height, `None` for transactions.
    pub fn height(&self) -> Option<u64> {
        self.as_block().map(|b| b.height)
    }

    /// Hash algorithm of the vertex's proof-of-work. Transactions always use
    /// SHA3.
    pub fn algorithm(&self) -> PowAlgorithm {
        match self {
            Vertex::Block(b) => b.algorithm,
            Vertex::Transaction(_) => PowAlgorithm::Sha3,
        }
    }

    /// Canonical body bytes that, followed by the nonce, are hashed.
    pub fn body_bytes(&self) -> Vec<u8> {
        let body = match self {
            Vertex::Block(b) => VertexBody::Block {
                signing: BlockSigningBody {
                    parents: &b.parents,
                    weight: b.weight,
                    timestamp: b.timestamp,
                    height: b.height,
                    outputs: &b.outputs,
                    algorithm: b.algorithm,
                    data: &b.data,
                },
                poa: &b.poa,
            },
            Vertex::Transaction(t) => VertexBody::Transaction {
                parents: &t.parents,
                weight: t.weight,
                timestamp: t.timestamp,
                inputs: &t.inputs,
                outputs: &t.outputs,
            },
        };
        bincode::serialize(&body).expect("vertex body serialization is infallible")
    }

    /// Serialized size used by the transaction weight formula.
    pub fn size(&self) -> usize {
        self.body_bytes().len() + std::mem::size_of::<u64>()
    }

    /// Parents plus the vertices whose outputs this vertex spends.
    pub fn dependencies(&self) -> Vec<VertexHash> {
        let mut deps: Vec<VertexHash> = self.parents().to_vec();
        for input in self.inputs() {
            if !deps.contains(&input.tx_id) {
                deps.push(input.tx_id);
            }
        }
        deps
    }
}
