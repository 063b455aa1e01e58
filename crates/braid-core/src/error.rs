use thiserror::Error;

use crate::types::{Amount, Timestamp, VertexHash};

/// Library-level error for everything that is not a consensus verdict:
/// storage, serialization and configuration failures.
#[derive(Debug, Error)]
pub enum BraidError {
    // ── Storage errors ───────────────────────────────────────────────────────
    #[error("storage error: {0}")]
    Storage(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("unknown vertex: {0}")]
    UnknownVertex(String),

    // ── Consensus ────────────────────────────────────────────────────────────
    #[error("vertex rejected: {0}")]
    Rejected(#[from] RejectReason),

    // ── Configuration ────────────────────────────────────────────────────────
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    // ── Generic ──────────────────────────────────────────────────────────────
    #[error("{0}")]
    Other(String),
}

impl From<bincode::Error> for BraidError {
    fn from(e: bincode::Error) -> Self {
        BraidError::Serialization(e.to_string())
    }
}

/// Why `validate` refused a vertex. Always recoverable: the vertex is
/// dropped and may be resubmitted later (e.g. once its parents arrive).
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RejectReason {
    // ── Admission ────────────────────────────────────────────────────────────
    #[error("vertex already exists: {0}")]
    Duplicate(VertexHash),

    #[error("timestamp {timestamp} is more than {max_drift}s ahead of local time {now}")]
    TimestampInFuture {
        timestamp: Timestamp,
        now: Timestamp,
        max_drift: i64,
    },

    #[error("unknown parent vertex: {0}")]
    MissingParent(VertexHash),

    #[error("vertex without parents is not part of the genesis set: {0}")]
    UnknownGenesis(VertexHash),

    #[error("weight {weight} is below the required minimum {minimum}")]
    WeightTooLow { weight: f64, minimum: f64 },

    #[error("block at height {height} issues {got}, expected {expected}")]
    RewardMismatch {
        height: u64,
        expected: Amount,
        got: Amount,
    },

    // ── Structure ────────────────────────────────────────────────────────────
    #[error("invalid parents: {0}")]
    InvalidParents(String),

    #[error("timestamp {timestamp} must be greater than dependency timestamp {min}")]
    TimestampNotAfterDependency { timestamp: Timestamp, min: Timestamp },

    #[error("block {distance}s after its parent exceeds the allowed {max}s")]
    BlockTooFarFromParent { distance: i64, max: i64 },

    #[error("invalid height: expected {expected}, got {got}")]
    InvalidHeight { expected: u64, got: u64 },

    #[error("hash does not match vertex contents")]
    HashMismatch,

    // ── Inputs / outputs ─────────────────────────────────────────────────────
    #[error("input references unknown transaction {tx_id}")]
    MissingInput { tx_id: VertexHash },

    #[error("input references output {index} of {tx_id}, which does not exist")]
    InvalidInputIndex { tx_id: VertexHash, index: u8 },

    #[error("input spends the same output twice: {tx_id}:{index}")]
    DuplicateInput { tx_id: VertexHash, index: u8 },

    #[error("inputs sum to {inputs} but outputs sum to {outputs}")]
    InputOutputMismatch { inputs: Amount, outputs: Amount },

    #[error("too many inputs: max {max}, got {got}")]
    TooManyInputs { max: usize, got: usize },

    #[error("too many outputs: max {max}, got {got}")]
    TooManyOutputs { max: usize, got: usize },

    #[error("transaction must have at least one output")]
    NoOutputs,

    #[error("output value must be greater than zero")]
    ZeroOutput,

    #[error("output total overflows")]
    AmountOverflow,

    #[error("reward of block {block} is locked until best height {unlock_height}, best height is {best_height}")]
    RewardLocked {
        block: VertexHash,
        unlock_height: u64,
        best_height: u64,
    },

    // ── Proof ────────────────────────────────────────────────────────────────
    #[error("invalid proof-of-work")]
    InvalidPow,

    #[error("block carries no PoA signature")]
    MissingPoaSignature,

    #[error("PoA signature on a proof-of-work network")]
    UnexpectedPoaSignature,

    #[error("block signer {0} is not a configured PoA signer")]
    UnknownSigner(String),

    #[error("invalid PoA signature")]
    InvalidPoaSignature,

    #[error("PoA block weight {got} does not match expected {expected}")]
    PoaWeightMismatch { expected: f64, got: f64 },
}

/// Fatal at startup: the process must not proceed.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("this node's key {0} is not in the configured PoA signer set")]
    NotASigner(String),

    #[error("PoA block production requested on a network without PoA settings")]
    PoaNotConfigured,

    #[error("invalid settings: {0}")]
    Invalid(String),

    #[error("failed to load settings from {path}: {reason}")]
    Load { path: String, reason: String },
}

/// A broken ledger invariant found while integrating an already-validated
/// vertex. Never returned to callers: the engine logs it and aborts.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvariantViolation {
    #[error("vertex {0} has no metadata")]
    MissingMetadata(VertexHash),

    #[error("accumulated work of {hash} ({accumulated}) is below its own work ({own})")]
    AccumulatedBelowOwn {
        hash: VertexHash,
        accumulated: u128,
        own: u128,
    },

    #[error("vertex {0} is voided by a conflict but has no conflicts")]
    ConflictVoidWithoutConflict(VertexHash),

    #[error("best block {0} is voided by a conflict")]
    BestBlockConflictVoided(VertexHash),

    #[error("integrated vertex {0} is missing a parent")]
    DanglingParent(VertexHash),
}
