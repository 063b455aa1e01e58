/// ─── Braid Protocol Constants ───────────────────────────────────────────────
///
/// Values that are fixed by the protocol itself. Anything a network may tune
/// lives in `Settings` instead.

// ── DAG shape ────────────────────────────────────────────────────────────────

/// A block references one block parent followed by two transaction parents.
pub const BLOCK_PARENTS: usize = 3;

/// A transaction references exactly two transaction parents.
pub const TX_PARENTS: usize = 2;

/// Height of the genesis block.
pub const GENESIS_BLOCK_HEIGHT: u64 = 0;

// ── Weights ──────────────────────────────────────────────────────────────────

/// Tolerance used when comparing a declared weight against a computed minimum.
pub const WEIGHT_TOLERANCE: f64 = 1e-10;

/// Weight returned by both weight functions when the network runs in test mode.
pub const TEST_MODE_WEIGHT: f64 = 1.0;

// ── Proof-of-Authority ────────────────────────────────────────────────────────

/// Weight of a block produced by the signer whose turn it is.
pub const POA_BLOCK_WEIGHT_IN_TURN: f64 = 2.0;

/// Weight of a block produced by any other configured signer.
pub const POA_BLOCK_WEIGHT_OUT_OF_TURN: f64 = 1.0;

/// Multiplier for the out-of-turn random delay (seconds per signer).
pub const POA_RANDOM_DELAY_MULTIPLIER: u64 = 1;
