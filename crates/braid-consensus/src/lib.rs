pub mod engine;
pub mod poa;
pub mod reward;
pub mod verifier;
pub mod voiding;
pub mod weight;

pub use engine::{AcceptanceReport, ConsensusEngine, ReorgInfo};
pub use poa::PoaSigners;
pub use reward::tokens_issued_per_block;
pub use verifier::{verify_reward_lock, StructuralVerifier, VertexVerifier};
pub use weight::WeightCalculator;
