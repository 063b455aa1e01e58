pub mod constants;
pub mod error;
pub mod metadata;
pub mod settings;
pub mod types;
pub mod vertex;
pub mod weight;

pub use constants::*;
pub use error::{BraidError, ConfigError, InvariantViolation, RejectReason};
pub use metadata::VertexMetadata;
pub use settings::{ConsensusSettings, PoaSettings, PoaSignerSettings, Settings};
pub use types::*;
pub use vertex::{
    BlockData, PoaSignature, PowAlgorithm, TxData, TxInput, TxOutput, Vertex, VertexKind,
    VertexLike,
};
