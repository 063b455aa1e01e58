//! braid-node
//!
//! Wires the ledger components into a running node: the [`Manager`]
//! orchestrates validation and integration, the producers feed it new
//! blocks, and [`TokioReactor`] drives every timer on a single-threaded
//! tokio loop.

pub mod manager;
pub mod producer;
pub mod template;
pub mod tokio_reactor;

pub use manager::{Manager, SharedManager};
pub use producer::poa::PoaBlockProducer;
pub use producer::pow::PowMiner;
pub use template::BlockTemplate;
pub use tokio_reactor::TokioReactor;
