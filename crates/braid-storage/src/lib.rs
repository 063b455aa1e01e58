pub mod db;
pub mod store;

pub use db::StateDb;
pub use store::{AncestorWalk, VertexStore};
