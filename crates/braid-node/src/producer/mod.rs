//! Block producers. Both build from the manager's block template and submit
//! through `Manager::submit_vertex` like any received block.

pub mod poa;
pub mod pow;
