use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{Timestamp, VertexHash, Work};

/// Mutable consensus state kept beside every integrated vertex.
///
/// `voided_by` is the full reason set: the vertex's own marks plus every mark
/// inherited from its dependencies. A transaction that lost a conflict
/// carries the hashes of the rivals that beat it; a block off the best chain,
/// or a transaction confirmed only by such blocks, carries its own hash.
/// `conflict_voided_by` is the subset rooted in lost double-spends only; the
/// best block is always chosen among blocks where it is empty.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexMetadata {
    pub hash: VertexHash,

    /// Block height; zero for transactions.
    pub height: u64,

    /// Own work plus the work of every descendant within the propagation
    /// depth. Kept up to date only while the vertex takes part in a
    /// conflict; other vertices hold their own work.
    pub accumulated_weight: Work,

    /// Blocks only: parent score + own work + work of newly confirmed
    /// transactions. Zero for transactions.
    pub score: Work,

    pub voided_by: BTreeSet<VertexHash>,
    pub conflict_voided_by: BTreeSet<VertexHash>,

    /// Transactions that spend at least one output this one spends.
    pub conflict_with: BTreeSet<VertexHash>,

    /// Block on the best chain that first confirms this transaction.
    pub first_block: Option<VertexHash>,

    /// Output index → transactions spending it.
    pub spent_outputs: BTreeMap<u8, BTreeSet<VertexHash>>,

    /// Vertices that list this one as a parent.
    pub children: BTreeSet<VertexHash>,

    /// Transactions only: blocks that newly confirm this transaction.
    pub confirmed_by: BTreeSet<VertexHash>,

    /// Blocks only: transactions this block confirms for the first time on
    /// its own chain.
    pub confirms: Vec<VertexHash>,

    /// Local wall-clock time the vertex was integrated.
    pub received_at: Timestamp,
}

impl VertexMetadata {
    pub fn new(hash: VertexHash, own_work: Work, height: u64, received_at: Timestamp) -> Self {
        Self {
            hash,
            height,
            accumulated_weight: own_work,
            score: 0,
            voided_by: BTreeSet::new(),
            conflict_voided_by: BTreeSet::new(),
            conflict_with: BTreeSet::new(),
            first_block: None,
            spent_outputs: BTreeMap::new(),
            children: BTreeSet::new(),
            confirmed_by: BTreeSet::new(),
            confirms: Vec::new(),
            received_at,
        }
    }

    pub fn is_voided(&self) -> bool {
        !self.voided_by.is_empty()
    }

    pub fn is_executed(&self) -> bool {
        self.voided_by.is_empty()
    }

    pub fn is_conflict_voided(&self) -> bool {
        !self.conflict_voided_by.is_empty()
    }

    /// Every transaction that spends any output of this vertex.
    pub fn spenders(&self) -> impl Iterator<Item = &VertexHash> {
        self.spent_outputs.values().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_metadata_is_executed() {
        let m = VertexMetadata::new(VertexHash::ZERO, 4, 0, 100);
        assert!(m.is_executed());
        assert!(!m.is_conflict_voided());
        assert_eq!(m.accumulated_weight, 4);
    }

    #[test]
    fn spenders_flatten_all_outputs() {
        let mut m = VertexMetadata::new(VertexHash::ZERO, 1, 0, 0);
        let a = VertexHash::from_bytes([1; 32]);
        let b = VertexHash::from_bytes([2; 32]);
        m.spent_outputs.entry(0).or_default().insert(a);
        m.spent_outputs.entry(0).or_default().insert(b);
        m.spent_outputs.entry(3).or_default().insert(a);
        assert_eq!(m.spenders().count(), 3);
    }
}
