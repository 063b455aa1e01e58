use braid_consensus::{tokens_issued_per_block, WeightCalculator};
use braid_core::error::BraidError;
use braid_core::types::{Amount, Timestamp, VertexHash};
use braid_core::vertex::{BlockData, PowAlgorithm, TxOutput, Vertex, VertexLike};
use braid_storage::VertexStore;
use std::cmp::Reverse;

/// Everything a producer needs to build the next block on `parent`.
#[derive(Clone, Debug, PartialEq)]
pub struct BlockTemplate {
    pub parent: VertexHash,
    pub tx_parents: [VertexHash; 2],
    pub height: u64,
    /// Minimum weight the block must declare.
    pub weight: f64,
    /// Earliest valid timestamp: one second after the youngest parent.
    pub timestamp_min: Timestamp,
    /// Latest timestamp still within reach of the block parent.
    pub timestamp_max: Timestamp,
    pub reward: Amount,
    pub algorithm: PowAlgorithm,
}

impl BlockTemplate {
    pub fn build(
        store: &VertexStore,
        weights: &WeightCalculator,
        parent: VertexHash,
        algorithm: PowAlgorithm,
    ) -> Result<Self, BraidError> {
        let parent_block = store
            .get_block(&parent)
            .ok_or_else(|| BraidError::UnknownVertex(parent.to_hex()))?;
        let tx_parents = select_tx_parents(store)?;
        let settings = weights.settings();

        let youngest = tx_parents
            .iter()
            .filter_map(|h| store.get(h))
            .map(|v| v.timestamp())
            .fold(parent_block.timestamp, Timestamp::max);
        let height = parent_block.height + 1;

        Ok(Self {
            parent,
            tx_parents,
            height,
            weight: weights.next_block_weight(store, &parent, algorithm),
            timestamp_min: youngest + 1,
            timestamp_max: parent_block.timestamp + settings.max_distance_between_blocks,
            reward: tokens_issued_per_block(settings, height),
            algorithm,
        })
    }

    /// An unhashed block paying the whole reward to `output_script`. The
    /// timestamp is clamped into the template's valid range.
    pub fn to_block(&self, timestamp: Timestamp, output_script: Vec<u8>, data: Vec<u8>) -> BlockData {
        BlockData {
            hash: VertexHash::ZERO,
            parents: vec![self.parent, self.tx_parents[0], self.tx_parents[1]],
            weight: self.weight,
            timestamp: timestamp.clamp(self.timestamp_min, self.timestamp_max.max(self.timestamp_min)),
            nonce: 0,
            height: self.height,
            outputs: vec![TxOutput {
                value: self.reward,
                script: output_script,
            }],
            algorithm: self.algorithm,
            data,
            poa: None,
        }
    }
}

/// Two transaction parents for a new vertex: the newest tips that are not
/// voided by a lost conflict. Tips orphaned by a reorg stay eligible so the
/// next block confirms them again. With a single usable tip the second
/// parent comes from its ancestry.
pub fn select_tx_parents(store: &VertexStore) -> Result<[VertexHash; 2], BraidError> {
    let usable = |h: &VertexHash| store.metadata(h).map_or(false, |m| !m.is_conflict_voided());

    let mut tips: Vec<(Timestamp, VertexHash)> = store
        .tx_tips()
        .iter()
        .filter(|h| usable(h))
        .filter_map(|h| store.get(h).map(|v| (v.timestamp(), *h)))
        .collect();
    tips.sort_by_key(|(ts, h)| (Reverse(*ts), *h));
    let mut chosen: Vec<VertexHash> = tips.into_iter().map(|(_, h)| h).take(2).collect();

    if let Some(first) = chosen.first().copied() {
        let extra = store
            .walk_ancestors(
                &first,
                |v: &Vertex| v.is_transaction() && usable(&v.hash()),
                usize::MAX,
            )
            .map(|(v, _)| v.hash())
            .filter(|h| !chosen.contains(h))
            .take(2 - chosen.len())
            .collect::<Vec<_>>();
        chosen.extend(extra);
    }

    match chosen.as_slice() {
        [a, b] => Ok([*a, *b]),
        _ => Err(BraidError::Other("fewer than two usable transaction parents".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use braid_core::settings::Settings;
    use braid_genesis::apply_genesis;
    use braid_storage::StateDb;
    use std::sync::Arc;

    #[test]
    fn template_on_genesis() {
        let settings = Arc::new(Settings::unittests());
        let mut store = VertexStore::new(StateDb::temporary().unwrap());
        let genesis = apply_genesis(&mut store, &settings).unwrap();
        let weights = WeightCalculator::new(settings.clone());

        let t = BlockTemplate::build(&store, &weights, genesis.block, PowAlgorithm::Sha3).unwrap();
        assert_eq!(t.height, 1);
        assert_eq!(t.reward, 6_400);
        assert_eq!(t.weight, settings.min_block_weight);
        assert_eq!(t.timestamp_min, settings.genesis_timestamp + 3);
        let mut parents = t.tx_parents;
        parents.sort();
        let mut expected = genesis.txs;
        expected.sort();
        assert_eq!(parents, expected);

        let block = t.to_block(0, vec![1], vec![]);
        assert_eq!(block.timestamp, t.timestamp_min);
        assert_eq!(block.block_parent(), Some(genesis.block));
    }

    #[test]
    fn unknown_parent_is_an_error() {
        let settings = Arc::new(Settings::unittests());
        let mut store = VertexStore::new(StateDb::temporary().unwrap());
        apply_genesis(&mut store, &settings).unwrap();
        let weights = WeightCalculator::new(settings);
        let missing = VertexHash::from_bytes([3; 32]);
        assert!(matches!(
            BlockTemplate::build(&store, &weights, missing, PowAlgorithm::Sha3),
            Err(BraidError::UnknownVertex(_))
        ));
    }
}
