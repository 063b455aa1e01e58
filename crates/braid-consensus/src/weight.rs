use braid_core::constants::{POA_BLOCK_WEIGHT_OUT_OF_TURN, TEST_MODE_WEIGHT};
use braid_core::settings::Settings;
use braid_core::types::{Amount, Timestamp, VertexHash};
use braid_core::vertex::{BlockData, PowAlgorithm, Vertex, VertexLike};
use braid_core::weight::{log2, sum_all};
use braid_storage::VertexStore;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Minimum weights a new vertex must declare.
///
/// Block weights follow a difficulty adjustment over the recent block chain.
/// Transaction weights grow with size and moved amount. Both are pure
/// functions of the DAG and the settings.
#[derive(Clone, Debug)]
pub struct WeightCalculator {
    settings: Arc<Settings>,
}

/// One block sampled by the difficulty walk.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct BlockSample {
    pub timestamp: Timestamp,
    pub weight: f64,
}

impl WeightCalculator {
    pub fn new(settings: Arc<Settings>) -> Self {
        Self { settings }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Minimum weight for `vertex` given the current DAG.
    pub fn minimum_weight(&self, store: &VertexStore, vertex: &Vertex) -> f64 {
        match vertex {
            Vertex::Block(b) => self.minimum_block_weight(store, b),
            Vertex::Transaction(t) => {
                if t.is_genesis() {
                    return self.tx_floor();
                }
                let amount = vertex.sum_outputs().unwrap_or(Amount::MAX);
                self.minimum_tx_weight(vertex.size(), amount)
            }
        }
    }

    pub fn minimum_block_weight(&self, store: &VertexStore, block: &BlockData) -> f64 {
        match block.block_parent() {
            None => self.block_floor(),
            Some(parent) => self.next_block_weight(store, &parent, block.algorithm),
        }
    }

    /// Weight required of a block built on `parent` with `algorithm`.
    ///
    /// Walks back from `parent` over at most `block_difficulty_max_depth`
    /// blocks, sampling up to `block_difficulty_n_blocks` non-genesis blocks
    /// of the same algorithm.
    pub fn next_block_weight(
        &self,
        store: &VertexStore,
        parent: &VertexHash,
        algorithm: PowAlgorithm,
    ) -> f64 {
        if self.settings.test_mode || self.settings.is_poa() {
            return self.block_floor();
        }
        let Some(parent_block) = store.get_block(parent) else {
            return self.block_floor();
        };

        let mut samples = Vec::new();
        let mut algorithms = BTreeSet::new();
        for block in store
            .block_chain(parent)
            .take(self.settings.block_difficulty_max_depth)
        {
            if block.is_genesis() {
                break;
            }
            algorithms.insert(block.algorithm);
            if block.algorithm == algorithm {
                samples.push(BlockSample {
                    timestamp: block.timestamp,
                    weight: block.weight,
                });
                if samples.len() >= self.settings.block_difficulty_n_blocks {
                    break;
                }
            }
        }

        self.weight_from_samples(parent_block.weight, &samples, algorithms.len().max(1))
    }

    /// Difficulty adjustment over `samples` (newest first).
    ///
    /// `target = logsum(weights) - log2(dt) + log2(avg_time) + log2(algorithms)`,
    /// clamped to `parent_weight ± max_dw` and floored at `min_block_weight`.
    pub fn weight_from_samples(
        &self,
        parent_weight: f64,
        samples: &[BlockSample],
        distinct_algorithms: usize,
    ) -> f64 {
        let floor = self.settings.min_block_weight;
        if samples.len() < 2 {
            return floor;
        }
        let newest = samples[0].timestamp;
        let oldest = samples[samples.len() - 1].timestamp;
        let dt = (newest - oldest).max(1);

        let log_sum = sum_all(samples.iter().rev().map(|s| s.weight));
        let target = log_sum - log2(dt as f64)
            + log2(self.settings.avg_time_between_blocks as f64)
            + log2(distinct_algorithms as f64);

        let max_dw = self.settings.block_difficulty_max_dw;
        let clamped = target.clamp(parent_weight - max_dw, parent_weight + max_dw);
        clamped.max(floor)
    }

    /// `coefficient·log2(size) + log2(amount) − log2(10^decimals) + 0.5`,
    /// floored at `min_tx_weight`.
    pub fn minimum_tx_weight(&self, size: usize, amount: Amount) -> f64 {
        if self.settings.test_mode {
            return TEST_MODE_WEIGHT;
        }
        let scale = (0..self.settings.decimal_places).fold(1.0f64, |acc, _| acc * 10.0);
        let weight = self.settings.min_tx_weight_coefficient * log2(size.max(1) as f64)
            + log2(amount.max(1) as f64)
            - log2(scale)
            + 0.5;
        weight.max(self.settings.min_tx_weight)
    }

    fn block_floor(&self) -> f64 {
        if self.settings.test_mode {
            TEST_MODE_WEIGHT
        } else if self.settings.is_poa() {
            POA_BLOCK_WEIGHT_OUT_OF_TURN
        } else {
            self.settings.min_block_weight
        }
    }

    fn tx_floor(&self) -> f64 {
        if self.settings.test_mode {
            TEST_MODE_WEIGHT
        } else {
            self.settings.min_tx_weight
        }
    }
}
