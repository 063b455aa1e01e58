use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::ConfigError;
use crate::types::{Amount, Timestamp};

/// One authorized Proof-of-Authority block producer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoaSignerSettings {
    /// Dilithium2 public key bytes.
    #[serde(with = "hex::serde")]
    pub public_key: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoaSettings {
    pub signers: Vec<PoaSignerSettings>,
    /// Seconds between "are we synced yet?" checks before producing.
    #[serde(default = "default_wait_sync_delay")]
    pub wait_sync_delay: u64,
}

fn default_wait_sync_delay() -> u64 {
    30
}

impl PoaSettings {
    /// Signer public keys in lexicographic order. A signer's position in
    /// this list is its round-robin index.
    pub fn sorted_keys(&self) -> Vec<&[u8]> {
        let mut keys: Vec<&[u8]> = self.signers.iter().map(|s| s.public_key.as_slice()).collect();
        keys.sort();
        keys
    }
}

/// Which mechanism secures the block backbone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConsensusSettings {
    Pow,
    Poa(PoaSettings),
}

/// Immutable network parameters, loaded once per process and shared by
/// reference with every component.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    pub network: String,

    /// Skip proof-of-work checks and force both minimum weights to 1.
    pub test_mode: bool,

    // ── Weights ──────────────────────────────────────────────────────────────
    pub min_block_weight: f64,
    pub min_tx_weight: f64,
    pub min_tx_weight_coefficient: f64,
    pub decimal_places: u32,

    // ── Difficulty adjustment ────────────────────────────────────────────────
    /// Target seconds between blocks.
    pub avg_time_between_blocks: u64,
    /// Blocks sampled by the difficulty walk.
    pub block_difficulty_n_blocks: usize,
    /// Blocks visited by the difficulty walk before giving up.
    pub block_difficulty_max_depth: usize,
    /// Largest weight change allowed from one block to the next.
    pub block_difficulty_max_dw: f64,

    // ── Admission ────────────────────────────────────────────────────────────
    /// Seconds a timestamp may run ahead of local time.
    pub max_future_timestamp_drift: i64,
    /// Largest gap in seconds between a block and its block parent.
    pub max_distance_between_blocks: i64,
    pub max_num_inputs: usize,
    pub max_num_outputs: usize,
    /// Blocks that must be built on top of a block before its reward can be
    /// spent. The genesis premine is exempt.
    pub reward_spend_min_blocks: u64,

    /// Parent-distance bound for accumulated weight propagation.
    pub accumulated_weight_max_depth: usize,

    // ── Issuance ─────────────────────────────────────────────────────────────
    pub initial_tokens_per_block: Amount,
    pub minimum_tokens_per_block: Amount,
    pub blocks_per_halving: u64,

    // ── Genesis ──────────────────────────────────────────────────────────────
    pub genesis_timestamp: Timestamp,
    #[serde(with = "hex::serde")]
    pub genesis_output_script: Vec<u8>,
    pub genesis_tokens: Amount,

    pub consensus: ConsensusSettings,
}

impl Settings {
    pub fn mainnet() -> Self {
        let avg_time_between_blocks = 30;
        Self {
            network: "mainnet".into(),
            test_mode: false,
            min_block_weight: 21.0,
            min_tx_weight: 14.0,
            min_tx_weight_coefficient: 1.6,
            decimal_places: 2,
            avg_time_between_blocks,
            block_difficulty_n_blocks: 120,
            block_difficulty_max_depth: 360,
            block_difficulty_max_dw: 0.25,
            max_future_timestamp_drift: 300,
            max_distance_between_blocks: 30 * avg_time_between_blocks as i64,
            max_num_inputs: 255,
            max_num_outputs: 255,
            reward_spend_min_blocks: 300,
            accumulated_weight_max_depth: 2_000,
            initial_tokens_per_block: 6_400,
            minimum_tokens_per_block: 800,
            blocks_per_halving: 3 * 365 * 86_400 / avg_time_between_blocks,
            genesis_timestamp: 1_767_225_600, // 2026-01-01T00:00:00Z
            genesis_output_script: b"braid-genesis".to_vec(),
            genesis_tokens: 100_000_000_000,
            consensus: ConsensusSettings::Pow,
        }
    }

    /// Small, fast parameters for tests.
    pub fn unittests() -> Self {
        let avg_time_between_blocks = 64;
        Self {
            network: "unittests".into(),
            test_mode: false,
            min_block_weight: 2.0,
            min_tx_weight: 2.0,
            min_tx_weight_coefficient: 1.6,
            decimal_places: 2,
            avg_time_between_blocks,
            block_difficulty_n_blocks: 20,
            block_difficulty_max_depth: 60,
            block_difficulty_max_dw: 0.25,
            max_future_timestamp_drift: 300,
            max_distance_between_blocks: 30 * avg_time_between_blocks as i64,
            max_num_inputs: 255,
            max_num_outputs: 255,
            reward_spend_min_blocks: 10,
            accumulated_weight_max_depth: 1_000,
            initial_tokens_per_block: 6_400,
            minimum_tokens_per_block: 800,
            blocks_per_halving: 120,
            genesis_timestamp: 1_700_000_000,
            genesis_output_script: b"unittests".to_vec(),
            genesis_tokens: 100_000,
            consensus: ConsensusSettings::Pow,
        }
    }

    /// Parse settings from a JSON file and validate them.
    pub fn load_json(path: &Path) -> Result<Self, ConfigError> {
        let load_err = |reason: String| ConfigError::Load {
            path: path.display().to_string(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| load_err(e.to_string()))?;
        let settings: Settings = serde_json::from_str(&raw).map_err(|e| load_err(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let invalid = |msg: &str| Err(ConfigError::Invalid(msg.to_string()));
        if self.avg_time_between_blocks == 0 {
            return invalid("avg_time_between_blocks must be positive");
        }
        if self.block_difficulty_n_blocks < 2 {
            return invalid("block_difficulty_n_blocks must be at least 2");
        }
        if self.block_difficulty_max_depth < self.block_difficulty_n_blocks {
            return invalid("block_difficulty_max_depth must be >= block_difficulty_n_blocks");
        }
        if !(self.block_difficulty_max_dw > 0.0) {
            return invalid("block_difficulty_max_dw must be positive");
        }
        if self.blocks_per_halving == 0 {
            return invalid("blocks_per_halving must be positive");
        }
        if self.accumulated_weight_max_depth == 0 {
            return invalid("accumulated_weight_max_depth must be positive");
        }
        if self.genesis_tokens == 0 {
            return invalid("genesis_tokens must be positive");
        }
        if let ConsensusSettings::Poa(poa) = &self.consensus {
            if poa.signers.is_empty() {
                return invalid("PoA consensus needs at least one signer");
            }
            let keys = poa.sorted_keys();
            if keys.windows(2).any(|w| w[0] == w[1]) {
                return invalid("duplicate PoA signer");
            }
        }
        Ok(())
    }

    pub fn poa(&self) -> Option<&PoaSettings> {
        match &self.consensus {
            ConsensusSettings::Poa(p) => Some(p),
            ConsensusSettings::Pow => None,
        }
    }

    pub fn is_poa(&self) -> bool {
        self.poa().is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn presets_are_valid() {
        Settings::mainnet().validate().unwrap();
        Settings::unittests().validate().unwrap();
    }

    #[test]
    fn json_round_trip_with_poa() {
        let mut s = Settings::unittests();
        s.consensus = ConsensusSettings::Poa(PoaSettings {
            signers: vec![PoaSignerSettings { public_key: vec![0xde, 0xad] }],
            wait_sync_delay: 5,
        });
        let json = serde_json::to_string(&s).unwrap();
        assert!(json.contains("\"dead\""));
        let back: Settings = serde_json::from_str(&json).unwrap();
        assert_eq!(back, s);
    }

    #[test]
    fn empty_signer_set_is_rejected() {
        let mut s = Settings::unittests();
        s.consensus = ConsensusSettings::Poa(PoaSettings { signers: vec![], wait_sync_delay: 30 });
        assert!(matches!(s.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn signer_keys_sort_lexicographically() {
        let poa = PoaSettings {
            signers: vec![
                PoaSignerSettings { public_key: vec![3] },
                PoaSignerSettings { public_key: vec![1, 9] },
                PoaSignerSettings { public_key: vec![2] },
            ],
            wait_sync_delay: 30,
        };
        assert_eq!(poa.sorted_keys(), vec![&[1u8, 9][..], &[2u8][..], &[3u8][..]]);
    }

    #[test]
    fn load_json_reports_missing_file() {
        let err = Settings::load_json(Path::new("/nonexistent/braid.json")).unwrap_err();
        assert!(matches!(err, ConfigError::Load { .. }));
    }
}
