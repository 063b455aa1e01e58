//! Proof-of-Authority rules: signer ordering, turn schedule and block weight.

use braid_core::constants::{POA_BLOCK_WEIGHT_IN_TURN, POA_BLOCK_WEIGHT_OUT_OF_TURN};
use braid_core::error::{ConfigError, RejectReason};
use braid_core::settings::PoaSettings;
use braid_core::types::SignerId;
use braid_core::vertex::BlockData;
use braid_crypto::{signer_id_from_pubkey, verify_block_signature};

/// The configured signer set in round-robin order.
#[derive(Clone, Debug)]
pub struct PoaSigners {
    /// `(signer_id, public_key)` sorted by public key.
    signers: Vec<(SignerId, Vec<u8>)>,
}

impl PoaSigners {
    pub fn new(settings: &PoaSettings) -> Self {
        let signers = settings
            .sorted_keys()
            .into_iter()
            .map(|key| (signer_id_from_pubkey(key), key.to_vec()))
            .collect();
        Self { signers }
    }

    pub fn len(&self) -> usize {
        self.signers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.signers.is_empty()
    }

    /// Position of `public_key` in the sorted signer set.
    pub fn signer_index(&self, public_key: &[u8]) -> Result<usize, ConfigError> {
        self.signers
            .iter()
            .position(|(_, key)| key.as_slice() == public_key)
            .ok_or_else(|| ConfigError::NotASigner(signer_id_from_pubkey(public_key).to_hex()))
    }

    pub fn index_of_id(&self, id: &SignerId) -> Option<usize> {
        self.signers.iter().position(|(sid, _)| sid == id)
    }

    pub fn public_key(&self, index: usize) -> Option<&[u8]> {
        self.signers.get(index).map(|(_, key)| key.as_slice())
    }

    /// Whether signer `index` is expected to produce the block at `height`.
    pub fn is_in_turn(&self, height: u64, index: usize) -> bool {
        is_in_turn(height, self.len(), index)
    }

    pub fn calculate_weight(&self, height: u64, index: usize) -> f64 {
        calculate_weight(height, self.len(), index)
    }

    /// Check a PoA block's signature and declared weight.
    pub fn verify_block(&self, block: &BlockData) -> Result<(), RejectReason> {
        let poa = block.poa.as_ref().ok_or(RejectReason::MissingPoaSignature)?;
        let index = self
            .index_of_id(&poa.signer_id)
            .ok_or_else(|| RejectReason::UnknownSigner(poa.signer_id.to_hex()))?;
        let public_key = self
            .public_key(index)
            .ok_or_else(|| RejectReason::UnknownSigner(poa.signer_id.to_hex()))?;
        verify_block_signature(block, public_key).map_err(|_| RejectReason::InvalidPoaSignature)?;

        let expected = self.calculate_weight(block.height, index);
        if block.weight != expected {
            return Err(RejectReason::PoaWeightMismatch {
                expected,
                got: block.weight,
            });
        }
        Ok(())
    }
}

/// Round-robin turn: signer `index` owns every height `h` with
/// `h % signer_count == index`.
pub fn is_in_turn(height: u64, signer_count: usize, index: usize) -> bool {
    signer_count > 0 && height % signer_count as u64 == index as u64
}

/// In-turn blocks weigh more so the in-turn chain wins weight comparisons.
pub fn calculate_weight(height: u64, signer_count: usize, index: usize) -> f64 {
    if is_in_turn(height, signer_count, index) {
        POA_BLOCK_WEIGHT_IN_TURN
    } else {
        POA_BLOCK_WEIGHT_OUT_OF_TURN
    }
}
