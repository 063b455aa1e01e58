use braid_core::vertex::{BlockData, PoaSignature};
use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{DetachedSignature, PublicKey, SecretKey};
use thiserror::Error;

use crate::hash::signer_id_from_pubkey;
use crate::keypair::PoaKeyPair;

#[derive(Debug, Error)]
pub enum SignatureError {
    #[error("invalid signature")]
    InvalidSignature,
    #[error("invalid public key length: expected {expected}, got {got}")]
    InvalidPublicKeyLength { expected: usize, got: usize },
    #[error("invalid secret key")]
    InvalidSecretKey,
    #[error("block is not signed")]
    Unsigned,
    #[error("signature was made by a different signer")]
    SignerMismatch,
}

/// Sign `message` with a Dilithium2 secret key.
/// Returns a detached signature.
pub fn sign(secret_key_bytes: &[u8], message: &[u8]) -> Result<Vec<u8>, SignatureError> {
    let sk = dilithium2::SecretKey::from_bytes(secret_key_bytes)
        .map_err(|_| SignatureError::InvalidSecretKey)?;
    let sig = dilithium2::detached_sign(message, &sk);
    Ok(sig.as_bytes().to_vec())
}

/// Verify a detached Dilithium2 signature.
pub fn verify_signature(
    public_key: &[u8],
    message: &[u8],
    signature: &[u8],
) -> Result<(), SignatureError> {
    let pk = dilithium2::PublicKey::from_bytes(public_key).map_err(|_| {
        SignatureError::InvalidPublicKeyLength {
            expected: dilithium2::public_key_bytes(),
            got: public_key.len(),
        }
    })?;
    let sig = dilithium2::DetachedSignature::from_bytes(signature)
        .map_err(|_| SignatureError::InvalidSignature)?;
    dilithium2::verify_detached_signature(&sig, message, &pk)
        .map_err(|_| SignatureError::InvalidSignature)
}

/// Attach a PoA signature over the block's signing body.
/// The block hash must be finalized afterwards.
pub fn sign_block(keypair: &PoaKeyPair, block: &mut BlockData) -> Result<(), SignatureError> {
    let signature = keypair.sign(&block.signing_bytes())?;
    block.poa = Some(PoaSignature {
        signer_id: keypair.signer_id,
        signature,
    });
    Ok(())
}

/// Check that `block` carries a valid signature by the holder of `public_key`.
pub fn verify_block_signature(block: &BlockData, public_key: &[u8]) -> Result<(), SignatureError> {
    let poa = block.poa.as_ref().ok_or(SignatureError::Unsigned)?;
    if poa.signer_id != signer_id_from_pubkey(public_key) {
        return Err(SignatureError::SignerMismatch);
    }
    verify_signature(public_key, &block.signing_bytes(), &poa.signature)
}
