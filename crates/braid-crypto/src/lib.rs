pub mod dilithium;
pub mod hash;
pub mod keypair;
pub mod pow;

pub use dilithium::{sign_block, verify_block_signature, verify_signature, SignatureError};
pub use hash::{blake3_hash, finalize_hash, sha3_256, signer_id_from_pubkey, vertex_hash};
pub use keypair::PoaKeyPair;
pub use pow::{meets_target, mine, pow_target, verify_pow};
