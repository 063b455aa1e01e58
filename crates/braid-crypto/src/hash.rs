use braid_core::types::{SignerId, VertexHash};
use braid_core::vertex::{PowAlgorithm, Vertex};
use sha3::{Digest, Sha3_256};

/// Compute BLAKE3 hash of arbitrary bytes → 32-byte array.
pub fn blake3_hash(data: &[u8]) -> [u8; 32] {
    *blake3::hash(data).as_bytes()
}

/// Compute SHA3-256 hash of arbitrary bytes → 32-byte array.
pub fn sha3_256(data: &[u8]) -> [u8; 32] {
    Sha3_256::digest(data).into()
}

/// Derive a PoA signer id from raw public key bytes using BLAKE3.
pub fn signer_id_from_pubkey(pubkey_bytes: &[u8]) -> SignerId {
    SignerId(blake3_hash(pubkey_bytes))
}

/// `H(body_bytes || nonce_le)` with the hash selected by `algorithm`.
pub fn hash_with_nonce(algorithm: PowAlgorithm, body_bytes: &[u8], nonce: u64) -> VertexHash {
    let digest = match algorithm {
        PowAlgorithm::Sha3 => {
            let mut hasher = Sha3_256::new();
            hasher.update(body_bytes);
            hasher.update(nonce.to_le_bytes());
            hasher.finalize().into()
        }
        PowAlgorithm::Blake3 => {
            let mut hasher = blake3::Hasher::new();
            hasher.update(body_bytes);
            hasher.update(&nonce.to_le_bytes());
            *hasher.finalize().as_bytes()
        }
    };
    VertexHash::from_bytes(digest)
}

/// Hash a vertex from its current contents. Doubles as its PoW hash.
pub fn vertex_hash(vertex: &Vertex) -> VertexHash {
    hash_with_nonce(vertex.algorithm(), &vertex.body_bytes(), vertex.nonce())
}

/// Recompute and store the vertex hash. Call after every other field is final.
pub fn finalize_hash(vertex: &mut Vertex) -> VertexHash {
    let hash = vertex_hash(vertex);
    vertex.set_hash(hash);
    hash
}
