use braid_core::types::VertexHash;
use braid_core::vertex::{Vertex, VertexLike};
use braid_core::weight::exp2;

use crate::hash::{hash_with_nonce, vertex_hash};

/// Big-endian 256-bit target `2^(256 - weight)` a PoW hash must stay below.
///
/// `None` means the target exceeds the hash space and every hash passes.
pub fn pow_target(weight: f64) -> Option<[u8; 32]> {
    let exponent = 256.0 - weight;
    if !(exponent < 256.0) {
        return None;
    }
    let mut target = [0u8; 32];
    if exponent < 0.0 {
        return Some(target);
    }

    // target = mantissa · 2^e, mantissa in [1, 2) held as a 53-bit integer
    let e = exponent.floor();
    let mantissa = (exp2(exponent - e) * 4_503_599_627_370_496.0) as u64;
    let e = e as i64;
    for bit in 0..53i64 {
        if (mantissa >> bit) & 1 == 1 {
            let pos = e - 52 + bit;
            if pos >= 0 {
                let pos = pos as usize;
                target[31 - pos / 8] |= 1 << (pos % 8);
            }
        }
    }
    Some(target)
}

/// Whether `hash` satisfies a proof-of-work of `weight`.
pub fn meets_target(hash: &VertexHash, weight: f64) -> bool {
    match pow_target(weight) {
        None => true,
        Some(target) => hash.as_bytes() < &target,
    }
}

/// Verify that the vertex hash matches its contents and meets its own weight.
pub fn verify_pow(vertex: &Vertex) -> bool {
    let hash = vertex_hash(vertex);
    hash == vertex.hash() && meets_target(&hash, vertex.weight())
}

/// Search nonces starting at the vertex's current one. On success the nonce
/// and hash are written back and `true` is returned; gives up after
/// `max_attempts`.
pub fn mine(vertex: &mut Vertex, max_attempts: u64) -> bool {
    let body = vertex.body_bytes();
    let algorithm = vertex.algorithm();
    let weight = vertex.weight();
    let start = vertex.nonce();
    for i in 0..max_attempts {
        let nonce = start.wrapping_add(i);
        let hash = hash_with_nonce(algorithm, &body, nonce);
        if meets_target(&hash, weight) {
            vertex.set_nonce(nonce);
            vertex.set_hash(hash);
            return true;
        }
    }
    false
}
