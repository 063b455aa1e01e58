use serde::{Deserialize, Serialize};
use std::fmt;

/// Token amount in the smallest indivisible unit.
pub type Amount = u64;

/// Unix timestamp (seconds, UTC).
pub type Timestamp = i64;

/// Integer proof-of-work: `round(2^weight)`.
///
/// Accumulated weights and chain scores are kept as sums of `Work` so that
/// comparisons between competing sub-DAGs never depend on floating-point
/// summation order.
pub type Work = u128;

// ── VertexHash ───────────────────────────────────────────────────────────────

/// 32-byte content-derived identifier shared by blocks and transactions.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VertexHash(pub [u8; 32]);

impl VertexHash {
    pub const ZERO: VertexHash = VertexHash([0u8; 32]);

    pub fn from_bytes(b: [u8; 32]) -> Self {
        Self(b)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn from_hex(s: &str) -> Result<Self, hex::FromHexError> {
        let bytes = hex::decode(s)?;
        if bytes.len() != 32 {
            return Err(hex::FromHexError::InvalidStringLength);
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// First eight hex characters, used in log lines.
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

impl fmt::Display for VertexHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for VertexHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "VertexHash({}…)", &self.to_hex()[..16])
    }
}

// ── SignerId ─────────────────────────────────────────────────────────────────

/// 32-byte PoA signer identifier derived as BLAKE3(public_key).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SignerId(pub [u8; 32]);

impl SignerId {
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_hex())
    }
}

impl fmt::Debug for SignerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SignerId({})", &self.to_hex()[..8])
    }
}
