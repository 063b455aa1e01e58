use braid_core::types::SignerId;
use pqcrypto_dilithium::dilithium2;
use pqcrypto_traits::sign::{PublicKey, SecretKey};
use serde::{Deserialize, Serialize};
use std::path::Path;
use zeroize::Zeroizing;

use crate::dilithium::SignatureError;
use crate::hash::signer_id_from_pubkey;

/// A PoA signing identity: Dilithium2 public + secret keys with the derived
/// signer id.
///
/// The secret key is wiped from memory on drop.
pub struct PoaKeyPair {
    pub signer_id: SignerId,
    pub public_key: Vec<u8>,
    secret_key: Vec<u8>,
}

/// On-disk form of a key file.
#[derive(Serialize, Deserialize)]
struct KeyFile {
    #[serde(with = "hex::serde")]
    public_key: Vec<u8>,
    #[serde(with = "hex::serde")]
    secret_key: Vec<u8>,
}

impl PoaKeyPair {
    /// Generate a fresh Dilithium2 keypair.
    pub fn generate() -> Self {
        let (pk, sk) = dilithium2::keypair();
        Self::from_raw(pk.as_bytes().to_vec(), sk.as_bytes().to_vec())
    }

    /// Restore a keypair from raw bytes.
    pub fn from_raw(pk_bytes: Vec<u8>, sk_bytes: Vec<u8>) -> Self {
        Self {
            signer_id: signer_id_from_pubkey(&pk_bytes),
            public_key: pk_bytes,
            secret_key: sk_bytes,
        }
    }

    /// Sign `message` using this keypair's secret key.
    pub fn sign(&self, message: &[u8]) -> Result<Vec<u8>, SignatureError> {
        let sk = Zeroizing::new(self.secret_key.clone());
        crate::dilithium::sign(&sk, message)
    }

    /// Load a JSON key file holding hex-encoded keys.
    pub fn load(path: &Path) -> std::io::Result<Self> {
        let raw = Zeroizing::new(std::fs::read_to_string(path)?);
        let file: KeyFile = serde_json::from_str(&raw)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        if dilithium2::SecretKey::from_bytes(&file.secret_key).is_err() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "secret key has the wrong length",
            ));
        }
        let KeyFile { public_key, secret_key } = file;
        Ok(Self::from_raw(public_key, secret_key))
    }

    pub fn save(&self, path: &Path) -> std::io::Result<()> {
        let file = KeyFile {
            public_key: self.public_key.clone(),
            secret_key: self.secret_key.clone(),
        };
        let json = Zeroizing::new(
            serde_json::to_string_pretty(&file)
                .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?,
        );
        std::fs::write(path, json.as_bytes())
    }
}

impl Drop for PoaKeyPair {
    fn drop(&mut self) {
        // Zeroize the secret key bytes on drop.
        use zeroize::Zeroize;
        self.secret_key.zeroize();
    }
}

impl std::fmt::Debug for PoaKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PoaKeyPair {{ signer_id: {:?} }}", self.signer_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_file_round_trip() {
        let dir = std::env::temp_dir().join(format!("braid_key_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("poa.json");

        let kp = PoaKeyPair::generate();
        kp.save(&path).unwrap();
        let loaded = PoaKeyPair::load(&path).unwrap();
        assert_eq!(loaded.public_key, kp.public_key);
        assert_eq!(loaded.signer_id, kp.signer_id);

        let sig = loaded.sign(b"msg").unwrap();
        assert!(crate::verify_signature(&kp.public_key, b"msg", &sig).is_ok());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn garbage_key_file_is_rejected() {
        let dir = std::env::temp_dir().join(format!("braid_badkey_{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join("poa.json");
        std::fs::write(&path, r#"{"public_key":"00","secret_key":"00"}"#).unwrap();
        assert!(PoaKeyPair::load(&path).is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
