use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use chacha20poly1305::{
    aead::{Aead, KeyInit},
    XChaCha20Poly1305, XNonce,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::constants::{KDF_CONTEXT_SEALED_BOX, KEY_SIZE, NONCE_SIZE, SEALED_ENVELOPE_VERSION};
use crate::error::CryptoError;
use crate::identity::Keypair;

pub type SymmetricKey = [u8; 32];

/// Asymmetric encryption of JSON objects addressed to a single recipient.
pub trait CryptoCodec: Send + Sync {
    /// Seal `value` so only the holder of `public_key_hex`'s secret can read it.
    fn encrypt(&self, public_key_hex: &str, value: &Value) -> Result<Value, CryptoError>;

    /// Open an envelope produced by [`CryptoCodec::encrypt`].
    fn decrypt(&self, keypair: &Keypair, value: &Value) -> Result<Value, CryptoError>;

    /// Whether `value` looks like an envelope this codec produced.
    fn is_encrypted(&self, value: &Value) -> bool;
}

/// On-the-wire form of a sealed object
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SealedEnvelope {
    pub sealed: u8,
    /// Sender's ephemeral X25519 public key (hex)
    pub ephemeral_key: String,
    /// nonce || ciphertext, base64
    pub ciphertext: String,
}

/// Ephemeral-static X25519 + BLAKE3 KDF + XChaCha20-Poly1305.
#[derive(Debug, Clone, Copy, Default)]
pub struct SealedBoxCodec;

impl CryptoCodec for SealedBoxCodec {
    fn encrypt(&self, public_key_hex: &str, value: &Value) -> Result<Value, CryptoError> {
        let recipient = parse_public_key(public_key_hex)?;
        let ephemeral = StaticSecret::random_from_rng(OsRng);
        let ephemeral_public = PublicKey::from(&ephemeral);

        let shared = ephemeral.diffie_hellman(&recipient);
        let key = derive_sealed_key(
            shared.as_bytes(),
            ephemeral_public.as_bytes(),
            recipient.as_bytes(),
        );

        let plaintext = serde_json::to_vec(value).map_err(|_| CryptoError::EncryptionFailed)?;
        let ciphertext = encrypt(&key, &plaintext)?;

        let envelope = SealedEnvelope {
            sealed: SEALED_ENVELOPE_VERSION,
            ephemeral_key: hex::encode(ephemeral_public.as_bytes()),
            ciphertext: BASE64.encode(ciphertext),
        };
        serde_json::to_value(envelope).map_err(|_| CryptoError::EncryptionFailed)
    }

    fn decrypt(&self, keypair: &Keypair, value: &Value) -> Result<Value, CryptoError> {
        let envelope = SealedEnvelope::deserialize(value)
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;
        if envelope.sealed != SEALED_ENVELOPE_VERSION {
            return Err(CryptoError::MalformedEnvelope(format!(
                "unsupported version {}",
                envelope.sealed
            )));
        }

        let ephemeral_public = parse_public_key(&envelope.ephemeral_key)?;
        let ciphertext = BASE64
            .decode(envelope.ciphertext.as_bytes())
            .map_err(|e| CryptoError::MalformedEnvelope(e.to_string()))?;

        let shared = keypair.diffie_hellman(&ephemeral_public);
        let key = derive_sealed_key(
            shared.as_bytes(),
            ephemeral_public.as_bytes(),
            keypair.public_key().as_bytes(),
        );

        let plaintext = decrypt(&key, &ciphertext)?;
        serde_json::from_slice(&plaintext).map_err(|_| CryptoError::DecryptionFailed)
    }

    fn is_encrypted(&self, value: &Value) -> bool {
        SealedEnvelope::deserialize(value).is_ok()
    }
}

/// Parse a hex-encoded X25519 public key.
pub fn parse_public_key(public_key_hex: &str) -> Result<PublicKey, CryptoError> {
    let bytes = hex::decode(public_key_hex.trim())
        .map_err(|e| CryptoError::InvalidKey(e.to_string()))?;
    let bytes: [u8; KEY_SIZE] = bytes
        .try_into()
        .map_err(|_| CryptoError::InvalidKey("expected 32 bytes".to_string()))?;
    Ok(PublicKey::from(bytes))
}

pub fn generate_nonce() -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    OsRng.fill_bytes(&mut nonce);
    nonce
}

// Returns nonce || ciphertext (24 bytes nonce prepended)
pub fn encrypt(key: &SymmetricKey, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce_bytes = generate_nonce();
    let nonce = XNonce::from_slice(&nonce_bytes);

    let ciphertext = cipher
        .encrypt(nonce, plaintext)
        .map_err(|_| CryptoError::EncryptionFailed)?;

    let mut output = Vec::with_capacity(NONCE_SIZE + ciphertext.len());
    output.extend_from_slice(&nonce_bytes);
    output.extend_from_slice(&ciphertext);
    Ok(output)
}

pub fn decrypt(key: &SymmetricKey, data: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if data.len() < NONCE_SIZE {
        return Err(CryptoError::DecryptionFailed);
    }

    let (nonce_bytes, ciphertext) = data.split_at(NONCE_SIZE);
    let cipher = XChaCha20Poly1305::new(key.into());
    let nonce = XNonce::from_slice(nonce_bytes);

    cipher
        .decrypt(nonce, ciphertext)
        .map_err(|_| CryptoError::DecryptionFailed)
}

// BLAKE3 KDF with domain separation, bound to both public keys
fn derive_sealed_key(shared_secret: &[u8], ephemeral: &[u8], recipient: &[u8]) -> SymmetricKey {
    let mut hasher = blake3::Hasher::new_derive_key(KDF_CONTEXT_SEALED_BOX);
    hasher.update(shared_secret);
    hasher.update(ephemeral);
    hasher.update(recipient);
    *hasher.finalize().as_bytes()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_sealed_roundtrip() {
        let bob = Keypair::generate();
        let codec = SealedBoxCodec;
        let value = json!({ "userId": "alice", "timestamp": 1700000000000u64 });

        let sealed = codec.encrypt(&bob.public_key_hex(), &value).unwrap();
        assert!(codec.is_encrypted(&sealed));
        assert!(sealed.get("userId").is_none());

        let opened = codec.decrypt(&bob, &sealed).unwrap();
        assert_eq!(opened, value);
    }

    #[test]
    fn test_wrong_recipient_fails() {
        let bob = Keypair::generate();
        let eve = Keypair::generate();
        let codec = SealedBoxCodec;

        let sealed = codec.encrypt(&bob.public_key_hex(), &json!("secret")).unwrap();
        assert!(matches!(
            codec.decrypt(&eve, &sealed),
            Err(CryptoError::DecryptionFailed)
        ));
    }

    #[test]
    fn test_plain_object_not_encrypted() {
        let codec = SealedBoxCodec;
        assert!(!codec.is_encrypted(&json!({ "userId": "alice" })));
        assert!(!codec.is_encrypted(&json!(null)));
    }

    #[test]
    fn test_invalid_public_key_rejected() {
        let codec = SealedBoxCodec;
        assert!(matches!(
            codec.encrypt("not-hex", &json!({})),
            Err(CryptoError::InvalidKey(_))
        ));
        assert!(matches!(
            codec.encrypt("abcd", &json!({})),
            Err(CryptoError::InvalidKey(_))
        ));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let key = [7u8; 32];
        let mut encrypted = encrypt(&key, b"Important data").unwrap();
        let len = encrypted.len();
        encrypted[len - 1] ^= 0xFF;

        assert!(decrypt(&key, &encrypted).is_err());
        assert!(decrypt(&key, &[]).is_err());
    }
}
