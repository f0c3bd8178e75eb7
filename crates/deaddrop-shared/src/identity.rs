use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, SharedSecret, StaticSecret};

use crate::constants::KEY_SIZE;
use crate::error::IdentityError;

/// The local user's X25519 key pair.
/// Contacts encrypt dead-drop artifacts to the public half.
#[derive(Clone)]
pub struct Keypair {
    secret: StaticSecret,
}

impl Keypair {
    /// Generate a new random key pair
    pub fn generate() -> Self {
        Self {
            secret: StaticSecret::random_from_rng(OsRng),
        }
    }

    /// Restore from secret key bytes
    pub fn from_secret_bytes(secret: [u8; KEY_SIZE]) -> Self {
        Self {
            secret: StaticSecret::from(secret),
        }
    }

    /// Restore from a 64-character hex secret
    pub fn from_secret_hex(hex_secret: &str) -> Result<Self, IdentityError> {
        let bytes = hex::decode(hex_secret.trim())?;
        let secret: [u8; KEY_SIZE] = bytes
            .try_into()
            .map_err(|_| IdentityError::InvalidKeyBytes)?;
        Ok(Self::from_secret_bytes(secret))
    }

    pub fn public_key(&self) -> PublicKey {
        PublicKey::from(&self.secret)
    }

    /// Hex form of the public key, as handed out to contacts
    pub fn public_key_hex(&self) -> String {
        hex::encode(self.public_key().as_bytes())
    }

    pub fn secret_hex(&self) -> String {
        hex::encode(self.secret.to_bytes())
    }

    pub fn diffie_hellman(&self, their_public: &PublicKey) -> SharedSecret {
        self.secret.diffie_hellman(their_public)
    }
}

impl std::fmt::Debug for Keypair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Keypair")
            .field("public_key", &self.public_key_hex())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_secret_hex_roundtrip() {
        let keypair = Keypair::generate();
        let restored = Keypair::from_secret_hex(&keypair.secret_hex()).unwrap();
        assert_eq!(keypair.public_key_hex(), restored.public_key_hex());
    }

    #[test]
    fn test_bad_secret_rejected() {
        assert!(Keypair::from_secret_hex("abcd").is_err());
        assert!(Keypair::from_secret_hex("zz").is_err());
    }

    #[test]
    fn test_debug_hides_secret() {
        let keypair = Keypair::generate();
        let debug = format!("{keypair:?}");
        assert!(!debug.contains(&keypair.secret_hex()));
    }
}
