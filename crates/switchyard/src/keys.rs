//! The proxy's RSA keypair.
//!
//! Generated once per server instance. The public half is sent to clients
//! during the encryption exchange; the private half never leaves this
//! module.

use std::fmt;

use rand_core::OsRng;
use rsa::pkcs8::EncodePublicKey;
use rsa::{Pkcs1v15Encrypt, RsaPrivateKey};
use sha2::{Digest, Sha256};

use crate::ProxyError;

/// Modulus size of every key the proxy generates.
pub const KEY_BITS: usize = 2048;

/// A 2048-bit RSA keypair plus the DER encoding of its public half.
///
/// Immutable after generation and safe to share between sessions.
pub struct KeyMaterial {
    private_key: RsaPrivateKey,
    public_key_der: Vec<u8>,
}

impl KeyMaterial {
    /// Generates a fresh keypair from the operating system's RNG.
    ///
    /// # Errors
    /// [`ProxyError::KeyGeneration`] if the RNG fails, or
    /// [`ProxyError::KeyEncoding`] if the public key cannot be encoded.
    pub fn generate() -> Result<Self, ProxyError> {
        let private_key = RsaPrivateKey::new(&mut OsRng, KEY_BITS)
            .map_err(ProxyError::KeyGeneration)?;
        let public_key_der = private_key
            .to_public_key()
            .to_public_key_der()
            .map_err(ProxyError::KeyEncoding)?
            .into_vec();

        tracing::debug!(bits = KEY_BITS, "generated proxy keypair");
        Ok(Self {
            private_key,
            public_key_der,
        })
    }

    /// The public key as SubjectPublicKeyInfo DER.
    pub fn public_key_der(&self) -> &[u8] {
        &self.public_key_der
    }

    /// Decrypts a PKCS#1 v1.5 ciphertext produced with the public key.
    pub(crate) fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, ProxyError> {
        self.private_key
            .decrypt(Pkcs1v15Encrypt, ciphertext)
            .map_err(|e| ProxyError::Handshake(format!("decryption failed: {e}")))
    }

    /// Lowercase hex SHA-256 of `shared_secret` followed by the public key
    /// DER. Both ends of the handshake compute the same value.
    pub fn server_hash(&self, shared_secret: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(shared_secret);
        hasher.update(&self.public_key_der);
        hasher
            .finalize()
            .iter()
            .map(|b| format!("{b:02x}"))
            .collect()
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("bits", &KEY_BITS)
            .field("public_key_der_len", &self.public_key_der.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::sync::{Arc, OnceLock};

    use rsa::pkcs8::DecodePublicKey;
    use rsa::traits::PublicKeyParts;
    use rsa::RsaPublicKey;

    use super::*;

    /// One keypair for the whole test binary; generation is slow.
    pub(crate) fn shared_keys() -> Arc<KeyMaterial> {
        static KEYS: OnceLock<Arc<KeyMaterial>> = OnceLock::new();
        Arc::clone(KEYS.get_or_init(|| Arc::new(KeyMaterial::generate().unwrap())))
    }

    #[test]
    fn test_generate_produces_2048_bit_key() {
        let keys = shared_keys();
        assert_eq!(keys.private_key.size(), KEY_BITS / 8);
    }

    #[test]
    fn test_public_key_der_decodes_to_same_key() {
        let keys = shared_keys();
        let decoded = RsaPublicKey::from_public_key_der(keys.public_key_der())
            .expect("DER should decode");
        assert_eq!(decoded.n(), keys.private_key.n());
        assert_eq!(decoded.e(), keys.private_key.e());
    }

    #[test]
    fn test_decrypt_recovers_client_ciphertext() {
        let keys = shared_keys();
        let public = RsaPublicKey::from_public_key_der(keys.public_key_der()).unwrap();
        let secret = [7u8; 16];
        let ciphertext = public
            .encrypt(&mut OsRng, Pkcs1v15Encrypt, &secret)
            .unwrap();

        assert_eq!(keys.decrypt(&ciphertext).unwrap(), secret);
    }

    #[test]
    fn test_decrypt_garbage_is_handshake_error() {
        let keys = shared_keys();
        let result = keys.decrypt(&[1, 2, 3]);
        assert!(matches!(result, Err(ProxyError::Handshake(_))));
    }

    #[test]
    fn test_server_hash_is_stable_hex() {
        let keys = shared_keys();
        let a = keys.server_hash(b"secret");
        let b = keys.server_hash(b"secret");
        let c = keys.server_hash(b"other");

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 64);
        assert!(a.bytes().all(|b| b.is_ascii_hexdigit() && !b.is_ascii_uppercase()));
    }

    #[test]
    fn test_debug_does_not_print_private_key() {
        let keys = shared_keys();
        let debug = format!("{keys:?}");
        assert!(debug.contains("KeyMaterial"));
        assert!(!debug.contains("private_key"));
    }
}
