//! # Crypto Provider
//!
//! Two encryption surfaces, both side-effect free and safe to call from any
//! thread:
//!
//! - **Asymmetric** ([`encrypt_asymmetric`] / [`decrypt_asymmetric`]):
//!   hybrid RSA-OAEP + AES-256-GCM keyed by a per-project key pair. Used for
//!   secret values so that a project which does not store its private key
//!   can still accept writes.
//! - **Symmetric** ([`ServerCrypto`]): AES-256-GCM under a single
//!   server-wide master key. Used for integration metadata and for embedding
//!   a project's private key inside a third-party system.
//!
//! Ciphertexts are base64 strings. Decryption of malformed or wrong-key
//! input fails with [`VaultlineError::Decryption`]; callers decide whether
//! to abort or skip.

use crate::config::CryptoConfig;
use crate::errors::{Result, VaultlineError};
use base64::Engine;
use rand::RngCore;
use ring::aead::{self, Aad, BoundKey, Nonce, NonceSequence, UnboundKey, AES_256_GCM};
use ring::rand::{SecureRandom, SystemRandom};
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use std::sync::Arc;
use tracing::debug;
use zeroize::Zeroizing;

/// Size of the AES-256-GCM nonce in bytes
const NONCE_SIZE: usize = 12;

/// Size of the AES-256-GCM tag in bytes
const TAG_SIZE: usize = 16;

/// RSA modulus size for generated project key pairs
const RSA_BITS: usize = 2048;

/// Single-use nonce sequence for AES-GCM
struct SingleNonce {
    nonce: Option<[u8; NONCE_SIZE]>,
}

impl SingleNonce {
    fn new(nonce_bytes: [u8; NONCE_SIZE]) -> Self {
        Self { nonce: Some(nonce_bytes) }
    }
}

impl NonceSequence for SingleNonce {
    fn advance(&mut self) -> std::result::Result<Nonce, ring::error::Unspecified> {
        self.nonce.take().map(Nonce::assume_unique_for_key).ok_or(ring::error::Unspecified)
    }
}

fn seal(key: &[u8; 32], plaintext: &[u8]) -> Result<Vec<u8>> {
    let rng = SystemRandom::new();
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rng.fill(&mut nonce_bytes)
        .map_err(|_| VaultlineError::internal("Failed to generate random nonce for encryption"))?;

    let unbound_key = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| VaultlineError::internal("Failed to create encryption key"))?;
    let mut sealing_key = aead::SealingKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    let mut buffer = plaintext.to_vec();
    buffer.reserve(TAG_SIZE);
    sealing_key
        .seal_in_place_append_tag(Aad::empty(), &mut buffer)
        .map_err(|_| VaultlineError::internal("Failed to encrypt data"))?;

    let mut out = Vec::with_capacity(NONCE_SIZE + buffer.len());
    out.extend_from_slice(&nonce_bytes);
    out.extend_from_slice(&buffer);
    Ok(out)
}

fn open(key: &[u8; 32], blob: &[u8]) -> Result<Vec<u8>> {
    if blob.len() < NONCE_SIZE + TAG_SIZE {
        return Err(VaultlineError::decryption("Ciphertext too short"));
    }

    let mut nonce_bytes = [0u8; NONCE_SIZE];
    nonce_bytes.copy_from_slice(&blob[..NONCE_SIZE]);

    let unbound_key = UnboundKey::new(&AES_256_GCM, key)
        .map_err(|_| VaultlineError::internal("Failed to create decryption key"))?;
    let mut opening_key = aead::OpeningKey::new(unbound_key, SingleNonce::new(nonce_bytes));

    let mut buffer = blob[NONCE_SIZE..].to_vec();
    let plaintext = opening_key
        .open_in_place(Aad::empty(), &mut buffer)
        .map_err(|_| VaultlineError::decryption("Authentication failed (tampering or wrong key)"))?;

    Ok(plaintext.to_vec())
}

/// A generated project key pair, PEM encoded
#[derive(Clone)]
pub struct ProjectKeyPair {
    pub public_key_pem: String,
    pub private_key_pem: String,
}

impl std::fmt::Debug for ProjectKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProjectKeyPair")
            .field("public_key_pem", &"[PEM]")
            .field("private_key_pem", &"[REDACTED]")
            .finish()
    }
}

/// Generate a fresh RSA key pair for a project
pub fn generate_keypair() -> Result<ProjectKeyPair> {
    let mut rng = rand::thread_rng();
    let private = RsaPrivateKey::new(&mut rng, RSA_BITS)
        .map_err(|e| VaultlineError::internal(format!("Key generation failed: {}", e)))?;
    let public = RsaPublicKey::from(&private);

    let public_key_pem = public
        .to_public_key_pem(LineEnding::LF)
        .map_err(|e| VaultlineError::internal(format!("Public key encoding failed: {}", e)))?;
    let private_key_pem = private
        .to_pkcs8_pem(LineEnding::LF)
        .map_err(|e| VaultlineError::internal(format!("Private key encoding failed: {}", e)))?
        .to_string();

    Ok(ProjectKeyPair { public_key_pem, private_key_pem })
}

/// Encrypt a value against a project's public key.
///
/// Hybrid scheme: a random 32-byte data key encrypts the value with
/// AES-256-GCM, and RSA-OAEP(SHA-256) wraps the data key. The blob layout is
/// `wrapped_len(2 BE) || wrapped_key || nonce || ciphertext+tag`, base64
/// encoded, so OAEP's plaintext limit never constrains value size.
pub fn encrypt_asymmetric(public_key_pem: &str, plaintext: &str) -> Result<String> {
    let public = RsaPublicKey::from_public_key_pem(public_key_pem)
        .map_err(|e| VaultlineError::bad_request("Invalid public key", e.to_string()))?;

    let mut data_key = Zeroizing::new([0u8; 32]);
    rand::thread_rng().fill_bytes(data_key.as_mut());

    let mut rng = rand::thread_rng();
    let wrapped = public
        .encrypt(&mut rng, Oaep::new::<Sha256>(), data_key.as_ref())
        .map_err(|e| VaultlineError::internal(format!("Key wrap failed: {}", e)))?;

    let sealed = seal(&data_key, plaintext.as_bytes())?;

    let mut blob = Vec::with_capacity(2 + wrapped.len() + sealed.len());
    blob.extend_from_slice(&(wrapped.len() as u16).to_be_bytes());
    blob.extend_from_slice(&wrapped);
    blob.extend_from_slice(&sealed);

    Ok(base64::engine::general_purpose::STANDARD.encode(blob))
}

/// Decrypt a value with a project's private key.
pub fn decrypt_asymmetric(private_key_pem: &str, ciphertext: &str) -> Result<String> {
    let private = RsaPrivateKey::from_pkcs8_pem(private_key_pem)
        .map_err(|e| VaultlineError::decryption(format!("Invalid private key: {}", e)))?;

    let blob = base64::engine::general_purpose::STANDARD
        .decode(ciphertext)
        .map_err(|_| VaultlineError::decryption("Ciphertext is not valid base64"))?;

    if blob.len() < 2 {
        return Err(VaultlineError::decryption("Ciphertext too short"));
    }
    let wrapped_len = u16::from_be_bytes([blob[0], blob[1]]) as usize;
    if blob.len() < 2 + wrapped_len {
        return Err(VaultlineError::decryption("Truncated ciphertext"));
    }

    let data_key_bytes = Zeroizing::new(
        private
            .decrypt(Oaep::new::<Sha256>(), &blob[2..2 + wrapped_len])
            .map_err(|_| VaultlineError::decryption("Key unwrap failed (wrong key?)"))?,
    );
    if data_key_bytes.len() != 32 {
        return Err(VaultlineError::decryption("Unwrapped data key has wrong length"));
    }
    let mut data_key = Zeroizing::new([0u8; 32]);
    data_key.copy_from_slice(&data_key_bytes);

    let plaintext = open(&data_key, &blob[2 + wrapped_len..])?;
    String::from_utf8(plaintext)
        .map_err(|_| VaultlineError::decryption("Decrypted value is not valid UTF-8"))
}

/// Server-wide symmetric encryption ("s-encrypt") for integration metadata.
#[derive(Clone)]
pub struct ServerCrypto {
    key_bytes: Arc<[u8; 32]>,
}

impl ServerCrypto {
    /// Create the provider from configuration
    pub fn new(config: &CryptoConfig) -> Result<Self> {
        let key_bytes = base64::engine::general_purpose::STANDARD
            .decode(&config.server_key_base64)
            .map_err(|e| {
                VaultlineError::config(format!("Invalid base64 in VAULTLINE_SERVER_KEY: {}", e))
            })?;

        if key_bytes.len() != 32 {
            return Err(VaultlineError::config(format!(
                "VAULTLINE_SERVER_KEY must be 32 bytes (256 bits), got {} bytes",
                key_bytes.len()
            )));
        }

        let mut key_array = [0u8; 32];
        key_array.copy_from_slice(&key_bytes);

        debug!("Server crypto provider initialized");

        Ok(Self { key_bytes: Arc::new(key_array) })
    }

    /// Deterministic key for unit tests only
    #[cfg(test)]
    pub fn for_testing() -> Self {
        Self { key_bytes: Arc::new([0x42u8; 32]) }
    }

    /// Encrypt a plaintext string; returns base64(nonce || ciphertext || tag)
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let blob = seal(&self.key_bytes, plaintext.as_bytes())?;
        Ok(base64::engine::general_purpose::STANDARD.encode(blob))
    }

    /// Decrypt a blob produced by [`ServerCrypto::encrypt`]
    pub fn decrypt(&self, ciphertext: &str) -> Result<String> {
        let blob = base64::engine::general_purpose::STANDARD
            .decode(ciphertext)
            .map_err(|_| VaultlineError::decryption("Ciphertext is not valid base64"))?;
        let plaintext = open(&self.key_bytes, &blob)?;
        String::from_utf8(plaintext)
            .map_err(|_| VaultlineError::decryption("Decrypted value is not valid UTF-8"))
    }
}

impl std::fmt::Debug for ServerCrypto {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerCrypto").field("key_bytes", &"[REDACTED]").finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_roundtrip() {
        let crypto = ServerCrypto::for_testing();
        let ciphertext = crypto.encrypt("{\"webhookUrl\":\"https://x\"}").unwrap();
        assert_ne!(ciphertext, "{\"webhookUrl\":\"https://x\"}");
        assert_eq!(crypto.decrypt(&ciphertext).unwrap(), "{\"webhookUrl\":\"https://x\"}");
    }

    #[test]
    fn test_server_nonces_are_random() {
        let crypto = ServerCrypto::for_testing();
        let a = crypto.encrypt("same").unwrap();
        let b = crypto.encrypt("same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_server_tampered_blob_fails() {
        let crypto = ServerCrypto::for_testing();
        let ciphertext = crypto.encrypt("payload").unwrap();
        let mut blob = base64::engine::general_purpose::STANDARD.decode(&ciphertext).unwrap();
        blob[NONCE_SIZE] ^= 0xFF;
        let tampered = base64::engine::general_purpose::STANDARD.encode(blob);
        assert!(matches!(
            crypto.decrypt(&tampered),
            Err(VaultlineError::Decryption { .. })
        ));
    }

    #[test]
    fn test_server_garbage_input_fails() {
        let crypto = ServerCrypto::for_testing();
        assert!(crypto.decrypt("not base64 at all!!!").is_err());
        assert!(crypto.decrypt("AAAA").is_err());
    }

    #[test]
    fn test_server_rejects_short_key() {
        let config = CryptoConfig {
            server_key_base64: base64::engine::general_purpose::STANDARD.encode([0u8; 16]),
        };
        assert!(ServerCrypto::new(&config).is_err());
    }

    #[test]
    fn test_asymmetric_roundtrip() {
        let pair = generate_keypair().unwrap();
        let ciphertext = encrypt_asymmetric(&pair.public_key_pem, "s3cr3t-value").unwrap();
        let plaintext = decrypt_asymmetric(&pair.private_key_pem, &ciphertext).unwrap();
        assert_eq!(plaintext, "s3cr3t-value");
    }

    #[test]
    fn test_asymmetric_large_value() {
        // Larger than any RSA-OAEP plaintext limit; the hybrid scheme must cope.
        let pair = generate_keypair().unwrap();
        let value = "v".repeat(16 * 1024);
        let ciphertext = encrypt_asymmetric(&pair.public_key_pem, &value).unwrap();
        assert_eq!(decrypt_asymmetric(&pair.private_key_pem, &ciphertext).unwrap(), value);
    }

    #[test]
    fn test_asymmetric_wrong_key_fails() {
        let pair = generate_keypair().unwrap();
        let other = generate_keypair().unwrap();
        let ciphertext = encrypt_asymmetric(&pair.public_key_pem, "value").unwrap();
        assert!(matches!(
            decrypt_asymmetric(&other.private_key_pem, &ciphertext),
            Err(VaultlineError::Decryption { .. })
        ));
    }

    #[test]
    fn test_asymmetric_malformed_blob_fails() {
        let pair = generate_keypair().unwrap();
        assert!(decrypt_asymmetric(&pair.private_key_pem, "!!").is_err());
        assert!(decrypt_asymmetric(&pair.private_key_pem, "AAEC").is_err());
    }
}
