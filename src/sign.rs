//! Deterministic ed25519 key derivation, base64 codecs and the stateless
//! signature verifier used by route transactions.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SECRET_KEY_LENGTH};
use rand_core::OsRng;
use sha2::{Digest, Sha512};
use std::{fs, path::PathBuf};
use thiserror::Error;

/// Describes how an AS operator's signing key should be obtained.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Deterministic key derived from an `ed25519://` seed string.
    Seed(String),
    /// Load the secret key material from the provided file path.
    File(PathBuf),
    /// Use a freshly generated random key.
    Random,
}

impl KeySource {
    /// Parses a `--seed`/`--key` CLI argument into a concrete key source.
    pub fn from_spec(spec: Option<&str>) -> Self {
        match spec {
            Some(value) if value.starts_with("ed25519://") => {
                Self::Seed(value.trim_start_matches("ed25519://").to_string())
            }
            Some(value) if !value.is_empty() && PathBuf::from(value).is_file() => {
                Self::File(PathBuf::from(value))
            }
            Some(value) if !value.is_empty() => Self::Seed(value.to_string()),
            _ => Self::Random,
        }
    }
}

/// Errors reported while loading or decoding key material.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum KeyError {
    /// Underlying filesystem I/O failure.
    #[error("key I/O error: {0}")]
    Io(String),
    /// Base64 or ed25519 parsing failure.
    #[error("key decode error: {0}")]
    Decode(String),
    /// Buffer did not match the expected secret-key length.
    #[error("unexpected key length: {0}")]
    InvalidLength(usize),
}

/// Loads or derives a signing key according to the source specification.
pub fn load_signing_key(source: &KeySource) -> Result<SigningKey, KeyError> {
    let secret = match source {
        KeySource::Seed(seed) => derive_secret_from_seed(seed),
        KeySource::File(path) => {
            let contents = fs::read(path).map_err(|err| KeyError::Io(err.to_string()))?;
            secret_from_file_contents(&contents)?
        }
        KeySource::Random => SigningKey::generate(&mut OsRng).to_bytes(),
    };
    Ok(SigningKey::from_bytes(&secret))
}

/// Derives a signing key from a seed string (`SHA-512(seed)[..32]`).
pub fn signing_key_from_seed(seed: &str) -> SigningKey {
    SigningKey::from_bytes(&derive_secret_from_seed(seed))
}

fn derive_secret_from_seed(seed: &str) -> [u8; SECRET_KEY_LENGTH] {
    let mut hasher = Sha512::new();
    hasher.update(seed.as_bytes());
    let digest = hasher.finalize();
    let mut secret = [0u8; SECRET_KEY_LENGTH];
    secret.copy_from_slice(&digest[..SECRET_KEY_LENGTH]);
    secret
}

fn secret_from_file_contents(contents: &[u8]) -> Result<[u8; SECRET_KEY_LENGTH], KeyError> {
    if contents.len() == SECRET_KEY_LENGTH {
        return bytes_to_secret(contents);
    }
    let text = std::str::from_utf8(contents).map_err(|err| KeyError::Decode(err.to_string()))?;
    let trimmed = text.trim();
    if trimmed.len() == SECRET_KEY_LENGTH * 2 {
        if let Ok(decoded) = hex::decode(trimmed) {
            return bytes_to_secret(decoded);
        }
    }
    let decoded = BASE64
        .decode(trimmed)
        .map_err(|err| KeyError::Decode(err.to_string()))?;
    bytes_to_secret(decoded)
}

fn bytes_to_secret(bytes: impl AsRef<[u8]>) -> Result<[u8; SECRET_KEY_LENGTH], KeyError> {
    let bytes = bytes.as_ref();
    if bytes.len() != SECRET_KEY_LENGTH {
        return Err(KeyError::InvalidLength(bytes.len()));
    }
    let mut secret = [0u8; SECRET_KEY_LENGTH];
    secret.copy_from_slice(bytes);
    Ok(secret)
}

/// Encodes a public key as base64.
pub fn encode_public_key_base64(verifying: &VerifyingKey) -> String {
    BASE64.encode(verifying.to_bytes())
}

/// Encodes a signature as base64.
pub fn encode_signature_base64(sig: &Signature) -> String {
    BASE64.encode(sig.to_bytes())
}

/// Decodes a base64 signature.
pub fn decode_signature_base64(input: &str) -> Result<Signature, KeyError> {
    let bytes = BASE64
        .decode(input.trim())
        .map_err(|err| KeyError::Decode(err.to_string()))?;
    Signature::from_slice(&bytes).map_err(|err| KeyError::Decode(err.to_string()))
}

/// Decodes a base64 public key.
pub fn decode_public_key_base64(input: &str) -> Result<VerifyingKey, KeyError> {
    let bytes = BASE64
        .decode(input.trim())
        .map_err(|err| KeyError::Decode(err.to_string()))?;
    VerifyingKey::try_from(bytes.as_slice()).map_err(|err| KeyError::Decode(err.to_string()))
}

/// Signs a transaction digest (the hex txid) with the provided signing key.
pub fn sign_digest(signing: &SigningKey, digest_hex: &str) -> Signature {
    signing.sign(digest_hex.as_bytes())
}

/// Stateless verifier: checks `signature` over the hex digest with `verifying`.
///
/// Every failure mode collapses to `false`.
pub fn verify_digest(verifying: &VerifyingKey, digest_hex: &str, signature: &Signature) -> bool {
    verifying.verify(digest_hex.as_bytes(), signature).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seed_derivation_is_deterministic() {
        let a = signing_key_from_seed("as-13335");
        let b = signing_key_from_seed("as-13335");
        let c = signing_key_from_seed("as-13336");
        assert_eq!(a.to_bytes(), b.to_bytes());
        assert_ne!(a.to_bytes(), c.to_bytes());
    }

    #[test]
    fn key_source_parses_seed_prefix() {
        match KeySource::from_spec(Some("ed25519://alpha")) {
            KeySource::Seed(seed) => assert_eq!(seed, "alpha"),
            other => panic!("unexpected source {other:?}"),
        }
        assert!(matches!(KeySource::from_spec(None), KeySource::Random));
        let key = load_signing_key(&KeySource::Seed("alpha".into())).unwrap();
        assert_eq!(key.to_bytes(), signing_key_from_seed("alpha").to_bytes());
    }

    #[test]
    fn sign_and_verify_digest() {
        let key = signing_key_from_seed("as-700");
        let sig = sign_digest(&key, "abcd");
        assert!(verify_digest(&key.verifying_key(), "abcd", &sig));
        assert!(!verify_digest(&key.verifying_key(), "abce", &sig));
        let other = signing_key_from_seed("as-800");
        assert!(!verify_digest(&other.verifying_key(), "abcd", &sig));
    }

    #[test]
    fn base64_codecs_reject_garbage() {
        let key = signing_key_from_seed("as-1");
        let encoded = encode_public_key_base64(&key.verifying_key());
        assert_eq!(
            decode_public_key_base64(&encoded).unwrap(),
            key.verifying_key()
        );
        assert!(decode_public_key_base64("not base64!").is_err());
        assert!(decode_signature_base64("AAAA").is_err());
    }

    #[test]
    fn file_contents_accept_hex_and_raw() {
        let key = signing_key_from_seed("file");
        let raw = key.to_bytes();
        assert_eq!(secret_from_file_contents(&raw).unwrap(), raw);
        let hexed = hex::encode(raw);
        assert_eq!(secret_from_file_contents(hexed.as_bytes()).unwrap(), raw);
        assert_eq!(
            secret_from_file_contents(b"AAAA"),
            Err(KeyError::InvalidLength(3))
        );
    }
}
