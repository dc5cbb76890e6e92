//! Key derivation: PBKDF2-HMAC-SHA256 passphrase + salt + context → key

use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sealpipe_core::config::DEFAULT_KDF_ITERATIONS;
use sealpipe_core::{SealError, SealResult};
use secrecy::{ExposeSecret, SecretString};
use sha2::Sha256;
use zeroize::{Zeroize, Zeroizing};

use crate::key::SealKey;
use crate::{KEY_SIZE, SALT_SIZE};

/// PBKDF2 cost parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// HMAC-SHA256 iterations (default: 10,000,000)
    pub iterations: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

/// Generate a fresh random salt for one encryption session.
pub fn generate_salt() -> [u8; SALT_SIZE] {
    let mut salt = [0u8; SALT_SIZE];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}

/// Derive a 256-bit key from a passphrase, salt, and host context.
///
/// The PBKDF2 salt input is `salt || context`, so the same passphrase and
/// salt yield a different key on a host with a different fingerprint.
/// The salt must be at least 16 bytes and has to be kept (the envelope
/// header stores it) to derive the same key again.
pub fn derive_key(
    passphrase: &SecretString,
    salt: &[u8],
    context: &[u8],
    params: &KdfParams,
) -> SealResult<SealKey> {
    let secret = passphrase.expose_secret();
    if secret.is_empty() {
        return Err(SealError::invalid_input("passphrase is empty"));
    }
    if context.is_empty() {
        return Err(SealError::invalid_input("context fingerprint is empty"));
    }
    if salt.len() < SALT_SIZE {
        return Err(SealError::invalid_input(format!(
            "salt must be at least {SALT_SIZE} bytes, got {}",
            salt.len()
        )));
    }
    if params.iterations == 0 {
        return Err(SealError::invalid_input("iteration count must be non-zero"));
    }

    let mut salted = Zeroizing::new(Vec::with_capacity(salt.len() + context.len()));
    salted.extend_from_slice(salt);
    salted.extend_from_slice(context);

    let mut key = [0u8; KEY_SIZE];
    pbkdf2_hmac::<Sha256>(secret.as_bytes(), &salted, params.iterations, &mut key);

    let derived = SealKey::from_bytes(key);
    key.zeroize();

    tracing::debug!(iterations = params.iterations, "derived key");
    Ok(derived)
}

#[cfg(test)]
mod tests {
    use super::*;

    // Use fast params for testing
    const FAST: KdfParams = KdfParams { iterations: 1_000 };

    #[test]
    fn test_kdf_deterministic() {
        let passphrase = SecretString::from("test-passphrase-123");
        let salt = [1u8; SALT_SIZE];

        let key1 = derive_key(&passphrase, &salt, b"host-a", &FAST).unwrap();
        let key2 = derive_key(&passphrase, &salt, b"host-a", &FAST).unwrap();

        assert_eq!(
            key1.as_bytes(),
            key2.as_bytes(),
            "KDF must be deterministic"
        );
    }

    #[test]
    fn test_kdf_different_passphrases() {
        let salt = [1u8; SALT_SIZE];

        let key1 = derive_key(&SecretString::from("passphrase-a"), &salt, b"ctx", &FAST).unwrap();
        let key2 = derive_key(&SecretString::from("passphrase-b"), &salt, b"ctx", &FAST).unwrap();

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different passphrases must produce different keys"
        );
    }

    #[test]
    fn test_kdf_different_salts() {
        let passphrase = SecretString::from("same-passphrase");

        let key1 = derive_key(&passphrase, &[1u8; SALT_SIZE], b"ctx", &FAST).unwrap();
        let key2 = derive_key(&passphrase, &[2u8; SALT_SIZE], b"ctx", &FAST).unwrap();

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different salts must produce different keys"
        );
    }

    #[test]
    fn test_kdf_different_contexts() {
        let passphrase = SecretString::from("same-passphrase");
        let salt = [9u8; SALT_SIZE];

        let key1 = derive_key(&passphrase, &salt, b"laptop|x86_64|linux", &FAST).unwrap();
        let key2 = derive_key(&passphrase, &salt, b"desktop|x86_64|linux", &FAST).unwrap();

        assert_ne!(
            key1.as_bytes(),
            key2.as_bytes(),
            "different host contexts must produce different keys"
        );
    }

    #[test]
    fn test_kdf_iterations_change_key() {
        let passphrase = SecretString::from("same-passphrase");
        let salt = [3u8; SALT_SIZE];

        let key1 = derive_key(&passphrase, &salt, b"ctx", &KdfParams { iterations: 1_000 }).unwrap();
        let key2 = derive_key(&passphrase, &salt, b"ctx", &KdfParams { iterations: 1_001 }).unwrap();

        assert_ne!(key1.as_bytes(), key2.as_bytes());
    }

    #[test]
    fn test_kdf_matches_pbkdf2_over_salt_and_context() {
        let passphrase = SecretString::from("pw");
        let salt = [5u8; SALT_SIZE];

        let mut expected = [0u8; KEY_SIZE];
        let mut input = salt.to_vec();
        input.extend_from_slice(b"ctx");
        pbkdf2_hmac::<Sha256>(b"pw", &input, 1_000, &mut expected);

        let key = derive_key(&passphrase, &salt, b"ctx", &FAST).unwrap();
        assert_eq!(key.as_bytes(), &expected);
    }

    #[test]
    fn test_kdf_rejects_empty_inputs() {
        let salt = [1u8; SALT_SIZE];
        let empty = SecretString::from("");
        let pw = SecretString::from("pw");

        assert!(matches!(
            derive_key(&empty, &salt, b"ctx", &FAST),
            Err(SealError::InvalidInput(_))
        ));
        assert!(matches!(
            derive_key(&pw, &salt, b"", &FAST),
            Err(SealError::InvalidInput(_))
        ));
        assert!(matches!(
            derive_key(&pw, &[1u8; 8], b"ctx", &FAST),
            Err(SealError::InvalidInput(_))
        ));
        assert!(matches!(
            derive_key(&pw, &salt, b"ctx", &KdfParams { iterations: 0 }),
            Err(SealError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_generated_salts_differ() {
        assert_ne!(generate_salt(), generate_salt());
    }

    #[test]
    fn test_default_cost_is_the_documented_one() {
        assert_eq!(KdfParams::default().iterations, 10_000_000);
    }
}
