//! Session passphrase generation

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use secrecy::SecretString;
use zeroize::Zeroize;

/// Random bytes behind a generated passphrase
pub const PASSPHRASE_ENTROPY_BYTES: usize = 256;

/// Generate a high-entropy passphrase for one encryption session.
///
/// 256 random bytes rendered as URL-safe base64 without padding
/// (342 characters).
pub fn generate_passphrase() -> SecretString {
    let mut raw = [0u8; PASSPHRASE_ENTROPY_BYTES];
    rand::thread_rng().fill_bytes(&mut raw);
    let encoded = URL_SAFE_NO_PAD.encode(raw);
    raw.zeroize();
    SecretString::from(encoded)
}
