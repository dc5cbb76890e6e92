//! sealpipe-crypto: key derivation and authenticated envelopes
//!
//! Pipeline position: plaintext → zstd compress → **seal envelope** → `<name>.sealed`
//!
//! Key handling:
//! ```text
//! passphrase ─┐
//! salt (16) ──┼─ PBKDF2-HMAC-SHA256 (iterations) ─→ SealKey (256-bit)
//! context ────┘      salt input = salt || context
//! ```
//!
//! Envelope: a 45-byte header (magic, version, KDF salt and iterations,
//! chunk size, nonce prefix) followed by XChaCha20-Poly1305 frames. See
//! [`envelope`] for the exact layout.

pub mod envelope;
pub mod kdf;
pub mod key;
pub mod passphrase;

pub use envelope::{EnvelopeCipher, EnvelopeHeader, EnvelopeStats, KeyOrigin, HEADER_SIZE};
pub use kdf::{derive_key, generate_salt, KdfParams};
pub use key::SealKey;
pub use passphrase::generate_passphrase;

/// Size of a derived key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// Size of the KDF salt stored in every envelope header
pub const SALT_SIZE: usize = 16;

/// Size of an XChaCha20-Poly1305 nonce (192-bit)
pub const NONCE_SIZE: usize = 24;

/// Size of a Poly1305 authentication tag
pub const TAG_SIZE: usize = 16;
