//! The 256-bit symmetric key and its printable form

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use sealpipe_core::{SealError, SealResult};
use zeroize::Zeroize;

use crate::KEY_SIZE;

/// A 256-bit key, either derived from a passphrase or parsed from its
/// printed form.
///
/// Zeroized on drop to prevent secrets lingering in memory.
#[derive(Clone)]
pub struct SealKey {
    bytes: [u8; KEY_SIZE],
}

impl SealKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }

    /// URL-safe base64 (padded, 44 characters) for human transcription.
    pub fn to_base64(&self) -> String {
        URL_SAFE.encode(self.bytes)
    }

    /// Parse the output of [`SealKey::to_base64`]. Surrounding whitespace and
    /// missing padding are tolerated.
    pub fn from_base64(text: &str) -> SealResult<Self> {
        let text = text.trim();
        if text.is_empty() {
            return Err(SealError::invalid_input("key string is empty"));
        }
        let mut decoded = URL_SAFE
            .decode(text)
            .or_else(|_| URL_SAFE_NO_PAD.decode(text))
            .map_err(|e| SealError::invalid_input(format!("key is not URL-safe base64: {e}")))?;

        if decoded.len() != KEY_SIZE {
            let len = decoded.len();
            decoded.zeroize();
            return Err(SealError::invalid_input(format!(
                "key must decode to {KEY_SIZE} bytes, got {len}"
            )));
        }

        let mut bytes = [0u8; KEY_SIZE];
        bytes.copy_from_slice(&decoded);
        decoded.zeroize();
        Ok(Self::from_bytes(bytes))
    }
}

impl Drop for SealKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SealKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SealKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}
