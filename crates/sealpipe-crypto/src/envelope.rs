//! Streaming XChaCha20-Poly1305 envelopes
//!
//! Envelope format (binary):
//! ```text
//! header (45 bytes):
//!   [4: magic "SEAL"][1: version][4: kdf iterations, BE][16: kdf salt]
//!   [4: chunk size, BE][16: nonce prefix]
//! frames, repeated until the final flag is set:
//!   [4: ciphertext length, BE][1: final flag][N: ciphertext][16: Poly1305 tag]
//!
//! nonce(i) = nonce_prefix || i (8 bytes, BE)
//! AAD(i)   = header || i (8 bytes, BE) || final flag
//! ```
//!
//! Every frame authenticates the whole header, so the stored salt and
//! iteration count cannot be swapped. The frame index in nonce and AAD
//! prevents reordering; the final flag makes truncation at a frame boundary
//! detectable. Plaintext is released frame by frame, each only after its tag
//! verifies.

use std::io::{Read, Write};

use chacha20poly1305::{
    aead::{Aead, KeyInit, Payload},
    XChaCha20Poly1305, XNonce,
};
use rand::RngCore;
use sealpipe_core::config::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE};
use sealpipe_core::io::read_full;
use sealpipe_core::{SealError, SealResult};

use crate::kdf::KdfParams;
use crate::key::SealKey;
use crate::{NONCE_SIZE, SALT_SIZE, TAG_SIZE};

pub const MAGIC: &[u8; 4] = b"SEAL";
pub const VERSION: u8 = 1;
pub const NONCE_PREFIX_SIZE: usize = 16;
pub const HEADER_SIZE: usize = 4 + 1 + 4 + SALT_SIZE + 4 + NONCE_PREFIX_SIZE;

/// Per-frame overhead: length prefix + final flag + tag
pub const FRAME_OVERHEAD: usize = 4 + 1 + TAG_SIZE;

const FLAG_MORE: u8 = 0;
const FLAG_FINAL: u8 = 1;

/// How the key of an envelope was produced. Written into every header so the
/// key can be derived again from the passphrase.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct KeyOrigin {
    /// PBKDF2 iterations; 0 means the key was supplied directly
    pub iterations: u32,
    pub salt: [u8; SALT_SIZE],
}

impl KeyOrigin {
    pub fn derived(salt: [u8; SALT_SIZE], params: &KdfParams) -> Self {
        Self {
            iterations: params.iterations,
            salt,
        }
    }

    /// Origin of a key that was not derived by this crate
    pub fn raw() -> Self {
        Self::default()
    }

    pub fn is_derived(&self) -> bool {
        self.iterations > 0
    }

    pub fn params(&self) -> KdfParams {
        KdfParams {
            iterations: self.iterations,
        }
    }
}

/// Parsed envelope header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvelopeHeader {
    pub origin: KeyOrigin,
    /// Plaintext bytes per non-final frame
    pub chunk_size: u32,
    pub nonce_prefix: [u8; NONCE_PREFIX_SIZE],
}

impl EnvelopeHeader {
    pub fn to_bytes(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        out[0..4].copy_from_slice(MAGIC);
        out[4] = VERSION;
        out[5..9].copy_from_slice(&self.origin.iterations.to_be_bytes());
        out[9..25].copy_from_slice(&self.origin.salt);
        out[25..29].copy_from_slice(&self.chunk_size.to_be_bytes());
        out[29..45].copy_from_slice(&self.nonce_prefix);
        out
    }

    /// Parse a header. Anything malformed is an authentication failure: a
    /// header is only as trustworthy as the frames that authenticate it.
    pub fn from_bytes(bytes: &[u8; HEADER_SIZE]) -> SealResult<Self> {
        if &bytes[0..4] != MAGIC {
            return Err(SealError::auth("not a sealed envelope (bad magic)"));
        }
        if bytes[4] != VERSION {
            return Err(SealError::auth(format!(
                "unsupported envelope version {}",
                bytes[4]
            )));
        }

        let mut word = [0u8; 4];
        word.copy_from_slice(&bytes[5..9]);
        let iterations = u32::from_be_bytes(word);
        let mut salt = [0u8; SALT_SIZE];
        salt.copy_from_slice(&bytes[9..25]);
        word.copy_from_slice(&bytes[25..29]);
        let chunk_size = u32::from_be_bytes(word);
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        nonce_prefix.copy_from_slice(&bytes[29..45]);

        if chunk_size == 0 || chunk_size as usize > MAX_CHUNK_SIZE {
            return Err(SealError::auth(format!(
                "envelope chunk size {chunk_size} out of range"
            )));
        }

        Ok(Self {
            origin: KeyOrigin { iterations, salt },
            chunk_size,
            nonce_prefix,
        })
    }

    /// Read and parse the header at the start of `reader`.
    pub fn read_from<R: Read>(reader: &mut R) -> SealResult<Self> {
        let mut bytes = [0u8; HEADER_SIZE];
        let n = read_full(reader, &mut bytes)?;
        if n < HEADER_SIZE {
            return Err(SealError::auth(format!(
                "envelope truncated: {n} of {HEADER_SIZE} header bytes"
            )));
        }
        Self::from_bytes(&bytes)
    }
}

/// Byte and frame counts for one envelope
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EnvelopeStats {
    pub plaintext_bytes: u64,
    pub envelope_bytes: u64,
    pub frames: u64,
}

/// Authenticated encryption of whole byte streams under one key.
///
/// `encrypt*` and `decrypt*` are the only ways in and out; decryption
/// never goes through the encrypt path.
#[derive(Debug)]
pub struct EnvelopeCipher {
    key: SealKey,
    origin: KeyOrigin,
    chunk_size: usize,
}

impl EnvelopeCipher {
    pub fn new(key: SealKey, origin: KeyOrigin) -> Self {
        Self {
            key,
            origin,
            chunk_size: DEFAULT_CHUNK_SIZE,
        }
    }

    /// Set the plaintext bytes per frame used when encrypting.
    pub fn with_chunk_size(mut self, chunk_size: usize) -> SealResult<Self> {
        if chunk_size == 0 || chunk_size > MAX_CHUNK_SIZE {
            return Err(SealError::invalid_input(format!(
                "chunk size must be between 1 and {MAX_CHUNK_SIZE}, got {chunk_size}"
            )));
        }
        self.chunk_size = chunk_size;
        Ok(self)
    }

    pub fn origin(&self) -> &KeyOrigin {
        &self.origin
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Encrypt an in-memory buffer into a complete envelope.
    pub fn encrypt(&self, plaintext: &[u8]) -> SealResult<Vec<u8>> {
        let frames = plaintext.len() / self.chunk_size + 1;
        let mut out = Vec::with_capacity(HEADER_SIZE + plaintext.len() + frames * FRAME_OVERHEAD);
        self.encrypt_stream(plaintext, &mut out)?;
        Ok(out)
    }

    /// Verify and decrypt an in-memory envelope. On failure nothing is
    /// returned.
    pub fn decrypt(&self, envelope: &[u8]) -> SealResult<Vec<u8>> {
        let mut out = Vec::with_capacity(envelope.len());
        self.decrypt_stream(envelope, &mut out)?;
        Ok(out)
    }

    /// Encrypt `reader` into `writer` with a fresh random nonce prefix.
    pub fn encrypt_stream<R: Read, W: Write>(
        &self,
        reader: R,
        writer: &mut W,
    ) -> SealResult<EnvelopeStats> {
        let mut nonce_prefix = [0u8; NONCE_PREFIX_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_prefix);
        self.encrypt_stream_with_nonce_prefix(nonce_prefix, reader, writer)
    }

    /// Encrypt with a caller-chosen nonce prefix. The output is fully
    /// determined by key, origin, chunk size, prefix and input. A prefix must
    /// never be used twice with the same key.
    pub fn encrypt_stream_with_nonce_prefix<R: Read, W: Write>(
        &self,
        nonce_prefix: [u8; NONCE_PREFIX_SIZE],
        mut reader: R,
        writer: &mut W,
    ) -> SealResult<EnvelopeStats> {
        let header = EnvelopeHeader {
            origin: self.origin,
            chunk_size: self.chunk_size as u32,
            nonce_prefix,
        };
        let header_bytes = header.to_bytes();
        writer.write_all(&header_bytes)?;

        let aead = XChaCha20Poly1305::new(self.key.as_bytes().into());
        let mut stats = EnvelopeStats {
            envelope_bytes: HEADER_SIZE as u64,
            ..EnvelopeStats::default()
        };

        let mut current = vec![0u8; self.chunk_size];
        let mut next = vec![0u8; self.chunk_size];
        let mut current_len = read_full(&mut reader, &mut current)?;
        let mut index = 0u64;

        loop {
            // Look one chunk ahead so the last frame can carry the final flag.
            let next_len = if current_len == self.chunk_size {
                read_full(&mut reader, &mut next)?
            } else {
                0
            };
            let is_final = next_len == 0;
            let flag = if is_final { FLAG_FINAL } else { FLAG_MORE };

            let nonce = frame_nonce(&nonce_prefix, index);
            let aad = frame_aad(&header_bytes, index, flag);
            let ciphertext = aead
                .encrypt(
                    XNonce::from_slice(&nonce),
                    Payload {
                        msg: &current[..current_len],
                        aad: &aad,
                    },
                )
                .map_err(|e| SealError::invalid_input(format!("frame encryption failed: {e}")))?;

            writer.write_all(&(ciphertext.len() as u32).to_be_bytes())?;
            writer.write_all(&[flag])?;
            writer.write_all(&ciphertext)?;

            stats.plaintext_bytes += current_len as u64;
            stats.envelope_bytes += (5 + ciphertext.len()) as u64;
            stats.frames += 1;

            if is_final {
                break;
            }
            std::mem::swap(&mut current, &mut next);
            current_len = next_len;
            index += 1;
        }

        writer.flush()?;
        tracing::trace!(
            frames = stats.frames,
            plaintext_bytes = stats.plaintext_bytes,
            envelope_bytes = stats.envelope_bytes,
            "sealed envelope"
        );
        Ok(stats)
    }

    /// Read the header from `reader`, then verify and decrypt every frame
    /// into `writer`.
    pub fn decrypt_stream<R: Read, W: Write>(
        &self,
        mut reader: R,
        writer: &mut W,
    ) -> SealResult<EnvelopeStats> {
        let header = EnvelopeHeader::read_from(&mut reader)?;
        self.decrypt_body(&header, reader, writer)
    }

    /// Decrypt the frames following an already-parsed `header`.
    ///
    /// Each frame is written to `writer` only after its tag verifies, but an
    /// error in a later frame leaves earlier frames written: callers that need
    /// all-or-nothing output write to a scratch location first.
    pub fn decrypt_body<R: Read, W: Write>(
        &self,
        header: &EnvelopeHeader,
        mut reader: R,
        writer: &mut W,
    ) -> SealResult<EnvelopeStats> {
        let header_bytes = header.to_bytes();
        let chunk_size = header.chunk_size as usize;
        let max_frame = chunk_size + TAG_SIZE;
        let aead = XChaCha20Poly1305::new(self.key.as_bytes().into());

        let mut stats = EnvelopeStats {
            envelope_bytes: HEADER_SIZE as u64,
            ..EnvelopeStats::default()
        };
        let mut prefix = [0u8; 5];
        let mut frame = Vec::with_capacity(max_frame);
        let mut index = 0u64;

        loop {
            let n = read_full(&mut reader, &mut prefix)?;
            if n < prefix.len() {
                return Err(SealError::auth(format!(
                    "envelope truncated before final frame (frame {index})"
                )));
            }
            let mut len_bytes = [0u8; 4];
            len_bytes.copy_from_slice(&prefix[..4]);
            let len = u32::from_be_bytes(len_bytes) as usize;
            let flag = prefix[4];

            if !(TAG_SIZE..=max_frame).contains(&len) {
                return Err(SealError::auth(format!(
                    "frame {index} has invalid length {len}"
                )));
            }
            if flag != FLAG_MORE && flag != FLAG_FINAL {
                return Err(SealError::auth(format!("frame {index} has invalid flag {flag}")));
            }

            frame.resize(len, 0);
            if read_full(&mut reader, &mut frame)? < len {
                return Err(SealError::auth(format!("frame {index} truncated")));
            }

            let nonce = frame_nonce(&header.nonce_prefix, index);
            let aad = frame_aad(&header_bytes, index, flag);
            let plaintext = aead
                .decrypt(
                    XNonce::from_slice(&nonce),
                    Payload {
                        msg: &frame,
                        aad: &aad,
                    },
                )
                .map_err(|_| {
                    SealError::auth(format!(
                        "frame {index} failed verification: wrong key or corrupted data"
                    ))
                })?;

            let is_final = flag == FLAG_FINAL;
            if !is_final && plaintext.len() != chunk_size {
                return Err(SealError::auth(format!("frame {index} is short but not final")));
            }

            writer.write_all(&plaintext)?;
            stats.plaintext_bytes += plaintext.len() as u64;
            stats.envelope_bytes += (prefix.len() + len) as u64;
            stats.frames += 1;

            if is_final {
                break;
            }
            index += 1;
        }

        let mut trailing = [0u8; 1];
        if read_full(&mut reader, &mut trailing)? != 0 {
            return Err(SealError::auth("unexpected data after final frame"));
        }

        writer.flush()?;
        Ok(stats)
    }
}

fn frame_nonce(prefix: &[u8; NONCE_PREFIX_SIZE], index: u64) -> [u8; NONCE_SIZE] {
    let mut nonce = [0u8; NONCE_SIZE];
    nonce[..NONCE_PREFIX_SIZE].copy_from_slice(prefix);
    nonce[NONCE_PREFIX_SIZE..].copy_from_slice(&index.to_be_bytes());
    nonce
}

/// Build AAD: header (45 bytes) || index (8 bytes BE) || flag (1 byte)
fn frame_aad(header: &[u8; HEADER_SIZE], index: u64, flag: u8) -> Vec<u8> {
    let mut aad = Vec::with_capacity(HEADER_SIZE + 8 + 1);
    aad.extend_from_slice(header);
    aad.extend_from_slice(&index.to_be_bytes());
    aad.push(flag);
    aad
}
