//! sealpipe-pipeline: per-file sealing state machine and directory driver
//!
//! Seal:   plaintext → zstd (scratch file) → envelope (scratch file) → `<name>.sealed`
//! Unseal: `<name>.sealed` → verified zstd (scratch file) → plaintext (scratch file) → `<name>`
//!
//! Scratch files live next to the output and are removed on every exit path;
//! the final file appears only once the last stage has succeeded.

pub mod batch;
pub mod engine;

pub use batch::{decrypt_dir, encrypt_dir, BatchSummary, FileOutcome, ProgressFn};
pub use engine::{KeySource, PassphraseKeys, Pipeline, PipelineConfig};
