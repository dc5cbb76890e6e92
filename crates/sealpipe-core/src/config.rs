use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{SealError, SealResult};

/// PBKDF2 iteration count used when nothing else is configured.
///
/// Deliberately expensive: one derivation per session takes seconds.
pub const DEFAULT_KDF_ITERATIONS: u32 = 10_000_000;

/// Lowest iteration count a configuration file may request.
pub const MIN_KDF_ITERATIONS: u32 = 100_000;

/// Streaming buffer size: 1 MiB per read
pub const DEFAULT_CHUNK_SIZE: usize = 1024 * 1024;

/// Upper bound on the streaming buffer; also bounds envelope frame sizes.
pub const MAX_CHUNK_SIZE: usize = 64 * 1024 * 1024;

pub const DEFAULT_COMPRESSION_LEVEL: i32 = 3;

/// Suffix appended to sealed files
pub const DEFAULT_SUFFIX: &str = ".sealed";

/// Top-level configuration (loaded from sealpipe.toml)
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SealConfig {
    pub kdf: KdfConfig,
    pub pipeline: PipelineSection,
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KdfConfig {
    /// PBKDF2-HMAC-SHA256 iterations (default: 10,000,000)
    pub iterations: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineSection {
    /// Bytes read per streaming step (default: 1 MiB)
    pub chunk_size: usize,
    /// zstd compression level, 1..=22 (default: 3)
    pub compression_level: i32,
    /// Suffix for sealed files (default: ".sealed")
    pub suffix: String,
    /// Directory holding plaintext files (default: "input")
    pub input_dir: PathBuf,
    /// Directory holding sealed files (default: "output")
    pub output_dir: PathBuf,
    /// Keep sealed files after unsealing them (default: false)
    pub keep_sealed: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LogConfig {
    /// Log level filter (default: info)
    pub level: String,
    /// Log format: "json" or "text"
    pub format: String,
}

impl Default for KdfConfig {
    fn default() -> Self {
        Self {
            iterations: DEFAULT_KDF_ITERATIONS,
        }
    }
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            suffix: DEFAULT_SUFFIX.into(),
            input_dir: PathBuf::from("input"),
            output_dir: PathBuf::from("output"),
            keep_sealed: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

impl SealConfig {
    /// Load configuration from a TOML file, falling back to defaults when
    /// the file does not exist. The result is validated.
    ///
    /// Nothing is logged here; this runs before a subscriber is installed.
    pub fn load(path: &Path) -> SealResult<Self> {
        let config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            toml::from_str(&content)
                .map_err(|e| SealError::Config(format!("parsing {}: {e}", path.display())))?
        } else {
            Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> SealResult<()> {
        if self.kdf.iterations < MIN_KDF_ITERATIONS {
            return Err(SealError::Config(format!(
                "kdf.iterations = {} is below the minimum of {MIN_KDF_ITERATIONS}",
                self.kdf.iterations
            )));
        }
        if self.pipeline.chunk_size == 0 || self.pipeline.chunk_size > MAX_CHUNK_SIZE {
            return Err(SealError::Config(format!(
                "pipeline.chunk_size must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                self.pipeline.chunk_size
            )));
        }
        if !(1..=22).contains(&self.pipeline.compression_level) {
            return Err(SealError::Config(format!(
                "pipeline.compression_level must be 1..=22, got {}",
                self.pipeline.compression_level
            )));
        }
        let suffix = &self.pipeline.suffix;
        if suffix.len() < 2 || !suffix.starts_with('.') || suffix.contains(['/', '\\']) {
            return Err(SealError::Config(format!(
                "pipeline.suffix must look like \".ext\", got {suffix:?}"
            )));
        }
        if !matches!(self.log.format.as_str(), "json" | "text") {
            return Err(SealError::Config(format!(
                "log.format must be \"json\" or \"text\", got {:?}",
                self.log.format
            )));
        }
        Ok(())
    }
}
