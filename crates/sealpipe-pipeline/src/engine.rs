//! Per-file pipeline: compress → encrypt and decrypt → decompress
//!
//! Each stage runs to completion before the next one starts. Stage output
//! goes to a scratch file in the destination directory; scratch files are
//! deleted when dropped, so a failure at any point leaves nothing behind.
//! The destination file is created by an atomic rename after the last stage.

use std::ffi::OsString;
use std::fs::File;
use std::io::{BufReader, BufWriter, Seek};
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Instant;

use sealpipe_chunks::{compress_to, decompress_to, CompressOptions};
use sealpipe_core::config::{
    PipelineSection, DEFAULT_CHUNK_SIZE, DEFAULT_COMPRESSION_LEVEL, DEFAULT_KDF_ITERATIONS,
    DEFAULT_SUFFIX, MAX_CHUNK_SIZE, MIN_KDF_ITERATIONS,
};
use sealpipe_core::{Direction, FileReport, SealError, SealResult, Stage};
use sealpipe_crypto::{derive_key, EnvelopeCipher, EnvelopeHeader, KeyOrigin, SealKey};
use secrecy::SecretString;
use tempfile::NamedTempFile;
use tracing::{debug, info, warn};

/// Prefix of scratch files created next to pipeline outputs
pub const SCRATCH_PREFIX: &str = ".sealpipe-";

/// Explicit pipeline settings, passed in at construction
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bytes per streaming step and per envelope frame
    pub chunk_size: usize,
    /// zstd level
    pub compression_level: i32,
    /// Suffix of sealed files, including the leading dot
    pub suffix: String,
    /// Keep `<name>.sealed` after it has been unsealed successfully
    pub keep_sealed: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression_level: DEFAULT_COMPRESSION_LEVEL,
            suffix: DEFAULT_SUFFIX.into(),
            keep_sealed: false,
        }
    }
}

impl From<&PipelineSection> for PipelineConfig {
    fn from(section: &PipelineSection) -> Self {
        Self {
            chunk_size: section.chunk_size,
            compression_level: section.compression_level,
            suffix: section.suffix.clone(),
            keep_sealed: section.keep_sealed,
        }
    }
}

/// Where the unseal path gets its key from
#[derive(Debug)]
pub enum KeySource {
    /// The printed session key
    Key(SealKey),
    /// Passphrase plus host context; the key is derived again from the salt
    /// and iteration count stored in each envelope header
    Passphrase(PassphraseKeys),
}

impl KeySource {
    pub fn passphrase(passphrase: SecretString, context: impl Into<Vec<u8>>) -> Self {
        Self::Passphrase(PassphraseKeys::new(passphrase, context))
    }

    fn cipher_for(&self, header: &EnvelopeHeader) -> SealResult<EnvelopeCipher> {
        let key = match self {
            KeySource::Key(key) => key.clone(),
            KeySource::Passphrase(keys) => keys.key_for(&header.origin)?,
        };
        Ok(EnvelopeCipher::new(key, header.origin))
    }
}

/// Passphrase-based key source.
///
/// Envelopes sealed in one session share a salt, so the last derived key is
/// kept to avoid running the KDF again for every file.
///
/// The iteration count comes from a header that is not authenticated until
/// the key exists, so only counts inside `iterations` are ever run.
#[derive(Debug)]
pub struct PassphraseKeys {
    passphrase: SecretString,
    context: Vec<u8>,
    iterations: RangeInclusive<u32>,
    last: Mutex<Option<(KeyOrigin, SealKey)>>,
}

impl PassphraseKeys {
    /// Accepts header iteration counts from `MIN_KDF_ITERATIONS` up to
    /// `DEFAULT_KDF_ITERATIONS`.
    pub fn new(passphrase: SecretString, context: impl Into<Vec<u8>>) -> Self {
        Self {
            passphrase,
            context: context.into(),
            iterations: MIN_KDF_ITERATIONS..=DEFAULT_KDF_ITERATIONS,
            last: Mutex::new(None),
        }
    }

    /// Replace the accepted range of header iteration counts.
    pub fn with_iteration_range(mut self, iterations: RangeInclusive<u32>) -> Self {
        self.iterations = iterations;
        self
    }

    fn key_for(&self, origin: &KeyOrigin) -> SealResult<SealKey> {
        if !origin.is_derived() {
            return Err(SealError::invalid_input(
                "envelope was sealed with a raw key; unseal it with the key string",
            ));
        }
        if !self.iterations.contains(&origin.iterations) {
            return Err(SealError::auth(format!(
                "header claims {} KDF iterations, accepted range is {}..={}",
                origin.iterations,
                self.iterations.start(),
                self.iterations.end()
            )));
        }

        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        if let Some((cached_origin, key)) = last.as_ref() {
            if cached_origin == origin {
                return Ok(key.clone());
            }
        }

        let key = derive_key(&self.passphrase, &origin.salt, &self.context, &origin.params())?;
        *last = Some((*origin, key.clone()));
        Ok(key)
    }
}

/// Logs stage transitions for one file and remembers where it stopped.
struct StageTracker<'a> {
    path: &'a Path,
    direction: Direction,
    stage: Stage,
}

impl<'a> StageTracker<'a> {
    fn new(path: &'a Path, direction: Direction) -> Self {
        Self {
            path,
            direction,
            stage: Stage::Idle,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug_assert_eq!(self.stage.next(self.direction), Some(next));
        debug!(
            path = %self.path.display(),
            direction = %self.direction,
            from = %self.stage,
            to = %next,
            "stage"
        );
        self.stage = next;
    }

    fn fail(&mut self, err: &SealError) {
        warn!(
            path = %self.path.display(),
            direction = %self.direction,
            stage = %self.stage,
            kind = err.kind(),
            "failed: {err}"
        );
        self.stage = Stage::Failed;
    }
}

/// Sizes produced by a successful run
struct Written {
    output: PathBuf,
    original_size: u64,
    transformed_size: u64,
}

/// The per-file sealing pipeline
#[derive(Debug, Clone)]
pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> SealResult<Self> {
        if config.chunk_size == 0 || config.chunk_size > MAX_CHUNK_SIZE {
            return Err(SealError::invalid_input(format!(
                "chunk size must be between 1 and {MAX_CHUNK_SIZE}, got {}",
                config.chunk_size
            )));
        }
        let suffix = &config.suffix;
        if suffix.len() < 2 || !suffix.starts_with('.') || suffix.contains(['/', '\\']) {
            return Err(SealError::invalid_input(format!(
                "suffix must look like \".ext\", got {:?}",
                config.suffix
            )));
        }
        Ok(Self { config })
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// True if `path` has the sealed-file suffix and a non-empty stem.
    pub fn is_sealed_name(&self, path: &Path) -> bool {
        self.unsealed_name(path).is_ok()
    }

    fn sealed_name(&self, input: &Path) -> SealResult<OsString> {
        let mut name = input
            .file_name()
            .ok_or_else(|| SealError::invalid_input(format!("no file name: {}", input.display())))?
            .to_os_string();
        name.push(&self.config.suffix);
        Ok(name)
    }

    fn unsealed_name<'p>(&self, input: &'p Path) -> SealResult<&'p str> {
        let name = input
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| SealError::invalid_input(format!("no usable file name: {}", input.display())))?;
        name.strip_suffix(self.config.suffix.as_str())
            .filter(|stem| !stem.is_empty())
            .ok_or_else(|| {
                SealError::invalid_input(format!(
                    "{} does not end with {}",
                    input.display(),
                    self.config.suffix
                ))
            })
    }

    /// Compress and encrypt `input` into `<output_dir>/<name><suffix>`.
    pub fn encrypt_file(
        &self,
        cipher: &EnvelopeCipher,
        input: &Path,
        output_dir: &Path,
    ) -> SealResult<FileReport> {
        let started = Instant::now();
        let mut tracker = StageTracker::new(input, Direction::Seal);

        match self.run_seal(cipher, input, output_dir, &mut tracker) {
            Ok(written) => {
                tracker.advance(Stage::Done);
                let report = self.report(input, Direction::Seal, written, started);
                info!(
                    path = %input.display(),
                    output = %report.output.display(),
                    original_size = report.original_size,
                    sealed_size = report.transformed_size,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "sealed"
                );
                Ok(report)
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    /// Decrypt and decompress `input` (`<name><suffix>`) into
    /// `<output_dir>/<name>`. Nothing is written unless every frame
    /// authenticates and the compressed stream is complete.
    pub fn decrypt_file(
        &self,
        keys: &KeySource,
        input: &Path,
        output_dir: &Path,
    ) -> SealResult<FileReport> {
        let started = Instant::now();
        let mut tracker = StageTracker::new(input, Direction::Unseal);

        match self.run_unseal(keys, input, output_dir, &mut tracker) {
            Ok(written) => {
                tracker.advance(Stage::Done);
                let report = self.report(input, Direction::Unseal, written, started);
                info!(
                    path = %input.display(),
                    output = %report.output.display(),
                    sealed_size = report.original_size,
                    original_size = report.transformed_size,
                    elapsed_ms = report.elapsed.as_millis() as u64,
                    "unsealed"
                );
                if !self.config.keep_sealed {
                    if let Err(e) = std::fs::remove_file(input) {
                        warn!(path = %input.display(), "could not remove sealed file: {e}");
                    }
                }
                Ok(report)
            }
            Err(e) => {
                tracker.fail(&e);
                Err(e)
            }
        }
    }

    fn run_seal(
        &self,
        cipher: &EnvelopeCipher,
        input: &Path,
        output_dir: &Path,
        tracker: &mut StageTracker<'_>,
    ) -> SealResult<Written> {
        let output = output_dir.join(self.sealed_name(input)?);
        let source = File::open(input)?;
        let original_size = source.metadata()?.len();

        tracker.advance(Stage::Compressing);
        let mut compressed = scratch_file(output_dir)?;
        compress_to(
            BufReader::new(source),
            &mut BufWriter::new(compressed.as_file_mut()),
            CompressOptions {
                chunk_size: self.config.chunk_size,
                level: self.config.compression_level,
            },
        )?;
        compressed.as_file_mut().rewind()?;

        tracker.advance(Stage::Encrypting);
        let mut sealed = scratch_file(output_dir)?;
        cipher.encrypt_stream(
            BufReader::new(compressed.as_file_mut()),
            &mut BufWriter::new(sealed.as_file_mut()),
        )?;
        drop(compressed);

        let transformed_size = finish(sealed, &output)?;
        Ok(Written {
            output,
            original_size,
            transformed_size,
        })
    }

    fn run_unseal(
        &self,
        keys: &KeySource,
        input: &Path,
        output_dir: &Path,
        tracker: &mut StageTracker<'_>,
    ) -> SealResult<Written> {
        let output = output_dir.join(self.unsealed_name(input)?);
        let source = File::open(input)?;
        let original_size = source.metadata()?.len();

        tracker.advance(Stage::Decrypting);
        let mut reader = BufReader::new(source);
        let header = EnvelopeHeader::read_from(&mut reader)?;
        let cipher = keys.cipher_for(&header)?;
        let mut compressed = scratch_file(output_dir)?;
        cipher.decrypt_body(
            &header,
            reader,
            &mut BufWriter::new(compressed.as_file_mut()),
        )?;
        compressed.as_file_mut().rewind()?;

        // Only authenticated bytes reach the decompressor.
        tracker.advance(Stage::Decompressing);
        let mut plain = scratch_file(output_dir)?;
        decompress_to(
            BufReader::new(compressed.as_file_mut()),
            &mut BufWriter::new(plain.as_file_mut()),
            self.config.chunk_size,
        )?;
        drop(compressed);

        let transformed_size = finish(plain, &output)?;
        Ok(Written {
            output,
            original_size,
            transformed_size,
        })
    }

    fn report(&self, input: &Path, direction: Direction, written: Written, started: Instant) -> FileReport {
        FileReport {
            source: input.to_path_buf(),
            output: written.output,
            direction,
            original_size: written.original_size,
            transformed_size: written.transformed_size,
            elapsed: started.elapsed(),
        }
    }
}

/// Create a scratch file in `dir` that is deleted when dropped.
fn scratch_file(dir: &Path) -> SealResult<NamedTempFile> {
    Ok(tempfile::Builder::new()
        .prefix(SCRATCH_PREFIX)
        .suffix(".tmp")
        .tempfile_in(dir)?)
}

/// Sync a finished scratch file and rename it to `output`.
fn finish(scratch: NamedTempFile, output: &Path) -> SealResult<u64> {
    scratch.as_file().sync_all()?;
    let size = scratch.as_file().metadata()?.len();
    scratch.persist(output).map_err(|e| SealError::Io(e.error))?;
    Ok(size)
}
