//! Directory batch driver
//!
//! Lists the regular files of one directory (not recursive), runs the
//! pipeline on each in sorted order and collects per-file outcomes. A
//! failing file is logged and recorded; the batch moves on.

use std::fs;
use std::path::{Path, PathBuf};

use sealpipe_core::{FileReport, SealError, SealResult};
use sealpipe_crypto::EnvelopeCipher;
use tracing::{info, warn};

use crate::engine::{KeySource, Pipeline, SCRATCH_PREFIX};

/// Progress callback: (files done, files total, current file name)
pub type ProgressFn = Box<dyn Fn(u64, u64, &str) + Send + Sync>;

/// Result for one file of a batch
#[derive(Debug)]
pub struct FileOutcome {
    pub path: PathBuf,
    pub result: SealResult<FileReport>,
}

/// All outcomes of one batch, in processing order
#[derive(Debug, Default)]
pub struct BatchSummary {
    pub outcomes: Vec<FileOutcome>,
}

impl BatchSummary {
    pub fn total(&self) -> usize {
        self.outcomes.len()
    }

    pub fn succeeded(&self) -> usize {
        self.reports().count()
    }

    pub fn failed(&self) -> usize {
        self.total() - self.succeeded()
    }

    /// True when every file went through
    pub fn is_clean(&self) -> bool {
        self.failed() == 0
    }

    pub fn reports(&self) -> impl Iterator<Item = &FileReport> {
        self.outcomes.iter().filter_map(|o| o.result.as_ref().ok())
    }

    pub fn failures(&self) -> impl Iterator<Item = (&Path, &SealError)> {
        self.outcomes
            .iter()
            .filter_map(|o| o.result.as_ref().err().map(|e| (o.path.as_path(), e)))
    }

    /// Total bytes read by successful files
    pub fn bytes_in(&self) -> u64 {
        self.reports().map(|r| r.original_size).sum()
    }

    /// Total bytes written by successful files
    pub fn bytes_out(&self) -> u64 {
        self.reports().map(|r| r.transformed_size).sum()
    }
}

/// Regular files directly inside `dir` accepted by `keep`, sorted by path.
///
/// Scratch files left by a concurrent run are never listed.
pub fn collect_files(dir: &Path, keep: impl Fn(&Path) -> bool) -> SealResult<Vec<PathBuf>> {
    let mut files = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let scratch = path
            .file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| n.starts_with(SCRATCH_PREFIX));
        if scratch || !keep(&path) {
            continue;
        }
        files.push(path);
    }
    files.sort();
    Ok(files)
}

/// Seal every file in `input_dir` that is not already sealed, writing
/// envelopes into `output_dir`.
pub fn encrypt_dir(
    pipeline: &Pipeline,
    cipher: &EnvelopeCipher,
    input_dir: &Path,
    output_dir: &Path,
    progress: Option<&ProgressFn>,
) -> SealResult<BatchSummary> {
    let files = collect_files(input_dir, |p| !pipeline.is_sealed_name(p))?;
    fs::create_dir_all(output_dir)?;
    info!(
        input = %input_dir.display(),
        output = %output_dir.display(),
        files = files.len(),
        "sealing directory"
    );

    let summary = run_batch(files, progress, |path| {
        pipeline.encrypt_file(cipher, path, output_dir)
    });
    log_summary("sealed", &summary);
    Ok(summary)
}

/// Unseal every `*<suffix>` file in `sealed_dir`, writing plaintext into
/// `output_dir`.
pub fn decrypt_dir(
    pipeline: &Pipeline,
    keys: &KeySource,
    sealed_dir: &Path,
    output_dir: &Path,
    progress: Option<&ProgressFn>,
) -> SealResult<BatchSummary> {
    let files = collect_files(sealed_dir, |p| pipeline.is_sealed_name(p))?;
    fs::create_dir_all(output_dir)?;
    info!(
        input = %sealed_dir.display(),
        output = %output_dir.display(),
        files = files.len(),
        "unsealing directory"
    );

    let summary = run_batch(files, progress, |path| {
        pipeline.decrypt_file(keys, path, output_dir)
    });
    log_summary("unsealed", &summary);
    Ok(summary)
}

fn run_batch(
    files: Vec<PathBuf>,
    progress: Option<&ProgressFn>,
    mut process: impl FnMut(&Path) -> SealResult<FileReport>,
) -> BatchSummary {
    let total = files.len() as u64;
    let mut summary = BatchSummary::default();

    for (i, path) in files.into_iter().enumerate() {
        if let Some(cb) = progress {
            let name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            cb(i as u64, total, &name);
        }

        // The engine has already logged the failing stage.
        let result = process(&path);
        summary.outcomes.push(FileOutcome { path, result });
    }

    if let Some(cb) = progress {
        cb(total, total, "");
    }
    summary
}

fn log_summary(verb: &str, summary: &BatchSummary) {
    if summary.is_clean() {
        info!(
            files = summary.succeeded(),
            bytes_in = summary.bytes_in(),
            bytes_out = summary.bytes_out(),
            "{verb} all files"
        );
    } else {
        warn!(
            succeeded = summary.succeeded(),
            failed = summary.failed(),
            "{verb} with failures"
        );
    }
}
