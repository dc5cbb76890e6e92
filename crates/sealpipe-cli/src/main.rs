//! sealpipe: compress and seal every file of a directory
//!
//! Commands:
//!   encrypt [<input>]   - compress + encrypt each file into `<name>.sealed`
//!   decrypt [<sealed>]  - verify + decrypt + decompress each `<name>.sealed`
//!   config show         - display the active configuration

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use secrecy::{ExposeSecret, SecretString};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::Duration;
use tracing::{info, warn};

use sealpipe_core::config::{SealConfig, DEFAULT_KDF_ITERATIONS, MIN_KDF_ITERATIONS};
use sealpipe_crypto::{
    derive_key, generate_passphrase, generate_salt, EnvelopeCipher, KdfParams, KeyOrigin, SealKey,
};
use sealpipe_pipeline::{
    decrypt_dir, encrypt_dir, BatchSummary, KeySource, PassphraseKeys, Pipeline, PipelineConfig,
    ProgressFn,
};

// ── CLI structure ──────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(
    name = "sealpipe",
    version,
    about = "Compress and seal files with authenticated encryption",
    long_about = "sealpipe: zstd-compress every file of a directory and seal it in an \
                  XChaCha20-Poly1305 envelope keyed from a passphrase and this host"
)]
struct Cli {
    /// Path to sealpipe.toml configuration file
    #[arg(long, short = 'c', env = "SEALPIPE_CONFIG", default_value = "sealpipe.toml")]
    config: PathBuf,

    /// Log level filter (overrides config; RUST_LOG takes precedence)
    #[arg(long, global = true, env = "SEALPIPE_LOG")]
    log: Option<String>,

    /// Log output format (overrides config)
    #[arg(long, global = true, value_enum)]
    log_format: Option<LogFormat>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Compress and encrypt every file in a directory
    ///
    /// A fresh passphrase is generated unless --ask-passphrase is given. The
    /// key string printed at the end unseals the files on any host.
    Encrypt {
        /// Directory with plaintext files (default: config pipeline.input_dir)
        input: Option<PathBuf>,
        /// Directory for sealed files (default: config pipeline.output_dir)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Prompt for a passphrase instead of generating one
        #[arg(long)]
        ask_passphrase: bool,
    },

    /// Decrypt and decompress every sealed file in a directory
    ///
    /// Without --key or --ask-passphrase the key string is prompted for.
    Decrypt {
        /// Directory with sealed files (default: config pipeline.output_dir)
        sealed: Option<PathBuf>,
        /// Directory for recovered files (default: config pipeline.input_dir)
        #[arg(long, short = 'o')]
        output: Option<PathBuf>,
        /// Key string printed by `sealpipe encrypt`
        #[arg(long, env = "SEALPIPE_KEY", hide_env_values = true, conflicts_with = "ask_passphrase")]
        key: Option<String>,
        /// Re-derive the key from a passphrase on the sealing host
        #[arg(long)]
        ask_passphrase: bool,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand, Debug)]
enum ConfigAction {
    /// Print the active configuration (merged defaults + config file)
    Show,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Json,
    Text,
}

impl LogFormat {
    fn from_config(value: &str) -> Self {
        if value.eq_ignore_ascii_case("json") {
            LogFormat::Json
        } else {
            LogFormat::Text
        }
    }
}

// ── Entry point ───────────────────────────────────────────────────────────────

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let (config, from_file) = load_config(&cli.config)?;

    let level = cli.log.clone().unwrap_or_else(|| config.log.level.clone());
    let format = cli
        .log_format
        .unwrap_or_else(|| LogFormat::from_config(&config.log.format));
    init_logging(&level, format);
    if !from_file {
        warn!(path = %cli.config.display(), "config file not found, using defaults");
    }

    let clean = match cli.command {
        Commands::Encrypt { input, output, ask_passphrase } => {
            cmd_encrypt(&config, input.as_deref(), output.as_deref(), ask_passphrase)?
        }
        Commands::Decrypt { sealed, output, key, ask_passphrase } => {
            cmd_decrypt(&config, sealed.as_deref(), output.as_deref(), key, ask_passphrase)?
        }
        Commands::Config { action: ConfigAction::Show } => {
            cmd_config_show(&config, &cli.config)?;
            true
        }
    };

    Ok(if clean { ExitCode::SUCCESS } else { ExitCode::FAILURE })
}

/// Load and validate the config; the flag is false when defaults were used.
fn load_config(path: &Path) -> Result<(SealConfig, bool)> {
    let from_file = path.exists();
    let config = SealConfig::load(path)
        .with_context(|| format!("loading config: {}", path.display()))?;
    Ok((config, from_file))
}

fn init_logging(level: &str, format: LogFormat) {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    match format {
        LogFormat::Json => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().json().with_writer(std::io::stderr))
                .init();
        }
        LogFormat::Text => {
            tracing_subscriber::registry()
                .with(filter)
                .with(fmt::layer().with_writer(std::io::stderr))
                .init();
        }
    }
}

// ── Host fingerprint ──────────────────────────────────────────────────────────

/// KDF context binding derived keys to this machine.
///
/// Hostname, CPU architecture and OS family. A rename or reinstall changes
/// it; the printed key string still works then.
fn host_fingerprint() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".into());
    format!(
        "{host}|{}|{}",
        std::env::consts::ARCH,
        std::env::consts::OS
    )
}

// ── Prompts ───────────────────────────────────────────────────────────────────

fn prompt_secret(prompt: &str) -> Result<SecretString> {
    let value = rpassword::prompt_password(prompt).context("reading from terminal")?;
    if value.is_empty() {
        anyhow::bail!("empty input");
    }
    Ok(SecretString::from(value))
}

fn prompt_new_passphrase() -> Result<SecretString> {
    let first = prompt_secret("Passphrase: ")?;
    let second = prompt_secret("Confirm passphrase: ")?;
    if first.expose_secret() != second.expose_secret() {
        anyhow::bail!("passphrases do not match");
    }
    Ok(first)
}

// ── Progress bar helpers ──────────────────────────────────────────────────────

fn bar_style() -> ProgressStyle {
    ProgressStyle::with_template("{prefix:.bold} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=>-")
}

fn make_progress_bar(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new(0);
    pb.set_style(bar_style());
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

fn make_spinner(prefix: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{prefix:.bold} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_prefix(prefix.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

fn progress_callback(pb: &ProgressBar) -> ProgressFn {
    let pb = pb.clone();
    Box::new(move |done, total, name| {
        pb.set_length(total);
        pb.set_position(done);
        pb.set_message(name.to_string());
    })
}

fn print_summary(title: &str, summary: &BatchSummary) {
    println!("{title}:");
    println!("  files:   {} ok, {} failed", summary.succeeded(), summary.failed());
    println!("  read:    {}", fmt_bytes(summary.bytes_in()));
    println!("  written: {}", fmt_bytes(summary.bytes_out()));
    for (path, err) in summary.failures() {
        eprintln!("  failed:  {} ({}: {err})", path.display(), err.kind());
    }
}

// ── `sealpipe encrypt` ────────────────────────────────────────────────────────

fn cmd_encrypt(
    config: &SealConfig,
    input: Option<&Path>,
    output: Option<&Path>,
    ask_passphrase: bool,
) -> Result<bool> {
    let input = input.unwrap_or(config.pipeline.input_dir.as_path());
    let output = output.unwrap_or(config.pipeline.output_dir.as_path());
    let pipeline = Pipeline::new(PipelineConfig::from(&config.pipeline))?;

    let passphrase = if ask_passphrase {
        prompt_new_passphrase()?
    } else {
        generate_passphrase()
    };

    let params = KdfParams {
        iterations: config.kdf.iterations,
    };
    let salt = generate_salt();
    let spinner = make_spinner("kdf");
    spinner.set_message(format!("deriving key ({} PBKDF2 iterations)", params.iterations));
    let key = derive_key(&passphrase, &salt, host_fingerprint().as_bytes(), &params)
        .context("deriving key")?;
    spinner.finish_and_clear();
    info!(iterations = params.iterations, "session key derived");

    let cipher = EnvelopeCipher::new(key.clone(), KeyOrigin::derived(salt, &params))
        .with_chunk_size(config.pipeline.chunk_size)?;

    println!("Sealing {} → {}", input.display(), output.display());
    let pb = make_progress_bar("seal");
    let progress = progress_callback(&pb);
    let summary = encrypt_dir(&pipeline, &cipher, input, output, Some(&progress))
        .with_context(|| format!("sealing directory: {}", input.display()))?;
    pb.finish_and_clear();

    print_summary("Seal complete", &summary);
    println!();
    println!("Key (shown once, store it safely):");
    println!("  {}", key.to_base64());
    if ask_passphrase {
        println!("On this host the passphrase also works: sealpipe decrypt --ask-passphrase");
    }

    Ok(summary.is_clean())
}

// ── `sealpipe decrypt` ────────────────────────────────────────────────────────

fn cmd_decrypt(
    config: &SealConfig,
    sealed: Option<&Path>,
    output: Option<&Path>,
    key: Option<String>,
    ask_passphrase: bool,
) -> Result<bool> {
    let sealed = sealed.unwrap_or(config.pipeline.output_dir.as_path());
    let output = output.unwrap_or(config.pipeline.input_dir.as_path());
    let pipeline = Pipeline::new(PipelineConfig::from(&config.pipeline))?;

    let keys = if ask_passphrase {
        let ceiling = config.kdf.iterations.max(DEFAULT_KDF_ITERATIONS);
        KeySource::Passphrase(
            PassphraseKeys::new(prompt_secret("Passphrase: ")?, host_fingerprint().into_bytes())
                .with_iteration_range(MIN_KDF_ITERATIONS..=ceiling),
        )
    } else {
        let text = match key {
            Some(k) => SecretString::from(k),
            None => prompt_secret("Key: ")?,
        };
        KeySource::Key(SealKey::from_base64(text.expose_secret()).context("parsing key string")?)
    };

    println!("Unsealing {} → {}", sealed.display(), output.display());
    let pb = make_progress_bar("unseal");
    let progress = progress_callback(&pb);
    let summary = decrypt_dir(&pipeline, &keys, sealed, output, Some(&progress))
        .with_context(|| format!("unsealing directory: {}", sealed.display()))?;
    pb.finish_and_clear();

    print_summary("Unseal complete", &summary);
    Ok(summary.is_clean())
}

// ── `sealpipe config show` ────────────────────────────────────────────────────

fn cmd_config_show(config: &SealConfig, config_path: &Path) -> Result<()> {
    if config_path.exists() {
        println!("# Configuration from: {}", config_path.display());
    } else {
        println!("# Configuration: defaults (no file at {})", config_path.display());
    }
    println!();
    let rendered = toml::to_string_pretty(config).context("serializing config to TOML")?;
    print!("{rendered}");
    Ok(())
}

fn fmt_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;
    const GB: u64 = MB * 1024;
    if bytes >= GB {
        format!("{:.1} GB", bytes as f64 / GB as f64)
    } else if bytes >= MB {
        format!("{:.1} MB", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.1} KB", bytes as f64 / KB as f64)
    } else {
        format!("{bytes} B")
    }
}
