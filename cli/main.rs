use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use enctempfile::{config, BackingKind, VirtualFile, Whence};
use indicatif::{ProgressBar, ProgressStyle};
use std::fs;
use std::io::{self, Read, Write};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Copy size used when spooling input through the encrypted file
const SPOOL_CHUNK: usize = 64 * 1024;

/// enctempfile - Spool data through a block-encrypted temporary file
#[derive(Parser)]
#[command(name = "enctempfile")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to configuration file (falls back to ENCTEMPFILE_CONFIG, then defaults)
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Spool input through an encrypted temporary file and write it back out
    Spool {
        /// Input file (defaults to stdin)
        input: Option<PathBuf>,

        /// Output file (defaults to stdout)
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Block size in bytes (overrides configuration)
        #[arg(short, long)]
        block_size: Option<usize>,

        /// Keep ciphertext in memory instead of anonymous temp files
        #[arg(short, long)]
        memory: bool,
    },

    /// Print the effective configuration
    Config,
}

fn main() -> Result<()> {
    // Use RUST_LOG environment variable to control log level (e.g., RUST_LOG=info,enctempfile=debug)
    fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_target(true)
        .with_thread_ids(false)
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();
    info!(command = ?cli.command, "enctempfile starting");

    match cli.command {
        Commands::Spool {
            input,
            output,
            block_size,
            memory,
        } => cmd_spool(
            cli.config.as_deref(),
            input.as_ref(),
            output.as_ref(),
            block_size,
            memory,
        ),

        Commands::Config => cmd_config(cli.config.as_deref()),
    }
}

/// Create a styled progress bar for spooling
fn create_progress_bar(total: u64, message: &str) -> ProgressBar {
    let pb = ProgressBar::new(total);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({percent}%) {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-"),
    );
    pb.set_message(message.to_string());
    pb
}

/// Create a spinner for streams of unknown length
fn create_spinner(message: &str) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} {msg} {bytes}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message(message.to_string());
    spinner
}

fn cmd_spool(
    config_path: Option<&str>,
    input: Option<&PathBuf>,
    output: Option<&PathBuf>,
    block_size: Option<usize>,
    memory: bool,
) -> Result<()> {
    let mut cfg = config::Config::load_with_env(config_path)?;
    if let Some(block_size) = block_size {
        cfg.block_size = block_size;
    }
    if memory {
        cfg.backing = BackingKind::Memory;
    }
    cfg.validate()?;

    let mut file = VirtualFile::from_config(&cfg)?;

    let (mut reader, pb): (Box<dyn Read>, ProgressBar) = match input {
        Some(path) => {
            let size = fs::metadata(path)
                .with_context(|| format!("reading metadata for {:?}", path))?
                .len();
            let reader = fs::File::open(path).with_context(|| format!("opening {:?}", path))?;
            (Box::new(reader), create_progress_bar(size, "Spooling"))
        }
        None => (Box::new(io::stdin().lock()), create_spinner("Spooling stdin")),
    };

    let mut chunk = vec![0u8; SPOOL_CHUNK];
    let mut total = 0u64;
    loop {
        let n = reader.read(&mut chunk).context("reading input")?;
        if n == 0 {
            break;
        }
        file.write(&chunk[..n])?;
        total += n as u64;
        pb.set_position(total);
    }

    let sealed = file.flush()?;
    pb.finish_with_message(format!(
        "Spooled {} bytes into {} blocks ({} bytes sealed)",
        total,
        file.block_count(),
        sealed
    ));

    file.seek(0, Whence::Set)?;
    let copied = match output {
        Some(path) => {
            let mut out =
                fs::File::create(path).with_context(|| format!("creating {:?}", path))?;
            let copied = io::copy(&mut file, &mut out).context("writing output")?;
            out.flush()?;
            copied
        }
        None => {
            let mut stdout = io::stdout().lock();
            let copied = io::copy(&mut file, &mut stdout).context("writing to stdout")?;
            stdout.flush()?;
            copied
        }
    };

    file.close();
    eprintln!("Replayed {} bytes", copied);
    Ok(())
}

fn cmd_config(config_path: Option<&str>) -> Result<()> {
    let cfg = config::Config::load_with_env(config_path)?;
    println!("{}", serde_json::to_string_pretty(&cfg)?);
    Ok(())
}
