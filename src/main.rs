//! Liberty CLI - Command-line tool for GTA IV archive extraction and guest
//! path inspection.
//!
//! This is the main entry point for the Liberty command-line application.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

use liberty::prelude::*;

/// Liberty - GTA IV guest file I/O tool
#[derive(Parser)]
#[command(name = "liberty")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// JSON configuration file
    #[arg(short, long, global = true, env = "LIBERTY_CONFIG")]
    config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Extract all files from an RPF archive
    RpfExtract {
        /// Path to the RPF file
        #[arg(short, long, env = "INPUT_RPF")]
        rpf: PathBuf,

        /// Output directory
        #[arg(short, long, env = "OUTPUT_FOLDER")]
        output: PathBuf,

        /// Worker threads (0 = auto)
        #[arg(short, long)]
        threads: Option<usize>,

        /// In-flight memory budget in MiB
        #[arg(long)]
        memory_mb: Option<u64>,
    },

    /// List contents of an RPF archive
    RpfList {
        /// Path to the RPF file
        #[arg(short, long, env = "INPUT_RPF")]
        rpf: PathBuf,

        /// Show detailed information
        #[arg(short, long)]
        detailed: bool,
    },

    /// Write one archive entry to stdout or a file
    RpfCat {
        /// Path to the RPF file
        #[arg(short, long, env = "INPUT_RPF")]
        rpf: PathBuf,

        /// Entry path inside the archive
        entry: String,

        /// Output file (stdout when omitted)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Resolve guest paths to host files
    Resolve {
        /// Guest paths, e.g. game:\common\data\handling.dat
        #[arg(required = true)]
        paths: Vec<String>,

        /// Extracted archive root
        #[arg(short, long, env = "LIBERTY_EXTRACTED")]
        extracted: Option<PathBuf>,

        /// Game install root (for overlay discovery)
        #[arg(short, long, env = "LIBERTY_GAME")]
        game: Option<PathBuf>,
    },

    /// Show registered overlays and their overrides
    Overlays {
        /// Game install root (for overlay discovery)
        #[arg(short, long, env = "LIBERTY_GAME")]
        game: Option<PathBuf>,

        /// List every overridden file
        #[arg(short, long)]
        detailed: bool,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins; otherwise --verbose picks the level
    if std::env::var("RUST_LOG").is_ok() {
        env_logger::init();
    } else {
        env_logger::Builder::new()
            .filter_level(if cli.verbose {
                log::LevelFilter::Debug
            } else {
                log::LevelFilter::Info
            })
            .init();
    }

    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::RpfExtract {
            rpf,
            output,
            threads,
            memory_mb,
        } => {
            cmd_rpf_extract(config, &rpf, &output, threads, memory_mb)?;
        }
        Commands::RpfList { rpf, detailed } => {
            cmd_rpf_list(&config, &rpf, detailed)?;
        }
        Commands::RpfCat { rpf, entry, output } => {
            cmd_rpf_cat(&config, &rpf, &entry, output.as_deref())?;
        }
        Commands::Resolve {
            paths,
            extracted,
            game,
        } => {
            cmd_resolve(config, &paths, extracted, game)?;
        }
        Commands::Overlays { game, detailed } => {
            cmd_overlays(config, game, detailed)?;
        }
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config {}", path.display())),
        None => Ok(Config::default()),
    }
}

fn locate_key(config: &Config) -> Option<RpfKey> {
    let key = RpfKey::locate(&config.key_search_dirs);
    if key.is_none() {
        log::warn!("No archive key found; encrypted TOCs will not be readable");
    }
    key
}

fn cmd_rpf_extract(
    mut config: Config,
    rpf: &Path,
    output: &Path,
    threads: Option<usize>,
    memory_mb: Option<u64>,
) -> Result<()> {
    if let Some(threads) = threads {
        config.extraction.threads = threads;
    }
    if let Some(memory_mb) = memory_mb {
        config.extraction.memory_budget_mb = memory_mb;
    }

    println!("Extracting RPF archive: {}", rpf.display());

    let key = locate_key(&config);
    let pb = ProgressBar::new(1000);
    pb.set_style(
        ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {percent}% ({eta})")?
            .progress_chars("#>-"),
    );

    let start = Instant::now();
    let progress = |fraction: f32| pb.set_position((fraction * 1000.0) as u64);
    let result = extract_archive(
        rpf,
        output,
        key.as_ref(),
        &config.extraction.options(),
        &progress,
    );
    pb.finish_with_message("Done");

    println!(
        "Extracted {} files ({} bytes) in {:?}",
        result.files_extracted,
        result.bytes_extracted,
        start.elapsed()
    );

    if !result.success {
        anyhow::bail!(
            "{}",
            result
                .error_message
                .unwrap_or_else(|| "Extraction failed".to_string())
        );
    }

    Ok(())
}

fn cmd_rpf_list(config: &Config, rpf: &Path, detailed: bool) -> Result<()> {
    let archive =
        RpfArchive::open(rpf, locate_key(config)).context("Failed to open RPF archive")?;

    let mut count = 0;
    for entry in archive.files() {
        if detailed {
            println!(
                "{:>10} {:>10} {:#010x} {:>3} {}{} {}",
                entry.compressed_size,
                entry.size,
                entry.offset,
                entry.resource_type,
                if entry.is_compressed { "C" } else { " " },
                if entry.is_encrypted { "E" } else { " " },
                entry.name
            );
        } else {
            println!("{}", entry.name);
        }
        count += 1;
    }

    let header = archive.header();
    println!(
        "\nTotal: {} files ({} TOC records, TOC {})",
        count,
        header.entry_count,
        if header.encrypted { "encrypted" } else { "plain" }
    );

    Ok(())
}

fn cmd_rpf_cat(config: &Config, rpf: &Path, entry: &str, output: Option<&Path>) -> Result<()> {
    let archive =
        RpfArchive::open(rpf, locate_key(config)).context("Failed to open RPF archive")?;
    let data = archive
        .read_file(entry)
        .with_context(|| format!("Failed to read {}", entry))?;

    match output {
        Some(path) => {
            std::fs::write(path, &data).context("Failed to write output file")?;
            println!("Wrote {} bytes to {}", data.len(), path.display());
        }
        None => std::io::stdout()
            .lock()
            .write_all(&data)
            .context("Failed to write to stdout")?,
    }

    Ok(())
}

fn cmd_resolve(
    mut config: Config,
    paths: &[String],
    extracted: Option<PathBuf>,
    game: Option<PathBuf>,
) -> Result<()> {
    if let Some(extracted) = extracted {
        config.extracted_root = extracted;
    }
    if game.is_some() {
        config.game_root = game;
    }

    let registry = Registry::new(config);
    for path in paths {
        match registry.resolve(path) {
            Some(host) => println!("{} -> {}", path, host.display()),
            None => println!("{} -> (not found)", path),
        }
    }

    let stats = registry.stats();
    println!(
        "\nIndex: {} files, {} directories, {} bytes; {} hits, {} misses",
        stats.resolver.total_files,
        stats.resolver.total_directories,
        stats.resolver.total_bytes,
        stats.resolver.hits,
        stats.resolver.misses
    );

    Ok(())
}

fn cmd_overlays(mut config: Config, game: Option<PathBuf>, detailed: bool) -> Result<()> {
    if game.is_some() {
        config.game_root = game;
    }

    let registry = Registry::new(config);
    let overlay = registry.overlay();

    for entry in overlay.overlays() {
        println!(
            "{:>4} {} {} ({})",
            entry.priority,
            if entry.enabled { "+" } else { "-" },
            entry.name,
            entry.path.display()
        );
    }

    if detailed {
        println!();
        for file in overlay.overrides() {
            println!("{:>4} {} -> {}", file.priority, file.key, file.host_path.display());
        }
        for (key, folder) in overlay.img_folders() {
            println!(" img {} -> {}", key, folder.display());
        }
        for archive in registry.loader().loaded_archives() {
            let files = registry.loader().list_files(&archive).len();
            println!(" rpf {} ({} files)", archive.display(), files);
        }
    }

    let stats = overlay.stats();
    println!(
        "\nTotal: {} overlays ({} enabled), {} override files, {} IMG folders, {} archives",
        stats.total_overlays,
        stats.enabled_overlays,
        stats.override_files,
        stats.img_folders,
        registry.stats().loader.archives_loaded
    );

    Ok(())
}
