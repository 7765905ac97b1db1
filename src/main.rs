//! kaotool - inspect and edit KAO portrait archives.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use oxipng::{InFile, OutFile};
use pmd_kao::{Kao, KaoConfig};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "kaotool")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the kaomado.kao archive
    archive: PathBuf,

    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// PX compression level (0-3), overrides the config file
    #[arg(long)]
    level: Option<u8>,

    /// Increase verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// List populated slots
    List {
        /// Print a JSON manifest instead of text
        #[arg(long)]
        json: bool,
    },

    /// Export every populated slot as IIII/SS.png
    Export {
        out_dir: PathBuf,
    },

    /// Replace a slot with a 40x40 PNG of at most 16 colours
    Import {
        index: usize,
        subindex: usize,
        png: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Empty a slot
    Delete {
        index: usize,
        subindex: usize,
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Grow the table to COUNT indices
    Expand {
        count: usize,
        #[arg(short, long)]
        output: PathBuf,
    },
}

#[derive(Serialize)]
struct SlotInfo {
    index: usize,
    subindex: usize,
    size: usize,
    fingerprint: String,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => KaoConfig::load(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => KaoConfig::default(),
    };
    if let Some(level) = cli.level {
        config.compression_level = level;
    }
    config.validate()?;

    let data = fs::read(&cli.archive)
        .with_context(|| format!("Failed to read {}", cli.archive.display()))?;
    let mut kao = Kao::from_bytes_with_codec(data, config.codec()?)
        .with_context(|| format!("Failed to parse {}", cli.archive.display()))?;
    info!(entries = kao.len(), "loaded {}", cli.archive.display());

    match cli.command {
        Commands::List { json } => list(&kao, json)?,
        Commands::Export { out_dir } => export(&kao, &out_dir, config.optimise_png)?,
        Commands::Import {
            index,
            subindex,
            png,
            output,
        } => {
            let img = image::open(&png)
                .with_context(|| format!("Failed to open {}", png.display()))?
                .to_rgba8();
            kao.set_from_img(index, subindex, &img)?;
            kao.save_to_file(&output)?;
            info!("wrote {}", output.display());
        }
        Commands::Delete {
            index,
            subindex,
            output,
        } => {
            kao.delete(index, subindex);
            kao.save_to_file(&output)?;
            info!("wrote {}", output.display());
        }
        Commands::Expand { count, output } => {
            kao.expand(count);
            kao.save_to_file(&output)?;
            info!("wrote {}", output.display());
        }
    }

    Ok(())
}

fn list(kao: &Kao<pmd_kao::At4pxCodec>, json: bool) -> Result<()> {
    let mut slots = Vec::new();
    for (index, subindex) in kao.populated() {
        match kao.get(index, subindex) {
            Ok(Some(portrait)) => slots.push(SlotInfo {
                index,
                subindex,
                size: portrait.size(),
                fingerprint: format!("{:016x}", portrait.fingerprint()),
            }),
            Ok(None) => {}
            Err(e) => warn!(index, subindex, "skipping unreadable portrait: {}", e),
        }
    }

    if json {
        println!("{}", serde_json::to_string_pretty(&slots)?);
    } else {
        for slot in &slots {
            println!(
                "{:04}/{:02}  {:5} bytes  {}",
                slot.index, slot.subindex, slot.size, slot.fingerprint
            );
        }
    }
    Ok(())
}

fn export(kao: &Kao<pmd_kao::At4pxCodec>, out_dir: &Path, optimise: bool) -> Result<()> {
    let mut exported = 0;
    for entry in kao {
        let (index, subindex, portrait) = entry?;
        let Some(portrait) = portrait else {
            continue;
        };

        let dir = out_dir.join(format!("{:04}", index));
        fs::create_dir_all(&dir)?;
        let path = dir.join(format!("{:02}.png", subindex));
        portrait
            .get()
            .save(&path)
            .with_context(|| format!("Failed to save {}", path.display()))?;

        if optimise {
            if let Err(e) = optimise_portrait_png(&path) {
                warn!("PNG optimisation failed for {}: {}", path.display(), e);
            }
        }
        exported += 1;
    }
    info!(exported, "exported portraits to {}", out_dir.display());
    Ok(())
}

fn optimise_portrait_png(path: &Path) -> Result<()> {
    let mut options = oxipng::Options::from_preset(4);
    options.bit_depth_reduction = true;

    oxipng::optimize(
        &InFile::Path(path.to_path_buf()),
        &OutFile::Path(None),
        &options,
    )
    .map_err(|e| anyhow::anyhow!("{}", e))?;
    Ok(())
}
