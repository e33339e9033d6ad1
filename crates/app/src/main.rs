// Copyright 2025-2026 CEMAXECUTER LLC

mod pipeline;

use clap::Parser;
use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use llsniff_protocol::DecoderConfig;

#[derive(Parser, Debug)]
#[command(name = "llsniff")]
#[command(about = "BLE link-layer capture decoder")]
struct Cli {
    /// Capture file input (pcap, LINKTYPE_BLUETOOTH_LE_LL_WITH_PHDR)
    #[arg(short = 'f', long)]
    file: Option<PathBuf>,

    /// PCAP output file
    #[arg(short = 'w', long)]
    write: Option<PathBuf>,

    /// Decoder configuration (JSON)
    #[arg(long)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Print statistics
    #[arg(long)]
    stats: bool,
}

fn load_config(path: &Path) -> Result<DecoderConfig, String> {
    let file = File::open(path).map_err(|e| format!("failed to open {}: {}", path.display(), e))?;
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| format!("invalid config {}: {}", path.display(), e))
}

fn main() {
    env_logger::init();
    let cli = Cli::parse();

    let config = match cli.config.as_deref().map(load_config).transpose() {
        Ok(c) => c.unwrap_or_default(),
        Err(e) => {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    };

    if cli.verbose {
        log::info!("llsniff starting");
        log::info!("decoder config: {:?}", config);
    }

    if let Some(ref file) = cli.file {
        if let Err(e) = pipeline::run_file(file, cli.write.as_deref(), config, cli.stats) {
            eprintln!("error: {}", e);
            std::process::exit(1);
        }
    } else {
        eprintln!("no input specified. Use -f <file> to decode a capture file.");
        std::process::exit(1);
    }
}
