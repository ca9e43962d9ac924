// Copyright (c) 2025 Varshith Gudur. Licensed under AGPLv3.
use clap::{Parser, Subcommand};
use fabric_cli::commands::{inspect, tail, timeline, verify};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "fabric")]
#[command(about = "Experience Fabric forensic CLI - inspect and verify an event archive", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show every segment with its record count, sequence range and status
    Inspect {
        /// Archive directory holding the segment files
        #[arg(long, short)]
        dir: PathBuf,
    },
    /// Verify every frame checksum and sequence continuity
    Verify {
        #[arg(long, short)]
        dir: PathBuf,
    },
    /// List envelopes after a cursor, oldest first
    Timeline {
        #[arg(long, short)]
        dir: PathBuf,

        /// Exclusive starting sequence
        #[arg(long, default_value_t = 0)]
        from: u64,

        #[arg(long, short, default_value_t = 50)]
        limit: usize,
    },
    /// Show the most recent envelopes
    Tail {
        #[arg(long, short)]
        dir: PathBuf,

        #[arg(long, short, default_value_t = 20)]
        limit: usize,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Inspect { dir } => inspect::run(&dir),
        Commands::Verify { dir } => verify::run(&dir),
        Commands::Timeline { dir, from, limit } => timeline::run(&dir, from, limit),
        Commands::Tail { dir, limit } => tail::run(&dir, limit),
    }
}
