//! CLI argument parsing for cmap

use clap::{Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "cmap")]
#[command(author, version, about = "Stress and inspect the coordinated sorted map", long_about = None)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Hammer one map with concurrent readers and writers and verify the protocol
    Stress {
        /// Reader threads (default from config)
        #[arg(short, long)]
        readers: Option<usize>,

        /// Writer threads (default from config)
        #[arg(short, long)]
        writers: Option<usize>,

        /// Operations per thread (default from config)
        #[arg(short, long)]
        ops: Option<u64>,

        /// Number of distinct keys (default from config)
        #[arg(short, long)]
        keys: Option<u64>,

        /// Output format
        #[arg(short, long, value_enum, default_value = "text")]
        format: OutputFormat,
    },

    /// Print the effective configuration as YAML
    Config,
}

/// Output format for reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}
