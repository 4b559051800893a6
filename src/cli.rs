use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "imgbatch")]
#[command(author, version, about = "Convert a batch of images into a single ZIP archive")]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Convert images and write them into one archive
    Convert {
        /// Images to convert
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Target format: jpeg (or jpg), png, webp
        #[arg(short, long)]
        format: Option<String>,

        /// Encoder quality, 1-100
        #[arg(short, long)]
        quality: Option<u32>,

        /// Output archive path, or "-" for stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check that the converter is available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
