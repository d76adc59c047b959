use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "vidnorm")]
#[command(author, version, about = "Normalize video files for direct playback")]
pub struct Cli {
    /// Path to config file (JSON)
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
    /// Analyze a video file and report compatibility issues
    Analyze {
        /// File to analyze
        #[arg(required = true)]
        file: PathBuf,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Normalize video files (directories are searched recursively)
    Normalize {
        /// Files or directories to normalize
        #[arg(required = true)]
        inputs: Vec<PathBuf>,

        /// Number of files processed at once
        #[arg(short = 'j', long)]
        concurrency: Option<usize>,

        /// Per-file deadline in seconds
        #[arg(long)]
        timeout: Option<u64>,

        /// Directory for normalized outputs (default: next to each source)
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
    },

    /// Check that required external tools are available
    CheckTools,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses --config if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
