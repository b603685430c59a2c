use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "docrelay")]
#[command(author, version, about = "Document-to-PDF conversion service")]
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

/// Overrides for `start`. Each one can also come from the environment.
#[derive(clap::Args, Debug, Default)]
pub struct StartArgs {
    /// Host to bind to
    #[arg(long, env = "SERVICE_HOST")]
    pub host: Option<String>,

    /// Port to listen on
    #[arg(short, long, env = "SERVICE_PORT")]
    pub port: Option<u16>,

    /// Number of concurrent conversions
    #[arg(long, env = "MAX_WORKERS")]
    pub workers: Option<usize>,

    /// Per-engine conversion timeout in seconds
    #[arg(long, env = "CONVERSION_TIMEOUT")]
    pub timeout: Option<u64>,

    /// Largest accepted upload in bytes
    #[arg(long, env = "MAX_FILE_SIZE")]
    pub max_upload_bytes: Option<u64>,

    /// Directory for uploaded and converted files
    #[arg(long, env = "TEMP_DIR")]
    pub artifact_dir: Option<PathBuf>,

    /// Path to the LibreOffice executable
    #[arg(long, env = "LIBREOFFICE_PATH")]
    pub libreoffice_path: Option<PathBuf>,

    /// Seconds between cleanup sweeps
    #[arg(long, env = "CLEANUP_INTERVAL")]
    pub cleanup_interval: Option<u64>,

    /// Seconds after which a job and its files are removed
    #[arg(long, env = "MAX_FILE_AGE")]
    pub max_age: Option<u64>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start the conversion server
    Start(StartArgs),

    /// Convert a single document through the engine chain
    Convert {
        /// Document to convert
        #[arg(required = true)]
        input: PathBuf,

        /// Where to write the PDF (defaults to the input with a .pdf extension)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Check which conversion engines are available
    CheckEngines,

    /// Validate configuration file
    Validate {
        /// Config file to validate (uses default if not specified)
        config: Option<PathBuf>,
    },

    /// Display version information
    Version,
}
