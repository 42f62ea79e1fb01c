use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "classy")]
#[command(version, about = "A lightweight image-classification runtime", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Download the model artifacts up front
    Pull {
        /// Re-download even if the artifacts are already present
        #[arg(long)]
        force: bool,
    },

    /// Start the HTTP API server (model loaded on first request)
    Serve {
        /// Device to run on (e.g., "cpu" or "cuda:0")
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Port to listen on
        #[arg(long, default_value = "8080")]
        port: u16,

        /// Host to bind to
        #[arg(long, default_value = "0.0.0.0")]
        host: String,
    },

    /// Classify a local image file
    Run {
        /// Path to a PNG or JPEG image
        image: PathBuf,

        /// Device to run on (e.g., "cpu" or "cuda:0")
        #[arg(long, default_value = "cpu")]
        device: String,

        /// Number of top predictions to show
        #[arg(long, default_value = "4")]
        top: usize,
    },

    /// List the model artifacts and their on-disk status
    List,
}
