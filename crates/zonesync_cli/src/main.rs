//! zonesync CLI
//!
//! Command-line tools for the zonesync engine.
//!
//! # Commands
//!
//! - `demo` - Sync two simulated devices through an in-memory store
//! - `inspect` - Display the contents of a settings file

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use zonesync_engine::DEFAULT_PUSH_BATCH_SIZE;

/// zonesync command-line tools.
#[derive(Parser)]
#[command(name = "zonesync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Sync two simulated devices through an in-memory store
    Demo {
        /// Persist the first device's settings to this file
        #[arg(short, long)]
        settings: Option<PathBuf>,

        /// Maximum number of entries per push batch
        #[arg(short, long, default_value_t = DEFAULT_PUSH_BATCH_SIZE)]
        batch_size: usize,

        /// Fail the first push of the second device
        #[arg(long)]
        flaky: bool,
    },

    /// Display the contents of a settings file
    Inspect {
        /// Path to the settings file
        #[arg(short, long)]
        settings: PathBuf,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    match cli.command {
        Commands::Demo {
            settings,
            batch_size,
            flaky,
        } => {
            commands::demo::run(settings.as_deref(), batch_size, flaky).await?;
        }
        Commands::Inspect { settings, format } => {
            commands::inspect::run(&settings, &format)?;
        }
        Commands::Version => {
            println!("zonesync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
