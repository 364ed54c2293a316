//! ThingSync CLI
//!
//! Command-line tools for a ThingSync cloud file.
//!
//! # Commands
//!
//! - `register` - Register a new thing
//! - `list` - List registered things with per-type counts
//! - `remove` - Remove one thing
//! - `reset` - Remove every thing
//! - `simulate` - Run the sync engine against simulated devices

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

/// ThingSync command-line tools.
#[derive(Parser)]
#[command(name = "thingsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the cloud JSON file
    #[arg(global = true, short, long, default_value = "thingsync-cloud.json")]
    cloud: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register a new thing
    Register {
        /// Device type, e.g. "pump"
        device_type: String,

        /// Human readable name
        name: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// List registered things
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Remove one thing
    Remove {
        /// Thing ID
        id: String,
    },

    /// Remove every thing
    Reset,

    /// Run the sync engine against simulated devices
    Simulate {
        /// Number of devices to simulate when the cloud is empty
        #[arg(short, long, default_value = "2")]
        devices: usize,

        /// How long to run, in seconds
        #[arg(short, long, default_value = "10")]
        seconds: u64,

        /// Simulated radio latency in milliseconds
        #[arg(short, long, default_value = "1000")]
        latency: u64,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: String,
    },

    /// Show version information
    Version,
}

#[tokio::main]
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
        Commands::Register {
            device_type,
            name,
            format,
        } => {
            commands::register::run(&cli.cloud, &device_type, &name, &format).await?;
        }
        Commands::List { format } => {
            commands::list::run(&cli.cloud, &format).await?;
        }
        Commands::Remove { id } => {
            commands::remove::run(&cli.cloud, &id).await?;
        }
        Commands::Reset => {
            commands::reset::run(&cli.cloud).await?;
        }
        Commands::Simulate {
            devices,
            seconds,
            latency,
            format,
        } => {
            commands::simulate::run(&cli.cloud, devices, seconds, latency, &format).await?;
        }
        Commands::Version => {
            println!("ThingSync CLI v{}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
