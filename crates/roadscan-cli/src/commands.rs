use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Debug, Parser)]
#[command(name = "roadscan")]
#[command(about = "Road roughness scanner with offline-first sync", long_about = None)]
pub struct Cli {
    /// Config file; defaults apply if it does not exist
    #[arg(short, long, default_value = "roadscan.json")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Record a scan from the drive simulator
    Simulate {
        /// Length of the drive in seconds
        #[arg(short, long, default_value_t = 30)]
        seconds: u64,
        /// smooth, fair, rough, variable or random
        #[arg(short, long, default_value = "variable")]
        quality: String,
        /// Seed for a reproducible drive
        #[arg(long)]
        seed: Option<u64>,
        /// Start offline and reconnect after this many seconds
        #[arg(long)]
        offline_for: Option<u64>,
    },
    /// List locally stored sessions
    Sessions,
    /// Show segments of one session
    Segments {
        /// Local or remote session id
        id: String,
    },
    /// Push everything not yet synced
    Resync,
    /// Delete a session locally and remotely
    Delete {
        /// Local or remote session id
        id: String,
    },
    /// Show totals over completed sessions
    Stats,
    /// Delete all local data
    Clear,
    /// Write the effective configuration to the config path
    InitConfig,
}
