//! session-hook: runs one session-store context per process.
//!
//! Every invocation is an independent context that shares only the backend
//! under `--root` (default `~/.session-store/`).
//!
//! ## Subcommands
//!
//! - `renew`: Expand or renew the session, print the record
//! - `expand`: Expand the session without renewing, print the record
//! - `show`: Print the current session
//! - `expire`: Clear the shared session
//! - `watch`: Poll the shared record and report renewals and expirations
//! - `strategy`: Print which backend would be used

mod commands;
mod logging;
mod sampling;
mod watch;

use clap::{Parser, Subcommand};
use session_core::StorageConfig;
use std::path::PathBuf;

use crate::commands::Context;

#[derive(Parser)]
#[command(name = "session-hook")]
#[command(about = "Cross-context session tracker")]
#[command(version)]
struct Cli {
    /// Storage root (defaults to ~/.session-store)
    #[arg(long, global = true, value_name = "DIR")]
    root: Option<PathBuf>,

    /// Product key this context tracks
    #[arg(long, global = true, default_value = "rum")]
    product: String,

    /// Percentage of new sessions that are tracked
    #[arg(long, global = true, default_value_t = 100.0)]
    sample_rate: f64,

    /// Allow or forbid the key-value fallback backend (overrides config.json)
    #[arg(long, global = true, value_name = "BOOL")]
    fallback: Option<bool>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Expand or renew the session
    Renew,

    /// Expand the session without starting a new one
    Expand,

    /// Print the current session
    Show {
        /// Print as JSON instead of the encoded form
        #[arg(long)]
        json: bool,
    },

    /// Clear the shared session
    Expire,

    /// Poll the shared session until interrupted
    Watch {
        /// Stop after this many polls
        #[arg(long)]
        ticks: Option<u64>,
    },

    /// Print the selected backend
    Strategy,
}

fn main() {
    let cli = Cli::parse();

    let config = match cli.root {
        Some(root) => StorageConfig::with_root(root),
        None => match StorageConfig::from_home() {
            Ok(config) => config,
            Err(e) => {
                eprintln!("session-hook: {e}");
                std::process::exit(1);
            }
        },
    };
    let _logging_guard = logging::init(&config.logs_dir());

    let ctx = Context {
        config,
        product: cli.product,
        sample_rate: cli.sample_rate,
        fallback: cli.fallback,
    };

    let result = match cli.command {
        Commands::Renew => commands::renew(&ctx),
        Commands::Expand => commands::expand(&ctx),
        Commands::Show { json } => commands::show(&ctx, json),
        Commands::Expire => commands::expire(&ctx),
        Commands::Watch { ticks } => watch::run(&ctx, ticks),
        Commands::Strategy => commands::strategy(&ctx),
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "session-hook failed");
        eprintln!("session-hook: {e}");
        std::process::exit(1);
    }
}
