//! Logging setup for session-hook.
//!
//! Logs go to a daily rolling file under `<root>/logs/` so that stdout stays
//! clean for command output. `SESSION_HOOK_DEBUG=1` forces debug level;
//! otherwise `RUST_LOG` applies, defaulting to `info`.

use std::env;
use std::path::Path;

use fs_err as fs;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

const LOG_FILE_PREFIX: &str = "session-hook.log";

fn debug_enabled() -> bool {
    env::var("SESSION_HOOK_DEBUG")
        .map(|value| matches!(value.as_str(), "1" | "true" | "TRUE" | "yes" | "YES"))
        .unwrap_or(false)
}

fn env_filter() -> EnvFilter {
    if debug_enabled() {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    }
}

/// Returns the guard that flushes the background writer; keep it alive for
/// the whole process. Falls back to stderr if the log dir is unusable.
pub fn init(logs_dir: &Path) -> Option<WorkerGuard> {
    if let Err(err) = fs::create_dir_all(logs_dir) {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter())
            .with_writer(std::io::stderr)
            .init();
        tracing::warn!(error = %err, "Log directory unavailable, logging to stderr");
        return None;
    }

    let appender = tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX);
    let (writer, guard) = tracing_appender::non_blocking(appender);
    tracing_subscriber::fmt()
        .with_env_filter(env_filter())
        .with_writer(writer)
        .with_ansi(false)
        .init();
    Some(guard)
}
