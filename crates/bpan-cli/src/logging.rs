//! Logging setup for the CLI.
//!
//! Writes to `~/.local/state/bpan/bpan.log` when the state dir is writable;
//! anything that prevents opening the log file silently demotes output to
//! stderr so the CLI never refuses to run over logging.

use std::fs;
use std::io;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,bpan_core=debug,bpan_cli=debug"))
}

fn open_log_file() -> io::Result<(fs::File, PathBuf)> {
    let xdg_dirs = xdg::BaseDirectories::with_prefix("bpan")
        .map_err(|e| io::Error::new(io::ErrorKind::Other, e))?;
    let log_dir = xdg_dirs.get_state_home();
    fs::create_dir_all(&log_dir)?;
    let path = log_dir.join("bpan.log");
    let file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
    Ok((file, path))
}

/// Install the tracing subscriber: file-backed if possible, stderr
/// otherwise.
pub fn init() {
    match open_log_file() {
        Ok((file, path)) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(move || match file.try_clone() {
                    Ok(f) => Box::new(f) as Box<dyn io::Write + Send>,
                    Err(_) => Box::new(io::stderr()) as Box<dyn io::Write + Send>,
                })
                .with_ansi(false)
                .init();
            tracing::info!("logging to {}", path.display());
        }
        Err(e) => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter())
                .with_writer(io::stderr)
                .with_ansi(false)
                .init();
            tracing::warn!(error = %e, "log file unavailable, logging to stderr");
        }
    }
}
