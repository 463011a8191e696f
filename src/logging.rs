//! Log output
//!
//! The terminal UI owns stdout, so logs go to `alias.log` in the data
//! directory. Verbosity comes from `ALIAS_LOG` (EnvFilter syntax, default
//! `info`), e.g. `ALIAS_LOG=alias::session=debug`.

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Environment variable holding the log filter
pub const LOG_ENV: &str = "ALIAS_LOG";

pub const LOG_FILE: &str = "alias.log";

#[derive(Debug, Error)]
pub enum LoggingError {
    #[error("cannot open log file {path}: {source}")]
    Open {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("cannot install log subscriber: {0}")]
    Install(String),
}

/// Filter from `ALIAS_LOG`, falling back to `info`
pub fn filter() -> EnvFilter {
    EnvFilter::try_from_env(LOG_ENV).unwrap_or_else(|_| EnvFilter::new("info"))
}

/// Install the global subscriber. Returns the log file path.
pub fn init(dir: &Path) -> Result<PathBuf, LoggingError> {
    let path = dir.join(LOG_FILE);
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .map_err(|source| LoggingError::Open {
            path: path.clone(),
            source,
        })?;

    tracing_subscriber::fmt()
        .with_env_filter(filter())
        .with_writer(Mutex::new(file))
        .with_ansi(false)
        .with_target(true)
        .try_init()
        .map_err(|e| LoggingError::Install(e.to_string()))?;
    Ok(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        // Another test may have installed a subscriber already
        let result = init(dir.path());
        assert!(dir.path().join(LOG_FILE).exists());
        if let Ok(path) = result {
            assert_eq!(path, dir.path().join(LOG_FILE));
        }
    }

    #[test]
    fn test_missing_dir_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("nope");
        assert!(matches!(init(&missing), Err(LoggingError::Open { .. })));
    }
}
