use crate::error::Result;
use std::fs::File;
use std::path::Path;
use std::sync::Mutex;
use tracing::{warn, Level};
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global subscriber: a stderr layer and, when `logfile` is given, a plain text
/// layer writing to that file (truncated). `RUST_LOG` overrides `level` when set. Once a global
/// subscriber is installed, later calls keep it and leave `logfile` untouched.
pub fn init_logging(level: Level, logfile: Option<&Path>) -> Result<()> {
    if tracing::dispatcher::has_been_set() {
        if let Some(path) = logfile {
            warn!("logging is already initialized, not writing to {}", path.display());
        }
        return Ok(());
    }

    let filter = EnvFilter::builder()
        .with_default_directive(LevelFilter::from_level(level).into())
        .from_env_lossy();

    let file_layer = match logfile {
        Some(path) => {
            let file = File::create(path)?;
            Some(fmt::layer().with_ansi(false).with_writer(Mutex::new(file)))
        }
        None => None,
    };

    let result = tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(file_layer)
        .try_init();

    // another thread won the race to install a subscriber
    if let Err(e) = result {
        warn!("logging setup skipped: {}", e);
    }
    Ok(())
}

/// log level of a run: INFO when verbose, WARN otherwise
pub fn run_level(verbose: bool) -> Level {
    if verbose {
        Level::INFO
    } else {
        Level::WARN
    }
}

#[cfg(test)]
mod tests {
    use crate::logging::{init_logging, run_level};
    use tracing::Level;

    #[test]
    fn verbosity_selects_level() {
        assert_eq!(run_level(true), Level::INFO);
        assert_eq!(run_level(false), Level::WARN);
    }

    #[test]
    fn logfile_is_created_and_init_is_repeatable() {
        let dir = tempfile::tempdir().unwrap();
        let log = dir.path().join("run.log");
        init_logging(Level::INFO, Some(&log)).unwrap();
        assert!(log.is_file());
        init_logging(Level::WARN, None).unwrap();

        // the first subscriber stays, so a second log file is never created
        let second = dir.path().join("second.log");
        init_logging(Level::INFO, Some(&second)).unwrap();
        assert!(!second.exists());
    }
}
