//! Logging setup using `tracing` + `tracing-subscriber`, with a spinner
//! per running task drawn by `tracing-indicatif`.
//!
//! Priority for determining the log level:
//! 1. `--log-level` CLI flag (if provided)
//! 2. `KILN_LOG` environment variable, any `EnvFilter` directive
//! 3. default to `info`

use tracing::level_filters::LevelFilter;
use tracing_indicatif::IndicatifLayer;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

use crate::cli::LogLevel;

pub const ENV_VAR: &str = "KILN_LOG";

/// Initialise the global logging subscriber. Fails if one is already set.
pub fn init_logging(cli_level: Option<LogLevel>) -> Result<(), TryInitError> {
    let indicatif = IndicatifLayer::new();

    tracing_subscriber::registry()
        .with(filter(cli_level, std::env::var(ENV_VAR).ok().as_deref()))
        .with(
            fmt::layer()
                .with_target(false)
                .with_writer(indicatif.get_stderr_writer()),
        )
        .with(indicatif)
        .try_init()
}

fn filter(cli_level: Option<LogLevel>, env: Option<&str>) -> EnvFilter {
    let level = match cli_level {
        Some(level) => level_from_log_level(level),
        None => match env.and_then(|directives| EnvFilter::try_new(directives).ok()) {
            Some(filter) => return filter,
            None => tracing::Level::INFO,
        },
    };

    EnvFilter::default().add_directive(LevelFilter::from_level(level).into())
}

fn level_from_log_level(lvl: LogLevel) -> tracing::Level {
    match lvl {
        LogLevel::Error => tracing::Level::ERROR,
        LogLevel::Warn => tracing::Level::WARN,
        LogLevel::Info => tracing::Level::INFO,
        LogLevel::Debug => tracing::Level::DEBUG,
        LogLevel::Trace => tracing::Level::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flag_beats_environment() {
        let filter = filter(Some(LogLevel::Warn), Some("trace"));
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::WARN));
    }

    #[test]
    fn environment_beats_default() {
        assert_eq!(filter(None, Some("debug")).max_level_hint(), Some(LevelFilter::DEBUG));
        assert_eq!(filter(None, None).max_level_hint(), Some(LevelFilter::INFO));
    }

    #[test]
    fn garbage_environment_falls_back() {
        assert_eq!(filter(None, Some("kiln=verbose")).max_level_hint(), Some(LevelFilter::INFO));
    }
}
