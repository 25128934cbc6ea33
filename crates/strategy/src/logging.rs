//! Tracing setup for the keeper binary: JSON lines to a daily-rolled file
//! for later analysis of ticks and swaps, and a compact stream on stderr.

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LoggingConfig;

/// Install the global subscriber.
///
/// The returned [`WorkerGuard`] must outlive the keeper; dropping it flushes
/// the file writer.
pub fn init_tracing(logging: &LoggingConfig) -> Result<WorkerGuard> {
    let filter = env_filter(logging)?;

    std::fs::create_dir_all(&logging.log_dir)
        .with_context(|| format!("failed to create log dir {}", logging.log_dir))?;
    let appender = tracing_appender::rolling::daily(&logging.log_dir, &logging.file_name);
    let (file_writer, guard) = tracing_appender::non_blocking(appender);

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_writer(file_writer)
                .with_ansi(false)
                .json()
                .flatten_event(true)
                .with_current_span(false),
        )
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .compact(),
        )
        .try_init()
        .context("tracing subscriber already installed")?;

    Ok(guard)
}

/// `RUST_LOG` when it parses, the configured default otherwise.
pub fn env_filter(logging: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&logging.default_filter)
        .with_context(|| format!("invalid log filter '{}'", logging.default_filter))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn logging(filter: &str) -> LoggingConfig {
        LoggingConfig {
            log_dir: "logs".into(),
            file_name: "keeper.log".into(),
            default_filter: filter.into(),
        }
    }

    #[test]
    #[serial]
    fn test_default_filter_used_without_rust_log() {
        std::env::remove_var("RUST_LOG");
        let filter = env_filter(&logging("lender_borrower=debug,warn")).unwrap();
        let rendered = filter.to_string();
        assert!(rendered.contains("lender_borrower=debug"), "{rendered}");
    }

    #[test]
    #[serial]
    fn test_rust_log_takes_precedence() {
        std::env::set_var("RUST_LOG", "lender_borrower=trace");
        let filter = env_filter(&logging("warn")).unwrap();
        std::env::remove_var("RUST_LOG");
        assert!(filter.to_string().contains("lender_borrower=trace"));
    }

    #[test]
    #[serial]
    fn test_malformed_default_filter_rejected() {
        std::env::remove_var("RUST_LOG");
        let err = env_filter(&logging("lender_borrower=loud")).unwrap_err();
        assert!(err.to_string().contains("invalid log filter"), "{err}");
    }
}
