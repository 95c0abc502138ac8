//! Subscriber setup for applications embedding the client
//!
//! Events from this crate are filtered separately from everything else, so a
//! call can be traced at `debug` without drowning in the WebRTC stack's own
//! output. `ROOMCAST_LOG` overrides the configured directives.

use tracing::Level;
use tracing_subscriber::{
    fmt::{self, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::{LogFormat, LoggingConfig};

/// Environment variable holding filter directives
pub const LOG_ENV: &str = "ROOMCAST_LOG";

/// Target of every event this crate emits
const CRATE_TARGET: &str = "roomcast_sfu";

/// Install a global subscriber for the session's logs
///
/// Embedders that already install a subscriber should skip this and keep
/// their own.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let directives = match std::env::var(LOG_ENV) {
        Ok(directives) if !directives.trim().is_empty() => directives,
        _ => default_directives(config)?,
    };
    let filter = EnvFilter::try_new(&directives)?;
    let (writer, ansi) = make_writer(config.file_path.as_deref())?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Json => registry
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_target(true)
                    .with_writer(writer),
            )
            .try_init()?,
        LogFormat::Pretty => registry
            .with(
                fmt::layer()
                    .pretty()
                    .with_ansi(ansi)
                    .with_target(true)
                    .with_line_number(true)
                    .with_file(false)
                    .with_writer(writer),
            )
            .try_init()?,
        LogFormat::Compact => registry
            .with(
                fmt::layer()
                    .compact()
                    .with_ansi(ansi)
                    .with_target(false)
                    .with_writer(writer),
            )
            .try_init()?,
    }

    tracing::debug!(directives = %directives, format = ?config.format, "Logging initialised");
    Ok(())
}

/// Crate level plus a floor for every other target,
/// e.g. `warn,roomcast_sfu=debug`
fn default_directives(config: &LoggingConfig) -> anyhow::Result<String> {
    let level = parse_log_level(&config.level)?;
    let dependency_level = parse_log_level(&config.dependency_level)?;
    Ok(format!(
        "{},{CRATE_TARGET}={}",
        dependency_level.as_str().to_lowercase(),
        level.as_str().to_lowercase()
    ))
}

/// Stderr, or an append-only file without colours
fn make_writer(file_path: Option<&str>) -> anyhow::Result<(BoxMakeWriter, bool)> {
    let Some(path) = file_path else {
        return Ok((BoxMakeWriter::new(std::io::stderr), true));
    };
    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    Ok((BoxMakeWriter::new(std::sync::Arc::new(file)), false))
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_log_level() {
        assert_eq!(parse_log_level("WARNING").unwrap(), Level::WARN);
        assert_eq!(parse_log_level("trace").unwrap(), Level::TRACE);
        assert!(parse_log_level("verbose").is_err());
    }

    #[test]
    fn test_default_directives_scope_crate_level() {
        let config = LoggingConfig {
            level: "debug".to_string(),
            ..Default::default()
        };
        assert_eq!(default_directives(&config).unwrap(), "warn,roomcast_sfu=debug");
        assert!(EnvFilter::try_new(default_directives(&config).unwrap()).is_ok());
    }

    #[test]
    fn test_invalid_dependency_level_rejected() {
        let config = LoggingConfig {
            dependency_level: "loud".to_string(),
            ..Default::default()
        };
        assert!(default_directives(&config).is_err());
    }

    #[test]
    fn test_file_writer_disables_colours() {
        let path = std::env::temp_dir().join(format!("roomcast-log-{}.log", std::process::id()));
        let (_, ansi) = make_writer(path.to_str()).unwrap();
        assert!(!ansi);
        let _ = std::fs::remove_file(&path);

        let (_, ansi) = make_writer(None).unwrap();
        assert!(ansi);
    }
}
