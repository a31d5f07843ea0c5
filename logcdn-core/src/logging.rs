use std::sync::Arc;
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter,
};

use crate::config::LoggingConfig;

/// Initialize structured logging based on configuration
///
/// `RUST_LOG` takes precedence over the configured level. JSON output is meant
/// for production, pretty output for development; both can go to a file.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let log_level = parse_log_level(&config.level)?;

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.level))
        .unwrap_or_else(|_| EnvFilter::new(log_level.to_string()));

    let registry = tracing_subscriber::registry().with(env_filter);
    let file = config.file_path.as_deref().map(open_log_file).transpose()?;

    if config.format.as_str() == "json" {
        let layer = fmt::layer()
            .json()
            .with_current_span(true)
            .with_target(true)
            .with_line_number(true);

        match file {
            Some(file) => registry.with(layer.with_writer(file)).try_init()?,
            None => registry.with(layer).try_init()?,
        }
    } else {
        let layer = fmt::layer()
            .pretty()
            .with_span_events(FmtSpan::CLOSE)
            .with_target(true)
            .with_file(false);

        match file {
            Some(file) => registry.with(layer.with_writer(file)).try_init()?,
            None => registry.with(layer).try_init()?,
        }
    }

    Ok(())
}

fn open_log_file(path: &str) -> anyhow::Result<Arc<std::fs::File>> {
    let file = std::fs::OpenOptions::new().create(true).append(true).open(path)?;
    Ok(Arc::new(file))
}

/// Parse log level string to tracing Level
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
        assert_eq!(parse_log_level("DEBUG").unwrap(), Level::DEBUG);
        assert_eq!(parse_log_level("warning").unwrap(), Level::WARN);
        assert!(parse_log_level("loud").is_err());
    }

    #[test]
    fn test_open_log_file_appends() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logcdn.log");
        let path = path.to_string_lossy();
        assert!(open_log_file(&path).is_ok());
        assert!(open_log_file(&path).is_ok());
    }
}
