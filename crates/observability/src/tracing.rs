//! Tracing/logging initialization.
//!
//! Output is JSON by default, filtered by `RUST_LOG` (falling back to `info`).
//! `LOG_FORMAT=pretty` switches to human-readable lines for local runs.

use std::str::FromStr;

use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Copy, Clone, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Json,
    Pretty,
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown log format '{0}' (expected 'json' or 'pretty')")]
pub struct UnknownLogFormat(pub String);

impl FromStr for LogFormat {
    type Err = UnknownLogFormat;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(LogFormat::Json),
            "pretty" | "text" => Ok(LogFormat::Pretty),
            other => Err(UnknownLogFormat(other.to_string())),
        }
    }
}

/// Initialize tracing for the process with the format named by `LOG_FORMAT`.
///
/// An unreadable `LOG_FORMAT` falls back to JSON and is reported once the
/// subscriber is up.
pub fn init() {
    let (format, bad) = match std::env::var("LOG_FORMAT") {
        Ok(v) => match v.parse::<LogFormat>() {
            Ok(f) => (f, None),
            Err(e) => (LogFormat::Json, Some(e)),
        },
        Err(_) => (LogFormat::Json, None),
    };
    init_with(format);
    if let Some(e) = bad {
        ::tracing::warn!(error = %e, "ignoring LOG_FORMAT");
    }
}

/// Initialize tracing with an explicit format. Subsequent calls are no-ops.
pub fn init_with(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime);

    let _ = match format {
        LogFormat::Json => builder.json().with_target(false).try_init(),
        LogFormat::Pretty => builder.with_target(true).try_init(),
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_parses_case_insensitively() {
        assert_eq!("JSON".parse::<LogFormat>(), Ok(LogFormat::Json));
        assert_eq!(" pretty ".parse::<LogFormat>(), Ok(LogFormat::Pretty));
        assert_eq!(
            "xml".parse::<LogFormat>(),
            Err(UnknownLogFormat("xml".to_string()))
        );
    }

    #[test]
    fn init_is_idempotent() {
        init_with(LogFormat::Json);
        init_with(LogFormat::Pretty);
        init();
    }
}
