//! Process configuration read from the environment.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::retry::RetryPolicy;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} has an invalid value '{value}': {reason}")]
    Invalid {
        name: &'static str,
        value: String,
        reason: String,
    },

    #[error("{0} must be set")]
    Missing(&'static str),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub bind_addr: SocketAddr,
    pub use_persistent_stores: bool,
    pub database_url: Option<String>,
    /// Bound on every store call.
    pub store_timeout: Duration,
    pub retry_max_attempts: u32,
    pub retry_base_delay: Duration,
    pub reservation_ttl: Option<Duration>,
    pub sweep_interval: Duration,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            use_persistent_stores: false,
            database_url: None,
            store_timeout: Duration::from_millis(2000),
            retry_max_attempts: 5,
            retry_base_delay: Duration::from_millis(5),
            reservation_ttl: None,
            sweep_interval: Duration::from_secs(30),
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build settings from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Settings::default();
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_addr = match get("BIND_ADDR") {
            Some(v) => parse("BIND_ADDR", &v)?,
            None => defaults.bind_addr,
        };
        let use_persistent_stores = match get("USE_PERSISTENT_STORES") {
            Some(v) => parse_bool("USE_PERSISTENT_STORES", &v)?,
            None => defaults.use_persistent_stores,
        };
        let database_url = get("DATABASE_URL");
        if use_persistent_stores && database_url.is_none() {
            return Err(ConfigError::Missing("DATABASE_URL"));
        }

        let millis = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match get(name) {
                Some(v) => Ok(Duration::from_millis(parse(name, &v)?)),
                None => Ok(default),
            }
        };
        let store_timeout = millis("STORE_TIMEOUT_MS", defaults.store_timeout)?;
        let retry_base_delay = millis("RETRY_BASE_DELAY_MS", defaults.retry_base_delay)?;

        let retry_max_attempts: u32 = match get("RETRY_MAX_ATTEMPTS") {
            Some(v) => parse("RETRY_MAX_ATTEMPTS", &v)?,
            None => defaults.retry_max_attempts,
        };
        if retry_max_attempts == 0 {
            return Err(ConfigError::Invalid {
                name: "RETRY_MAX_ATTEMPTS",
                value: "0".to_string(),
                reason: "at least one attempt is required".to_string(),
            });
        }

        let reservation_ttl = match get("RESERVATION_TTL_SECS") {
            Some(v) => Some(Duration::from_secs(parse("RESERVATION_TTL_SECS", &v)?)),
            None => None,
        };
        let sweep_interval = match get("SWEEP_INTERVAL_SECS") {
            Some(v) => Duration::from_secs(parse("SWEEP_INTERVAL_SECS", &v)?),
            None => defaults.sweep_interval,
        };

        Ok(Self {
            bind_addr,
            use_persistent_stores,
            database_url,
            store_timeout,
            retry_max_attempts,
            retry_base_delay,
            reservation_ttl,
            sweep_interval,
        })
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.retry_max_attempts, self.retry_base_delay)
    }
}

fn parse<T>(name: &'static str, value: &str) -> Result<T, ConfigError>
where
    T: std::str::FromStr,
    T::Err: core::fmt::Display,
{
    value.trim().parse().map_err(|e: T::Err| ConfigError::Invalid {
        name,
        value: value.to_string(),
        reason: e.to_string(),
    })
}

fn parse_bool(name: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            name,
            value: value.to_string(),
            reason: "expected a boolean".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn settings(vars: &[(&str, &str)]) -> Result<Settings, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Settings::from_lookup(|name| map.get(name).cloned())
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        assert_eq!(settings(&[]).unwrap(), Settings::default());
    }

    #[test]
    fn values_are_parsed() {
        let s = settings(&[
            ("BIND_ADDR", "127.0.0.1:9000"),
            ("STORE_TIMEOUT_MS", "250"),
            ("RETRY_MAX_ATTEMPTS", "3"),
            ("RESERVATION_TTL_SECS", "900"),
        ])
        .unwrap();
        assert_eq!(s.bind_addr.port(), 9000);
        assert_eq!(s.store_timeout, Duration::from_millis(250));
        assert_eq!(s.retry_max_attempts, 3);
        assert_eq!(s.reservation_ttl, Some(Duration::from_secs(900)));
    }

    #[test]
    fn garbage_is_a_config_error() {
        let err = settings(&[("STORE_TIMEOUT_MS", "soon")]).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { name: "STORE_TIMEOUT_MS", .. }));
        assert!(settings(&[("USE_PERSISTENT_STORES", "maybe")]).is_err());
        assert!(settings(&[("RETRY_MAX_ATTEMPTS", "0")]).is_err());
    }

    #[test]
    fn persistent_stores_need_a_database_url() {
        assert_eq!(
            settings(&[("USE_PERSISTENT_STORES", "true")]).unwrap_err(),
            ConfigError::Missing("DATABASE_URL")
        );
        let s = settings(&[
            ("USE_PERSISTENT_STORES", "true"),
            ("DATABASE_URL", "postgres://localhost/pantry"),
        ])
        .unwrap();
        assert!(s.use_persistent_stores);
    }
}
