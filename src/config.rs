//! Server configuration, read from environment variables.
//!
//! | Variable | Default |
//! |---|---|
//! | `TASKFLOW_HOST` | `127.0.0.1` |
//! | `TASKFLOW_PORT` | `3000` |
//! | `DEV_MODE` | `false` (auth disabled when true) |
//! | `JWT_SECRET` | required unless `DEV_MODE` |
//! | `TASKFLOW_DATA_PATH` | unset (in-memory only) |
//! | `TASKFLOW_SWEEP_INTERVAL_SECS` | `300` |
//! | `TASKFLOW_DEADLINE_WARNING_DAYS` | `3` |
//! | `TASKFLOW_CHANNEL_CAPACITY` | `256` |

use std::ops::RangeInclusive;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::overdue::DEFAULT_WARNING_DAYS;
use crate::transport::DEFAULT_CHANNEL_CAPACITY;

/// Accepted range for `TASKFLOW_SWEEP_INTERVAL_SECS` (one second to one week).
pub const SWEEP_INTERVAL_SECS_RANGE: RangeInclusive<u64> = 1..=604_800;
/// Accepted range for `TASKFLOW_DEADLINE_WARNING_DAYS`.
pub const WARNING_DAYS_RANGE: RangeInclusive<i64> = 0..=365;
/// Accepted range for `TASKFLOW_CHANNEL_CAPACITY`.
pub const CHANNEL_CAPACITY_RANGE: RangeInclusive<usize> = 1..=65_536;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
    #[error("JWT_SECRET must be set when DEV_MODE is off")]
    MissingJwtSecret,
}

/// Token settings.
#[derive(Debug, Clone)]
pub struct AuthConfig {
    pub jwt_secret: Option<String>,
}

impl AuthConfig {
    /// Whether requests must carry a valid token.
    pub fn auth_required(&self, dev_mode: bool) -> bool {
        !dev_mode
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub dev_mode: bool,
    pub auth: AuthConfig,
    /// JSON snapshot file for the bundled store
    pub data_path: Option<PathBuf>,
    pub sweep_interval: Duration,
    pub deadline_warning_days: i64,
    pub channel_capacity: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3000,
            dev_mode: false,
            auth: AuthConfig { jwt_secret: None },
            data_path: None,
            sweep_interval: Duration::from_secs(300),
            deadline_warning_days: DEFAULT_WARNING_DAYS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

impl Config {
    /// Build the configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build the configuration from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());

        let dev_mode = match get("DEV_MODE") {
            Some(v) => parse_bool("DEV_MODE", &v)?,
            None => defaults.dev_mode,
        };
        let jwt_secret = get("JWT_SECRET");
        if !dev_mode && jwt_secret.is_none() {
            return Err(ConfigError::MissingJwtSecret);
        }

        Ok(Self {
            host: get("TASKFLOW_HOST").unwrap_or(defaults.host),
            port: parse_or("TASKFLOW_PORT", get("TASKFLOW_PORT"), defaults.port)?,
            dev_mode,
            auth: AuthConfig { jwt_secret },
            data_path: get("TASKFLOW_DATA_PATH").map(PathBuf::from),
            sweep_interval: Duration::from_secs(parse_in_range(
                "TASKFLOW_SWEEP_INTERVAL_SECS",
                get("TASKFLOW_SWEEP_INTERVAL_SECS"),
                defaults.sweep_interval.as_secs(),
                SWEEP_INTERVAL_SECS_RANGE,
            )?),
            deadline_warning_days: parse_in_range(
                "TASKFLOW_DEADLINE_WARNING_DAYS",
                get("TASKFLOW_DEADLINE_WARNING_DAYS"),
                defaults.deadline_warning_days,
                WARNING_DAYS_RANGE,
            )?,
            channel_capacity: parse_in_range(
                "TASKFLOW_CHANNEL_CAPACITY",
                get("TASKFLOW_CHANNEL_CAPACITY"),
                defaults.channel_capacity,
                CHANNEL_CAPACITY_RANGE,
            )?,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

fn parse_or<T: FromStr>(key: &'static str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue { key, value: v }),
        None => Ok(default),
    }
}

/// Like [`parse_or`], but values outside `range` are rejected too.
fn parse_in_range<T>(
    key: &'static str,
    value: Option<String>,
    default: T,
    range: RangeInclusive<T>,
) -> Result<T, ConfigError>
where
    T: FromStr + PartialOrd,
{
    let raw = value.clone();
    let parsed = parse_or(key, value, default)?;
    if range.contains(&parsed) {
        Ok(parsed)
    } else {
        Err(ConfigError::InvalidValue {
            key,
            value: raw.unwrap_or_default(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_dev_mode_needs_no_secret() {
        let config = Config::from_lookup(lookup(&[("DEV_MODE", "true")])).unwrap();
        assert!(config.dev_mode);
        assert!(!config.auth.auth_required(config.dev_mode));
        assert_eq!(config.port, 3000);
        assert_eq!(config.deadline_warning_days, DEFAULT_WARNING_DAYS);
    }

    #[test]
    fn test_secret_required_outside_dev_mode() {
        let err = Config::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingJwtSecret));
    }

    #[test]
    fn test_overrides_and_bad_numbers() {
        let config = Config::from_lookup(lookup(&[
            ("JWT_SECRET", "s3cret"),
            ("TASKFLOW_PORT", "8080"),
            ("TASKFLOW_SWEEP_INTERVAL_SECS", "60"),
            ("TASKFLOW_DATA_PATH", "/tmp/taskflow.json"),
        ]))
        .unwrap();
        assert_eq!(config.bind_addr(), "127.0.0.1:8080");
        assert_eq!(config.sweep_interval, Duration::from_secs(60));
        assert_eq!(config.data_path, Some(PathBuf::from("/tmp/taskflow.json")));

        let err = Config::from_lookup(lookup(&[("DEV_MODE", "1"), ("TASKFLOW_PORT", "http")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                key: "TASKFLOW_PORT",
                ..
            }
        ));
    }

    fn rejected_key(pairs: &[(&str, &str)]) -> &'static str {
        match Config::from_lookup(lookup(pairs)) {
            Err(ConfigError::InvalidValue { key, .. }) => key,
            other => panic!("expected InvalidValue, got {:?}", other),
        }
    }

    #[test]
    fn test_zero_and_out_of_range_values_are_rejected() {
        assert_eq!(
            rejected_key(&[("DEV_MODE", "1"), ("TASKFLOW_SWEEP_INTERVAL_SECS", "0")]),
            "TASKFLOW_SWEEP_INTERVAL_SECS"
        );
        assert_eq!(
            rejected_key(&[
                ("DEV_MODE", "1"),
                ("TASKFLOW_DEADLINE_WARNING_DAYS", "9223372036854775807"),
            ]),
            "TASKFLOW_DEADLINE_WARNING_DAYS"
        );
        assert_eq!(
            rejected_key(&[("DEV_MODE", "1"), ("TASKFLOW_DEADLINE_WARNING_DAYS", "-1")]),
            "TASKFLOW_DEADLINE_WARNING_DAYS"
        );
        assert_eq!(
            rejected_key(&[("DEV_MODE", "1"), ("TASKFLOW_CHANNEL_CAPACITY", "0")]),
            "TASKFLOW_CHANNEL_CAPACITY"
        );

        let config = Config::from_lookup(lookup(&[
            ("DEV_MODE", "1"),
            ("TASKFLOW_SWEEP_INTERVAL_SECS", "1"),
            ("TASKFLOW_DEADLINE_WARNING_DAYS", "0"),
        ]))
        .unwrap();
        assert_eq!(config.sweep_interval, Duration::from_secs(1));
        assert_eq!(config.deadline_warning_days, 0);
    }
}
