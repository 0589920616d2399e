//! Client configuration.

use std::time::Duration;

use crate::batch::BatchKind;
use crate::error::{Error, Result};

/// Runtime configuration for one [`crate::Client`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClientConfig {
    /// Statements per batch before an accumulator drains on append.
    pub max_batch_size: usize,
    /// Period of the flush tick that drains partially filled batches.
    pub flush_interval: Duration,
    /// Batch flavour used for every accumulator.
    pub batch_kind: BatchKind,
    /// Deadline for one batch execution (`None` disables it).
    pub execution_timeout: Option<Duration>,
    /// Rows requested per page for reads.
    pub page_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            flush_interval: Duration::from_millis(10),
            batch_kind: BatchKind::Unlogged,
            execution_timeout: None,
            page_size: 5000,
        }
    }
}

impl ClientConfig {
    /// Loads configuration from `HOLO_ACCESS_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults for
    /// unset variables.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let max_batch_size = parse_usize(
            lookup("HOLO_ACCESS_MAX_BATCH_SIZE"),
            defaults.max_batch_size,
        )?
        .max(1);
        let flush_interval_ms = parse_u64(
            lookup("HOLO_ACCESS_FLUSH_INTERVAL_MS"),
            defaults.flush_interval.as_millis() as u64,
        )?
        .max(1);
        let batch_kind = match lookup("HOLO_ACCESS_BATCH_KIND") {
            Some(raw) => raw.parse::<BatchKind>()?,
            None => defaults.batch_kind,
        };
        let execution_timeout_ms = parse_u64(lookup("HOLO_ACCESS_EXECUTION_TIMEOUT_MS"), 0)?;
        let page_size =
            parse_usize(lookup("HOLO_ACCESS_PAGE_SIZE"), defaults.page_size)?.max(1);

        Ok(Self {
            max_batch_size,
            flush_interval: Duration::from_millis(flush_interval_ms),
            batch_kind,
            execution_timeout: (execution_timeout_ms > 0)
                .then(|| Duration::from_millis(execution_timeout_ms)),
            page_size,
        })
    }
}

/// Parses an optional `usize` with fallback default.
fn parse_usize(value: Option<String>, default_value: usize) -> Result<usize> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<usize>()
            .map_err(|err| Error::Config(format!("invalid usize value {raw:?}: {err}"))),
        None => Ok(default_value),
    }
}

/// Parses an optional `u64` with fallback default.
fn parse_u64(value: Option<String>, default_value: u64) -> Result<u64> {
    match value {
        Some(raw) => raw
            .trim()
            .parse::<u64>()
            .map_err(|err| Error::Config(format!("invalid u64 value {raw:?}: {err}"))),
        None => Ok(default_value),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn unset_variables_use_defaults() {
        let config = ClientConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ClientConfig::default());
    }

    #[test]
    fn overrides_are_parsed_and_clamped() {
        let config = ClientConfig::from_lookup(lookup(&[
            ("HOLO_ACCESS_MAX_BATCH_SIZE", "0"),
            ("HOLO_ACCESS_FLUSH_INTERVAL_MS", "0"),
            ("HOLO_ACCESS_BATCH_KIND", "Logged"),
            ("HOLO_ACCESS_EXECUTION_TIMEOUT_MS", "250"),
            ("HOLO_ACCESS_PAGE_SIZE", "7"),
        ]))
        .unwrap();
        assert_eq!(config.max_batch_size, 1);
        assert_eq!(config.flush_interval, Duration::from_millis(1));
        assert_eq!(config.batch_kind, BatchKind::Logged);
        assert_eq!(config.execution_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.page_size, 7);
    }

    #[test]
    fn zero_timeout_disables_deadline() {
        let config =
            ClientConfig::from_lookup(lookup(&[("HOLO_ACCESS_EXECUTION_TIMEOUT_MS", "0")]))
                .unwrap();
        assert_eq!(config.execution_timeout, None);
    }

    #[test]
    fn malformed_numbers_are_config_errors() {
        let err = ClientConfig::from_lookup(lookup(&[("HOLO_ACCESS_PAGE_SIZE", "lots")]))
            .expect_err("non-numeric page size");
        assert!(matches!(err, Error::Config(_)));
    }
}
