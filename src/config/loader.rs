//! Configuration Loader
//!
//! Layers documented defaults, an optional TOML file and explicit environment
//! variables (highest precedence) using the `config` crate.

use std::path::Path;

use tracing::debug;

use super::QueueConfig;
use crate::constants::env;
use crate::error::QueueResult;

/// Configuration key and the environment variable that overrides it
const ENV_OVERRIDES: &[(&str, &str)] = &[
    ("url", env::BROKER_URL),
    ("user", env::BROKER_USER),
    ("password", env::BROKER_PASSWORD),
    ("queue_name", env::QUEUE_NAME),
    ("exchange_name", env::EXCHANGE_NAME),
    ("dead_letter_queue_name", env::DEAD_LETTER_QUEUE_NAME),
    ("dead_letter_exchange_name", env::DEAD_LETTER_EXCHANGE_NAME),
    ("prefetch_count", env::PREFETCH_COUNT),
    ("reconnect_delay_ms", env::RECONNECT_DELAY_MS),
    ("max_reconnect_attempts", env::MAX_RECONNECT_ATTEMPTS),
    ("max_priority", env::MAX_PRIORITY),
    ("max_queue_length", env::MAX_QUEUE_LENGTH),
    ("dead_letter_warn_threshold", env::DEAD_LETTER_WARN_THRESHOLD),
    ("connection_name", env::CONNECTION_NAME),
];

impl QueueConfig {
    /// Load configuration from the process environment
    pub fn load() -> QueueResult<Self> {
        Self::load_with(|name| std::env::var(name).ok())
    }

    /// Load configuration resolving variables through `lookup`
    ///
    /// Tests pass a map-backed lookup instead of mutating the process environment.
    pub fn load_with<F>(lookup: F) -> QueueResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = QueueConfig::default();

        let mut builder = ::config::Config::builder()
            .set_default("url", defaults.url)?
            .set_default("user", defaults.user)?
            .set_default("password", defaults.password)?
            .set_default("queue_name", defaults.queue_name)?
            .set_default("exchange_name", defaults.exchange_name)?
            .set_default("dead_letter_queue_name", defaults.dead_letter_queue_name)?
            .set_default("dead_letter_exchange_name", defaults.dead_letter_exchange_name)?
            .set_default("prefetch_count", i64::from(defaults.prefetch_count))?
            .set_default("reconnect_delay_ms", defaults.reconnect_delay_ms as i64)?
            .set_default(
                "max_reconnect_attempts",
                i64::from(defaults.max_reconnect_attempts),
            )?
            .set_default("max_priority", i64::from(defaults.max_priority))?
            .set_default(
                "dead_letter_warn_threshold",
                i64::from(defaults.dead_letter_warn_threshold),
            )?
            .set_default("connection_name", defaults.connection_name)?;

        if let Some(path) = lookup(env::CONFIG_FILE) {
            debug!(path = %path, "Loading queue configuration file");
            builder = builder.add_source(::config::File::from(Path::new(&path)).required(true));
        }

        for (key, variable) in ENV_OVERRIDES {
            let value = lookup(variable).filter(|v| !v.trim().is_empty());
            builder = builder.set_override_option(*key, value)?;
        }

        let config: QueueConfig = builder.build()?.try_deserialize()?;
        config.validate()?;

        debug!(config = ?config, "Queue configuration loaded");
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_load_defaults_without_environment() {
        let config = QueueConfig::load_with(|_| None).expect("defaults should load");
        assert_eq!(config, QueueConfig::default());
    }

    #[test]
    fn test_environment_overrides_defaults() {
        let config = QueueConfig::load_with(lookup_from(&[
            ("REPORT_QUEUE_NAME", "reports-v2"),
            ("REPORT_DLQ_NAME", "reports-v2-dlq"),
            ("REPORT_QUEUE_PREFETCH", "4"),
            ("RABBITMQ_RECONNECT_DELAY_MS", "250"),
            ("REPORT_QUEUE_MAX_LENGTH", "1000"),
        ]))
        .expect("overrides should load");

        assert_eq!(config.queue_name, "reports-v2");
        assert_eq!(config.dead_letter_queue_name, "reports-v2-dlq");
        assert_eq!(config.prefetch_count, 4);
        assert_eq!(config.reconnect_delay_ms, 250);
        assert_eq!(config.max_queue_length, Some(1000));
        assert_eq!(config.exchange_name, "report-exchange");
    }

    #[test]
    fn test_blank_environment_value_falls_back_to_default() {
        let config = QueueConfig::load_with(lookup_from(&[("REPORT_QUEUE_NAME", "  ")]))
            .expect("blank values are ignored");
        assert_eq!(config.queue_name, "report-generation");
    }

    #[test]
    fn test_invalid_number_is_configuration_error() {
        let result = QueueConfig::load_with(lookup_from(&[("REPORT_QUEUE_PREFETCH", "lots")]));
        assert!(result.is_err());
    }

    #[test]
    fn test_file_layer_below_environment() {
        let mut file = tempfile::Builder::new()
            .suffix(".toml")
            .tempfile()
            .expect("temp file");
        writeln!(
            file,
            "queue_name = \"from-file\"\nexchange_name = \"file-exchange\"\nprefetch_count = 8"
        )
        .expect("write config");

        let path = file.path().to_string_lossy().to_string();
        let config = QueueConfig::load_with(lookup_from(&[
            ("REPORT_QUEUE_CONFIG", path.as_str()),
            ("REPORT_EXCHANGE_NAME", "env-exchange"),
        ]))
        .expect("file config should load");

        assert_eq!(config.queue_name, "from-file");
        assert_eq!(config.prefetch_count, 8);
        assert_eq!(config.exchange_name, "env-exchange");
    }

    #[test]
    fn test_validation_runs_after_layering() {
        let result = QueueConfig::load_with(lookup_from(&[(
            "REPORT_DLQ_NAME",
            "report-generation",
        )]));
        assert!(result.is_err());
    }
}
