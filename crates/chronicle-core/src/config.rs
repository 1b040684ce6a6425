//! Engine configuration.
//!
//! Settings are plain serde structs with explicit defaults. Durations are
//! carried as milliseconds (`*_ms` keys) in YAML and environment variables.

use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Environment variable prefix read by [`EngineConfig::from_env`].
pub const ENV_PREFIX: &str = "CHRONICLE_";

/// Event store write and read behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EventStoreSettings {
    /// Queue commits and flush them in the background.
    #[serde(rename = "async")]
    pub async_writes: bool,
    /// Maximum time a queued commit waits before being flushed.
    #[serde(rename = "flush_interval_ms", with = "duration_ms")]
    pub flush_interval: Duration,
    /// Number of queued commits that triggers an immediate flush.
    pub batch_size: usize,
    /// Reject commits whose id was already recorded for the stream.
    pub detect_duplicate_commits: bool,
    /// Flag commits once their events are dispatched downstream.
    pub mark_dispatched: bool,
    /// Events fetched per read page.
    pub page_size: usize,
}

impl Default for EventStoreSettings {
    fn default() -> Self {
        Self {
            async_writes: false,
            flush_interval: Duration::from_millis(100),
            batch_size: 100,
            detect_duplicate_commits: true,
            mark_dispatched: true,
            page_size: 1000,
        }
    }
}

/// Aggregate store behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregateStoreSettings {
    /// Commits between automatic snapshots; 0 disables snapshotting.
    pub snapshot_interval: i64,
    /// Cache entry lifetime from last access.
    #[serde(rename = "cache_sliding_expiration_ms", with = "duration_ms")]
    pub cache_sliding_expiration: Duration,
}

impl Default for AggregateStoreSettings {
    fn default() -> Self {
        Self {
            snapshot_interval: 100,
            cache_sliding_expiration: Duration::from_secs(600),
        }
    }
}

/// Saga store and timeout scheduling behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SagaStoreSettings {
    /// Cache entry lifetime from last access.
    #[serde(rename = "cache_sliding_expiration_ms", with = "duration_ms")]
    pub cache_sliding_expiration: Duration,
    /// How often the timeout scheduler polls for due timeouts.
    #[serde(rename = "timeout_poll_interval_ms", with = "duration_ms")]
    pub timeout_poll_interval: Duration,
    /// How long a raised timeout that is still due waits before it is
    /// raised again.
    #[serde(rename = "timeout_redelivery_interval_ms", with = "duration_ms")]
    pub timeout_redelivery_interval: Duration,
}

impl Default for SagaStoreSettings {
    fn default() -> Self {
        Self {
            cache_sliding_expiration: Duration::from_secs(600),
            timeout_poll_interval: Duration::from_secs(1),
            timeout_redelivery_interval: Duration::from_secs(60),
        }
    }
}

/// Command/event processor behaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessorSettings {
    /// Maximum queued envelopes before producers block.
    pub bounded_capacity: usize,
    /// Worker pool size.
    pub maximum_concurrency_level: usize,
    /// Wall-clock budget for retrying transient storage faults.
    #[serde(rename = "retry_timeout_ms", with = "duration_ms")]
    pub retry_timeout: Duration,
    /// Wall-clock budget for the optimistic-concurrency retry loop.
    #[serde(rename = "save_retry_timeout_ms", with = "duration_ms")]
    pub save_retry_timeout: Duration,
    /// Pause between attempts after a transient storage fault.
    #[serde(rename = "transient_retry_delay_ms", with = "duration_ms")]
    pub transient_retry_delay: Duration,
    /// Time allowed for draining queued envelopes on shutdown.
    #[serde(rename = "shutdown_timeout_ms", with = "duration_ms")]
    pub shutdown_timeout: Duration,
}

impl Default for ProcessorSettings {
    fn default() -> Self {
        Self {
            bounded_capacity: 10_000,
            maximum_concurrency_level: 8,
            retry_timeout: Duration::from_secs(10),
            save_retry_timeout: Duration::from_secs(10),
            transient_retry_delay: Duration::from_millis(10),
            shutdown_timeout: Duration::from_secs(30),
        }
    }
}

/// All engine settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Event store settings.
    pub event_store: EventStoreSettings,
    /// Aggregate store settings.
    pub aggregate_store: AggregateStoreSettings,
    /// Saga store settings.
    pub saga_store: SagaStoreSettings,
    /// Command processor settings.
    pub command_processor: ProcessorSettings,
    /// Event processor settings.
    pub event_processor: ProcessorSettings,
}

impl EngineConfig {
    /// Parses and validates a YAML document.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Configuration` on malformed YAML or invalid
    /// values.
    pub fn from_yaml_str(yaml: &str) -> Result<Self, DomainError> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| DomainError::Configuration(format!("invalid YAML: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    /// Builds a configuration from `CHRONICLE_*` environment variables,
    /// falling back to defaults for unset variables. Processor variables
    /// apply to both processors.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Configuration` if a variable does not parse or a
    /// value is invalid.
    pub fn from_env() -> Result<Self, DomainError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds a configuration from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// See [`EngineConfig::from_env`].
    pub fn from_lookup<F>(lookup: F) -> Result<Self, DomainError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = EnvVars { lookup };
        let mut config = Self::default();

        let store = &mut config.event_store;
        vars.set("ASYNC", &mut store.async_writes)?;
        vars.set_ms("FLUSH_INTERVAL_MS", &mut store.flush_interval)?;
        vars.set("BATCH_SIZE", &mut store.batch_size)?;
        vars.set("DETECT_DUPLICATE_COMMITS", &mut store.detect_duplicate_commits)?;
        vars.set("MARK_DISPATCHED", &mut store.mark_dispatched)?;
        vars.set("PAGE_SIZE", &mut store.page_size)?;

        let aggregates = &mut config.aggregate_store;
        vars.set("SNAPSHOT_INTERVAL", &mut aggregates.snapshot_interval)?;
        vars.set_ms(
            "CACHE_SLIDING_EXPIRATION_MS",
            &mut aggregates.cache_sliding_expiration,
        )?;
        config.saga_store.cache_sliding_expiration = aggregates.cache_sliding_expiration;
        vars.set_ms(
            "TIMEOUT_POLL_INTERVAL_MS",
            &mut config.saga_store.timeout_poll_interval,
        )?;
        vars.set_ms(
            "TIMEOUT_REDELIVERY_INTERVAL_MS",
            &mut config.saga_store.timeout_redelivery_interval,
        )?;

        let processor = &mut config.command_processor;
        vars.set("BOUNDED_CAPACITY", &mut processor.bounded_capacity)?;
        vars.set(
            "MAXIMUM_CONCURRENCY_LEVEL",
            &mut processor.maximum_concurrency_level,
        )?;
        vars.set_ms("RETRY_TIMEOUT_MS", &mut processor.retry_timeout)?;
        vars.set_ms("SAVE_RETRY_TIMEOUT_MS", &mut processor.save_retry_timeout)?;
        vars.set_ms(
            "TRANSIENT_RETRY_DELAY_MS",
            &mut processor.transient_retry_delay,
        )?;
        vars.set_ms("SHUTDOWN_TIMEOUT_MS", &mut processor.shutdown_timeout)?;
        config.event_processor = config.command_processor.clone();

        config.validate()?;
        Ok(config)
    }

    /// Checks value ranges.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Configuration` naming the first invalid value.
    pub fn validate(&self) -> Result<(), DomainError> {
        let positive = [
            ("event_store.batch_size", self.event_store.batch_size),
            ("event_store.page_size", self.event_store.page_size),
            (
                "command_processor.bounded_capacity",
                self.command_processor.bounded_capacity,
            ),
            (
                "command_processor.maximum_concurrency_level",
                self.command_processor.maximum_concurrency_level,
            ),
            (
                "event_processor.bounded_capacity",
                self.event_processor.bounded_capacity,
            ),
            (
                "event_processor.maximum_concurrency_level",
                self.event_processor.maximum_concurrency_level,
            ),
        ];
        if let Some((name, _)) = positive.iter().find(|(_, value)| *value == 0) {
            return Err(DomainError::Configuration(format!(
                "{name} must be greater than zero"
            )));
        }
        if self.aggregate_store.snapshot_interval < 0 {
            return Err(DomainError::Configuration(
                "aggregate_store.snapshot_interval must not be negative".to_owned(),
            ));
        }
        Ok(())
    }
}

struct EnvVars<F> {
    lookup: F,
}

impl<F> EnvVars<F>
where
    F: Fn(&str) -> Option<String>,
{
    fn set<T>(&self, key: &str, target: &mut T) -> Result<(), DomainError>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let name = format!("{ENV_PREFIX}{key}");
        if let Some(raw) = (self.lookup)(&name) {
            *target = raw
                .trim()
                .parse()
                .map_err(|e| DomainError::Configuration(format!("{name}: {e}")))?;
        }
        Ok(())
    }

    fn set_ms(&self, key: &str, target: &mut Duration) -> Result<(), DomainError> {
        let mut millis = u64::try_from(target.as_millis()).unwrap_or(u64::MAX);
        self.set(key, &mut millis)?;
        *target = Duration::from_millis(millis);
        Ok(())
    }
}

mod duration_ms {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(u64::try_from(value.as_millis()).unwrap_or(u64::MAX))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_millis)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    #[test]
    fn test_yaml_overrides_selected_values_and_keeps_defaults() {
        // Arrange
        let yaml = r"
event_store:
  async: true
  flush_interval_ms: 250
  page_size: 50
aggregate_store:
  snapshot_interval: 10
command_processor:
  bounded_capacity: 4
  save_retry_timeout_ms: 1500
";

        // Act
        let config = EngineConfig::from_yaml_str(yaml).unwrap();

        // Assert
        assert!(config.event_store.async_writes);
        assert_eq!(config.event_store.flush_interval, Duration::from_millis(250));
        assert_eq!(config.event_store.page_size, 50);
        assert!(config.event_store.detect_duplicate_commits);
        assert_eq!(config.aggregate_store.snapshot_interval, 10);
        assert_eq!(config.command_processor.bounded_capacity, 4);
        assert_eq!(
            config.command_processor.save_retry_timeout,
            Duration::from_millis(1500)
        );
        assert_eq!(config.event_processor, ProcessorSettings::default());
    }

    #[test]
    fn test_yaml_rejects_zero_capacity() {
        let yaml = "event_processor:\n  bounded_capacity: 0\n";

        let result = EngineConfig::from_yaml_str(yaml);

        match result {
            Err(DomainError::Configuration(msg)) => {
                assert!(msg.contains("event_processor.bounded_capacity"));
            }
            other => panic!("expected Configuration, got {other:?}"),
        }
    }

    #[test]
    fn test_lookup_reads_prefixed_variables() {
        // Arrange
        let vars: HashMap<&str, &str> = HashMap::from([
            ("CHRONICLE_SNAPSHOT_INTERVAL", "25"),
            ("CHRONICLE_MAXIMUM_CONCURRENCY_LEVEL", "3"),
            ("CHRONICLE_CACHE_SLIDING_EXPIRATION_MS", "2000"),
            ("CHRONICLE_DETECT_DUPLICATE_COMMITS", "false"),
        ]);

        // Act
        let config =
            EngineConfig::from_lookup(|name| vars.get(name).map(|v| (*v).to_owned())).unwrap();

        // Assert
        assert_eq!(config.aggregate_store.snapshot_interval, 25);
        assert_eq!(config.command_processor.maximum_concurrency_level, 3);
        assert_eq!(config.event_processor.maximum_concurrency_level, 3);
        assert_eq!(
            config.saga_store.cache_sliding_expiration,
            Duration::from_secs(2)
        );
        assert!(!config.event_store.detect_duplicate_commits);
    }

    #[test]
    fn test_lookup_reports_unparseable_variable() {
        let result = EngineConfig::from_lookup(|name| {
            (name == "CHRONICLE_PAGE_SIZE").then(|| "many".to_owned())
        });

        match result {
            Err(DomainError::Configuration(msg)) => {
                assert!(msg.contains("CHRONICLE_PAGE_SIZE"));
            }
            other => panic!("expected Configuration, got {other:?}"),
        }
    }
}
