//! Service configuration loaded from environment variables.

use std::str::FromStr;
use std::time::Duration;

use bus::Topics;
use saga::DispatcherConfig;
use thiserror::Error;

/// Errors raised while reading configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?} ({reason})")]
    Invalid {
        key: &'static str,
        value: String,
        reason: String,
    },
}

/// Output format of the log subscriber.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(format!("expected pretty or json, got {other}")),
        }
    }
}

/// Service configuration with sensible defaults.
///
/// Reads from environment variables:
/// - `HOST`, `PORT`: HTTP bind address (default `0.0.0.0:3000`)
/// - `RUST_LOG`: tracing filter directive (default `info`)
/// - `LOG_FORMAT`: `pretty` or `json` (default `pretty`)
/// - `DATABASE_URL`: PostgreSQL saga store; unset selects the in-memory store
/// - `DATABASE_MAX_CONNECTIONS`: pool size (default `5`)
/// - `KAFKA_BROKERS`: Kafka bus; unset selects the in-memory bus
/// - `SAGA_CONSUMER_GROUP`: orchestrator consumer group (default `saga-orchestrator`)
/// - `SAGA_TOPIC_*`: topic names, see [`Topics`]
/// - `SAGA_POLL_TIMEOUT_MS`, `SAGA_PROCESSING_DEADLINE_SECS`,
///   `SAGA_ERROR_BACKOFF_MS`, `SAGA_MAX_IN_FLIGHT`: dispatch loop tuning
/// - `SAGA_SIMULATE_PARTICIPANTS`: run in-process inventory and order services
#[derive(Debug, Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub log_level: String,
    pub log_format: LogFormat,
    pub database_url: Option<String>,
    pub database_max_connections: u32,
    pub kafka_brokers: Option<String>,
    pub consumer_group: String,
    pub topics: Topics,
    pub dispatcher: DispatcherConfig,
    pub simulate_participants: bool,
}

impl Config {
    /// Loads configuration from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Loads configuration through `lookup`, falling back to defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let string = |key: &str, default: String| lookup(key).unwrap_or(default);
        let optional = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let topic_defaults = defaults.topics;
        let topics = Topics {
            order_created: string("SAGA_TOPIC_ORDER_CREATED", topic_defaults.order_created),
            inventory_commands: string(
                "SAGA_TOPIC_INVENTORY_COMMANDS",
                topic_defaults.inventory_commands,
            ),
            inventory_replies: string(
                "SAGA_TOPIC_INVENTORY_REPLIES",
                topic_defaults.inventory_replies,
            ),
            saga_replies: string("SAGA_TOPIC_SAGA_REPLIES", topic_defaults.saga_replies),
            notifications: string("SAGA_TOPIC_NOTIFICATIONS", topic_defaults.notifications),
        };

        let dispatcher_defaults = defaults.dispatcher;
        let dispatcher = DispatcherConfig {
            poll_timeout: Duration::from_millis(parse(
                &lookup,
                "SAGA_POLL_TIMEOUT_MS",
                millis(dispatcher_defaults.poll_timeout),
            )?),
            processing_deadline: Duration::from_secs(parse(
                &lookup,
                "SAGA_PROCESSING_DEADLINE_SECS",
                dispatcher_defaults.processing_deadline.as_secs(),
            )?),
            error_backoff: Duration::from_millis(parse(
                &lookup,
                "SAGA_ERROR_BACKOFF_MS",
                millis(dispatcher_defaults.error_backoff),
            )?),
            max_in_flight: parse(&lookup, "SAGA_MAX_IN_FLIGHT", dispatcher_defaults.max_in_flight)?,
        };
        if dispatcher.max_in_flight == 0 {
            return Err(ConfigError::Invalid {
                key: "SAGA_MAX_IN_FLIGHT",
                value: "0".to_string(),
                reason: "must be at least 1".to_string(),
            });
        }
        if dispatcher.processing_deadline.is_zero() {
            return Err(ConfigError::Invalid {
                key: "SAGA_PROCESSING_DEADLINE_SECS",
                value: "0".to_string(),
                reason: "must be at least 1 second".to_string(),
            });
        }

        Ok(Self {
            host: string("HOST", defaults.host),
            port: parse(&lookup, "PORT", defaults.port)?,
            log_level: string("RUST_LOG", defaults.log_level),
            log_format: parse(&lookup, "LOG_FORMAT", defaults.log_format)?,
            database_url: optional("DATABASE_URL"),
            database_max_connections: parse(
                &lookup,
                "DATABASE_MAX_CONNECTIONS",
                defaults.database_max_connections,
            )?,
            kafka_brokers: optional("KAFKA_BROKERS"),
            consumer_group: string("SAGA_CONSUMER_GROUP", defaults.consumer_group),
            topics,
            dispatcher,
            simulate_participants: parse(
                &lookup,
                "SAGA_SIMULATE_PARTICIPANTS",
                defaults.simulate_participants,
            )?,
        })
    }

    /// Returns the `"host:port"` bind address string.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            database_url: None,
            database_max_connections: 5,
            kafka_brokers: None,
            consumer_group: "saga-orchestrator".to_string(),
            topics: Topics::default(),
            dispatcher: DispatcherConfig::default(),
            simulate_participants: false,
        }
    }
}

fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

fn parse<T>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    let Some(value) = lookup(key) else {
        return Ok(default);
    };
    let parsed = value.trim().parse::<T>();
    parsed.map_err(|e| ConfigError::Invalid {
        key,
        reason: e.to_string(),
        value,
    })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_default_values() {
        let config = Config::from_lookup(lookup_from(&[])).unwrap();
        assert_eq!(config.addr(), "0.0.0.0:3000");
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert_eq!(config.database_url, None);
        assert_eq!(config.database_max_connections, 5);
        assert_eq!(config.kafka_brokers, None);
        assert_eq!(config.consumer_group, "saga-orchestrator");
        assert_eq!(config.topics, Topics::default());
        assert_eq!(config.dispatcher.poll_timeout, Duration::from_secs(1));
        assert_eq!(config.dispatcher.processing_deadline, Duration::from_secs(30));
        assert_eq!(config.dispatcher.max_in_flight, 64);
        assert!(!config.simulate_participants);
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup_from(&[
            ("HOST", "127.0.0.1"),
            ("PORT", "8080"),
            ("LOG_FORMAT", "JSON"),
            ("DATABASE_URL", "postgres://localhost/sagas"),
            ("KAFKA_BROKERS", "localhost:9092"),
            ("SAGA_TOPIC_SAGA_REPLIES", "orders.saga"),
            ("SAGA_POLL_TIMEOUT_MS", "250"),
            ("SAGA_PROCESSING_DEADLINE_SECS", "5"),
            ("SAGA_MAX_IN_FLIGHT", "8"),
            ("SAGA_SIMULATE_PARTICIPANTS", "true"),
        ]))
        .unwrap();

        assert_eq!(config.addr(), "127.0.0.1:8080");
        assert_eq!(config.log_format, LogFormat::Json);
        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/sagas"));
        assert_eq!(config.kafka_brokers.as_deref(), Some("localhost:9092"));
        assert_eq!(config.topics.saga_replies, "orders.saga");
        assert_eq!(config.topics.order_created, "order-created");
        assert_eq!(config.dispatcher.poll_timeout, Duration::from_millis(250));
        assert_eq!(config.dispatcher.processing_deadline, Duration::from_secs(5));
        assert_eq!(config.dispatcher.max_in_flight, 8);
        assert!(config.simulate_participants);
    }

    #[test]
    fn test_blank_database_url_selects_memory() {
        let config = Config::from_lookup(lookup_from(&[("DATABASE_URL", "  ")])).unwrap();
        assert_eq!(config.database_url, None);
    }

    #[test]
    fn test_invalid_number_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "PORT", .. }));
    }

    #[test]
    fn test_invalid_bool_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("SAGA_SIMULATE_PARTICIPANTS", "maybe")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "SAGA_SIMULATE_PARTICIPANTS",
                ..
            }
        ));
    }

    #[test]
    fn test_zero_in_flight_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("SAGA_MAX_IN_FLIGHT", "0")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "SAGA_MAX_IN_FLIGHT", .. }));
    }

    #[test]
    fn test_zero_processing_deadline_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("SAGA_PROCESSING_DEADLINE_SECS", "0")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                key: "SAGA_PROCESSING_DEADLINE_SECS",
                ..
            }
        ));
    }

    #[test]
    fn test_unknown_log_format_is_rejected() {
        let err = Config::from_lookup(lookup_from(&[("LOG_FORMAT", "xml")])).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: "LOG_FORMAT", .. }));
    }
}
