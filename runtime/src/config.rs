//! Configuration for a Courier process.
//!
//! Provides file-based configuration with environment overrides and validation.
//!
//! # Sources
//!
//! 1. A TOML file, named explicitly ([`CourierConfig::load`]) or through the
//!    `COURIER_CONFIG` environment variable ([`CourierConfig::from_env`])
//! 2. Built-in defaults for every missing key
//! 3. Environment overrides: `COURIER_BROKERS`, `COURIER_TOPIC`,
//!    `COURIER_HTTP_ADDR`, `COURIER_OPTIMIZATION_URL`, `JAEGER_ENDPOINT`,
//!    `COURIER_LOG_LEVEL`
//!
//! # Example
//!
//! ```toml
//! [broker]
//! brokers = "redpanda:9092"
//! topic = "logistics-events"
//!
//! [[subscriptions]]
//! name = "orders-submitted"
//! processor = "orderSubmitted"
//! max_outstanding = 10
//! mode = "pull"
//!
//! [[subscriptions]]
//! name = "optimization-requests"
//! processor = "optimizationRequested"
//! mode = "push"
//!
//! [dispatcher]
//! restart_delay_secs = 10
//! ```

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Environment variable naming the configuration file.
pub const CONFIG_PATH_VAR: &str = "COURIER_CONFIG";

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read
    #[error("Failed to read configuration file '{path}': {source}")]
    Read {
        /// Path that was read
        path: String,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML of the expected shape
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),

    /// An environment override holds an invalid value
    #[error("Invalid value for {var}: {value}")]
    InvalidEnv {
        /// Variable name
        var: String,
        /// Offending value
        value: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {0}")]
    Validation(String),
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Comma-separated bootstrap servers
    pub brokers: String,
    /// Topic outbox records are published to
    pub topic: String,
    /// Producer acknowledgement level (`0`, `1` or `all`)
    pub producer_acks: String,
    /// Producer compression (`none`, `gzip`, `snappy`, `lz4`, `zstd`)
    pub compression: String,
    /// Publish confirmation timeout in seconds
    pub timeout_secs: u64,
    /// Where a new consumer group starts (`earliest` or `latest`)
    pub auto_offset_reset: String,
}

impl BrokerConfig {
    /// Publish confirmation timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            brokers: "localhost:9092".to_string(),
            topic: "logistics-events".to_string(),
            producer_acks: "all".to_string(),
            compression: "none".to_string(),
            timeout_secs: 5,
            auto_offset_reset: "earliest".to_string(),
        }
    }
}

/// How a subscription is served.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DeliveryMode {
    /// A background streaming receive
    #[default]
    Pull,
    /// The HTTP push route only
    Push,
}

impl fmt::Display for DeliveryMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pull => write!(f, "pull"),
            Self::Push => write!(f, "push"),
        }
    }
}

/// One subscription binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscriptionConfig {
    /// Subscription name (also the push route segment)
    pub name: String,
    /// Processor the subscription is bound to
    pub processor: String,
    /// Topic the subscription reads; the broker topic when unset
    #[serde(default)]
    pub topic: Option<String>,
    /// Outstanding-message ceiling
    #[serde(default = "default_max_outstanding")]
    pub max_outstanding: usize,
    /// Pull or push delivery
    #[serde(default)]
    pub mode: DeliveryMode,
}

const fn default_max_outstanding() -> usize {
    10
}

/// HTTP server settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Listen address
    pub bind: String,
    /// Header whose presence marks a native broker push
    pub push_marker_header: String,
}

impl HttpConfig {
    /// Parse the listen address.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] if `bind` is not a socket address.
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.bind
            .parse()
            .map_err(|e| ConfigError::Validation(format!("invalid http.bind '{}': {e}", self.bind)))
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0:8080".to_string(),
            push_marker_header: "x-push-channel-id".to_string(),
        }
    }
}

/// Pull dispatcher settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatcherConfig {
    /// Delay before restarting a failed stream, in seconds
    pub restart_delay_secs: u64,
    /// How long shutdown waits for dispatchers, in seconds
    pub shutdown_timeout_secs: u64,
}

impl DispatcherConfig {
    /// Restart delay as a [`Duration`].
    #[must_use]
    pub const fn restart_delay(&self) -> Duration {
        Duration::from_secs(self.restart_delay_secs)
    }

    /// Shutdown timeout as a [`Duration`].
    #[must_use]
    pub const fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            restart_delay_secs: 10,
            shutdown_timeout_secs: 30,
        }
    }
}

/// Downstream optimization consumer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct OptimizationConfig {
    /// Endpoint optimization requests are forwarded to
    pub endpoint: Option<String>,
    /// Request timeout in seconds (0 means the client default)
    pub timeout_secs: u64,
}

/// Logging and tracing settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Service name reported to the trace backend
    pub service_name: String,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Jaeger agent endpoint (e.g., "localhost:6831"); no export when unset
    pub jaeger_endpoint: Option<String>,
}

impl ObservabilityConfig {
    /// Validate observability configuration
    ///
    /// # Errors
    ///
    /// Returns error if the log level is unknown
    pub fn validate(&self) -> Result<(), ConfigError> {
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.log_level.to_lowercase().as_str()) {
            return Err(ConfigError::Validation(format!(
                "invalid log_level: {}. Must be one of: {}",
                self.log_level,
                valid_levels.join(", ")
            )));
        }
        Ok(())
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            service_name: "courier".to_string(),
            log_level: "info".to_string(),
            jaeger_endpoint: None,
        }
    }
}

/// Complete process configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CourierConfig {
    /// Broker connection
    pub broker: BrokerConfig,
    /// Subscription bindings
    pub subscriptions: Vec<SubscriptionConfig>,
    /// HTTP server
    pub http: HttpConfig,
    /// Pull dispatchers
    pub dispatcher: DispatcherConfig,
    /// Optimization forwarding
    pub optimization: OptimizationConfig,
    /// Logging and tracing
    pub observability: ObservabilityConfig,
}

impl CourierConfig {
    /// Parse configuration from TOML text (no overrides, no validation).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] if the text is not valid.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Load a TOML file, apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be read or parsed, an override is
    /// invalid, or validation fails.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let mut config = Self::from_toml(&text)?;
        config.apply_overrides(|var| std::env::var(var).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Load from the file named by `COURIER_CONFIG`, or from defaults when it
    /// is unset, then apply environment overrides and validate.
    ///
    /// # Errors
    ///
    /// Returns error if loading, an override, or validation fails.
    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var(CONFIG_PATH_VAR) {
            Ok(path) => Self::load(path),
            Err(_) => {
                let mut config = Self::default();
                config.apply_overrides(|var| std::env::var(var).ok())?;
                config.validate()?;
                Ok(config)
            }
        }
    }

    /// Apply overrides read through `lookup` (normally the process environment).
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidEnv`] if an override is empty.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |var: &str| -> Result<Option<String>, ConfigError> {
            match lookup(var) {
                Some(value) if value.trim().is_empty() => Err(ConfigError::InvalidEnv {
                    var: var.to_string(),
                    value,
                }),
                other => Ok(other),
            }
        };

        if let Some(brokers) = non_empty("COURIER_BROKERS")? {
            self.broker.brokers = brokers;
        }
        if let Some(topic) = non_empty("COURIER_TOPIC")? {
            self.broker.topic = topic;
        }
        if let Some(bind) = non_empty("COURIER_HTTP_ADDR")? {
            self.http.bind = bind;
        }
        if let Some(endpoint) = non_empty("COURIER_OPTIMIZATION_URL")? {
            self.optimization.endpoint = Some(endpoint);
        }
        if let Some(endpoint) = non_empty("JAEGER_ENDPOINT")? {
            self.observability.jaeger_endpoint = Some(endpoint);
        }
        if let Some(level) = non_empty("COURIER_LOG_LEVEL")? {
            self.observability.log_level = level;
        }
        Ok(())
    }

    /// Validate the complete configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Validation`] describing the first problem found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.broker.brokers.trim().is_empty() {
            return Err(ConfigError::Validation("broker.brokers cannot be empty".to_string()));
        }
        if self.broker.topic.trim().is_empty() {
            return Err(ConfigError::Validation("broker.topic cannot be empty".to_string()));
        }
        if self.broker.timeout_secs == 0 {
            return Err(ConfigError::Validation("broker.timeout_secs must be > 0".to_string()));
        }
        if !["earliest", "latest"].contains(&self.broker.auto_offset_reset.as_str()) {
            return Err(ConfigError::Validation(format!(
                "broker.auto_offset_reset must be 'earliest' or 'latest', got '{}'",
                self.broker.auto_offset_reset
            )));
        }

        let mut names = HashSet::new();
        for subscription in &self.subscriptions {
            if subscription.name.is_empty() {
                return Err(ConfigError::Validation("subscription name cannot be empty".to_string()));
            }
            if !names.insert(subscription.name.as_str()) {
                return Err(ConfigError::Validation(format!(
                    "subscription '{}' is declared twice",
                    subscription.name
                )));
            }
            if subscription.max_outstanding == 0 {
                return Err(ConfigError::Validation(format!(
                    "subscription '{}': max_outstanding must be > 0",
                    subscription.name
                )));
            }
        }

        if self.http.push_marker_header.trim().is_empty() {
            return Err(ConfigError::Validation(
                "http.push_marker_header cannot be empty".to_string(),
            ));
        }
        self.http.socket_addr()?;
        self.observability.validate()
    }

    /// Topic a subscription reads: its own, or the broker topic.
    #[must_use]
    pub fn topic_for<'a>(&'a self, subscription: &'a SubscriptionConfig) -> &'a str {
        subscription.topic.as_deref().unwrap_or(&self.broker.topic)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)] // Test code can use unwrap
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
        [broker]
        brokers = "redpanda:9092"

        [[subscriptions]]
        name = "orders-submitted"
        processor = "orderSubmitted"
        max_outstanding = 25

        [[subscriptions]]
        name = "optimization-requests"
        processor = "optimizationRequested"
        topic = "optimization-events"
        mode = "push"

        [observability]
        log_level = "debug"
    "#;

    #[test]
    fn defaults_are_valid() {
        let config = CourierConfig::default();
        config.validate().unwrap();
        assert_eq!(config.dispatcher.restart_delay(), Duration::from_secs(10));
        assert_eq!(config.http.push_marker_header, "x-push-channel-id");
        assert_eq!(config.broker.auto_offset_reset, "earliest");
    }

    #[test]
    fn parses_toml_with_defaults_for_missing_keys() {
        let config = CourierConfig::from_toml(SAMPLE).unwrap();
        config.validate().unwrap();

        assert_eq!(config.broker.brokers, "redpanda:9092");
        assert_eq!(config.broker.topic, "logistics-events");
        assert_eq!(config.subscriptions.len(), 2);

        let orders = &config.subscriptions[0];
        assert_eq!(orders.max_outstanding, 25);
        assert_eq!(orders.mode, DeliveryMode::Pull);
        assert_eq!(config.topic_for(orders), "logistics-events");

        let optimization = &config.subscriptions[1];
        assert_eq!(optimization.max_outstanding, 10);
        assert_eq!(optimization.mode, DeliveryMode::Push);
        assert_eq!(config.topic_for(optimization), "optimization-events");

        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn environment_overrides_win() {
        let env = HashMap::from([
            ("COURIER_BROKERS", "kafka-1:9092,kafka-2:9092"),
            ("COURIER_HTTP_ADDR", "127.0.0.1:9000"),
            ("JAEGER_ENDPOINT", "jaeger:6831"),
        ]);
        let mut config = CourierConfig::from_toml(SAMPLE).unwrap();
        config
            .apply_overrides(|var| env.get(var).map(ToString::to_string))
            .unwrap();

        assert_eq!(config.broker.brokers, "kafka-1:9092,kafka-2:9092");
        assert_eq!(config.http.socket_addr().unwrap().port(), 9000);
        assert_eq!(
            config.observability.jaeger_endpoint.as_deref(),
            Some("jaeger:6831")
        );
        assert_eq!(config.observability.log_level, "debug");
    }

    #[test]
    fn empty_override_is_rejected() {
        let mut config = CourierConfig::default();
        let err = config
            .apply_overrides(|var| (var == "COURIER_TOPIC").then(String::new))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { ref var, .. } if var == "COURIER_TOPIC"));
    }

    #[test]
    fn validation_catches_bad_subscriptions() {
        let mut config = CourierConfig::from_toml(SAMPLE).unwrap();
        config.subscriptions[1].name = "orders-submitted".to_string();
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));

        let mut config = CourierConfig::from_toml(SAMPLE).unwrap();
        config.subscriptions[0].max_outstanding = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Validation(_))));
    }

    #[test]
    fn validation_catches_bad_ambient_settings() {
        let mut config = CourierConfig::default();
        config.observability.log_level = "loud".to_string();
        assert!(config.validate().is_err());

        let mut config = CourierConfig::default();
        config.http.bind = "not an address".to_string();
        assert!(config.validate().is_err());

        assert!(matches!(
            CourierConfig::from_toml("[broker]\ntimeout_secs = \"soon\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn load_reports_missing_file() {
        let err = CourierConfig::load("/nonexistent/courier.toml").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
