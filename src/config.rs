//! Hub configuration
//!
//! Pre-configured settings for development, production, and testing, with
//! builder-pattern support and validation.

use crate::domain_types::{
    HeartbeatIntervalMs, MaxConnections, QueueSoftCap, RetentionMaxAgeMs,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A field failed validation
    #[error("invalid configuration: {field} - {reason}")]
    Validation {
        /// The offending field
        field: String,
        /// Why it is invalid
        reason: String,
    },
}

/// Complete hub configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// TCP port the hub binds; 0 lets the OS choose
    pub port: u16,
    /// Registration cap
    pub max_connections: MaxConnections,
    /// Heartbeat monitor period; eviction fires at twice this
    pub heartbeat_interval: HeartbeatIntervalMs,
    /// Global upper bound on topic retention age
    pub message_retention: RetentionMaxAgeMs,
    /// When false, topic history is never written
    pub enable_persistence: bool,
    /// Enables the `/stats` counters
    pub enable_metrics: bool,
    /// Soft cap applied to each agent's pending queue
    pub queue_soft_cap: QueueSoftCap,
    /// Period of the receipt/retention cleanup task in milliseconds
    pub cleanup_interval_ms: u64,
    /// Receipts older than this many milliseconds are pruned
    pub receipt_ttl_ms: u64,
}

impl HubConfig {
    /// Development configuration: small caps, fast feedback
    ///
    /// # Panics
    /// Panics if any hardcoded value is out of range for its domain type.
    #[must_use]
    pub fn development() -> Self {
        Self {
            port: 8080,
            max_connections: MaxConnections::try_new(100).unwrap(),
            heartbeat_interval: HeartbeatIntervalMs::try_new(10_000).unwrap(),
            message_retention: RetentionMaxAgeMs::try_new(3_600_000).unwrap(),
            enable_persistence: true,
            enable_metrics: true,
            queue_soft_cap: QueueSoftCap::try_new(1_000).unwrap(),
            cleanup_interval_ms: 60_000,
            receipt_ttl_ms: 3_600_000,
        }
    }

    /// Production configuration: full caps, standard timers
    ///
    /// # Panics
    /// Panics if any hardcoded value is out of range for its domain type.
    #[must_use]
    pub fn production() -> Self {
        Self {
            port: 8080,
            max_connections: MaxConnections::try_new(10_000).unwrap(),
            heartbeat_interval: HeartbeatIntervalMs::try_new(30_000).unwrap(),
            message_retention: RetentionMaxAgeMs::try_new(86_400_000).unwrap(),
            enable_persistence: true,
            enable_metrics: true,
            queue_soft_cap: QueueSoftCap::try_new(10_000).unwrap(),
            cleanup_interval_ms: 300_000,
            receipt_ttl_ms: 3_600_000,
        }
    }

    /// Testing configuration: port 0, short timers
    ///
    /// # Panics
    /// Panics if any hardcoded value is out of range for its domain type.
    #[must_use]
    pub fn testing() -> Self {
        Self {
            port: 0,
            max_connections: MaxConnections::try_new(50).unwrap(),
            heartbeat_interval: HeartbeatIntervalMs::try_new(200).unwrap(),
            message_retention: RetentionMaxAgeMs::try_new(3_600_000).unwrap(),
            enable_persistence: true,
            enable_metrics: true,
            queue_soft_cap: QueueSoftCap::try_new(100).unwrap(),
            cleanup_interval_ms: 1_000,
            receipt_ttl_ms: 3_600_000,
        }
    }

    /// Creates a configuration builder seeded with production defaults
    #[must_use]
    pub fn builder() -> HubConfigBuilder {
        HubConfigBuilder::new()
    }

    /// Validates the configuration for consistency
    ///
    /// # Errors
    /// Returns [`ConfigError`] describing the first inconsistent field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cleanup_interval_ms == 0 {
            return Err(ConfigError::Validation {
                field: "cleanup_interval_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        if self.receipt_ttl_ms == 0 {
            return Err(ConfigError::Validation {
                field: "receipt_ttl_ms".to_string(),
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self::production()
    }
}

/// Builder for custom configurations
#[derive(Debug, Clone)]
pub struct HubConfigBuilder {
    config: HubConfig,
}

impl HubConfigBuilder {
    fn new() -> Self {
        Self {
            config: HubConfig::production(),
        }
    }

    /// Sets the bind port
    #[must_use]
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the registration cap
    #[must_use]
    pub fn max_connections(mut self, max_connections: MaxConnections) -> Self {
        self.config.max_connections = max_connections;
        self
    }

    /// Sets the heartbeat interval
    #[must_use]
    pub fn heartbeat_interval(mut self, interval: HeartbeatIntervalMs) -> Self {
        self.config.heartbeat_interval = interval;
        self
    }

    /// Sets the global retention upper bound
    #[must_use]
    pub fn message_retention(mut self, retention: RetentionMaxAgeMs) -> Self {
        self.config.message_retention = retention;
        self
    }

    /// Enables or disables history persistence
    #[must_use]
    pub fn enable_persistence(mut self, enabled: bool) -> Self {
        self.config.enable_persistence = enabled;
        self
    }

    /// Enables or disables the stats counters
    #[must_use]
    pub fn enable_metrics(mut self, enabled: bool) -> Self {
        self.config.enable_metrics = enabled;
        self
    }

    /// Sets the per-agent queue soft cap
    #[must_use]
    pub fn queue_soft_cap(mut self, cap: QueueSoftCap) -> Self {
        self.config.queue_soft_cap = cap;
        self
    }

    /// Sets the cleanup task period
    #[must_use]
    pub fn cleanup_interval_ms(mut self, interval_ms: u64) -> Self {
        self.config.cleanup_interval_ms = interval_ms;
        self
    }

    /// Sets how long delivery receipts are retained
    #[must_use]
    pub fn receipt_ttl_ms(mut self, ttl_ms: u64) -> Self {
        self.config.receipt_ttl_ms = ttl_ms;
        self
    }

    /// Finalizes and validates the configuration
    ///
    /// # Errors
    /// Returns [`ConfigError`] when the assembled configuration is invalid.
    pub fn build(self) -> Result<HubConfig, ConfigError> {
        self.config.validate()?;
        Ok(self.config)
    }
}
