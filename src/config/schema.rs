//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the proxy.
//! All types derive Serde traits for deserialization from config files.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::chaos::ChaosConfig;

/// Root configuration for the chaos proxy.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ProxyConfig {
    /// Listener configuration (bind address).
    pub listener: ListenerConfig,

    /// The single upstream every request is forwarded to.
    pub upstream: UpstreamConfig,

    /// Fault injection probabilities and parameters.
    pub chaos: ChaosSettings,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:8080").
    pub bind_address: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8080".to_string(),
        }
    }
}

/// Upstream target configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Upstream base URL (e.g., "http://localhost:3000/api").
    pub url: String,

    /// Deadline for a single upstream round trip in seconds.
    pub timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            timeout_secs: 30,
        }
    }
}

/// Fault injection settings as they appear in the config file.
///
/// Rates are percentages: values `<= 0` never apply, values `>= 100` always apply.
#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq)]
#[serde(default)]
pub struct ChaosSettings {
    pub drop_rate: f64,
    pub error_rate: f64,

    /// Status returned on injected errors; 0 means 500.
    pub error_code: u16,

    pub corrupt_rate: f64,

    /// Fixed latency in milliseconds. Takes precedence over the range.
    pub latency_ms: u64,

    pub latency_min_ms: u64,
    pub latency_max_ms: u64,

    /// Seed for a reproducible random source.
    pub seed: Option<u64>,
}

impl ChaosSettings {
    /// Convert to the engine's duration-typed configuration.
    pub fn to_chaos_config(&self) -> ChaosConfig {
        ChaosConfig {
            drop_rate: self.drop_rate,
            error_rate: self.error_rate,
            error_code: self.error_code,
            corrupt_rate: self.corrupt_rate,
            latency: Duration::from_millis(self.latency_ms),
            latency_min: Duration::from_millis(self.latency_min_ms),
            latency_max: Duration::from_millis(self.latency_max_ms),
        }
    }
}

/// Timeout configuration for lifecycle operations.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct TimeoutConfig {
    /// How long a draining server waits for in-flight requests, in seconds.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            shutdown_grace_secs: 5,
        }
    }
}

impl TimeoutConfig {
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Enable the Prometheus metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}
