//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Check the upstream target is a usable http(s) URL
//! - Validate value ranges (rates finite, status codes real, latency bounds ordered)
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ProxyConfig → Result<(), Vec<ValidationError>>
//! - Runs before config is accepted into the system

use std::net::SocketAddr;

use thiserror::Error;
use url::Url;

use crate::config::schema::ProxyConfig;

/// A single semantic problem found in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("upstream URL is required (set in config file or --upstream flag)")]
    MissingUpstream,

    #[error("invalid upstream URL {url:?}: {reason}")]
    InvalidUpstream { url: String, reason: String },

    #[error("invalid bind address {0:?}")]
    InvalidBindAddress(String),

    #[error("{field} must be a finite number")]
    NonFiniteRate { field: &'static str },

    #[error("error_code {0} is not a valid HTTP status")]
    InvalidErrorCode(u16),

    #[error("latency_max_ms ({max}) must be >= latency_min_ms ({min})")]
    InvertedLatencyRange { min: u64, max: u64 },
}

/// Validate a parsed configuration.
pub fn validate_config(config: &ProxyConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    validate_upstream(&config.upstream.url, &mut errors);

    if config.listener.bind_address.parse::<SocketAddr>().is_err() {
        errors.push(ValidationError::InvalidBindAddress(
            config.listener.bind_address.clone(),
        ));
    }

    let chaos = &config.chaos;
    for (field, rate) in [
        ("drop_rate", chaos.drop_rate),
        ("error_rate", chaos.error_rate),
        ("corrupt_rate", chaos.corrupt_rate),
    ] {
        if !rate.is_finite() {
            errors.push(ValidationError::NonFiniteRate { field });
        }
    }

    if chaos.error_code != 0 && !(100..=599).contains(&chaos.error_code) {
        errors.push(ValidationError::InvalidErrorCode(chaos.error_code));
    }

    if chaos.latency_max_ms < chaos.latency_min_ms {
        errors.push(ValidationError::InvertedLatencyRange {
            min: chaos.latency_min_ms,
            max: chaos.latency_max_ms,
        });
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

fn validate_upstream(raw: &str, errors: &mut Vec<ValidationError>) {
    if raw.trim().is_empty() {
        errors.push(ValidationError::MissingUpstream);
        return;
    }

    let invalid = |reason: &str| ValidationError::InvalidUpstream {
        url: raw.to_string(),
        reason: reason.to_string(),
    };

    match Url::parse(raw) {
        Ok(url) if !matches!(url.scheme(), "http" | "https") => {
            errors.push(invalid("only http and https upstreams are supported"));
        }
        Ok(url) if url.host_str().is_none() => errors.push(invalid("missing host")),
        Ok(_) => {}
        Err(e) => errors.push(invalid(&e.to_string())),
    }
}
