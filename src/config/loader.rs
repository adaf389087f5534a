//! Configuration loading from disk.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::config::schema::ProxyConfig;
use crate::config::validation::{validate_config, ValidationError};

/// Error type for configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation failed: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Anything that can produce a fresh configuration snapshot.
///
/// Called once at startup and once per reload attempt.
pub trait ConfigSource: Send + Sync {
    fn load(&self) -> Result<ProxyConfig, ConfigError>;
}

impl<F> ConfigSource for F
where
    F: Fn() -> Result<ProxyConfig, ConfigError> + Send + Sync,
{
    fn load(&self) -> Result<ProxyConfig, ConfigError> {
        self()
    }
}

/// Values from the command line that win over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub listen: Option<String>,
    pub upstream: Option<String>,
}

impl Overrides {
    fn apply(&self, config: &mut ProxyConfig) {
        if let Some(listen) = self.listen.as_deref().filter(|s| !s.is_empty()) {
            config.listener.bind_address = listen.to_string();
        }
        if let Some(upstream) = self.upstream.as_deref().filter(|s| !s.is_empty()) {
            config.upstream.url = upstream.to_string();
        }
    }
}

/// Config file on disk plus command-line overrides.
#[derive(Debug, Clone)]
pub struct FileConfigSource {
    path: PathBuf,
    overrides: Overrides,
}

impl FileConfigSource {
    pub fn new(path: impl Into<PathBuf>, overrides: Overrides) -> Self {
        Self {
            path: path.into(),
            overrides,
        }
    }
}

impl ConfigSource for FileConfigSource {
    fn load(&self) -> Result<ProxyConfig, ConfigError> {
        let mut config = read_config(&self.path)?;
        self.overrides.apply(&mut config);
        validate_config(&config).map_err(ConfigError::Validation)?;
        Ok(config)
    }
}

/// Load and validate configuration from a TOML file.
pub fn load_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    let config = read_config(path)?;
    validate_config(&config).map_err(ConfigError::Validation)?;
    Ok(config)
}

/// Parse the file without validating. A missing file yields defaults.
fn read_config(path: &Path) -> Result<ProxyConfig, ConfigError> {
    match fs::read_to_string(path) {
        Ok(content) => Ok(toml::from_str(&content)?),
        Err(e) if e.kind() == ErrorKind::NotFound => {
            tracing::info!(path = %path.display(), "No config file found, using defaults");
            Ok(ProxyConfig::default())
        }
        Err(e) => Err(e.into()),
    }
}
