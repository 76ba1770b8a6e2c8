use super::types::*;
use log::debug;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use crate::error_handling::types::ConfigError;
use crate::wait::{ForListeningPort, ForLog};

/// Provider configuration shared by the runtime driver and the container manager.
///
/// Loaded from a TOML file, optionally overlaid with environment variables.
/// Every field has a default, so an empty file is a valid configuration.
///
/// # Examples
///
/// ```
/// use testpod::configuration::{ProviderConfig, RuntimeKind};
///
/// let config = ProviderConfig::from_toml_str(
///     r#"
///     runtime = "podman"
///     startup_timeout_secs = 30
///     "#,
/// )
/// .unwrap();
/// assert_eq!(config.runtime, RuntimeKind::Podman);
/// assert_eq!(config.binary(), "podman");
/// ```
///
/// # Fields Overview
///
/// - `runtime`: which engine CLI to drive (`docker` or `podman`)
/// - `binary`: explicit path to the CLI, overriding the one implied by `runtime`
/// - `host`: host name under which mapped ports are reachable
/// - `startup_timeout_secs`: default deadline for readiness strategies
/// - `poll_interval_ms`: default interval between readiness probes
/// - `stop_timeout_secs`: grace period given to a container on stop
/// - `labels`: extra labels put on every created container
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub runtime: RuntimeKind,
    pub binary: Option<String>,
    pub host: Option<String>,
    pub startup_timeout_secs: u64,
    pub poll_interval_ms: u64,
    pub stop_timeout_secs: u64,
    pub labels: BTreeMap<String, String>,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeKind::Docker,
            binary: None,
            host: None,
            startup_timeout_secs: 60,
            poll_interval_ms: 100,
            stop_timeout_secs: 10,
            labels: BTreeMap::new(),
        }
    }
}

impl ProviderConfig {
    /// Reads and validates a TOML configuration file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        debug!("Loading provider configuration from {}", path.display());
        let raw = std::fs::read_to_string(path)?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let config: ProviderConfig =
            toml::from_str(raw).map_err(|e| ConfigError::TomlError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Overlays `TESTPOD_RUNTIME`, `TESTPOD_BINARY` and `TESTPOD_HOST`.
    pub fn apply_env(self) -> Result<Self, ConfigError> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars<F>(mut self, lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(runtime) = lookup("TESTPOD_RUNTIME") {
            self.runtime = runtime.parse()?;
        }
        if let Some(binary) = lookup("TESTPOD_BINARY") {
            self.binary = Some(binary);
        }
        if let Some(host) = lookup("TESTPOD_HOST") {
            self.host = Some(host);
        }
        self.validate()?;
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.startup_timeout_secs == 0 {
            return Err(ConfigError::InvalidValue(
                "startup_timeout_secs must be greater than zero".to_string(),
            ));
        }
        if self.poll_interval_ms == 0 {
            return Err(ConfigError::InvalidValue(
                "poll_interval_ms must be greater than zero".to_string(),
            ));
        }
        if matches!(&self.binary, Some(b) if b.trim().is_empty()) {
            return Err(ConfigError::InvalidValue("binary must not be empty".to_string()));
        }
        if matches!(&self.host, Some(h) if h.trim().is_empty()) {
            return Err(ConfigError::InvalidValue("host must not be empty".to_string()));
        }
        Ok(())
    }

    /// CLI executable to invoke.
    pub fn binary(&self) -> &str {
        self.binary.as_deref().unwrap_or_else(|| self.runtime.binary())
    }

    /// Host under which published ports are reachable.
    ///
    /// Uses `host` when set, else the host part of a `tcp://` `DOCKER_HOST`,
    /// else `localhost`.
    pub fn resolved_host(&self) -> String {
        if let Some(host) = &self.host {
            return host.clone();
        }
        std::env::var("DOCKER_HOST")
            .ok()
            .and_then(|v| host_from_docker_url(&v))
            .unwrap_or_else(|| "localhost".to_string())
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_secs(self.startup_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }

    /// Port strategy using this configuration's timeout and poll interval.
    pub fn for_listening_port(&self, port: impl Into<String>) -> ForListeningPort {
        ForListeningPort::new(port)
            .with_startup_timeout(self.startup_timeout())
            .with_poll_interval(self.poll_interval())
    }

    /// Log strategy using this configuration's timeout and poll interval.
    pub fn for_log(&self, text: impl Into<String>) -> ForLog {
        ForLog::new(text)
            .with_startup_timeout(self.startup_timeout())
            .with_poll_interval(self.poll_interval())
    }
}

fn host_from_docker_url(url: &str) -> Option<String> {
    let rest = url.strip_prefix("tcp://")?;
    let host = match rest.rsplit_once(':') {
        Some((h, _port)) => h,
        None => rest,
    };
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.is_empty() {
        None
    } else {
        Some(host.to_string())
    }
}
