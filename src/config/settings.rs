//! # Configuration Settings
//!
//! Defines the configuration structure for a translation pass.

use crate::errors::{Error, Result};
use crate::ir::Stage;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use validator::Validate;

/// Environment variable prefix, e.g. `ROUTEPLANE_TENANT` or `ROUTEPLANE_LOGGING__LEVEL`.
pub const ENV_PREFIX: &str = "ROUTEPLANE";

/// Settings shared by every synthesizer in one translation pass
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct TranslatorConfig {
    /// Organisation the APIs belong to; first segment of every cluster name
    #[validate(length(min = 1, message = "Tenant cannot be empty"))]
    pub tenant: String,

    /// Namespace handed to the host resolver when a backend omits one
    #[validate(length(min = 1, message = "Default namespace cannot be empty"))]
    pub default_namespace: String,

    /// Hostnames served per lifecycle stage
    #[validate(nested)]
    pub hosts: StageHosts,

    /// Upstream connect timeout in milliseconds
    #[validate(range(
        min = 1,
        max = 300000,
        message = "Connect timeout must be between 1ms and 300s"
    ))]
    pub connect_timeout_ms: u64,

    /// Emit the fixed `/health` route on every virtual host
    pub health_route: bool,

    /// Logging configuration
    #[validate(nested)]
    pub logging: LoggingConfig,
}

impl Default for TranslatorConfig {
    fn default() -> Self {
        Self {
            tenant: "carbon.super".to_string(),
            default_namespace: "default".to_string(),
            hosts: StageHosts::default(),
            connect_timeout_ms: 5000,
            health_route: true,
            logging: LoggingConfig::default(),
        }
    }
}

/// Gateway hostnames per stage. The first entry names the stage's clusters.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct StageHosts {
    #[validate(length(min = 1, message = "At least one production host is required"))]
    pub production: Vec<String>,

    #[validate(length(min = 1, message = "At least one sandbox host is required"))]
    pub sandbox: Vec<String>,
}

impl Default for StageHosts {
    fn default() -> Self {
        Self {
            production: vec!["prod.gw.wso2.com".to_string()],
            sandbox: vec!["localhost".to_string()],
        }
    }
}

/// Logging setup consumed by [`crate::observability::init_logging`]
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[validate(length(min = 1, message = "Log level cannot be empty"))]
    pub level: String,

    /// Enable JSON structured logging
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { level: "info".to_string(), json: false }
    }
}

impl TranslatorConfig {
    /// Load from an optional YAML file layered under `ROUTEPLANE_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let loaded: TranslatorConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;

        loaded.validate()?;
        Ok(loaded)
    }

    /// Validate the entire configuration
    pub fn validate(&self) -> Result<()> {
        Validate::validate(self).map_err(Error::from)?;

        for host in self.hosts.production.iter().chain(&self.hosts.sandbox) {
            if host.trim().is_empty() || host.contains(char::is_whitespace) {
                return Err(Error::validation_field(
                    format!("Invalid gateway host '{}'", host),
                    "hosts",
                ));
            }
        }

        Ok(())
    }

    /// Hostnames a stage's virtual host answers on
    pub fn domains(&self, stage: Stage) -> &[String] {
        match stage {
            Stage::Production => &self.hosts.production,
            Stage::Sandbox => &self.hosts.sandbox,
        }
    }

    /// Host segment embedded in cluster names for a stage
    pub fn listener_host(&self, stage: Stage) -> &str {
        self.domains(stage).first().map(String::as_str).unwrap_or_default()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }
}
