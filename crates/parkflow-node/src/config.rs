//! Node configuration.
//!
//! Sources, lowest precedence first:
//!
//! 1. built-in defaults
//! 2. an optional YAML or TOML file (format picked by extension)
//! 3. environment variables `PARKFLOW__<SECTION>__<KEY>`, for example
//!    `PARKFLOW__HUB__HEARTBEAT_TIMEOUT_SECONDS=90`
//!
//! Command-line flags are applied on top by the binary, after which
//! [`NodeConfig::check`] must pass before anything starts.

use crate::error::NodeError;
use parkflow_realtime::HubConfig;
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::net::SocketAddr;
use std::path::Path;
use validator::{Validate, ValidationError};

/// Environment variable prefix.
pub const ENV_PREFIX: &str = "PARKFLOW";

/// Full node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct NodeConfig {
    /// HTTP listener.
    #[validate(nested)]
    pub server: ServerConfig,
    /// Connection hub and heartbeat tunables.
    #[validate(custom(function = "validate_hub"))]
    pub hub: HubConfig,
    /// Log output.
    #[validate(nested)]
    pub logging: LoggingConfig,
    /// Synthetic occupancy feed.
    #[validate(nested)]
    pub simulator: SimulatorConfig,
}

/// HTTP listener configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on.
    pub listen_addr: SocketAddr,
    /// Origins allowed by CORS. Empty or `*` allows any origin.
    #[validate(length(max = 64))]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            cors_origins: Vec::new(),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct LoggingConfig {
    /// Level for the node's own targets; `RUST_LOG` wins when set.
    #[validate(custom(function = "validate_level"))]
    pub level: String,
    /// `pretty` or `json`.
    #[validate(custom(function = "validate_format"))]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "pretty".to_string(),
        }
    }
}

/// Occupancy simulator configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct SimulatorConfig {
    /// Whether the simulator runs.
    pub enabled: bool,
    /// Seconds between simulated updates.
    #[validate(range(min = 1, max = 3600))]
    pub interval_seconds: u64,
    /// Lots to simulate.
    #[validate(length(min = 1))]
    pub lots: Vec<String>,
    /// Capacity reported for every simulated lot.
    #[validate(range(min = 1))]
    pub capacity: u32,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            interval_seconds: 5,
            lots: vec![
                "lot-001".to_string(),
                "lot-002".to_string(),
                "lot-003".to_string(),
            ],
            capacity: 150,
        }
    }
}

impl NodeConfig {
    /// Load defaults, then `path` if given, then the environment.
    pub fn load(path: Option<&Path>) -> Result<Self, NodeError> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }

        let config = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins")
                    .with_list_parse_key("simulator.lots"),
            )
            .build()?;

        Ok(config.try_deserialize()?)
    }

    /// Validate every section and the cross-field constraints.
    pub fn check(&self) -> Result<(), NodeError> {
        self.validate()?;
        Ok(())
    }
}

fn validate_hub(hub: &HubConfig) -> Result<(), ValidationError> {
    hub.validate()
        .map_err(|e| ValidationError::new("hub").with_message(Cow::Owned(e.to_string())))
}

fn validate_level(level: &str) -> Result<(), ValidationError> {
    match level.to_lowercase().as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(invalid("log_level", "expected trace, debug, info, warn or error")),
    }
}

fn validate_format(format: &str) -> Result<(), ValidationError> {
    match format.to_lowercase().as_str() {
        "pretty" | "json" => Ok(()),
        _ => Err(invalid("log_format", "expected pretty or json")),
    }
}

fn invalid(code: &'static str, message: &'static str) -> ValidationError {
    ValidationError::new(code).with_message(Cow::Borrowed(message))
}
