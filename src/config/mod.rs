//! Client side configuration of the routing core.
//!
//! Configs are plain JSON files (see `conf/`).
use std::{path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use tracing::{event, Level};

use crate::error::{Error, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ClientConfig {
    /// Store whose versions this client reads
    pub store_name: String,
    #[serde(default)]
    pub routing_strategy: RoutingStrategyKind,
    #[serde(default)]
    pub health: HealthMonitorConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoutingStrategyKind {
    #[default]
    LeastLoaded,
    RoundRobin,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", default)]
pub struct HealthMonitorConfig {
    /// Consecutive failed requests before an instance is marked unhealthy
    pub unhealthy_after_failures: usize,
    /// How long an unhealthy instance is skipped before it gets a probe request
    pub retry_unhealthy_after_ms: u64,
    /// Requests outstanding for longer than this are abandoned and counted as leaked
    pub request_timeout_ms: u64,
}

impl Default for HealthMonitorConfig {
    fn default() -> Self {
        Self {
            unhealthy_after_failures: 3,
            retry_unhealthy_after_ms: 10_000,
            request_timeout_ms: 5_000,
        }
    }
}

impl HealthMonitorConfig {
    pub fn retry_unhealthy_after(&self) -> Duration {
        Duration::from_millis(self.retry_unhealthy_after_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl ClientConfig {
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
            routing_strategy: Default::default(),
            health: Default::default(),
        }
    }

    /// Reads and validates a JSON config file
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path.as_ref())?;
        let config: ClientConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let reason = if self.store_name.is_empty() {
            "store_name cannot be empty"
        } else if self.health.unhealthy_after_failures == 0 {
            "health.unhealthy_after_failures must be at least 1"
        } else if self.health.request_timeout_ms == 0 {
            "health.request_timeout_ms must be at least 1"
        } else {
            return Ok(());
        };

        event!(Level::ERROR, "invalid client config: {}", reason);
        Err(Error::InvalidConfig {
            reason: reason.to_string(),
        })
    }
}
