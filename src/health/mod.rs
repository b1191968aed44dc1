//! Module that tracks load and availability of every instance requests are routed to.
//!
//! See [`monitor::InstanceHealthMonitor`] for the state machine.
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use strum_macros::{AsRefStr, Display};

use crate::error::Result;

pub mod monitor;

/// Status returned by an instance for a request, HTTP flavoured.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StatusCode(pub u16);

impl StatusCode {
    pub const OK: StatusCode = StatusCode(200);
    pub const NOT_FOUND: StatusCode = StatusCode(404);
    pub const TOO_MANY_REQUESTS: StatusCode = StatusCode(429);
    pub const INTERNAL_SERVER_ERROR: StatusCode = StatusCode(500);
    pub const SERVICE_UNAVAILABLE: StatusCode = StatusCode(503);

    /// Classifies this status for health accounting.
    ///
    /// A missing key (404) is a normal answer from a healthy instance.
    pub fn outcome(&self) -> Outcome {
        match self.0 {
            200..=299 | 404 => Outcome::Healthy,
            429 => Outcome::QuotaExceeded,
            500 => Outcome::InternalServerError,
            503 => Outcome::ServiceUnavailable,
            _ => Outcome::OtherError,
        }
    }
}

/// How a response counts towards the availability judgment of an instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum Outcome {
    Healthy,
    /// The instance answered but refused the request. Says nothing about its health.
    QuotaExceeded,
    InternalServerError,
    ServiceUnavailable,
    OtherError,
}

impl Outcome {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            Outcome::InternalServerError | Outcome::ServiceUnavailable | Outcome::OtherError
        )
    }
}

/// Availability state of a known instance. Instances never seen have no state and are
/// considered available.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum HealthState {
    Healthy,
    Unhealthy,
}

/// The signals routing strategies rank instances by
pub trait HealthSignal: Send + Sync {
    /// Whether `instance` may receive requests right now
    fn is_available(&self, instance: &str) -> bool;
    /// Number of requests to `instance` currently in flight
    fn get_pending_request_count(&self, instance: &str) -> usize;
}

/// The network layer that actually delivers a request to an instance.
///
/// Errors returned here are transport level failures (connection refused, reset...). An
/// instance answering with an error status is NOT an error at this level.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, instance: &str) -> Result<StatusCode>;
}
