//! This file contains the [`InstanceHealthMonitor`].
//!
//! For every instance (endpoint) it keeps:
//!  1. the number of requests currently in flight. This is the load signal used by least loaded routing.
//!  2. an availability state driven by the outcome of recent requests
//!
//! State machine, per instance:
//!
//!   (no record) --first request--> Healthy --N consecutive failures--> Unhealthy
//!                                     ^                                   |
//!                                     +------------ any success ----------+
//!
//! An unhealthy instance is skipped by routing until `retry_unhealthy_after` has elapsed since its
//! last failure. After that it is reported as available again until a single request is admitted
//! as its probe. While the probe is in flight the instance is unavailable. If the probe fails the
//! window starts over.
use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc, Mutex, MutexGuard, PoisonError, RwLock,
    },
    time::Duration,
};

use serde::Serialize;
use tokio::time::Instant;
use tracing::{event, instrument, Level};

use super::{HealthSignal, HealthState, Outcome, StatusCode, Transport};
use crate::{
    config::HealthMonitorConfig,
    error::{Error, Result},
    stats::RoutingStats,
};

#[derive(Debug)]
struct Availability {
    state: HealthState,
    consecutive_failures: usize,
    last_failure: Option<Instant>,
    /// A request to this unhealthy instance was admitted as its probe and hasn't completed yet
    probing: bool,
}

impl Availability {
    fn retry_window_open(&self, retry_unhealthy_after: Duration) -> bool {
        self.last_failure
            .map_or(true, |at| at.elapsed() >= retry_unhealthy_after)
    }

    fn is_available(&self, retry_unhealthy_after: Duration) -> bool {
        match self.state {
            HealthState::Healthy => true,
            HealthState::Unhealthy => {
                !self.probing && self.retry_window_open(retry_unhealthy_after)
            }
        }
    }
}

#[derive(Debug)]
struct InstanceHealth {
    pending: AtomicUsize,
    availability: Mutex<Availability>,
}

impl InstanceHealth {
    fn new() -> Self {
        Self {
            pending: AtomicUsize::new(0),
            availability: Mutex::new(Availability {
                state: HealthState::Healthy,
                consecutive_failures: 0,
                last_failure: None,
                probing: false,
            }),
        }
    }

    /// Availability only holds plain counters, a panic while holding the lock can't leave it
    /// in a state worse than slightly stale. Keep using it.
    fn availability(&self) -> MutexGuard<Availability> {
        self.availability
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Admits the request about to be sent as the probe of this instance if it is unhealthy,
    /// its retry window is open and no other probe is in flight
    fn try_start_probe(&self, retry_unhealthy_after: Duration) -> bool {
        let mut availability = self.availability();
        if availability.state == HealthState::Unhealthy
            && availability.is_available(retry_unhealthy_after)
        {
            availability.probing = true;
            return true;
        }

        false
    }
}

/// Holds one pending request slot of an instance. The slot is released when the guard is dropped,
/// whichever way the request ends (response, error, timeout or the caller dropping the future).
/// A guard holding the probe of an unhealthy instance also ends the probe when dropped.
struct PendingRequestGuard {
    health: Arc<InstanceHealth>,
    probe: bool,
}

impl PendingRequestGuard {
    fn acquire(health: Arc<InstanceHealth>, probe: bool) -> Self {
        health.pending.fetch_add(1, Ordering::AcqRel);
        Self { health, probe }
    }
}

impl Drop for PendingRequestGuard {
    fn drop(&mut self) {
        if self.probe {
            self.health.availability().probing = false;
        }
        self.health.pending.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Point in time view of a single instance
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceSnapshot {
    pub instance: String,
    pub pending_requests: usize,
    pub state: HealthState,
}

pub struct InstanceHealthMonitor {
    config: HealthMonitorConfig,
    transport: Arc<dyn Transport>,
    stats: Arc<dyn RoutingStats>,
    instances: RwLock<HashMap<String, Arc<InstanceHealth>>>,
}

impl std::fmt::Debug for InstanceHealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InstanceHealthMonitor")
            .field("config", &self.config)
            .field("instances", &self.snapshot())
            .finish()
    }
}

impl InstanceHealthMonitor {
    pub fn new(
        config: HealthMonitorConfig,
        transport: Arc<dyn Transport>,
        stats: Arc<dyn RoutingStats>,
    ) -> Self {
        Self {
            config,
            transport,
            stats,
            instances: RwLock::new(HashMap::new()),
        }
    }

    fn get(&self, instance: &str) -> Option<Arc<InstanceHealth>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(instance)
            .cloned()
    }

    /// Returns the record for `instance`, creating it on first use
    fn get_or_create(&self, instance: &str) -> Arc<InstanceHealth> {
        if let Some(health) = self.get(instance) {
            return health;
        }

        let mut guard = self
            .instances
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        guard
            .entry(instance.to_string())
            .or_insert_with(|| {
                event!(Level::DEBUG, "tracking new instance {}", instance);
                Arc::new(InstanceHealth::new())
            })
            .clone()
    }

    /// Whether routing may send a request to `instance` right now.
    ///
    /// Unknown instances are available. An unhealthy instance is available once its retry window
    /// is open, and only until a probe request is sent to it.
    pub fn is_available(&self, instance: &str) -> bool {
        self.get(instance).map_or(true, |health| {
            health
                .availability()
                .is_available(self.config.retry_unhealthy_after())
        })
    }

    /// Number of requests to `instance` currently in flight
    pub fn get_pending_request_count(&self, instance: &str) -> usize {
        self.get(instance)
            .map_or(0, |health| health.pending.load(Ordering::Acquire))
    }

    /// Current state of `instance`, [`None`] if it was never contacted
    pub fn health_state(&self, instance: &str) -> Option<HealthState> {
        self.get(instance).map(|health| health.availability().state)
    }

    /// Sends a request to `instance` through the [`Transport`] while accounting for it.
    ///
    /// The returned status can be any status the instance answered with. Transport failures and
    /// requests outstanding for longer than the configured timeout are returned as
    /// [`Error::RequestFailed`]. Both count as failures for the availability judgment.
    #[instrument(level = "debug", skip(self))]
    pub async fn send_request_to_instance(&self, instance: &str) -> Result<StatusCode> {
        let health = self.get_or_create(instance);
        let probe = health.try_start_probe(self.config.retry_unhealthy_after());
        if probe {
            event!(Level::INFO, "probing unhealthy instance {}", instance);
        }
        let _pending = PendingRequestGuard::acquire(health.clone(), probe);
        self.stats.record_request(instance);

        let started_at = Instant::now();
        let response =
            tokio::time::timeout(self.config.request_timeout(), self.transport.send(instance))
                .await;
        self.stats
            .record_response_waiting_time(instance, started_at.elapsed());

        match response {
            Ok(Ok(status)) => {
                let outcome = status.outcome();
                self.record_outcome(instance, &health, outcome);
                Ok(status)
            }
            Ok(Err(err)) => {
                event!(
                    Level::WARN,
                    outcome = Outcome::OtherError.as_ref(),
                    "request to instance {} failed: {}",
                    instance,
                    err
                );
                self.record_outcome(instance, &health, Outcome::OtherError);
                Err(Error::RequestFailed {
                    endpoint: instance.to_string(),
                    reason: err.to_string(),
                })
            }
            Err(_) => {
                event!(
                    Level::WARN,
                    "request to instance {} still pending after {:?}, abandoning it",
                    instance,
                    self.config.request_timeout()
                );
                self.stats.record_leaked_request(instance);
                self.record_failure(instance, &health);
                Err(Error::RequestFailed {
                    endpoint: instance.to_string(),
                    reason: format!("timed out after {:?}", self.config.request_timeout()),
                })
            }
        }
    }

    fn record_outcome(&self, instance: &str, health: &InstanceHealth, outcome: Outcome) {
        event!(
            Level::DEBUG,
            outcome = outcome.as_ref(),
            "instance {} answered",
            instance
        );
        match outcome {
            Outcome::Healthy => self.stats.record_healthy_request(instance),
            Outcome::QuotaExceeded => self.stats.record_quota_exceeded_request(instance),
            Outcome::InternalServerError => {
                self.stats.record_internal_server_error_request(instance)
            }
            Outcome::ServiceUnavailable => self.stats.record_service_unavailable_request(instance),
            Outcome::OtherError => self.stats.record_other_error_request(instance),
        }

        if outcome.is_failure() {
            self.record_failure(instance, health);
        } else if outcome == Outcome::Healthy {
            self.record_success(instance, health);
        }
    }

    fn record_success(&self, instance: &str, health: &InstanceHealth) {
        let mut availability = health.availability();
        availability.consecutive_failures = 0;
        if availability.state == HealthState::Unhealthy {
            availability.state = HealthState::Healthy;
            drop(availability);
            self.transitioned(instance, HealthState::Unhealthy, HealthState::Healthy);
        }
    }

    fn record_failure(&self, instance: &str, health: &InstanceHealth) {
        let mut availability = health.availability();
        availability.consecutive_failures += 1;
        availability.last_failure = Some(Instant::now());
        if availability.state == HealthState::Healthy
            && availability.consecutive_failures >= self.config.unhealthy_after_failures
        {
            availability.state = HealthState::Unhealthy;
            let failures = availability.consecutive_failures;
            drop(availability);
            event!(
                Level::WARN,
                "instance {} marked unhealthy after {} consecutive failures",
                instance,
                failures
            );
            self.transitioned(instance, HealthState::Healthy, HealthState::Unhealthy);
        }
    }

    fn transitioned(&self, instance: &str, from: HealthState, to: HealthState) {
        event!(Level::INFO, "instance {} moved from {} to {}", instance, from, to);
        self.stats.record_health_transition(instance, from, to);
    }

    /// Pending count and state of every instance seen so far, sorted by instance
    pub fn snapshot(&self) -> Vec<InstanceSnapshot> {
        let guard = self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut rows: Vec<InstanceSnapshot> = guard
            .iter()
            .map(|(instance, health)| InstanceSnapshot {
                instance: instance.clone(),
                pending_requests: health.pending.load(Ordering::Acquire),
                state: health.availability().state,
            })
            .collect();
        rows.sort_by(|a, b| a.instance.cmp(&b.instance));
        rows
    }
}

impl HealthSignal for InstanceHealthMonitor {
    fn is_available(&self, instance: &str) -> bool {
        InstanceHealthMonitor::is_available(self, instance)
    }

    fn get_pending_request_count(&self, instance: &str) -> usize {
        InstanceHealthMonitor::get_pending_request_count(self, instance)
    }
}
