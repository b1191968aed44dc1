//! An in-memory [`RoutingStats`] implementation
//!
//! Keeps plain counters per instance behind a [`Mutex`]. Useful for tests and for the CLI,
//! which prints them after a run.
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use serde::Serialize;
use tracing::{event, Level};

use super::RoutingStats;
use crate::health::HealthState;

/// Counters kept for a single instance
#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize)]
pub struct InstanceCounters {
    pub requests: usize,
    pub healthy: usize,
    pub quota_exceeded: usize,
    pub internal_server_error: usize,
    pub service_unavailable: usize,
    pub other_error: usize,
    pub leaked: usize,
    pub routed: usize,
    pub transitions_to_unhealthy: usize,
    pub transitions_to_healthy: usize,
    pub total_waiting_time: Duration,
}

#[derive(Debug, Default)]
struct Counters {
    instances: HashMap<String, InstanceCounters>,
    no_available_replica: usize,
}

#[derive(Debug, Default)]
pub struct InMemoryStats {
    inner: Mutex<Counters>,
}

impl InMemoryStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// A poisoned lock only means a panic happened while bumping a counter. The counters
    /// themselves are still usable so we keep going.
    fn acquire_lock(&self) -> MutexGuard<Counters> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                event!(Level::WARN, "in memory stats lock poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    fn update(&self, instance: &str, f: impl FnOnce(&mut InstanceCounters)) {
        let mut guard = self.acquire_lock();
        f(guard.instances.entry(instance.to_string()).or_default());
    }

    /// Returns a copy of the counters recorded for `instance`
    pub fn instance(&self, instance: &str) -> InstanceCounters {
        self.acquire_lock()
            .instances
            .get(instance)
            .cloned()
            .unwrap_or_default()
    }

    /// Returns a copy of the counters of every instance seen so far
    pub fn instances(&self) -> HashMap<String, InstanceCounters> {
        self.acquire_lock().instances.clone()
    }

    pub fn no_available_replica_requests(&self) -> usize {
        self.acquire_lock().no_available_replica
    }
}

impl RoutingStats for InMemoryStats {
    fn record_request(&self, instance: &str) {
        self.update(instance, |c| c.requests += 1);
    }

    fn record_response_waiting_time(&self, instance: &str, latency: Duration) {
        self.update(instance, |c| c.total_waiting_time += latency);
    }

    fn record_healthy_request(&self, instance: &str) {
        self.update(instance, |c| c.healthy += 1);
    }

    fn record_quota_exceeded_request(&self, instance: &str) {
        self.update(instance, |c| c.quota_exceeded += 1);
    }

    fn record_internal_server_error_request(&self, instance: &str) {
        self.update(instance, |c| c.internal_server_error += 1);
    }

    fn record_service_unavailable_request(&self, instance: &str) {
        self.update(instance, |c| c.service_unavailable += 1);
    }

    fn record_other_error_request(&self, instance: &str) {
        self.update(instance, |c| c.other_error += 1);
    }

    fn record_leaked_request(&self, instance: &str) {
        self.update(instance, |c| c.leaked += 1);
    }

    fn record_no_available_replica_request(&self) {
        self.acquire_lock().no_available_replica += 1;
    }

    fn record_health_transition(&self, instance: &str, _from: HealthState, to: HealthState) {
        self.update(instance, |c| match to {
            HealthState::Healthy => c.transitions_to_healthy += 1,
            HealthState::Unhealthy => c.transitions_to_unhealthy += 1,
        });
    }

    fn record_routing_choice(&self, instance: &str) {
        self.update(instance, |c| c.routed += 1);
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::InMemoryStats;
    use crate::{health::HealthState, stats::RoutingStats};

    #[test]
    fn counts_per_instance() {
        let stats = InMemoryStats::new();
        stats.record_request("a");
        stats.record_request("a");
        stats.record_healthy_request("a");
        stats.record_leaked_request("b");
        stats.record_response_waiting_time("a", Duration::from_millis(3));
        stats.record_response_waiting_time("a", Duration::from_millis(4));
        stats.record_health_transition("b", HealthState::Healthy, HealthState::Unhealthy);
        stats.record_no_available_replica_request();

        let a = stats.instance("a");
        assert_eq!(a.requests, 2);
        assert_eq!(a.healthy, 1);
        assert_eq!(a.total_waiting_time, Duration::from_millis(7));

        let b = stats.instance("b");
        assert_eq!(b.leaked, 1);
        assert_eq!(b.transitions_to_unhealthy, 1);
        assert_eq!(b.requests, 0);

        assert_eq!(stats.instance("never seen"), Default::default());
        assert_eq!(stats.no_available_replica_requests(), 1);
        assert_eq!(stats.instances().len(), 2);
    }
}
