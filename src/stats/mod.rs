//! Side channel used by the health monitor and the store metadata facade to report
//! recordable events (requests per outcome, leaked requests, routing choices, health transitions).
//!
//! Metric names and the backing metrics system belong to the caller. This module only defines
//! the events, a no-op sink and an in-memory counting sink.
use std::time::Duration;

use crate::health::HealthState;

pub mod in_memory;

/// Trait that defines every event the routing core can report
pub trait RoutingStats: Send + Sync {
    /// A request was sent to `instance`
    fn record_request(&self, instance: &str);
    /// Time between sending a request to `instance` and getting its response back
    fn record_response_waiting_time(&self, instance: &str, latency: Duration);
    fn record_healthy_request(&self, instance: &str);
    fn record_quota_exceeded_request(&self, instance: &str);
    fn record_internal_server_error_request(&self, instance: &str);
    fn record_service_unavailable_request(&self, instance: &str);
    fn record_other_error_request(&self, instance: &str);
    /// A request to `instance` didn't complete within the configured timeout
    fn record_leaked_request(&self, instance: &str);
    /// Routing produced no replica for a request
    fn record_no_available_replica_request(&self);
    /// `instance` moved from `from` to `to`
    fn record_health_transition(&self, instance: &str, from: HealthState, to: HealthState);
    /// `instance` was picked by the routing strategy
    fn record_routing_choice(&self, instance: &str);
}

/// [`RoutingStats`] that drops every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStats;

impl RoutingStats for NoopStats {
    fn record_request(&self, _: &str) {}
    fn record_response_waiting_time(&self, _: &str, _: Duration) {}
    fn record_healthy_request(&self, _: &str) {}
    fn record_quota_exceeded_request(&self, _: &str) {}
    fn record_internal_server_error_request(&self, _: &str) {}
    fn record_service_unavailable_request(&self, _: &str) {}
    fn record_other_error_request(&self, _: &str) {}
    fn record_leaked_request(&self, _: &str) {}
    fn record_no_available_replica_request(&self) {}
    fn record_health_transition(&self, _: &str, _: HealthState, _: HealthState) {}
    fn record_routing_choice(&self, _: &str) {}
}
