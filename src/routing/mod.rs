//! Module that contains the replica routing strategies.
//!
//! A strategy picks which of the replicas serving a partition a request should go to.
use std::{collections::HashSet, io::Cursor, io::Read, sync::Arc};

use murmur3::murmur3_x86_128;

use crate::{config::RoutingStrategyKind, health::HealthSignal};

pub mod least_loaded;
pub mod round_robin;

/// This trait defines a RoutingStrategy (ie: which replicas a request should be sent to).
///
/// Every implementation must
///  1. return at most `required_count` instances
///  2. only return instances present in `candidates`, without duplicates
///  3. return fewer instances (possibly none) instead of failing when not enough candidates are usable
pub trait RoutingStrategy: Send + Sync {
    fn select_replicas(
        &self,
        request_id: u64,
        candidates: &[String],
        required_count: usize,
    ) -> Vec<String>;
}

/// Constructs the [`RoutingStrategy`] selected by config
pub fn build(kind: RoutingStrategyKind, health: Arc<dyn HealthSignal>) -> Arc<dyn RoutingStrategy> {
    match kind {
        RoutingStrategyKind::LeastLoaded => Arc::new(least_loaded::LeastLoaded::new(health)),
        RoutingStrategyKind::RoundRobin => Arc::new(round_robin::RoundRobin::new(health)),
    }
}

/// Hash of a request id and an instance, used to break ties between equally loaded instances.
///
/// The same request id always orders the same instances the same way.
pub fn request_hash(request_id: u64, instance: &str) -> u128 {
    let mut reader = Cursor::new(request_id.to_le_bytes()).chain(instance.as_bytes());
    // reading from memory can't fail
    murmur3_x86_128(&mut reader, 0).unwrap_or_default()
}

/// Candidates that are available, in input order, first occurrence only
pub(crate) fn available_candidates<'a>(
    health: &dyn HealthSignal,
    candidates: &'a [String],
) -> Vec<&'a String> {
    let mut seen = HashSet::new();
    candidates
        .iter()
        .filter(|candidate| seen.insert(*candidate))
        .filter(|candidate| health.is_available(candidate))
        .collect()
}
