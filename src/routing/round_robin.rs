//! Round robin [`RoutingStrategy`].
//!
//! Ignores load. Available candidates are rotated by a cursor shared by every request, so
//! consecutive requests for the same partition start on consecutive replicas.
use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc,
};

use super::{available_candidates, RoutingStrategy};
use crate::health::HealthSignal;

pub struct RoundRobin {
    health: Arc<dyn HealthSignal>,
    cursor: AtomicUsize,
}

impl RoundRobin {
    pub fn new(health: Arc<dyn HealthSignal>) -> Self {
        Self {
            health,
            cursor: AtomicUsize::new(0),
        }
    }
}

impl RoutingStrategy for RoundRobin {
    fn select_replicas(
        &self,
        _request_id: u64,
        candidates: &[String],
        required_count: usize,
    ) -> Vec<String> {
        if candidates.is_empty() || required_count == 0 {
            return Vec::new();
        }

        let available = available_candidates(self.health.as_ref(), candidates);
        if available.is_empty() {
            return Vec::new();
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % available.len();
        available
            .iter()
            .cycle()
            .skip(start)
            .take(required_count.min(available.len()))
            .map(|instance| (*instance).clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::RoundRobin;
    use crate::{
        routing::RoutingStrategy,
        test_utils::health::{SelectionInput, StaticHealth},
    };

    fn instances(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn rotates_over_available_candidates() {
        let strategy = RoundRobin::new(Arc::new(StaticHealth::new().with_unavailable("b")));
        let candidates = instances(&["a", "b", "c", "d"]);

        assert_eq!(strategy.select_replicas(0, &candidates, 1), instances(&["a"]));
        assert_eq!(strategy.select_replicas(0, &candidates, 1), instances(&["c"]));
        assert_eq!(strategy.select_replicas(0, &candidates, 1), instances(&["d"]));
        assert_eq!(
            strategy.select_replicas(0, &candidates, 2),
            instances(&["a", "c"])
        );
    }

    #[test]
    fn never_exceeds_available() {
        let strategy = RoundRobin::new(Arc::new(StaticHealth::new()));
        let candidates = instances(&["a", "b"]);

        let selected = strategy.select_replicas(0, &candidates, 5);
        assert_eq!(selected, instances(&["a", "b"]));
    }

    #[test]
    fn nothing_available() {
        let strategy = RoundRobin::new(Arc::new(StaticHealth::new().with_unavailable("a")));
        assert!(strategy
            .select_replicas(0, &instances(&["a"]), 1)
            .is_empty());
        assert!(strategy.select_replicas(0, &[], 1).is_empty());
    }

    /// Invariants, whatever the cursor position:
    ///  1. the result has exactly min(required_count, distinct available candidates) instances
    ///  2. every instance is an available candidate, without duplicates
    #[quickcheck]
    fn selection_bounds(input: SelectionInput, rounds: u8) {
        let strategy = RoundRobin::new(Arc::new(input.health()));
        let available = input.available();

        for _ in 0..=(rounds % 8) {
            let selected =
                strategy.select_replicas(input.request_id, &input.candidates, input.required_count);
            assert_eq!(selected.len(), input.required_count.min(available.len()));

            let distinct: HashSet<&String> = selected.iter().collect();
            assert_eq!(distinct.len(), selected.len());
            for instance in selected.iter() {
                assert!(available.contains(instance));
            }
        }
    }

    #[test]
    fn duplicated_candidates_are_collapsed() {
        let strategy = RoundRobin::new(Arc::new(StaticHealth::new()));
        let candidates = instances(&["a", "a", "b", "a"]);

        for _ in 0..4 {
            let selected = strategy.select_replicas(0, &candidates, 3);
            assert_eq!(selected.len(), 2);
            assert_ne!(selected[0], selected[1]);
        }
    }
}
