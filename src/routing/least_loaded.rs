//! Least loaded is the default [`RoutingStrategy`].
//!
//! Unavailable instances are dropped, the rest are ordered by the number of requests they
//! currently have in flight. Equally loaded instances are ordered by [`request_hash`] so that
//! a given request id always sees them in the same order, while different requests spread
//! over all of them.
use std::sync::Arc;

use super::{available_candidates, request_hash, RoutingStrategy};
use crate::health::HealthSignal;

pub struct LeastLoaded {
    health: Arc<dyn HealthSignal>,
}

impl LeastLoaded {
    pub fn new(health: Arc<dyn HealthSignal>) -> Self {
        Self { health }
    }
}

impl RoutingStrategy for LeastLoaded {
    fn select_replicas(
        &self,
        request_id: u64,
        candidates: &[String],
        required_count: usize,
    ) -> Vec<String> {
        if candidates.is_empty() || required_count == 0 {
            return Vec::new();
        }

        let mut ranked: Vec<(usize, u128, &String)> =
            available_candidates(self.health.as_ref(), candidates)
                .into_iter()
                .map(|instance| {
                    (
                        self.health.get_pending_request_count(instance),
                        request_hash(request_id, instance),
                        instance,
                    )
                })
                .collect();

        // instance name as last resort in the (very) unlikely case of a hash collision
        ranked.sort_by(|a, b| a.0.cmp(&b.0).then(a.1.cmp(&b.1)).then(a.2.cmp(b.2)));

        ranked
            .into_iter()
            .take(required_count)
            .map(|(_, _, instance)| instance.clone())
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::LeastLoaded;
    use crate::{
        routing::{request_hash, RoutingStrategy},
        test_utils::health::{SelectionInput, StaticHealth},
    };

    fn instances(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    #[test]
    fn empty_candidates() {
        let strategy = LeastLoaded::new(Arc::new(StaticHealth::new()));
        assert!(strategy.select_replicas(1, &[], 3).is_empty());
    }

    #[test]
    fn zero_required() {
        let strategy = LeastLoaded::new(Arc::new(StaticHealth::new()));
        assert!(strategy
            .select_replicas(1, &instances(&["a", "b"]), 0)
            .is_empty());
    }

    #[test]
    fn least_loaded_first() {
        let health = StaticHealth::new()
            .with_pending("a", 5)
            .with_pending("b", 0)
            .with_pending("c", 2);
        let strategy = LeastLoaded::new(Arc::new(health));

        assert_eq!(
            strategy.select_replicas(42, &instances(&["a", "b", "c"]), 3),
            instances(&["b", "c", "a"])
        );
        assert_eq!(
            strategy.select_replicas(42, &instances(&["a", "b", "c"]), 2),
            instances(&["b", "c"])
        );
    }

    #[test]
    fn unavailable_instances_are_skipped() {
        let health = StaticHealth::new().with_unavailable("b");
        let strategy = LeastLoaded::new(Arc::new(health));

        let selected = strategy.select_replicas(1, &instances(&["a", "b", "c"]), 3);
        assert_eq!(selected.len(), 2);
        assert!(!selected.contains(&"b".to_string()));
    }

    #[test]
    fn no_available_instance() {
        let health = StaticHealth::new()
            .with_unavailable("a")
            .with_unavailable("b");
        let strategy = LeastLoaded::new(Arc::new(health));

        assert!(strategy
            .select_replicas(1, &instances(&["a", "b"]), 1)
            .is_empty());
    }

    #[test]
    fn ties_broken_by_request_hash() {
        let strategy = LeastLoaded::new(Arc::new(StaticHealth::new()));
        let candidates = instances(&["a", "b", "c", "d"]);

        for request_id in 0..50 {
            let mut expected = candidates.clone();
            expected.sort_by_key(|instance| request_hash(request_id, instance));
            assert_eq!(
                strategy.select_replicas(request_id, &candidates, 4),
                expected
            );
        }
    }

    #[test]
    fn ties_spread_over_instances() {
        let strategy = LeastLoaded::new(Arc::new(StaticHealth::new()));
        let candidates = instances(&["a", "b", "c"]);

        let firsts: HashSet<String> = (0..100)
            .map(|request_id| strategy.select_replicas(request_id, &candidates, 1)[0].clone())
            .collect();
        assert_eq!(firsts.len(), 3);
    }

    #[test]
    fn duplicated_candidates_are_collapsed() {
        let strategy = LeastLoaded::new(Arc::new(StaticHealth::new()));
        let selected = strategy.select_replicas(9, &instances(&["a", "a", "b", "a"]), 5);

        assert_eq!(selected.len(), 2);
        let distinct: HashSet<&String> = selected.iter().collect();
        assert_eq!(distinct.len(), 2);
    }

    /// Invariants:
    ///  1. the result has exactly min(required_count, distinct available candidates) instances
    ///  2. every instance is an available candidate, without duplicates
    ///  3. instances are ordered by pending requests
    ///  4. the same input always yields the same output
    #[quickcheck]
    fn selection_bounds(input: SelectionInput) {
        let health = input.health();
        let strategy = LeastLoaded::new(Arc::new(health.clone()));

        let selected =
            strategy.select_replicas(input.request_id, &input.candidates, input.required_count);

        let available = input.available();
        assert_eq!(selected.len(), input.required_count.min(available.len()));

        let distinct: HashSet<&String> = selected.iter().collect();
        assert_eq!(distinct.len(), selected.len());
        for instance in selected.iter() {
            assert!(available.contains(instance));
        }

        let loads: Vec<usize> = selected
            .iter()
            .map(|instance| health.pending[instance])
            .collect();
        assert!(loads.windows(2).all(|pair| pair[0] <= pair[1]));

        assert_eq!(
            selected,
            strategy.select_replicas(input.request_id, &input.candidates, input.required_count)
        );
    }
}
