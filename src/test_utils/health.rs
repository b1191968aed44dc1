//! A [`HealthSignal`] whose answers are fixed by the test, and random routing inputs built on it
use std::collections::{HashMap, HashSet};

use quickcheck::{Arbitrary, Gen};

use crate::health::HealthSignal;

#[derive(Debug, Default, Clone)]
pub struct StaticHealth {
    pub unavailable: HashSet<String>,
    pub pending: HashMap<String, usize>,
}

impl StaticHealth {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_unavailable(mut self, instance: &str) -> Self {
        self.unavailable.insert(instance.to_string());
        self
    }

    pub fn with_pending(mut self, instance: &str, pending: usize) -> Self {
        self.pending.insert(instance.to_string(), pending);
        self
    }
}

impl HealthSignal for StaticHealth {
    fn is_available(&self, instance: &str) -> bool {
        !self.unavailable.contains(instance)
    }

    fn get_pending_request_count(&self, instance: &str) -> usize {
        self.pending.get(instance).copied().unwrap_or(0)
    }
}

const POOL: [&str; 8] = ["a", "b", "c", "d", "e", "f", "g", "h"];

/// One call to a routing strategy: candidates drawn from a small pool (so duplicates are common)
/// and the health state of every instance of the pool
#[derive(Debug, Clone)]
pub struct SelectionInput {
    pub request_id: u64,
    pub candidates: Vec<String>,
    pub unavailable: Vec<String>,
    pub pending: Vec<(String, usize)>,
    pub required_count: usize,
}

impl SelectionInput {
    pub fn health(&self) -> StaticHealth {
        let mut health = StaticHealth::new();
        for instance in self.unavailable.iter() {
            health = health.with_unavailable(instance);
        }
        for (instance, pending) in self.pending.iter() {
            health = health.with_pending(instance, *pending);
        }
        health
    }

    /// Distinct candidates that are available
    pub fn available(&self) -> HashSet<&String> {
        self.candidates
            .iter()
            .filter(|candidate| !self.unavailable.contains(candidate))
            .collect()
    }
}

fn pick(g: &mut Gen) -> String {
    g.choose(&POOL).copied().unwrap_or("a").to_string()
}

impl Arbitrary for SelectionInput {
    fn arbitrary(g: &mut Gen) -> Self {
        let n_candidates = usize::arbitrary(g) % 12;
        let n_unavailable = usize::arbitrary(g) % 4;
        Self {
            request_id: u64::arbitrary(g),
            candidates: (0..n_candidates).map(|_| pick(g)).collect(),
            unavailable: (0..n_unavailable).map(|_| pick(g)).collect(),
            pending: POOL
                .iter()
                .map(|instance| (instance.to_string(), usize::arbitrary(g) % 3))
                .collect(),
            required_count: usize::arbitrary(g) % 10,
        }
    }
}
