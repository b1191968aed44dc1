//! Mock implementation for [`Transport`]
//!
//! Every instance answers [`StatusCode::OK`] unless told otherwise. Behaviour can be changed
//! per instance while the mock is in use, which is how tests flip an instance between
//! healthy and failing.
use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
    time::Duration,
};

use async_trait::async_trait;

use super::fault::{Fault, When};
use crate::{
    error::{Error, Result},
    health::{StatusCode, Transport},
};

#[derive(Debug, Clone, Copy, Default)]
pub struct InstanceBehaviour {
    /// Status returned when no fault triggers. Defaults to [`StatusCode::OK`]
    pub status: Option<StatusCode>,
    /// Transport level failure
    pub fault: Fault,
    /// Time spent before answering
    pub latency: Option<Duration>,
}

#[derive(Debug, Default)]
struct State {
    behaviours: HashMap<String, InstanceBehaviour>,
    calls: HashMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct MockTransport {
    state: Mutex<State>,
}

impl MockTransport {
    fn acquire_lock(&self) -> MutexGuard<State> {
        self.state.lock().unwrap()
    }

    pub fn set_status(&self, instance: &str, status: StatusCode) {
        self.acquire_lock()
            .behaviours
            .entry(instance.to_string())
            .or_default()
            .status = Some(status);
    }

    pub fn set_fault(&self, instance: &str, when: When) {
        self.acquire_lock()
            .behaviours
            .entry(instance.to_string())
            .or_default()
            .fault = Fault { when };
    }

    pub fn set_latency(&self, instance: &str, latency: Duration) {
        self.acquire_lock()
            .behaviours
            .entry(instance.to_string())
            .or_default()
            .latency = Some(latency);
    }

    /// How many times `send` was called for `instance`
    pub fn calls(&self, instance: &str) -> usize {
        self.acquire_lock().calls.get(instance).copied().unwrap_or(0)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, instance: &str) -> Result<StatusCode> {
        let behaviour = {
            let mut guard = self.acquire_lock();
            *guard.calls.entry(instance.to_string()).or_default() += 1;
            guard.behaviours.get(instance).copied().unwrap_or_default()
        };

        if let Some(latency) = behaviour.latency {
            tokio::time::sleep(latency).await;
        }

        if behaviour.fault.triggered() {
            return Err(Error::Io {
                reason: format!("Mocked transport error sending to {}", instance),
            });
        }

        Ok(behaviour.status.unwrap_or(StatusCode::OK))
    }
}

pub struct MockTransportBuilder {
    behaviours: HashMap<String, InstanceBehaviour>,
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self {
            behaviours: HashMap::new(),
        }
    }
}

impl MockTransportBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, instance: &str, status: StatusCode) -> Self {
        self.behaviours
            .entry(instance.to_string())
            .or_default()
            .status = Some(status);
        self
    }

    pub fn with_fault(mut self, instance: &str, when: When) -> Self {
        self.behaviours
            .entry(instance.to_string())
            .or_default()
            .fault = Fault { when };
        self
    }

    pub fn with_latency(mut self, instance: &str, latency: Duration) -> Self {
        self.behaviours
            .entry(instance.to_string())
            .or_default()
            .latency = Some(latency);
        self
    }

    pub fn build(self) -> MockTransport {
        MockTransport {
            state: Mutex::new(State {
                behaviours: self.behaviours,
                calls: HashMap::new(),
            }),
        }
    }
}
