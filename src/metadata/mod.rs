//! Module that contains the abstraction connecting the assignment registry, the routing strategy and
//! the health monitor into a single interface used by request handlers.
//!
//! The flow for a read is
//!  1. [`StoreMetadata::get_replicas`] resolves the instances serving a (version, partition) and
//!     lets the routing strategy pick among them
//!  2. the caller sends its request to the chosen instance(s) through
//!     [`StoreMetadata::send_request_to_instance`], which keeps the health monitor up to date
use std::{
    collections::HashMap,
    sync::{PoisonError, RwLock},
};

use async_trait::async_trait;
use tracing::{event, Level};

use crate::{
    assignment::{NodeId, PartitionId},
    error::{Error, Result},
    health::{monitor::InstanceHealthMonitor, StatusCode},
    routing::RoutingStrategy,
    stats::RoutingStats,
};

pub mod registry_backed;

/// Trait that defines the per-store view request handlers route through.
///
/// Implementations only have to say how candidates are found. Routing and request accounting
/// come with the default methods.
#[async_trait]
pub trait StoreMetadata: Send + Sync {
    fn store_name(&self) -> &str;

    /// Every instance serving `partition` of `version`, in a stable order, not ranked
    ///
    /// # Errors
    /// Lookup errors (unknown version, dataset or partition) are returned as is
    fn get_candidates(&self, version: u32, partition: PartitionId) -> Result<Vec<String>>;

    fn routing_strategy(&self) -> &dyn RoutingStrategy;

    fn get_instance_health_monitor(&self) -> &InstanceHealthMonitor;

    fn stats(&self) -> &dyn RoutingStats;

    /// Returns up to `required_count` instances to send request `request_id` to.
    ///
    /// An empty list means no replica is currently usable. This is not an error: the caller decides
    /// what to do with it. An unknown version or partition IS an error, so that a misconfigured
    /// partition can be told apart from a partition whose replicas are all down.
    fn get_replicas(
        &self,
        request_id: u64,
        version: u32,
        partition: PartitionId,
        required_count: usize,
    ) -> Result<Vec<String>> {
        let candidates = self.get_candidates(version, partition).map_err(|err| {
            event!(
                Level::WARN,
                "no candidates for store {} version {} partition {}: {}",
                self.store_name(),
                version,
                partition,
                err
            );
            err
        })?;

        let replicas =
            self.routing_strategy()
                .select_replicas(request_id, &candidates, required_count);

        if replicas.is_empty() && required_count > 0 {
            event!(
                Level::WARN,
                "no available replica for store {} version {} partition {} out of {:?}",
                self.store_name(),
                version,
                partition,
                candidates
            );
            self.stats().record_no_available_replica_request();
        }

        for replica in replicas.iter() {
            self.stats().record_routing_choice(replica);
        }

        event!(
            Level::DEBUG,
            "request {} routed to {:?} (version {} partition {})",
            request_id,
            replicas,
            version,
            partition
        );
        Ok(replicas)
    }

    /// Sends a request to `instance`, keeping its health record up to date.
    ///
    /// `version` and `partition` aren't used yet. Health is tracked per instance, not per resource.
    async fn send_request_to_instance(
        &self,
        instance: &str,
        _version: u32,
        _partition: PartitionId,
    ) -> Result<StatusCode> {
        self.get_instance_health_monitor()
            .send_request_to_instance(instance)
            .await
    }
}

/// Maps a store version to the name of the dataset holding its assignment in the registry
pub trait VersionMapping: Send + Sync {
    fn dataset_for_version(&self, version: u32) -> Result<String>;
}

/// Every version of a store is its own dataset named `<store>_v<version>`. Versions start at 1.
#[derive(Debug, Clone)]
pub struct StoreVersionMapping {
    store_name: String,
}

impl StoreVersionMapping {
    pub fn new(store_name: impl Into<String>) -> Self {
        Self {
            store_name: store_name.into(),
        }
    }
}

impl VersionMapping for StoreVersionMapping {
    fn dataset_for_version(&self, version: u32) -> Result<String> {
        if version == 0 {
            event!(
                Level::ERROR,
                "store {} has no version 0, versions start at 1",
                self.store_name
            );
            return Err(Error::VersionNotFound { version });
        }

        Ok(format!("{}_v{}", self.store_name, version))
    }
}

/// Translates the node ids used by the registry into the endpoints used by routing
pub trait AddressBook: Send + Sync {
    fn endpoint(&self, node: NodeId) -> Option<String>;
}

/// [`AddressBook`] backed by a map updated alongside the topology feed
#[derive(Debug, Default)]
pub struct StaticAddressBook {
    endpoints: RwLock<HashMap<NodeId, String>>,
}

impl StaticAddressBook {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, node: NodeId, endpoint: impl Into<String>) {
        self.endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(node, endpoint.into());
    }

    pub fn remove(&self, node: NodeId) -> Option<String> {
        self.endpoints
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&node)
    }
}

impl FromIterator<(NodeId, String)> for StaticAddressBook {
    fn from_iter<T: IntoIterator<Item = (NodeId, String)>>(iter: T) -> Self {
        Self {
            endpoints: RwLock::new(iter.into_iter().collect()),
        }
    }
}

impl AddressBook for StaticAddressBook {
    fn endpoint(&self, node: NodeId) -> Option<String> {
        self.endpoints
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&node)
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::{AddressBook, StaticAddressBook, StoreVersionMapping, VersionMapping};
    use crate::error::Error;

    #[test]
    fn version_to_dataset() {
        let mapping = StoreVersionMapping::new("store1");
        assert_eq!(mapping.dataset_for_version(3).unwrap(), "store1_v3");
        assert_eq!(
            mapping.dataset_for_version(0).err().unwrap(),
            Error::VersionNotFound { version: 0 }
        );
    }

    #[test]
    fn address_book() {
        let book: StaticAddressBook = vec![(1, "http://a:1".to_string())].into_iter().collect();
        assert_eq!(book.endpoint(1), Some("http://a:1".to_string()));
        assert_eq!(book.endpoint(2), None);

        book.insert(2, "http://b:1");
        assert_eq!(book.remove(1), Some("http://a:1".to_string()));
        assert_eq!(book.endpoint(1), None);
        assert_eq!(book.endpoint(2), Some("http://b:1".to_string()));
    }
}
