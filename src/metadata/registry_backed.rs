//! [`StoreMetadata`] resolving candidates through the [`PartitionAssignmentRegistry`].
use std::sync::Arc;

use async_trait::async_trait;
use tracing::{event, Level};

use super::{AddressBook, StoreMetadata, StoreVersionMapping, VersionMapping};
use crate::{
    assignment::{registry::PartitionAssignmentRegistry, NodeId, PartitionId},
    config::ClientConfig,
    error::Result,
    health::{monitor::InstanceHealthMonitor, Transport},
    routing::{self, RoutingStrategy},
    stats::RoutingStats,
};

pub struct RegistryStoreMetadata {
    store_name: String,
    registry: Arc<PartitionAssignmentRegistry>,
    version_mapping: Box<dyn VersionMapping>,
    address_book: Arc<dyn AddressBook>,
    health_monitor: Arc<InstanceHealthMonitor>,
    routing_strategy: Arc<dyn RoutingStrategy>,
    stats: Arc<dyn RoutingStats>,
}

impl std::fmt::Debug for RegistryStoreMetadata {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryStoreMetadata")
            .field("store_name", &self.store_name)
            .field("health_monitor", &self.health_monitor)
            .finish()
    }
}

impl RegistryStoreMetadata {
    /// Constructs the facade for `config.store_name`.
    ///
    /// The health monitor and routing strategy are created here, one per store. Versions are
    /// mapped to datasets with [`StoreVersionMapping`] unless [`Self::with_version_mapping`] is used.
    ///
    /// # Errors
    /// returns [`crate::error::Error::InvalidConfig`] if the config doesn't validate
    pub fn new(
        config: ClientConfig,
        registry: Arc<PartitionAssignmentRegistry>,
        address_book: Arc<dyn AddressBook>,
        transport: Arc<dyn Transport>,
        stats: Arc<dyn RoutingStats>,
    ) -> Result<Self> {
        config.validate()?;

        let health_monitor = Arc::new(InstanceHealthMonitor::new(
            config.health.clone(),
            transport,
            stats.clone(),
        ));
        let routing_strategy = routing::build(config.routing_strategy, health_monitor.clone());

        Ok(Self {
            version_mapping: Box::new(StoreVersionMapping::new(config.store_name.clone())),
            store_name: config.store_name,
            registry,
            address_book,
            health_monitor,
            routing_strategy,
            stats,
        })
    }

    pub fn with_version_mapping(mut self, version_mapping: Box<dyn VersionMapping>) -> Self {
        self.version_mapping = version_mapping;
        self
    }
}

#[async_trait]
impl StoreMetadata for RegistryStoreMetadata {
    fn store_name(&self) -> &str {
        &self.store_name
    }

    fn get_candidates(&self, version: u32, partition: PartitionId) -> Result<Vec<String>> {
        let dataset = self.version_mapping.dataset_for_version(version)?;
        let mut nodes: Vec<NodeId> = self
            .registry
            .get_nodes_for_partition(&dataset, partition)?
            .into_iter()
            .collect();
        nodes.sort_unstable();

        Ok(nodes
            .into_iter()
            .filter_map(|node| {
                let endpoint = self.address_book.endpoint(node);
                if endpoint.is_none() {
                    event!(
                        Level::WARN,
                        "node {} serves partition {} of {} but has no known endpoint",
                        node,
                        partition,
                        dataset
                    );
                }
                endpoint
            })
            .collect())
    }

    fn routing_strategy(&self) -> &dyn RoutingStrategy {
        self.routing_strategy.as_ref()
    }

    fn get_instance_health_monitor(&self) -> &InstanceHealthMonitor {
        &self.health_monitor
    }

    fn stats(&self) -> &dyn RoutingStats {
        self.stats.as_ref()
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::HashSet, sync::Arc};

    use super::RegistryStoreMetadata;
    use crate::{
        assignment::{registry::PartitionAssignmentRegistry, NodeAssignments},
        config::{ClientConfig, RoutingStrategyKind},
        error::{Error, Result},
        health::StatusCode,
        metadata::{StaticAddressBook, StoreMetadata, VersionMapping},
        stats::{in_memory::InMemoryStats, NoopStats},
        test_utils::transport::{MockTransport, MockTransportBuilder},
    };

    const A: &str = "http://10.0.0.1:7072";
    const B: &str = "http://10.0.0.2:7072";
    const C: &str = "http://10.0.0.3:7072";

    struct Fixture {
        metadata: RegistryStoreMetadata,
        transport: Arc<MockTransport>,
        stats: Arc<InMemoryStats>,
    }

    fn fixture(config: ClientConfig, transport: MockTransport) -> Fixture {
        let registry = Arc::new(PartitionAssignmentRegistry::new());
        let assignment: NodeAssignments = vec![
            (0, HashSet::from([0, 1])),
            (1, HashSet::from([1, 2])),
            (2, HashSet::from([1])),
            (3, HashSet::from([1])),
        ]
        .into_iter()
        .collect();
        registry.set_assignment("store1_v1", assignment).unwrap();

        // node 3 has no endpoint on purpose
        let address_book: StaticAddressBook =
            vec![(0, A.to_string()), (1, B.to_string()), (2, C.to_string())]
                .into_iter()
                .collect();

        let transport = Arc::new(transport);
        let stats = Arc::new(InMemoryStats::new());
        let metadata = RegistryStoreMetadata::new(
            config,
            registry,
            Arc::new(address_book),
            transport.clone(),
            stats.clone(),
        )
        .unwrap();

        Fixture {
            metadata,
            transport,
            stats,
        }
    }

    #[test]
    fn candidates_are_translated_to_endpoints() {
        let f = fixture(
            ClientConfig::new("store1"),
            MockTransportBuilder::new().build(),
        );

        assert_eq!(
            f.metadata.get_candidates(1, 1).unwrap(),
            vec![A.to_string(), B.to_string(), C.to_string()]
        );
        assert_eq!(f.metadata.get_candidates(1, 2).unwrap(), vec![B.to_string()]);
    }

    #[test]
    fn get_replicas_picks_required_count() {
        let f = fixture(
            ClientConfig::new("store1"),
            MockTransportBuilder::new().build(),
        );

        let replicas = f.metadata.get_replicas(11, 1, 1, 2).unwrap();
        assert_eq!(replicas.len(), 2);
        assert_eq!(replicas, f.metadata.get_replicas(11, 1, 1, 2).unwrap());

        let routed: usize = [A, B, C]
            .iter()
            .map(|instance| f.stats.instance(instance).routed)
            .sum();
        assert_eq!(routed, 4);
    }

    #[test]
    fn unknown_lookups_are_errors() {
        let f = fixture(
            ClientConfig::new("store1"),
            MockTransportBuilder::new().build(),
        );

        assert!(matches!(
            f.metadata.get_replicas(1, 2, 1, 1).err().unwrap(),
            Error::DatasetNotFound { .. }
        ));
        assert!(matches!(
            f.metadata.get_replicas(1, 1, 9, 1).err().unwrap(),
            Error::PartitionNotFound { partition: 9, .. }
        ));
        assert!(matches!(
            f.metadata.get_replicas(1, 0, 1, 1).err().unwrap(),
            Error::VersionNotFound { version: 0 }
        ));
        assert_eq!(f.stats.no_available_replica_requests(), 0);
    }

    #[tokio::test]
    async fn unhealthy_replica_is_not_routed_to() {
        let mut config = ClientConfig::new("store1");
        config.health.unhealthy_after_failures = 1;
        let f = fixture(
            config,
            MockTransportBuilder::new()
                .with_status(B, StatusCode::SERVICE_UNAVAILABLE)
                .build(),
        );

        let status = f.metadata.send_request_to_instance(B, 1, 2).await.unwrap();
        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(f.transport.calls(B), 1);

        // B is the only replica of partition 2
        assert!(f.metadata.get_replicas(5, 1, 2, 1).unwrap().is_empty());
        assert_eq!(f.stats.no_available_replica_requests(), 1);

        for request_id in 0..20 {
            let replicas = f.metadata.get_replicas(request_id, 1, 1, 3).unwrap();
            assert_eq!(replicas.len(), 2);
            assert!(!replicas.contains(&B.to_string()));
        }
    }

    #[test]
    fn round_robin_from_config() {
        let mut config = ClientConfig::new("store1");
        config.routing_strategy = RoutingStrategyKind::RoundRobin;
        let f = fixture(config, MockTransportBuilder::new().build());

        let firsts: Vec<String> = (0..3)
            .map(|_| f.metadata.get_replicas(0, 1, 1, 1).unwrap().remove(0))
            .collect();
        assert_eq!(firsts, vec![A.to_string(), B.to_string(), C.to_string()]);
    }

    struct Fixed;

    impl VersionMapping for Fixed {
        fn dataset_for_version(&self, _version: u32) -> Result<String> {
            Ok("store1_v1".to_string())
        }
    }

    #[test]
    fn custom_version_mapping() {
        let f = fixture(
            ClientConfig::new("store1"),
            MockTransportBuilder::new().build(),
        );
        let metadata = f.metadata.with_version_mapping(Box::new(Fixed));

        assert_eq!(metadata.get_candidates(7, 2).unwrap(), vec![B.to_string()]);
    }

    #[tokio::test]
    async fn routes_with_noop_stats() {
        let registry = Arc::new(PartitionAssignmentRegistry::new());
        registry
            .set_assignment("store1_v1", vec![(0, HashSet::from([0]))].into_iter().collect())
            .unwrap();
        let address_book: StaticAddressBook = vec![(0, A.to_string())].into_iter().collect();
        let metadata = RegistryStoreMetadata::new(
            ClientConfig::new("store1"),
            registry,
            Arc::new(address_book),
            Arc::new(MockTransportBuilder::new().build()),
            Arc::new(NoopStats),
        )
        .unwrap();

        let replicas = metadata.get_replicas(1, 1, 0, 1).unwrap();
        assert_eq!(replicas, vec![A.to_string()]);
        let status = metadata.send_request_to_instance(A, 1, 0).await.unwrap();
        assert_eq!(status, StatusCode::OK);

        let health = metadata.get_instance_health_monitor().snapshot();
        assert_eq!(health.len(), 1);
        assert_eq!(health[0].instance, A);
        assert_eq!(health[0].pending_requests, 0);
    }

    #[test]
    fn invalid_config_is_rejected() {
        let registry = Arc::new(PartitionAssignmentRegistry::new());
        let err = RegistryStoreMetadata::new(
            ClientConfig::new(""),
            registry,
            Arc::new(StaticAddressBook::new()),
            Arc::new(MockTransportBuilder::new().build()),
            Arc::new(InMemoryStats::new()),
        )
        .err()
        .unwrap();

        assert!(matches!(err, Error::InvalidConfig { .. }));
    }
}
