//! This file contains the [`PartitionAssignmentRegistry`].
//!
//! The registry holds three views over the same set of (dataset, node, partition) triples:
//!  1. dataset -> node -> partitions
//!  2. node -> dataset -> partitions
//!  3. dataset -> partition -> nodes
//!
//! Readers never observe a write halfway through. All three views live inside a single
//! immutable [`Indexes`] value published behind an [`Arc`]. A writer takes a shallow copy of the
//! current value, applies its change to all three views and swaps the new value in. Readers either
//! see the whole write or none of it. Maps of datasets and nodes untouched by a write are shared
//! between the old and the new value.
//!
//! Writers are serialized registry-wide (not per dataset) so that pruning the node view during
//! a delete can never race with another writer touching the same nodes.
use std::{
    collections::{hash_map::Entry, HashMap, HashSet},
    sync::{Arc, Mutex, MutexGuard, RwLock},
};

use tracing::{event, instrument, Level};

use super::{DatasetAssignments, NodeAssignments, NodeId, PartitionId};
use crate::error::{Error, Result};

type PartitionNodes = HashMap<PartitionId, HashSet<NodeId>>;

/// Every inner map sits behind its own [`Arc`]. Cloning [`Indexes`] only bumps reference counts
/// and a write copies (through [`Arc::make_mut`]) just the maps of the dataset and nodes it touches.
#[derive(Clone, Debug, Default)]
struct Indexes {
    dataset_to_node_partitions: HashMap<String, Arc<NodeAssignments>>,
    node_to_dataset_partitions: HashMap<NodeId, Arc<DatasetAssignments>>,
    dataset_to_partition_nodes: HashMap<String, Arc<PartitionNodes>>,
}

impl Indexes {
    /// Drops every trace of `dataset`. Nodes left without any dataset are dropped too.
    fn remove_dataset(&mut self, dataset: &str) {
        if let Some(previous) = self.dataset_to_node_partitions.remove(dataset) {
            for node in previous.keys() {
                if let Entry::Occupied(mut entry) = self.node_to_dataset_partitions.entry(*node) {
                    Arc::make_mut(entry.get_mut()).remove(dataset);
                    if entry.get().is_empty() {
                        entry.remove();
                    }
                }
            }
        }

        self.dataset_to_partition_nodes.remove(dataset);
    }

    fn register_dataset(&mut self, dataset: &str) {
        self.dataset_to_node_partitions
            .entry(dataset.to_string())
            .or_default();
        self.dataset_to_partition_nodes
            .entry(dataset.to_string())
            .or_default();
    }

    /// Records `node` as part of `dataset` without any partition
    fn register_node(&mut self, dataset: &str, node: NodeId) {
        Arc::make_mut(
            self.dataset_to_node_partitions
                .entry(dataset.to_string())
                .or_default(),
        )
        .entry(node)
        .or_default();
        Arc::make_mut(self.node_to_dataset_partitions.entry(node).or_default())
            .entry(dataset.to_string())
            .or_default();
    }

    fn insert(&mut self, dataset: &str, node: NodeId, partition: PartitionId) {
        Arc::make_mut(
            self.dataset_to_node_partitions
                .entry(dataset.to_string())
                .or_default(),
        )
        .entry(node)
        .or_default()
        .insert(partition);

        Arc::make_mut(self.node_to_dataset_partitions.entry(node).or_default())
            .entry(dataset.to_string())
            .or_default()
            .insert(partition);

        Arc::make_mut(
            self.dataset_to_partition_nodes
                .entry(dataset.to_string())
                .or_default(),
        )
        .entry(partition)
        .or_default()
        .insert(node);
    }

    fn contains(&self, dataset: &str, node: NodeId, partition: PartitionId) -> bool {
        self.dataset_to_node_partitions
            .get(dataset)
            .and_then(|nodes| nodes.get(&node))
            .map_or(false, |partitions| partitions.contains(&partition))
    }
}

/// The registry of partition to node assignments for every dataset.
///
/// A single instance is constructed at service start and shared (usually through an [`Arc`])
/// between the topology feed, which writes, and request handlers, which read.
#[derive(Debug, Default)]
pub struct PartitionAssignmentRegistry {
    /// Held for the entire duration of any write
    writer: Mutex<()>,
    /// Latest published indexes
    current: RwLock<Arc<Indexes>>,
}

impl PartitionAssignmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire_writer(&self) -> Result<MutexGuard<()>> {
        self.writer.lock().map_err(|_| {
            event!(Level::ERROR, "assignment registry writer lock poisoned");
            Error::Logic {
                reason: "Unable to acquire registry writer lock - poisoned...".to_string(),
            }
        })
    }

    fn snapshot(&self) -> Result<Arc<Indexes>> {
        match self.current.read() {
            Ok(guard) => Ok(guard.clone()),
            Err(_) => {
                event!(Level::ERROR, "assignment registry indexes lock poisoned");
                Err(Error::Logic {
                    reason: "Unable to acquire registry read lock - poisoned...".to_string(),
                })
            }
        }
    }

    fn publish(&self, indexes: Indexes) -> Result<()> {
        let mut guard = self.current.write().map_err(|_| {
            event!(Level::ERROR, "assignment registry indexes lock poisoned");
            Error::Logic {
                reason: "Unable to acquire registry write lock - poisoned...".to_string(),
            }
        })?;
        *guard = Arc::new(indexes);
        Ok(())
    }

    fn validate_dataset(dataset: &str) -> Result<()> {
        if dataset.is_empty() {
            event!(Level::ERROR, "dataset name cannot be empty");
            return Err(Error::InvalidArgument {
                reason: "Dataset name cannot be empty".to_string(),
            });
        }

        Ok(())
    }

    /// Returns the partitions `node` serves for `dataset`.
    ///
    /// A node that doesn't participate in a known dataset gets an empty set.
    ///
    /// # Errors
    /// [`Error::DatasetNotFound`] if the dataset has no assignment
    pub fn get_partitions(&self, dataset: &str, node: NodeId) -> Result<HashSet<PartitionId>> {
        let indexes = self.snapshot()?;
        match indexes.dataset_to_node_partitions.get(dataset) {
            Some(nodes) => Ok(nodes.get(&node).cloned().unwrap_or_default()),
            None => {
                event!(
                    Level::ERROR,
                    "dataset {} does not exist (looked up for node {})",
                    dataset,
                    node
                );
                Err(Error::DatasetNotFound {
                    dataset: dataset.to_string(),
                })
            }
        }
    }

    /// Returns every node serving `dataset` with the partitions each of them owns
    pub fn get_node_assignments(&self, dataset: &str) -> Result<NodeAssignments> {
        let indexes = self.snapshot()?;
        indexes
            .dataset_to_node_partitions
            .get(dataset)
            .map(|nodes| NodeAssignments::clone(nodes))
            .ok_or_else(|| {
                event!(Level::ERROR, "dataset {} does not exist", dataset);
                Error::DatasetNotFound {
                    dataset: dataset.to_string(),
                }
            })
    }

    /// Returns every dataset `node` serves with the partitions it owns for each
    pub fn get_dataset_assignments(&self, node: NodeId) -> Result<DatasetAssignments> {
        let indexes = self.snapshot()?;
        indexes
            .node_to_dataset_partitions
            .get(&node)
            .map(|datasets| DatasetAssignments::clone(datasets))
            .ok_or_else(|| {
                event!(Level::ERROR, "node {} does not exist", node);
                Error::NodeNotFound { node }
            })
    }

    /// Returns the nodes serving `partition` of `dataset`.
    ///
    /// # Errors
    /// [`Error::DatasetNotFound`] if the dataset is unknown and [`Error::PartitionNotFound`]
    /// if the dataset is known but nobody serves this partition
    pub fn get_nodes_for_partition(
        &self,
        dataset: &str,
        partition: PartitionId,
    ) -> Result<HashSet<NodeId>> {
        let indexes = self.snapshot()?;
        let partitions = indexes
            .dataset_to_partition_nodes
            .get(dataset)
            .ok_or_else(|| {
                event!(Level::ERROR, "dataset {} does not exist", dataset);
                Error::DatasetNotFound {
                    dataset: dataset.to_string(),
                }
            })?;

        partitions.get(&partition).cloned().ok_or_else(|| {
            event!(
                Level::ERROR,
                "partition {} for dataset {} does not exist",
                partition,
                dataset
            );
            Error::PartitionNotFound {
                dataset: dataset.to_string(),
                partition,
            }
        })
    }

    /// Replaces the whole assignment of `dataset`.
    ///
    /// Nodes previously serving the dataset that are absent from `assignment` lose the dataset
    /// from their reverse view. Nodes mapped to an empty partition set are kept as is: they are
    /// part of the dataset but serve none of its partitions.
    #[instrument(level = "info", skip(self, assignment))]
    pub fn set_assignment(&self, dataset: &str, assignment: NodeAssignments) -> Result<()> {
        Self::validate_dataset(dataset)?;

        let _writer = self.acquire_writer()?;
        let current = self.snapshot()?;
        let mut next = Indexes::clone(&current);

        next.remove_dataset(dataset);
        next.register_dataset(dataset);
        for (node, partitions) in assignment {
            next.register_node(dataset, node);
            for partition in partitions {
                next.insert(dataset, node, partition);
            }
        }

        self.publish(next)?;
        event!(Level::DEBUG, "assignment for dataset {} replaced", dataset);
        Ok(())
    }

    /// Removes `dataset` from all views. Deleting an unknown dataset is a no-op.
    #[instrument(level = "info", skip(self))]
    pub fn delete_assignment(&self, dataset: &str) -> Result<()> {
        Self::validate_dataset(dataset)?;

        let _writer = self.acquire_writer()?;
        let current = self.snapshot()?;
        if !current.dataset_to_node_partitions.contains_key(dataset) {
            event!(Level::DEBUG, "dataset {} already absent", dataset);
            return Ok(());
        }

        let mut next = Indexes::clone(&current);
        next.remove_dataset(dataset);
        self.publish(next)
    }

    /// Records that `node` serves `partition` of `dataset`. Adding an existing triple is a no-op.
    #[instrument(level = "info", skip(self))]
    pub fn add_partition(&self, dataset: &str, node: NodeId, partition: PartitionId) -> Result<()> {
        Self::validate_dataset(dataset)?;

        let _writer = self.acquire_writer()?;
        let current = self.snapshot()?;
        if current.contains(dataset, node, partition) {
            return Ok(());
        }

        let mut next = Indexes::clone(&current);
        next.insert(dataset, node, partition);
        self.publish(next)
    }

    /// Names of every dataset with an assignment
    pub fn datasets(&self) -> Result<Vec<String>> {
        let indexes = self.snapshot()?;
        let mut datasets: Vec<String> = indexes.dataset_to_node_partitions.keys().cloned().collect();
        datasets.sort();
        Ok(datasets)
    }
}
