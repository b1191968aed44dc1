//! Module that contains the partition assignment registry.
//!
//! An assignment is the fact that node N serves partition P of dataset D. The registry
//! keeps that relation queryable from three directions (see [`registry::PartitionAssignmentRegistry`]).
use std::collections::{HashMap, HashSet};

pub mod registry;

/// Identifier of a serving node as known by the topology feed
pub type NodeId = u32;

/// Identifier of a partition, unique within a dataset's partitioning scheme
pub type PartitionId = u32;

/// Full assignment for a single dataset: which partitions each node serves
pub type NodeAssignments = HashMap<NodeId, HashSet<PartitionId>>;

/// Reverse view for a single node: which partitions it serves for each dataset
pub type DatasetAssignments = HashMap<String, HashSet<PartitionId>>;
