//! This module defines the errors that can be returned by the registry, the health monitor
//! and the store metadata facade.

use std::fmt::Display;

use serde::Serialize;

use crate::assignment::{NodeId, PartitionId};

pub type Result<T> = std::result::Result<T, Error>;

/// Error enum with all possible variants
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum Error {
    /// The registry holds no assignment for this dataset
    DatasetNotFound { dataset: String },
    /// The node serves no partition of any dataset
    NodeNotFound { node: NodeId },
    /// The dataset is known but no node serves this partition
    PartitionNotFound {
        dataset: String,
        partition: PartitionId,
    },
    /// No dataset is known for the given store version
    VersionNotFound { version: u32 },
    /// A write was issued with an input that can't be applied
    InvalidArgument { reason: String },
    /// The transport failed or the request timed out
    RequestFailed { endpoint: String, reason: String },
    InvalidConfig {
        reason: String,
    },
    Io {
        reason: String,
    },
    Logic {
        reason: String,
    },
}

impl Error {
    /// Returns true for every variant that means "nothing is assigned here"
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::DatasetNotFound { .. }
                | Error::NodeNotFound { .. }
                | Error::PartitionNotFound { .. }
                | Error::VersionNotFound { .. }
        )
    }
}

impl Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl std::error::Error for Error {}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            reason: err.to_string(),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Self::InvalidConfig {
            reason: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn not_found_variants() {
        assert!(Error::DatasetNotFound {
            dataset: "store1".to_string()
        }
        .is_not_found());
        assert!(Error::NodeNotFound { node: 1 }.is_not_found());
        assert!(Error::PartitionNotFound {
            dataset: "store1".to_string(),
            partition: 3
        }
        .is_not_found());
        assert!(!Error::InvalidArgument {
            reason: "empty".to_string()
        }
        .is_not_found());
        assert!(!Error::RequestFailed {
            endpoint: "http://a:1".to_string(),
            reason: "timeout".to_string()
        }
        .is_not_found());
    }
}
