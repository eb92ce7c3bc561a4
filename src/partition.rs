//! # Partition Directory
//!
//! Static mapping from global node id to the partition that owns it.

use crate::error::{Result, SamplerError};
use crate::model::{NodeId, PartitionId};
use serde::{Deserialize, Serialize};

/// Where a frontier node gets expanded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    Local,
    Remote(PartitionId),
}

/// Node to partition assignment, immutable for the lifetime of a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PartitionBook {
    owners: Vec<PartitionId>,
    num_partitions: usize,
}

impl PartitionBook {
    /// Build from a per-node assignment vector, `assignment[i]` owning node `i`.
    pub fn new(assignment: Vec<PartitionId>) -> Self {
        let num_partitions = assignment
            .iter()
            .map(|p| p.0 as usize + 1)
            .max()
            .unwrap_or(0);
        Self {
            owners: assignment,
            num_partitions,
        }
    }

    pub fn from_raw(assignment: &[u32]) -> Self {
        Self::new(assignment.iter().copied().map(PartitionId).collect())
    }

    pub fn num_nodes(&self) -> usize {
        self.owners.len()
    }

    pub fn num_partitions(&self) -> usize {
        self.num_partitions
    }

    pub fn owner(&self, node: NodeId) -> Result<PartitionId> {
        self.owners
            .get(node.index())
            .copied()
            .ok_or(SamplerError::UnknownNode {
                node,
                num_nodes: self.owners.len(),
            })
    }

    pub fn is_owned_by(&self, node: NodeId, partition: PartitionId) -> bool {
        self.owners.get(node.index()) == Some(&partition)
    }

    /// Resolve how `node` is expanded when sampling on partition `local`.
    pub fn route(&self, node: NodeId, local: PartitionId) -> Result<Route> {
        let owner = self.owner(node)?;
        Ok(if owner == local {
            Route::Local
        } else {
            Route::Remote(owner)
        })
    }

    /// All nodes owned by `partition`, ascending.
    pub fn nodes_of(&self, partition: PartitionId) -> Vec<NodeId> {
        self.owners
            .iter()
            .enumerate()
            .filter(|(_, owner)| **owner == partition)
            .map(|(idx, _)| NodeId(idx as u64))
            .collect()
    }
}
