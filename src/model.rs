//! # Data Model
//!
//! Identifiers, seed batches, frontier entries and the sampled subgraph handed back
//! to training pipelines.

use crate::error::{Result, SamplerError};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Node timestamps and seed times.
pub type Timestamp = i64;

/// Global node identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub u64);

impl NodeId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u64> for NodeId {
    fn from(value: u64) -> Self {
        NodeId(value)
    }
}

/// Index of a partition (and of the worker serving it)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PartitionId(pub u32);

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "P{}", self.0)
    }
}

/// Identifier of one sampling call on a worker's event loop
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S{}", self.0)
    }
}

/// Build a node id vector from raw ids.
pub fn node_ids(raw: &[u64]) -> Vec<NodeId> {
    raw.iter().copied().map(NodeId).collect()
}

/// Input of a sampling call.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeedBatch {
    pub nodes: Vec<NodeId>,
    /// Caller-side identifiers, passed through to the output untouched
    pub input_id: Option<Vec<i64>>,
    /// Per-seed time overrides, only valid for temporal sampling
    pub time: Option<Vec<Timestamp>>,
}

impl SeedBatch {
    pub fn new(nodes: Vec<NodeId>) -> Self {
        Self {
            nodes,
            input_id: None,
            time: None,
        }
    }

    pub fn from_raw(raw: &[u64]) -> Self {
        Self::new(node_ids(raw))
    }

    pub fn with_time(mut self, time: Vec<Timestamp>) -> Self {
        self.time = Some(time);
        self
    }

    pub fn with_input_id(mut self, input_id: Vec<i64>) -> Self {
        self.input_id = Some(input_id);
        self
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub(crate) fn validate(&self, temporal: bool) -> Result<()> {
        if let Some(input_id) = &self.input_id {
            if input_id.len() != self.nodes.len() {
                return Err(SamplerError::invalid_config(format!(
                    "input_id has {} entries for {} seeds",
                    input_id.len(),
                    self.nodes.len()
                )));
            }
        }
        if let Some(time) = &self.time {
            if !temporal {
                return Err(SamplerError::invalid_config(
                    "seed times were given but no time_attr is configured",
                ));
            }
            if time.len() != self.nodes.len() {
                return Err(SamplerError::invalid_config(format!(
                    "seed time has {} entries for {} seeds",
                    time.len(),
                    self.nodes.len()
                )));
            }
        }
        Ok(())
    }
}

/// One node due for expansion in the current hop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrontierEntry {
    pub node: NodeId,
    /// Position of the node in the output node sequence
    pub position: usize,
    pub batch: Option<usize>,
    pub time: Option<Timestamp>,
}

/// The sampled subgraph of one session.
///
/// Edge `i` runs from `node[row[i]]` (the sampled neighbor) to `node[col[i]]` (the
/// frontier node it was sampled for).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampledSubgraph {
    pub node: Vec<NodeId>,
    pub row: Vec<usize>,
    pub col: Vec<usize>,
    pub batch: Option<Vec<usize>>,
    pub num_sampled_nodes: Vec<usize>,
    pub num_sampled_edges: Vec<usize>,
    pub input_id: Option<Vec<i64>>,
    pub seed_time: Option<Vec<Timestamp>>,
}

impl SampledSubgraph {
    pub fn num_nodes(&self) -> usize {
        self.node.len()
    }

    pub fn num_edges(&self) -> usize {
        self.row.len()
    }

    /// Sampled edges as global `(source, destination)` pairs.
    pub fn global_edges(&self) -> Vec<(NodeId, NodeId)> {
        self.row
            .iter()
            .zip(&self.col)
            .map(|(&src, &dst)| (self.node[src], self.node[dst]))
            .collect()
    }
}
