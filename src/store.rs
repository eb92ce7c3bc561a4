//! # Store Module
//!
//! Per-partition graph and feature storage, and the [`LocalStore`] adapter the
//! sampling engine reads through. Everything here is read-only once a worker starts.

use crate::error::{Result, SamplerError};
use crate::model::{NodeId, PartitionId, Timestamp};
use crate::neighbor::{self, Candidate, Selection};
use crate::partition::PartitionBook;
use crate::rpc::{HopOptions, SampleResponse};
use rand::rngs::StdRng;
use rand::SeedableRng;
use rustc_hash::{FxHashMap, FxHasher};
use std::hash::{Hash, Hasher};
use std::ops::Range;
use std::sync::Arc;

/// Edge storage of one partition.
pub trait GraphStorage: Send + Sync {
    /// Edges `(row = source, col = destination)` whose destination is in `ids`,
    /// grouped per id in the order of `ids`, adjacency order within a group.
    fn get_edges_for_destinations(&self, ids: &[NodeId]) -> (Vec<NodeId>, Vec<NodeId>);

    fn num_edges(&self) -> usize;
}

/// Node attribute storage of one partition.
pub trait FeatureStorage: Send + Sync {
    fn has_attribute(&self, attr: &str) -> bool;

    fn get_attribute(&self, ids: &[NodeId], attr: &str) -> Vec<Option<Vec<f32>>>;

    fn has_time_attribute(&self, attr: &str) -> bool;

    fn get_time_attribute(&self, ids: &[NodeId], attr: &str) -> Vec<Option<Timestamp>>;
}

/// Edge list sorted ascending by destination.
#[derive(Debug, Clone, Default)]
pub struct LocalGraphView {
    row: Vec<NodeId>,
    col: Vec<NodeId>,
}

impl LocalGraphView {
    /// Build from parallel source/destination arrays.
    ///
    /// Input flagged as sorted is verified, anything else is stably sorted by
    /// destination so the adjacency order inside one destination is preserved.
    pub fn from_edges(row: Vec<NodeId>, col: Vec<NodeId>, is_sorted: bool) -> Result<Self> {
        if row.len() != col.len() {
            return Err(SamplerError::invalid_config(format!(
                "edge_index rows differ in length: {} sources, {} destinations",
                row.len(),
                col.len()
            )));
        }
        if is_sorted {
            if let Some(pos) = col.windows(2).position(|w| w[0] > w[1]) {
                return Err(SamplerError::invalid_config(format!(
                    "edge_index is not sorted by destination at edge {}",
                    pos + 1
                )));
            }
            return Ok(Self { row, col });
        }

        let mut perm: Vec<usize> = (0..col.len()).collect();
        perm.sort_by_key(|&i| col[i]);
        Ok(Self {
            row: perm.iter().map(|&i| row[i]).collect(),
            col: perm.iter().map(|&i| col[i]).collect(),
        })
    }

    pub fn from_raw(row: &[u64], col: &[u64], is_sorted: bool) -> Result<Self> {
        Self::from_edges(
            row.iter().copied().map(NodeId).collect(),
            col.iter().copied().map(NodeId).collect(),
            is_sorted,
        )
    }

    fn range(&self, dst: NodeId) -> Range<usize> {
        let start = self.col.partition_point(|&c| c < dst);
        let end = self.col.partition_point(|&c| c <= dst);
        start..end
    }

    /// In-neighbors of `dst` in adjacency order.
    pub fn neighbors(&self, dst: NodeId) -> &[NodeId] {
        &self.row[self.range(dst)]
    }
}

impl GraphStorage for LocalGraphView {
    fn get_edges_for_destinations(&self, ids: &[NodeId]) -> (Vec<NodeId>, Vec<NodeId>) {
        let mut row = Vec::new();
        let mut col = Vec::new();
        for &id in ids {
            let range = self.range(id);
            row.extend_from_slice(&self.row[range.clone()]);
            col.extend_from_slice(&self.col[range]);
        }
        (row, col)
    }

    fn num_edges(&self) -> usize {
        self.row.len()
    }
}

/// Feature rows and time attributes keyed by node id.
#[derive(Debug, Clone, Default)]
pub struct LocalFeatureView {
    features: FxHashMap<String, FxHashMap<NodeId, Vec<f32>>>,
    times: FxHashMap<String, FxHashMap<NodeId, Timestamp>>,
}

impl LocalFeatureView {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put_tensor(&mut self, attr: &str, ids: &[NodeId], rows: Vec<Vec<f32>>) -> Result<()> {
        if ids.len() != rows.len() {
            return Err(SamplerError::invalid_config(format!(
                "attribute '{attr}': {} ids for {} rows",
                ids.len(),
                rows.len()
            )));
        }
        let column = self.features.entry(attr.to_string()).or_default();
        column.extend(ids.iter().copied().zip(rows));
        Ok(())
    }

    pub fn put_time(&mut self, attr: &str, ids: &[NodeId], values: &[Timestamp]) -> Result<()> {
        if ids.len() != values.len() {
            return Err(SamplerError::invalid_config(format!(
                "time attribute '{attr}': {} ids for {} values",
                ids.len(),
                values.len()
            )));
        }
        let column = self.times.entry(attr.to_string()).or_default();
        column.extend(ids.iter().copied().zip(values.iter().copied()));
        Ok(())
    }

    /// Register a time vector covering nodes `0..values.len()`.
    pub fn put_time_vector(&mut self, attr: &str, values: &[Timestamp]) -> Result<()> {
        let ids: Vec<NodeId> = (0..values.len() as u64).map(NodeId).collect();
        self.put_time(attr, &ids, values)
    }
}

impl FeatureStorage for LocalFeatureView {
    fn has_attribute(&self, attr: &str) -> bool {
        self.features.contains_key(attr)
    }

    fn get_attribute(&self, ids: &[NodeId], attr: &str) -> Vec<Option<Vec<f32>>> {
        let column = self.features.get(attr);
        ids.iter()
            .map(|id| column.and_then(|c| c.get(id)).cloned())
            .collect()
    }

    fn has_time_attribute(&self, attr: &str) -> bool {
        self.times.contains_key(attr)
    }

    fn get_time_attribute(&self, ids: &[NodeId], attr: &str) -> Vec<Option<Timestamp>> {
        let column = self.times.get(attr);
        ids.iter()
            .map(|id| column.and_then(|c| c.get(id)).copied())
            .collect()
    }
}

/// Read-only view of one partition used by the sampling engine.
pub struct LocalStore {
    partition: PartitionId,
    book: Arc<PartitionBook>,
    graph: Box<dyn GraphStorage>,
    features: Box<dyn FeatureStorage>,
}

impl LocalStore {
    pub fn new<G, F>(partition: PartitionId, book: Arc<PartitionBook>, graph: G, features: F) -> Self
    where
        G: GraphStorage + 'static,
        F: FeatureStorage + 'static,
    {
        Self {
            partition,
            book,
            graph: Box::new(graph),
            features: Box::new(features),
        }
    }

    pub fn partition(&self) -> PartitionId {
        self.partition
    }

    pub fn book(&self) -> &Arc<PartitionBook> {
        &self.book
    }

    pub fn is_local(&self, node: NodeId) -> bool {
        self.book.is_owned_by(node, self.partition)
    }

    /// Edges into the locally owned members of `ids`. Other ids contribute nothing.
    pub fn local_neighbors(&self, ids: &[NodeId]) -> (Vec<NodeId>, Vec<NodeId>) {
        let owned: Vec<NodeId> = ids.iter().copied().filter(|&id| self.is_local(id)).collect();
        self.graph.get_edges_for_destinations(&owned)
    }

    pub fn feature(&self, ids: &[NodeId], attr: &str) -> Result<Vec<Vec<f32>>> {
        if !self.features.has_attribute(attr) {
            return Err(SamplerError::missing_attribute(attr, self.partition, "never registered"));
        }
        self.features
            .get_attribute(ids, attr)
            .into_iter()
            .zip(ids)
            .map(|(row, id)| {
                row.ok_or_else(|| {
                    SamplerError::missing_attribute(attr, self.partition, format!("no value for node {id}"))
                })
            })
            .collect()
    }

    /// Stored times of `ids`, `None` where a node has no value.
    pub fn stored_times(&self, ids: &[NodeId], attr: &str) -> Result<Vec<Option<Timestamp>>> {
        if !self.features.has_time_attribute(attr) {
            return Err(SamplerError::missing_attribute(attr, self.partition, "never registered"));
        }
        Ok(self.features.get_time_attribute(ids, attr))
    }

    pub fn timestamp(&self, ids: &[NodeId], attr: &str) -> Result<Vec<Timestamp>> {
        self.stored_times(ids, attr)?
            .into_iter()
            .zip(ids)
            .map(|(time, id)| {
                time.ok_or_else(|| {
                    SamplerError::missing_attribute(attr, self.partition, format!("no value for node {id}"))
                })
            })
            .collect()
    }

    fn candidates(&self, node: NodeId, time_attr: Option<&str>) -> Result<Vec<Candidate>> {
        let (row, _) = self.local_neighbors(&[node]);
        match time_attr {
            None => Ok(row.into_iter().map(Candidate::new).collect()),
            Some(attr) => {
                let times = self.timestamp(&row, attr)?;
                Ok(row
                    .into_iter()
                    .zip(times)
                    .map(|(node, time)| Candidate::timed(node, time))
                    .collect())
            }
        }
    }

    /// Expand locally owned `nodes` by one hop.
    ///
    /// `times` carries the effective time of every node for temporal sampling.
    /// Nodes owned elsewhere yield zero neighbors. Each node draws from its own
    /// generator keyed on the hop seed, the node and its batch, so the result does
    /// not depend on how the frontier was split across partitions.
    pub fn expand(
        &self,
        nodes: &[NodeId],
        times: Option<&[Timestamp]>,
        batch: Option<&[usize]>,
        options: &HopOptions,
    ) -> Result<SampleResponse> {
        let temporal = options.time_attr.is_some();
        if temporal && times.map_or(true, |t| t.len() != nodes.len()) {
            return Err(SamplerError::invalid_config(
                "temporal expansion needs one effective time per node",
            ));
        }
        if let Some(batch) = batch.filter(|b| b.len() != nodes.len()) {
            return Err(SamplerError::invalid_config(format!(
                "{} batch entries for {} nodes",
                batch.len(),
                nodes.len()
            )));
        }

        let mut response = SampleResponse::with_capacity(nodes.len(), temporal);
        for (i, &node) in nodes.iter().enumerate() {
            let picked = if self.is_local(node) {
                let selection = Selection {
                    count: options.num_neighbors,
                    strategy: options.strategy,
                    time_bound: times.map(|t| t[i]),
                    shuffle: options.shuffle,
                };
                let candidates = self.candidates(node, options.time_attr.as_deref())?;
                let mut rng = node_rng(options.rng_seed, node, batch.map(|b| b[i]));
                neighbor::select(candidates, selection, &mut rng)
            } else {
                Vec::new()
            };
            response.push(&picked);
        }
        Ok(response)
    }
}

fn node_rng(seed: u64, node: NodeId, batch: Option<usize>) -> StdRng {
    let mut hasher = FxHasher::default();
    (seed, node, batch).hash(&mut hasher);
    StdRng::seed_from_u64(hasher.finish())
}
