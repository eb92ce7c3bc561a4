//! Single-process sampler over the whole graph.
//!
//! Runs the same hop loop as the distributed engine against one partition that owns
//! every node. Used to check the distributed output.

use crate::config::SamplerConfig;
use crate::error::Result;
use crate::merge::SubgraphBuilder;
use crate::model::{NodeId, PartitionId, SampledSubgraph, SeedBatch, Timestamp};
use crate::partition::PartitionBook;
use crate::sampler::{hop_options, prepare_session};
use crate::store::{LocalFeatureView, LocalGraphView, LocalStore};
use std::sync::Arc;

/// The complete graph held in one place.
pub struct FullGraph {
    store: LocalStore,
}

impl FullGraph {
    /// `row[i] -> col[i]` for every edge. `time` gives one timestamp per node under
    /// `time_attr`.
    pub fn new(
        num_nodes: usize,
        row: &[u64],
        col: &[u64],
        time: Option<(&str, &[Timestamp])>,
    ) -> Result<Self> {
        let book = Arc::new(PartitionBook::new(vec![PartitionId(0); num_nodes]));
        let graph = LocalGraphView::from_raw(row, col, false)?;
        let mut features = LocalFeatureView::new();
        if let Some((attr, values)) = time {
            features.put_time_vector(attr, values)?;
        }
        Ok(Self {
            store: LocalStore::new(PartitionId(0), book, graph, features),
        })
    }

    pub fn num_nodes(&self) -> usize {
        self.store.book().num_nodes()
    }

    pub fn neighbors(&self, node: NodeId) -> Vec<NodeId> {
        self.store.local_neighbors(&[node]).0
    }
}

/// Sample `seeds` with `config` on the full graph.
pub fn centralized_sample(
    graph: &FullGraph,
    seeds: &SeedBatch,
    config: &SamplerConfig,
) -> Result<SampledSubgraph> {
    let store = &graph.store;
    let (mut rng, seed_times) = prepare_session(store, seeds, config)?;

    let mut builder = SubgraphBuilder::new(config.disjoint);
    let mut frontier = builder.seed(&seeds.nodes, seed_times.as_deref());
    for hop in 0..config.num_hops() {
        if frontier.is_empty() {
            builder.skip_hop();
            continue;
        }
        let options = hop_options(config, hop, &mut rng);
        let nodes: Vec<NodeId> = frontier.iter().map(|e| e.node).collect();
        let times: Option<Vec<Timestamp>> = frontier.iter().map(|e| e.time).collect();
        let batch: Option<Vec<usize>> = frontier.iter().map(|e| e.batch).collect();
        let response = store.expand(&nodes, times.as_deref(), batch.as_deref(), &options)?;
        frontier = builder.merge_hop(&frontier, response.into_per_node());
    }

    let mut out = builder.finish();
    out.input_id = seeds.input_id.clone();
    out.seed_time = seed_times;
    Ok(out)
}
