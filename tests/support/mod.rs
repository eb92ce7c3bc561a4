#![allow(dead_code)]

use std::sync::Arc;

use distsampler::config::RpcConfig;
use distsampler::{
    ClusterHandle, DistContext, DistNeighborSampler, FullGraph, InProcessNetwork,
    LocalFeatureView, LocalGraphView, LocalStore, NodeId, PartitionBook, PartitionId,
    SampledSubgraph, SamplerConfig, Timestamp,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHashMap;

pub const GROUP: &str = "test-group";
pub const TIME_ATTR: &str = "time";

/// Ten nodes split in two halves; every node but 5 and 0 has a single in-neighbor.
pub const EXAMPLE_OWNERS: [u32; 10] = [0, 0, 0, 0, 0, 1, 1, 1, 1, 1];
pub const EXAMPLE_ROW: [u64; 12] = [1, 2, 3, 4, 5, 0, 5, 6, 7, 8, 9, 0];
pub const EXAMPLE_COL: [u64; 12] = [0, 1, 2, 3, 4, 4, 9, 5, 6, 7, 8, 9];
pub const EXAMPLE_TIME: [Timestamp; 10] = [5, 0, 1, 3, 3, 4, 4, 4, 4, 4];

/// A graph together with its partitioning.
#[derive(Debug, Clone)]
pub struct TestGraph {
    pub owners: Vec<u32>,
    pub row: Vec<u64>,
    pub col: Vec<u64>,
    pub time: Vec<Timestamp>,
}

impl TestGraph {
    pub fn example() -> Self {
        Self {
            owners: EXAMPLE_OWNERS.to_vec(),
            row: EXAMPLE_ROW.to_vec(),
            col: EXAMPLE_COL.to_vec(),
            time: EXAMPLE_TIME.to_vec(),
        }
    }

    /// Seeded random graph with `num_nodes` nodes spread over `num_partitions`.
    pub fn random(seed: u64, num_nodes: usize, num_edges: usize, num_partitions: u32) -> Self {
        let mut rng = StdRng::seed_from_u64(seed);
        let owners = (0..num_nodes)
            .map(|_| rng.random_range(0..num_partitions))
            .collect();
        let mut row = Vec::with_capacity(num_edges);
        let mut col = Vec::with_capacity(num_edges);
        for _ in 0..num_edges {
            row.push(rng.random_range(0..num_nodes as u64));
            col.push(rng.random_range(0..num_nodes as u64));
        }
        let time = (0..num_nodes).map(|_| rng.random_range(0..20)).collect();
        Self {
            owners,
            row,
            col,
            time,
        }
    }

    pub fn num_nodes(&self) -> usize {
        self.owners.len()
    }

    pub fn num_partitions(&self) -> u32 {
        self.owners.iter().copied().max().map_or(1, |max| max + 1)
    }

    pub fn book(&self) -> Arc<PartitionBook> {
        Arc::new(PartitionBook::from_raw(&self.owners))
    }

    /// Breadth-first expansion that keeps every in-neighbor, in edge order.
    ///
    /// Written against the raw edge lists so it shares nothing with the sampler.
    pub fn expand_all(&self, seeds: &[u64], num_hops: usize, disjoint: bool) -> SampledSubgraph {
        let mut in_edges: Vec<Vec<u64>> = vec![Vec::new(); self.num_nodes()];
        for (&src, &dst) in self.row.iter().zip(&self.col) {
            in_edges[dst as usize].push(src);
        }

        let mut node = Vec::new();
        let mut batch = Vec::new();
        let mut seen: FxHashMap<(usize, u64), usize> = FxHashMap::default();
        let mut frontier = Vec::new();
        for (i, &seed) in seeds.iter().enumerate() {
            let key = (if disjoint { i } else { 0 }, seed);
            if seen.contains_key(&key) {
                continue;
            }
            seen.insert(key, node.len());
            frontier.push(node.len());
            node.push(seed);
            batch.push(key.0);
        }

        let mut out = SampledSubgraph {
            num_sampled_nodes: vec![node.len()],
            ..SampledSubgraph::default()
        };
        for _ in 0..num_hops {
            let mut next = Vec::new();
            let edges_before = out.row.len();
            for &target in &frontier {
                let (b, dst) = (batch[target], node[target]);
                for &src in &in_edges[dst as usize] {
                    let position = *seen.entry((b, src)).or_insert_with(|| {
                        next.push(node.len());
                        node.push(src);
                        batch.push(b);
                        node.len() - 1
                    });
                    out.row.push(position);
                    out.col.push(target);
                }
            }
            out.num_sampled_nodes.push(next.len());
            out.num_sampled_edges.push(out.row.len() - edges_before);
            frontier = next;
        }

        out.node = node.into_iter().map(NodeId).collect();
        out.batch = disjoint.then_some(batch);
        out
    }

    pub fn full_graph(&self) -> FullGraph {
        FullGraph::new(
            self.num_nodes(),
            &self.row,
            &self.col,
            Some((TIME_ATTR, self.time.as_slice())),
        )
        .expect("full graph")
    }

    /// Store of one partition: complete in-edges of its nodes, plus one halo edge
    /// into a foreign node that sampling must ignore.
    pub fn store(&self, partition: u32) -> LocalStore {
        let book = self.book();
        let mut row = Vec::new();
        let mut col = Vec::new();
        let mut halo = None;
        for (&src, &dst) in self.row.iter().zip(&self.col) {
            if self.owners[dst as usize] == partition {
                row.push(src);
                col.push(dst);
            } else if halo.is_none() {
                halo = Some((src, dst));
            }
        }
        if let Some((src, dst)) = halo {
            row.push(src);
            col.push(dst);
        }
        let graph = LocalGraphView::from_raw(&row, &col, false).expect("graph view");

        let mut features = LocalFeatureView::new();
        features
            .put_time_vector(TIME_ATTR, &self.time)
            .expect("time attribute");
        let owned = book.nodes_of(PartitionId(partition));
        let rows = owned.iter().map(|node| feature_row(*node)).collect();
        features.put_tensor("x", &owned, rows).expect("features");

        LocalStore::new(PartitionId(partition), book, graph, features)
    }
}

/// Feature row stored for `node`.
pub fn feature_row(node: NodeId) -> Vec<f32> {
    vec![node.0 as f32, node.0 as f32 * 0.5]
}

pub fn rpc_config(timeout_ms: u64) -> RpcConfig {
    RpcConfig {
        timeout_ms,
        ..RpcConfig::default()
    }
}

/// One worker joined to `network`, registered but without a running event loop.
pub fn build_worker(
    graph: &TestGraph,
    rank: u32,
    world_size: u32,
    network: &InProcessNetwork,
    config: SamplerConfig,
    rpc: &RpcConfig,
) -> DistNeighborSampler {
    let ctx = DistContext::new(rank, world_size, GROUP);
    let cluster = ClusterHandle::open(ctx, network.clone(), rpc.request_queue_capacity);
    let sampler =
        DistNeighborSampler::new(graph.store(rank), cluster, config, rpc).expect("sampler");
    sampler.register_sampler_rpc().expect("register");
    sampler
}

/// A running worker per partition of `graph`.
pub fn spawn_cluster(graph: &TestGraph, config: SamplerConfig) -> Vec<DistNeighborSampler> {
    spawn_cluster_on(graph, config, &InProcessNetwork::new())
}

/// Like [`spawn_cluster`], joined to a caller-owned `network`.
pub fn spawn_cluster_on(
    graph: &TestGraph,
    config: SamplerConfig,
    network: &InProcessNetwork,
) -> Vec<DistNeighborSampler> {
    let world_size = graph.num_partitions();
    let rpc = rpc_config(5_000);
    (0..world_size)
        .map(|rank| {
            let sampler = build_worker(graph, rank, world_size, network, config.clone(), &rpc);
            sampler.init_event_loop().expect("event loop");
            sampler
        })
        .collect()
}

pub fn shutdown(workers: &[DistNeighborSampler]) {
    for worker in workers {
        worker.close();
    }
}

/// Invariants every sampled subgraph satisfies.
pub fn assert_well_formed(out: &SampledSubgraph, num_hops: usize) {
    assert_eq!(out.num_sampled_nodes.len(), num_hops + 1);
    assert_eq!(out.num_sampled_edges.len(), num_hops);
    assert_eq!(out.num_sampled_nodes.iter().sum::<usize>(), out.node.len());
    assert_eq!(out.num_sampled_edges.iter().sum::<usize>(), out.row.len());
    assert_eq!(out.row.len(), out.col.len());
    for (&r, &c) in out.row.iter().zip(&out.col) {
        assert!(r < out.node.len() && c < out.node.len());
    }
    if let Some(batch) = &out.batch {
        assert_eq!(batch.len(), out.node.len());
        for (&r, &c) in out.row.iter().zip(&out.col) {
            assert_eq!(batch[r], batch[c], "edge crosses batches");
        }
    }
}
