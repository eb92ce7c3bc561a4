//! End-to-end sampling over in-process clusters.
//!
//! Tests cover:
//! - The two-partition example graph, homogeneous and temporal
//! - Equivalence with the centralized sampler on random three-partition graphs
//! - Causality, batch isolation and count consistency of every output
//! - Full expansion against a breadth-first walk of the raw edge lists
//! - Remote call accounting, request forwarding and feature fetch across partitions

use distsampler::model::node_ids;
use distsampler::rpc::{HopOptions, RpcRequest, RpcResponse, SampleRequest, Transport};
use distsampler::{
    centralized_sample, ClusterHandle, DistContext, InProcessNetwork, NodeId, PartitionId,
    SamplerConfig, SamplerError, SeedBatch, SessionId, TemporalStrategy,
};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

mod support;

use support::{
    assert_well_formed, feature_row, shutdown, spawn_cluster, spawn_cluster_on, TestGraph, GROUP,
    TIME_ATTR,
};

fn homogeneous(num_neighbors: Vec<i64>, disjoint: bool) -> SamplerConfig {
    SamplerConfig::new(num_neighbors).disjoint(disjoint).seed(42)
}

fn temporal(num_neighbors: Vec<i64>, strategy: TemporalStrategy) -> SamplerConfig {
    SamplerConfig::new(num_neighbors)
        .disjoint(true)
        .temporal(TIME_ATTR, strategy)
        .seed(42)
}

#[test]
fn test_homogeneous_sample_from_rank_zero() {
    let graph = TestGraph::example();
    let workers = spawn_cluster(&graph, homogeneous(vec![-1, -1], false));

    let out = workers[0].sample(SeedBatch::from_raw(&[1, 6])).unwrap();
    assert_eq!(out.node, node_ids(&[1, 6, 2, 7, 3, 8]));
    assert_eq!(out.row, vec![2, 3, 4, 5]);
    assert_eq!(out.col, vec![0, 1, 2, 3]);
    assert_eq!(out.batch, None);
    assert_eq!(out.num_sampled_nodes, vec![2, 2, 2]);
    assert_eq!(out.num_sampled_edges, vec![2, 2]);

    let reference = centralized_sample(
        &graph.full_graph(),
        &SeedBatch::from_raw(&[1, 6]),
        workers[0].config(),
    )
    .unwrap();
    assert_eq!(out, reference);
    shutdown(&workers);
}

#[test]
fn test_homogeneous_sample_from_rank_one() {
    let graph = TestGraph::example();
    let workers = spawn_cluster(&graph, homogeneous(vec![-1, -1], false));

    let out = workers[1].sample(SeedBatch::from_raw(&[4, 9])).unwrap();
    assert_eq!(out.node, node_ids(&[4, 9, 5, 0, 6, 1]));
    assert_eq!(out.row, vec![2, 3, 2, 3, 4, 5]);
    assert_eq!(out.col, vec![0, 0, 1, 1, 2, 3]);
    assert_eq!(out.num_sampled_nodes, vec![2, 2, 2]);
    assert_eq!(out.num_sampled_edges, vec![4, 2]);
    assert_eq!(
        out.global_edges(),
        vec![
            (NodeId(5), NodeId(4)),
            (NodeId(0), NodeId(4)),
            (NodeId(5), NodeId(9)),
            (NodeId(0), NodeId(9)),
            (NodeId(6), NodeId(5)),
            (NodeId(1), NodeId(0)),
        ]
    );
    shutdown(&workers);
}

#[test]
fn test_disjoint_sample_keeps_batches_apart() {
    let graph = TestGraph::example();
    let workers = spawn_cluster(&graph, homogeneous(vec![-1, -1], true));

    let out = workers[1].sample(SeedBatch::from_raw(&[4, 9])).unwrap();
    assert_eq!(out.node, node_ids(&[4, 9, 5, 0, 5, 0, 6, 1, 6, 1]));
    assert_eq!(out.batch, Some(vec![0, 1, 0, 0, 1, 1, 0, 0, 1, 1]));
    assert_eq!(out.row, vec![2, 3, 4, 5, 6, 7, 8, 9]);
    assert_eq!(out.col, vec![0, 0, 1, 1, 2, 3, 4, 5]);
    assert_eq!(out.num_sampled_nodes, vec![2, 4, 4]);
    assert_well_formed(&out, 2);
    shutdown(&workers);
}

#[test]
fn test_temporal_last_without_seed_time() {
    let graph = TestGraph::example();
    let workers = spawn_cluster(&graph, temporal(vec![1, 1], TemporalStrategy::Last));

    let out = workers[0].sample(SeedBatch::from_raw(&[1, 6])).unwrap();
    // Node 1 has time 0 and its only neighbor is newer, so batch 0 stops at the seed.
    assert_eq!(out.node, node_ids(&[1, 6, 7, 8]));
    assert_eq!(out.batch, Some(vec![0, 1, 1, 1]));
    assert_eq!(out.row, vec![2, 3]);
    assert_eq!(out.col, vec![1, 2]);
    assert_eq!(out.num_sampled_nodes, vec![2, 1, 1]);
    assert_eq!(out.num_sampled_edges, vec![1, 1]);
    assert_eq!(out.seed_time, Some(vec![0, 4]));
    shutdown(&workers);
}

#[test]
fn test_temporal_last_with_seed_time() {
    let graph = TestGraph::example();
    let workers = spawn_cluster(&graph, temporal(vec![1, 1], TemporalStrategy::Last));

    let seeds = SeedBatch::from_raw(&[1, 6]).with_time(vec![3, 6]);
    let out = workers[0].sample(seeds).unwrap();
    assert_eq!(out.node, node_ids(&[1, 6, 2, 7, 3, 8]));
    assert_eq!(out.batch, Some(vec![0, 1, 0, 1, 0, 1]));
    assert_eq!(out.seed_time, Some(vec![3, 6]));
    assert_well_formed(&out, 2);
    shutdown(&workers);
}

#[test]
fn test_exhausted_frontier_pads_counts() {
    let graph = TestGraph::example();
    let workers = spawn_cluster(&graph, temporal(vec![1, 1, 1], TemporalStrategy::Last));

    let out = workers[0].sample(SeedBatch::from_raw(&[1])).unwrap();
    assert_eq!(out.node, node_ids(&[1]));
    assert_eq!(out.num_sampled_nodes, vec![1, 0, 0, 0]);
    assert_eq!(out.num_sampled_edges, vec![0, 0, 0]);
    assert_eq!(workers[0].remote_calls_issued(), 0);
    shutdown(&workers);
}

#[test]
fn test_input_id_is_passed_through() {
    let graph = TestGraph::example();
    let workers = spawn_cluster(&graph, homogeneous(vec![1], false));

    let seeds = SeedBatch::from_raw(&[3, 8]).with_input_id(vec![100, 101]);
    let out = workers[1].sample(seeds).unwrap();
    assert_eq!(out.input_id, Some(vec![100, 101]));
    assert_eq!(out.seed_time, None);
    shutdown(&workers);
}

#[test]
fn test_remote_calls_bounded_by_hops() {
    let graph = TestGraph::example();
    let workers = spawn_cluster(&graph, homogeneous(vec![-1, -1], false));

    workers[0].sample(SeedBatch::from_raw(&[1, 6])).unwrap();
    // One request per hop to the single peer.
    assert_eq!(workers[0].remote_calls_issued(), 2);
    assert_eq!(workers[1].remote_calls_issued(), 0);
    shutdown(&workers);
}

#[test]
fn test_randomized_equivalence_three_partitions() {
    let configs = vec![
        homogeneous(vec![3, 2], false),
        homogeneous(vec![2, 2, 2], true),
        homogeneous(vec![-1, 1], false).shuffle(true),
        temporal(vec![3, 3], TemporalStrategy::Uniform),
        temporal(vec![2, -1], TemporalStrategy::Last),
    ];

    for graph_seed in 0..4 {
        let graph = TestGraph::random(graph_seed, 60, 240, 3);
        let full = graph.full_graph();
        let workers = spawn_cluster(&graph, SamplerConfig::default());
        let mut rng = StdRng::seed_from_u64(graph_seed + 100);

        for config in &configs {
            let nodes: Vec<u64> = (0..6).map(|_| rng.random_range(0..60)).collect();
            let seeds = SeedBatch::from_raw(&nodes);
            let reference = centralized_sample(&full, &seeds, config).unwrap();
            for worker in &workers {
                let out = worker.sample_with(seeds.clone(), config.clone()).unwrap();
                assert_eq!(out, reference, "graph {graph_seed}, config {config:?}");
                assert_well_formed(&out, config.num_hops());
            }
        }
        shutdown(&workers);
    }
}

#[test]
fn test_full_expansion_matches_breadth_first_walk() {
    let example = TestGraph::example();
    let workers = spawn_cluster(&example, SamplerConfig::default());
    let out = workers[1]
        .sample_with(SeedBatch::from_raw(&[4, 9]), homogeneous(vec![-1, -1], false))
        .unwrap();
    assert_eq!(out, example.expand_all(&[4, 9], 2, false));
    shutdown(&workers);

    for graph_seed in 10..14 {
        let graph = TestGraph::random(graph_seed, 40, 120, 3);
        let workers = spawn_cluster(&graph, SamplerConfig::default());
        let mut rng = StdRng::seed_from_u64(graph_seed);

        for disjoint in [false, true] {
            let nodes: Vec<u64> = (0..5).map(|_| rng.random_range(0..40)).collect();
            let expected = graph.expand_all(&nodes, 3, disjoint);
            for worker in &workers {
                let out = worker
                    .sample_with(SeedBatch::from_raw(&nodes), homogeneous(vec![-1, -1, -1], disjoint))
                    .unwrap();
                assert_eq!(out, expected, "graph {graph_seed}, seeds {nodes:?}, disjoint {disjoint}");
            }
        }
        shutdown(&workers);
    }
}

#[test]
fn test_temporal_causality() {
    let graph = TestGraph::random(7, 80, 400, 3);
    let workers = spawn_cluster(&graph, SamplerConfig::default());

    for strategy in [TemporalStrategy::Uniform, TemporalStrategy::Last] {
        let config = temporal(vec![4, 4, 4], strategy);
        let seeds = SeedBatch::from_raw(&[0, 11, 23, 42, 57]).with_time(vec![19, 10, 5, 12, 0]);
        let out = workers[2].sample_with(seeds, config).unwrap();

        let seed_time = out.seed_time.clone().unwrap();
        let batch = out.batch.clone().unwrap();
        let num_seeds = out.num_sampled_nodes[0];
        for (position, node) in out.node.iter().enumerate().skip(num_seeds) {
            assert!(
                graph.time[node.index()] <= seed_time[batch[position]],
                "node {node} at {position} is newer than its seed"
            );
        }
    }
    shutdown(&workers);
}

#[test]
fn test_last_is_deterministic_without_rng_seed() {
    let graph = TestGraph::random(3, 50, 300, 3);
    let workers = spawn_cluster(&graph, SamplerConfig::default());
    let config = SamplerConfig::new(vec![2, 2])
        .disjoint(true)
        .temporal(TIME_ATTR, TemporalStrategy::Last);

    let seeds = SeedBatch::from_raw(&[1, 2, 3, 4]);
    let first = workers[0].sample_with(seeds.clone(), config.clone()).unwrap();
    let second = workers[1].sample_with(seeds, config).unwrap();
    assert_eq!(first, second);
    shutdown(&workers);
}

#[test]
fn test_concurrent_sessions_from_every_rank() {
    let graph = TestGraph::random(11, 60, 300, 3);
    let full = graph.full_graph();
    let workers = spawn_cluster(&graph, homogeneous(vec![3, 3], true));
    let seeds = SeedBatch::from_raw(&[5, 10, 15, 20]);

    let tasks: Vec<_> = workers
        .iter()
        .map(|worker| worker.submit(seeds.clone()).unwrap())
        .collect();
    let reference = centralized_sample(&full, &seeds, workers[0].config()).unwrap();
    for task in tasks {
        assert_eq!(task.wait().unwrap(), reference);
    }
    shutdown(&workers);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_sample_async() {
    let graph = TestGraph::example();
    let workers = spawn_cluster(&graph, homogeneous(vec![-1, -1], false));

    let out = workers[1].sample_async(SeedBatch::from_raw(&[4, 9])).await.unwrap();
    assert_eq!(out.node, node_ids(&[4, 9, 5, 0, 6, 1]));
    shutdown(&workers);
}

#[tokio::test(flavor = "multi_thread")]
async fn test_foreign_nodes_are_forwarded_to_their_owner() {
    let graph = TestGraph {
        owners: vec![0, 0, 0, 1, 1, 1, 2, 2, 2, 2],
        ..TestGraph::example()
    };
    let network = InProcessNetwork::new();
    let workers = spawn_cluster_on(&graph, homogeneous(vec![-1], false), &network);

    // Node 4 belongs to partition 1; nodes 7 and 9 belong to partition 2.
    let client = ClusterHandle::open(DistContext::new(0, 3, GROUP), network.clone(), 4);
    let request = SampleRequest {
        session: SessionId(0),
        hop: 0,
        nodes: node_ids(&[4, 7, 9]),
        times: None,
        batch: None,
        options: HopOptions {
            num_neighbors: -1,
            strategy: TemporalStrategy::Uniform,
            time_attr: None,
            shuffle: false,
            rng_seed: 0,
        },
    };
    let response = client.call(PartitionId(1), RpcRequest::Sample(request)).await.unwrap();
    let RpcResponse::Sample(response) = response else {
        panic!("expected a sample response, got {response:?}");
    };
    assert_eq!(response.nodes, node_ids(&[5, 0, 8, 5, 0]));
    assert_eq!(response.counts, vec![2, 1, 2]);

    // Partition 1 batched both foreign nodes into a single call.
    assert_eq!(workers[0].remote_calls_issued(), 0);
    assert_eq!(workers[1].remote_calls_issued(), 1);
    assert_eq!(workers[2].remote_calls_issued(), 0);
    shutdown(&workers);
}

#[test]
fn test_fetch_features_across_partitions() {
    let graph = TestGraph::example();
    let workers = spawn_cluster(&graph, homogeneous(vec![1], false));

    let ids = node_ids(&[9, 0, 5, 1]);
    let rows = workers[0].fetch_features(ids.clone(), "x").unwrap();
    let expected: Vec<Vec<f32>> = ids.iter().map(|&id| feature_row(id)).collect();
    assert_eq!(rows, expected);

    let err = workers[0].fetch_features(node_ids(&[7]), "y").unwrap_err();
    assert!(matches!(
        err,
        SamplerError::MissingAttribute { ref attr, .. } if attr == "y"
    ));
    shutdown(&workers);
}

#[test]
fn test_invalid_sessions_are_rejected() {
    let graph = TestGraph::example();
    let workers = spawn_cluster(&graph, homogeneous(vec![1, 1], false));

    let err = workers[0].sample(SeedBatch::from_raw(&[10])).unwrap_err();
    assert_eq!(
        err,
        SamplerError::UnknownNode {
            node: NodeId(10),
            num_nodes: 10
        }
    );

    let not_disjoint = SamplerConfig::new(vec![1]).temporal(TIME_ATTR, TemporalStrategy::Uniform);
    let err = workers[0]
        .sample_with(SeedBatch::from_raw(&[1]), not_disjoint)
        .unwrap_err();
    assert!(matches!(err, SamplerError::InvalidConfig(_)));

    let unregistered = SamplerConfig::new(vec![1])
        .disjoint(true)
        .temporal("ts", TemporalStrategy::Last);
    let err = workers[0]
        .sample_with(SeedBatch::from_raw(&[1]), unregistered)
        .unwrap_err();
    assert!(matches!(err, SamplerError::MissingAttribute { .. }));

    let err = workers[0]
        .sample(SeedBatch::from_raw(&[1]).with_time(vec![3]))
        .unwrap_err();
    assert!(matches!(err, SamplerError::InvalidConfig(_)));
    shutdown(&workers);
}
