use std::sync::Arc;

use distsampler::config::{ClusterOverrides, ConfigOverrides, RpcOverrides, DEFAULT_TIME_ATTR};
use distsampler::{
    ClusterHandle, DistContext, DistNeighborSampler, InProcessNetwork, LocalFeatureView,
    LocalGraphView, LocalStore, NodeId, PartitionBook, PartitionId, SeedBatch, WorkerConfig,
};

const NUM_NODES: u64 = 10;
const ROW: [u64; 12] = [1, 2, 3, 4, 5, 0, 5, 6, 7, 8, 9, 0];
const COL: [u64; 12] = [0, 1, 2, 3, 4, 4, 9, 5, 6, 7, 8, 9];
const TIME: [i64; 10] = [5, 0, 1, 3, 3, 4, 4, 4, 4, 4];

fn parse_arg(flag: &str) -> Option<String> {
    let mut args = std::env::args();
    while let Some(arg) = args.next() {
        if arg == flag {
            return args.next();
        }
    }
    None
}

fn parse_seeds(value: Option<String>) -> anyhow::Result<Vec<u64>> {
    let raw = value.unwrap_or_else(|| "1,6".to_string());
    raw.split(',')
        .map(|s| s.trim().parse::<u64>().map_err(anyhow::Error::from))
        .collect()
}

/// Store of one partition: its owned nodes with their complete in-edges.
fn partition_store(
    book: &Arc<PartitionBook>,
    partition: PartitionId,
    time_attr: &str,
) -> anyhow::Result<LocalStore> {
    let (row, col): (Vec<u64>, Vec<u64>) = ROW
        .iter()
        .zip(COL.iter())
        .filter(|(_, dst)| book.is_owned_by(NodeId(**dst), partition))
        .map(|(&src, &dst)| (src, dst))
        .unzip();
    let graph = LocalGraphView::from_raw(&row, &col, false)?;
    let mut features = LocalFeatureView::new();
    features.put_time_vector(time_attr, &TIME)?;
    Ok(LocalStore::new(partition, book.clone(), graph, features))
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let overrides = ConfigOverrides {
        cluster: Some(ClusterOverrides {
            rank: parse_arg("--rank").map(|v| v.parse()).transpose()?,
            world_size: parse_arg("--world-size").map(|v| v.parse()).transpose()?,
            group_name: parse_arg("--group"),
        }),
        rpc: Some(RpcOverrides {
            timeout_ms: parse_arg("--timeout-ms").map(|v| v.parse()).transpose()?,
        }),
    };
    let config = WorkerConfig::load(parse_arg("--config").as_deref(), overrides)?;
    let seeds = parse_seeds(parse_arg("--seeds"))?;

    let world_size = config.cluster.world_size.max(1);
    if config.cluster.rank >= world_size {
        anyhow::bail!("rank {} is outside a world of {}", config.cluster.rank, world_size);
    }
    let owners: Vec<u32> = (0..NUM_NODES)
        .map(|node| (node * world_size as u64 / NUM_NODES) as u32)
        .collect();
    let book = Arc::new(PartitionBook::from_raw(&owners));

    let time_attr = config
        .sampler
        .time_attr
        .clone()
        .unwrap_or_else(|| DEFAULT_TIME_ATTR.to_string());

    let network = InProcessNetwork::new();
    let mut workers = Vec::with_capacity(world_size as usize);
    for rank in 0..world_size {
        let ctx = DistContext::new(rank, world_size, config.cluster.group_name.clone());
        let cluster = ClusterHandle::open(ctx, network.clone(), config.rpc.request_queue_capacity);
        let store = partition_store(&book, PartitionId(rank), &time_attr)?;
        let sampler = DistNeighborSampler::new(store, cluster, config.sampler.clone(), &config.rpc)?;
        sampler.register_sampler_rpc()?;
        sampler.init_event_loop()?;
        workers.push(sampler);
    }

    let sampler = &workers[config.cluster.rank as usize];
    let out = sampler.sample(SeedBatch::from_raw(&seeds))?;
    println!("{}", serde_json::to_string_pretty(&out)?);

    for worker in &workers {
        worker.close();
    }
    Ok(())
}
