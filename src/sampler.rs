//! # Distributed Neighbor Sampler
//!
//! Hop-by-hop expansion of a seed batch over a partitioned graph. Each hop routes
//! the frontier through the [`PartitionBook`](crate::partition::PartitionBook):
//! owned nodes are expanded in-process, the rest are sent as one batched request
//! per owning partition, and all contributions are merged in frontier order so the
//! result matches the centralized sampler.
//!
//! ```text
//!   seeds ──► route ──┬──► local expand ─────────────┐
//!                     └──► FanOut ─► peer P1 ─► ... ─┴──► SubgraphBuilder ──► next hop
//! ```

use crate::cluster::{ClusterHandle, DistContext, RpcEnvelope};
use crate::config::{RpcConfig, SamplerConfig, TemporalStrategy};
use crate::error::{Result, SamplerError};
use crate::merge::SubgraphBuilder;
use crate::model::{FrontierEntry, NodeId, PartitionId, SampledSubgraph, SeedBatch, SessionId, Timestamp};
use crate::neighbor::Candidate;
use crate::partition::Route;
use crate::rpc::{
    FanOut, FeatureRequest, FeatureResponse, HopOptions, RpcRequest, RpcResponse, SampleRequest,
    SampleResponse,
};
use crate::scheduler::{EventLoop, SessionTask};
use crate::store::LocalStore;
use futures::future::try_join_all;
use parking_lot::{Mutex, RwLock};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

/// Validate a session and resolve the effective time of every seed.
///
/// Seeds without an explicit time use their stored timestamp. A seed with neither
/// is a configuration error under `last`, and a missing attribute value otherwise.
pub(crate) fn prepare_session(
    store: &LocalStore,
    seeds: &SeedBatch,
    config: &SamplerConfig,
) -> Result<(StdRng, Option<Vec<Timestamp>>)> {
    config.validate()?;
    seeds.validate(config.is_temporal())?;
    for &node in &seeds.nodes {
        store.book().owner(node)?;
    }

    let seed_times = match (&config.time_attr, &seeds.time) {
        (None, _) => None,
        (Some(_), Some(time)) => Some(time.clone()),
        (Some(attr), None) => Some(stored_seed_times(store, &seeds.nodes, attr, config)?),
    };
    let rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_os_rng(),
    };
    Ok((rng, seed_times))
}

fn stored_seed_times(
    store: &LocalStore,
    seeds: &[NodeId],
    attr: &str,
    config: &SamplerConfig,
) -> Result<Vec<Timestamp>> {
    let stored = store.stored_times(seeds, attr)?;
    seeds
        .iter()
        .zip(stored)
        .map(|(&node, time)| match time {
            Some(time) => Ok(time),
            None if config.temporal_strategy == TemporalStrategy::Last => {
                Err(SamplerError::invalid_config(format!(
                    "seed {node} has no effective time for 'last' sampling"
                )))
            }
            None => Err(SamplerError::missing_attribute(
                attr,
                store.partition(),
                format!("no value for seed {node}"),
            )),
        })
        .collect()
}

pub(crate) fn hop_options(config: &SamplerConfig, hop: usize, rng: &mut StdRng) -> HopOptions {
    HopOptions {
        num_neighbors: config.num_neighbors[hop],
        strategy: config.temporal_strategy,
        time_attr: config.time_attr.clone(),
        shuffle: config.shuffle,
        rng_seed: rng.random(),
    }
}

/// Sampling engine of one worker.
///
/// Clones share the worker. Dropping the last clone closes it like [`close`](Self::close).
#[derive(Clone)]
pub struct DistNeighborSampler {
    inner: Arc<SamplerInner>,
    lifecycle: Arc<Lifecycle>,
}

/// State reachable from sessions and request handlers. Holds nothing that keeps the
/// event loop alive.
struct SamplerInner {
    ctx: DistContext,
    config: SamplerConfig,
    store: LocalStore,
    fanout: FanOut,
}

/// Cluster membership and the event loop, owned by the public handles only.
struct Lifecycle {
    rank: u32,
    cluster: Arc<ClusterHandle>,
    event_loop: RwLock<Option<Arc<EventLoop>>>,
    /// Inbound queue registered before the event loop was started
    parked: Mutex<Option<mpsc::Receiver<RpcEnvelope>>>,
}

impl Lifecycle {
    fn close(&self) {
        let was_open = self.cluster.is_open();
        self.cluster.close();
        let event_loop = self.event_loop.write().take();
        if let Some(event_loop) = event_loop {
            event_loop.shutdown();
        }
        self.parked.lock().take();
        if was_open {
            info!(rank = self.rank, "sampler closed");
        }
    }
}

impl Drop for Lifecycle {
    fn drop(&mut self) {
        self.close();
    }
}

impl DistNeighborSampler {
    pub fn new(
        store: LocalStore,
        cluster: Arc<ClusterHandle>,
        config: SamplerConfig,
        rpc: &RpcConfig,
    ) -> Result<Self> {
        config.validate()?;
        let ctx = cluster.context().clone();
        if store.partition() != ctx.partition() {
            return Err(SamplerError::invalid_config(format!(
                "rank {} cannot serve partition {}",
                ctx.rank,
                store.partition()
            )));
        }
        let num_partitions = store.book().num_partitions();
        if num_partitions > ctx.world_size as usize {
            return Err(SamplerError::invalid_config(format!(
                "partition book spans {num_partitions} partitions but the world size is {}",
                ctx.world_size
            )));
        }

        let fanout = FanOut::new(cluster.clone(), rpc.timeout());
        Ok(Self {
            lifecycle: Arc::new(Lifecycle {
                rank: ctx.rank,
                cluster,
                event_loop: RwLock::new(None),
                parked: Mutex::new(None),
            }),
            inner: Arc::new(SamplerInner {
                ctx,
                config,
                store,
                fanout,
            }),
        })
    }

    pub fn context(&self) -> &DistContext {
        &self.inner.ctx
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.inner.config
    }

    pub fn store(&self) -> &LocalStore {
        &self.inner.store
    }

    /// Remote sample requests issued by this worker so far.
    pub fn remote_calls_issued(&self) -> u64 {
        self.inner.fanout.sample_calls_issued()
    }

    /// Announce this worker's request handler to its peers. Requests arriving before
    /// the event loop starts wait in the queue.
    pub fn register_sampler_rpc(&self) -> Result<()> {
        let inbound = self.lifecycle.cluster.register()?;
        match self.lifecycle.event_loop.read().as_ref() {
            Some(event_loop) => event_loop.spawn(serve(self.inner.clone(), inbound)),
            None => *self.lifecycle.parked.lock() = Some(inbound),
        }
        Ok(())
    }

    /// Start the worker's event loop. Idempotent.
    pub fn init_event_loop(&self) -> Result<()> {
        let mut slot = self.lifecycle.event_loop.write();
        if slot.is_some() {
            return Ok(());
        }
        let name = format!("sampler-{}-{}", self.inner.ctx.group_name, self.inner.ctx.rank);
        let event_loop = Arc::new(EventLoop::start(&name)?);
        if let Some(inbound) = self.lifecycle.parked.lock().take() {
            event_loop.spawn(serve(self.inner.clone(), inbound));
        }
        *slot = Some(event_loop);
        Ok(())
    }

    /// Deregister from the cluster and stop the event loop, cancelling every
    /// in-flight session.
    pub fn close(&self) {
        self.lifecycle.close();
    }

    fn event_loop(&self) -> Result<Arc<EventLoop>> {
        self.lifecycle
            .event_loop
            .read()
            .clone()
            .ok_or(SamplerError::NotInitialized("event loop is not running"))
    }

    /// Sample with the worker's configuration, blocking until the session ends.
    pub fn sample(&self, seeds: SeedBatch) -> Result<SampledSubgraph> {
        self.submit(seeds)?.wait()
    }

    pub fn sample_with(&self, seeds: SeedBatch, config: SamplerConfig) -> Result<SampledSubgraph> {
        self.submit_with(seeds, config)?.wait()
    }

    pub async fn sample_async(&self, seeds: SeedBatch) -> Result<SampledSubgraph> {
        self.submit(seeds)?.join().await
    }

    pub fn submit(&self, seeds: SeedBatch) -> Result<SessionTask<SampledSubgraph>> {
        self.submit_with(seeds, self.inner.config.clone())
    }

    /// Start a sampling session on the event loop and return its handle.
    pub fn submit_with(
        &self,
        seeds: SeedBatch,
        config: SamplerConfig,
    ) -> Result<SessionTask<SampledSubgraph>> {
        let event_loop = self.event_loop()?;
        let session = event_loop.next_session();
        let inner = self.inner.clone();
        Ok(event_loop.submit(session, async move {
            inner.node_sample(session, seeds, config).await
        }))
    }

    pub fn cancel(&self, session: SessionId) -> bool {
        self.event_loop()
            .map(|event_loop| event_loop.cancel(session))
            .unwrap_or(false)
    }

    /// Feature rows of `ids`, read from their owning partitions, in request order.
    pub fn fetch_features(&self, ids: Vec<NodeId>, attr: &str) -> Result<Vec<Vec<f32>>> {
        let event_loop = self.event_loop()?;
        let session = event_loop.next_session();
        let inner = self.inner.clone();
        let attr = attr.to_string();
        event_loop
            .submit(session, async move { inner.fetch_features(session, ids, attr).await })
            .wait()
    }
}

impl SamplerInner {
    #[instrument(skip(self, seeds, config), fields(rank = self.ctx.rank, seeds = seeds.len()), level = "debug")]
    async fn node_sample(
        &self,
        session: SessionId,
        seeds: SeedBatch,
        config: SamplerConfig,
    ) -> Result<SampledSubgraph> {
        let (mut rng, seed_times) = prepare_session(&self.store, &seeds, &config)?;

        let mut builder = SubgraphBuilder::new(config.disjoint);
        let mut frontier = builder.seed(&seeds.nodes, seed_times.as_deref());
        for hop in 0..config.num_hops() {
            if frontier.is_empty() {
                builder.skip_hop();
                continue;
            }
            let options = hop_options(&config, hop, &mut rng);
            let contributions = self.expand_frontier(session, hop, &frontier, &options).await?;
            frontier = builder.merge_hop(&frontier, contributions);
            debug!(%session, hop, discovered = frontier.len(), total = builder.num_nodes(), "hop merged");
        }

        let mut out = builder.finish();
        out.input_id = seeds.input_id;
        out.seed_time = seed_times;
        Ok(out)
    }

    async fn expand_frontier(
        &self,
        session: SessionId,
        hop: usize,
        frontier: &[FrontierEntry],
        options: &HopOptions,
    ) -> Result<Vec<Vec<Candidate>>> {
        let nodes: Vec<NodeId> = frontier.iter().map(|e| e.node).collect();
        let times: Option<Vec<Timestamp>> = frontier.iter().map(|e| e.time).collect();
        let batch: Option<Vec<usize>> = frontier.iter().map(|e| e.batch).collect();
        self.expand_nodes(session, hop, &nodes, times.as_deref(), batch.as_deref(), options)
            .await
    }

    /// Expand `nodes` by one hop wherever they live. Remote owners receive one
    /// request each; the result holds one neighbor list per input node.
    async fn expand_nodes(
        &self,
        session: SessionId,
        hop: usize,
        nodes: &[NodeId],
        times: Option<&[Timestamp]>,
        batch: Option<&[usize]>,
        options: &HopOptions,
    ) -> Result<Vec<Vec<Candidate>>> {
        let local_partition = self.store.partition();
        let mut local = Vec::new();
        let mut remote: BTreeMap<PartitionId, Vec<usize>> = BTreeMap::new();
        for (i, &node) in nodes.iter().enumerate() {
            match self.store.book().route(node, local_partition)? {
                Route::Local => local.push(i),
                Route::Remote(owner) => remote.entry(owner).or_default().push(i),
            }
        }

        let pick = |positions: &[usize], values: Option<&[Timestamp]>| {
            values.map(|v| positions.iter().map(|&i| v[i]).collect::<Vec<_>>())
        };

        let calls = remote.into_iter().map(|(target, positions)| {
            let request = SampleRequest {
                session,
                hop,
                nodes: positions.iter().map(|&i| nodes[i]).collect(),
                times: pick(&positions, times),
                batch: batch.map(|b| positions.iter().map(|&i| b[i]).collect()),
                options: options.clone(),
            };
            async move {
                let response = self.fanout.remote_sample(target, request).await?;
                Ok::<_, SamplerError>((positions, response))
            }
        });

        // Remote requests go out first, local expansion runs while they are in flight.
        let (remote, local_response) = tokio::join!(try_join_all(calls), async {
            let local_nodes: Vec<NodeId> = local.iter().map(|&i| nodes[i]).collect();
            let local_times = pick(&local, times);
            let local_batch = batch.map(|b| local.iter().map(|&i| b[i]).collect::<Vec<_>>());
            self.store
                .expand(&local_nodes, local_times.as_deref(), local_batch.as_deref(), options)
        });

        let mut per_node = vec![Vec::new(); nodes.len()];
        scatter(&mut per_node, &local, local_response?);
        for (positions, response) in remote? {
            scatter(&mut per_node, &positions, response);
        }
        Ok(per_node)
    }

    async fn handle(&self, request: RpcRequest) -> Result<RpcResponse> {
        match request {
            RpcRequest::Sample(request) => {
                check_request_shape(&request)?;
                let temporal = request.options.time_attr.is_some();
                let per_node = self
                    .expand_nodes(
                        request.session,
                        request.hop,
                        &request.nodes,
                        request.times.as_deref(),
                        request.batch.as_deref(),
                        &request.options,
                    )
                    .await?;
                Ok(RpcResponse::Sample(SampleResponse::from_per_node(&per_node, temporal)))
            }
            RpcRequest::Features(request) => {
                let rows = self.store.feature(&request.ids, &request.attr)?;
                Ok(RpcResponse::Features(FeatureResponse { rows }))
            }
        }
    }

    async fn fetch_features(
        &self,
        session: SessionId,
        ids: Vec<NodeId>,
        attr: String,
    ) -> Result<Vec<Vec<f32>>> {
        let mut groups: BTreeMap<PartitionId, Vec<usize>> = BTreeMap::new();
        for (i, &id) in ids.iter().enumerate() {
            groups.entry(self.store.book().owner(id)?).or_default().push(i);
        }

        let calls = groups.into_iter().map(|(owner, positions)| {
            let group: Vec<NodeId> = positions.iter().map(|&i| ids[i]).collect();
            let attr = attr.clone();
            async move {
                let rows = if owner == self.store.partition() {
                    self.store.feature(&group, &attr)?
                } else {
                    let request = FeatureRequest {
                        session,
                        ids: group,
                        attr,
                    };
                    self.fanout.fetch_features(owner, request).await?
                };
                Ok::<_, SamplerError>((positions, rows))
            }
        });

        let mut out = vec![Vec::new(); ids.len()];
        for (positions, rows) in try_join_all(calls).await? {
            for (i, row) in positions.into_iter().zip(rows) {
                out[i] = row;
            }
        }
        Ok(out)
    }
}

/// Per-node columns of a peer request must line up with its nodes.
fn check_request_shape(request: &SampleRequest) -> Result<()> {
    let requested = request.nodes.len();
    let columns = [
        ("times", request.times.as_ref().map(Vec::len)),
        ("batch", request.batch.as_ref().map(Vec::len)),
    ];
    for (name, len) in columns {
        if let Some(len) = len.filter(|&len| len != requested) {
            return Err(SamplerError::invalid_config(format!(
                "request carries {len} {name} entries for {requested} nodes"
            )));
        }
    }
    Ok(())
}

fn scatter(per_node: &mut [Vec<Candidate>], positions: &[usize], response: SampleResponse) {
    for (&i, picked) in positions.iter().zip(response.into_per_node()) {
        per_node[i] = picked;
    }
}

/// Serve peer requests until the cluster handle deregisters this worker.
async fn serve(inner: Arc<SamplerInner>, mut inbound: mpsc::Receiver<RpcEnvelope>) {
    debug!(rank = inner.ctx.rank, "serving peer requests");
    while let Some(envelope) = inbound.recv().await {
        let inner = inner.clone();
        tokio::spawn(async move {
            let result = inner.handle(envelope.request).await;
            if let Err(err) = &result {
                warn!(rank = inner.ctx.rank, error = %err, "peer request failed");
            }
            if envelope.reply.send(result).is_err() {
                debug!(rank = inner.ctx.rank, "requester went away, response discarded");
            }
        });
    }
}
