//! Cluster membership and the in-process transport.
//!
//! A [`ClusterHandle`] is the explicit, per-engine replacement for process-wide RPC
//! state: it knows this worker's [`DistContext`], announces the worker's request
//! queue on the [`InProcessNetwork`] and delivers requests to peers.

use crate::config::ClusterConfig;
use crate::error::{Result, SamplerError};
use crate::model::PartitionId;
use crate::rpc::{RpcRequest, RpcResponse, Transport};
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info};

/// Process group membership of one worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DistContext {
    pub rank: u32,
    pub world_size: u32,
    pub group_name: String,
}

impl DistContext {
    pub fn new(rank: u32, world_size: u32, group_name: impl Into<String>) -> Self {
        Self {
            rank,
            world_size,
            group_name: group_name.into(),
        }
    }

    /// Workers serve the partition matching their rank.
    pub fn partition(&self) -> PartitionId {
        PartitionId(self.rank)
    }
}

impl From<&ClusterConfig> for DistContext {
    fn from(config: &ClusterConfig) -> Self {
        Self::new(config.rank, config.world_size, config.group_name.clone())
    }
}

/// A request waiting to be served, with the channel its answer goes back on.
pub struct RpcEnvelope {
    pub request: RpcRequest,
    pub reply: oneshot::Sender<Result<RpcResponse>>,
}

type PeerKey = (String, u32);

/// Peer directory shared by all workers living in one process.
#[derive(Clone, Default)]
pub struct InProcessNetwork {
    peers: Arc<RwLock<FxHashMap<PeerKey, mpsc::Sender<RpcEnvelope>>>>,
}

impl InProcessNetwork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn announce(&self, group: &str, rank: u32, sender: mpsc::Sender<RpcEnvelope>) {
        self.peers.write().insert((group.to_string(), rank), sender);
    }

    pub fn withdraw(&self, group: &str, rank: u32) {
        self.peers.write().remove(&(group.to_string(), rank));
    }

    pub fn peer(&self, group: &str, rank: u32) -> Option<mpsc::Sender<RpcEnvelope>> {
        self.peers.read().get(&(group.to_string(), rank)).cloned()
    }

    /// Ranks currently reachable in `group`, ascending.
    pub fn ranks(&self, group: &str) -> Vec<u32> {
        let mut ranks: Vec<u32> = self
            .peers
            .read()
            .keys()
            .filter(|(g, _)| g == group)
            .map(|(_, rank)| *rank)
            .collect();
        ranks.sort_unstable();
        ranks
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum HandleState {
    Open,
    Registered,
    Closed,
}

/// One worker's view of the cluster.
pub struct ClusterHandle {
    ctx: DistContext,
    network: InProcessNetwork,
    queue_capacity: usize,
    state: Mutex<HandleState>,
}

impl ClusterHandle {
    pub fn open(ctx: DistContext, network: InProcessNetwork, queue_capacity: usize) -> Arc<Self> {
        info!(rank = ctx.rank, world_size = ctx.world_size, group = %ctx.group_name, "cluster handle opened");
        Arc::new(Self {
            ctx,
            network,
            queue_capacity: queue_capacity.max(1),
            state: Mutex::new(HandleState::Open),
        })
    }

    pub fn context(&self) -> &DistContext {
        &self.ctx
    }

    pub fn is_open(&self) -> bool {
        *self.state.lock() != HandleState::Closed
    }

    /// Announce this worker to its peers. The caller serves the returned queue.
    pub fn register(&self) -> Result<mpsc::Receiver<RpcEnvelope>> {
        let mut state = self.state.lock();
        match *state {
            HandleState::Closed => return Err(SamplerError::NotInitialized("cluster handle is closed")),
            HandleState::Registered => {
                return Err(SamplerError::invalid_config(format!(
                    "rank {} is already registered in group '{}'",
                    self.ctx.rank, self.ctx.group_name
                )))
            }
            HandleState::Open => {}
        }
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.network.announce(&self.ctx.group_name, self.ctx.rank, tx);
        *state = HandleState::Registered;
        debug!(rank = self.ctx.rank, "request handler registered");
        Ok(rx)
    }

    /// Partitions of the other workers that are currently reachable.
    pub fn reachable_peers(&self) -> Vec<PartitionId> {
        self.network
            .ranks(&self.ctx.group_name)
            .into_iter()
            .filter(|&rank| rank != self.ctx.rank)
            .map(PartitionId)
            .collect()
    }

    /// Deregister and refuse further calls. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock();
        if *state == HandleState::Registered {
            self.network.withdraw(&self.ctx.group_name, self.ctx.rank);
        }
        if *state != HandleState::Closed {
            info!(rank = self.ctx.rank, "cluster handle closed");
        }
        *state = HandleState::Closed;
    }
}

#[async_trait]
impl Transport for ClusterHandle {
    async fn call(&self, target: PartitionId, request: RpcRequest) -> Result<RpcResponse> {
        if !self.is_open() {
            return Err(SamplerError::unavailable(target, "local cluster handle is closed"));
        }
        let peer = self
            .network
            .peer(&self.ctx.group_name, target.0)
            .ok_or_else(|| SamplerError::unavailable(target, "peer is not registered"))?;

        let (reply, response) = oneshot::channel();
        peer.send(RpcEnvelope { request, reply })
            .await
            .map_err(|_| SamplerError::unavailable(target, "peer stopped accepting requests"))?;
        response
            .await
            .map_err(|_| SamplerError::unavailable(target, "peer dropped the request"))?
    }
}
