//! # RPC Fan-out Layer
//!
//! Request/response messages exchanged between sampling workers, the [`Transport`]
//! seam, and [`FanOut`], which applies the per-call timeout and accounting on top of
//! whatever transport the cluster provides.

use crate::config::TemporalStrategy;
use crate::error::{Result, SamplerError};
use crate::model::{NodeId, PartitionId, SessionId, Timestamp};
use crate::neighbor::Candidate;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Sampling parameters of one hop, shipped with every remote request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopOptions {
    pub num_neighbors: i64,
    pub strategy: TemporalStrategy,
    pub time_attr: Option<String>,
    pub shuffle: bool,
    pub rng_seed: u64,
}

/// Expand `nodes` by one hop on the partition that owns them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleRequest {
    pub session: SessionId,
    pub hop: usize,
    pub nodes: Vec<NodeId>,
    /// Effective time of every node, temporal sampling only
    pub times: Option<Vec<Timestamp>>,
    pub batch: Option<Vec<usize>>,
    pub options: HopOptions,
}

/// Sampled neighbors, flattened: node `i` of the request owns the next `counts[i]`
/// entries of `nodes` (and of `times`).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleResponse {
    pub nodes: Vec<NodeId>,
    pub counts: Vec<usize>,
    pub times: Option<Vec<Timestamp>>,
}

impl SampleResponse {
    pub fn with_capacity(requested: usize, temporal: bool) -> Self {
        Self {
            nodes: Vec::with_capacity(requested),
            counts: Vec::with_capacity(requested),
            times: temporal.then(Vec::new),
        }
    }

    /// Append the neighbors picked for the next requested node.
    pub fn push(&mut self, picked: &[Candidate]) {
        self.counts.push(picked.len());
        for candidate in picked {
            self.nodes.push(candidate.node);
            if let Some(times) = self.times.as_mut() {
                times.push(candidate.time.unwrap_or_default());
            }
        }
    }

    pub fn from_per_node(per_node: &[Vec<Candidate>], temporal: bool) -> Self {
        let mut response = Self::with_capacity(per_node.len(), temporal);
        for picked in per_node {
            response.push(picked);
        }
        response
    }

    /// Split back into one neighbor list per requested node.
    pub fn into_per_node(self) -> Vec<Vec<Candidate>> {
        let mut offset = 0;
        self.counts
            .iter()
            .map(|&count| {
                let picked = (offset..offset + count)
                    .map(|i| Candidate {
                        node: self.nodes[i],
                        time: self.times.as_ref().map(|t| t[i]),
                    })
                    .collect();
                offset += count;
                picked
            })
            .collect()
    }

    fn is_well_formed(&self, requested: usize) -> bool {
        self.counts.len() == requested
            && self.counts.iter().sum::<usize>() == self.nodes.len()
            && self.times.as_ref().map_or(true, |t| t.len() == self.nodes.len())
    }
}

/// Fetch feature rows of nodes owned by the target partition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureRequest {
    pub session: SessionId,
    pub ids: Vec<NodeId>,
    pub attr: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureResponse {
    pub rows: Vec<Vec<f32>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcRequest {
    Sample(SampleRequest),
    Features(FeatureRequest),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RpcResponse {
    Sample(SampleResponse),
    Features(FeatureResponse),
}

/// Delivers a request to the worker serving `target` and waits for its answer.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, target: PartitionId, request: RpcRequest) -> Result<RpcResponse>;
}

/// Issues remote calls for sampling sessions.
pub struct FanOut {
    transport: Arc<dyn Transport>,
    timeout: Duration,
    sample_calls: AtomicU64,
}

impl FanOut {
    pub fn new(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self {
            transport,
            timeout,
            sample_calls: AtomicU64::new(0),
        }
    }

    /// Number of sample requests issued so far.
    pub fn sample_calls_issued(&self) -> u64 {
        self.sample_calls.load(Ordering::Relaxed)
    }

    #[instrument(
        skip(self, request),
        fields(session = %request.session, hop = request.hop, nodes = request.nodes.len()),
        level = "debug"
    )]
    pub async fn remote_sample(
        &self,
        target: PartitionId,
        request: SampleRequest,
    ) -> Result<SampleResponse> {
        self.sample_calls.fetch_add(1, Ordering::Relaxed);
        let requested = request.nodes.len();
        match self.call(target, RpcRequest::Sample(request)).await? {
            RpcResponse::Sample(response) if response.is_well_formed(requested) => {
                debug!(%target, sampled = response.nodes.len(), "remote hop complete");
                Ok(response)
            }
            RpcResponse::Sample(response) => Err(SamplerError::unavailable(
                target,
                format!(
                    "malformed response: {} counts for {} requested nodes",
                    response.counts.len(),
                    requested
                ),
            )),
            RpcResponse::Features(_) => Err(SamplerError::unavailable(
                target,
                "answered a sample request with features",
            )),
        }
    }

    pub async fn fetch_features(
        &self,
        target: PartitionId,
        request: FeatureRequest,
    ) -> Result<Vec<Vec<f32>>> {
        let requested = request.ids.len();
        match self.call(target, RpcRequest::Features(request)).await? {
            RpcResponse::Features(response) if response.rows.len() == requested => {
                Ok(response.rows)
            }
            _ => Err(SamplerError::unavailable(
                target,
                "malformed response to a feature request",
            )),
        }
    }

    async fn call(&self, target: PartitionId, request: RpcRequest) -> Result<RpcResponse> {
        match tokio::time::timeout(self.timeout, self.transport.call(target, request)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(%target, timeout_ms = self.timeout.as_millis() as u64, "remote call timed out");
                Err(SamplerError::unavailable(
                    target,
                    format!("no response within {}ms", self.timeout.as_millis()),
                ))
            }
        }
    }
}
