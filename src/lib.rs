//! # Distsampler
//!
//! Distributed multi-hop neighbor sampling over a node-partitioned graph.
//!
//! Every worker owns one partition and runs a [`DistNeighborSampler`]. A sampling
//! session expands a seed batch hop by hop; neighbors of locally owned nodes are
//! sampled in place, all others are requested from the owning worker, and the result
//! is identical to sampling the whole graph in one process.

pub mod cluster;
pub mod config;
pub mod error;
pub mod merge;
pub mod model;
pub mod neighbor;
pub mod partition;
pub mod reference;
pub mod rpc;
pub mod sampler;
pub mod scheduler;
pub mod store;

// Re-export main types for convenience
pub use cluster::{ClusterHandle, DistContext, InProcessNetwork};
pub use config::{SamplerConfig, TemporalStrategy, WorkerConfig};
pub use error::{Result, SamplerError};
pub use model::{NodeId, PartitionId, SampledSubgraph, SeedBatch, SessionId, Timestamp};
pub use partition::PartitionBook;
pub use reference::{centralized_sample, FullGraph};
pub use sampler::DistNeighborSampler;
pub use scheduler::SessionTask;
pub use store::{FeatureStorage, GraphStorage, LocalFeatureView, LocalGraphView, LocalStore};
