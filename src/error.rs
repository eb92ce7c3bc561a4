//! Error taxonomy for sampling sessions.
//!
//! Every variant is fatal for the session that raised it. Sessions never return a
//! partially sampled subgraph.

use crate::model::{NodeId, PartitionId, SessionId};
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SamplerError {
    #[error("node {node} is outside the declared id space of {num_nodes} nodes")]
    UnknownNode { node: NodeId, num_nodes: usize },

    #[error("attribute '{attr}' is not available on partition {partition}: {detail}")]
    MissingAttribute {
        attr: String,
        partition: PartitionId,
        detail: String,
    },

    #[error("invalid sampler configuration: {0}")]
    InvalidConfig(String),

    #[error("partition {partition} is unavailable: {reason}")]
    RemoteUnavailable {
        partition: PartitionId,
        reason: String,
    },

    #[error("session {0} was cancelled")]
    Cancelled(SessionId),

    #[error("sampler is not initialized: {0}")]
    NotInitialized(&'static str),

    #[error("event loop failure: {0}")]
    Runtime(String),
}

impl SamplerError {
    pub fn invalid_config(message: impl Into<String>) -> Self {
        SamplerError::InvalidConfig(message.into())
    }

    pub fn unavailable(partition: PartitionId, reason: impl Into<String>) -> Self {
        SamplerError::RemoteUnavailable {
            partition,
            reason: reason.into(),
        }
    }

    pub fn missing_attribute(
        attr: impl Into<String>,
        partition: PartitionId,
        detail: impl Into<String>,
    ) -> Self {
        SamplerError::MissingAttribute {
            attr: attr.into(),
            partition,
            detail: detail.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, SamplerError>;
