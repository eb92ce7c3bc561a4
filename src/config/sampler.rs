use super::defaults::default_num_neighbors;
use crate::error::{Result, SamplerError};
use serde::{Deserialize, Serialize};

/// Policy for choosing among neighbors that satisfy the temporal constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TemporalStrategy {
    /// Draw uniformly at random without replacement
    #[default]
    Uniform,
    /// Take the most recent neighbors
    Last,
}

/// Per-session sampling configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplerConfig {
    /// Fan-out per hop, `-1` takes every qualifying neighbor
    pub num_neighbors: Vec<i64>,
    /// Keep each seed's subgraph separate, tagging nodes with their seed index
    pub disjoint: bool,
    pub temporal_strategy: TemporalStrategy,
    /// Name of the node time attribute, enables temporal sampling
    pub time_attr: Option<String>,
    /// Randomly permute the selected neighbors of every node
    pub shuffle: bool,
    /// Seed of the session RNG, drawn from entropy when absent
    pub seed: Option<u64>,
}

impl Default for SamplerConfig {
    fn default() -> Self {
        Self {
            num_neighbors: default_num_neighbors(),
            disjoint: false,
            temporal_strategy: TemporalStrategy::Uniform,
            time_attr: None,
            shuffle: false,
            seed: None,
        }
    }
}

impl SamplerConfig {
    pub fn new(num_neighbors: Vec<i64>) -> Self {
        Self {
            num_neighbors,
            ..Self::default()
        }
    }

    pub fn disjoint(mut self, disjoint: bool) -> Self {
        self.disjoint = disjoint;
        self
    }

    pub fn temporal(mut self, time_attr: impl Into<String>, strategy: TemporalStrategy) -> Self {
        self.time_attr = Some(time_attr.into());
        self.temporal_strategy = strategy;
        self
    }

    pub fn shuffle(mut self, shuffle: bool) -> Self {
        self.shuffle = shuffle;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    pub fn num_hops(&self) -> usize {
        self.num_neighbors.len()
    }

    pub fn is_temporal(&self) -> bool {
        self.time_attr.is_some()
    }

    /// Reject configurations that cannot be sampled. Nothing is defaulted silently.
    pub fn validate(&self) -> Result<()> {
        if let Some((hop, k)) = self
            .num_neighbors
            .iter()
            .enumerate()
            .find(|(_, &k)| k < -1)
        {
            return Err(SamplerError::invalid_config(format!(
                "num_neighbors[{hop}] = {k}, expected -1 or a non-negative count"
            )));
        }
        if self.temporal_strategy == TemporalStrategy::Last && self.time_attr.is_none() {
            return Err(SamplerError::invalid_config(
                "temporal_strategy 'last' requires a time_attr",
            ));
        }
        if self.time_attr.is_some() && !self.disjoint {
            return Err(SamplerError::invalid_config(
                "temporal sampling requires disjoint batches",
            ));
        }
        Ok(())
    }
}
