//! One-hop neighbor selection shared by local expansion, remote expansion and the
//! centralized reference sampler.

use crate::config::TemporalStrategy;
use crate::model::{NodeId, Timestamp};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::Rng;
use rustc_hash::FxHashSet;

/// A neighbor eligible for selection, in adjacency order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Candidate {
    pub node: NodeId,
    pub time: Option<Timestamp>,
}

impl Candidate {
    pub fn new(node: NodeId) -> Self {
        Self { node, time: None }
    }

    pub fn timed(node: NodeId, time: Timestamp) -> Self {
        Self {
            node,
            time: Some(time),
        }
    }
}

/// Parameters of one selection.
#[derive(Debug, Clone, Copy)]
pub struct Selection {
    /// Fan-out, `-1` for all
    pub count: i64,
    pub strategy: TemporalStrategy,
    /// Effective time of the expanded node; neighbors after it are never eligible
    pub time_bound: Option<Timestamp>,
    pub shuffle: bool,
}

/// Select neighbors among `candidates`.
///
/// With a time bound, candidates newer than the bound are dropped and the rest are
/// ordered by ascending timestamp (stable, so adjacency order breaks ties).
pub fn select(mut candidates: Vec<Candidate>, selection: Selection, rng: &mut StdRng) -> Vec<Candidate> {
    if let Some(bound) = selection.time_bound {
        candidates.retain(|c| c.time.is_some_and(|t| t <= bound));
        candidates.sort_by_key(|c| c.time);
    }

    let population = candidates.len();
    let mut picked = if selection.count == 0 || population == 0 {
        Vec::new()
    } else if selection.count < 0 || selection.count as usize >= population {
        candidates
    } else {
        let count = selection.count as usize;
        match selection.strategy {
            TemporalStrategy::Last => candidates.split_off(population - count),
            TemporalStrategy::Uniform => floyd_sample(&candidates, count, rng),
        }
    };

    if selection.shuffle {
        picked.shuffle(rng);
    }
    picked
}

/// Robert Floyd's sampling without replacement, `count < population`.
fn floyd_sample(candidates: &[Candidate], count: usize, rng: &mut StdRng) -> Vec<Candidate> {
    let population = candidates.len();
    let mut chosen = FxHashSet::default();
    let mut out = Vec::with_capacity(count);
    for i in (population - count)..population {
        let mut idx = rng.random_range(0..=i);
        if !chosen.insert(idx) {
            idx = i;
            chosen.insert(i);
        }
        out.push(candidates[idx]);
    }
    out
}
