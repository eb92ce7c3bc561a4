//! # Result Merger
//!
//! Assembles per-hop contributions into a [`SampledSubgraph`]: deduplicates newly
//! sampled nodes, relabels edges to output positions and propagates batch indices
//! and effective times to the next frontier.

use crate::model::{FrontierEntry, NodeId, SampledSubgraph, Timestamp};
use crate::neighbor::Candidate;
use rustc_hash::FxHashMap;
use std::collections::hash_map::Entry;

/// Nodes are deduplicated per batch; without disjoint batching every node lives in
/// batch 0.
type NodeKey = (usize, NodeId);

#[derive(Debug, Default)]
pub struct SubgraphBuilder {
    disjoint: bool,
    node: Vec<NodeId>,
    batch: Vec<usize>,
    positions: FxHashMap<NodeKey, usize>,
    row: Vec<usize>,
    col: Vec<usize>,
    num_sampled_nodes: Vec<usize>,
    num_sampled_edges: Vec<usize>,
}

impl SubgraphBuilder {
    pub fn new(disjoint: bool) -> Self {
        Self {
            disjoint,
            ..Self::default()
        }
    }

    /// Place the seeds and return them as the first frontier.
    ///
    /// With disjoint batching seed `i` opens batch `i`; otherwise repeated seeds
    /// collapse onto their first occurrence.
    pub fn seed(&mut self, seeds: &[NodeId], times: Option<&[Timestamp]>) -> Vec<FrontierEntry> {
        let mut frontier = Vec::with_capacity(seeds.len());
        for (i, &node) in seeds.iter().enumerate() {
            let batch = self.disjoint.then_some(i);
            let time = times.map(|t| t[i]);
            if let Some(entry) = self.insert(node, batch, time) {
                frontier.push(entry);
            }
        }
        self.num_sampled_nodes.push(frontier.len());
        frontier
    }

    /// Merge one hop. `contributions[i]` holds the neighbors sampled for
    /// `frontier[i]`; they are visited in frontier order so the first discoverer of
    /// a node decides its position, batch and effective time.
    pub fn merge_hop(
        &mut self,
        frontier: &[FrontierEntry],
        contributions: Vec<Vec<Candidate>>,
    ) -> Vec<FrontierEntry> {
        debug_assert_eq!(frontier.len(), contributions.len());
        let mut next = Vec::new();
        let mut edges = 0;
        for (entry, picked) in frontier.iter().zip(contributions) {
            for candidate in picked {
                let position = match self.insert(candidate.node, entry.batch, entry.time) {
                    Some(discovered) => {
                        next.push(discovered);
                        discovered.position
                    }
                    None => self.positions[&(entry.batch.unwrap_or(0), candidate.node)],
                };
                self.row.push(position);
                self.col.push(entry.position);
                edges += 1;
            }
        }
        self.num_sampled_nodes.push(next.len());
        self.num_sampled_edges.push(edges);
        next
    }

    /// Record a hop that had nothing left to expand.
    pub fn skip_hop(&mut self) {
        self.num_sampled_nodes.push(0);
        self.num_sampled_edges.push(0);
    }

    pub fn num_nodes(&self) -> usize {
        self.node.len()
    }

    pub fn finish(self) -> SampledSubgraph {
        SampledSubgraph {
            node: self.node,
            row: self.row,
            col: self.col,
            batch: self.disjoint.then_some(self.batch),
            num_sampled_nodes: self.num_sampled_nodes,
            num_sampled_edges: self.num_sampled_edges,
            input_id: None,
            seed_time: None,
        }
    }

    /// Append `node` unless it is already present in `batch`.
    fn insert(
        &mut self,
        node: NodeId,
        batch: Option<usize>,
        time: Option<Timestamp>,
    ) -> Option<FrontierEntry> {
        let position = self.node.len();
        match self.positions.entry((batch.unwrap_or(0), node)) {
            Entry::Occupied(_) => None,
            Entry::Vacant(slot) => {
                slot.insert(position);
                self.node.push(node);
                if self.disjoint {
                    self.batch.push(batch.unwrap_or(0));
                }
                Some(FrontierEntry {
                    node,
                    position,
                    batch,
                    time,
                })
            }
        }
    }
}
