//! Negative sampling for pairwise ranking.
//!
//! For every training interaction `(u, i)` the sampler draws `num_neg`
//! items uniformly at random and emits the edges `(u, j)`. Items `u`
//! interacted with in training are rejected as long as `u` has any
//! uninteracted item left; a user who interacted with every item falls
//! back to unrestricted draws.
//!
//! The result keeps the negatives in contiguous blocks per positive, and
//! also carries the explicit [`PairIndex`] so downstream code never depends
//! on that layout.

use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use tracing::warn;

use crate::error::{Error, Result};
use crate::hetero::{EdgeStore, EdgeType, HeteroGraph};
use crate::loss::{PairGroup, PairIndex};

/// Negative edges plus their pairing with the positives they contrast.
#[derive(Debug, Clone)]
pub struct NegativeGraph {
    /// Graph holding only the sampled negative edges.
    pub graph: HeteroGraph,
    /// Positive edge position -> negative edge positions.
    pub pairs: PairIndex,
}

impl NegativeGraph {
    /// Negative edges of `edge_type`.
    pub fn edges(&self, edge_type: &EdgeType) -> Result<&EdgeStore> {
        self.graph.require_edges(edge_type)
    }
}

/// Uniform negative sampler.
#[derive(Debug, Clone)]
pub struct NegativeSampler {
    num_neg: usize,
    seed: u64,
}

impl NegativeSampler {
    /// Sampler drawing `num_neg` negatives per positive.
    pub fn new(num_neg: usize, seed: u64) -> Self {
        Self { num_neg, seed }
    }

    /// Negatives per positive.
    pub fn num_neg(&self) -> usize {
        self.num_neg
    }

    /// Sample negatives for every `edge_type` edge of `train`.
    ///
    /// # Complexity
    /// O(E · num_neg) draws, plus O(I) per user whose interactions cover
    /// more than half of the items (those draw from the complement).
    pub fn sample(&self, train: &HeteroGraph, edge_type: &EdgeType) -> Result<NegativeGraph> {
        if self.num_neg == 0 {
            return Err(Error::InvalidConfig("num_neg must be > 0".into()));
        }

        let num_items = train.num_nodes(&edge_type.dst_type);
        let positives = train.require_edges(edge_type)?;
        let seen = train.successor_lists(edge_type);
        let mut rng = XorShiftRng::seed_from_u64(self.seed);

        let total = positives.num_edges() * self.num_neg;
        let mut store = EdgeStore {
            src: Vec::with_capacity(total),
            dst: Vec::with_capacity(total),
        };
        let mut groups = Vec::with_capacity(positives.num_edges());
        let mut saturated_edges = 0usize;
        // complement cache for dense users, built on first use
        let mut complements: Vec<Option<Vec<usize>>> = vec![None; seen.len()];

        for (p, (u, _)) in positives.iter().enumerate() {
            let user_seen = &seen[u];
            let start = store.num_edges();

            if user_seen.len() >= num_items {
                saturated_edges += 1;
                for _ in 0..self.num_neg {
                    store.add_edge(u, rng.random_range(0..num_items));
                }
            } else if user_seen.len() * 2 > num_items {
                let complement = complements[u].get_or_insert_with(|| {
                    (0..num_items)
                        .filter(|i| user_seen.binary_search(i).is_err())
                        .collect()
                });
                for _ in 0..self.num_neg {
                    store.add_edge(u, complement[rng.random_range(0..complement.len())]);
                }
            } else {
                for _ in 0..self.num_neg {
                    let item = loop {
                        let candidate = rng.random_range(0..num_items);
                        if user_seen.binary_search(&candidate).is_err() {
                            break candidate;
                        }
                    };
                    store.add_edge(u, item);
                }
            }

            groups.push(PairGroup {
                positive: p,
                negatives: (start..store.num_edges()).collect(),
            });
        }

        if saturated_edges > 0 {
            warn!(
                edges = saturated_edges,
                "positives from users who interacted with every item; their negatives overlap training"
            );
        }

        let mut graph = HeteroGraph::new()
            .with_node_count(edge_type.src_type.clone(), train.num_nodes(&edge_type.src_type))
            .with_node_count(edge_type.dst_type.clone(), num_items);
        graph.insert_edges(edge_type, store)?;

        Ok(NegativeGraph {
            graph,
            pairs: PairIndex::new(groups),
        })
    }
}
