//! Top-K recommendation metrics.
//!
//! Both metrics compare each user's top-K list against the items that user
//! interacted with in a held-out split, then average over users.
//!
//! # Metrics Overview
//!
//! | Metric | Range | Interpretation |
//! |--------|-------|----------------|
//! | Recall@K | [0, 1] | Fraction of held-out items that appear in the top K |
//! | NDCG@K | [0, 1] | Discounted gain of held-out hits against the ideal list |
//!
//! Users with an empty held-out set are skipped: they neither add to the sum
//! nor to the denominator. A split in which every user is skipped has no
//! defined metric and yields [`Error::UndefinedMetric`].
//!
//! # Example
//!
//! ```rust
//! use lattix_rec::metrics::compute_dcg;
//!
//! // (2^1 - 1)/log2(2) + (2^1 - 1)/log2(3) + 0
//! assert!((compute_dcg(&[1.0, 1.0, 0.0]) - 1.6309).abs() < 1e-3);
//! ```
//!
//! # NDCG relevance vector
//!
//! The relevance vector of a user is indexed over that user's held-out items
//! in ascending item id order: entry `j` is 1 when the `j`-th held-out item
//! appears anywhere in the top K. It is discounted by that position, not by
//! the rank the item reached. The ideal vector is `min(|held-out|, K)` ones.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::{Error, Result};
use crate::topk::TopKList;

/// A supported ranking metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Metric {
    /// Recall@K.
    Recall,
    /// NDCG@K.
    Ndcg,
}

impl Metric {
    /// Every metric, in report order.
    pub const ALL: [Metric; 2] = [Metric::Recall, Metric::Ndcg];

    /// Lowercase name, as used in configs and reports.
    pub fn as_str(&self) -> &'static str {
        match self {
            Metric::Recall => "recall",
            Metric::Ndcg => "ndcg",
        }
    }
}

impl fmt::Display for Metric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Metric {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "recall" => Ok(Metric::Recall),
            "ndcg" => Ok(Metric::Ndcg),
            other => Err(Error::UnknownMetric(other.to_string())),
        }
    }
}

/// Metric name -> value, serialized as a JSON object in report order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetricResult(BTreeMap<Metric, f64>);

impl MetricResult {
    /// Empty result.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `metric`.
    pub fn insert(&mut self, metric: Metric, value: f64) {
        self.0.insert(metric, value);
    }

    /// Value of `metric`, if computed.
    pub fn get(&self, metric: Metric) -> Option<f64> {
        self.0.get(&metric).copied()
    }

    /// Iterate in report order.
    pub fn iter(&self) -> impl Iterator<Item = (Metric, f64)> + '_ {
        self.0.iter().map(|(m, v)| (*m, *v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Discounted Cumulative Gain.
///
/// # Formula
///
/// ```text
/// DCG = Σᵢ (2^relᵢ - 1) / log₂(i + 1)      i = 1..n
/// ```
///
/// # Returns
///
/// DCG ≥ 0. An empty vector gives 0.
pub fn compute_dcg(relevance: &[f64]) -> f64 {
    relevance
        .iter()
        .enumerate()
        .map(|(i, &rel)| (rel.exp2() - 1.0) / ((i + 2) as f64).log2())
        .sum()
}

/// Recall of one user: `|top ∩ held-out| / |held-out|`.
///
/// `None` when `heldout` is empty.
pub fn user_recall(top: &[usize], heldout: &[usize]) -> Option<f64> {
    if heldout.is_empty() {
        return None;
    }
    let hits: HashSet<usize> = top.iter().copied().collect();
    let found = heldout.iter().filter(|i| hits.contains(i)).count();
    Some(found as f64 / heldout.len() as f64)
}

/// NDCG of one user at cutoff `k`.
///
/// `heldout` is read in ascending item id order regardless of how it is
/// passed. `None` when `heldout` is empty (zero ideal gain).
pub fn user_ndcg(top: &[usize], heldout: &[usize], k: usize) -> Option<f64> {
    let ideal_len = heldout.len().min(k);
    let idcg = compute_dcg(&vec![1.0; ideal_len]);
    if idcg <= 0.0 {
        return None;
    }

    let hits: HashSet<usize> = top.iter().copied().collect();
    let mut sorted = heldout.to_vec();
    sorted.sort_unstable();
    let relevance: Vec<f64> = sorted
        .iter()
        .map(|i| if hits.contains(i) { 1.0 } else { 0.0 })
        .collect();

    Some(compute_dcg(&relevance) / idcg)
}

fn check_users(top_k: &TopKList, heldout: &[Vec<usize>]) -> Result<()> {
    if heldout.len() > top_k.num_users() {
        return Err(Error::ShapeMismatch {
            expected: top_k.num_users(),
            got: heldout.len(),
        });
    }
    Ok(())
}

fn mean_over_defined(
    metric: Metric,
    top_k: &TopKList,
    heldout: &[Vec<usize>],
    per_user: impl Fn(&[usize], &[usize]) -> Option<f64>,
) -> Result<f64> {
    check_users(top_k, heldout)?;

    let mut sum = 0.0;
    let mut defined = 0usize;
    for (user, items) in heldout.iter().enumerate() {
        let top = top_k.for_user(user).unwrap_or(&[]);
        if let Some(value) = per_user(top, items) {
            sum += value;
            defined += 1;
        }
    }

    if defined == 0 {
        return Err(Error::UndefinedMetric {
            metric: metric.to_string(),
        });
    }
    Ok(sum / defined as f64)
}

/// Recall@K averaged over users with at least one held-out item.
///
/// `heldout[u]` lists the held-out items of user `u`.
///
/// # Example
///
/// ```rust
/// use lattix_rec::metrics::recall_at_k;
/// use lattix_rec::topk::select_top_k;
/// use ndarray::array;
///
/// let scores = array![[0.9f32, 0.1, 0.5], [0.2, 0.8, 0.3]];
/// let top = select_top_k(&scores, 2).unwrap();
///
/// // user 0: item 2 found; user 1: 1 of 2 found
/// let recall = recall_at_k(&top, &[vec![2], vec![0, 1]]).unwrap();
/// assert!((recall - 0.75).abs() < 1e-9);
/// ```
pub fn recall_at_k(top_k: &TopKList, heldout: &[Vec<usize>]) -> Result<f64> {
    mean_over_defined(Metric::Recall, top_k, heldout, user_recall)
}

/// NDCG@K averaged over users with at least one held-out item.
pub fn ndcg_at_k(top_k: &TopKList, heldout: &[Vec<usize>]) -> Result<f64> {
    let k = top_k.k();
    mean_over_defined(Metric::Ndcg, top_k, heldout, |top, items| {
        user_ndcg(top, items, k)
    })
}

/// Compute each requested metric.
pub fn compute_metrics(
    metrics: &[Metric],
    top_k: &TopKList,
    heldout: &[Vec<usize>],
) -> Result<MetricResult> {
    let mut result = MetricResult::new();
    for &metric in metrics {
        let value = match metric {
            Metric::Recall => recall_at_k(top_k, heldout)?,
            Metric::Ndcg => ndcg_at_k(top_k, heldout)?,
        };
        result.insert(metric, value);
    }
    Ok(result)
}
