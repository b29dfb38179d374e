//! Filtered top-K recommendation lists.
//!
//! Evaluation scores every (user, item) pair, removes what the user already
//! interacted with in training, and keeps the K best items per user.
//!
//! # Pipeline
//!
//! ```text
//! embeddings ──ScorePredictor──> scores (U·I,)      over the dense surface
//!            ──reshape──────────> matrix (U, I)     owned, row = user
//!            ──mask─────────────> train cells = -∞
//!            ──select───────────> K columns per row (partial selection)
//!            ──sort─────────────> those K, best first
//! ```
//!
//! # Filtered Ranking
//!
//! | Setting | Candidates | Use Case |
//! |---------|------------|----------|
//! | Raw | every item | pessimistic, penalizes re-recommending history |
//! | Filtered | items not seen in training | standard protocol |
//!
//! Masked cells hold `-∞`, so they only surface when a user has fewer than
//! K eligible items; they then fill the tail of the list, after every
//! eligible item. Lists therefore always hold exactly K items, and the
//! metrics tolerate K exceeding a user's held-out count.
//!
//! # Ordering
//!
//! Items are ordered by descending score; equal scores are broken by
//! ascending item id. NaN scores rank like `-∞`. The order is a total order,
//! so selection and sorting give the same list on every call.

use candle_core::{DType, Tensor};
use ndarray::Array2;
use std::cmp::Ordering;

use crate::error::{Error, Result};
use crate::hetero::{EdgeStore, HeteroGraph};
use crate::model::EmbeddingMap;
use crate::scoring::ScorePredictor;

/// Per-user ranked item lists, all of length K.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopKList {
    k: usize,
    lists: Vec<Vec<usize>>,
}

impl TopKList {
    /// Cutoff K.
    pub fn k(&self) -> usize {
        self.k
    }

    /// Number of users.
    pub fn num_users(&self) -> usize {
        self.lists.len()
    }

    /// Ranked items of `user`, best first.
    pub fn for_user(&self, user: usize) -> Option<&[usize]> {
        self.lists.get(user).map(|l| l.as_slice())
    }

    /// Iterate over (user, ranked items).
    pub fn iter(&self) -> impl Iterator<Item = (usize, &[usize])> {
        self.lists.iter().enumerate().map(|(u, l)| (u, l.as_slice()))
    }
}

/// Reshape a `(U·I,)` score vector into an owned `(U, I)` matrix.
///
/// The vector must follow the row-major layout of
/// [`HeteroGraph::full_bipartite`].
pub fn score_matrix(scores: &Tensor, num_users: usize, num_items: usize) -> Result<Array2<f32>> {
    let flat = scores.flatten_all()?.to_dtype(DType::F32)?.to_vec1::<f32>()?;
    let expected = num_users * num_items;
    if flat.len() != expected {
        return Err(Error::ShapeMismatch {
            expected,
            got: flat.len(),
        });
    }
    Ok(Array2::from_shape_vec((num_users, num_items), flat)?)
}

/// Set every training-positive cell to `-∞`.
pub fn mask_positives(matrix: &mut Array2<f32>, positives: &EdgeStore) -> Result<()> {
    let (num_users, num_items) = matrix.dim();
    for (u, i) in positives.iter() {
        if u >= num_users {
            return Err(Error::NodeOutOfRange {
                node_type: "user".into(),
                index: u,
                count: num_users,
            });
        }
        if i >= num_items {
            return Err(Error::NodeOutOfRange {
                node_type: "item".into(),
                index: i,
                count: num_items,
            });
        }
        matrix[[u, i]] = f32::NEG_INFINITY;
    }
    Ok(())
}

fn rank_key(score: f32) -> f32 {
    if score.is_nan() {
        f32::NEG_INFINITY
    } else {
        score
    }
}

/// Descending score, then ascending item id.
fn rank_order(row: &[f32], a: usize, b: usize) -> Ordering {
    rank_key(row[b])
        .total_cmp(&rank_key(row[a]))
        .then_with(|| a.cmp(&b))
}

/// Best `k` column indices of one row, best first.
///
/// Partial selection puts the `k` best columns in front in O(I); only those
/// `k` are then sorted.
pub fn top_k_row(row: &[f32], k: usize) -> Vec<usize> {
    let mut idx: Vec<usize> = (0..row.len()).collect();
    let k = k.min(idx.len());
    if k == 0 {
        return Vec::new();
    }
    if k < idx.len() {
        idx.select_nth_unstable_by(k - 1, |&a, &b| rank_order(row, a, b));
        idx.truncate(k);
    }
    idx.sort_unstable_by(|&a, &b| rank_order(row, a, b));
    idx
}

/// Top-`k` items of every row of `matrix`.
pub fn select_top_k(matrix: &Array2<f32>, k: usize) -> Result<TopKList> {
    let num_items = matrix.ncols();
    if k == 0 || k > num_items {
        return Err(Error::InvalidTopK { k, num_items });
    }

    let lists = matrix
        .rows()
        .into_iter()
        .map(|row| match row.as_slice() {
            Some(slice) => top_k_row(slice, k),
            None => top_k_row(&row.to_vec(), k),
        })
        .collect();

    Ok(TopKList { k, lists })
}

/// Scores a dense user × item surface and extracts filtered top-K lists.
#[derive(Debug, Clone)]
pub struct TopKEvaluator {
    predictor: ScorePredictor,
    surface: HeteroGraph,
    num_users: usize,
    num_items: usize,
    k: usize,
}

impl TopKEvaluator {
    /// Evaluator over all `num_users × num_items` pairs of the predictor's
    /// relation.
    pub fn new(predictor: ScorePredictor, num_users: usize, num_items: usize, k: usize) -> Result<Self> {
        if k == 0 || k > num_items {
            return Err(Error::InvalidTopK { k, num_items });
        }
        let surface = HeteroGraph::full_bipartite(predictor.edge_type(), num_users, num_items);
        Ok(Self {
            predictor,
            surface,
            num_users,
            num_items,
            k,
        })
    }

    /// Cutoff K.
    pub fn k(&self) -> usize {
        self.k
    }

    /// The dense candidate graph.
    pub fn surface(&self) -> &HeteroGraph {
        &self.surface
    }

    /// Score matrix with training positives masked to `-∞`.
    pub fn masked_scores(
        &self,
        embeddings: &EmbeddingMap,
        train_positives: &EdgeStore,
    ) -> Result<Array2<f32>> {
        let scores = self.predictor.score(&self.surface, embeddings)?;
        let mut matrix = score_matrix(&scores, self.num_users, self.num_items)?;
        mask_positives(&mut matrix, train_positives)?;
        Ok(matrix)
    }

    /// Filtered top-K list of every user.
    pub fn evaluate(&self, embeddings: &EmbeddingMap, train_positives: &EdgeStore) -> Result<TopKList> {
        let matrix = self.masked_scores(embeddings, train_positives)?;
        select_top_k(&matrix, self.k)
    }
}
