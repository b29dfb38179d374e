//! Bayesian Personalized Ranking loss.
//!
//! BPR (Rendle et al., 2009) asks every observed interaction to outscore
//! the sampled negatives paired with it:
//!
//! ```text
//! L = mean_{(p, n) ∈ pairs} -log σ(s_p - s_n)  +  λ · Σ_type mean(E_type²)
//! ```
//!
//! Pairs are explicit. A [`PairIndex`] lists, for each positive edge, the
//! positions of its negative edges, so a negative store does not have to
//! follow a fixed `num_neg`-block layout to line up with its positives.
//!
//! `-log σ(x)` is evaluated as `softplus(-x) = max(-x, 0) + log(1 + e^{-|x|})`,
//! which stays finite for large score gaps of either sign.

use candle_core::Tensor;

use crate::error::{Error, Result};
use crate::hetero::EdgeStore;
use crate::model::EmbeddingMap;
use crate::scoring::ScorePredictor;

/// One positive edge and the negative edges contrasted against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairGroup {
    /// Position of the positive edge in the positive store.
    pub positive: usize,
    /// Positions of its negatives in the negative store.
    pub negatives: Vec<usize>,
}

/// Explicit positive -> negatives grouping.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PairIndex {
    groups: Vec<PairGroup>,
}

impl PairIndex {
    /// Build from explicit groups.
    pub fn new(groups: Vec<PairGroup>) -> Self {
        Self { groups }
    }

    /// Grouping for negatives generated in contiguous blocks of `num_neg`
    /// per positive, in positive order.
    pub fn contiguous(num_pos: usize, num_neg: usize) -> Self {
        let groups = (0..num_pos)
            .map(|p| PairGroup {
                positive: p,
                negatives: (p * num_neg..(p + 1) * num_neg).collect(),
            })
            .collect();
        Self { groups }
    }

    /// The groups, in order.
    pub fn groups(&self) -> &[PairGroup] {
        &self.groups
    }

    /// Number of groups (positive edges).
    pub fn len(&self) -> usize {
        self.groups.len()
    }

    /// Whether there is no group.
    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }

    /// Total number of (positive, negative) pairs.
    pub fn num_pairs(&self) -> usize {
        self.groups.iter().map(|g| g.negatives.len()).sum()
    }

    /// Check every position against the store sizes.
    pub fn validate(&self, num_pos: usize, num_neg: usize) -> Result<()> {
        for group in &self.groups {
            if group.positive >= num_pos {
                return Err(Error::ShapeMismatch {
                    expected: num_pos,
                    got: group.positive + 1,
                });
            }
            if let Some(&bad) = group.negatives.iter().find(|&&n| n >= num_neg) {
                return Err(Error::ShapeMismatch {
                    expected: num_neg,
                    got: bad + 1,
                });
            }
        }
        Ok(())
    }

    /// Aligned (positive, negative) position vectors, one entry per pair.
    pub fn flatten(&self) -> (Vec<u32>, Vec<u32>) {
        let n = self.num_pairs();
        let mut pos = Vec::with_capacity(n);
        let mut neg = Vec::with_capacity(n);
        for group in &self.groups {
            for &negative in &group.negatives {
                pos.push(group.positive as u32);
                neg.push(negative as u32);
            }
        }
        (pos, neg)
    }

    /// Restrict to the groups at `group_ids`.
    ///
    /// Returns the positive and negative edges those groups touch plus a
    /// grouping re-indexed into the two new stores.
    pub fn batch(
        &self,
        group_ids: &[usize],
        positives: &EdgeStore,
        negatives: &EdgeStore,
    ) -> (EdgeStore, EdgeStore, PairIndex) {
        let mut pos_positions = Vec::with_capacity(group_ids.len());
        let mut neg_positions = Vec::new();
        let mut groups = Vec::with_capacity(group_ids.len());

        for (local, &g) in group_ids.iter().enumerate() {
            let group = &self.groups[g];
            pos_positions.push(group.positive);
            let start = neg_positions.len();
            neg_positions.extend_from_slice(&group.negatives);
            groups.push(PairGroup {
                positive: local,
                negatives: (start..neg_positions.len()).collect(),
            });
        }

        (
            positives.select(&pos_positions),
            negatives.select(&neg_positions),
            PairIndex::new(groups),
        )
    }
}

/// BPR term over already-computed scores.
///
/// `pos_scores[p]` is contrasted with `neg_scores[n]` for every pair of
/// `pairs`; the result is the mean of `-log σ(pos - neg)` as a scalar tensor.
pub fn bpr_loss(pos_scores: &Tensor, neg_scores: &Tensor, pairs: &PairIndex) -> Result<Tensor> {
    pairs.validate(pos_scores.dim(0)?, neg_scores.dim(0)?)?;
    if pairs.num_pairs() == 0 {
        return Err(Error::Training("ranking loss needs at least one pair".into()));
    }

    let device = pos_scores.device();
    let (pos_idx, neg_idx) = pairs.flatten();
    let n = pos_idx.len();
    let pos_idx = Tensor::from_vec(pos_idx, n, device)?;
    let neg_idx = Tensor::from_vec(neg_idx, n, device)?;

    let p = pos_scores.index_select(&pos_idx, 0)?;
    let q = neg_scores.index_select(&neg_idx, 0)?;

    // -log σ(d) = softplus(-d)
    let z = (q - p)?;
    let softplus = (z.relu()? + (z.abs()?.neg()?.exp()? + 1.0)?.log()?)?;
    Ok(softplus.mean_all()?)
}

/// Σ over node types of the mean squared embedding value.
pub fn regularization_loss(embeddings: &EmbeddingMap) -> Result<Tensor> {
    let mut total: Option<Tensor> = None;
    for (_, emb) in embeddings.iter() {
        let term = emb.sqr()?.mean_all()?;
        total = Some(match total {
            Some(acc) => (acc + term)?,
            None => term,
        });
    }
    total.ok_or_else(|| Error::Training("regularization over an empty embedding map".into()))
}

/// BPR plus weighted L2 regularization on the embeddings.
#[derive(Debug, Clone)]
pub struct RankingLoss {
    predictor: ScorePredictor,
    reg_weight: f64,
}

impl RankingLoss {
    /// Loss scoring edges with `predictor`; `reg_weight = 0` disables the
    /// regularization term.
    pub fn new(predictor: ScorePredictor, reg_weight: f64) -> Self {
        Self {
            predictor,
            reg_weight,
        }
    }

    /// Full loss for one step.
    pub fn compute(
        &self,
        positives: &EdgeStore,
        negatives: &EdgeStore,
        pairs: &PairIndex,
        embeddings: &EmbeddingMap,
    ) -> Result<Tensor> {
        let pos_scores = self.predictor.score_edges(positives, embeddings)?;
        let neg_scores = self.predictor.score_edges(negatives, embeddings)?;
        let bpr = bpr_loss(&pos_scores, &neg_scores, pairs)?;

        if self.reg_weight == 0.0 {
            return Ok(bpr);
        }
        let reg = regularization_loss(embeddings)?;
        Ok((bpr + (reg * self.reg_weight)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hetero::NodeType;
    use candle_core::Device;

    fn scalar(t: &Tensor) -> f32 {
        t.to_scalar::<f32>().unwrap()
    }

    #[test]
    fn test_contiguous_layout() {
        let pairs = PairIndex::contiguous(2, 3);
        assert_eq!(pairs.len(), 2);
        assert_eq!(pairs.num_pairs(), 6);
        let (pos, neg) = pairs.flatten();
        assert_eq!(pos, vec![0, 0, 0, 1, 1, 1]);
        assert_eq!(neg, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_bpr_matches_closed_form() {
        let device = Device::Cpu;
        let pos = Tensor::new(&[2.0f32, 0.0], &device).unwrap();
        let neg = Tensor::new(&[1.0f32, 0.0], &device).unwrap();
        let pairs = PairIndex::contiguous(2, 1);

        let loss = scalar(&bpr_loss(&pos, &neg, &pairs).unwrap());
        // -log σ(1) = ln(1 + e^-1), -log σ(0) = ln 2
        let expected = ((1.0f32 + (-1.0f32).exp()).ln() + 2.0f32.ln()) / 2.0;
        assert!((loss - expected).abs() < 1e-6);
    }

    #[test]
    fn test_bpr_stable_for_large_gaps() {
        let device = Device::Cpu;
        let pos = Tensor::new(&[-200.0f32], &device).unwrap();
        let neg = Tensor::new(&[200.0f32], &device).unwrap();
        let loss = scalar(&bpr_loss(&pos, &neg, &PairIndex::contiguous(1, 1)).unwrap());
        assert!(loss.is_finite());
        assert!((loss - 400.0).abs() < 1e-3);
    }

    #[test]
    fn test_bpr_shift_invariant() {
        let device = Device::Cpu;
        let pos = Tensor::new(&[0.3f32, -1.2], &device).unwrap();
        let neg = Tensor::new(&[0.1f32, 0.7, -0.4, 2.0], &device).unwrap();
        let pairs = PairIndex::contiguous(2, 2);

        let base = scalar(&bpr_loss(&pos, &neg, &pairs).unwrap());
        let shifted = scalar(
            &bpr_loss(&(&pos + 5.0).unwrap(), &(&neg + 5.0).unwrap(), &pairs).unwrap(),
        );
        assert!((base - shifted).abs() < 1e-5);
    }

    #[test]
    fn test_explicit_groups_need_no_block_layout() {
        let device = Device::Cpu;
        let pos = Tensor::new(&[1.0f32, 3.0], &device).unwrap();
        // negatives for positive 1 come first, uneven group sizes
        let neg = Tensor::new(&[3.0f32, 1.0, 1.0], &device).unwrap();
        let pairs = PairIndex::new(vec![
            PairGroup { positive: 0, negatives: vec![1, 2] },
            PairGroup { positive: 1, negatives: vec![0] },
        ]);

        let loss = scalar(&bpr_loss(&pos, &neg, &pairs).unwrap());
        assert!((loss - 2.0f32.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_pairs_out_of_range() {
        let device = Device::Cpu;
        let pos = Tensor::new(&[1.0f32], &device).unwrap();
        let neg = Tensor::new(&[0.0f32], &device).unwrap();
        let err = bpr_loss(&pos, &neg, &PairIndex::contiguous(1, 2)).unwrap_err();
        assert!(matches!(err, Error::ShapeMismatch { expected: 1, got: 2 }));
    }

    #[test]
    fn test_regularization_sums_type_means() {
        let device = Device::Cpu;
        let mut emb = EmbeddingMap::new();
        emb.insert(NodeType::user(), Tensor::new(&[[1.0f32, 3.0]], &device).unwrap());
        emb.insert(NodeType::item(), Tensor::new(&[[2.0f32], [0.0]], &device).unwrap());

        // (1 + 9) / 2 + (4 + 0) / 2
        let reg = scalar(&regularization_loss(&emb).unwrap());
        assert!((reg - 7.0).abs() < 1e-6);
    }

    #[test]
    fn test_ranking_loss_adds_weighted_regularization() {
        let device = Device::Cpu;
        let mut emb = EmbeddingMap::new();
        emb.insert(NodeType::user(), Tensor::new(&[[1.0f32, 0.0]], &device).unwrap());
        emb.insert(NodeType::item(), Tensor::new(&[[1.0f32, 0.0], [0.0, 1.0]], &device).unwrap());
        let pos = EdgeStore::from_edges(vec![0], vec![0]).unwrap();
        let neg = EdgeStore::from_edges(vec![0], vec![1]).unwrap();
        let pairs = PairIndex::contiguous(1, 1);

        let plain = RankingLoss::new(ScorePredictor::user_item(), 0.0)
            .compute(&pos, &neg, &pairs, &emb)
            .unwrap();
        let reg = RankingLoss::new(ScorePredictor::user_item(), 0.5)
            .compute(&pos, &neg, &pairs, &emb)
            .unwrap();

        // user mean sq = 0.5, item mean sq = 0.5
        assert!((scalar(&reg) - scalar(&plain) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn test_batch_reindexes_groups() {
        let positives = EdgeStore::from_edges(vec![0, 1], vec![0, 1]).unwrap();
        let negatives = EdgeStore::from_edges(vec![0, 0, 1, 1], vec![2, 3, 2, 3]).unwrap();
        let pairs = PairIndex::contiguous(2, 2);

        let (pos, neg, local) = pairs.batch(&[1], &positives, &negatives);
        assert_eq!(pos.src, vec![1]);
        assert_eq!(neg.dst, vec![2, 3]);
        assert_eq!(neg.src, vec![1, 1]);
        assert_eq!(local, PairIndex::contiguous(1, 2));
    }
}
