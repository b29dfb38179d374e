//! Dot-product edge scoring.
//!
//! The score of a user-item edge is `<h_user, h_item>`. Scores come back as a
//! 1-D tensor aligned with the edge order of the scored store, which is what
//! the ranking loss pairs against and what the top-K evaluator reshapes.

use candle_core::{Device, Tensor};

use crate::error::{Error, Result};
use crate::hetero::{EdgeStore, EdgeType, HeteroGraph, NodeType};
use crate::model::EmbeddingMap;

/// Scores the edges of one relation from an [`EmbeddingMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScorePredictor {
    edge_type: EdgeType,
}

impl ScorePredictor {
    /// Predictor for `edge_type`.
    pub fn new(edge_type: EdgeType) -> Self {
        Self { edge_type }
    }

    /// Predictor for the `user-item` relation.
    pub fn user_item() -> Self {
        Self::new(EdgeType::user_item())
    }

    /// The relation this predictor scores.
    pub fn edge_type(&self) -> &EdgeType {
        &self.edge_type
    }

    /// Score every edge of this predictor's relation in `graph`.
    ///
    /// A graph without that relation scores like an empty edge set.
    pub fn score(&self, graph: &HeteroGraph, embeddings: &EmbeddingMap) -> Result<Tensor> {
        match graph.edge_store(&self.edge_type) {
            Some(store) => self.score_edges(store, embeddings),
            None => self.score_edges(&EdgeStore::new(), embeddings),
        }
    }

    /// Score the edges of `store`, one scalar per edge.
    ///
    /// Returns a tensor of shape `(num_edges,)`; zero edges give shape `(0,)`.
    pub fn score_edges(&self, store: &EdgeStore, embeddings: &EmbeddingMap) -> Result<Tensor> {
        let src = embeddings.get(&self.edge_type.src_type)?;
        let dst = embeddings.get(&self.edge_type.dst_type)?;
        let device = src.device();

        if store.is_empty() {
            return Ok(Tensor::zeros(0, src.dtype(), device)?);
        }

        let src_idx = index_tensor(&store.src, src.dim(0)?, &self.edge_type.src_type, device)?;
        let dst_idx = index_tensor(&store.dst, dst.dim(0)?, &self.edge_type.dst_type, device)?;

        let h_src = src.index_select(&src_idx, 0)?;
        let h_dst = dst.index_select(&dst_idx, 0)?;
        Ok((h_src * h_dst)?.sum(1)?)
    }
}

/// Indices as a `u32` tensor, checked against the embedding row count.
fn index_tensor(
    indices: &[usize],
    count: usize,
    node_type: &NodeType,
    device: &Device,
) -> Result<Tensor> {
    let mut out = Vec::with_capacity(indices.len());
    for &index in indices {
        if index >= count {
            return Err(Error::NodeOutOfRange {
                node_type: node_type.to_string(),
                index,
                count,
            });
        }
        out.push(index as u32);
    }
    let len = out.len();
    Ok(Tensor::from_vec(out, len, device)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::DType;

    fn embeddings() -> EmbeddingMap {
        let device = Device::Cpu;
        let mut emb = EmbeddingMap::new();
        emb.insert(
            NodeType::user(),
            Tensor::new(&[[1.0f32, 0.0], [0.5, 2.0]], &device).unwrap(),
        );
        emb.insert(
            NodeType::item(),
            Tensor::new(&[[3.0f32, 1.0], [0.0, 1.0], [-1.0, 4.0]], &device).unwrap(),
        );
        emb
    }

    #[test]
    fn test_scores_are_dot_products() {
        let store = EdgeStore::from_edges(vec![0, 1, 1], vec![0, 1, 2]).unwrap();
        let scores = ScorePredictor::user_item()
            .score_edges(&store, &embeddings())
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();

        assert_eq!(scores, vec![3.0, 2.0, 7.5]);
    }

    #[test]
    fn test_empty_edge_set_scores_empty() {
        let scores = ScorePredictor::user_item()
            .score_edges(&EdgeStore::new(), &embeddings())
            .unwrap();
        assert_eq!(scores.dims(), &[0]);
    }

    #[test]
    fn test_graph_without_relation_scores_empty() {
        let graph = HeteroGraph::new()
            .with_node_count(NodeType::user(), 2)
            .with_node_count(NodeType::item(), 3);
        let scores = ScorePredictor::user_item().score(&graph, &embeddings()).unwrap();
        assert_eq!(scores.dims(), &[0]);
    }

    #[test]
    fn test_full_bipartite_scores_row_major() {
        let graph = HeteroGraph::full_bipartite(&EdgeType::user_item(), 2, 3);
        let scores = ScorePredictor::user_item()
            .score(&graph, &embeddings())
            .unwrap()
            .to_vec1::<f32>()
            .unwrap();
        assert_eq!(scores, vec![3.0, 0.0, -1.0, 3.5, 2.0, 7.5]);
    }

    #[test]
    fn test_out_of_range_index() {
        let store = EdgeStore::from_edges(vec![2], vec![0]).unwrap();
        let err = ScorePredictor::user_item()
            .score_edges(&store, &embeddings())
            .unwrap_err();
        assert!(matches!(err, Error::NodeOutOfRange { index: 2, count: 2, .. }));
    }

    #[test]
    fn test_missing_embedding_type() {
        let mut emb = EmbeddingMap::new();
        emb.insert(NodeType::user(), Tensor::zeros((1, 2), DType::F32, &Device::Cpu).unwrap());
        let store = EdgeStore::from_edges(vec![0], vec![0]).unwrap();
        assert!(matches!(
            ScorePredictor::user_item().score_edges(&store, &emb),
            Err(Error::MissingNodeType(_))
        ));
    }
}
