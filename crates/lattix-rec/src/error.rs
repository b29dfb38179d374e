//! Error types for lattix-rec.

use thiserror::Error;

/// lattix-rec error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Score buffer could not be reshaped.
    #[error("shape error: {0}")]
    Shape(#[from] ndarray::ShapeError),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON (de)serialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Malformed line in an interaction file.
    #[error("{path}:{line}: {message}")]
    Parse {
        path: String,
        line: usize,
        message: String,
    },

    /// Evaluation split other than `val` or `test`.
    #[error("split must be one of [val, test], got {0:?}")]
    InvalidSplit(String),

    /// Metric name with no implementation.
    #[error("metric not implemented: {0:?}")]
    UnknownMetric(String),

    /// Every user in the split has an empty held-out set.
    #[error("{metric} is undefined: no user has a held-out item in this split")]
    UndefinedMetric {
        /// Metric being aggregated.
        metric: String,
    },

    /// Dimension mismatch between collaborating tensors or edge sets.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    ShapeMismatch { expected: usize, got: usize },

    /// Top-K cutoff outside `1..=num_items`.
    #[error("top-k cutoff {k} must satisfy 0 < k <= {num_items}")]
    InvalidTopK { k: usize, num_items: usize },

    /// Node index outside the dense `[0, count)` range of its type.
    #[error("{node_type} index {index} out of range (count {count})")]
    NodeOutOfRange {
        node_type: String,
        index: usize,
        count: usize,
    },

    /// Node type absent from a graph or embedding map.
    #[error("missing node type: {0}")]
    MissingNodeType(String),

    /// Edge type absent from a graph.
    #[error("missing edge type: {0}")]
    MissingEdgeType(String),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Training error (e.g. a non-finite loss).
    #[error("training error: {0}")]
    Training(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
