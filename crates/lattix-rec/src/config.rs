//! Run configuration.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{Error, Result};
use crate::metrics::Metric;
use crate::model::ModelKind;

/// Hyperparameters and output settings of one training run.
///
/// Every field has a default, so a JSON file only needs the fields it
/// overrides.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RecConfig {
    /// Maximum number of training epochs (default: 200).
    pub max_epoch: usize,
    /// Consecutive non-improving evaluations before stopping (default: 10).
    pub patience: usize,
    /// Evaluate on `val` every this many epochs (default: 1).
    pub evaluate_interval: usize,
    /// AdamW learning rate (default: 0.001).
    pub lr: f64,
    /// AdamW decoupled weight decay (default: 0.0).
    pub weight_decay: f64,
    /// Step per mini-batch instead of once per epoch (default: false).
    pub mini_batch_flag: bool,
    /// Positive edges per mini-batch (default: 1024).
    pub batch_size: usize,
    /// Top-K cutoff (default: 20).
    #[serde(alias = "K")]
    pub top_k: usize,
    /// Embedding L2 regularization weight (default: 0.0).
    pub reg_weight: f64,
    /// Negatives sampled per positive (default: 1).
    pub num_neg: usize,
    /// Embedding dimension (default: 64).
    pub hidden_dim: usize,
    /// LightGCN propagation depth (default: 3).
    pub num_layers: usize,
    /// Model architecture (default: lightgcn).
    pub model: ModelKind,
    /// Metric driving early stopping (default: recall).
    pub val_metric: Metric,
    /// A validation score equal to the best counts as an improvement
    /// (default: false).
    pub ties_improve: bool,
    /// Seed for sampling, shuffling and initialization (default: 42).
    pub seed: u64,
    /// Where the final report is written (default: results.json).
    pub results_path: PathBuf,
}

impl Default for RecConfig {
    fn default() -> Self {
        Self {
            max_epoch: 200,
            patience: 10,
            evaluate_interval: 1,
            lr: 0.001,
            weight_decay: 0.0,
            mini_batch_flag: false,
            batch_size: 1024,
            top_k: 20,
            reg_weight: 0.0,
            num_neg: 1,
            hidden_dim: 64,
            num_layers: 3,
            model: ModelKind::default(),
            val_metric: Metric::Recall,
            ties_improve: false,
            seed: 42,
            results_path: PathBuf::from("results.json"),
        }
    }
}

impl RecConfig {
    /// Load a config document; missing fields keep their defaults.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Check every constraint that does not depend on the dataset.
    pub fn validate(&self) -> Result<()> {
        fn positive(name: &str, value: usize) -> Result<()> {
            if value == 0 {
                return Err(Error::InvalidConfig(format!("{name} must be > 0")));
            }
            Ok(())
        }
        fn non_negative(name: &str, value: f64) -> Result<()> {
            if !value.is_finite() || value < 0.0 {
                return Err(Error::InvalidConfig(format!(
                    "{name} must be a finite value >= 0, got {value}"
                )));
            }
            Ok(())
        }

        positive("max_epoch", self.max_epoch)?;
        positive("evaluate_interval", self.evaluate_interval)?;
        positive("top_k", self.top_k)?;
        positive("num_neg", self.num_neg)?;
        positive("hidden_dim", self.hidden_dim)?;
        if self.mini_batch_flag {
            positive("batch_size", self.batch_size)?;
        }
        if !self.lr.is_finite() || self.lr <= 0.0 {
            return Err(Error::InvalidConfig(format!("lr must be > 0, got {}", self.lr)));
        }
        non_negative("weight_decay", self.weight_decay)?;
        non_negative("reg_weight", self.reg_weight)?;
        Ok(())
    }

    pub fn with_max_epoch(mut self, max_epoch: usize) -> Self {
        self.max_epoch = max_epoch;
        self
    }

    pub fn with_patience(mut self, patience: usize) -> Self {
        self.patience = patience;
        self
    }

    pub fn with_evaluate_interval(mut self, interval: usize) -> Self {
        self.evaluate_interval = interval;
        self
    }

    pub fn with_lr(mut self, lr: f64) -> Self {
        self.lr = lr;
        self
    }

    pub fn with_weight_decay(mut self, weight_decay: f64) -> Self {
        self.weight_decay = weight_decay;
        self
    }

    pub fn with_mini_batch(mut self, batch_size: usize) -> Self {
        self.mini_batch_flag = true;
        self.batch_size = batch_size;
        self
    }

    pub fn with_top_k(mut self, k: usize) -> Self {
        self.top_k = k;
        self
    }

    pub fn with_reg_weight(mut self, reg_weight: f64) -> Self {
        self.reg_weight = reg_weight;
        self
    }

    pub fn with_num_neg(mut self, num_neg: usize) -> Self {
        self.num_neg = num_neg;
        self
    }

    pub fn with_hidden_dim(mut self, dim: usize) -> Self {
        self.hidden_dim = dim;
        self
    }

    pub fn with_num_layers(mut self, layers: usize) -> Self {
        self.num_layers = layers;
        self
    }

    pub fn with_model(mut self, model: ModelKind) -> Self {
        self.model = model;
        self
    }

    pub fn with_val_metric(mut self, metric: Metric) -> Self {
        self.val_metric = metric;
        self
    }

    pub fn with_ties_improve(mut self, ties_improve: bool) -> Self {
        self.ties_improve = ties_improve;
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    pub fn with_results_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.results_path = path.into();
        self
    }
}
