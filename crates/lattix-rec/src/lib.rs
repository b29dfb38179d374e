//! Pairwise ranking training and top-K evaluation for user-item graphs.
//!
//! `lattix-rec` trains node embeddings on a bipartite interaction graph with
//! the Bayesian Personalized Ranking (BPR) loss and measures how well they
//! rank held-out interactions with Recall@K and NDCG@K.
//!
//! # Modules
//!
//! | Module | Role |
//! |--------|------|
//! | [`hetero`] | Typed node/edge graph storage |
//! | [`dataset`] | Train/val/test splits, interaction file loading |
//! | [`sampling`] | Uniform negative sampling |
//! | [`model`] | Embedding models (MF, LightGCN) and checkpoints |
//! | [`scoring`] | Dot-product edge scores |
//! | [`loss`] | BPR loss over explicit positive/negative pairs |
//! | [`topk`] | Masked, tie-broken top-K lists |
//! | [`metrics`] | Recall@K, NDCG@K |
//! | [`early_stopping`] | Patience-based stopping with best checkpoint |
//! | [`training`] | The epoch loop and final report |
//!
//! # Example
//!
//! ```rust,no_run
//! use candle_core::Device;
//! use lattix_rec::{build_model, RecConfig, RecDataset, Trainer};
//!
//! let config = RecConfig::default().with_max_epoch(50).with_top_k(10);
//! let dataset = RecDataset::from_files("train.tsv", "val.tsv", "test.tsv", config.num_neg, config.seed)?;
//!
//! let model = build_model(&config, &dataset, &Device::Cpu)?;
//! let mut trainer = Trainer::new(&dataset, model, config)?;
//! let (report, summary) = trainer.train()?;
//!
//! println!("{}", report.to_json()?);
//! println!("best epoch: {:?}", summary.best_epoch);
//! # Ok::<(), lattix_rec::Error>(())
//! ```

pub mod config;
pub mod dataset;
pub mod early_stopping;
pub mod error;
pub mod hetero;
pub mod loss;
pub mod metrics;
pub mod model;
pub mod sampling;
pub mod scoring;
pub mod topk;
pub mod training;

pub use config::RecConfig;
pub use dataset::{GraphProvider, RecDataset, Split};
pub use early_stopping::{Direction, EarlyStopping, StopState};
pub use error::{Error, Result};
pub use hetero::{EdgeStore, EdgeType, HeteroGraph, NodeType};
pub use loss::{bpr_loss, PairGroup, PairIndex, RankingLoss};
pub use metrics::{compute_dcg, ndcg_at_k, recall_at_k, Metric, MetricResult};
pub use model::{EmbeddingMap, EmbeddingModel, LightGcn, MatrixFactorization, ModelKind, ModelSnapshot};
pub use scoring::ScorePredictor;
pub use topk::{TopKEvaluator, TopKList};
pub use training::{build_model, RunReport, StopReason, Trainer, TrainingSummary};
