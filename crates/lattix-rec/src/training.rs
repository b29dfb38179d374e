//! BPR training loop with periodic top-K validation.
//!
//! # Run States
//!
//! ```text
//! Preprocessing ──> Training(epoch) ──┬──> PeriodicEval ──> EarlyStopCheck ──┐
//!   negatives,          │             │     (epoch % evaluate_interval == 0)  │
//!   optimizer           └─────────────┴───────────── next epoch <─────────────┘
//!                                               │
//!                            Stopped(early | max_epoch)
//!                                               │
//!                     FinalEval (restore best; test, then val) ──> Report
//! ```
//!
//! # Steps
//!
//! | Mode | Optimizer steps per epoch | Reported loss |
//! |------|---------------------------|---------------|
//! | full graph | 1 | loss over every positive group |
//! | mini-batch | ceil(groups / batch_size) | mean chunk loss |
//!
//! Every step recomputes the embeddings from the full training graph, since
//! propagation models need all neighbors. Mini-batches only restrict which
//! positive/negative pairs enter the loss. A non-finite loss aborts the run
//! with [`Error::Training`] before the optimizer touches the parameters.

use candle_core::Device;
use candle_nn::optim::{AdamW, Optimizer, ParamsAdamW};
use indicatif::ProgressBar;
use rand::prelude::*;
use rand_xorshift::XorShiftRng;
use serde::{Deserialize, Serialize};
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

use crate::config::RecConfig;
use crate::dataset::{GraphProvider, Split};
use crate::early_stopping::{Direction, EarlyStopping};
use crate::error::{Error, Result};
use crate::hetero::{EdgeStore, HeteroGraph, NodeType};
use crate::loss::{PairIndex, RankingLoss};
use crate::metrics::{compute_metrics, Metric, MetricResult};
use crate::model::{EmbeddingModel, LightGcn, MatrixFactorization, ModelKind};
use crate::sampling::NegativeGraph;
use crate::scoring::ScorePredictor;
use crate::topk::TopKEvaluator;

/// Final metrics of a run, as written to the results file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    #[serde(rename = "Test_metric")]
    pub test: MetricResult,
    #[serde(rename = "Val_metric")]
    pub val: MetricResult,
}

impl RunReport {
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Write one JSON document followed by a newline.
    pub fn write_json(&self, path: impl AsRef<Path>) -> Result<()> {
        let mut file = std::fs::File::create(path)?;
        serde_json::to_writer(&mut file, self)?;
        file.write_all(b"\n")?;
        Ok(())
    }
}

/// Why training ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// Validation stalled for `patience` evaluations.
    EarlyStop,
    /// `max_epoch` epochs completed.
    MaxEpoch,
}

/// What happened during training.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrainingSummary {
    /// Loss of every epoch run.
    pub loss_history: Vec<f32>,
    /// Epoch whose parameters were restored for the final evaluation.
    pub best_epoch: Option<usize>,
    /// Validation score of `best_epoch`.
    pub best_score: Option<f64>,
    pub stop_reason: StopReason,
}

impl TrainingSummary {
    pub fn epochs_run(&self) -> usize {
        self.loss_history.len()
    }
}

/// Build the model `config` asks for over the provider's training graph.
pub fn build_model<P: GraphProvider + ?Sized>(
    config: &RecConfig,
    provider: &P,
    device: &Device,
) -> Result<Box<dyn EmbeddingModel>> {
    let link = provider.target_link();
    let model: Box<dyn EmbeddingModel> = match config.model {
        ModelKind::Mf => Box::new(MatrixFactorization::new(
            provider.num_nodes(&link.src_type),
            provider.num_nodes(&link.dst_type),
            config.hidden_dim,
            config.seed,
            device,
        )?),
        ModelKind::LightGcn => Box::new(LightGcn::new(
            provider.train_graph(),
            link,
            config.hidden_dim,
            config.num_layers,
            config.seed,
            device,
        )?),
    };
    Ok(model)
}

/// Trains one model against one [`GraphProvider`].
pub struct Trainer<'a, P: GraphProvider + ?Sized, M: EmbeddingModel> {
    config: RecConfig,
    provider: &'a P,
    model: M,
    loss: RankingLoss,
    evaluator: TopKEvaluator,
    /// Training graph restricted to the target relation.
    train: HeteroGraph,
    negatives: NegativeGraph,
    optimizer: AdamW,
    val_heldout: Vec<Vec<usize>>,
    test_heldout: Vec<Vec<usize>>,
    progress: ProgressBar,
}

impl<'a, P: GraphProvider + ?Sized, M: EmbeddingModel> Trainer<'a, P, M> {
    /// Preprocess: validate the config, sample negatives, set up the
    /// optimizer and cache the held-out item lists.
    pub fn new(provider: &'a P, model: M, config: RecConfig) -> Result<Self> {
        config.validate()?;

        let link = provider.target_link().clone();
        let num_users = provider.num_nodes(&link.src_type);
        let num_items = provider.num_nodes(&link.dst_type);
        let predictor = ScorePredictor::new(link.clone());
        let evaluator = TopKEvaluator::new(predictor.clone(), num_users, num_items, config.top_k)?;

        let train = provider
            .train_graph()
            .edge_type_subgraph(std::slice::from_ref(&link));
        let negatives = provider.construct_negatives(&train)?;
        negatives.pairs.validate(
            train.require_edges(&link)?.num_edges(),
            negatives.edges(&link)?.num_edges(),
        )?;

        let params = ParamsAdamW {
            lr: config.lr,
            weight_decay: config.weight_decay,
            ..Default::default()
        };
        let optimizer = AdamW::new(model.varmap().all_vars(), params)?;

        let val_heldout = provider.split_graph(Split::Val).successor_lists(&link);
        let test_heldout = provider.split_graph(Split::Test).successor_lists(&link);

        Ok(Self {
            loss: RankingLoss::new(predictor, config.reg_weight),
            config,
            provider,
            model,
            evaluator,
            train,
            negatives,
            optimizer,
            val_heldout,
            test_heldout,
            progress: ProgressBar::hidden(),
        })
    }

    /// Report epoch progress on `bar` (hidden by default).
    pub fn with_progress(mut self, bar: ProgressBar) -> Self {
        self.progress = bar;
        self
    }

    pub fn config(&self) -> &RecConfig {
        &self.config
    }

    pub fn model(&self) -> &M {
        &self.model
    }

    pub fn negatives(&self) -> &NegativeGraph {
        &self.negatives
    }

    /// Run one epoch and return its loss.
    pub fn train_epoch(&mut self, epoch: usize) -> Result<f32> {
        let link = self.provider.target_link();
        let graph = &self.train;
        let positives = graph.require_edges(link)?;
        let negatives = self.negatives.edges(link)?;
        let pairs = &self.negatives.pairs;

        if !self.config.mini_batch_flag {
            return optimizer_step(
                &mut self.optimizer,
                &self.model,
                &self.loss,
                graph,
                (positives, negatives, pairs),
            );
        }

        let mut order: Vec<usize> = (0..pairs.len()).collect();
        let mut rng = XorShiftRng::seed_from_u64(self.config.seed.wrapping_add(epoch as u64));
        order.shuffle(&mut rng);

        let mut total = 0.0f32;
        let mut chunks = 0usize;
        for chunk in order.chunks(self.config.batch_size) {
            let (pos, neg, batch_pairs) = pairs.batch(chunk, positives, negatives);
            total += optimizer_step(
                &mut self.optimizer,
                &self.model,
                &self.loss,
                graph,
                (&pos, &neg, &batch_pairs),
            )?;
            chunks += 1;
        }
        if chunks == 0 {
            return Err(Error::Training("no positive edges to train on".into()));
        }
        Ok(total / chunks as f32)
    }

    /// Recall@K and NDCG@K of the current parameters on `split`.
    ///
    /// Embeddings come from the training graph; training positives are
    /// masked out of every user's list.
    pub fn evaluate(&self, split: Split) -> Result<MetricResult> {
        let embeddings = self.model.forward(&self.train)?;
        let positives = self.train.require_edges(self.provider.target_link())?;
        let top_k = self.evaluator.evaluate(&embeddings, positives)?;
        let heldout = match split {
            Split::Val => &self.val_heldout,
            Split::Test => &self.test_heldout,
        };
        let result = compute_metrics(&Metric::ALL, &top_k, heldout)?;
        debug!(
            split = %split,
            recall = result.get(Metric::Recall),
            ndcg = result.get(Metric::Ndcg),
            "evaluated"
        );
        Ok(result)
    }

    /// [`Trainer::evaluate`] on a split given by name (`val` or `test`).
    pub fn evaluate_named(&self, split: &str) -> Result<MetricResult> {
        let split: Split = split.parse()?;
        self.evaluate(split)
    }

    /// Train until early stop or `max_epoch`, leaving the best checkpoint
    /// loaded in the model.
    pub fn fit(&mut self) -> Result<TrainingSummary> {
        let k = self.config.top_k;
        let val_metric = self.config.val_metric;
        let mut stopper = EarlyStopping::new(self.config.patience, Direction::Maximize)
            .with_ties_improve(self.config.ties_improve);
        let mut loss_history = Vec::with_capacity(self.config.max_epoch);
        let mut stop_reason = StopReason::MaxEpoch;

        info!(
            users = self.provider.num_nodes(&NodeType::user()),
            items = self.provider.num_nodes(&NodeType::item()),
            positives = self.train.total_edges(),
            negatives = self.negatives.pairs.num_pairs(),
            max_epoch = self.config.max_epoch,
            mini_batch = self.config.mini_batch_flag,
            "training started"
        );
        self.progress.set_length(self.config.max_epoch as u64);

        for epoch in 0..self.config.max_epoch {
            let loss = self.train_epoch(epoch)?;
            loss_history.push(loss);
            debug!(epoch, loss, "epoch finished");

            if epoch % self.config.evaluate_interval == 0 {
                let metrics = self.evaluate(Split::Val)?;
                let score = metrics
                    .get(val_metric)
                    .ok_or_else(|| Error::UnknownMetric(val_metric.to_string()))?;
                let recall = metrics.get(Metric::Recall).unwrap_or(f64::NAN);
                let ndcg = metrics.get(Metric::Ndcg).unwrap_or(f64::NAN);
                self.progress.set_message(format!(
                    "Epoch {epoch:05} | Recall@{k} {recall:.4} | NDCG@{k} {ndcg:.4} | Loss {loss:.4}"
                ));

                stopper.step(epoch, score, self.model.varmap())?;
                if stopper.should_stop() {
                    info!(
                        epoch,
                        best_epoch = stopper.best_epoch(),
                        best_score = stopper.best_score(),
                        "early stopping"
                    );
                    stop_reason = StopReason::EarlyStop;
                    self.progress.inc(1);
                    break;
                }
            }
            self.progress.inc(1);
        }
        self.progress.finish();

        stopper.restore_best(self.model.varmap())?;
        Ok(TrainingSummary {
            loss_history,
            best_epoch: stopper.best_epoch(),
            best_score: stopper.best_score(),
            stop_reason,
        })
    }

    /// Evaluate `test`, then `val`, on the current parameters.
    pub fn final_report(&self) -> Result<RunReport> {
        let test = self.evaluate(Split::Test)?;
        let val = self.evaluate(Split::Val)?;
        for (metric, value) in test.iter() {
            info!(split = "test", metric = %metric, value, "final");
        }
        for (metric, value) in val.iter() {
            info!(split = "val", metric = %metric, value, "final");
        }
        Ok(RunReport { test, val })
    }

    /// Full run: fit, final evaluation, then write the report to
    /// `results_path`.
    pub fn train(&mut self) -> Result<(RunReport, TrainingSummary)> {
        let summary = self.fit()?;
        let report = self.final_report()?;
        report.write_json(&self.config.results_path)?;
        info!(path = %self.config.results_path.display(), "results written");
        Ok((report, summary))
    }
}

/// One optimizer step on a `(positives, negatives, pairs)` batch; returns
/// the loss.
fn optimizer_step<M: EmbeddingModel + ?Sized>(
    optimizer: &mut AdamW,
    model: &M,
    loss: &RankingLoss,
    graph: &HeteroGraph,
    (positives, negatives, pairs): (&EdgeStore, &EdgeStore, &PairIndex),
) -> Result<f32> {
    let embeddings = model.forward(graph)?;
    let loss = loss.compute(positives, negatives, pairs, &embeddings)?;
    let value = loss.to_scalar::<f32>()?;
    if !value.is_finite() {
        return Err(Error::Training(format!("non-finite loss {value}")));
    }
    optimizer.backward_step(&loss)?;
    Ok(value)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dataset::RecDataset;

    fn dataset() -> RecDataset {
        // two taste clusters: users 0-2 like items 0-2, users 3-5 like items 3-5
        let mut train = Vec::new();
        let mut val = Vec::new();
        let mut test = Vec::new();
        for u in 0..6 {
            let base = if u < 3 { 0 } else { 3 };
            train.push((u, base + u % 3));
            train.push((u, base + (u + 1) % 3));
            val.push((u, base + (u + 2) % 3));
            test.push((u, base + (u + 2) % 3));
        }
        RecDataset::from_interactions(6, 8, &train, &val, &test, 2, 11).unwrap()
    }

    fn config() -> RecConfig {
        RecConfig::default()
            .with_max_epoch(4)
            .with_top_k(3)
            .with_hidden_dim(8)
            .with_num_layers(2)
            .with_lr(0.05)
            .with_results_path(std::env::temp_dir().join("lattix-rec-training-test.json"))
    }

    fn trainer<'a>(
        ds: &'a RecDataset,
        config: RecConfig,
    ) -> Trainer<'a, RecDataset, Box<dyn EmbeddingModel>> {
        let model = build_model(&config, ds, &Device::Cpu).unwrap();
        Trainer::new(ds, model, config).unwrap()
    }

    #[test]
    fn test_report_json_layout() {
        let mut test = MetricResult::new();
        test.insert(Metric::Recall, 0.5);
        test.insert(Metric::Ndcg, 0.25);
        let report = RunReport {
            test: test.clone(),
            val: test,
        };
        assert_eq!(
            report.to_json().unwrap(),
            r#"{"Test_metric":{"recall":0.5,"ndcg":0.25},"Val_metric":{"recall":0.5,"ndcg":0.25}}"#
        );
    }

    #[test]
    fn test_fit_runs_to_max_epoch() {
        let ds = dataset();
        let mut trainer = trainer(&ds, config().with_patience(100));
        let summary = trainer.fit().unwrap();

        assert_eq!(summary.stop_reason, StopReason::MaxEpoch);
        assert_eq!(summary.epochs_run(), 4);
        assert!(summary.loss_history.iter().all(|l| l.is_finite()));
        assert!(summary.best_epoch.is_some());
    }

    #[test]
    fn test_zero_patience_stops_early_or_keeps_improving() {
        let ds = dataset();
        let mut trainer = trainer(&ds, config().with_patience(0).with_max_epoch(30));
        let summary = trainer.fit().unwrap();
        match summary.stop_reason {
            StopReason::EarlyStop => assert!(summary.epochs_run() < 30),
            StopReason::MaxEpoch => assert_eq!(summary.epochs_run(), 30),
        }
    }

    #[test]
    fn test_mini_batch_epoch() {
        let ds = dataset();
        let mut trainer = trainer(&ds, config().with_mini_batch(4).with_model(ModelKind::Mf));
        let loss = trainer.train_epoch(0).unwrap();
        assert!(loss.is_finite() && loss > 0.0);
    }

    #[test]
    fn test_evaluate_metrics_in_range() {
        let ds = dataset();
        let trainer = trainer(&ds, config());
        let result = trainer.evaluate(Split::Val).unwrap();
        for metric in Metric::ALL {
            let v = result.get(metric).unwrap();
            assert!((0.0..=1.0).contains(&v), "{metric} = {v}");
        }
    }

    #[test]
    fn test_unknown_split_fails_fast() {
        let ds = dataset();
        let trainer = trainer(&ds, config());
        assert!(matches!(
            trainer.evaluate_named("train"),
            Err(Error::InvalidSplit(_))
        ));
    }

    #[test]
    fn test_top_k_above_items_rejected() {
        let ds = dataset();
        let config = config().with_top_k(9);
        let model = build_model(&config, &ds, &Device::Cpu).unwrap();
        assert!(matches!(
            Trainer::new(&ds, model, config),
            Err(Error::InvalidTopK { k: 9, num_items: 8 })
        ));
    }

    #[test]
    fn test_non_finite_loss_aborts_fit() {
        let ds = dataset();
        let model = MatrixFactorization::new(6, 8, 4, 0, &Device::Cpu).unwrap();
        for var in model.varmap().all_vars() {
            let nan = var.as_tensor().ones_like().unwrap().affine(0.0, f64::NAN).unwrap();
            var.set(&nan).unwrap();
        }
        let mut trainer = Trainer::new(&ds, model, config()).unwrap();

        let err = trainer.fit().unwrap_err();
        assert!(
            matches!(&err, Error::Training(msg) if msg.contains("non-finite loss")),
            "{err}"
        );
    }

    /// Provider whose training graph carries a second relation.
    struct WithClicks {
        inner: RecDataset,
        train: HeteroGraph,
    }

    impl GraphProvider for WithClicks {
        fn target_link(&self) -> &crate::hetero::EdgeType {
            self.inner.target_link()
        }

        fn splits(&self) -> (&HeteroGraph, &HeteroGraph, &HeteroGraph) {
            let (_, val, test) = self.inner.splits();
            (&self.train, val, test)
        }

        fn construct_negatives(&self, train: &HeteroGraph) -> Result<NegativeGraph> {
            self.inner.construct_negatives(train)
        }

        fn num_nodes(&self, node_type: &NodeType) -> usize {
            self.inner.num_nodes(node_type)
        }
    }

    #[test]
    fn test_trains_on_target_relation_only() {
        let inner = dataset();
        let mut train = inner.train_graph().clone();
        let clicks = crate::hetero::EdgeType::new("user", "clicks", "item");
        train.add_edge(&clicks, 0, 7).unwrap();
        train.add_edge(&clicks, 4, 6).unwrap();
        let provider = WithClicks { inner, train };

        let config = config().with_model(ModelKind::Mf);
        let model = build_model(&config, &provider, &Device::Cpu).unwrap();
        let mut trainer = Trainer::new(&provider, model, config).unwrap();

        assert_eq!(trainer.train.num_edge_types(), 1);
        assert_eq!(trainer.train.num_edges(&clicks), 0);
        assert_eq!(trainer.negatives().pairs.len(), 12);
        assert!(trainer.train_epoch(0).unwrap().is_finite());
    }

    #[test]
    fn test_train_writes_results() {
        let ds = dataset();
        let path = std::env::temp_dir().join("lattix-rec-train-writes.json");
        let mut trainer = trainer(&ds, config().with_results_path(&path));
        let (report, _) = trainer.train().unwrap();

        let text = std::fs::read_to_string(&path).unwrap();
        assert!(text.ends_with('\n'));
        let parsed: RunReport = serde_json::from_str(text.trim_end()).unwrap();
        assert_eq!(parsed, report);
    }
}
