//! lattix-rec CLI - train and evaluate user-item recommenders.
//!
//! # Usage
//!
//! ```bash
//! # Train LightGCN with defaults, write results.json
//! lattix-rec train --train train.tsv --val val.tsv --test test.tsv
//!
//! # Matrix factorization, mini-batches, custom cutoff and output
//! lattix-rec train --train train.tsv --val val.tsv --test test.tsv \
//!     --model mf --mini-batch --top-k 10 --results mf.json
//!
//! # Hyperparameters from a JSON file, flags override it
//! lattix-rec train --train train.tsv --val val.tsv --test test.tsv \
//!     --config run.json --max-epoch 50
//!
//! # Split sizes
//! lattix-rec stats --train train.tsv --val val.tsv --test test.tsv
//! ```
//!
//! Logs go to stderr; set `RUST_LOG=debug` for per-epoch losses.

use anyhow::{Context, Result};
use candle_core::Device;
use clap::{Parser, Subcommand, ValueEnum};
use indicatif::{ProgressBar, ProgressStyle};
use lattix_rec::{
    build_model, GraphProvider, Metric, ModelKind, RecConfig, RecDataset, Split, Trainer,
};
use std::io;
use std::path::PathBuf;
use std::time::Instant;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

#[derive(Parser)]
#[command(name = "lattix-rec")]
#[command(about = "BPR training and top-K evaluation for user-item graphs", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Train a model and write final test/val metrics
    Train {
        #[command(flatten)]
        splits: SplitFiles,

        /// JSON config file (missing fields keep defaults)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Results file
        #[arg(short, long)]
        results: Option<PathBuf>,

        /// Maximum number of epochs
        #[arg(long)]
        max_epoch: Option<usize>,

        /// Top-K cutoff
        #[arg(short = 'k', long)]
        top_k: Option<usize>,

        /// Embedding model
        #[arg(short, long)]
        model: Option<ModelArg>,

        /// Step once per mini-batch instead of once per epoch
        #[arg(long)]
        mini_batch: bool,

        /// Random seed
        #[arg(long)]
        seed: Option<u64>,
    },

    /// Show user/item/interaction counts of each split
    Stats {
        #[command(flatten)]
        splits: SplitFiles,
    },
}

#[derive(clap::Args)]
struct SplitFiles {
    /// Training interactions (`user item` per line)
    #[arg(long)]
    train: PathBuf,

    /// Validation interactions
    #[arg(long)]
    val: PathBuf,

    /// Test interactions
    #[arg(long)]
    test: PathBuf,
}

#[derive(Clone, Copy, ValueEnum)]
enum ModelArg {
    /// LightGCN propagation
    Lightgcn,
    /// Matrix factorization
    Mf,
}

impl From<ModelArg> for ModelKind {
    fn from(arg: ModelArg) -> Self {
        match arg {
            ModelArg::Lightgcn => ModelKind::LightGcn,
            ModelArg::Mf => ModelKind::Mf,
        }
    }
}

fn main() -> Result<()> {
    fmt()
        .with_writer(io::stderr)
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Train {
            splits,
            config,
            results,
            max_epoch,
            top_k,
            model,
            mini_batch,
            seed,
        } => {
            let mut cfg = match config {
                Some(path) => RecConfig::from_json_file(&path)
                    .with_context(|| format!("Failed to load config {}", path.display()))?,
                None => RecConfig::default(),
            };
            if let Some(path) = results {
                cfg = cfg.with_results_path(path);
            }
            if let Some(n) = max_epoch {
                cfg = cfg.with_max_epoch(n);
            }
            if let Some(k) = top_k {
                cfg = cfg.with_top_k(k);
            }
            if let Some(m) = model {
                cfg = cfg.with_model(m.into());
            }
            if mini_batch {
                cfg.mini_batch_flag = true;
            }
            if let Some(s) = seed {
                cfg = cfg.with_seed(s);
            }
            cmd_train(&splits, cfg)
        }
        Commands::Stats { splits } => cmd_stats(&splits),
    }
}

fn load_dataset(splits: &SplitFiles, num_neg: usize, seed: u64) -> Result<RecDataset> {
    let start = Instant::now();
    let pb = ProgressBar::new_spinner();
    pb.set_message(format!("Loading {}...", splits.train.display()));

    let dataset = RecDataset::from_files(&splits.train, &splits.val, &splits.test, num_neg, seed)
        .with_context(|| {
            format!(
                "Failed to load splits {}, {}, {}",
                splits.train.display(),
                splits.val.display(),
                splits.test.display()
            )
        })?;

    pb.finish_with_message(format!("Loaded in {:.2?}", start.elapsed()));
    Ok(dataset)
}

fn cmd_train(splits: &SplitFiles, config: RecConfig) -> Result<()> {
    config.validate()?;
    let dataset = load_dataset(splits, config.num_neg, config.seed)?;
    let k = config.top_k;

    let pb = ProgressBar::new(config.max_epoch as u64);
    pb.set_style(ProgressStyle::with_template(
        "{bar:30} {pos}/{len} [{elapsed_precise}] {msg}",
    )?);

    let start = Instant::now();
    let model = build_model(&config, &dataset, &Device::Cpu)?;
    let mut trainer = Trainer::new(&dataset, model, config)?.with_progress(pb);
    let (report, summary) = trainer.train().context("Training failed")?;
    info!(elapsed = ?start.elapsed(), epochs = summary.epochs_run(), "run finished");

    println!("Stopped:        {:?} after {} epochs", summary.stop_reason, summary.epochs_run());
    if let Some(epoch) = summary.best_epoch {
        println!("Best epoch:     {epoch}");
    }
    for (name, result) in [("Test", &report.test), ("Val", &report.val)] {
        println!(
            "{name:<5} Recall@{k}: {:.4}  NDCG@{k}: {:.4}",
            result.get(Metric::Recall).unwrap_or(f64::NAN),
            result.get(Metric::Ndcg).unwrap_or(f64::NAN),
        );
    }
    println!("Results:        {}", trainer.config().results_path.display());
    Ok(())
}

fn cmd_stats(splits: &SplitFiles) -> Result<()> {
    let dataset = load_dataset(splits, 1, 0)?;
    let link = dataset.target_link();
    let train = dataset.train_graph().interaction_stats(link);

    println!("Interaction Graph Statistics");
    println!("============================");
    println!("Users:          {}", train.users);
    println!("Items:          {}", train.items);

    let rows = [
        ("train", train),
        ("val", dataset.split_graph(Split::Val).interaction_stats(link)),
        ("test", dataset.split_graph(Split::Test).interaction_stats(link)),
    ];
    for (name, stats) in rows {
        println!(
            "{name:<6} {:>10} interactions {:>8} active users",
            stats.interactions, stats.active_users
        );
    }

    Ok(())
}
