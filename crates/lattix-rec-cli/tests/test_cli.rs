use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::{Path, PathBuf};

fn get_test_dir() -> PathBuf {
    let dir = PathBuf::from("target/tmp/tests");
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// Writes train/val/test files for 4 users and 6 items.
fn write_splits(dir: &Path, prefix: &str) -> [PathBuf; 3] {
    let train = "# user item\nu0 i0\nu0 i1\nu1 i1\nu1 i2\nu2 i3\nu2 i4\nu3 i4\nu3 i5\n";
    let val = "u0 i2\nu1 i0\nu2 i5\n";
    let test = "u0 i3\nu2 i0\nu3 i3\n";

    let paths = [
        dir.join(format!("{prefix}_train.tsv")),
        dir.join(format!("{prefix}_val.tsv")),
        dir.join(format!("{prefix}_test.tsv")),
    ];
    for (path, content) in paths.iter().zip([train, val, test]) {
        fs::write(path, content).unwrap();
    }
    paths
}

fn split_args(cmd: &mut Command, paths: &[PathBuf; 3]) {
    cmd.arg("--train")
        .arg(&paths[0])
        .arg("--val")
        .arg(&paths[1])
        .arg("--test")
        .arg(&paths[2]);
}

#[test]
fn test_cli_stats() -> Result<(), Box<dyn std::error::Error>> {
    let dir = get_test_dir();
    let paths = write_splits(&dir, "stats");

    let mut cmd = Command::cargo_bin("lattix-rec")?;
    cmd.arg("stats");
    split_args(&mut cmd, &paths);
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Users:          4"))
        .stdout(predicate::str::contains("Items:          6"))
        .stdout(predicate::str::contains("8 interactions"))
        .stdout(predicate::str::contains("4 active users"));

    Ok(())
}

#[test]
fn test_cli_train_writes_results() -> Result<(), Box<dyn std::error::Error>> {
    let dir = get_test_dir();
    let paths = write_splits(&dir, "train_mf");
    let results = dir.join("train_mf_results.json");

    let mut cmd = Command::cargo_bin("lattix-rec")?;
    cmd.arg("train");
    split_args(&mut cmd, &paths);
    cmd.arg("--results")
        .arg(&results)
        .arg("--max-epoch")
        .arg("3")
        .arg("--top-k")
        .arg("2")
        .arg("--model")
        .arg("mf")
        .arg("--seed")
        .arg("7");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Recall@2"))
        .stdout(predicate::str::contains("NDCG@2"));

    let written = fs::read_to_string(&results)?;
    assert!(written.ends_with('\n'));
    let value: serde_json::Value = serde_json::from_str(&written)?;
    for split in ["Test_metric", "Val_metric"] {
        for metric in ["recall", "ndcg"] {
            let v = value[split][metric].as_f64().unwrap();
            assert!((0.0..=1.0).contains(&v), "{split}.{metric} = {v}");
        }
    }

    fs::remove_file(results)?;
    Ok(())
}

#[test]
fn test_cli_train_with_config_file() -> Result<(), Box<dyn std::error::Error>> {
    let dir = get_test_dir();
    let paths = write_splits(&dir, "train_cfg");
    let config = dir.join("train_cfg.json");
    let results = dir.join("train_cfg_results.json");
    fs::write(
        &config,
        format!(
            r#"{{"max_epoch": 2, "K": 3, "hidden_dim": 8, "num_layers": 1, "results_path": {:?}}}"#,
            results.display().to_string()
        ),
    )?;

    let mut cmd = Command::cargo_bin("lattix-rec")?;
    cmd.arg("train");
    split_args(&mut cmd, &paths);
    cmd.arg("--config").arg(&config).arg("--mini-batch");
    cmd.assert()
        .success()
        .stdout(predicate::str::contains("Recall@3"));

    assert!(results.exists());
    Ok(())
}

#[test]
fn test_cli_rejects_top_k_above_items() -> Result<(), Box<dyn std::error::Error>> {
    let dir = get_test_dir();
    let paths = write_splits(&dir, "bad_k");

    let mut cmd = Command::cargo_bin("lattix-rec")?;
    cmd.arg("train");
    split_args(&mut cmd, &paths);
    cmd.arg("--top-k")
        .arg("7")
        .arg("--results")
        .arg(dir.join("bad_k_results.json"));
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("top-k cutoff 7"));

    Ok(())
}

#[test]
fn test_cli_missing_file() -> Result<(), Box<dyn std::error::Error>> {
    let mut cmd = Command::cargo_bin("lattix-rec")?;
    cmd.arg("stats")
        .arg("--train")
        .arg("does/not/exist.tsv")
        .arg("--val")
        .arg("does/not/exist.tsv")
        .arg("--test")
        .arg("does/not/exist.tsv");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("Failed to load splits"));

    Ok(())
}
