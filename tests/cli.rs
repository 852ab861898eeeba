//! CLI integration tests using assert_cmd.

use std::fs;
use std::path::PathBuf;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

fn inrep_cat() -> Command {
    #[allow(deprecated)]
    Command::cargo_bin("inrep-cat").unwrap()
}

fn write_bank(dir: &TempDir) -> PathBuf {
    let rows: Vec<serde_json::Value> = (0..20)
        .map(|i| {
            serde_json::json!({
                "item_id": i + 1,
                "a": 0.9 + 0.05 * i as f64,
                "b": -2.0 + 0.2 * i as f64,
            })
        })
        .collect();
    let path = dir.path().join("bank.json");
    fs::write(&path, serde_json::to_string(&rows).unwrap()).unwrap();
    path
}

fn write_config(dir: &TempDir, body: &str) -> PathBuf {
    let path = dir.path().join("cat.toml");
    fs::write(&path, body).unwrap();
    path
}

#[test]
fn validate_bank_with_defaults() {
    let dir = TempDir::new().unwrap();
    let bank = write_bank(&dir);

    inrep_cat()
        .arg("validate")
        .arg("--bank")
        .arg(&bank)
        .assert()
        .success()
        .stdout(predicate::str::contains("20 items"))
        .stdout(predicate::str::contains("Configuration valid."));
}

#[test]
fn validate_rejects_bad_stopping_rule() {
    let dir = TempDir::new().unwrap();
    let bank = write_bank(&dir);
    let config = write_config(&dir, "[stopping]\nmin_items = 12\nmax_items = 6\n");

    inrep_cat()
        .arg("validate")
        .arg("--bank")
        .arg(&bank)
        .arg("--config")
        .arg(&config)
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn validate_rejects_model_without_its_columns() {
    let dir = TempDir::new().unwrap();
    let bank = write_bank(&dir);

    inrep_cat()
        .arg("validate")
        .arg("--bank")
        .arg(&bank)
        .arg("--model")
        .arg("GRM")
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing column"));
}

#[test]
fn validate_nonexistent_bank() {
    inrep_cat()
        .arg("validate")
        .arg("--bank")
        .arg("nonexistent.json")
        .assert()
        .failure()
        .stderr(predicate::str::contains("Error"));
}

#[test]
fn simulate_prints_table() {
    let dir = TempDir::new().unwrap();
    let bank = write_bank(&dir);
    let config = write_config(
        &dir,
        "[estimator]\nmethod = \"maximum_a_posteriori\"\n\n[stopping]\nmin_items = 3\nmax_items = 8\nmin_sem = 0.5\n",
    );

    inrep_cat()
        .arg("simulate")
        .arg("--bank")
        .arg(&bank)
        .arg("--config")
        .arg(&config)
        .arg("--theta=-1,0,1")
        .arg("--replications")
        .arg("5")
        .arg("--seed")
        .arg("3")
        .assert()
        .success()
        .stdout(predicate::str::contains("Mean items"))
        .stdout(predicate::str::contains("5 replication(s) per theta."));
}

#[test]
fn simulate_json_is_reproducible() {
    let dir = TempDir::new().unwrap();
    let bank = write_bank(&dir);

    let run = || {
        let output = inrep_cat()
            .arg("simulate")
            .arg("--bank")
            .arg(&bank)
            .arg("--theta=-0.5,0.5")
            .arg("--replications")
            .arg("4")
            .arg("--format")
            .arg("json")
            .output()
            .unwrap();
        assert!(output.status.success());
        serde_json::from_slice::<Vec<serde_json::Value>>(&output.stdout).unwrap()
    };

    let first = run();
    assert_eq!(first.len(), 2);
    assert_eq!(first[0]["true_theta"], -0.5);
    assert_eq!(first, run());
}

#[test]
fn simulate_population_from_prior() {
    let dir = TempDir::new().unwrap();
    let bank = write_bank(&dir);

    let output = inrep_cat()
        .arg("simulate")
        .arg("--bank")
        .arg(&bank)
        .arg("--population")
        .arg("12")
        .arg("--format")
        .arg("json")
        .output()
        .unwrap();
    assert!(output.status.success());
    let stats: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(stats["n_simulees"], 12);
    assert!(stats["rmse"].as_f64().unwrap() >= 0.0);

    inrep_cat()
        .arg("simulate")
        .arg("--bank")
        .arg(&bank)
        .arg("--population")
        .arg("0")
        .assert()
        .failure()
        .stderr(predicate::str::contains("population"));
}

#[test]
fn default_config_parses_back() {
    let output = inrep_cat()
        .arg("default-config")
        .arg("--model")
        .arg("GRM")
        .output()
        .unwrap();
    assert!(output.status.success());

    let text = String::from_utf8(output.stdout).unwrap();
    assert!(text.contains("model = \"GRM\""));
    let config = inrep_cat::CatConfig::from_toml_str(&text).unwrap();
    assert_eq!(config.model, inrep_cat::ModelFamily::Grm);
}
