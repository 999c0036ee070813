//! CLI integration tests
//!
//! Drives the binary through its four modes inside a temporary project.

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::TempDir;

/// Config with fast hyperparameters, written into the project root
const FAST_CONFIG: &str = r#"
[ml_model]
algorithm = "random_forest"
n_estimators = 10
max_depth = 4
"#;

fn cribar(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("cribar").unwrap();
    cmd.current_dir(dir.path());
    cmd
}

fn setup_project(dir: &TempDir) {
    std::fs::write(dir.path().join("cribar.toml"), FAST_CONFIG).unwrap();

    let sample = dir.path().join("tests").join("sample_project");
    std::fs::create_dir_all(&sample).unwrap();
    for module in ["auth", "database", "api", "utils"] {
        std::fs::write(
            sample.join(format!("{module}.py")),
            format!("def {module}_main():\n    return True\n"),
        )
        .unwrap();
        std::fs::write(
            sample.join(format!("test_{module}.py")),
            format!("import tests.sample_project.{module}\n\ndef test_{module}():\n    pass\n"),
        )
        .unwrap();
    }
}

#[test]
fn generate_train_select_report_flow() {
    let dir = TempDir::new().unwrap();
    setup_project(&dir);

    // generate-history
    cribar(&dir)
        .args([
            "--mode",
            "generate-history",
            "--num-runs",
            "15",
            "--seed",
            "42",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Generated"));
    assert!(dir
        .path()
        .join("data/test_history/test_results.csv")
        .exists());
    assert!(dir.path().join("data/test_history/metadata.json").exists());

    // train
    cribar(&dir)
        .args(["--mode", "train"])
        .assert()
        .success()
        .stdout(predicate::str::contains("MODEL PERFORMANCE"))
        .stdout(predicate::str::contains("Test Accuracy"));
    assert!(dir
        .path()
        .join("data/models/test_selector_model.apr")
        .exists());
    assert!(dir.path().join("data/models/feature_scaler.json").exists());

    // select with an explicit change set
    cribar(&dir)
        .args([
            "--mode",
            "select",
            "--changed-files",
            "tests/sample_project/auth.py",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("TEST SELECTION SUMMARY"))
        .stdout(predicate::str::contains("Selected tests saved to"));

    let selected = std::fs::read_to_string(dir.path().join("selected_tests.txt")).unwrap();
    assert!(!selected.trim().is_empty());
    assert!(selected.lines().all(|line| line.contains("::")));

    // select with an explicitly empty change set: distinct "no changes" path
    cribar(&dir)
        .args(["--mode", "select", "--changed-files"])
        .assert()
        .success()
        .stdout(predicate::str::contains("No code changes detected"));

    // report
    cribar(&dir)
        .args([
            "--mode",
            "report",
            "--changed-files",
            "tests/sample_project/auth.py",
            "--output",
            "report.md",
        ])
        .assert()
        .success()
        .stdout(predicate::str::contains("Report saved to"));

    let report = std::fs::read_to_string(dir.path().join("report.md")).unwrap();
    assert!(report.contains("# Test Selection Report"));
    assert!(report.contains("| Rank | Test Name | Priority | Failure Prob | Reason |"));
}

#[test]
fn select_without_history_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("cribar.toml"), FAST_CONFIG).unwrap();

    cribar(&dir)
        .args(["--mode", "select", "--changed-files", "a.py"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no historical data"));
}

#[test]
fn select_without_trained_model_fails() {
    let dir = TempDir::new().unwrap();
    setup_project(&dir);

    cribar(&dir)
        .args([
            "--mode",
            "generate-history",
            "--num-runs",
            "5",
            "--seed",
            "1",
        ])
        .assert()
        .success();

    cribar(&dir)
        .args([
            "--mode",
            "select",
            "--changed-files",
            "tests/sample_project/auth.py",
        ])
        .assert()
        .failure()
        .stderr(predicate::str::contains("model file not found"));
}

#[test]
fn train_without_history_fails() {
    let dir = TempDir::new().unwrap();
    std::fs::write(dir.path().join("cribar.toml"), FAST_CONFIG).unwrap();

    cribar(&dir)
        .args(["--mode", "train"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("no historical data"));
}

#[test]
fn invalid_mode_is_rejected() {
    let dir = TempDir::new().unwrap();
    cribar(&dir)
        .args(["--mode", "destroy"])
        .assert()
        .failure();
}

#[test]
fn custom_history_file_location() {
    let dir = TempDir::new().unwrap();
    setup_project(&dir);

    cribar(&dir)
        .args([
            "--mode",
            "generate-history",
            "--num-runs",
            "5",
            "--seed",
            "9",
            "--history-file",
            "custom/history.csv",
        ])
        .assert()
        .success();
    assert!(dir.path().join("custom/history.csv").exists());
}
