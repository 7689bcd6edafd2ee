//! Apply command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn apply_creates_pipeline() {
  let env = TestEnv::from_fixture("pipeline.toml");

  env
    .stratus_cmd()
    .arg("apply")
    .arg(&env.config_path)
    .assert()
    .success()
    .stdout(predicate::str::contains("Apply complete"))
    .stdout(predicate::str::contains(
      "https://us-central1-acme-data.cloudfunctions.net/xlsx-handler",
    ))
    .stdout(predicate::str::contains("Storage key: source-"));
}

#[test]
fn apply_is_idempotent() {
  let env = TestEnv::from_fixture("pipeline.toml");

  env.stratus_cmd().arg("apply").arg(&env.config_path).assert().success();

  let output = env
    .stratus_cmd()
    .arg("--json")
    .arg("apply")
    .arg(&env.config_path)
    .output()
    .unwrap();
  assert!(output.status.success());

  let value: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let outcomes = value["report"]["outcomes"].as_object().unwrap();
  assert!(!outcomes.is_empty());
  for (id, outcome) in outcomes {
    assert_eq!(outcome["status"], "unchanged", "{} changed on second apply", id);
  }
}

#[test]
fn apply_dry_run_saves_nothing() {
  let env = TestEnv::from_fixture("pipeline.toml");

  env
    .stratus_cmd()
    .arg("apply")
    .arg("--dry-run")
    .arg(&env.config_path)
    .assert()
    .success()
    .stdout(predicate::str::contains("Dry run"));

  env
    .stratus_cmd()
    .arg("status")
    .assert()
    .success()
    .stdout(predicate::str::contains("No saved state found"));
}

#[test]
fn status_lists_applied_resources() {
  let env = TestEnv::from_fixture("pipeline.toml");

  env.stratus_cmd().arg("apply").arg(&env.config_path).assert().success();

  env
    .stratus_cmd()
    .arg("status")
    .arg("acme-data")
    .assert()
    .success()
    .stdout(predicate::str::contains("Project: acme-data"))
    .stdout(predicate::str::contains("function-trigger"));
}

#[test]
fn removing_protected_bucket_is_refused() {
  let env = TestEnv::from_fixture("pipeline.toml");

  env.stratus_cmd().arg("apply").arg(&env.config_path).assert().success();

  env.edit_config(|content| content.replace("[[buckets]]\nid = \"inbox\"\nname = \"data-in\"\nprotected = true\n", ""));

  env
    .stratus_cmd()
    .arg("apply")
    .arg(&env.config_path)
    .assert()
    .failure()
    .stderr(predicate::str::contains("refusing to delete protected resources: inbox"));

  // Nothing was touched: the next plan still only refuses.
  env
    .stratus_cmd()
    .arg("plan")
    .arg(&env.config_path)
    .assert()
    .failure()
    .stdout(predicate::str::contains("inbox"));
}
