//! Plan command integration tests.

use predicates::prelude::*;

use super::common::TestEnv;

#[test]
fn plan_creates_everything_on_first_run() {
  let env = TestEnv::from_fixture("pipeline.toml");

  let output = env
    .stratus_cmd()
    .arg("--json")
    .arg("plan")
    .arg(&env.config_path)
    .output()
    .unwrap();
  assert!(output.status.success());

  let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let actions = plan["actions"].as_array().unwrap();
  assert!(!actions.is_empty());
  assert!(actions.iter().all(|a| a["action"] == "create"));
}

#[test]
fn plan_after_apply_is_converged() {
  let env = TestEnv::from_fixture("pipeline.toml");

  env.stratus_cmd().arg("apply").arg(&env.config_path).assert().success();

  env
    .stratus_cmd()
    .arg("plan")
    .arg(&env.config_path)
    .assert()
    .success()
    .stdout(predicate::str::contains("No changes"));
}

#[test]
fn source_change_updates_artifact_and_function() {
  let env = TestEnv::from_fixture("pipeline.toml");

  env.stratus_cmd().arg("apply").arg(&env.config_path).assert().success();
  env.write_file("function/main.py", "def entryPoint(event, context):\n    return 1\n");

  let output = env
    .stratus_cmd()
    .arg("--json")
    .arg("plan")
    .arg(&env.config_path)
    .output()
    .unwrap();
  assert!(output.status.success());

  let plan: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
  let action = |id: &str| {
    plan["actions"]
      .as_array()
      .unwrap()
      .iter()
      .find(|a| a["id"] == id)
      .map(|a| a["action"].as_str().unwrap().to_string())
  };
  assert_eq!(action("function-source").as_deref(), Some("update"));
  assert_eq!(action("function").as_deref(), Some("update"));
  assert_eq!(action("inbox").as_deref(), Some("no-op"));
}

#[test]
fn plan_rejects_dependency_cycle() {
  let env = TestEnv::from_fixture("cycle.toml");

  env
    .stratus_cmd()
    .arg("plan")
    .arg(&env.config_path)
    .assert()
    .failure()
    .stderr(predicate::str::contains("dependency cycle detected"));
}

#[test]
fn plan_missing_file_fails() {
  let env = TestEnv::from_fixture("pipeline.toml");

  env
    .stratus_cmd()
    .arg("plan")
    .arg(env.temp.path().join("missing.toml"))
    .assert()
    .failure()
    .stderr(predicate::str::contains("Failed to load desired state"));
}
