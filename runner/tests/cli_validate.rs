//! CLI tests for `tab validate`, `tab init` and `tab run` start-up failures.
//!
//! Spawns the tab binary against a temporary project root and checks exit
//! codes and the printed report.

use std::process::{Command, Output};

use tab::exit_codes;
use tab::test_support::TestBundle;

fn tab(bundle: &TestBundle, args: &[&str]) -> Output {
    Command::new(env!("CARGO_BIN_EXE_tab"))
        .arg("--root")
        .arg(bundle.root())
        .args(args)
        .env_remove("ANTHROPIC_API_KEY")
        .output()
        .expect("run tab")
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

#[test]
fn validate_all_reports_each_bundle_and_fails_on_any_error() {
    let bundle = TestBundle::new();
    bundle.role("_base/agent", "model:\n  max_tokens: 4096\n");
    bundle.role("writer", "extends: _base/agent\ntools:\n  allow: [write_file]\n");
    bundle.role("broken", "extends: missing\n");

    let output = tab(&bundle, &["validate", "--all"]);
    let report = stdout(&output);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED), "{report}");
    assert!(report.contains("✓ PASS  writer"), "{report}");
    assert!(report.contains("✗ FAIL  broken"), "{report}");
    assert!(report.contains("Parent role 'missing' not found"), "{report}");
    assert!(report.contains("Skipped (abstract role"), "{report}");
    assert!(report.contains("2/3 roles passed."), "{report}");
}

#[test]
fn validate_named_role_passes() {
    let bundle = TestBundle::new();
    bundle.role("writer", "tools:\n  allow: [write_file]\n");

    let output = tab(&bundle, &["validate", "roles/writer/"]);

    assert_eq!(output.status.code(), Some(exit_codes::OK), "{}", stdout(&output));
    assert!(stdout(&output).contains("1/1 roles passed."));
}

#[test]
fn allow_abstract_validates_namespace_children() {
    let bundle = TestBundle::new();
    bundle.role("_base/agent", "autonomy:\n  max_cost_usd: -1\n");

    let output = tab(&bundle, &["validate", "--all", "--allow-abstract"]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    assert!(stdout(&output).contains("✗ FAIL  _base/agent"));
}

#[test]
fn init_scaffolds_a_valid_project() {
    let bundle = TestBundle::new();

    let init = tab(&bundle, &["init"]);
    assert_eq!(init.status.code(), Some(exit_codes::OK));
    assert!(bundle.root().join("tab.toml").is_file());
    assert!(bundle.root().join("roles/assistant/role.yml").is_file());

    let validate = tab(&bundle, &["validate", "--all"]);
    assert_eq!(validate.status.code(), Some(exit_codes::OK), "{}", stdout(&validate));
}

#[test]
fn run_without_api_key_fails_before_any_session() {
    let bundle = TestBundle::new();
    bundle.role("orchestrator", "name: orchestrator\n");

    let output = tab(&bundle, &["run", "hello"]);

    assert_eq!(output.status.code(), Some(exit_codes::FAILED));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("ANTHROPIC_API_KEY is not set"), "{stderr}");
}
