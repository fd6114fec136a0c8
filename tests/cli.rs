// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

use assert_cmd::Command;
use predicates::prelude::*;
use std::path::Path;
use tempfile::TempDir;

const BUILD: &str = r#"
name: build
version: v1
inputs:
  image_name: { type: string, required: true }
outputs:
  digest: { value: "${{ steps.build.outputs.digest }}" }
steps:
  - id: build
    run: "echo ::set-output name=digest::sha256-${{ inputs.image_name }}"
"#;

const PUBLISH: &str = r#"
name: publish
version: v1
inputs:
  digest: { type: string, required: true }
outputs:
  published: { value: "${{ steps.push.outputs.ref }}" }
steps:
  - id: push
    run: "echo ::set-output name=ref::${{ inputs.digest }}"
"#;

const FAIL: &str = "name: fail\nversion: v1\nsteps:\n  - name: boom\n    run: exit 4\n";

fn project(invocation: &str) -> TempDir {
    let dir = tempfile::tempdir().unwrap();
    let workflows = dir.path().join(".pipeforge/workflows");
    std::fs::create_dir_all(&workflows).unwrap();
    std::fs::write(workflows.join("build.yaml"), BUILD).unwrap();
    std::fs::write(workflows.join("publish.yaml"), PUBLISH).unwrap();
    std::fs::write(workflows.join("fail.yaml"), FAIL).unwrap();
    std::fs::write(dir.path().join("pipeline.yaml"), invocation).unwrap();
    dir
}

fn pipeforge(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("pipeforge").unwrap();
    cmd.arg("-C").arg(dir).env("NO_COLOR", "1").env_remove("RUST_LOG");
    cmd
}

const RELEASE: &str = r#"
name: release
nodes:
  - id: build
    uses: build@v1
    with:
      image_name: api
  - id: publish
    uses: publish@latest
    needs: [build]
    with:
      digest: "${{ needs.build.outputs.digest }}"
"#;

#[test]
fn validate_accepts_a_valid_invocation() {
    let dir = project(RELEASE);

    pipeforge(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Invocation is valid"));
}

#[test]
fn validate_reports_missing_input_with_exit_code_2() {
    let dir = project("name: ci\nnodes:\n  - id: build\n    uses: build@v1\n");

    pipeforge(dir.path())
        .arg("validate")
        .assert()
        .code(2)
        .stdout(predicate::str::contains("missing required input 'image_name'"));
}

#[test]
fn validate_reports_cycles_with_exit_code_3() {
    let dir = project(
        "name: ci\nnodes:\n  - id: a\n    uses: fail@v1\n    needs: [b]\n  - id: b\n    uses: fail@v1\n    needs: [a]\n",
    );

    pipeforge(dir.path())
        .arg("validate")
        .assert()
        .code(3)
        .stdout(predicate::str::contains("Circular dependency"));
}

#[test]
fn graph_renders_mermaid() {
    let dir = project(RELEASE);

    pipeforge(dir.path())
        .args(["graph", "--format", "mermaid"])
        .assert()
        .success()
        .stdout(predicate::str::contains("graph TD"))
        .stdout(predicate::str::contains("build --> publish"));
}

#[test]
fn graph_text_lists_execution_order() {
    let dir = project(RELEASE);

    pipeforge(dir.path())
        .arg("graph")
        .assert()
        .success()
        .stdout(predicate::str::contains("1. build (build@v1)"))
        .stdout(predicate::str::contains("2. publish (publish@latest) [needs: build]"));
}

#[test]
fn definitions_list_shows_every_version() {
    let dir = project(RELEASE);

    pipeforge(dir.path())
        .args(["definitions", "list"])
        .assert()
        .success()
        .stdout(predicate::str::contains("build@v1"))
        .stdout(predicate::str::contains("publish@v1"));
}

#[test]
fn definitions_show_unknown_version_fails() {
    let dir = project(RELEASE);

    pipeforge(dir.path())
        .args(["definitions", "show", "build@v9"])
        .assert()
        .code(2)
        .stderr(predicate::str::contains("not found"));
}

#[test]
fn run_passes_outputs_downstream() {
    let dir = project(RELEASE);

    pipeforge(dir.path())
        .args(["run", "--format", "json"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""status": "succeeded""#))
        .stdout(predicate::str::contains(r#""published": "sha256-api""#));
}

#[test]
fn run_failure_sets_exit_code_and_skips_dependents() {
    let dir = project(
        "name: ci\nnodes:\n  - id: fail\n    uses: fail@v1\n  - id: after\n    uses: fail@v1\n    needs: [fail]\n",
    );
    let report = dir.path().join("report.json");

    pipeforge(dir.path())
        .arg("run")
        .arg("--report")
        .arg(&report)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("dependency 'fail' failed"));

    let json = std::fs::read_to_string(&report).unwrap();
    assert!(json.contains(r#""status": "failed""#));
}

#[test]
fn run_set_overrides_inputs() {
    let dir = project(RELEASE);

    pipeforge(dir.path())
        .args(["run", "--format", "json", "--set", "build.image_name=web"])
        .assert()
        .success()
        .stdout(predicate::str::contains(r#""published": "sha256-web""#));
}

#[test]
fn dry_run_prints_the_plan() {
    let dir = project(RELEASE);

    pipeforge(dir.path())
        .args(["run", "--dry-run"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Level"))
        .stdout(predicate::str::contains("publish (publish@v1)"));
}

#[test]
fn init_scaffolds_a_valid_project_once() {
    let dir = tempfile::tempdir().unwrap();

    pipeforge(dir.path()).arg("init").assert().success();
    assert!(dir.path().join("pipeline.yaml").is_file());
    assert!(dir.path().join(".pipeforge/workflows/docker-build.yaml").is_file());

    pipeforge(dir.path())
        .arg("validate")
        .assert()
        .success()
        .stdout(predicate::str::contains("Invocation is valid"));

    pipeforge(dir.path()).arg("init").assert().failure();
    pipeforge(dir.path()).args(["init", "--force"]).assert().success();
}
