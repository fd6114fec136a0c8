// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 pipeforge contributors

//! Init command - scaffold workflow definitions and a pipeline

use colored::Colorize;
use miette::Result;
use std::path::Path;

use super::Context;
use crate::config::DEFAULT_INVOCATION_FILE;
use crate::errors::EXIT_SUCCESS;

/// Container image build, push and scan
pub const DOCKER_BUILD: &str = r#"name: docker-build
version: v1
description: Lint a Dockerfile, build the image, push it and scan it with Trivy
inputs:
  image_name:
    type: string
    required: true
    description: Image repository, e.g. ghcr.io/acme/api
  tag:
    type: string
    default: latest
  context:
    type: string
    default: "."
  dockerfile:
    type: string
    default: Dockerfile
  push:
    type: boolean
    default: false
secrets:
  registry_token:
    description: Token used to log in to the image registry before pushing
permissions:
  packages: write
outputs:
  image:
    value: "${{ inputs.image_name }}:${{ inputs.tag }}"
  digest:
    value: "${{ steps.build.outputs.digest }}"
steps:
  - name: hadolint
    run: hadolint --format sarif ${{ inputs.dockerfile }} > hadolint.sarif
    continue_on_error: true
    artifacts:
      - { name: hadolint, path: hadolint.sarif, kind: sarif }
  - id: build
    name: build
    run: |
      docker build -t ${{ inputs.image_name }}:${{ inputs.tag }} -f ${{ inputs.dockerfile }} ${{ inputs.context }}
      echo "::set-output name=digest::$(docker image inspect --format '{{.Id}}' ${{ inputs.image_name }}:${{ inputs.tag }})"
  - name: push
    run: |
      if [ "${{ inputs.push }}" = "true" ]; then
        echo "$REGISTRY_TOKEN" | docker login --password-stdin -u token "${{ inputs.image_name }}"
        docker push ${{ inputs.image_name }}:${{ inputs.tag }}
      fi
    env:
      REGISTRY_TOKEN: "${{ secrets.registry_token }}"
  - name: trivy
    run: trivy image --format sarif --output trivy.sarif ${{ inputs.image_name }}:${{ inputs.tag }}
    artifacts:
      - { name: trivy, path: trivy.sarif, kind: sarif }
timeout_secs: 1800
"#;

/// Go linting
pub const GO_LINT: &str = r#"name: go-lint
version: v1
description: Run golangci-lint and publish a SARIF report
inputs:
  path:
    type: string
    default: "./..."
  working_dir:
    type: string
    default: "."
steps:
  - name: golangci-lint
    run: golangci-lint run --out-format sarif ${{ inputs.path }} > golangci-lint.sarif
    working_dir: "${{ inputs.working_dir }}"
    artifacts:
      - { name: golangci-lint, path: golangci-lint.sarif, kind: sarif }
timeout_secs: 600
"#;

/// Kubernetes manifest validation
pub const K8S_VALIDATE: &str = r#"name: k8s-validate
version: v1
description: Validate Kubernetes manifests against their schemas with kubeconform
inputs:
  manifests:
    type: string
    default: k8s/
  kubernetes_version:
    type: string
    default: "1.29.0"
steps:
  - name: kubeconform
    run: kubeconform -strict -summary -output json -kubernetes-version ${{ inputs.kubernetes_version }} ${{ inputs.manifests }} > kubeconform.json
    artifacts:
      - { name: kubeconform, path: kubeconform.json, kind: other }
"#;

/// Invocation composing the example definitions
pub const PIPELINE: &str = r#"name: ci
description: Lint, validate manifests, then build the image
max_concurrency: 3
nodes:
  - id: lint
    uses: go-lint@v1

  - id: manifests
    uses: k8s-validate@v1
    required: false
    when:
      changed: ["k8s/**"]

  - id: image
    uses: docker-build@v1
    needs:
      - lint
      - node: manifests
        policy: continue-on-error
    secrets: inherit
    with:
      image_name: ghcr.io/acme/api
      tag: "${{ trigger.sha }}"
"#;

/// Files written by `init`, relative to the definitions directory
const DEFINITIONS: [(&str, &str); 3] = [
    ("docker-build.yaml", DOCKER_BUILD),
    ("go-lint.yaml", GO_LINT),
    ("k8s-validate.yaml", K8S_VALIDATE),
];

/// Run the init command
pub async fn run(force: bool, ctx: Context) -> Result<i32> {
    println!("{}", "Initializing pipeforge project...".bold());
    println!();

    let definitions_dir = ctx.definitions_dir();
    let pipeline = ctx.root.join(DEFAULT_INVOCATION_FILE);

    if pipeline.exists() && !force {
        return Err(miette::miette!(
            help = "Use --force to overwrite",
            "{} already exists",
            DEFAULT_INVOCATION_FILE
        ));
    }

    std::fs::create_dir_all(&definitions_dir).map_err(|e| {
        miette::miette!(
            "Failed to create directory '{}': {}",
            definitions_dir.display(),
            e
        )
    })?;

    for (file, content) in DEFINITIONS {
        let path = definitions_dir.join(file);
        if path.exists() && !force {
            println!("  {} Kept existing {}", "○".dimmed(), display(&ctx.root, &path));
            continue;
        }
        write(&path, content)?;
        println!("  {} Created {}", "✓".green(), display(&ctx.root, &path));
    }

    write(&pipeline, PIPELINE)?;
    println!("  {} Created {}", "✓".green(), DEFAULT_INVOCATION_FILE);

    println!();
    println!("{}", "Project initialized!".green().bold());
    println!();
    println!("Next steps:");
    println!("  1. Edit {} to compose your pipeline", DEFAULT_INVOCATION_FILE.cyan());
    println!("  2. Run {} to check it", "pipeforge validate".cyan());
    println!("  3. Run {} to execute it", "pipeforge run".cyan());
    println!();

    if ctx.verbose {
        println!("{}", "Definitions are immutable once published:".dimmed());
        println!(
            "{}",
            "copy a file and bump its version to change a workflow.".dimmed()
        );
    }

    Ok(EXIT_SUCCESS)
}

fn write(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content)
        .map_err(|e| miette::miette!("Failed to write '{}': {}", path.display(), e))
}

fn display(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).display().to_string()
}
