use assert_cmd::Command;
use predicates::prelude::*;
use std::io::Write;
use tempfile::{NamedTempFile, TempDir};

fn pr2() -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pr2-pipeline"));
    for var in [
        "PR2_CONFIG",
        "PR2_TRANSFORMATION_CLOUD_RUN_URL",
        "GCP_PROJECT_ID",
        "PR2_REGISTRY_VARIANT",
        "PR2_REGISTRY_FILE",
        "PR2_LOG_FORMAT",
        "PR2_LOG_DIR",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[test]
fn test_top_level_help_lists_pipeline_commands() {
    pr2()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("PIPELINE COMMANDS"))
        .stdout(predicate::str::contains("run"))
        .stdout(predicate::str::contains("health"))
        .stdout(predicate::str::contains("stages"))
        .stdout(predicate::str::contains("validate"));
}

#[test]
fn test_long_help_documents_environment() {
    pr2()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("PR2_TRANSFORMATION_CLOUD_RUN_URL"))
        .stdout(predicate::str::contains("GCP_PROJECT_ID"));
}

#[test]
fn test_version_flag() {
    pr2()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_run_help_shows_resume_and_dry_run() {
    pr2()
        .args(["run", "--help"])
        .assert()
        .success()
        .stdout(predicate::str::contains("--from-stage"))
        .stdout(predicate::str::contains("--dry-run"))
        .stdout(predicate::str::contains("--config"));
}

#[test]
fn test_stages_json_output_is_clean_json() {
    let workdir = TempDir::new().unwrap();
    let output = pr2()
        .current_dir(workdir.path())
        .env("PR2_TRANSFORMATION_CLOUD_RUN_URL", "https://pr2.example.run.app")
        .env("GCP_PROJECT_ID", "proj")
        .args(["stages", "--format", "json"])
        .output()
        .unwrap();

    assert!(output.status.success());
    let stages: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let names: Vec<&str> = stages
        .as_array()
        .unwrap()
        .iter()
        .map(|stage| stage["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["clean_columns", "clean_rows", "merge_table_versions"]);
    assert_eq!(
        stages[2]["mappings"][0]["source"],
        serde_json::json!([
            "proj.ForTestingOnly.module1_v1_with_cleaned_rows",
            "proj.ForTestingOnly.module1_v2_with_cleaned_rows"
        ])
    );
}

#[test]
fn test_validate_reads_config_file() {
    let workdir = TempDir::new().unwrap();
    let mut config = NamedTempFile::new().unwrap();
    writeln!(
        config,
        r#"
[service]
url = "https://pr2.example.run.app"

[tables]
project_id = "nih-nci-dceg-connect-dev"

[registry]
variant = "loop_variables"
"#
    )
    .unwrap();

    pr2()
        .current_dir(workdir.path())
        .arg("validate")
        .arg("--config")
        .arg(config.path())
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "1 stage(s), 13 mapping(s) in project nih-nci-dceg-connect-dev",
        ));
}

#[test]
fn test_unknown_from_stage_is_configuration_error() {
    let workdir = TempDir::new().unwrap();
    pr2()
        .current_dir(workdir.path())
        .env("PR2_TRANSFORMATION_CLOUD_RUN_URL", "https://pr2.example.run.app")
        .env("GCP_PROJECT_ID", "proj")
        .args(["run", "--dry-run", "--from-stage", "fix_everything"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("unknown stage 'fix_everything'"));
}
