use assert_cmd::Command;
use predicates::prelude::*;
use pr2_pipeline::core::invoker::StaticTokenProvider;
use pr2_pipeline::core::{
    ApiResponse, DatasetNames, ExecutionSettings, MappingRegistry, PipelineError,
    PipelineSequencer, PipelineState, RegistryVariant, RetryPolicy, TableCatalog,
    TransformClient,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use url::Url;
use wiremock::matchers::{body_json, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const PROJECT: &str = "nih-nci-dceg-connect-dev";

fn settings(retries: u32) -> ExecutionSettings {
    ExecutionSettings {
        max_active_mappings: 4,
        mapping_timeout: Duration::from_secs(5),
        retry: RetryPolicy {
            retries,
            delay: Duration::from_millis(10),
        },
    }
}

fn standard_registry() -> MappingRegistry {
    let catalog = TableCatalog::build(PROJECT, DatasetNames::default()).unwrap();
    MappingRegistry::builtin(RegistryVariant::Standard, &catalog).unwrap()
}

fn sequencer_for(server: &MockServer, retries: u32) -> PipelineSequencer {
    let client = TransformClient::new(
        Url::parse(&server.uri()).unwrap(),
        Arc::new(StaticTokenProvider::new("test-token")),
    );
    PipelineSequencer::new(Arc::new(client), settings(retries))
}

async fn mount_heartbeat(server: &MockServer, status: &str) {
    Mock::given(method("GET"))
        .and(path("/heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": status})))
        .mount(server)
        .await;
}

async fn mount_stage(server: &MockServer, endpoint: &str, expected_calls: u64) {
    Mock::given(method("POST"))
        .and(path(format!("/{}", endpoint)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows_affected": 10})))
        .expect(expected_calls)
        .mount(server)
        .await;
}

#[tokio::test]
async fn test_healthy_service_runs_every_standard_stage() {
    let server = MockServer::start().await;
    mount_heartbeat(&server, "healthy").await;
    mount_stage(&server, "clean_columns", 14).await;
    mount_stage(&server, "clean_rows", 13).await;
    mount_stage(&server, "merge_table_versions", 2).await;

    let registry = standard_registry();
    let run = sequencer_for(&server, 0).execute(&registry.stages).await;

    assert_eq!(run.state, PipelineState::Completed);
    assert_eq!(run.reports.len(), 3);
    assert!(run.reports.iter().all(|report| report.is_success()));
    assert!(run.into_result().is_ok());
}

#[tokio::test]
async fn test_clean_columns_mapping_body_and_response() {
    let server = MockServer::start().await;
    mount_heartbeat(&server, "healthy").await;
    Mock::given(method("POST"))
        .and(path("/clean_columns"))
        .and(body_json(json!({
            "name": "MODULE1_V1",
            "source": format!("{}.FlatConnect.module1_v1_JP", PROJECT),
            "destination": format!("{}.ForTestingOnly.module1_v1_with_cleaned_columns", PROJECT)
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows_affected": 10})))
        .expect(1)
        .mount(&server)
        .await;

    let registry = standard_registry();
    let mut stage = registry.stage("clean_columns").unwrap().clone();
    stage.mappings.truncate(1);
    let run = sequencer_for(&server, 0).execute(&[stage]).await;

    assert!(run.is_success());
    let outcome = &run.reports[0].outcomes[0];
    assert_eq!(
        outcome.response,
        Some(ApiResponse::Json(json!({"rows_affected": 10})))
    );
    assert_eq!(outcome.attempts, 1);
}

#[tokio::test]
async fn test_unhealthy_service_never_invokes_a_stage() {
    let server = MockServer::start().await;
    mount_heartbeat(&server, "unhealthy").await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let registry = standard_registry();
    let run = sequencer_for(&server, 0).execute(&registry.stages).await;

    assert_eq!(run.state, PipelineState::Failed);
    assert!(run.reports.is_empty());
    assert!(matches!(
        run.into_result(),
        Err(PipelineError::UnhealthyService { .. })
    ));
}

#[tokio::test]
async fn test_erroring_heartbeat_is_retried_then_aborts_run() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/heartbeat"))
        .respond_with(ResponseTemplate::new(500).set_body_string("cold start"))
        .expect(3)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let registry = standard_registry();
    let run = sequencer_for(&server, 2).execute(&registry.stages).await;

    assert_eq!(run.state, PipelineState::Failed);
    assert_eq!(
        run.history,
        vec![
            PipelineState::NotStarted,
            PipelineState::HealthChecking,
            PipelineState::Failed
        ]
    );
}

#[tokio::test]
async fn test_failed_mapping_stops_downstream_stage() {
    let server = MockServer::start().await;
    mount_heartbeat(&server, "healthy").await;
    mount_stage(&server, "clean_columns", 14).await;
    Mock::given(method("POST"))
        .and(path("/clean_rows"))
        .and(body_json(json!({
            "name": "MODULE3_CLEANED_COLUMNS",
            "source": format!("{}.ForTestingOnly.module3_with_cleaned_columns", PROJECT),
            "destination": format!("{}.CleanConnect.module3", PROJECT)
        })))
        .respond_with(ResponseTemplate::new(500).set_body_string("query failed"))
        .with_priority(1)
        .mount(&server)
        .await;
    mount_stage(&server, "clean_rows", 12).await;
    mount_stage(&server, "merge_table_versions", 0).await;

    let registry = standard_registry();
    let run = sequencer_for(&server, 0).execute(&registry.stages).await;

    assert_eq!(run.state, PipelineState::Failed);
    assert_eq!(run.failed_stage(), Some("clean_rows"));
    let report = &run.reports[1];
    assert_eq!(report.succeeded(), 12);
    assert_eq!(report.failed(), 1);
    let failures = report.failures();
    assert_eq!(
        failures[0].destination,
        format!("{}.CleanConnect.module3", PROJECT)
    );
    assert!(failures[0].to_string().contains("query failed"));

    let err = run.into_result().unwrap_err();
    assert_eq!(
        err.to_string(),
        "stage 'clean_rows' failed: 1 of 13 mappings failed"
    );
}

#[tokio::test]
async fn test_run_can_resume_from_a_later_stage() {
    let server = MockServer::start().await;
    mount_heartbeat(&server, "healthy").await;
    mount_stage(&server, "clean_columns", 0).await;
    mount_stage(&server, "clean_rows", 13).await;
    mount_stage(&server, "merge_table_versions", 2).await;

    let registry = standard_registry();
    let stages = registry.starting_from("clean_rows").unwrap();
    let run = sequencer_for(&server, 0).execute(stages).await;

    assert!(run.is_success());
    assert_eq!(run.reports[0].stage, "clean_rows");
}

fn cli(workdir: &TempDir) -> Command {
    let mut cmd = Command::new(assert_cmd::cargo::cargo_bin!("pr2-pipeline"));
    cmd.current_dir(workdir.path());
    for var in [
        "PR2_CONFIG",
        "PR2_TRANSFORMATION_CLOUD_RUN_URL",
        "GCP_PROJECT_ID",
        "PR2_IDENTITY_TOKEN",
        "PR2_MAX_ACTIVE_MAPPINGS",
        "PR2_MAPPING_TIMEOUT",
        "PR2_RETRIES",
        "PR2_RETRY_DELAY",
        "PR2_REGISTRY_VARIANT",
        "PR2_REGISTRY_FILE",
        "PR2_LOG_FORMAT",
        "PR2_LOG_DIR",
        "PR2_ORCHESTRATED",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_run_without_project_id_fails_before_any_call() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let workdir = TempDir::new().unwrap();

    cli(&workdir)
        .env("PR2_TRANSFORMATION_CLOUD_RUN_URL", server.uri())
        .env("PR2_IDENTITY_TOKEN", "test-token")
        .arg("run")
        .assert()
        .failure()
        .stderr(predicate::str::contains("GCP_PROJECT_ID"));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_run_loop_variables_registry_end_to_end() {
    let server = MockServer::start().await;
    mount_heartbeat(&server, "healthy").await;
    mount_stage(&server, "fix_loop_variables", 13).await;
    let workdir = TempDir::new().unwrap();

    cli(&workdir)
        .env("PR2_TRANSFORMATION_CLOUD_RUN_URL", server.uri())
        .env("GCP_PROJECT_ID", PROJECT)
        .env("PR2_IDENTITY_TOKEN", "test-token")
        .env("PR2_REGISTRY_VARIANT", "loop_variables")
        .env("PR2_RETRIES", "0")
        .args(["run", "--max-active-mappings", "5"])
        .assert()
        .success()
        .stdout(predicate::str::contains("completed"))
        .stdout(predicate::str::contains(
            "fix_loop_variables: 13 succeeded, 0 failed",
        ));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_dry_run_issues_no_calls() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;
    let workdir = TempDir::new().unwrap();

    cli(&workdir)
        .env("PR2_TRANSFORMATION_CLOUD_RUN_URL", server.uri())
        .env("GCP_PROJECT_ID", PROJECT)
        .args(["run", "--dry-run", "--from-stage", "merge_table_versions"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Dry run: 1 stage(s)"))
        .stdout(predicate::str::contains(format!(
            "{}.CleanConnect.module1",
            PROJECT
        )));
}

#[tokio::test(flavor = "multi_thread")]
async fn test_cli_run_exits_non_zero_when_stage_fails() {
    let server = MockServer::start().await;
    mount_heartbeat(&server, "healthy").await;
    Mock::given(method("POST"))
        .and(path("/fix_loop_variables"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;
    let workdir = TempDir::new().unwrap();

    cli(&workdir)
        .env("PR2_TRANSFORMATION_CLOUD_RUN_URL", server.uri())
        .env("GCP_PROJECT_ID", PROJECT)
        .env("PR2_IDENTITY_TOKEN", "test-token")
        .env("PR2_REGISTRY_VARIANT", "loop_variables")
        .env("PR2_RETRIES", "0")
        .arg("run")
        .assert()
        .failure()
        .stdout(predicate::str::contains("failed"))
        .stderr(predicate::str::contains("stage 'fix_loop_variables' failed"));
}
