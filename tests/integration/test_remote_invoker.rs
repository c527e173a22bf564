use async_trait::async_trait;
use pr2_pipeline::core::invoker::{ensure_healthy, StaticTokenProvider, TokenProvider};
use pr2_pipeline::core::{
    ApiRequest, ApiResponse, PipelineError, StageMapping, TableIdentifier, TransformClient,
    TransformService,
};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use url::Url;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Hands out a new token on every call, like the identity token command.
#[derive(Default)]
struct CountingTokens {
    issued: AtomicUsize,
}

#[async_trait]
impl TokenProvider for CountingTokens {
    async fn token(&self) -> Result<String, PipelineError> {
        let n = self.issued.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(format!("token-{}", n))
    }
}

struct FailingTokens;

#[async_trait]
impl TokenProvider for FailingTokens {
    async fn token(&self) -> Result<String, PipelineError> {
        Err(PipelineError::Authentication(
            "gcloud exited with status 1".to_string(),
        ))
    }
}

fn client_for(server: &MockServer) -> TransformClient {
    TransformClient::new(
        Url::parse(&server.uri()).unwrap(),
        Arc::new(StaticTokenProvider::new("test-token")),
    )
}

fn mapping() -> StageMapping {
    StageMapping::new(
        TableIdentifier::parse("proj.FlatConnect.module1_v1_JP").unwrap(),
        TableIdentifier::parse("proj.ForTestingOnly.module1_v1_with_cleaned_columns").unwrap(),
    )
    .named("MODULE1_V1")
}

#[tokio::test]
async fn test_transform_posts_mapping_body_with_bearer_token() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean_columns"))
        .and(header("authorization", "Bearer test-token"))
        .and(body_json(json!({
            "name": "MODULE1_V1",
            "source": "proj.FlatConnect.module1_v1_JP",
            "destination": "proj.ForTestingOnly.module1_v1_with_cleaned_columns"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"rows_affected": 10})))
        .expect(1)
        .mount(&server)
        .await;

    let response = client_for(&server)
        .transform("clean_columns", &mapping())
        .await
        .unwrap();

    assert_eq!(response, ApiResponse::Json(json!({"rows_affected": 10})));
}

#[tokio::test]
async fn test_multi_source_body_is_sent_as_list() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/merge_table_versions"))
        .and(body_json(json!({"source": ["A.b.c", "A.b.d"], "destination": "A.e.f"})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let merge = StageMapping::new(
        vec![
            TableIdentifier::parse("A.b.c").unwrap(),
            TableIdentifier::parse("A.b.d").unwrap(),
        ],
        TableIdentifier::parse("A.e.f").unwrap(),
    );
    let response = client_for(&server)
        .transform("merge_table_versions", &merge)
        .await
        .unwrap();

    assert_eq!(response, ApiResponse::Empty);
}

#[tokio::test]
async fn test_fresh_credential_for_every_call() {
    let server = MockServer::start().await;
    for token in ["Bearer token-1", "Bearer token-2"] {
        Mock::given(method("POST"))
            .and(path("/clean_rows"))
            .and(header("authorization", token))
            .respond_with(ResponseTemplate::new(200).set_body_string("done"))
            .expect(1)
            .mount(&server)
            .await;
    }

    let tokens = Arc::new(CountingTokens::default());
    let client = TransformClient::new(Url::parse(&server.uri()).unwrap(), tokens.clone());
    for _ in 0..2 {
        let response = client.transform("clean_rows", &mapping()).await.unwrap();
        assert_eq!(response, ApiResponse::Text("done".to_string()));
    }

    assert_eq!(tokens.issued.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_non_success_status_is_api_error_with_body() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean_rows"))
        .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .transform("clean_rows", &mapping())
        .await
        .unwrap_err();

    match err {
        PipelineError::Api {
            endpoint,
            status,
            body,
        } => {
            assert_eq!(endpoint, "clean_rows");
            assert_eq!(status, 500);
            assert_eq!(body, "boom");
        }
        other => panic!("expected API error, got {other:?}"),
    }
}

#[tokio::test]
async fn test_credential_failure_issues_no_request() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let client = TransformClient::new(Url::parse(&server.uri()).unwrap(), Arc::new(FailingTokens));
    let err = client.transform("clean_columns", &mapping()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Authentication(_)));
}

#[tokio::test]
async fn test_unreachable_service_is_network_error() {
    let client = TransformClient::new(
        Url::parse("http://127.0.0.1:1").unwrap(),
        Arc::new(StaticTokenProvider::new("test-token")),
    );

    let err = client.transform("clean_columns", &mapping()).await.unwrap_err();

    assert!(matches!(err, PipelineError::Network { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_get_with_query_parameters() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pipeline_log"))
        .and(query_param("run_id", "abc"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"entries": []})))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).with_quiet_endpoints(["pipeline_log".to_string()]);
    let response = client
        .call(ApiRequest::get("pipeline_log").query("run_id", "abc"))
        .await
        .unwrap();

    assert_eq!(response.as_json(), Some(&json!({"entries": []})));
}

#[tokio::test]
async fn test_request_timeout_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/clean_rows"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(500)))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .call(
            ApiRequest::post("clean_rows")
                .json(&mapping())
                .unwrap()
                .timeout(Duration::from_millis(50)),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, PipelineError::Timeout { .. }), "got {err:?}");
}

#[tokio::test]
async fn test_heartbeat_reports_status() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/heartbeat"))
        .and(header("authorization", "Bearer test-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "healthy"})))
        .mount(&server)
        .await;

    let client = client_for(&server);
    let health = ensure_healthy(&client).await.unwrap();

    assert!(health.is_healthy());
}

#[tokio::test]
async fn test_degraded_heartbeat_is_unhealthy() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/heartbeat"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"status": "degraded"})))
        .mount(&server)
        .await;

    let err = ensure_healthy(&client_for(&server)).await.unwrap_err();

    assert!(matches!(err, PipelineError::UnhealthyService { .. }));
    assert!(err.to_string().contains("degraded"));
}

#[tokio::test]
async fn test_failing_heartbeat_is_unhealthy_with_cause() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/heartbeat"))
        .respond_with(ResponseTemplate::new(503).set_body_string("starting"))
        .mount(&server)
        .await;

    let err = ensure_healthy(&client_for(&server)).await.unwrap_err();

    match err {
        PipelineError::UnhealthyService {
            source: Some(cause),
            ..
        } => assert!(matches!(*cause, PipelineError::Api { status: 503, .. })),
        other => panic!("expected unhealthy service, got {other:?}"),
    }
}
