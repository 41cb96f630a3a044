//! HTTP adapter tests against a mock control plane.

use std::time::Duration;

use factroll_platform::{
    AgentRunRequest, AgentRunner, CodeDeployer, DeployRequest, DeployStatus, FactKind,
    FactQuery, FactValue, NodeGroups, PeClient, PeConfig, PlatformError,
};
use serde_json::json;
use wiremock::matchers::{body_json, header, method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

async fn client_for(server: &MockServer) -> PeClient {
    let config = PeConfig::single_base(&server.uri())
        .with_token("secret-token")
        .with_job_polling(Duration::from_millis(5), Duration::from_secs(2));
    PeClient::new(config).expect("client")
}

fn nodes(names: &[&str]) -> Vec<String> {
    names.iter().map(|n| n.to_string()).collect()
}

// ---------------------------------------------------------------------------
// classifier
// ---------------------------------------------------------------------------

#[tokio::test]
async fn resolve_group_translates_rule_into_members() {
    let server = MockServer::start().await;
    let rule = json!(["or", ["=", "name", "a"], ["~", ["fact", "role"], "web"]]);

    Mock::given(method("GET"))
        .and(path("/classifier-api/v1/groups/web-id"))
        .and(header("X-Authentication", "secret-token"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "web-id",
            "name": "Web",
            "environment": "production",
            "rule": rule,
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/classifier-api/v1/rules/translate"))
        .and(query_param("format", "inventory"))
        .and(body_json(&rule))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "query": ["or", ["=", "certname", "a"], ["~", "facts.role", "web"]]
        })))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/pdb/query/v4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"certname": "a"},
            {"certname": "b"},
            {"certname": "a"},
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let group = client.resolve_group("web-id").await.expect("resolve");
    assert_eq!(group.environment.as_deref(), Some("production"));
    assert_eq!(group.nodes, nodes(&["a", "b"]));
}

#[tokio::test]
async fn resolve_group_without_rule_has_no_nodes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/classifier-api/v1/groups/empty"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "id": "empty",
            "name": "Empty",
            "environment": "production",
            "rule": null,
        })))
        .mount(&server)
        .await;

    let group = client_for(&server)
        .await
        .resolve_group("empty")
        .await
        .expect("resolve");
    assert!(group.nodes.is_empty());
}

#[tokio::test]
async fn resolve_unknown_group_is_not_found() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/classifier-api/v1/groups/nope"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .await
        .resolve_group("nope")
        .await
        .unwrap_err();
    assert!(matches!(err, PlatformError::NotFound { .. }));
}

#[tokio::test]
async fn create_temp_group_reads_id_from_location() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/classifier-api/v1/groups"))
        .and(body_json(json!({
            "name": "us_r1",
            "parent": "web-id",
            "environment": "us_r1",
            "environment_trumps": true,
            "classes": {},
            "description": "temporary factroll batch scope",
        })))
        .respond_with(
            ResponseTemplate::new(303)
                .insert_header("Location", "/classifier-api/v1/groups/tmp-123"),
        )
        .mount(&server)
        .await;

    let group = client_for(&server)
        .await
        .create_temp_group("web-id", "us_r1", true)
        .await
        .expect("create");
    assert_eq!(group.id, "tmp-123");
    assert_eq!(group.environment, "us_r1");
}

#[tokio::test]
async fn pin_and_delete_group() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/classifier-api/v1/groups/tmp-123/pin"))
        .and(body_json(json!({"nodes": ["a", "b"]})))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("DELETE"))
        .and(path("/classifier-api/v1/groups/tmp-123"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    client
        .pin_nodes(&nodes(&["a", "b"]), "tmp-123")
        .await
        .expect("pin");
    client.delete_group("tmp-123").await.expect("delete");
}

#[tokio::test]
async fn server_error_keeps_status_and_body() {
    let server = MockServer::start().await;
    Mock::given(method("DELETE"))
        .and(path("/classifier-api/v1/groups/tmp-9"))
        .respond_with(ResponseTemplate::new(503).set_body_string("classifier in maintenance"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .await
        .delete_group("tmp-9")
        .await
        .unwrap_err();
    match err {
        PlatformError::Status { status, body, .. } => {
            assert_eq!(status, 503);
            assert!(body.contains("maintenance"));
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

// ---------------------------------------------------------------------------
// PuppetDB
// ---------------------------------------------------------------------------

#[tokio::test]
async fn fact_queries_normalise_values() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pdb/query/v4"))
        .and(body_json(json!({
            "query": ["from", "facts", ["extract", ["value"],
                ["and", ["=", "name", "region"], ["in", "certname", ["array", ["a", "b", "c"]]]],
                ["group_by", "value"]]]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"value": "us"}, {"value": "eu"}, {"value": null}
        ])))
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/pdb/query/v4"))
        .and(body_json(json!({
            "query": ["from", "facts", ["extract", ["certname", "value"],
                ["and", ["=", "name", "region"], ["in", "certname", ["array", ["a", "b", "c"]]]]]]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"certname": "a", "value": "us"},
            {"certname": "b", "value": "eu"},
            {"certname": "c", "value": null},
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let all = nodes(&["a", "b", "c"]);
    let distinct = client.distinct_values(&all, "region").await.expect("distinct");
    assert_eq!(distinct, vec![FactValue::new("us"), FactValue::new("eu")]);

    let per_node = client.node_values(&all, "region").await.expect("values");
    assert_eq!(per_node.len(), 2);
    assert_eq!(per_node[0].node, "a");
    assert_eq!(per_node[1].value, FactValue::new("eu"));
}

#[tokio::test]
async fn distinct_values_dedupe_but_keep_json_types() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/pdb/query/v4"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"value": "true"}, {"value": true}, {"value": "true"}, {"value": true}
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let distinct = client
        .distinct_values(&nodes(&["a", "b"]), "is_virtual")
        .await
        .expect("distinct");
    assert_eq!(
        distinct,
        vec![
            FactValue::new("true"),
            FactValue::typed("true", FactKind::Boolean)
        ]
    );
}

// ---------------------------------------------------------------------------
// Code Manager
// ---------------------------------------------------------------------------

#[tokio::test]
async fn deploy_code_returns_terminal_handle() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/code-manager/v1/deploys"))
        .and(body_json(json!({"environments": ["us_r1"], "wait": true})))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"environment": "us_r1", "id": 12, "status": "complete"}
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let handle = client
        .deploy_code(&DeployRequest {
            branch: "us_r1".to_string(),
            environment: Some("production".to_string()),
        })
        .await
        .expect("deploy");
    assert_eq!(handle.status, DeployStatus::Complete);
    client.validate_deploy(&handle).await.expect("validate");
}

#[tokio::test]
async fn failed_deploy_fails_validation_with_service_message() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/code-manager/v1/deploys"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            {"environment": "eu_r1", "id": 13, "status": "failed",
             "error": {"msg": "Could not resolve revision"}}
        ])))
        .mount(&server)
        .await;

    let client = client_for(&server).await;
    let handle = client
        .deploy_code(&DeployRequest {
            branch: "eu_r1".to_string(),
            environment: None,
        })
        .await
        .expect("deploy");
    let err = client.validate_deploy(&handle).await.unwrap_err();
    assert!(err.to_string().contains("Could not resolve revision"));
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn run_agent_polls_job_and_collects_failed_nodes() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orchestrator/v1/command/deploy"))
        .and(body_json(json!({
            "environment": "eu_r1",
            "enforce_environment": true,
            "noop": true,
            "scope": {"nodes": ["c", "d"]},
        })))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "job": {"id": "https://pe:8143/orchestrator/v1/jobs/81", "name": "81"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orchestrator/v1/jobs/81"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "running"})))
        .up_to_n_times(2)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orchestrator/v1/jobs/81"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "failed"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orchestrator/v1/jobs/81/nodes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "items": [
                {"name": "c", "state": "finished"},
                {"name": "d", "state": "failed"},
            ]
        })))
        .mount(&server)
        .await;

    let report = client_for(&server)
        .await
        .run_agent(&AgentRunRequest {
            nodes: nodes(&["c", "d"]),
            noop: true,
            environment: Some("eu_r1".to_string()),
        })
        .await
        .expect("run");
    assert_eq!(report.job_id.as_deref(), Some("81"));
    assert_eq!(report.failed_nodes, nodes(&["d"]));
    assert!(report.job_error.is_none());
}

#[tokio::test]
async fn stopped_job_without_node_failures_reports_job_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orchestrator/v1/command/deploy"))
        .respond_with(ResponseTemplate::new(202).set_body_json(json!({
            "job": {"id": "x", "name": "90"}
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orchestrator/v1/jobs/90"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"state": "stopped"})))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/orchestrator/v1/jobs/90/nodes"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"items": []})))
        .mount(&server)
        .await;

    let report = client_for(&server)
        .await
        .run_agent(&AgentRunRequest {
            nodes: nodes(&["a"]),
            noop: false,
            environment: None,
        })
        .await
        .expect("run");
    assert!(report.failed_nodes.is_empty());
    assert!(report.job_error.unwrap().contains("stopped"));
}

#[tokio::test]
async fn run_agent_dispatch_failure_is_an_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/orchestrator/v1/command/deploy"))
        .respond_with(ResponseTemplate::new(400).set_body_string("no nodes matched"))
        .mount(&server)
        .await;

    let err = client_for(&server)
        .await
        .run_agent(&AgentRunRequest {
            nodes: nodes(&["a"]),
            noop: true,
            environment: None,
        })
        .await
        .unwrap_err();
    assert!(err.to_string().contains("no nodes matched"));
}
