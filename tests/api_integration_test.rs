// Integration tests for the Flow Monitor HTTP clients and run search

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use flow_monitor::bridge::{self, BridgeHandler, BridgeRunApi};
use flow_monitor::client::{
    ApiClient, DataPlatform, DataverseClient, FlowServiceClient, ListRunsRequest, RunHistoryApi, StaticTokenProvider,
    TokenCache, TokenProvider,
};
use flow_monitor::config::{AccessToken, ConfigManager};
use flow_monitor::error::{FlowMonitorError, Result, EXCERPT_LIMIT};
use flow_monitor::runs::stream::{SearchRequest, SearchSession};
use flow_monitor::runs::{RecordMatcher, RunSearch, SearchEvent};
use serde_json::json;
use tokio::sync::{mpsc::unbounded_channel, RwLock};
use tokio::time::timeout;
use wiremock::matchers::{header, method, path, path_regex};
use wiremock::{Mock, MockServer, ResponseTemplate};

const RECORD: &str = "{5E6F7A8B-1111-2222-3333-444455556666}";
const RUNS_PATH: &str = "/providers/Microsoft.ProcessSimple/environments/env-1/flows/flow-1/runs";

/// Hands out "token-1", "token-2", ... on successive acquisitions
struct SequenceProvider {
    calls: AtomicUsize,
}

#[async_trait]
impl TokenProvider for SequenceProvider {
    fn provider_name(&self) -> &'static str {
        "sequence"
    }

    async fn acquire(&self) -> Result<AccessToken> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(AccessToken::new(format!("token-{}", n), 3600))
    }
}

fn static_client() -> ApiClient {
    ApiClient::new(TokenCache::new(Arc::new(StaticTokenProvider::new("token")))).expect("client")
}

#[tokio::test]
async fn test_unauthorized_request_is_retried_with_fresh_token() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer token-1"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .and(header("authorization", "Bearer token-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "ok": true })))
        .mount(&server)
        .await;

    let provider = Arc::new(SequenceProvider {
        calls: AtomicUsize::new(0),
    });
    let api = ApiClient::new(TokenCache::new(provider.clone())).unwrap();

    let body = api.fetch_json(&format!("{}/data", server.uri())).await.unwrap();
    assert_eq!(body, json!({ "ok": true }));
    assert_eq!(provider.calls.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_second_unauthorized_is_auth_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/data"))
        .respond_with(ResponseTemplate::new(401).set_body_string("token rejected"))
        .mount(&server)
        .await;

    let api = ApiClient::new(TokenCache::new(Arc::new(SequenceProvider {
        calls: AtomicUsize::new(0),
    })))
    .unwrap();

    let err = api.fetch_json(&format!("{}/data", server.uri())).await.unwrap_err();
    match err {
        FlowMonitorError::Auth(message) => assert!(message.contains("token rejected")),
        other => panic!("expected auth error, got {:?}", other),
    }
}

#[tokio::test]
async fn test_non_json_response_is_format_error() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/page"))
        .respond_with(
            ResponseTemplate::new(200).set_body_raw("<html>sign in</html>", "text/html"),
        )
        .mount(&server)
        .await;

    let err = static_client()
        .fetch_json(&format!("{}/page", server.uri()))
        .await
        .unwrap_err();
    assert!(matches!(err, FlowMonitorError::Format(ref m) if m.contains("text/html")));
}

#[tokio::test]
async fn test_http_error_keeps_status_and_short_excerpt() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/boom"))
        .respond_with(ResponseTemplate::new(503).set_body_string("e".repeat(2000)))
        .mount(&server)
        .await;

    let api = static_client();
    for err in [
        api.fetch_json(&format!("{}/boom", server.uri())).await.unwrap_err(),
        api.fetch_json_unauthenticated(&format!("{}/boom", server.uri()))
            .await
            .unwrap_err(),
    ] {
        match err {
            FlowMonitorError::Http { status, message } => {
                assert_eq!(status, Some(503));
                assert!(message.chars().count() <= EXCERPT_LIMIT);
            }
            other => panic!("expected HTTP error, got {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_list_runs_follows_next_link() {
    let server = MockServer::start().await;
    let next = format!("{}/runs-page-2", server.uri());
    Mock::given(method("GET"))
        .and(path(RUNS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "name": "r1" }, { "name": "r2" }],
            "nextLink": next
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/runs-page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "value": [{ "name": "r3" }] })))
        .mount(&server)
        .await;

    let client = FlowServiceClient::with_base_url(static_client(), server.uri());
    let mut request = ListRunsRequest {
        env_id: "env-1".to_string(),
        maker_id: "flow-1".to_string(),
        top: Some(250),
        ..Default::default()
    };

    let first = client.list_runs(&request).await.unwrap();
    assert_eq!(first.runs.len(), 2);
    assert_eq!(first.next_link.as_deref(), Some(next.as_str()));

    request.next_link = first.next_link;
    let second = client.list_runs(&request).await.unwrap();
    assert_eq!(second.runs.len(), 1);
    assert!(!second.has_more());
}

#[tokio::test]
async fn test_cloud_flows_are_read_across_pages() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/api/data/v9.2/workflows"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "name": "Flow A", "workflowid": "a", "statecode": 1 }],
            "@odata.nextLink": format!("{}/workflows-next", server.uri())
        })))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/workflows-next"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [{ "name": "Flow B", "workflowid": "b", "statecode": 0 }]
        })))
        .mount(&server)
        .await;

    let platform = DataverseClient::new(static_client(), server.uri());
    let flows = platform.fetch_cloud_flows().await.unwrap();
    let names: Vec<_> = flows.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, vec!["Flow A", "Flow B"]);
}

#[tokio::test]
async fn test_entity_set_name_resolution() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path_regex(r"EntityDefinitions.*person"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "EntitySetName": "people" })))
        .mount(&server)
        .await;

    let platform = DataverseClient::new(static_client(), server.uri());
    assert_eq!(platform.entity_set_name("person").await, "people");
    assert_eq!(platform.entity_set_name("account").await, "accounts");
}

async fn mount_run_history(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(RUNS_PATH))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "value": [
                { "name": "r1", "properties": { "status": "Succeeded" } },
                { "name": "r2", "properties": { "status": "Failed" } },
                { "name": "r3", "properties": { "status": "Succeeded" } }
            ]
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/r1", RUNS_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "properties": { "inputs": { "id": "5e6f7a8b-1111-2222-3333-444455556666" } }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/r2", RUNS_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "properties": { "trigger": { "outputsLink": { "uri": format!("{}/blob/r2", server.uri()) } } }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/blob/r2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "body": { "accountid": "5E6F7A8B111122223333444455556666" }
        })))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path(format!("{}/r3", RUNS_PATH)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "properties": {} })))
        .mount(server)
        .await;
}

async fn collect_found(api: Arc<dyn RunHistoryApi>) -> (Vec<String>, Option<SearchEvent>) {
    let search = RunSearch::new(api, RecordMatcher::new(RECORD, None));
    let request = SearchRequest::new(Some("env-1".to_string()), "flow-1");
    let (tx, mut rx) = unbounded_channel();
    let mut session = SearchSession::new();
    timeout(Duration::from_secs(10), search.run(&mut session, &request, &tx))
        .await
        .expect("search timed out");
    drop(tx);

    let mut found = Vec::new();
    let mut last = None;
    while let Some(event) = rx.recv().await {
        if let SearchEvent::RunFound { run, .. } = &event {
            found.push(run.name.clone());
        }
        last = Some(event);
    }
    found.sort();
    (found, last)
}

#[tokio::test]
async fn test_record_search_end_to_end() {
    let server = MockServer::start().await;
    mount_run_history(&server).await;

    let api = Arc::new(FlowServiceClient::with_base_url(static_client(), server.uri()));
    let (found, last) = collect_found(api).await;

    assert_eq!(found, vec!["r1", "r2"]);
    assert_eq!(last, Some(SearchEvent::Finished { scanned: 3, cancelled: false }));
}

#[tokio::test]
async fn test_record_search_through_bridge() {
    let server = MockServer::start().await;
    mount_run_history(&server).await;

    let dir = tempfile::TempDir::new().unwrap();
    let manager = ConfigManager::with_config_dir(dir.path()).await.unwrap();
    let config = Arc::new(RwLock::new(manager.config().clone()));
    let api = static_client();
    let handler = BridgeHandler::new(
        api.clone(),
        FlowServiceClient::with_base_url(api, server.uri()),
        manager,
        config,
    );
    let client = bridge::connect_local(handler, Duration::from_secs(5));

    let runs = Arc::new(BridgeRunApi::with_base_url(client.clone(), server.uri()));
    let (found, last) = collect_found(runs).await;

    assert_eq!(found, vec!["r1", "r2"]);
    assert_eq!(last, Some(SearchEvent::Finished { scanned: 3, cancelled: false }));
    assert_eq!(client.pending_count().await, 0);
}
