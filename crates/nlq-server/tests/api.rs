//! HTTP API tests against a scripted generator and a mocked cluster

use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use nlq_core::{GenerationError, GenerationRequest, QueryGenerator, RepairOptions};
use nlq_elastic::ElasticClient;
use nlq_server::{metrics::Metrics, router, state::GeneratorFactory, AppState};
use serde_json::{json, Value};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tower::ServiceExt;

struct ScriptedGenerator {
    responses: Mutex<Vec<String>>,
    fallback: String,
}

impl ScriptedGenerator {
    fn new(responses: &[&str], fallback: &str) -> Self {
        Self {
            responses: Mutex::new(responses.iter().rev().map(|s| s.to_string()).collect()),
            fallback: fallback.to_string(),
        }
    }
}

#[async_trait]
impl QueryGenerator for ScriptedGenerator {
    async fn generate(&self, _request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        Ok(self.responses.lock().unwrap().pop().unwrap_or_else(|| self.fallback.clone()))
    }
}

const MAPPING: &str = r#"{"properties": {"title": {"type": "text"}, "date": {"type": "date"}}}"#;
const VALID: &str = r#"{"query": {"match": {"title": "rust"}}}"#;
const INVALID: &str = r#"{"query": {"match": {"author": "alice"}}}"#;

fn state(generator: ScriptedGenerator) -> AppState {
    AppState::new(
        ElasticClient::new(Duration::from_secs(5)).unwrap(),
        Arc::new(generator),
        RepairOptions::default(),
        Metrics::new().unwrap(),
    )
}

fn app(generator: ScriptedGenerator) -> Router {
    router(state(generator))
}

async fn call(app: &Router, path: &str, session: Option<&str>, body: Value) -> (StatusCode, Value) {
    let mut request = Request::builder()
        .method("POST")
        .uri(path)
        .header("content-type", "application/json");
    if let Some(session) = session {
        request = request.header("x-session-id", session);
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::from(body.to_string())).unwrap())
        .await
        .unwrap();

    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, serde_json::from_slice(&bytes).unwrap())
}

#[tokio::test]
async fn test_health() {
    let app = app(ScriptedGenerator::new(&[], VALID));
    let response = app
        .oneshot(Request::builder().uri("/api/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_translate_with_request_mapping() {
    let app = app(ScriptedGenerator::new(&[INVALID, VALID], VALID));

    let (status, body) = call(
        &app,
        "/api/translate",
        None,
        json!({"query": "posts about rust", "mapping": MAPPING}),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["success"], true);
    assert_eq!(body["attempts"], 1);
    let query: Value = serde_json::from_str(body["query"].as_str().unwrap()).unwrap();
    assert_eq!(query, serde_json::from_str::<Value>(VALID).unwrap());
}

#[tokio::test]
async fn test_translate_requires_text() {
    let app = app(ScriptedGenerator::new(&[], VALID));
    let (status, body) = call(&app, "/api/translate", None, json!({"query": ""})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error"], "No query provided");
    assert_eq!(body["success"], false);
}

#[tokio::test]
async fn test_fix_exhaustion_reports_feedback() {
    let app = app(ScriptedGenerator::new(&[], INVALID));

    let (status, body) = call(
        &app,
        "/api/fix",
        None,
        json!({"query": INVALID, "mapping": serde_json::from_str::<Value>(MAPPING).unwrap()}),
    )
    .await;

    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert_eq!(body["code"], "REPAIR_EXHAUSTED");
    assert_eq!(body["details"]["issues"][0]["kind"], "UnknownField");
}

#[tokio::test]
async fn test_validate() {
    let app = app(ScriptedGenerator::new(&[], VALID));

    let (status, body) = call(&app, "/api/validate", None, json!({"query": INVALID, "mapping": MAPPING})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["valid"], false);
    assert_eq!(body["issues"][0]["path"], json!(["query", "match", "author"]));

    let (_, body) = call(&app, "/api/validate", None, json!({"query": "{not json"})).await;
    assert_eq!(body["valid"], false);
    assert!(body["error"].as_str().unwrap().starts_with("Invalid JSON"));
}

#[tokio::test]
async fn test_execute_requires_connection() {
    let app = app(ScriptedGenerator::new(&[], VALID));
    let (status, body) = call(&app, "/api/execute", None, json!({"query": VALID})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "NOT_CONNECTED");
}

#[tokio::test]
async fn test_sessions_are_independent() {
    let mut server = mockito::Server::new_async().await;
    let _info = server.mock("GET", "/").with_status(200).with_body("{}").create_async().await;
    let _mapping = server
        .mock("GET", "/books/_mapping")
        .with_status(200)
        .with_body(format!(r#"{{"books": {{"mappings": {}}}}}"#, MAPPING))
        .create_async()
        .await;
    let _search = server
        .mock("POST", "/books/_search")
        .with_status(200)
        .with_body(r#"{"took": 1, "hits": {"total": {"value": 3}, "hits": []}}"#)
        .create_async()
        .await;

    let app = app(ScriptedGenerator::new(&[], VALID));

    let (status, body) = call(
        &app,
        "/api/connect",
        Some("alice"),
        json!({"hosts": server.url(), "index": "books"}),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["connected"], true);
    assert_eq!(body["mapping"]["date"], "date");

    let (status, body) = call(&app, "/api/execute", Some("alice"), json!({"query": VALID})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hit_count"], 3);

    let (status, _) = call(&app, "/api/execute", Some("bob"), json!({"query": VALID})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, body) = call(&app, "/api/disconnect", Some("alice"), json!({})).await;
    assert_eq!(body["message"], "Disconnected from Elasticsearch");
    let (_, body) = call(&app, "/api/disconnect", Some("alice"), json!({})).await;
    assert_eq!(body["message"], "Already disconnected");
}

#[tokio::test]
async fn test_metrics_endpoint() {
    let app = app(ScriptedGenerator::new(&[], VALID));
    call(&app, "/api/translate", None, json!({"query": "anything"})).await;

    let response = app
        .oneshot(Request::builder().uri("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains(r#"nlq_generations_total{operation="translate",outcome="accepted"} 1"#));
}

#[tokio::test]
async fn test_only_connect_registers_sessions() {
    let state = state(ScriptedGenerator::new(&[], VALID));
    let app = router(state.clone());

    for i in 0..50 {
        let id = format!("caller-{}", i);
        let (status, _) = call(&app, "/api/validate", Some(&id), json!({"query": VALID})).await;
        assert_eq!(status, StatusCode::OK);
        call(&app, "/api/translate", Some(&id), json!({"query": "rust posts"})).await;
        let (_, body) = call(&app, "/api/disconnect", Some(&id), json!({})).await;
        assert_eq!(body["message"], "Already disconnected");
    }
    assert_eq!(state.session_count().await, 0);
}

#[tokio::test]
async fn test_disconnect_removes_session() {
    let mut server = mockito::Server::new_async().await;
    let _info = server.mock("GET", "/").with_status(200).with_body("{}").create_async().await;
    let _mapping = server
        .mock("GET", "/books/_mapping")
        .with_status(200)
        .with_body(format!(r#"{{"books": {{"mappings": {}}}}}"#, MAPPING))
        .create_async()
        .await;

    let state = state(ScriptedGenerator::new(&[], VALID));
    let app = router(state.clone());

    let (status, _) = call(&app, "/api/connect", Some("carol"), json!({"hosts": server.url(), "index": "books"})).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(state.session_count().await, 1);

    call(&app, "/api/disconnect", Some("carol"), json!({})).await;
    assert_eq!(state.session_count().await, 0);
}

#[tokio::test]
async fn test_failed_connect_reports_disconnected() {
    let mut server = mockito::Server::new_async().await;
    let _info = server.mock("GET", "/").with_status(401).create_async().await;

    let state = state(ScriptedGenerator::new(&[], VALID));
    let app = router(state.clone());

    let (status, body) = call(&app, "/api/connect", Some("dave"), json!({"hosts": server.url(), "index": "books"})).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["connected"], false);
    assert_eq!(body["success"], false);
    assert_eq!(state.session_count().await, 0);

    let (status, body) = call(&app, "/api/connect", None, json!({"hosts": server.url()})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["connected"], false);
}

#[tokio::test]
async fn test_request_api_key_selects_generator() {
    let app = app(ScriptedGenerator::new(&[], VALID));
    let (status, body) = call(&app, "/api/translate", None, json!({"query": "rust", "api_key": "sk-other"})).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "API_KEY_UNSUPPORTED");

    let keys = Arc::new(Mutex::new(Vec::new()));
    let seen = keys.clone();
    let factory: GeneratorFactory = Arc::new(move |key: &str| -> Arc<dyn QueryGenerator> {
        seen.lock().unwrap().push(key.to_string());
        Arc::new(ScriptedGenerator::new(&[], r#"{"query": {"match_all": {}}}"#))
    });
    let app = router(state(ScriptedGenerator::new(&[], VALID)).with_keyed_generator(factory));

    let (status, body) = call(&app, "/api/translate", None, json!({"query": "everything", "api_key": "sk-other"})).await;
    assert_eq!(status, StatusCode::OK);
    let query: Value = serde_json::from_str(body["query"].as_str().unwrap()).unwrap();
    assert_eq!(query, json!({"query": {"match_all": {}}}));

    let (_, body) = call(&app, "/api/translate", None, json!({"query": "everything"})).await;
    let query: Value = serde_json::from_str(body["query"].as_str().unwrap()).unwrap();
    assert_eq!(query, serde_json::from_str::<Value>(VALID).unwrap());
    assert_eq!(*keys.lock().unwrap(), vec!["sk-other".to_string()]);
}
