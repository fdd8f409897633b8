//! HTTP API handlers
//!
//! Every endpoint works on the caller's session, selected by the
//! `x-session-id` header (`default` when absent). Only `/api/connect`
//! registers a session and `/api/disconnect` removes it.

use axum::{
    extract::State,
    http::{header, HeaderMap},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use nlq_core::{
    describe_issues, Credentials, Query, RepairOutcome, SchemaMapping, SearchResults, SessionError, TranslationError,
    ValidationIssue,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::error::{ApiError, ApiResult};
use crate::state::{AppState, DEFAULT_SESSION, SESSION_HEADER};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/connect", post(connect))
        .route("/api/disconnect", post(disconnect))
        .route("/api/translate", post(translate))
        .route("/api/validate", post(validate))
        .route("/api/fix", post(fix))
        .route("/api/improve", post(improve))
        .route("/api/execute", post(execute))
        .route("/metrics", get(metrics))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn session_key(headers: &HeaderMap) -> String {
    headers
        .get(SESSION_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_SESSION)
        .to_string()
}

/// Hosts arrive either as a comma-separated string or a list
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum HostList {
    One(String),
    Many(Vec<String>),
}

impl HostList {
    fn into_vec(self) -> Vec<String> {
        let hosts = match self {
            HostList::One(joined) => joined.split(',').map(str::to_string).collect(),
            HostList::Many(hosts) => hosts,
        };
        hosts
            .into_iter()
            .map(|h| h.trim().to_string())
            .filter(|h| !h.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
pub struct ConnectRequest {
    #[serde(default)]
    pub hosts: Option<HostList>,
    #[serde(default)]
    pub cloud_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub index: Option<String>,
}

impl ConnectRequest {
    fn into_credentials(self) -> ApiResult<Credentials> {
        let index = self
            .index
            .map(|i| i.trim().to_string())
            .filter(|i| !i.is_empty())
            .ok_or_else(|| ApiError::bad_request("Index name is required"))?;
        let hosts = self.hosts.map(HostList::into_vec).unwrap_or_default();
        let cloud_id = self.cloud_id.filter(|c| !c.trim().is_empty());
        if hosts.is_empty() && cloud_id.is_none() {
            return Err(ApiError::bad_request("Either cloud ID or hosts is required"));
        }

        Ok(Credentials {
            hosts,
            cloud_id,
            username: self.username.filter(|u| !u.is_empty()),
            password: self.password,
            api_key: self.api_key.filter(|k| !k.is_empty()),
            index,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct TranslateRequest {
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub mapping: Option<Value>,
    /// Language model API key for this request only
    #[serde(default)]
    pub api_key: Option<String>,
}

/// Body of validate, fix, improve and execute
#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    #[serde(default)]
    pub query: Option<Value>,
    #[serde(default)]
    pub mapping: Option<Value>,
    /// Cluster error to repair against (fix)
    #[serde(default)]
    pub error: Option<String>,
    /// Improvement goal (improve)
    #[serde(default)]
    pub goal: Option<String>,
    /// Repair and retry once when the cluster rejects the query (execute)
    #[serde(default)]
    pub repair: bool,
    /// Language model API key for this request only
    #[serde(default)]
    pub api_key: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerationResponse {
    pub success: bool,
    /// Pretty-printed query document
    pub query: String,
    pub attempts: usize,
}

impl From<&RepairOutcome> for GenerationResponse {
    fn from(outcome: &RepairOutcome) -> Self {
        Self {
            success: true,
            query: outcome.query.to_pretty_string(),
            attempts: outcome.attempts.len(),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ValidateResponse {
    pub valid: bool,
    pub issues: Vec<ValidationIssue>,
    pub error: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectResponse {
    pub connected: bool,
    pub index: String,
    pub fields: usize,
    pub mapping: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub hit_count: u64,
    pub results: SearchResults,
    /// The repaired query, when the original was rejected and repaired
    #[serde(skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    pub repair_attempts: usize,
}

fn parse_query(value: Option<Value>) -> ApiResult<Query> {
    match value {
        None | Some(Value::Null) => Err(ApiError::bad_request("No query provided")),
        Some(Value::String(text)) if text.trim().is_empty() => Err(ApiError::bad_request("No query provided")),
        Some(Value::String(text)) => Ok(Query::parse(&text)?),
        Some(value @ Value::Object(_)) => Ok(Query::from(value)),
        Some(other) => Err(nlq_core::InputFormatError::NotAnObject(Query::from(other).kind_name()).into()),
    }
}

/// A per-request mapping, given as a JSON document or as a string holding one
fn parse_mapping(value: Option<Value>) -> ApiResult<Option<SchemaMapping>> {
    let schema = match value {
        None | Some(Value::Null) => return Ok(None),
        Some(Value::String(text)) if text.trim().is_empty() => return Ok(None),
        Some(Value::String(text)) => SchemaMapping::from_json_str(&text),
        Some(value) => SchemaMapping::build(&value),
    };
    schema
        .map(Some)
        .map_err(|e| ApiError::with_code(axum::http::StatusCode::BAD_REQUEST, format!("Invalid mapping JSON: {}", e), "INVALID_MAPPING"))
}

fn record_generation(state: &AppState, operation: &str, result: &Result<RepairOutcome, SessionError>) {
    let (outcome, attempts) = match result {
        Ok(outcome) => ("accepted", outcome.attempts.len()),
        Err(SessionError::Repair(e)) | Err(SessionError::Translation(TranslationError::Exhausted(e))) => {
            ("exhausted", e.attempts.len())
        }
        Err(_) => ("failed", 0),
    };
    state.metrics.record_generation(operation, outcome, attempts);
}

async fn health(State(state): State<AppState>) -> Json<Value> {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "sessions": state.session_count().await,
    }))
}

async fn metrics(State(state): State<AppState>) -> ApiResult<impl IntoResponse> {
    let body = state
        .metrics
        .render()
        .map_err(|e| ApiError::internal(format!("Failed to render metrics: {}", e)))?;
    Ok(([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body))
}

async fn connect(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<ConnectRequest>,
) -> ApiResult<Json<ConnectResponse>> {
    let _timer = state.metrics.request_duration.with_label_values(&["connect"]).start_timer();
    let credentials = req.into_credentials().map_err(ApiError::not_connected)?;
    let key = session_key(&headers);

    let (shared, created) = state.open(&key).await;
    let mut session = shared.lock().await;
    let schema = match session.connect(&credentials).await {
        Ok(schema) => schema,
        Err(e) => {
            drop(session);
            if created {
                state.remove(&key).await;
            }
            return Err(ApiError::from(e).not_connected());
        }
    };

    let mapping: BTreeMap<String, String> = schema
        .fields()
        .map(|(path, ty)| (path.to_string(), ty.to_string()))
        .collect();
    crate::log_event!(
        level: tracing::Level::INFO,
        event: "connected",
        session: key,
        index: credentials.index,
        fields: mapping.len()
    );

    Ok(Json(ConnectResponse {
        connected: true,
        index: credentials.index,
        fields: mapping.len(),
        mapping,
    }))
}

async fn disconnect(State(state): State<AppState>, headers: HeaderMap) -> Json<Value> {
    let Some(session) = state.remove(&session_key(&headers)).await else {
        return Json(serde_json::json!({"success": true, "message": "Already disconnected"}));
    };
    let mut session = session.lock().await;

    let was_connected = session.status() == nlq_core::ConnectionStatus::Connected;
    session.disconnect().await;
    let message = if was_connected {
        "Disconnected from Elasticsearch"
    } else {
        "Already disconnected"
    };
    Json(serde_json::json!({"success": true, "message": message}))
}

async fn translate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<TranslateRequest>,
) -> ApiResult<Json<GenerationResponse>> {
    let _timer = state.metrics.request_duration.with_label_values(&["translate"]).start_timer();
    if req.query.trim().is_empty() {
        return Err(ApiError::bad_request("No query provided"));
    }
    let mapping = parse_mapping(req.mapping)?;
    let generator = state.generator_for(req.api_key.as_deref())?;
    let key = session_key(&headers);

    let session = state.session_or_transient(&key).await;
    let mut session = session.lock().await;
    let result = session
        .translate(&req.query, mapping.as_ref(), generator.as_ref())
        .await;
    record_generation(&state, "translate", &result);

    let outcome = result?;
    crate::log_event!(
        level: tracing::Level::INFO,
        event: "query_translated",
        session: key,
        attempts: outcome.attempts.len()
    );
    Ok(Json(GenerationResponse::from(&outcome)))
}

async fn validate(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<ValidateResponse>> {
    let _timer = state.metrics.request_duration.with_label_values(&["validate"]).start_timer();
    let query = match parse_query(req.query) {
        Ok(query) => query,
        Err(e) if e.code == Some("INVALID_QUERY") => {
            return Ok(Json(ValidateResponse {
                valid: false,
                issues: Vec::new(),
                error: Some(e.message),
            }));
        }
        Err(e) => return Err(e),
    };
    let mapping = parse_mapping(req.mapping)?;

    let session = state.session_or_transient(&session_key(&headers)).await;
    let session = session.lock().await;
    let issues = session.validate(&query, mapping.as_ref())?;

    Ok(Json(ValidateResponse {
        valid: issues.is_empty(),
        error: (!issues.is_empty()).then(|| describe_issues(&issues)),
        issues,
    }))
}

async fn fix(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<GenerationResponse>> {
    let _timer = state.metrics.request_duration.with_label_values(&["fix"]).start_timer();
    let query = parse_query(req.query)?;
    let mapping = parse_mapping(req.mapping)?;
    let generator = state.generator_for(req.api_key.as_deref())?;

    let session = state.session_or_transient(&session_key(&headers)).await;
    let mut session = session.lock().await;
    let result = session
        .fix(query, req.error.as_deref(), mapping.as_ref(), generator.as_ref())
        .await;
    record_generation(&state, "fix", &result);

    Ok(Json(GenerationResponse::from(&result?)))
}

async fn improve(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<GenerationResponse>> {
    let _timer = state.metrics.request_duration.with_label_values(&["improve"]).start_timer();
    let query = parse_query(req.query)?;
    let mapping = parse_mapping(req.mapping)?;
    let generator = state.generator_for(req.api_key.as_deref())?;

    let session = state.session_or_transient(&session_key(&headers)).await;
    let mut session = session.lock().await;
    let result = session
        .improve(&query, req.goal.as_deref(), mapping.as_ref(), generator.as_ref())
        .await;
    record_generation(&state, "improve", &result);

    Ok(Json(GenerationResponse::from(&result?)))
}

async fn execute(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<QueryRequest>,
) -> ApiResult<Json<ExecuteResponse>> {
    let _timer = state.metrics.request_duration.with_label_values(&["execute"]).start_timer();
    let query = parse_query(req.query)?;
    let generator = state.generator_for(req.api_key.as_deref())?;

    let Some(session) = state.existing(&session_key(&headers)).await else {
        state.metrics.executions.with_label_values(&["error"]).inc();
        return Err(SessionError::NotConnected.into());
    };
    let mut session = session.lock().await;

    let response = if req.repair {
        session
            .execute_and_repair(query, generator.as_ref())
            .await
            .map(|report| {
                let repair_attempts = report.repair.as_ref().map_or(0, |r| r.attempts.len());
                ExecuteResponse {
                    success: true,
                    hit_count: report.results.total,
                    query: report.repair.as_ref().map(|_| report.query.to_pretty_string()),
                    results: report.results,
                    repair_attempts,
                }
            })
    } else {
        session.execute(query).await.map(|results| ExecuteResponse {
            success: true,
            hit_count: results.total,
            results,
            query: None,
            repair_attempts: 0,
        })
    };

    let outcome = match &response {
        Ok(r) if r.query.is_some() => "repaired",
        Ok(_) => "ok",
        Err(_) => "error",
    };
    state.metrics.executions.with_label_values(&[outcome]).inc();

    Ok(Json(response?))
}
