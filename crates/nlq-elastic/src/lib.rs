//! Elasticsearch REST transport
//!
//! Implements [`SearchBackend`] over the cluster's HTTP API:
//! - `GET /` to check reachability and credentials
//! - `GET /{index}/_mapping` to build the [`SchemaMapping`]
//! - `POST /{index}/_search` to execute queries

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use nlq_core::{ConnectionError, Credentials, ExecutionError, SchemaMapping, SearchBackend, SearchResults};
use nlq_dsl::Query;
use reqwest::{Method, RequestBuilder, StatusCode};
use serde_json::Value;
use std::time::Duration;

pub const DEFAULT_HOST: &str = "http://localhost:9200";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Auth {
    None,
    Basic { username: String, password: String },
    ApiKey(String),
}

/// An open connection to one index
#[derive(Debug, Clone)]
pub struct Connection {
    base_url: String,
    base: reqwest::Url,
    index: String,
    auth: Auth,
}

impl Connection {
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn index(&self) -> &str {
        &self.index
    }

    /// `segments` appended to the base URL, each percent-encoded
    pub fn endpoint(&self, segments: &[&str]) -> reqwest::Url {
        let mut url = self.base.clone();
        if let Ok(mut path) = url.path_segments_mut() {
            path.pop_if_empty().extend(segments);
        }
        url
    }
}

#[derive(Debug, Clone)]
pub struct ElasticClient {
    http: reqwest::Client,
}

impl ElasticClient {
    pub fn new(timeout: Duration) -> Result<Self, ConnectionError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConnectionError::InvalidCredentials(format!("Failed to build HTTP client: {}", e)))?;
        Ok(Self { http })
    }

    fn request(&self, method: Method, conn: &Connection, segments: &[&str]) -> RequestBuilder {
        let builder = self.http.request(method, conn.endpoint(segments));
        match &conn.auth {
            Auth::None => builder,
            Auth::Basic { username, password } => builder.basic_auth(username, Some(password)),
            Auth::ApiKey(key) => builder.header(reqwest::header::AUTHORIZATION, format!("ApiKey {}", key)),
        }
    }

    fn open(&self, credentials: &Credentials) -> Result<Connection, ConnectionError> {
        let index = credentials.index.trim();
        if index.is_empty() {
            return Err(ConnectionError::InvalidCredentials("an index name is required".into()));
        }

        let base_url = match credentials.cloud_id.as_deref().filter(|id| !id.trim().is_empty()) {
            Some(cloud_id) => decode_cloud_id(cloud_id)?,
            None => normalize_host(credentials.hosts.first().map(String::as_str).unwrap_or(DEFAULT_HOST)),
        };

        let base = reqwest::Url::parse(&base_url)
            .ok()
            .filter(|url| !url.cannot_be_a_base())
            .ok_or_else(|| ConnectionError::InvalidCredentials(format!("invalid host '{}'", base_url)))?;

        let auth = match (&credentials.username, &credentials.password, &credentials.api_key) {
            (Some(username), Some(password), _) if !username.is_empty() => Auth::Basic {
                username: username.clone(),
                password: password.clone(),
            },
            (_, _, Some(key)) if !key.is_empty() => Auth::ApiKey(encode_api_key(key)),
            _ => Auth::None,
        };

        Ok(Connection {
            base_url,
            base,
            index: index.to_string(),
            auth,
        })
    }
}

#[async_trait]
impl SearchBackend for ElasticClient {
    type Handle = Connection;

    async fn connect(&self, credentials: &Credentials) -> Result<(Connection, SchemaMapping), ConnectionError> {
        let conn = self.open(credentials)?;
        tracing::debug!(url = %conn.base_url, index = %conn.index, "Connecting to cluster");

        let info = self
            .request(Method::GET, &conn, &[])
            .send()
            .await
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;
        match info.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ConnectionError::Unauthorized(info.status().to_string()));
            }
            status if !status.is_success() => {
                return Err(ConnectionError::Unreachable(format!("cluster answered {}", status)));
            }
            _ => {}
        }

        let response = self
            .request(Method::GET, &conn, &[conn.index.as_str(), "_mapping"])
            .send()
            .await
            .map_err(|e| ConnectionError::Unreachable(e.to_string()))?;
        match response.status() {
            StatusCode::NOT_FOUND => return Err(ConnectionError::IndexNotFound(conn.index.clone())),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                return Err(ConnectionError::Unauthorized(response.status().to_string()));
            }
            status if !status.is_success() => {
                return Err(ConnectionError::Unreachable(format!("mapping request answered {}", status)));
            }
            _ => {}
        }

        let raw: Value = response
            .json()
            .await
            .map_err(|e| ConnectionError::Unreachable(format!("invalid mapping response: {}", e)))?;
        let schema = SchemaMapping::build(&raw)?;

        tracing::info!(url = %conn.base_url, index = %conn.index, fields = schema.len(), "Fetched index mapping");
        Ok((conn, schema))
    }

    async fn disconnect(&self, handle: &Connection) {
        // Connections are pooled by the HTTP client; nothing to close per index
        tracing::debug!(url = %handle.base_url, index = %handle.index, "Released connection");
    }

    async fn execute(&self, query: &Query, handle: &Connection) -> Result<SearchResults, ExecutionError> {
        let response = self
            .request(Method::POST, handle, &[handle.index.as_str(), "_search"])
            .json(&query.to_json())
            .send()
            .await
            .map_err(|e| ExecutionError::new(e.to_string()))?;

        let status = response.status();
        let body: Value = response
            .json()
            .await
            .map_err(|e| ExecutionError::new(format!("invalid search response ({}): {}", status, e)))?;

        if !status.is_success() {
            let message = error_reason(&body).unwrap_or_else(|| format!("cluster answered {}", status));
            tracing::debug!(%status, %message, "Search rejected");
            return Err(ExecutionError::new(message));
        }

        Ok(parse_results(&body))
    }
}

/// Cloud IDs are `name:base64(host[:port]$es_uuid$kibana_uuid)`
pub fn decode_cloud_id(cloud_id: &str) -> Result<String, ConnectionError> {
    let invalid = |why: &str| ConnectionError::InvalidCredentials(format!("invalid cloud_id: {}", why));

    let encoded = match cloud_id.split_once(':') {
        Some((_name, rest)) => rest,
        None => cloud_id,
    };
    let decoded = STANDARD.decode(encoded.trim()).map_err(|e| invalid(&e.to_string()))?;
    let decoded = String::from_utf8(decoded).map_err(|_| invalid("not UTF-8"))?;

    let mut parts = decoded.split('$');
    let host = parts.next().filter(|h| !h.is_empty()).ok_or_else(|| invalid("missing host"))?;
    let es_uuid = parts.next().filter(|u| !u.is_empty()).ok_or_else(|| invalid("missing cluster id"))?;

    let (domain, port) = match host.rsplit_once(':') {
        Some((domain, port)) => (domain, port),
        None => (host, "443"),
    };
    Ok(format!("https://{}.{}:{}", es_uuid, domain, port))
}

fn normalize_host(host: &str) -> String {
    let host = host.trim().trim_end_matches('/');
    if host.starts_with("http://") || host.starts_with("https://") {
        host.to_string()
    } else {
        format!("http://{}", host)
    }
}

/// `id:key` pairs are encoded; anything else is assumed to be encoded already
fn encode_api_key(key: &str) -> String {
    if key.contains(':') {
        STANDARD.encode(key)
    } else {
        key.to_string()
    }
}

/// The most specific reason in an error response, prefixed by its type
fn error_reason(body: &Value) -> Option<String> {
    let error = body.get("error")?;
    if let Some(text) = error.as_str() {
        return Some(text.to_string());
    }

    let cause = error
        .get("root_cause")
        .and_then(|causes| causes.get(0))
        .filter(|cause| cause.get("reason").is_some())
        .unwrap_or(error);
    let reason = cause.get("reason").and_then(Value::as_str)?;
    match cause.get("type").and_then(Value::as_str) {
        Some(kind) => Some(format!("{}: {}", kind, reason)),
        None => Some(reason.to_string()),
    }
}

fn parse_results(body: &Value) -> SearchResults {
    let hits = &body["hits"];
    // 7.x+ reports {"value": n, "relation": ...}; older clusters a bare number
    let total = hits["total"]["value"]
        .as_u64()
        .or_else(|| hits["total"].as_u64())
        .unwrap_or(0);

    SearchResults {
        hits: hits["hits"].as_array().cloned().unwrap_or_default(),
        total,
        took_ms: body["took"].as_u64().unwrap_or(0),
        aggregations: body.get("aggregations").cloned(),
    }
}
