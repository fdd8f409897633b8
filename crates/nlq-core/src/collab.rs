//! Collaborator interfaces: the query generator and the search backend
//!
//! The core never talks to a language model or a cluster directly; it is
//! handed implementations of these traits.

use async_trait::async_trait;
use nlq_dsl::Query;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::schema::{SchemaMapping, SchemaParseError};

/// What the generator is asked to produce
#[derive(Debug, Clone, PartialEq)]
pub enum GenerationTask {
    /// Natural-language question to a new query
    Translate { text: String },
    /// Fix `query` according to the request feedback
    Repair { query: Query },
    /// Rewrite a working `query` towards `goal`
    Improve { query: Query, goal: String },
}

impl GenerationTask {
    pub fn name(&self) -> &'static str {
        match self {
            GenerationTask::Translate { .. } => "translate",
            GenerationTask::Repair { .. } => "repair",
            GenerationTask::Improve { .. } => "improve",
        }
    }
}

#[derive(Debug, Clone)]
pub struct GenerationRequest<'a> {
    pub task: GenerationTask,
    pub schema: &'a SchemaMapping,
    /// Accumulated validation issues and/or execution error, human readable
    pub feedback: Option<String>,
    /// 0 for the first-shot call, 1.. for repair attempts
    pub attempt: u32,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GenerationError {
    #[error("Generator authentication failed: {0}")]
    Auth(String),

    #[error("Generator rate limit exceeded: {0}")]
    RateLimited(String),

    #[error("Network error talking to generator: {0}")]
    Network(String),

    #[error("Generator timed out after {0}s")]
    Timeout(u64),

    #[error("Generator error: {0}")]
    Provider(String),
}

impl GenerationError {
    /// Whether calling again can succeed; a rejected credential never will
    pub fn is_retryable(&self) -> bool {
        !matches!(self, GenerationError::Auth(_))
    }
}

/// Produces raw query text; parsing happens in the orchestrators.
/// Timeouts are enforced by the implementation.
#[async_trait]
pub trait QueryGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError>;
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub hosts: Vec<String>,
    #[serde(default)]
    pub cloud_id: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub api_key: Option<String>,
    pub index: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchResults {
    pub hits: Vec<serde_json::Value>,
    pub total: u64,
    pub took_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregations: Option<serde_json::Value>,
}

#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("Invalid connection settings: {0}")]
    InvalidCredentials(String),

    #[error("Cluster unreachable: {0}")]
    Unreachable(String),

    #[error("Authentication rejected by cluster: {0}")]
    Unauthorized(String),

    #[error("Index '{0}' does not exist")]
    IndexNotFound(String),

    #[error("Could not read index mapping: {0}")]
    Mapping(#[from] SchemaParseError),
}

/// The cluster rejected or failed a query. `message` is fed back to the
/// generator verbatim, so it should carry the cluster's own reason.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Query execution failed: {message}")]
pub struct ExecutionError {
    pub message: String,
}

impl ExecutionError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait SearchBackend: Send + Sync {
    type Handle: Send + Sync;

    /// Open a connection and fetch the index mapping
    async fn connect(&self, credentials: &Credentials) -> Result<(Self::Handle, SchemaMapping), ConnectionError>;

    async fn disconnect(&self, handle: &Self::Handle);

    async fn execute(&self, query: &Query, handle: &Self::Handle) -> Result<SearchResults, ExecutionError>;
}
