//! Shared application state and the per-caller session table
//!
//! A session is registered by `/api/connect` and removed by
//! `/api/disconnect`. Other endpoints borrow the registered session when
//! there is one and otherwise work on a transient session that is dropped
//! with the request.

use nlq_core::{QueryGenerator, RepairOptions, Session};
use nlq_elastic::ElasticClient;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

use crate::error::{ApiError, ApiResult};
use crate::metrics::Metrics;

pub const SESSION_HEADER: &str = "x-session-id";
pub const DEFAULT_SESSION: &str = "default";

pub type SharedSession = Arc<Mutex<Session<ElasticClient>>>;

/// Builds a generator bound to a caller-supplied API key
pub type GeneratorFactory = Arc<dyn Fn(&str) -> Arc<dyn QueryGenerator> + Send + Sync>;

#[derive(Clone)]
pub struct AppState {
    sessions: Arc<RwLock<HashMap<String, SharedSession>>>,
    backend: Arc<ElasticClient>,
    pub generator: Arc<dyn QueryGenerator>,
    keyed_generator: Option<GeneratorFactory>,
    pub options: RepairOptions,
    pub metrics: Arc<Metrics>,
}

impl AppState {
    pub fn new(
        backend: ElasticClient,
        generator: Arc<dyn QueryGenerator>,
        options: RepairOptions,
        metrics: Metrics,
    ) -> Self {
        Self {
            sessions: Arc::new(RwLock::new(HashMap::new())),
            backend: Arc::new(backend),
            generator,
            keyed_generator: None,
            options,
            metrics: Arc::new(metrics),
        }
    }

    /// Accept per-request API keys, building a generator for each one
    pub fn with_keyed_generator(mut self, factory: GeneratorFactory) -> Self {
        self.keyed_generator = Some(factory);
        self
    }

    /// The configured generator, or one bound to `api_key` when given
    pub fn generator_for(&self, api_key: Option<&str>) -> ApiResult<Arc<dyn QueryGenerator>> {
        match api_key.map(str::trim).filter(|k| !k.is_empty()) {
            None => Ok(self.generator.clone()),
            Some(key) => match &self.keyed_generator {
                Some(factory) => Ok(factory(key)),
                None => Err(ApiError::with_code(
                    axum::http::StatusCode::BAD_REQUEST,
                    "Per-request API keys are not supported by this server",
                    "API_KEY_UNSUPPORTED",
                )),
            },
        }
    }

    fn new_session(&self) -> Session<ElasticClient> {
        Session::new(self.backend.clone(), self.options)
    }

    /// The registered session for `key`, registering a new one if needed.
    /// The flag is true when the session was created by this call.
    pub async fn open(&self, key: &str) -> (SharedSession, bool) {
        if let Some(session) = self.sessions.read().await.get(key) {
            return (session.clone(), false);
        }

        let mut sessions = self.sessions.write().await;
        if let Some(session) = sessions.get(key) {
            return (session.clone(), false);
        }
        let session = self.new_session();
        tracing::debug!(key, id = session.id(), "Registered session");
        let session = Arc::new(Mutex::new(session));
        sessions.insert(key.to_string(), session.clone());
        (session, true)
    }

    /// The registered session for `key`, if any
    pub async fn existing(&self, key: &str) -> Option<SharedSession> {
        self.sessions.read().await.get(key).cloned()
    }

    /// The registered session for `key`, or an unregistered one for this request
    pub async fn session_or_transient(&self, key: &str) -> SharedSession {
        match self.existing(key).await {
            Some(session) => session,
            None => Arc::new(Mutex::new(self.new_session())),
        }
    }

    pub async fn remove(&self, key: &str) -> Option<SharedSession> {
        let removed = self.sessions.write().await.remove(key);
        if removed.is_some() {
            tracing::debug!(key, "Removed session");
        }
        removed
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
