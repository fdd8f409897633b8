//! Per-caller state: connection, schema and current query

use nlq_dsl::{InputFormatError, Query};
use serde::Serialize;
use std::sync::Arc;
use thiserror::Error;
use uuid::Uuid;

use crate::collab::{ConnectionError, Credentials, ExecutionError, QueryGenerator, SearchBackend, SearchResults};
use crate::repair::{RepairExhaustedError, RepairOptions, RepairOutcome};
use crate::schema::{SchemaMapping, SchemaParseError};
use crate::translate::{self, TranslationError};
use crate::validate::{validate, ValidationIssue};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    Disconnected,
    Connected,
    Failed,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("Not connected to a cluster")]
    NotConnected,

    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error(transparent)]
    Translation(#[from] TranslationError),

    #[error(transparent)]
    Repair(#[from] RepairExhaustedError),

    #[error(transparent)]
    Schema(#[from] SchemaParseError),

    #[error(transparent)]
    Input(#[from] InputFormatError),
}

/// Result of `Session::execute_and_repair`
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionReport {
    /// The query that actually ran
    pub query: Query,
    pub results: SearchResults,
    /// Present when the first execution failed and the query was repaired
    pub repair: Option<RepairOutcome>,
}

pub struct Session<B: SearchBackend> {
    id: String,
    backend: Arc<B>,
    handle: Option<B::Handle>,
    status: ConnectionStatus,
    index: Option<String>,
    schema: SchemaMapping,
    current: Option<Query>,
    options: RepairOptions,
}

impl<B: SearchBackend> Session<B> {
    pub fn new(backend: Arc<B>, options: RepairOptions) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            backend,
            handle: None,
            status: ConnectionStatus::Disconnected,
            index: None,
            schema: SchemaMapping::empty(),
            current: None,
            options,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status
    }

    pub fn index(&self) -> Option<&str> {
        self.index.as_deref()
    }

    pub fn schema(&self) -> &SchemaMapping {
        &self.schema
    }

    pub fn current_query(&self) -> Option<&Query> {
        self.current.as_ref()
    }

    pub fn options(&self) -> &RepairOptions {
        &self.options
    }

    /// Connect to a cluster, dropping any existing connection first
    pub async fn connect(&mut self, credentials: &Credentials) -> Result<&SchemaMapping, SessionError> {
        if self.handle.is_some() {
            self.disconnect().await;
        }

        match self.backend.connect(credentials).await {
            Ok((handle, schema)) => {
                tracing::info!(
                    session = %self.id,
                    index = %credentials.index,
                    fields = schema.len(),
                    "Connected"
                );
                self.handle = Some(handle);
                self.schema = schema;
                self.index = Some(credentials.index.clone());
                self.status = ConnectionStatus::Connected;
                Ok(&self.schema)
            }
            Err(e) => {
                tracing::warn!(session = %self.id, index = %credentials.index, error = %e, "Connection failed");
                self.status = ConnectionStatus::Failed;
                Err(e.into())
            }
        }
    }

    /// Close the connection. The schema is kept for offline translation.
    pub async fn disconnect(&mut self) {
        if let Some(handle) = self.handle.take() {
            self.backend.disconnect(&handle).await;
            tracing::info!(session = %self.id, "Disconnected");
        }
        self.status = ConnectionStatus::Disconnected;
    }

    /// Replace the schema from a raw mapping document
    pub fn set_mapping(&mut self, raw: &serde_json::Value) -> Result<&SchemaMapping, SessionError> {
        self.schema = SchemaMapping::build(raw)?;
        tracing::debug!(session = %self.id, fields = self.schema.len(), "Mapping replaced");
        Ok(&self.schema)
    }

    pub async fn translate<G>(
        &mut self,
        text: &str,
        mapping: Option<&SchemaMapping>,
        generator: &G,
    ) -> Result<RepairOutcome, SessionError>
    where
        G: QueryGenerator + ?Sized,
    {
        let schema = mapping.unwrap_or(&self.schema);
        let outcome = translate::translate(text, schema, generator, &self.options).await?;
        self.current = Some(outcome.query.clone());
        Ok(outcome)
    }

    pub async fn fix<G>(
        &mut self,
        query: Query,
        error: Option<&str>,
        mapping: Option<&SchemaMapping>,
        generator: &G,
    ) -> Result<RepairOutcome, SessionError>
    where
        G: QueryGenerator + ?Sized,
    {
        let schema = mapping.unwrap_or(&self.schema);
        let outcome = translate::fix(query, error, schema, generator, &self.options).await?;
        self.current = Some(outcome.query.clone());
        Ok(outcome)
    }

    pub async fn improve<G>(
        &mut self,
        query: &Query,
        goal: Option<&str>,
        mapping: Option<&SchemaMapping>,
        generator: &G,
    ) -> Result<RepairOutcome, SessionError>
    where
        G: QueryGenerator + ?Sized,
    {
        let schema = mapping.unwrap_or(&self.schema);
        let outcome = translate::improve(query, goal, schema, generator, &self.options).await?;
        self.current = Some(outcome.query.clone());
        Ok(outcome)
    }

    pub fn validate(&self, query: &Query, mapping: Option<&SchemaMapping>) -> Result<Vec<ValidationIssue>, SessionError> {
        Ok(validate(query, mapping.unwrap_or(&self.schema))?)
    }

    pub async fn execute(&mut self, query: Query) -> Result<SearchResults, SessionError> {
        let handle = match (self.status, &self.handle) {
            (ConnectionStatus::Connected, Some(handle)) => handle,
            _ => return Err(SessionError::NotConnected),
        };

        let results = self.backend.execute(&query, handle).await?;
        tracing::info!(
            session = %self.id,
            total = results.total,
            took_ms = results.took_ms,
            "Query executed"
        );
        self.current = Some(query);
        Ok(results)
    }

    /// Execute `query`; on an execution error, repair it with the cluster's
    /// message as feedback and execute the repaired query once.
    pub async fn execute_and_repair<G>(&mut self, query: Query, generator: &G) -> Result<ExecutionReport, SessionError>
    where
        G: QueryGenerator + ?Sized,
    {
        match self.execute(query.clone()).await {
            Ok(results) => Ok(ExecutionReport {
                query,
                results,
                repair: None,
            }),
            Err(SessionError::Execution(err)) => {
                tracing::warn!(session = %self.id, error = %err.message, "Execution failed, repairing");
                let outcome = translate::fix(query, Some(&err.message), &self.schema, generator, &self.options).await?;
                let results = self.execute(outcome.query.clone()).await?;
                Ok(ExecutionReport {
                    query: outcome.query.clone(),
                    results,
                    repair: Some(outcome),
                })
            }
            Err(other) => Err(other),
        }
    }
}
