//! Validation and repair orchestration for generated search queries
//!
//! The pipeline: a [`QueryGenerator`] proposes a query, the validator checks it
//! against the index [`SchemaMapping`], and the repair loop feeds issues back
//! to the generator until the query validates or the attempt budget runs out.

pub mod collab;
pub mod repair;
pub mod schema;
pub mod session;
pub mod translate;
pub mod validate;

pub use collab::{
    ConnectionError, Credentials, ExecutionError, GenerationError, GenerationRequest, GenerationTask,
    QueryGenerator, SearchBackend, SearchResults,
};
pub use repair::{
    repair, RepairAttempt, RepairExhaustedError, RepairFeedback, RepairOptions, RepairOutcome,
    DEFAULT_MAX_ATTEMPTS,
};
pub use schema::{FieldType, SchemaMapping, SchemaParseError, TypeFamily};
pub use session::{ConnectionStatus, ExecutionReport, Session, SessionError};
pub use translate::{fix, improve, translate, TranslationError, DEFAULT_IMPROVE_GOAL};
pub use validate::{describe_issues, validate, IssueKind, ValidationIssue, Validator};

pub use nlq_dsl::{InputFormatError, Query};
