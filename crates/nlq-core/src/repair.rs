//! Bounded validate / regenerate loop
//!
//! ```text
//! Validating --(no issues)--> Accepted
//!     |
//!     v (issues)
//! Generating --(attempts == max)--> Exhausted
//!     |   ^
//!     |   +--(generation failed or unparseable, attempt consumed)
//!     v
//! Validating
//! ```

use nlq_dsl::Query;
use serde::Serialize;
use thiserror::Error;

use crate::collab::{GenerationRequest, GenerationTask, QueryGenerator};
use crate::schema::SchemaMapping;
use crate::validate::{describe_issues, validate, IssueKind, ValidationIssue};

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, serde::Deserialize)]
pub struct RepairOptions {
    pub max_attempts: u32,
}

impl Default for RepairOptions {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// What drove a repair attempt
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RepairFeedback {
    pub issues: Vec<ValidationIssue>,
    /// Error reported by the cluster when the query was executed
    pub external_error: Option<String>,
}

impl RepairFeedback {
    pub fn from_issues(issues: Vec<ValidationIssue>) -> Self {
        Self {
            issues,
            external_error: None,
        }
    }

    pub fn with_external_error(mut self, error: impl Into<String>) -> Self {
        self.external_error = Some(error.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.issues.is_empty() && self.external_error.is_none()
    }

    /// Human-readable form handed to the generator
    pub fn describe(&self) -> String {
        let mut parts = Vec::new();
        if let Some(error) = &self.external_error {
            parts.push(format!("The query failed when executed against the cluster:\n{}", error));
        }
        if !self.issues.is_empty() {
            parts.push(format!(
                "The query has the following validation issues:\n{}",
                describe_issues(&self.issues)
            ));
        }
        parts.join("\n\n")
    }
}

/// One generator call inside the loop
#[derive(Debug, Clone, Serialize)]
pub struct RepairAttempt {
    pub attempt: u32,
    pub input: Query,
    pub feedback: RepairFeedback,
    /// `None` when generation failed or produced unparseable output
    pub output: Option<Query>,
    pub accepted: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct RepairOutcome {
    pub query: Query,
    pub attempts: Vec<RepairAttempt>,
}

#[derive(Debug, Clone, Error, Serialize)]
#[error("Query could not be repaired after {} attempt(s):\n{}", .attempts.len(), .last_feedback.describe())]
pub struct RepairExhaustedError {
    pub attempts: Vec<RepairAttempt>,
    pub last_feedback: RepairFeedback,
}

enum State {
    Validating,
    Generating,
}

/// Validation issues of `query`, with a root that is not an object reported
/// as a malformed clause
pub fn check(query: &Query, schema: &SchemaMapping) -> Vec<ValidationIssue> {
    match validate(query, schema) {
        Ok(issues) => issues,
        Err(e) => vec![ValidationIssue::new(Vec::new(), IssueKind::MalformedClause, e.to_string())],
    }
}

/// Repair `query` until it validates or `options.max_attempts` generator
/// calls have been spent.
///
/// With an `external_error` in `feedback` the loop starts by regenerating,
/// otherwise it starts by validating, so a valid query comes back unchanged
/// without calling the generator.
pub async fn repair<G>(
    query: Query,
    schema: &SchemaMapping,
    feedback: RepairFeedback,
    options: &RepairOptions,
    generator: &G,
) -> Result<RepairOutcome, RepairExhaustedError>
where
    G: QueryGenerator + ?Sized,
{
    let mut current = query;
    let mut feedback = feedback;
    let mut attempts: Vec<RepairAttempt> = Vec::new();
    let mut state = if feedback.external_error.is_some() {
        State::Generating
    } else {
        State::Validating
    };

    loop {
        match state {
            State::Validating => {
                let issues = check(&current, schema);
                if issues.is_empty() {
                    if let Some(last) = attempts.last_mut() {
                        last.accepted = true;
                    }
                    tracing::info!(
                        attempts = attempts.len(),
                        fingerprint = %current.fingerprint(),
                        "Query accepted"
                    );
                    return Ok(RepairOutcome {
                        query: current,
                        attempts,
                    });
                }

                tracing::debug!(issues = issues.len(), "Query has validation issues");
                feedback = RepairFeedback::from_issues(issues);
                state = State::Generating;
            }
            State::Generating => {
                if attempts.len() as u32 >= options.max_attempts {
                    tracing::warn!(
                        attempts = attempts.len(),
                        issues = feedback.issues.len(),
                        "Repair attempts exhausted"
                    );
                    return Err(RepairExhaustedError {
                        attempts,
                        last_feedback: feedback,
                    });
                }

                let attempt = attempts.len() as u32 + 1;
                let request = GenerationRequest {
                    task: GenerationTask::Repair {
                        query: current.clone(),
                    },
                    schema,
                    feedback: Some(feedback.describe()),
                    attempt,
                };

                let input_fingerprint = current.fingerprint();
                let generated = match generator.generate(&request).await {
                    Ok(text) => Query::parse(&text)
                        .map_err(|e| format!("Generated output is not a valid query document: {}", e)),
                    Err(e) => Err(format!("Generation failed: {}", e)),
                };

                match generated {
                    Ok(candidate) => {
                        let output_fingerprint = candidate.fingerprint();
                        tracing::info!(
                            attempt,
                            max_attempts = options.max_attempts,
                            issues = feedback.issues.len(),
                            external_error = feedback.external_error.is_some(),
                            input = %input_fingerprint,
                            output = %output_fingerprint,
                            unchanged = input_fingerprint == output_fingerprint,
                            "Repair attempt generated a candidate"
                        );
                        let input = std::mem::replace(&mut current, candidate.clone());
                        attempts.push(RepairAttempt {
                            attempt,
                            input,
                            feedback: feedback.clone(),
                            output: Some(candidate),
                            accepted: false,
                        });
                        state = State::Validating;
                    }
                    Err(reason) => {
                        tracing::warn!(attempt, input = %input_fingerprint, %reason, "Repair attempt failed");
                        attempts.push(RepairAttempt {
                            attempt,
                            input: current.clone(),
                            feedback: feedback.clone(),
                            output: None,
                            accepted: false,
                        });
                        feedback
                            .issues
                            .push(ValidationIssue::new(Vec::new(), IssueKind::MalformedClause, reason));
                    }
                }
            }
        }
    }
}
