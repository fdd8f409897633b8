//! First-shot generation followed by repair

use nlq_dsl::{InputFormatError, Query};
use thiserror::Error;

use crate::collab::{GenerationError, GenerationRequest, GenerationTask, QueryGenerator};
use crate::repair::{check, repair, RepairAttempt, RepairExhaustedError, RepairFeedback, RepairOptions, RepairOutcome};
use crate::schema::SchemaMapping;
use crate::validate::{IssueKind, ValidationIssue};

pub const DEFAULT_IMPROVE_GOAL: &str = "better performance, accuracy and readability";

#[derive(Debug, Error)]
pub enum TranslationError {
    #[error(transparent)]
    Generation(#[from] GenerationError),

    #[error("Invalid question: {0}")]
    InputFormat(#[from] InputFormatError),

    #[error(transparent)]
    Exhausted(#[from] RepairExhaustedError),
}

/// Translate a natural-language question into a validated query
pub async fn translate<G>(
    text: &str,
    schema: &SchemaMapping,
    generator: &G,
    options: &RepairOptions,
) -> Result<RepairOutcome, TranslationError>
where
    G: QueryGenerator + ?Sized,
{
    let text = text.trim();
    if text.is_empty() {
        return Err(InputFormatError::Empty.into());
    }

    tracing::info!(chars = text.len(), fields = schema.len(), "Translating question");
    let task = GenerationTask::Translate { text: text.to_string() };
    first_shot(task, Query::Null, schema, generator, options).await
}

/// Rewrite a working query towards `goal`, then validate and repair it
pub async fn improve<G>(
    query: &Query,
    goal: Option<&str>,
    schema: &SchemaMapping,
    generator: &G,
    options: &RepairOptions,
) -> Result<RepairOutcome, TranslationError>
where
    G: QueryGenerator + ?Sized,
{
    let goal = goal
        .map(str::trim)
        .filter(|g| !g.is_empty())
        .unwrap_or(DEFAULT_IMPROVE_GOAL);

    tracing::info!(goal, fingerprint = %query.fingerprint(), "Improving query");
    let task = GenerationTask::Improve {
        query: query.clone(),
        goal: goal.to_string(),
    };
    first_shot(task, query.clone(), schema, generator, options).await
}

/// Repair `query`, optionally after it failed on the cluster with `error`
pub async fn fix<G>(
    query: Query,
    error: Option<&str>,
    schema: &SchemaMapping,
    generator: &G,
    options: &RepairOptions,
) -> Result<RepairOutcome, RepairExhaustedError>
where
    G: QueryGenerator + ?Sized,
{
    let mut feedback = RepairFeedback::from_issues(check(&query, schema));
    if let Some(error) = error.map(str::trim).filter(|e| !e.is_empty()) {
        feedback = feedback.with_external_error(error);
    }

    tracing::info!(
        issues = feedback.issues.len(),
        external_error = feedback.external_error.is_some(),
        "Fixing query"
    );
    repair(query, schema, feedback, options, generator).await
}

/// Runs the first-shot task until it yields a parseable candidate, then
/// hands that candidate to the repair loop.
///
/// Failed first shots (unparseable output, timeouts, provider errors) consume
/// repair attempts and are re-issued with the failure as feedback. A valid
/// first shot consumes none. Authentication failures abort immediately.
async fn first_shot<G>(
    task: GenerationTask,
    input: Query,
    schema: &SchemaMapping,
    generator: &G,
    options: &RepairOptions,
) -> Result<RepairOutcome, TranslationError>
where
    G: QueryGenerator + ?Sized,
{
    let task_name = task.name();
    let mut attempts: Vec<RepairAttempt> = Vec::new();
    let mut feedback = RepairFeedback::default();

    loop {
        let request = GenerationRequest {
            task: task.clone(),
            schema,
            feedback: (!feedback.is_empty()).then(|| feedback.describe()),
            attempt: attempts.len() as u32,
        };

        let generated = match generator.generate(&request).await {
            Ok(raw) => Query::parse(&raw).map_err(|e| format!("Generated output is not a valid query document: {}", e)),
            Err(e) if !e.is_retryable() => {
                tracing::warn!(task = task_name, error = %e, "Generation failed");
                return Err(e.into());
            }
            Err(e) => Err(format!("Generation failed: {}", e)),
        };

        match generated {
            Ok(candidate) => {
                let issues = check(&candidate, schema);
                tracing::debug!(task = task_name, issues = issues.len(), "First-shot candidate generated");

                let spent = attempts.len() as u32;
                let remaining = RepairOptions {
                    max_attempts: options.max_attempts.saturating_sub(spent),
                };
                return match repair(candidate, schema, RepairFeedback::from_issues(issues), &remaining, generator).await {
                    Ok(mut outcome) => {
                        outcome.attempts = merge_attempts(attempts, outcome.attempts);
                        Ok(outcome)
                    }
                    Err(mut exhausted) => {
                        exhausted.attempts = merge_attempts(attempts, exhausted.attempts);
                        Err(exhausted.into())
                    }
                };
            }
            Err(reason) => {
                let attempt = attempts.len() as u32 + 1;
                tracing::warn!(task = task_name, attempt, %reason, "First-shot generation failed");
                attempts.push(RepairAttempt {
                    attempt,
                    input: input.clone(),
                    feedback: feedback.clone(),
                    output: None,
                    accepted: false,
                });
                feedback
                    .issues
                    .push(ValidationIssue::new(Vec::new(), IssueKind::MalformedClause, reason));

                if attempts.len() as u32 >= options.max_attempts {
                    tracing::warn!(task = task_name, attempts = attempts.len(), "Repair attempts exhausted");
                    return Err(RepairExhaustedError {
                        attempts,
                        last_feedback: feedback,
                    }
                    .into());
                }
            }
        }
    }
}

/// Failed first shots followed by the repair loop's attempts, numbered as one run
fn merge_attempts(mut first: Vec<RepairAttempt>, rest: Vec<RepairAttempt>) -> Vec<RepairAttempt> {
    let offset = first.len() as u32;
    first.extend(rest.into_iter().map(|mut a| {
        a.attempt += offset;
        a
    }));
    first
}
