//! End-to-end tests for the translate / repair orchestration with a scripted generator

use async_trait::async_trait;
use nlq_core::{
    fix, improve, repair, translate, GenerationError, GenerationRequest, GenerationTask, IssueKind, Query,
    QueryGenerator, RepairFeedback, RepairOptions, SchemaMapping, TranslationError, DEFAULT_IMPROVE_GOAL,
};
use serde_json::json;
use std::sync::Mutex;

/// Replays canned responses and records every request it receives
struct ScriptedGenerator {
    responses: Mutex<Vec<Result<String, GenerationError>>>,
    calls: Mutex<Vec<(String, Option<String>, u32)>>,
    fallback: Option<String>,
}

impl ScriptedGenerator {
    fn new(responses: Vec<Result<String, GenerationError>>) -> Self {
        let mut responses = responses;
        responses.reverse();
        Self {
            responses: Mutex::new(responses),
            calls: Mutex::new(Vec::new()),
            fallback: None,
        }
    }

    /// Answers every call with the same text
    fn always(text: &str) -> Self {
        Self {
            responses: Mutex::new(Vec::new()),
            calls: Mutex::new(Vec::new()),
            fallback: Some(text.to_string()),
        }
    }

    fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }

    fn calls(&self) -> Vec<(String, Option<String>, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl QueryGenerator for ScriptedGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        self.calls.lock().unwrap().push((
            request.task.name().to_string(),
            request.feedback.clone(),
            request.attempt,
        ));
        if let Some(next) = self.responses.lock().unwrap().pop() {
            return next;
        }
        match &self.fallback {
            Some(text) => Ok(text.clone()),
            None => Err(GenerationError::Provider("no scripted response left".into())),
        }
    }
}

fn schema() -> SchemaMapping {
    SchemaMapping::build(&json!({
        "properties": {
            "title": {"type": "text"},
            "date": {"type": "date"},
            "views": {"type": "long"}
        }
    }))
    .unwrap()
}

const VALID: &str = r#"{"query": {"match": {"title": "rust"}}}"#;
const UNKNOWN_FIELD: &str = r#"{"query": {"match": {"author": "alice"}}}"#;
const BAD_DATE: &str = r#"{"query": {"range": {"date": {"gt": "not-a-date"}}}}"#;

#[tokio::test]
async fn test_repair_is_idempotent_on_valid_query() {
    let generator = ScriptedGenerator::always(UNKNOWN_FIELD);
    let query = Query::parse(VALID).unwrap();

    let outcome = repair(query.clone(), &schema(), RepairFeedback::default(), &RepairOptions::default(), &generator)
        .await
        .unwrap();

    assert_eq!(outcome.query, query);
    assert!(outcome.attempts.is_empty());
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn test_always_invalid_generator_exhausts_after_three_attempts() {
    let generator = ScriptedGenerator::always(BAD_DATE);
    let query = Query::parse(BAD_DATE).unwrap();
    let options = RepairOptions { max_attempts: 3 };

    let err = repair(query, &schema(), RepairFeedback::default(), &options, &generator)
        .await
        .unwrap_err();

    assert_eq!(err.attempts.len(), 3);
    assert!(err.attempts.iter().all(|a| !a.accepted));
    assert_eq!(generator.call_count(), 3);
    assert_eq!(err.last_feedback.issues.len(), 1);
    assert_eq!(err.last_feedback.issues[0].kind, IssueKind::TypeMismatch);
    assert_eq!(err.last_feedback.issues[0].path, vec!["query", "range", "date", "gt"]);

    let attempts: Vec<u32> = generator.calls().iter().map(|(_, _, n)| *n).collect();
    assert_eq!(attempts, vec![1, 2, 3]);
}

#[tokio::test]
async fn test_generator_calls_never_exceed_budget() {
    for max_attempts in [0, 1, 2, 5] {
        let generator = ScriptedGenerator::always("not json at all");
        let options = RepairOptions { max_attempts };

        let err = repair(Query::parse(UNKNOWN_FIELD).unwrap(), &schema(), RepairFeedback::default(), &options, &generator)
            .await
            .unwrap_err();

        assert_eq!(generator.call_count(), max_attempts as usize);
        assert_eq!(err.attempts.len(), max_attempts as usize);
        assert!(err.attempts.iter().all(|a| a.output.is_none()));
    }
}

#[tokio::test]
async fn test_repair_recovers_after_generation_failure() {
    let generator = ScriptedGenerator::new(vec![
        Err(GenerationError::RateLimited("slow down".into())),
        Ok(format!("Here you go:\n```json\n{}\n```", VALID)),
    ]);

    let outcome = repair(
        Query::parse(UNKNOWN_FIELD).unwrap(),
        &schema(),
        RepairFeedback::default(),
        &RepairOptions::default(),
        &generator,
    )
    .await
    .unwrap();

    assert_eq!(outcome.query, Query::parse(VALID).unwrap());
    assert_eq!(outcome.attempts.len(), 2);
    assert!(outcome.attempts[0].output.is_none());
    assert!(!outcome.attempts[0].accepted);
    assert!(outcome.attempts[1].accepted);

    // The failed call is reported back on the next attempt
    let second_feedback = outcome.attempts[1].feedback.describe();
    assert!(second_feedback.contains("UnknownField"));
    assert!(second_feedback.contains("rate limit"));
}

#[tokio::test]
async fn test_external_error_forces_regeneration_of_valid_query() {
    let generator = ScriptedGenerator::new(vec![Ok(r#"{"query": {"match": {"title": "rust"}}, "size": 5}"#.into())]);
    let query = Query::parse(VALID).unwrap();

    let outcome = fix(query, Some("index_not_found_exception"), &schema(), &generator, &RepairOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.query.get("size").and_then(Query::as_u64), Some(5));

    let calls = generator.calls();
    assert_eq!(calls[0].0, "repair");
    assert!(calls[0].1.as_deref().unwrap_or_default().contains("index_not_found_exception"));
}

#[tokio::test]
async fn test_translate_valid_first_shot_needs_no_repair() {
    let generator = ScriptedGenerator::new(vec![Ok(VALID.into())]);

    let outcome = translate("books about rust", &schema(), &generator, &RepairOptions::default())
        .await
        .unwrap();

    assert!(outcome.attempts.is_empty());
    assert_eq!(generator.call_count(), 1);
    assert_eq!(generator.calls()[0], ("translate".to_string(), None, 0));
}

#[tokio::test]
async fn test_translate_repairs_invalid_first_shot() {
    let generator = ScriptedGenerator::new(vec![Ok(BAD_DATE.into()), Ok(VALID.into())]);

    let outcome = translate("recent posts", &schema(), &generator, &RepairOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.attempts.len(), 1);
    assert!(outcome.attempts[0].accepted);
    assert_eq!(outcome.attempts[0].input, Query::parse(BAD_DATE).unwrap());
}

#[tokio::test]
async fn test_translate_errors() {
    let generator = ScriptedGenerator::new(vec![Err(GenerationError::Auth("bad key".into()))]);
    let err = translate("anything", &schema(), &generator, &RepairOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TranslationError::Generation(GenerationError::Auth(_))));

    let generator = ScriptedGenerator::always("I cannot help with that");
    let err = translate("anything", &schema(), &generator, &RepairOptions::default())
        .await
        .unwrap_err();
    match err {
        TranslationError::Exhausted(exhausted) => {
            assert_eq!(exhausted.attempts.len(), 3);
            assert!(exhausted.attempts.iter().all(|a| a.output.is_none()));
            assert_eq!(exhausted.last_feedback.issues.len(), 3);
            assert!(exhausted
                .last_feedback
                .issues
                .iter()
                .all(|i| i.kind == IssueKind::MalformedClause));
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
    assert_eq!(generator.call_count(), 3);

    let generator = ScriptedGenerator::always(UNKNOWN_FIELD);
    let err = translate("anything", &schema(), &generator, &RepairOptions { max_attempts: 2 })
        .await
        .unwrap_err();
    match err {
        TranslationError::Exhausted(exhausted) => assert_eq!(exhausted.attempts.len(), 2),
        other => panic!("expected exhaustion, got {:?}", other),
    }
    assert_eq!(generator.call_count(), 3);

    let generator = ScriptedGenerator::always(VALID);
    let err = translate("   ", &schema(), &generator, &RepairOptions::default())
        .await
        .unwrap_err();
    assert!(matches!(err, TranslationError::InputFormat(_)));
    assert_eq!(generator.call_count(), 0);
}

#[tokio::test]
async fn test_translate_retries_unparseable_first_shot() {
    let generator = ScriptedGenerator::new(vec![
        Ok("Sorry, here is the query: oops".into()),
        Err(GenerationError::Timeout(30)),
        Ok(VALID.into()),
    ]);

    let outcome = translate("find docs after 2020", &schema(), &generator, &RepairOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.query, Query::parse(VALID).unwrap());
    assert_eq!(outcome.attempts.len(), 2);
    assert_eq!(outcome.attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(), vec![1, 2]);
    assert!(outcome.attempts.iter().all(|a| a.output.is_none() && !a.accepted));

    // Every retry is the first-shot task again, carrying the earlier failures
    let calls = generator.calls();
    assert_eq!(calls.len(), 3);
    assert!(calls.iter().all(|(task, _, _)| task == "translate"));
    assert_eq!(calls[0].1, None);
    assert!(calls[1].1.as_deref().unwrap_or_default().contains("not a valid query document"));
    let last = calls[2].1.as_deref().unwrap_or_default();
    assert!(last.contains("timed out") && last.contains("MalformedClause"));
    assert_eq!(calls.iter().map(|(_, _, n)| *n).collect::<Vec<_>>(), vec![0, 1, 2]);
}

#[tokio::test]
async fn test_failed_first_shots_share_the_repair_budget() {
    let generator = ScriptedGenerator::new(vec![Ok("no json here".into())]);
    let generator = ScriptedGenerator {
        fallback: Some(UNKNOWN_FIELD.to_string()),
        ..generator
    };

    let err = translate("anything", &schema(), &generator, &RepairOptions { max_attempts: 2 })
        .await
        .unwrap_err();

    match err {
        TranslationError::Exhausted(exhausted) => {
            assert_eq!(exhausted.attempts.len(), 2);
            assert_eq!(exhausted.attempts.iter().map(|a| a.attempt).collect::<Vec<_>>(), vec![1, 2]);
            assert!(exhausted.attempts[0].output.is_none());
            assert_eq!(exhausted.attempts[1].input, Query::parse(UNKNOWN_FIELD).unwrap());
            assert_eq!(exhausted.last_feedback.issues[0].kind, IssueKind::UnknownField);
        }
        other => panic!("expected exhaustion, got {:?}", other),
    }
    // One failed first shot, the successful first shot, one repair call
    assert_eq!(generator.call_count(), 3);
}

#[tokio::test]
async fn test_improve_retries_failed_first_shot_with_original_input() {
    let generator = ScriptedGenerator::new(vec![Err(GenerationError::Network("reset".into())), Ok(VALID.into())]);
    let query = Query::parse(r#"{"query": {"match_all": {}}}"#).unwrap();

    let outcome = improve(&query, Some("faster"), &schema(), &generator, &RepairOptions::default())
        .await
        .unwrap();

    assert_eq!(outcome.attempts.len(), 1);
    assert_eq!(outcome.attempts[0].input, query);
    assert!(generator.calls().iter().all(|(task, _, _)| task == "improve"));
}

/// Captures the task of each request
struct TaskRecorder(Mutex<Vec<GenerationTask>>);

#[async_trait]
impl QueryGenerator for TaskRecorder {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        self.0.lock().unwrap().push(request.task.clone());
        Ok(VALID.to_string())
    }
}

#[tokio::test]
async fn test_improve_uses_default_goal() {
    let recorder = TaskRecorder(Mutex::new(Vec::new()));
    let query = Query::parse(r#"{"query": {"match_all": {}}}"#).unwrap();

    let outcome = improve(&query, None, &schema(), &recorder, &RepairOptions::default())
        .await
        .unwrap();
    assert_eq!(outcome.query, Query::parse(VALID).unwrap());

    let tasks = recorder.0.lock().unwrap();
    assert_eq!(
        tasks[0],
        GenerationTask::Improve {
            query,
            goal: DEFAULT_IMPROVE_GOAL.to_string()
        }
    );
}
