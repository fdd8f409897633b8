//! OpenAI integration: turns generation requests into chat completions

use async_openai::{
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestUserMessageArgs,
        CreateChatCompletionRequestArgs,
    },
    Client,
};
use async_trait::async_trait;
use nlq_core::{GenerationError, GenerationRequest, GenerationTask, QueryGenerator};
use std::time::Duration;

use crate::config::LlmConfig;

/// System prompt - teaches the model the target DSL and the output contract
const SYSTEM_PROMPT: &str = r#"You are an expert at writing Elasticsearch queries in the Elasticsearch Query DSL (JSON).

You receive the index mapping as a list of `field.path: type` lines and either a
question, a query to fix, or a query to improve.

Rules:
1. Return ONLY one JSON object: the request body for the `_search` endpoint. No markdown, no explanations.
2. Only reference fields listed in the mapping, using their full dotted path.
3. Use `match` / `multi_match` for `text` fields and `term` / `terms` for `keyword`, numeric, boolean and date fields.
4. `range` only applies to numeric, date, keyword and ip fields. Date bounds must be ISO-8601 (e.g. "2024-01-31") or date math (e.g. "now-7d/d").
5. Combine conditions with `bool` (`must`, `should`, `filter`, `must_not`); prefer `filter` for exact conditions that do not affect scoring.
6. Sort and aggregate on `keyword`, numeric or date fields, never on `text` fields (use a `.keyword` sub-field when the mapping has one).
7. Fields inside `nested` objects must be queried with a `nested` query whose `path` is the nested field.

Example:

Mapping:
title: text
title.keyword: keyword
published: date
views: long

Question: "most viewed posts about rust from 2024"
Response:
{
  "query": {
    "bool": {
      "must": [{"match": {"title": "rust"}}],
      "filter": [{"range": {"published": {"gte": "2024-01-01", "lt": "2025-01-01"}}}]
    }
  },
  "sort": [{"views": {"order": "desc"}}],
  "size": 10
}

Return ONLY the JSON, no other text."#;

fn mapping_section(request: &GenerationRequest<'_>) -> String {
    if request.schema.is_empty() {
        "Mapping: not available; use field names that match the question.".to_string()
    } else {
        format!("Mapping:\n{}", request.schema.describe())
    }
}

/// The user message for a generation request
pub fn user_prompt(request: &GenerationRequest<'_>) -> String {
    let mapping = mapping_section(request);
    let feedback = request
        .feedback
        .as_deref()
        .filter(|f| !f.trim().is_empty())
        .map(|f| format!("\n\nProblems found:\n{}", f))
        .unwrap_or_default();

    match &request.task {
        GenerationTask::Translate { text } => {
            format!("{}\n\nQuestion: \"{}\"{}", mapping, text, feedback)
        }
        GenerationTask::Repair { query } => format!(
            "{}\n\nThis query has problems:\n{}{}\n\nReturn the corrected query. Keep the intent of the original query.",
            mapping,
            query.to_pretty_string(),
            feedback
        ),
        GenerationTask::Improve { query, goal } => format!(
            "{}\n\nImprove this query for {}:\n{}{}\n\nReturn the improved query. It must return the same documents the original query is meant to find.",
            mapping,
            goal,
            query.to_pretty_string(),
            feedback
        ),
    }
}

fn messages(request: &GenerationRequest<'_>) -> Result<Vec<ChatCompletionRequestMessage>, OpenAIError> {
    Ok(vec![
        ChatCompletionRequestMessage::System(
            ChatCompletionRequestSystemMessageArgs::default()
                .content(SYSTEM_PROMPT)
                .build()?,
        ),
        ChatCompletionRequestMessage::User(
            ChatCompletionRequestUserMessageArgs::default()
                .content(user_prompt(request))
                .build()?,
        ),
    ])
}

fn classify(err: OpenAIError) -> GenerationError {
    match err {
        OpenAIError::ApiError(api) => {
            let kind = api.r#type.as_deref().unwrap_or_default();
            let lower = api.message.to_ascii_lowercase();
            if kind == "authentication_error" || lower.contains("api key") {
                GenerationError::Auth(api.message)
            } else if matches!(kind, "insufficient_quota" | "requests" | "tokens") || lower.contains("rate limit") {
                GenerationError::RateLimited(api.message)
            } else {
                GenerationError::Provider(api.message)
            }
        }
        OpenAIError::Reqwest(e) => GenerationError::Network(e.to_string()),
        other => GenerationError::Provider(other.to_string()),
    }
}

pub struct OpenAiGenerator {
    client: Client<OpenAIConfig>,
    model: String,
    temperature: f32,
    timeout: Duration,
}

impl OpenAiGenerator {
    pub fn new(api_key: &str, config: &LlmConfig) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(api_key);
        if let Some(base) = &config.api_base {
            openai_config = openai_config.with_api_base(base);
        }

        Self {
            client: Client::with_config(openai_config),
            model: config.model.clone(),
            temperature: config.temperature,
            timeout: config.timeout(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

#[async_trait]
impl QueryGenerator for OpenAiGenerator {
    async fn generate(&self, request: &GenerationRequest<'_>) -> Result<String, GenerationError> {
        let chat = CreateChatCompletionRequestArgs::default()
            .model(&self.model)
            .messages(messages(request).map_err(classify)?)
            .temperature(self.temperature)
            .build()
            .map_err(classify)?;

        let response = tokio::time::timeout(self.timeout, self.client.chat().create(chat))
            .await
            .map_err(|_| GenerationError::Timeout(self.timeout.as_secs()))?
            .map_err(classify)?;

        let content = response
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .ok_or_else(|| GenerationError::Provider("No response from OpenAI".to_string()))?;

        tracing::debug!(
            task = request.task.name(),
            attempt = request.attempt,
            model = %self.model,
            chars = content.len(),
            "LLM response received"
        );
        Ok(content)
    }
}
