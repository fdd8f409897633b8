//! Text to query document parsing
//!
//! Language models frequently wrap JSON in markdown fences or prose, so the
//! parser tries, in order: the whole text, the first fenced code block, and
//! the outermost `{ ... }` span.

use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;
use thiserror::Error;

use crate::Query;

#[derive(Debug, Error)]
pub enum InputFormatError {
    #[error("Input is empty")]
    Empty,

    #[error("Invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Query must be a JSON object, got {0}")]
    NotAnObject(&'static str),
}

fn fenced_block() -> &'static Regex {
    static FENCE: OnceLock<Regex> = OnceLock::new();
    FENCE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("static regex"))
}

impl Query {
    /// Parse raw text into a query document. The root must be an object.
    pub fn parse(text: &str) -> Result<Query, InputFormatError> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(InputFormatError::Empty);
        }

        let value = match serde_json::from_str::<Value>(trimmed) {
            Ok(value) => value,
            Err(direct_err) => extract_embedded(trimmed).ok_or(direct_err)??,
        };

        let query = Query::from(value);
        match query {
            Query::Object(_) => Ok(query),
            other => Err(InputFormatError::NotAnObject(other.kind_name())),
        }
    }
}

/// Look for JSON embedded in surrounding text. `None` when there is no candidate span.
fn extract_embedded(text: &str) -> Option<Result<Value, serde_json::Error>> {
    if let Some(captures) = fenced_block().captures(text) {
        return Some(serde_json::from_str(&captures[1]));
    }

    let start = text.find('{')?;
    let end = text.rfind('}')?;
    if end <= start {
        return None;
    }
    Some(serde_json::from_str(&text[start..=end]))
}
