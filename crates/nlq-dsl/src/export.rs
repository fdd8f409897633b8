//! Query export to JSON or plain text

use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

use crate::Query;

#[derive(Debug, Error)]
pub enum ExportError {
    #[error("Unsupported export format: {0}")]
    UnsupportedFormat(String),

    #[error("Failed to write {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportFormat {
    /// JSON document, as sent to the search engine
    Json,
    /// Plain text with a trailing newline, for pasting into a console
    Text,
}

impl FromStr for ExportFormat {
    type Err = ExportError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(ExportFormat::Json),
            "text" | "txt" => Ok(ExportFormat::Text),
            _ => Err(ExportError::UnsupportedFormat(s.to_string())),
        }
    }
}

/// Render a query in the given format
pub fn export(query: &Query, format: ExportFormat, pretty: bool) -> String {
    let body = if pretty {
        query.to_pretty_string()
    } else {
        query.to_string()
    };

    match format {
        ExportFormat::Json => body,
        ExportFormat::Text => format!("{}\n", body),
    }
}

/// Render a query and write it to `path`, returning the rendered text
pub fn export_to_file<P: AsRef<Path>>(
    query: &Query,
    format: ExportFormat,
    pretty: bool,
    path: P,
) -> Result<String, ExportError> {
    let rendered = export(query, format, pretty);
    std::fs::write(path.as_ref(), &rendered).map_err(|source| ExportError::Io {
        path: path.as_ref().display().to_string(),
        source,
    })?;
    Ok(rendered)
}
