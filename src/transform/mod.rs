//! # Content Transformation
//!
//! Artifacts are normalised to JSON (YAML blobs are converted on read) and
//! may then be reshaped by a per-stage query. The query language is behind
//! the [`ContentTransformer`] trait; [`JsonPointerTransformer`] selects a
//! sub-document by JSON pointer or dotted path.

use serde_json::Value;
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransformError {
    #[error("Failed to parse {format} content from {source_name}: {message}")]
    Parse {
        format: &'static str,
        source_name: String,
        message: String,
    },

    #[error("Query '{query}' failed: {message}")]
    Query { query: String, message: String },
}

impl TransformError {
    pub fn parse(
        format: &'static str,
        source_name: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::Parse {
            format,
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    pub fn query(query: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Query {
            query: query.into(),
            message: message.into(),
        }
    }
}

pub type TransformResult<T> = Result<T, TransformError>;

/// Reshapes a JSON document with a query
pub trait ContentTransformer: Send + Sync {
    fn transform(&self, content: &Value, query: &str) -> TransformResult<Value>;
}

/// Selects a sub-document. Accepts `/a/0/b` pointers or `a.0.b` paths; an
/// empty query or `.` returns the document unchanged.
#[derive(Debug, Clone, Copy, Default)]
pub struct JsonPointerTransformer;

impl ContentTransformer for JsonPointerTransformer {
    fn transform(&self, content: &Value, query: &str) -> TransformResult<Value> {
        let query = query.trim();
        if query.is_empty() || query == "." {
            return Ok(content.clone());
        }

        let pointer = if query.starts_with('/') {
            query.to_string()
        } else {
            let path = query.trim_start_matches('.');
            format!("/{}", path.replace('~', "~0").replace('/', "~1").replace('.', "/"))
        };

        content
            .pointer(&pointer)
            .cloned()
            .ok_or_else(|| TransformError::query(query, "path does not exist in document"))
    }
}

pub fn is_yaml_blob(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    lower.ends_with(".yaml") || lower.ends_with(".yml")
}

/// Parse blob content as JSON, or as YAML when the blob name says so
pub fn parse_content(name: &str, content: &[u8]) -> TransformResult<Value> {
    if is_yaml_blob(name) {
        serde_yaml::from_slice::<Value>(content)
            .map_err(|e| TransformError::parse("YAML", name, e.to_string()))
    } else {
        serde_json::from_slice::<Value>(content)
            .map_err(|e| TransformError::parse("JSON", name, e.to_string()))
    }
}

/// Normalise to JSON then apply `query` if one is configured
pub fn normalize_and_transform(
    transformer: &dyn ContentTransformer,
    name: &str,
    content: &[u8],
    query: Option<&str>,
) -> TransformResult<Value> {
    let document = parse_content(name, content)?;
    match query {
        Some(query) if !query.trim().is_empty() => transformer.transform(&document, query),
        _ => Ok(document),
    }
}
