//! # Response Handling
//!
//! Status code classification for stage calls, `Retry-After` parsing, and
//! the structured metric, histogram and tag headers a stage endpoint may
//! return alongside its artifact.

use std::collections::{BTreeMap, HashSet};

use serde::Serialize;
use serde_json::Value;
use tracing::{info, info_span, warn};
use uuid::Uuid;

use super::endpoint::EndpointResponse;
use crate::config::HttpConfig;
use crate::constants::headers;
use crate::messaging::PipelineRequest;

/// How a stage call's status code is handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusClass {
    Success,
    /// Slow the stage down, retry later
    Busy,
    /// Dead-letter now
    Fatal,
    /// Retry later
    Transient,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StatusPolicy {
    busy: HashSet<u16>,
    fatal: HashSet<u16>,
}

impl StatusPolicy {
    pub fn new(
        busy: impl IntoIterator<Item = u16>,
        fatal: impl IntoIterator<Item = u16>,
    ) -> Self {
        Self {
            busy: busy.into_iter().collect(),
            fatal: fatal.into_iter().collect(),
        }
    }

    pub fn from_config(config: &HttpConfig) -> Self {
        Self::new(
            config.backoff_on_status_codes.iter().copied(),
            config.deadletter_on_status_codes.iter().copied(),
        )
    }

    /// Fatal codes take precedence over busy codes
    pub fn classify(&self, status: u16) -> StatusClass {
        if (200..300).contains(&status) {
            StatusClass::Success
        } else if self.fatal.contains(&status) {
            StatusClass::Fatal
        } else if self.busy.contains(&status) {
            StatusClass::Busy
        } else {
            StatusClass::Transient
        }
    }
}

/// `Retry-After` in whole seconds, as milliseconds
pub fn retry_after_ms(response: &EndpointResponse) -> Option<u64> {
    response
        .header(headers::RETRY_AFTER)
        .and_then(|value| value.trim().parse::<u64>().ok())
        .map(|seconds| seconds.saturating_mul(1000))
}

/// Histogram definition carried as `key=value;key=value`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct HistogramDefinition {
    pub header: String,
    pub kind: Option<String>,
    pub name: Option<String>,
    pub unit: Option<String>,
    pub description: Option<String>,
    pub value: Option<f64>,
}

impl HistogramDefinition {
    pub fn parse(header: &str, encoded: &str) -> Self {
        let mut definition = Self {
            header: header.to_string(),
            ..Self::default()
        };
        for pair in encoded.split(';') {
            let Some((key, value)) = pair.split_once('=') else {
                continue;
            };
            let value = value.trim().to_string();
            match key.trim().to_ascii_lowercase().as_str() {
                "type" => definition.kind = Some(value.to_ascii_lowercase()),
                "name" => definition.name = Some(value),
                "unit" => definition.unit = Some(value),
                "description" => definition.description = Some(value),
                "value" => definition.value = value.parse().ok(),
                _ => {}
            }
        }
        definition
    }

    /// Needs a known type, a name and a numeric value
    pub fn is_recordable(&self) -> bool {
        matches!(self.kind.as_deref(), Some("int" | "double" | "decimal"))
            && self.name.as_deref().is_some_and(|n| !n.is_empty())
            && self.value.is_some()
    }
}

/// Everything extracted from a stage response's headers
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ResponseHeaderSummary {
    pub metrics: BTreeMap<String, Value>,
    pub histograms: Vec<HistogramDefinition>,
    pub tags: BTreeMap<String, String>,
}

impl ResponseHeaderSummary {
    pub fn from_headers(response_headers: &[(String, String)]) -> Self {
        let mut summary = Self::default();
        for (name, value) in response_headers {
            let lower = name.to_ascii_lowercase();
            if let Some(metric) = lower.strip_prefix(headers::METRIC_PREFIX) {
                summary.metrics.insert(metric.to_string(), metric_value(value));
            } else if lower.starts_with(headers::HISTOGRAM_PREFIX) {
                summary.histograms.push(HistogramDefinition::parse(&lower, value));
            } else if let Some(tag) = lower.strip_prefix(headers::TAG_PREFIX) {
                summary.tags.insert(tag.to_string(), value.clone());
            }
        }
        summary
    }

    /// Emit histogram samples as structured events inside a span that
    /// carries the response tags
    pub fn emit(&self, stage: &str, request: &PipelineRequest) {
        let span = info_span!(
            "response_metrics",
            stage = %stage,
            run_id = %request.run_id,
            id = %request.id,
            tags = ?self.tags,
        );
        let _entered = span.enter();

        for histogram in &self.histograms {
            if !histogram.is_recordable() {
                warn!(header = %histogram.header, "⚠️ Ignoring invalid histogram definition");
                continue;
            }
            info!(
                histogram = histogram.name.as_deref().unwrap_or_default(),
                kind = histogram.kind.as_deref().unwrap_or_default(),
                unit = histogram.unit.as_deref().unwrap_or_default(),
                description = histogram.description.as_deref().unwrap_or_default(),
                value = histogram.value.unwrap_or_default(),
                "📊 Histogram sample"
            );
        }
        for (metric, value) in &self.metrics {
            info!(metric = %metric, value = %value, "📈 Metric");
        }
    }
}

fn metric_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    trimmed
        .parse::<f64>()
        .ok()
        .and_then(serde_json::Number::from_f64)
        .map(Value::Number)
        .unwrap_or_else(|| Value::String(trimmed.to_string()))
}

/// Result posted to the catalog for one item at one stage
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResultRecord {
    pub run_id: Uuid,
    pub id: Uuid,
    #[serde(rename = "ref")]
    pub reference: String,
    pub set: String,
    pub is_baseline: bool,
    pub inference_uri: String,
    /// Unset when the record comes from the inference stage
    pub evaluation_uri: Option<String>,
    pub metrics: BTreeMap<String, Value>,
}

impl ResultRecord {
    pub fn new(
        request: &PipelineRequest,
        inference_uri: String,
        evaluation_uri: Option<String>,
        metrics: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            run_id: request.run_id,
            id: request.id,
            reference: request.reference.clone(),
            set: request.set.clone(),
            is_baseline: request.is_baseline,
            inference_uri,
            evaluation_uri,
            metrics,
        }
    }
}

pub fn catalog_results_url(base_url: &str, project: &str, experiment: &str) -> String {
    format!(
        "{}/api/projects/{project}/experiments/{experiment}/results",
        base_url.trim_end_matches('/')
    )
}
