//! # Pipeline Configuration
//!
//! Typed configuration for the two stage processors, the rate controller,
//! job status tracking and the enqueue path. Every option has a default, so
//! a configuration file only needs to name queues, URLs and containers.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use evaluator_pipeline::config::ConfigManager;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! // Load configuration (environment auto-detected)
//! let manager = ConfigManager::load()?;
//!
//! let concurrency = manager.config().inference.concurrency;
//! let max_attempts = manager.config().queues.max_attempts;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod loader;

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::defaults;

pub use error::{ConfigResult, ConfigurationError};
pub use loader::ConfigManager;

/// A stage processor a process may run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineRole {
    Inference,
    Evaluation,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub roles: Vec<PipelineRole>,
    pub queues: QueueConfig,
    pub inference: InferenceConfig,
    pub evaluation: EvaluationConfig,
    pub storage: StorageConfig,
    pub http: HttpConfig,
    pub rate: RateConfig,
    pub job_status: JobStatusConfig,
    pub catalog: CatalogConfig,
    pub enqueue: EnqueueConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            roles: vec![PipelineRole::Inference, PipelineRole::Evaluation],
            queues: QueueConfig::default(),
            inference: InferenceConfig::default(),
            evaluation: EvaluationConfig::default(),
            storage: StorageConfig::default(),
            http: HttpConfig::default(),
            rate: RateConfig::default(),
            job_status: JobStatusConfig::default(),
            catalog: CatalogConfig::default(),
            enqueue: EnqueueConfig::default(),
        }
    }
}

/// Queue receive behaviour shared by both stages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub visibility_timeout_seconds: u64,
    /// Deliveries allowed before a message is dead-lettered on its next receive
    pub max_attempts: u32,
    pub ms_to_pause_when_empty: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            visibility_timeout_seconds: defaults::VISIBILITY_TIMEOUT_SECONDS,
            max_attempts: defaults::MAX_ATTEMPTS,
            ms_to_pause_when_empty: defaults::MS_TO_PAUSE_WHEN_EMPTY,
        }
    }
}

impl QueueConfig {
    pub fn visibility_timeout(&self) -> Duration {
        Duration::from_secs(self.visibility_timeout_seconds)
    }

    pub fn empty_delay(&self) -> Duration {
        Duration::from_millis(self.ms_to_pause_when_empty)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    pub inbound_queues: Vec<String>,
    /// Queue the evaluation stage listens on
    pub outbound_queue: Option<String>,
    pub url: Option<String>,
    pub concurrency: usize,
    pub ground_truth_transform_query: Option<String>,
    pub process_metrics_in_response: bool,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            inbound_queues: Vec::new(),
            outbound_queue: None,
            url: None,
            concurrency: defaults::STAGE_CONCURRENCY,
            ground_truth_transform_query: None,
            process_metrics_in_response: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvaluationConfig {
    pub inbound_queues: Vec<String>,
    pub url: Option<String>,
    pub concurrency: usize,
    pub inference_transform_query: Option<String>,
    pub ground_truth_transform_query: Option<String>,
    pub process_metrics_in_response: bool,
}

impl Default for EvaluationConfig {
    fn default() -> Self {
        Self {
            inbound_queues: Vec::new(),
            url: None,
            concurrency: defaults::STAGE_CONCURRENCY,
            inference_transform_query: None,
            ground_truth_transform_query: None,
            process_metrics_in_response: true,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub inference_container: String,
    pub evaluation_container: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            inference_container: "inference-results".to_string(),
            evaluation_container: "evaluation-results".to_string(),
        }
    }
}

/// Stage endpoint calls and status code classification
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub seconds_before_timeout: u64,
    /// Busy: slow the stage down and retry later
    pub backoff_on_status_codes: Vec<u16>,
    /// Fatal: dead-letter immediately
    pub deadletter_on_status_codes: Vec<u16>,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            seconds_before_timeout: defaults::SECONDS_BEFORE_TIMEOUT,
            backoff_on_status_codes: defaults::BUSY_STATUS_CODES.to_vec(),
            deadletter_on_status_codes: Vec::new(),
        }
    }
}

impl HttpConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.seconds_before_timeout)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateConfig {
    /// Floor of the inter-dequeue delay
    pub ms_between_dequeue: u64,
    pub ms_to_add_on_busy: u64,
    /// Decay interval; 0 disables decay
    pub seconds_between_restore_after_busy: u64,
}

impl Default for RateConfig {
    fn default() -> Self {
        Self {
            ms_between_dequeue: defaults::MS_BETWEEN_DEQUEUE,
            ms_to_add_on_busy: defaults::MS_TO_ADD_ON_BUSY,
            seconds_between_restore_after_busy: defaults::SECONDS_BETWEEN_RESTORE_AFTER_BUSY,
        }
    }
}

impl RateConfig {
    pub fn decay_interval(&self) -> Duration {
        Duration::from_secs(self.seconds_between_restore_after_busy)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JobStatusConfig {
    /// Tracking is disabled when unset
    pub container: Option<String>,
    pub idle_timeout_minutes: u64,
}

impl Default for JobStatusConfig {
    fn default() -> Self {
        Self {
            container: None,
            idle_timeout_minutes: defaults::JOB_IDLE_TIMEOUT_MINUTES,
        }
    }
}

impl JobStatusConfig {
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_minutes.saturating_mul(60))
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CatalogConfig {
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnqueueConfig {
    /// Applied to ground-truth files before reading their `ref`
    pub ground_truth_transform_query: Option<String>,
}

impl PipelineConfig {
    pub fn runs(&self, role: PipelineRole) -> bool {
        self.roles.contains(&role)
    }

    /// Validate configuration consistency
    pub fn validate(&self) -> ConfigResult<()> {
        if self.queues.max_attempts == 0 {
            return Err(ConfigurationError::invalid_value(
                "queues.max_attempts",
                "0",
                "max attempts must be greater than 0",
            ));
        }

        if self.queues.visibility_timeout_seconds == 0 {
            return Err(ConfigurationError::invalid_value(
                "queues.visibility_timeout_seconds",
                "0",
                "visibility timeout must be greater than 0",
            ));
        }

        if self.runs(PipelineRole::Inference) {
            Self::validate_stage(
                "inference",
                self.inference.url.as_deref(),
                &self.inference.inbound_queues,
                self.inference.concurrency,
            )?;
            if self
                .inference
                .outbound_queue
                .as_deref()
                .map_or(true, |q| q.trim().is_empty())
            {
                return Err(ConfigurationError::missing_required_field(
                    "inference.outbound_queue",
                    "inference configuration",
                ));
            }
            Self::require_non_empty("storage.inference_container", &self.storage.inference_container)?;
        }

        if self.runs(PipelineRole::Evaluation) {
            Self::validate_stage(
                "evaluation",
                self.evaluation.url.as_deref(),
                &self.evaluation.inbound_queues,
                self.evaluation.concurrency,
            )?;
            Self::require_non_empty("storage.inference_container", &self.storage.inference_container)?;
            Self::require_non_empty("storage.evaluation_container", &self.storage.evaluation_container)?;
        }

        for (field, codes) in [
            ("http.backoff_on_status_codes", &self.http.backoff_on_status_codes),
            ("http.deadletter_on_status_codes", &self.http.deadletter_on_status_codes),
        ] {
            if let Some(code) = codes.iter().find(|c| !(100..=599).contains(*c)) {
                return Err(ConfigurationError::invalid_value(
                    field,
                    code.to_string(),
                    "status codes must be between 100 and 599",
                ));
            }
        }

        if self.http.seconds_before_timeout == 0 {
            return Err(ConfigurationError::invalid_value(
                "http.seconds_before_timeout",
                "0",
                "timeout must be greater than 0",
            ));
        }

        Ok(())
    }

    fn validate_stage(
        stage: &str,
        url: Option<&str>,
        inbound_queues: &[String],
        concurrency: usize,
    ) -> ConfigResult<()> {
        if url.map_or(true, |u| u.trim().is_empty()) {
            return Err(ConfigurationError::missing_required_field(
                format!("{stage}.url"),
                format!("{stage} configuration"),
            ));
        }
        if inbound_queues.iter().all(|q| q.trim().is_empty()) {
            return Err(ConfigurationError::missing_required_field(
                format!("{stage}.inbound_queues"),
                format!("{stage} configuration"),
            ));
        }
        if concurrency == 0 {
            return Err(ConfigurationError::invalid_value(
                format!("{stage}.concurrency"),
                "0",
                "concurrency must be greater than 0",
            ));
        }
        Ok(())
    }

    fn require_non_empty(field: &str, value: &str) -> ConfigResult<()> {
        if value.trim().is_empty() {
            return Err(ConfigurationError::missing_required_field(
                field,
                "storage configuration",
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> PipelineConfig {
        let mut config = PipelineConfig::default();
        config.inference.inbound_queues = vec!["inference".into()];
        config.inference.outbound_queue = Some("evaluation".into());
        config.inference.url = Some("http://localhost:9001/infer".into());
        config.evaluation.inbound_queues = vec!["evaluation".into()];
        config.evaluation.url = Some("http://localhost:9002/evaluate".into());
        config
    }

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.queues.max_attempts, 3);
        assert_eq!(config.http.backoff_on_status_codes, vec![429, 503]);
        assert!(config.http.deadletter_on_status_codes.is_empty());
        assert!(!config.inference.process_metrics_in_response);
        assert!(config.evaluation.process_metrics_in_response);
        assert!(config.job_status.container.is_none());
    }

    #[test]
    fn test_valid_config_passes() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_inference_requires_outbound_queue() {
        let mut config = valid_config();
        config.inference.outbound_queue = None;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("inference.outbound_queue"));
    }

    #[test]
    fn test_disabled_role_is_not_validated() {
        let mut config = valid_config();
        config.roles = vec![PipelineRole::Evaluation];
        config.inference = InferenceConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_rejects_zero_concurrency_and_attempts() {
        let mut config = valid_config();
        config.evaluation.concurrency = 0;
        assert!(config.validate().is_err());

        let mut config = valid_config();
        config.queues.max_attempts = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_rejects_out_of_range_status_codes() {
        let mut config = valid_config();
        config.http.deadletter_on_status_codes = vec![400, 700];
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigurationError::InvalidValue { ref value, .. } if value == "700"));
    }
}
