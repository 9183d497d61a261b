//! # System Constants
//!
//! Header names, queue naming conventions, status-log metadata keys and the
//! defaults shared by the configuration layer and the stage processors.

/// Suffix appended to an inbound queue name to form its dead-letter sibling
pub const DEADLETTER_QUEUE_SUFFIX: &str = "-deadletter";

/// Default configuration file names, tried in order
pub const CONFIG_FILE_NAMES: [&str; 2] = ["evaluator-config.yaml", "evaluator-config.yml"];

/// Prefix for environment variable overrides (`EVALUATOR_INFERENCE__URL`)
pub const ENV_PREFIX: &str = "EVALUATOR";

/// HTTP headers exchanged with stage endpoints
pub mod headers {
    pub const RUN_ID: &str = "x-run-id";
    pub const CALL_ID: &str = "x-call-id";
    pub const RETRY_AFTER: &str = "retry-after";
    pub const CONTENT_TYPE: &str = "content-type";

    // Response header prefixes
    pub const METRIC_PREFIX: &str = "x-metric-";
    pub const HISTOGRAM_PREFIX: &str = "x-histogram-";
    pub const TAG_PREFIX: &str = "x-tag-";
}

/// Metadata keys carried on a job status log blob
pub mod metadata {
    pub const TOTAL_ITEMS: &str = "total_items";
    pub const PROJECT: &str = "project";
    pub const EXPERIMENT: &str = "experiment";
    pub const SET: &str = "set";
    pub const STARTED_AT: &str = "started_at";
    pub const COMPLETED_AT: &str = "completed_at";
    pub const COMPLETION_REASON: &str = "completion_reason";
    pub const INFERENCE_SUCCEEDED: &str = "inference_succeeded";
    pub const INFERENCE_FAILED: &str = "inference_failed";
    pub const EVALUATION_SUCCEEDED: &str = "evaluation_succeeded";
    pub const EVALUATION_FAILED: &str = "evaluation_failed";
}

/// Default values for optional configuration
pub mod defaults {
    pub const VISIBILITY_TIMEOUT_SECONDS: u64 = 300;
    pub const MAX_ATTEMPTS: u32 = 3;
    pub const MS_TO_PAUSE_WHEN_EMPTY: u64 = 500;
    pub const STAGE_CONCURRENCY: usize = 4;
    pub const SECONDS_BEFORE_TIMEOUT: u64 = 300;
    pub const BUSY_STATUS_CODES: [u16; 2] = [429, 503];
    pub const MS_BETWEEN_DEQUEUE: u64 = 0;
    pub const MS_TO_ADD_ON_BUSY: u64 = 1000;
    pub const SECONDS_BETWEEN_RESTORE_AFTER_BUSY: u64 = 60;
    pub const JOB_IDLE_TIMEOUT_MINUTES: u64 = 60;
    pub const ENQUEUE_ITERATIONS: u32 = 1;

    /// Largest configuration file the loader will read
    pub const MAX_CONFIG_FILE_BYTES: u64 = 1024 * 1024;
}

/// Name of the dead-letter queue that backs `queue`
pub fn deadletter_queue_name(queue: &str) -> String {
    format!("{queue}{DEADLETTER_QUEUE_SUFFIX}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deadletter_queue_name() {
        assert_eq!(deadletter_queue_name("inference"), "inference-deadletter");
    }
}
