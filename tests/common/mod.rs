//! Shared fixtures for pipeline integration tests.

#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use evaluator_pipeline::config::PipelineConfig;
use evaluator_pipeline::error::PipelineResult;
use evaluator_pipeline::messaging::{InMemoryQueueClient, PipelineRequest, QueueClient};
use evaluator_pipeline::pipeline::{
    EndpointRequest, EndpointResponse, EvaluationHandler, InferenceHandler, MessageDisposition,
    StageContext, StageEndpoint, StageHandler, StageProcessor, StageSettings, StatusPolicy,
};
use evaluator_pipeline::resilience::RateController;
use evaluator_pipeline::status::JobStatusTracker;
use evaluator_pipeline::storage::{BlobStore, InMemoryBlobStore};
use evaluator_pipeline::transform::JsonPointerTransformer;

pub const INFERENCE_URL: &str = "http://inference.test/infer";
pub const EVALUATION_URL: &str = "http://evaluation.test/evaluate";
pub const CATALOG_URL: &str = "http://catalog.test";
pub const INFERENCE_QUEUE: &str = "inference";
pub const EVALUATION_QUEUE: &str = "evaluation";
pub const GROUND_TRUTH_CONTAINER: &str = "ground-truth";
pub const INFERENCE_CONTAINER: &str = "inference-results";
pub const EVALUATION_CONTAINER: &str = "evaluation-results";
pub const STATUS_CONTAINER: &str = "job-status";

/// Fake stage endpoint: replies from a per-URL script, then a per-URL
/// default, then `200 {"ok":true}`. Every request is recorded.
#[derive(Debug, Default)]
pub struct ScriptedEndpoint {
    scripts: Mutex<HashMap<String, VecDeque<EndpointResponse>>>,
    defaults: Mutex<HashMap<String, EndpointResponse>>,
    requests: Mutex<Vec<EndpointRequest>>,
}

impl ScriptedEndpoint {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue responses returned in order for `url`
    pub fn script(&self, url: &str, responses: impl IntoIterator<Item = EndpointResponse>) {
        self.scripts
            .lock()
            .entry(url.to_string())
            .or_default()
            .extend(responses);
    }

    pub fn set_default(&self, url: &str, response: EndpointResponse) {
        self.defaults.lock().insert(url.to_string(), response);
    }

    pub fn requests_to(&self, url: &str) -> Vec<EndpointRequest> {
        self.requests
            .lock()
            .iter()
            .filter(|request| request.url == url)
            .cloned()
            .collect()
    }

    pub fn call_count(&self, url: &str) -> usize {
        self.requests_to(url).len()
    }
}

#[async_trait]
impl StageEndpoint for ScriptedEndpoint {
    async fn post(&self, request: EndpointRequest) -> PipelineResult<EndpointResponse> {
        let url = request.url.clone();
        self.requests.lock().push(request);

        if let Some(response) = self.scripts.lock().get_mut(&url).and_then(VecDeque::pop_front) {
            return Ok(response);
        }
        Ok(self
            .defaults
            .lock()
            .get(&url)
            .cloned()
            .unwrap_or_else(|| EndpointResponse::new(200, r#"{"ok":true}"#)))
    }
}

/// In-memory collaborators wired the way the bootstrap wires them
pub struct Harness {
    pub queue: Arc<InMemoryQueueClient>,
    pub blobs: Arc<InMemoryBlobStore>,
    pub endpoint: Arc<ScriptedEndpoint>,
    pub rate: Arc<RateController>,
    pub tracker: Arc<JobStatusTracker>,
    pub context: Arc<StageContext>,
    pub settings: StageSettings,
    pub token: CancellationToken,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_policy(StatusPolicy::new([429, 503], [400, 422]))
    }

    pub fn with_policy(policy: StatusPolicy) -> Self {
        let queue = Arc::new(InMemoryQueueClient::new());
        let blobs = Arc::new(InMemoryBlobStore::new());
        for container in [
            GROUND_TRUTH_CONTAINER,
            INFERENCE_CONTAINER,
            EVALUATION_CONTAINER,
            STATUS_CONTAINER,
        ] {
            blobs.create_container(container);
        }
        let endpoint = Arc::new(ScriptedEndpoint::new());
        let rate = Arc::new(RateController::new(0, 1000));
        let tracker = Arc::new(JobStatusTracker::new(
            Arc::clone(&blobs) as Arc<dyn BlobStore>,
            Some(STATUS_CONTAINER.to_string()),
            Duration::from_secs(3600),
        ));
        let context = Arc::new(StageContext {
            queue: Arc::clone(&queue) as Arc<dyn QueueClient>,
            blobs: Arc::clone(&blobs) as Arc<dyn BlobStore>,
            endpoint: Arc::clone(&endpoint) as Arc<dyn StageEndpoint>,
            transformer: Arc::new(JsonPointerTransformer),
            rate: Arc::clone(&rate),
            tracker: Arc::clone(&tracker),
            policy,
            catalog_base_url: Some(CATALOG_URL.to_string()),
        });

        Self {
            queue,
            blobs,
            endpoint,
            rate,
            tracker,
            context,
            // Zero visibility timeout: abandoned messages are visible again at once
            settings: StageSettings {
                visibility_timeout: Duration::ZERO,
                max_attempts: 3,
                empty_delay: Duration::from_millis(10),
            },
            token: CancellationToken::new(),
        }
    }

    pub fn inference_handler(&self) -> InferenceHandler {
        InferenceHandler::new(INFERENCE_URL, EVALUATION_QUEUE, INFERENCE_CONTAINER)
    }

    pub fn evaluation_handler(&self) -> EvaluationHandler {
        EvaluationHandler::new(EVALUATION_URL, INFERENCE_CONTAINER, EVALUATION_CONTAINER)
    }

    pub async fn processor(
        &self,
        handler: impl StageHandler,
        inbound_queue: &str,
    ) -> Arc<StageProcessor> {
        let processor = Arc::new(StageProcessor::new(
            Arc::new(handler),
            Arc::clone(&self.context),
            vec![inbound_queue.to_string()],
            self.settings,
            2,
        ));
        processor
            .initialize_queues()
            .await
            .expect("queues should initialize");
        processor
    }

    pub async fn inference_processor(&self) -> Arc<StageProcessor> {
        self.processor(self.inference_handler(), INFERENCE_QUEUE).await
    }

    pub async fn evaluation_processor(&self) -> Arc<StageProcessor> {
        self.processor(self.evaluation_handler(), EVALUATION_QUEUE).await
    }

    /// Receive one message from `queue` and process it inline
    pub async fn process_next(
        &self,
        processor: &StageProcessor,
        queue: &str,
    ) -> Option<MessageDisposition> {
        let message = self
            .queue
            .receive_message(queue, self.settings.visibility_timeout)
            .await
            .expect("receive should succeed")?;
        Some(processor.process_message(queue, message, &self.token).await)
    }

    /// Process every visible message until the queue yields nothing
    pub async fn drain_queue(&self, processor: &StageProcessor, queue: &str) -> Vec<MessageDisposition> {
        let mut dispositions = Vec::new();
        while let Some(disposition) = self.process_next(processor, queue).await {
            dispositions.push(disposition);
            assert!(dispositions.len() < 1000, "queue never drained");
        }
        dispositions
    }

    pub fn seed_ground_truth(&self, name: &str, reference: &str) {
        self.blobs.put(
            GROUND_TRUTH_CONTAINER,
            name,
            serde_json::json!({ "ref": reference, "question": "q", "answer": "a" }).to_string(),
        );
    }

    /// Put a request for `ground_truth_name` on the inference queue
    pub async fn send_request(&self, ground_truth_name: &str, reference: &str) -> PipelineRequest {
        let request = request_for(ground_truth_name, reference);
        self.queue
            .send_message(INFERENCE_QUEUE, &request.to_body().expect("request encodes"))
            .await
            .expect("send should succeed");
        request
    }
}

pub fn request_for(ground_truth_name: &str, reference: &str) -> PipelineRequest {
    PipelineRequest {
        run_id: Uuid::new_v4(),
        id: Uuid::new_v4(),
        ground_truth_uri: format!("{GROUND_TRUTH_CONTAINER}/{ground_truth_name}"),
        project: "proj".to_string(),
        experiment: "exp".to_string(),
        reference: reference.to_string(),
        set: "validation".to_string(),
        is_baseline: false,
        inf_headers: None,
        eval_headers: None,
    }
}

/// Configuration matching the harness names, for bootstrap-level tests
pub fn pipeline_config() -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.queues.visibility_timeout_seconds = 30;
    config.queues.ms_to_pause_when_empty = 10;
    config.inference.url = Some(INFERENCE_URL.to_string());
    config.inference.inbound_queues = vec![INFERENCE_QUEUE.to_string()];
    config.inference.outbound_queue = Some(EVALUATION_QUEUE.to_string());
    config.evaluation.url = Some(EVALUATION_URL.to_string());
    config.evaluation.inbound_queues = vec![EVALUATION_QUEUE.to_string()];
    config.job_status.container = Some(STATUS_CONTAINER.to_string());
    config.catalog.base_url = Some(CATALOG_URL.to_string());
    config
}
