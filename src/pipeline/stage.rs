//! # Stage Processor
//!
//! Shared receive/dispatch/dispose loop for both pipeline stages. The
//! stage-specific work lives behind [`StageHandler`]; everything around it
//! (attempt counting, dead-lettering, message deletion, status records and
//! backpressure) is handled here.
//!
//! Per message:
//!
//! ```text
//! receive ─► dequeue_count > max_attempts? ──yes──► dead-letter
//!               │ no
//!               ▼
//!            decode ──fail──► abandon (redelivered after visibility timeout)
//!               │
//!               ▼
//!         handler.handle ──Deadletter──► dead-letter
//!               │        ──other error─► abandon
//!               ▼ ok
//!            delete + record Success
//! ```
//!
//! Dead-lettering sends the undecoded body to `{queue}-deadletter`, deletes
//! the original and records a `Failed` outcome when the body is decodable.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};
use uuid::Uuid;

use super::endpoint::{EndpointRequest, EndpointResponse, StageEndpoint};
use super::response::{
    catalog_results_url, retry_after_ms, ResponseHeaderSummary, ResultRecord, StatusClass,
    StatusPolicy,
};
use crate::constants::{deadletter_queue_name, headers};
use crate::error::{PipelineError, PipelineResult};
use crate::execution::{cancellable, sleep_cancellable, BoundedTaskRunner};
use crate::logging::{log_error, log_stage_operation};
use crate::messaging::{BlobRef, PipelineRequest, QueueClient, QueueMessage};
use crate::resilience::RateController;
use crate::status::{JobOutcome, JobStage, JobStatusTracker};
use crate::storage::BlobStore;
use crate::transform::{normalize_and_transform, ContentTransformer};

/// Collaborators shared by the stage handlers
pub struct StageContext {
    pub queue: Arc<dyn QueueClient>,
    pub blobs: Arc<dyn BlobStore>,
    pub endpoint: Arc<dyn StageEndpoint>,
    pub transformer: Arc<dyn ContentTransformer>,
    pub rate: Arc<RateController>,
    pub tracker: Arc<JobStatusTracker>,
    pub policy: StatusPolicy,
    pub catalog_base_url: Option<String>,
}

impl std::fmt::Debug for StageContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageContext")
            .field("policy", &self.policy)
            .field("catalog_base_url", &self.catalog_base_url)
            .finish()
    }
}

impl StageContext {
    /// Download a blob, normalise it to JSON and apply `query`
    pub async fn fetch_and_transform(
        &self,
        blob: &BlobRef,
        query: Option<&str>,
        token: &CancellationToken,
    ) -> PipelineResult<Value> {
        let content = cancellable(token, "blob download", async {
            self.blobs
                .read(&blob.container, &blob.name)
                .await
                .map_err(PipelineError::from)
        })
        .await?;
        Ok(normalize_and_transform(
            self.transformer.as_ref(),
            &blob.name,
            &content,
            query,
        )?)
    }

    /// POST `payload` to a stage endpoint and classify the response.
    ///
    /// Busy statuses raise the shared delay and fail transiently; fatal
    /// statuses fail with `Deadletter` carrying `message`.
    pub async fn send_for_processing(
        &self,
        url: &str,
        request: &PipelineRequest,
        custom_headers: Option<&HashMap<String, String>>,
        payload: &Value,
        message: &QueueMessage,
        token: &CancellationToken,
    ) -> PipelineResult<EndpointResponse> {
        let call_id = Uuid::new_v4().to_string();
        let mut call_headers = vec![
            (headers::CONTENT_TYPE.to_string(), "application/json".to_string()),
            (headers::RUN_ID.to_string(), request.run_id.to_string()),
            (headers::CALL_ID.to_string(), call_id.clone()),
        ];
        if let Some(custom) = custom_headers {
            call_headers.extend(custom.iter().map(|(k, v)| (k.clone(), v.clone())));
        }

        let call = EndpointRequest {
            url: url.to_string(),
            headers: call_headers,
            body: serde_json::to_vec(payload)?,
        };
        debug!(url = %url, call_id = %call_id, "🚀 Calling stage endpoint");
        let response = cancellable(token, "stage endpoint call", self.endpoint.post(call)).await?;
        let status = response.status;

        match self.policy.classify(status) {
            StatusClass::Success if response.body.iter().all(u8::is_ascii_whitespace) => {
                Err(PipelineError::EmptyResponse { status, call_id })
            }
            StatusClass::Success => Ok(response),
            StatusClass::Fatal => {
                warn!(status = status, call_id = %call_id, "☠️ Endpoint returned a dead-letter status");
                Err(PipelineError::deadletter(
                    format!("endpoint {url} returned status {status}"),
                    message,
                ))
            }
            StatusClass::Busy => {
                self.rate.report_busy(retry_after_ms(&response));
                Err(PipelineError::HttpStatus {
                    status,
                    call_id,
                    body: response.body_text(),
                })
            }
            StatusClass::Transient => Err(PipelineError::HttpStatus {
                status,
                call_id,
                body: response.body_text(),
            }),
        }
    }

    /// Write an artifact, returning its URI
    pub async fn upload(
        &self,
        container: &str,
        name: &str,
        content: Vec<u8>,
        token: &CancellationToken,
    ) -> PipelineResult<String> {
        cancellable(token, "blob upload", async {
            self.blobs
                .write(container, name, content)
                .await
                .map_err(PipelineError::from)
        })
        .await
    }

    /// Parse response headers and emit their metrics
    pub fn handle_response_headers(
        &self,
        stage: JobStage,
        request: &PipelineRequest,
        response: &EndpointResponse,
    ) -> ResponseHeaderSummary {
        let summary = ResponseHeaderSummary::from_headers(&response.headers);
        summary.emit(stage.as_str(), request);
        summary
    }

    /// POST a result to the catalog. Skipped without metrics or without a
    /// configured catalog; a non-success status is a transient error.
    pub async fn record_result(
        &self,
        request: &PipelineRequest,
        record: &ResultRecord,
        token: &CancellationToken,
    ) -> PipelineResult<()> {
        if record.metrics.is_empty() {
            debug!(id = %request.id, "No metrics in response, nothing to record");
            return Ok(());
        }
        let Some(base_url) = self.catalog_base_url.as_deref() else {
            warn!(id = %request.id, "⚠️ Metrics returned but no catalog configured, result not recorded");
            return Ok(());
        };

        let url = catalog_results_url(base_url, &request.project, &request.experiment);
        let call = EndpointRequest {
            url: url.clone(),
            headers: vec![(headers::CONTENT_TYPE.to_string(), "application/json".to_string())],
            body: serde_json::to_vec(record)?,
        };
        let response = cancellable(token, "catalog call", self.endpoint.post(call)).await?;
        if !response.is_success() {
            return Err(PipelineError::Catalog {
                status: response.status,
                body: response.body_text(),
            });
        }
        debug!(url = %url, id = %request.id, "📝 Result recorded in catalog");
        Ok(())
    }
}

/// Stage-specific processing of one decoded request
#[async_trait]
pub trait StageHandler: Send + Sync + 'static {
    fn stage(&self) -> JobStage;

    /// Queues this stage writes to, created on startup
    fn outbound_queues(&self) -> Vec<String> {
        Vec::new()
    }

    async fn handle(
        &self,
        ctx: &StageContext,
        request: &PipelineRequest,
        message: &QueueMessage,
        token: &CancellationToken,
    ) -> PipelineResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StageSettings {
    pub visibility_timeout: Duration,
    pub max_attempts: u32,
    pub empty_delay: Duration,
}

/// What happened to a received message
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageDisposition {
    Completed,
    Deadlettered,
    /// Left on the queue for redelivery
    Abandoned,
}

pub struct StageProcessor {
    handler: Arc<dyn StageHandler>,
    context: Arc<StageContext>,
    inbound_queues: Vec<String>,
    settings: StageSettings,
    runner: BoundedTaskRunner,
}

impl std::fmt::Debug for StageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StageProcessor")
            .field("stage", &self.handler.stage())
            .field("inbound_queues", &self.inbound_queues)
            .field("settings", &self.settings)
            .field("runner", &self.runner)
            .finish()
    }
}

impl StageProcessor {
    pub fn new(
        handler: Arc<dyn StageHandler>,
        context: Arc<StageContext>,
        inbound_queues: Vec<String>,
        settings: StageSettings,
        concurrency: usize,
    ) -> Self {
        let runner = BoundedTaskRunner::new(handler.stage().as_str(), concurrency);
        Self {
            handler,
            context,
            inbound_queues,
            settings,
            runner,
        }
    }

    pub fn stage(&self) -> JobStage {
        self.handler.stage()
    }

    pub fn inbound_queues(&self) -> &[String] {
        &self.inbound_queues
    }

    pub fn runner(&self) -> &BoundedTaskRunner {
        &self.runner
    }

    /// Create inbound queues, their dead-letter siblings and outbound queues
    pub async fn initialize_queues(&self) -> PipelineResult<()> {
        let queues = self
            .inbound_queues
            .iter()
            .flat_map(|q| [q.clone(), deadletter_queue_name(q)])
            .chain(self.handler.outbound_queues());
        for queue in queues {
            self.context.queue.create_queue_if_absent(&queue).await?;
            debug!(stage = %self.stage(), queue = %queue, "Queue ready");
        }
        Ok(())
    }

    /// Approximate depth of every inbound and dead-letter queue
    pub async fn queue_depths(&self) -> PipelineResult<BTreeMap<String, u64>> {
        let mut depths = BTreeMap::new();
        for inbound in &self.inbound_queues {
            for queue in [inbound.clone(), deadletter_queue_name(inbound)] {
                let count = self.context.queue.approximate_message_count(&queue).await?;
                depths.insert(queue, count);
            }
        }
        Ok(depths)
    }

    /// Poll until cancelled. In-flight work is left running; call
    /// [`StageProcessor::drain`] to wait for it.
    pub async fn run(self: Arc<Self>, token: CancellationToken) {
        info!(
            stage = %self.stage(),
            queues = ?self.inbound_queues,
            concurrency = self.runner.concurrency(),
            "▶️ Stage processor started"
        );

        while !token.is_cancelled() {
            let found = self.poll_once(&token).await;
            if found == 0 && !sleep_cancellable(self.settings.empty_delay, &token).await {
                break;
            }
        }

        info!(stage = %self.stage(), in_flight = self.runner.in_flight(), "⏹️ Stage processor stopped");
    }

    /// One pass over the inbound queues. Returns how many messages were
    /// received and dispatched.
    pub async fn poll_once(self: &Arc<Self>, token: &CancellationToken) -> usize {
        let mut found = 0;

        for queue in &self.inbound_queues {
            let Ok(slot) = self.runner.acquire(token).await else {
                break;
            };
            if !self.context.rate.wait_before_dequeue(token).await {
                break;
            }

            let received = cancellable(token, "queue receive", async {
                self.context
                    .queue
                    .receive_message(queue, self.settings.visibility_timeout)
                    .await
                    .map_err(PipelineError::from)
            })
            .await;

            match received {
                Ok(Some(message)) => {
                    found += 1;
                    let processor = Arc::clone(self);
                    let queue_name = queue.clone();
                    let task_token = token.clone();
                    let stage = self.stage();
                    self.runner.spawn_in(
                        slot,
                        async move {
                            Ok(processor
                                .process_message(&queue_name, message, &task_token)
                                .await)
                        },
                        move |disposition| {
                            debug!(stage = %stage, disposition = ?disposition, "Message handled");
                        },
                        move |e| {
                            log_error(
                                "stage_processor",
                                "process_message",
                                &e.to_string(),
                                Some(stage.as_str()),
                            );
                        },
                    );
                }
                Ok(None) => {}
                Err(e) if e.is_cancelled() => break,
                Err(e) => {
                    warn!(stage = %self.stage(), queue = %queue, error = %e, "⚠️ Receive failed");
                }
            }
        }

        found
    }

    /// Process one received message to a final disposition
    pub async fn process_message(
        &self,
        queue: &str,
        message: QueueMessage,
        token: &CancellationToken,
    ) -> MessageDisposition {
        let span = info_span!(
            "stage_message",
            stage = %self.stage(),
            queue = %queue,
            message_id = %message.id,
            dequeue_count = message.dequeue_count,
        );
        self.process_message_inner(queue, message, token)
            .instrument(span)
            .await
    }

    async fn process_message_inner(
        &self,
        queue: &str,
        message: QueueMessage,
        token: &CancellationToken,
    ) -> MessageDisposition {
        if message.dequeue_count > self.settings.max_attempts {
            let reason = format!(
                "dequeued {} times, exceeding max attempts of {}",
                message.dequeue_count, self.settings.max_attempts
            );
            return self.deadletter(queue, &message, &reason).await;
        }

        let request = match PipelineRequest::from_body(&message.body) {
            Ok(request) => request,
            Err(e) => {
                error!(error = %e, "❌ Could not decode message body, leaving for redelivery");
                return MessageDisposition::Abandoned;
            }
        };

        match self
            .handler
            .handle(&self.context, &request, &message, token)
            .await
        {
            Ok(()) => {
                if let Err(e) = self.context.queue.delete_message(queue, &message).await {
                    warn!(error = %e, "⚠️ Processed message could not be deleted and may be redelivered");
                }
                self.context
                    .tracker
                    .record_outcome(request.run_id, request.id, self.stage(), JobOutcome::Success, None)
                    .await;
                log_stage_operation(
                    "process",
                    self.stage().as_str(),
                    Some(&request.run_id.to_string()),
                    Some(&request.id.to_string()),
                    "completed",
                    None,
                );
                MessageDisposition::Completed
            }
            Err(PipelineError::Deadletter {
                reason,
                message: original,
                ..
            }) => self.deadletter(queue, &original, &reason).await,
            Err(e) if e.is_cancelled() => {
                info!(id = %request.id, "🛑 Processing cancelled, message left for redelivery");
                MessageDisposition::Abandoned
            }
            Err(e) => {
                warn!(
                    run_id = %request.run_id,
                    id = %request.id,
                    error = %e,
                    "⚠️ Processing failed, message left for redelivery"
                );
                MessageDisposition::Abandoned
            }
        }
    }

    async fn deadletter(
        &self,
        queue: &str,
        message: &QueueMessage,
        reason: &str,
    ) -> MessageDisposition {
        let deadletter_queue = deadletter_queue_name(queue);

        if let Err(e) = self
            .context
            .queue
            .send_message(&deadletter_queue, &message.body)
            .await
        {
            error!(
                deadletter_queue = %deadletter_queue,
                error = %e,
                "❌ Failed to dead-letter message, leaving it for redelivery"
            );
            return MessageDisposition::Abandoned;
        }
        if let Err(e) = self.context.queue.delete_message(queue, message).await {
            warn!(error = %e, "⚠️ Dead-lettered message could not be deleted from its source queue");
        }

        warn!(
            deadletter_queue = %deadletter_queue,
            reason = %reason,
            "☠️ Message dead-lettered"
        );

        if let Ok(request) = PipelineRequest::from_body(&message.body) {
            self.context
                .tracker
                .record_outcome(
                    request.run_id,
                    request.id,
                    self.stage(),
                    JobOutcome::Failed,
                    Some(reason.to_string()),
                )
                .await;
        }
        MessageDisposition::Deadlettered
    }

    /// Wait for in-flight messages to finish
    pub async fn drain(&self) {
        self.runner.drain().await;
    }
}
