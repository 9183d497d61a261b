//! Inference stage: ground truth in, model output out, item forwarded to
//! the evaluation queue.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::response::ResultRecord;
use super::stage::{StageContext, StageHandler};
use crate::config::{InferenceConfig, StorageConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::execution::cancellable;
use crate::messaging::{PipelineRequest, QueueMessage};
use crate::status::JobStage;

#[derive(Debug, Clone)]
pub struct InferenceHandler {
    url: String,
    outbound_queue: String,
    inference_container: String,
    ground_truth_transform_query: Option<String>,
    process_metrics_in_response: bool,
}

impl InferenceHandler {
    pub fn new(
        url: impl Into<String>,
        outbound_queue: impl Into<String>,
        inference_container: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            outbound_queue: outbound_queue.into(),
            inference_container: inference_container.into(),
            ground_truth_transform_query: None,
            process_metrics_in_response: false,
        }
    }

    pub fn from_config(config: &InferenceConfig, storage: &StorageConfig) -> PipelineResult<Self> {
        let url = config
            .url
            .clone()
            .ok_or_else(|| PipelineError::InvalidRequest("inference.url is not configured".into()))?;
        let outbound_queue = config.outbound_queue.clone().ok_or_else(|| {
            PipelineError::InvalidRequest("inference.outbound_queue is not configured".into())
        })?;
        Ok(Self {
            ground_truth_transform_query: config.ground_truth_transform_query.clone(),
            process_metrics_in_response: config.process_metrics_in_response,
            ..Self::new(url, outbound_queue, storage.inference_container.clone())
        })
    }

    pub fn with_ground_truth_query(mut self, query: impl Into<String>) -> Self {
        self.ground_truth_transform_query = Some(query.into());
        self
    }

    pub fn with_response_metrics(mut self, enabled: bool) -> Self {
        self.process_metrics_in_response = enabled;
        self
    }
}

#[async_trait]
impl StageHandler for InferenceHandler {
    fn stage(&self) -> JobStage {
        JobStage::Inference
    }

    fn outbound_queues(&self) -> Vec<String> {
        vec![self.outbound_queue.clone()]
    }

    async fn handle(
        &self,
        ctx: &StageContext,
        request: &PipelineRequest,
        message: &QueueMessage,
        token: &CancellationToken,
    ) -> PipelineResult<()> {
        let ground_truth = request.ground_truth_ref()?;
        let payload = ctx
            .fetch_and_transform(
                &ground_truth,
                self.ground_truth_transform_query.as_deref(),
                token,
            )
            .await?;

        let response = ctx
            .send_for_processing(
                &self.url,
                request,
                request.inf_headers.as_ref(),
                &payload,
                message,
                token,
            )
            .await?;

        let summary = self
            .process_metrics_in_response
            .then(|| ctx.handle_response_headers(self.stage(), request, &response));

        let artifact_uri = ctx
            .upload(
                &self.inference_container,
                &request.inference_blob_name(),
                response.body,
                token,
            )
            .await?;
        debug!(uri = %artifact_uri, "💾 Inference artifact stored");

        if let Some(summary) = summary {
            let record = ResultRecord::new(request, artifact_uri, None, summary.metrics);
            ctx.record_result(request, &record, token).await?;
        }

        // Forward the body untouched so run_id and id stay exact downstream
        cancellable(token, "forward to evaluation", async {
            ctx.queue
                .send_message(&self.outbound_queue, &message.body)
                .await
                .map_err(PipelineError::from)
        })
        .await?;

        info!(
            run_id = %request.run_id,
            id = %request.id,
            outbound_queue = %self.outbound_queue,
            "✅ Inference complete, forwarded for evaluation"
        );
        Ok(())
    }
}
