//! Evaluation stage: scores an inference artifact against its ground truth
//! and records the result in the catalog.

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::response::ResultRecord;
use super::stage::{StageContext, StageHandler};
use crate::config::{EvaluationConfig, StorageConfig};
use crate::error::{PipelineError, PipelineResult};
use crate::messaging::{BlobRef, PipelineRequest, QueueMessage};
use crate::status::JobStage;

const GROUND_TRUTH_NODE: &str = "ground_truth";
const INFERENCE_NODE: &str = "inference";

#[derive(Debug, Clone)]
pub struct EvaluationHandler {
    url: String,
    inference_container: String,
    evaluation_container: String,
    inference_transform_query: Option<String>,
    ground_truth_transform_query: Option<String>,
    process_metrics_in_response: bool,
}

impl EvaluationHandler {
    pub fn new(
        url: impl Into<String>,
        inference_container: impl Into<String>,
        evaluation_container: impl Into<String>,
    ) -> Self {
        Self {
            url: url.into(),
            inference_container: inference_container.into(),
            evaluation_container: evaluation_container.into(),
            inference_transform_query: None,
            ground_truth_transform_query: None,
            process_metrics_in_response: true,
        }
    }

    pub fn from_config(config: &EvaluationConfig, storage: &StorageConfig) -> PipelineResult<Self> {
        let url = config.url.clone().ok_or_else(|| {
            PipelineError::InvalidRequest("evaluation.url is not configured".into())
        })?;
        Ok(Self {
            inference_transform_query: config.inference_transform_query.clone(),
            ground_truth_transform_query: config.ground_truth_transform_query.clone(),
            process_metrics_in_response: config.process_metrics_in_response,
            ..Self::new(
                url,
                storage.inference_container.clone(),
                storage.evaluation_container.clone(),
            )
        })
    }

    pub fn with_response_metrics(mut self, enabled: bool) -> Self {
        self.process_metrics_in_response = enabled;
        self
    }

    pub fn with_inference_query(mut self, query: impl Into<String>) -> Self {
        self.inference_transform_query = Some(query.into());
        self
    }

    /// Inference artifacts that already hold both nodes are sent as-is
    fn is_precomposed(inference: &Value) -> bool {
        inference.get(GROUND_TRUTH_NODE).is_some() && inference.get(INFERENCE_NODE).is_some()
    }

    async fn build_payload(
        &self,
        ctx: &StageContext,
        request: &PipelineRequest,
        inference: Value,
        token: &CancellationToken,
    ) -> PipelineResult<Value> {
        if Self::is_precomposed(&inference) {
            debug!(id = %request.id, "Inference artifact is pre-composed, skipping ground truth");
            return Ok(inference);
        }
        let ground_truth = ctx
            .fetch_and_transform(
                &request.ground_truth_ref()?,
                self.ground_truth_transform_query.as_deref(),
                token,
            )
            .await?;
        Ok(json!({
            GROUND_TRUTH_NODE: ground_truth,
            INFERENCE_NODE: inference,
        }))
    }
}

#[async_trait]
impl StageHandler for EvaluationHandler {
    fn stage(&self) -> JobStage {
        JobStage::Evaluation
    }

    async fn handle(
        &self,
        ctx: &StageContext,
        request: &PipelineRequest,
        message: &QueueMessage,
        token: &CancellationToken,
    ) -> PipelineResult<()> {
        let inference_ref = BlobRef::new(&self.inference_container, request.inference_blob_name());
        let inference = ctx
            .fetch_and_transform(
                &inference_ref,
                self.inference_transform_query.as_deref(),
                token,
            )
            .await?;
        let payload = self.build_payload(ctx, request, inference, token).await?;

        let response = ctx
            .send_for_processing(
                &self.url,
                request,
                request.eval_headers.as_ref(),
                &payload,
                message,
                token,
            )
            .await?;

        let summary = self
            .process_metrics_in_response
            .then(|| ctx.handle_response_headers(self.stage(), request, &response));

        let evaluation_uri = ctx
            .upload(
                &self.evaluation_container,
                &request.evaluation_blob_name(),
                response.body,
                token,
            )
            .await?;

        if let Some(summary) = summary {
            let inference_uri = ctx
                .blobs
                .blob_uri(&inference_ref.container, &inference_ref.name);
            let record = ResultRecord::new(
                request,
                inference_uri,
                Some(evaluation_uri),
                summary.metrics,
            );
            ctx.record_result(request, &record, token).await?;
        }

        info!(run_id = %request.run_id, id = %request.id, "✅ Evaluation complete");
        Ok(())
    }
}
