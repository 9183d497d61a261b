//! # Enqueue Coordinator
//!
//! Resolves every ground-truth blob under the requested sources, creates the
//! job record with the precomputed item count, then sends one message per
//! item and iteration. A source or item that cannot be listed, read or
//! parsed is logged and skipped; the rest of the batch continues.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{BatchRequest, EnqueueResponse, GroundTruthFile};
use crate::error::{PipelineError, PipelineResult};
use crate::messaging::{BlobRef, PipelineRequest, QueueClient};
use crate::status::{JobRecord, JobStatusTracker};
use crate::storage::{BlobStore, StorageError};
use crate::transform::{normalize_and_transform, ContentTransformer};

/// A ground-truth blob with its resolved `ref`
#[derive(Debug, Clone, PartialEq, Eq)]
struct ResolvedItem {
    blob: BlobRef,
    reference: String,
}

pub struct EnqueueCoordinator {
    queue: Arc<dyn QueueClient>,
    blobs: Arc<dyn BlobStore>,
    transformer: Arc<dyn ContentTransformer>,
    tracker: Arc<JobStatusTracker>,
    ground_truth_transform_query: Option<String>,
}

impl std::fmt::Debug for EnqueueCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EnqueueCoordinator")
            .field("tracker", &self.tracker)
            .field("ground_truth_transform_query", &self.ground_truth_transform_query)
            .finish()
    }
}

impl EnqueueCoordinator {
    pub fn new(
        queue: Arc<dyn QueueClient>,
        blobs: Arc<dyn BlobStore>,
        transformer: Arc<dyn ContentTransformer>,
        tracker: Arc<JobStatusTracker>,
        ground_truth_transform_query: Option<String>,
    ) -> Self {
        Self {
            queue,
            blobs,
            transformer,
            tracker,
            ground_truth_transform_query,
        }
    }

    pub async fn enqueue(&self, batch: &BatchRequest) -> PipelineResult<EnqueueResponse> {
        Self::validate(batch)?;
        let run_id = batch.run_id.unwrap_or_else(Uuid::new_v4);

        self.queue.create_queue_if_absent(&batch.queue).await?;

        let items = self.resolve_sources(&batch.containers).await;
        let total_items = items.len() as u64 * u64::from(batch.iterations);

        let job = JobRecord {
            run_id,
            project: batch.project.clone(),
            experiment: batch.experiment.clone(),
            set: batch.set.clone(),
            total_items,
            started_at: Utc::now(),
        };
        if let Err(e) = self.tracker.create_job(&job).await {
            warn!(run_id = %run_id, error = %e, "⚠️ Failed to create job record, enqueueing anyway");
        }

        let mut enqueued = 0u64;
        for item in &items {
            for _ in 0..batch.iterations {
                let request = PipelineRequest {
                    run_id,
                    id: Uuid::new_v4(),
                    ground_truth_uri: item.blob.to_string(),
                    project: batch.project.clone(),
                    experiment: batch.experiment.clone(),
                    reference: item.reference.clone(),
                    set: batch.set.clone(),
                    is_baseline: batch.is_baseline,
                    inf_headers: batch.inf_headers.clone(),
                    eval_headers: batch.eval_headers.clone(),
                };
                match self.send(&batch.queue, &request).await {
                    Ok(()) => enqueued += 1,
                    Err(e) => warn!(
                        run_id = %run_id,
                        id = %request.id,
                        ground_truth = %item.blob,
                        error = %e,
                        "⚠️ Failed to enqueue item, skipping"
                    ),
                }
            }
        }

        info!(
            run_id = %run_id,
            queue = %batch.queue,
            total_items = total_items,
            enqueued = enqueued,
            "📬 Batch enqueued"
        );
        Ok(EnqueueResponse {
            run_id,
            total_items,
            enqueued,
        })
    }

    fn validate(batch: &BatchRequest) -> PipelineResult<()> {
        if batch.iterations == 0 {
            return Err(PipelineError::InvalidRequest(
                "iterations must be at least 1".into(),
            ));
        }
        if batch.containers.iter().all(|c| c.trim().is_empty()) {
            return Err(PipelineError::InvalidRequest(
                "at least one source container is required".into(),
            ));
        }
        if batch.queue.trim().is_empty() {
            return Err(PipelineError::InvalidRequest("queue is required".into()));
        }
        Ok(())
    }

    async fn send(&self, queue: &str, request: &PipelineRequest) -> PipelineResult<()> {
        let body = request.to_body()?;
        self.queue.send_message(queue, &body).await?;
        Ok(())
    }

    async fn resolve_sources(&self, sources: &[String]) -> Vec<ResolvedItem> {
        let mut items = Vec::new();
        for source in sources.iter().map(|s| s.trim()).filter(|s| !s.is_empty()) {
            let (container, prefix) = match source.split_once('/') {
                Some((container, prefix)) => (container, Some(prefix).filter(|p| !p.is_empty())),
                None => (source, None),
            };

            match self.blobs.container_exists(container).await {
                Ok(true) => {}
                Ok(false) => {
                    warn!(container = %container, "⚠️ Source container does not exist, skipping");
                    continue;
                }
                Err(e) => {
                    warn!(container = %container, error = %e, "⚠️ Could not check source container, skipping");
                    continue;
                }
            }

            let listed = match self.blobs.list(container, prefix).await {
                Ok(listed) => listed,
                Err(e) => {
                    warn!(source = %source, error = %e, "⚠️ Could not list source, skipping");
                    continue;
                }
            };

            for blob in listed {
                let blob = BlobRef::new(container, blob.name);
                match self.resolve_reference(&blob).await {
                    Ok(reference) => {
                        debug!(blob = %blob, reference = %reference, "Resolved ground truth");
                        items.push(ResolvedItem { blob, reference });
                    }
                    Err(e) => {
                        warn!(blob = %blob, error = %e, "⚠️ Could not resolve ground truth, skipping");
                    }
                }
            }
        }
        items
    }

    async fn resolve_reference(&self, blob: &BlobRef) -> PipelineResult<String> {
        let content = self.blobs.read(&blob.container, &blob.name).await?;
        let document = normalize_and_transform(
            self.transformer.as_ref(),
            &blob.name,
            &content,
            self.ground_truth_transform_query.as_deref(),
        )?;
        let file: GroundTruthFile = serde_json::from_value(document).map_err(|e| {
            StorageError::invalid_content(
                &blob.container,
                &blob.name,
                format!("no usable ref: {e}"),
            )
        })?;
        Ok(file.reference)
    }
}
