//! # Pipeline Bootstrap
//!
//! Wires the configured roles into running stage processors:
//!
//! - one shared [`RateController`] per process plus its decay loop
//! - one [`StageProcessor`] per enabled role, queues created before polling
//! - an [`EnqueueCoordinator`] and [`JobStatusTracker`] for the caller's API
//!
//! [`PipelineHandle::shutdown`] cancels every loop, waits for them to stop
//! and then drains in-flight messages.

use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::{PipelineConfig, PipelineRole};
use crate::enqueue::EnqueueCoordinator;
use crate::error::PipelineResult;
use crate::messaging::QueueClient;
use crate::pipeline::{
    EvaluationHandler, HttpStageEndpoint, InferenceHandler, StageContext, StageEndpoint,
    StageHandler, StageProcessor, StageSettings, StatusPolicy,
};
use crate::resilience::RateController;
use crate::status::JobStatusTracker;
use crate::storage::BlobStore;
use crate::transform::{ContentTransformer, JsonPointerTransformer};

/// External collaborators the pipeline runs against
#[derive(Clone)]
pub struct PipelineComponents {
    pub queue: Arc<dyn QueueClient>,
    pub blobs: Arc<dyn BlobStore>,
    pub endpoint: Arc<dyn StageEndpoint>,
    pub transformer: Arc<dyn ContentTransformer>,
}

impl PipelineComponents {
    /// Use the reqwest endpoint with the configured per-call timeout
    pub fn with_http_endpoint(
        queue: Arc<dyn QueueClient>,
        blobs: Arc<dyn BlobStore>,
        config: &PipelineConfig,
    ) -> PipelineResult<Self> {
        let endpoint = HttpStageEndpoint::new(config.http.timeout())?;
        Ok(Self {
            queue,
            blobs,
            endpoint: Arc::new(endpoint),
            transformer: Arc::new(JsonPointerTransformer),
        })
    }
}

impl std::fmt::Debug for PipelineComponents {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineComponents").finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct PipelineBootstrap;

impl PipelineBootstrap {
    /// Start every role in `config.roles`. Fails before spawning anything if
    /// a role cannot be built or its queues cannot be created.
    pub async fn start(
        config: &PipelineConfig,
        components: PipelineComponents,
    ) -> PipelineResult<PipelineHandle> {
        info!(roles = ?config.roles, "🚀 Starting evaluation pipeline");

        let token = CancellationToken::new();
        let rate = Arc::new(RateController::new(
            config.rate.ms_between_dequeue,
            config.rate.ms_to_add_on_busy,
        ));
        let tracker = Arc::new(JobStatusTracker::new(
            Arc::clone(&components.blobs),
            config.job_status.container.clone(),
            config.job_status.idle_timeout(),
        ));
        let coordinator = Arc::new(EnqueueCoordinator::new(
            Arc::clone(&components.queue),
            Arc::clone(&components.blobs),
            Arc::clone(&components.transformer),
            Arc::clone(&tracker),
            config.enqueue.ground_truth_transform_query.clone(),
        ));

        let context = Arc::new(StageContext {
            queue: Arc::clone(&components.queue),
            blobs: Arc::clone(&components.blobs),
            endpoint: Arc::clone(&components.endpoint),
            transformer: Arc::clone(&components.transformer),
            rate: Arc::clone(&rate),
            tracker: Arc::clone(&tracker),
            policy: StatusPolicy::from_config(&config.http),
            catalog_base_url: config.catalog.base_url.clone(),
        });
        let settings = StageSettings {
            visibility_timeout: config.queues.visibility_timeout(),
            max_attempts: config.queues.max_attempts,
            empty_delay: config.queues.empty_delay(),
        };

        let mut processors = Vec::new();
        for role in [PipelineRole::Inference, PipelineRole::Evaluation] {
            if !config.runs(role) {
                continue;
            }
            let processor = Arc::new(Self::build_processor(
                role,
                config,
                Arc::clone(&context),
                settings,
            )?);
            processor.initialize_queues().await?;
            processors.push(processor);
        }

        let mut tasks = Vec::with_capacity(processors.len() + 1);
        tasks.push(tokio::spawn(RateController::run_decay_loop(
            Arc::clone(&rate),
            config.rate.decay_interval(),
            token.clone(),
        )));
        for processor in &processors {
            tasks.push(tokio::spawn(Arc::clone(processor).run(token.clone())));
        }

        info!(processors = processors.len(), "✅ Evaluation pipeline started");
        Ok(PipelineHandle {
            token,
            rate,
            tracker,
            coordinator,
            processors,
            tasks,
        })
    }

    fn build_processor(
        role: PipelineRole,
        config: &PipelineConfig,
        context: Arc<StageContext>,
        settings: StageSettings,
    ) -> PipelineResult<StageProcessor> {
        let (handler, inbound, concurrency) = match role {
            PipelineRole::Inference => {
                let handler = InferenceHandler::from_config(&config.inference, &config.storage)?;
                (
                    Arc::new(handler) as Arc<dyn StageHandler>,
                    config.inference.inbound_queues.clone(),
                    config.inference.concurrency,
                )
            }
            PipelineRole::Evaluation => {
                let handler = EvaluationHandler::from_config(&config.evaluation, &config.storage)?;
                (
                    Arc::new(handler) as Arc<dyn StageHandler>,
                    config.evaluation.inbound_queues.clone(),
                    config.evaluation.concurrency,
                )
            }
        };
        Ok(StageProcessor::new(handler, context, inbound, settings, concurrency))
    }
}

/// A running pipeline
pub struct PipelineHandle {
    token: CancellationToken,
    rate: Arc<RateController>,
    tracker: Arc<JobStatusTracker>,
    coordinator: Arc<EnqueueCoordinator>,
    processors: Vec<Arc<StageProcessor>>,
    tasks: Vec<JoinHandle<()>>,
}

impl std::fmt::Debug for PipelineHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineHandle")
            .field("cancelled", &self.token.is_cancelled())
            .field("processors", &self.processors)
            .finish()
    }
}

impl PipelineHandle {
    pub fn cancellation_token(&self) -> CancellationToken {
        self.token.clone()
    }

    pub fn rate_controller(&self) -> &Arc<RateController> {
        &self.rate
    }

    pub fn tracker(&self) -> &Arc<JobStatusTracker> {
        &self.tracker
    }

    pub fn coordinator(&self) -> &Arc<EnqueueCoordinator> {
        &self.coordinator
    }

    pub fn processors(&self) -> &[Arc<StageProcessor>] {
        &self.processors
    }

    pub fn is_running(&self) -> bool {
        !self.token.is_cancelled()
    }

    /// Depths of every inbound and dead-letter queue across running stages
    pub async fn queue_depths(&self) -> PipelineResult<BTreeMap<String, u64>> {
        let mut depths = BTreeMap::new();
        for processor in &self.processors {
            depths.extend(processor.queue_depths().await?);
        }
        Ok(depths)
    }

    /// Stop polling, wait for the loops to exit, then drain in-flight work
    pub async fn shutdown(self) {
        info!("🛑 Evaluation pipeline shutdown requested");
        self.token.cancel();

        for task in self.tasks {
            if let Err(e) = task.await {
                error!(error = %e, "❌ Pipeline loop ended abnormally");
            }
        }
        for processor in &self.processors {
            processor.drain().await;
        }
        info!("✅ Evaluation pipeline stopped");
    }
}
