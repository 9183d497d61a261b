#![allow(clippy::doc_markdown)] // Allow technical terms in docs
#![allow(clippy::missing_errors_doc)] // Allow public functions without # Errors sections
#![allow(clippy::must_use_candidate)] // Allow methods without must_use when context is clear

//! # Evaluator Pipeline
//!
//! Asynchronous two-stage evaluation pipeline driven by message queues.
//!
//! ## Overview
//!
//! A batch of ground-truth items is fanned out onto an inference queue. The
//! inference stage sends each item to a model endpoint, stores the output and
//! forwards the item to the evaluation queue. The evaluation stage scores the
//! output against its ground truth, stores the score and records the metrics
//! in an external catalog. A per-run append-only log tracks completion.
//!
//! ```text
//!  EnqueueCoordinator ──► inference queue ──► StageProcessor(inference)
//!                                                   │ forward
//!                                                   ▼
//!                          evaluation queue ──► StageProcessor(evaluation)
//!                                                   │ record
//!                                                   ▼
//!                                              JobStatusTracker
//! ```
//!
//! ## Module Organization
//!
//! - [`bootstrap`] - Start enabled roles, the rate decay loop, shutdown and drain
//! - [`config`] - YAML configuration with environment sections and overrides
//! - [`enqueue`] - Batch fan-out onto the first stage's queue
//! - [`execution`] - Bounded task runner and cancellation helpers
//! - [`messaging`] - Queue message format and the queue client seam
//! - [`pipeline`] - Stage processor loop and the two stage handlers
//! - [`resilience`] - Process-wide backpressure
//! - [`status`] - Job status log and completion detection
//! - [`storage`] - Blob store seam
//! - [`transform`] - YAML normalisation and query reshaping
//!
//! ## Quick Start
//!
//! The crate emits `tracing` events but installs no subscriber; call
//! [`logging::init_structured_logging`] once at process start.
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use evaluator_pipeline::bootstrap::{PipelineBootstrap, PipelineComponents};
//! use evaluator_pipeline::config::ConfigManager;
//! use evaluator_pipeline::messaging::InMemoryQueueClient;
//! use evaluator_pipeline::storage::InMemoryBlobStore;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! evaluator_pipeline::logging::init_structured_logging();
//! let manager = ConfigManager::load()?;
//! let components = PipelineComponents::with_http_endpoint(
//!     Arc::new(InMemoryQueueClient::new()),
//!     Arc::new(InMemoryBlobStore::new()),
//!     manager.config(),
//! )?;
//! let handle = PipelineBootstrap::start(manager.config(), components).await?;
//! // ...
//! handle.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod bootstrap;
pub mod config;
pub mod constants;
pub mod enqueue;
pub mod error;
pub mod execution;
pub mod logging;
pub mod messaging;
pub mod pipeline;
pub mod resilience;
pub mod status;
pub mod storage;
pub mod transform;

pub use bootstrap::{PipelineBootstrap, PipelineComponents, PipelineHandle};
pub use config::{ConfigManager, PipelineConfig, PipelineRole};
pub use enqueue::{BatchRequest, EnqueueCoordinator, EnqueueResponse};
pub use error::{PipelineError, PipelineResult};
pub use execution::BoundedTaskRunner;
pub use messaging::{PipelineRequest, QueueClient, QueueMessage};
pub use pipeline::{StageHandler, StageProcessor};
pub use resilience::RateController;
pub use status::{JobStatus, JobStatusTracker};
pub use storage::BlobStore;
