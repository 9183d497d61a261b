//! # Enqueue
//!
//! Fans a batch request out into one pipeline message per ground-truth item
//! and iteration.

pub mod coordinator;

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::defaults;

pub use coordinator::EnqueueCoordinator;

fn default_iterations() -> u32 {
    defaults::ENQUEUE_ITERATIONS
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchRequest {
    pub project: String,
    pub experiment: String,
    pub set: String,
    #[serde(default)]
    pub is_baseline: bool,
    /// Sources as `container` or `container/prefix`
    pub containers: Vec<String>,
    /// Inbound queue of the first stage
    pub queue: String,
    #[serde(default = "default_iterations")]
    pub iterations: u32,
    /// Generated when absent
    #[serde(default)]
    pub run_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inf_headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_headers: Option<HashMap<String, String>>,
}

/// The part of a ground-truth file the coordinator reads
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct GroundTruthFile {
    #[serde(rename = "ref")]
    pub reference: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub run_id: Uuid,
    /// Resolved items × iterations
    pub total_items: u64,
    /// Messages actually sent
    pub enqueued: u64,
}
