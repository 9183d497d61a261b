//! # Pipeline Message Structures
//!
//! The unit of work that travels through the stage queues, the envelope a
//! queue service hands back on receive, and the `container/blob` reference
//! format used for ground-truth locations.

use std::collections::HashMap;
use std::fmt;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PipelineError, PipelineResult};

/// One item (ground truth × iteration) of a batch run.
///
/// Never mutated after creation: every forward and every dead-letter carries
/// the same body.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PipelineRequest {
    /// Groups all items of one batch
    pub run_id: Uuid,
    /// Unique per item and iteration; names artifacts and status records
    pub id: Uuid,
    /// `container/blob-name` of the ground-truth file
    pub ground_truth_uri: String,
    pub project: String,
    pub experiment: String,
    /// Logical ground-truth identifier
    #[serde(rename = "ref")]
    pub reference: String,
    /// Named permutation the run belongs to
    pub set: String,
    #[serde(default)]
    pub is_baseline: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inf_headers: Option<HashMap<String, String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub eval_headers: Option<HashMap<String, String>>,
}

impl PipelineRequest {
    /// Serialize into a queue message body
    pub fn to_body(&self) -> PipelineResult<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode a queue message body
    pub fn from_body(body: &str) -> PipelineResult<Self> {
        Ok(serde_json::from_str(body)?)
    }

    pub fn ground_truth_ref(&self) -> PipelineResult<BlobRef> {
        BlobRef::parse(&self.ground_truth_uri)
    }

    /// Blob name of the inference artifact inside the inference container
    pub fn inference_blob_name(&self) -> String {
        format!("{}/{}.json", self.run_id, self.id)
    }

    /// Blob name of the evaluation artifact inside the evaluation container
    pub fn evaluation_blob_name(&self) -> String {
        format!("{}.json", self.id)
    }
}

/// Envelope returned by a queue receive. Only observed by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueMessage {
    pub id: String,
    /// Required to delete the message; rotates on every receive
    pub pop_receipt: String,
    /// Incremented by the queue on each delivery, starting at 1
    pub dequeue_count: u32,
    pub body: String,
    pub inserted_at: SystemTime,
}

/// A `container/blob-name` reference, split on the first `/`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct BlobRef {
    pub container: String,
    pub name: String,
}

impl BlobRef {
    pub fn new(container: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            container: container.into(),
            name: name.into(),
        }
    }

    pub fn parse(uri: &str) -> PipelineResult<Self> {
        match uri.split_once('/') {
            Some((container, name)) if !container.is_empty() && !name.is_empty() => {
                Ok(Self::new(container, name))
            }
            _ => Err(PipelineError::InvalidBlobRef {
                uri: uri.to_string(),
            }),
        }
    }
}

impl fmt::Display for BlobRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.container, self.name)
    }
}
