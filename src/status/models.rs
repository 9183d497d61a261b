//! # Job Status Data Model
//!
//! Records appended to a run's status log, the job metadata stored beside
//! them, and the summaries derived by replaying the log.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::constants::metadata;
use crate::storage::BlobMetadata;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStage {
    Inference,
    Evaluation,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inference => "inference",
            Self::Evaluation => "evaluation",
        }
    }
}

impl fmt::Display for JobStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobOutcome {
    Success,
    Failed,
}

/// One appended fact about an item at a stage. Never edited.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatusRecord {
    pub id: Uuid,
    pub stage: JobStage,
    pub status: JobOutcome,
    #[serde(default, alias = "err", skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(alias = "ts")]
    pub timestamp: DateTime<Utc>,
}

impl JobStatusRecord {
    pub fn new(id: Uuid, stage: JobStage, status: JobOutcome, error: Option<String>) -> Self {
        Self {
            id,
            stage,
            status,
            error,
            timestamp: Utc::now(),
        }
    }
}

/// Why a run was declared complete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CompletionReason {
    AllSucceeded,
    IdleTimeout,
}

impl CompletionReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AllSucceeded => "all_succeeded",
            Self::IdleTimeout => "idle_timeout",
        }
    }
}

impl FromStr for CompletionReason {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "all_succeeded" => Ok(Self::AllSucceeded),
            "idle_timeout" => Ok(Self::IdleTimeout),
            other => Err(format!("unknown completion reason: {other}")),
        }
    }
}

/// Job metadata written once when the run is enqueued
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub run_id: Uuid,
    pub project: String,
    pub experiment: String,
    pub set: String,
    pub total_items: u64,
    pub started_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn to_metadata(&self) -> BlobMetadata {
        BlobMetadata::from([
            (metadata::PROJECT.to_string(), self.project.clone()),
            (metadata::EXPERIMENT.to_string(), self.experiment.clone()),
            (metadata::SET.to_string(), self.set.clone()),
            (metadata::TOTAL_ITEMS.to_string(), self.total_items.to_string()),
            (metadata::STARTED_AT.to_string(), self.started_at.to_rfc3339()),
        ])
    }

    /// Rebuild from blob metadata; missing fields fall back to empty values
    pub fn from_metadata(run_id: Uuid, meta: &BlobMetadata) -> Self {
        Self {
            run_id,
            project: meta.get(metadata::PROJECT).cloned().unwrap_or_default(),
            experiment: meta.get(metadata::EXPERIMENT).cloned().unwrap_or_default(),
            set: meta.get(metadata::SET).cloned().unwrap_or_default(),
            total_items: parse_u64(meta, metadata::TOTAL_ITEMS),
            started_at: parse_time(meta, metadata::STARTED_AT).unwrap_or_default(),
        }
    }
}

/// Distinct-id tallies for one stage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStageStatus {
    pub succeeded: u64,
    pub failed: u64,
}

/// Tally derived from a replayed status log
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobStatusSummary {
    pub inference: JobStageStatus,
    pub evaluation: JobStageStatus,
    pub last_record_at: Option<DateTime<Utc>>,
}

impl JobStatusSummary {
    /// Keep only the latest record per `(id, stage)`; on equal timestamps the
    /// one appended later wins.
    pub fn from_records<I>(records: I) -> Self
    where
        I: IntoIterator<Item = JobStatusRecord>,
    {
        let mut latest: HashMap<(Uuid, JobStage), JobStatusRecord> = HashMap::new();
        let mut last_record_at: Option<DateTime<Utc>> = None;

        for record in records {
            last_record_at = Some(match last_record_at {
                Some(at) if at >= record.timestamp => at,
                _ => record.timestamp,
            });
            let key = (record.id, record.stage);
            match latest.get(&key) {
                Some(existing) if existing.timestamp > record.timestamp => {}
                _ => {
                    latest.insert(key, record);
                }
            }
        }

        let mut summary = Self {
            last_record_at,
            ..Self::default()
        };
        for record in latest.values() {
            let stage = match record.stage {
                JobStage::Inference => &mut summary.inference,
                JobStage::Evaluation => &mut summary.evaluation,
            };
            match record.status {
                JobOutcome::Success => stage.succeeded += 1,
                JobOutcome::Failed => stage.failed += 1,
            }
        }
        summary
    }

    pub fn all_succeeded(&self, total_items: u64) -> bool {
        total_items > 0
            && self.inference.succeeded >= total_items
            && self.evaluation.succeeded >= total_items
    }
}

/// Status of one run as answered to callers
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobStatus {
    pub run_id: Uuid,
    pub project: String,
    pub experiment: String,
    pub set: String,
    pub total_items: u64,
    pub started_at: DateTime<Utc>,
    pub inference: JobStageStatus,
    pub evaluation: JobStageStatus,
    pub completed_at: Option<DateTime<Utc>>,
    pub completion_reason: Option<CompletionReason>,
}

impl JobStatus {
    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }

    pub(crate) fn from_parts(job: JobRecord, summary: &JobStatusSummary) -> Self {
        Self {
            run_id: job.run_id,
            project: job.project,
            experiment: job.experiment,
            set: job.set,
            total_items: job.total_items,
            started_at: job.started_at,
            inference: summary.inference,
            evaluation: summary.evaluation,
            completed_at: None,
            completion_reason: None,
        }
    }

    /// Read a cached completion from blob metadata, if one was stored
    pub(crate) fn from_cached_metadata(run_id: Uuid, meta: &BlobMetadata) -> Option<Self> {
        let completed_at = parse_time(meta, metadata::COMPLETED_AT)?;
        let job = JobRecord::from_metadata(run_id, meta);
        Some(Self {
            run_id,
            project: job.project,
            experiment: job.experiment,
            set: job.set,
            total_items: job.total_items,
            started_at: job.started_at,
            inference: JobStageStatus {
                succeeded: parse_u64(meta, metadata::INFERENCE_SUCCEEDED),
                failed: parse_u64(meta, metadata::INFERENCE_FAILED),
            },
            evaluation: JobStageStatus {
                succeeded: parse_u64(meta, metadata::EVALUATION_SUCCEEDED),
                failed: parse_u64(meta, metadata::EVALUATION_FAILED),
            },
            completed_at: Some(completed_at),
            completion_reason: meta
                .get(metadata::COMPLETION_REASON)
                .and_then(|reason| reason.parse().ok()),
        })
    }

    /// Completion fields to merge into blob metadata
    pub(crate) fn completion_metadata(&self) -> BlobMetadata {
        let mut meta = BlobMetadata::from([
            (
                metadata::INFERENCE_SUCCEEDED.to_string(),
                self.inference.succeeded.to_string(),
            ),
            (
                metadata::INFERENCE_FAILED.to_string(),
                self.inference.failed.to_string(),
            ),
            (
                metadata::EVALUATION_SUCCEEDED.to_string(),
                self.evaluation.succeeded.to_string(),
            ),
            (
                metadata::EVALUATION_FAILED.to_string(),
                self.evaluation.failed.to_string(),
            ),
        ]);
        if let Some(completed_at) = self.completed_at {
            meta.insert(metadata::COMPLETED_AT.to_string(), completed_at.to_rfc3339());
        }
        if let Some(reason) = self.completion_reason {
            meta.insert(
                metadata::COMPLETION_REASON.to_string(),
                reason.as_str().to_string(),
            );
        }
        meta
    }
}

/// Listing entry built from metadata only
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobSummary {
    pub run_id: Uuid,
    pub project: String,
    pub experiment: String,
    pub set: String,
    pub total_items: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

fn parse_u64(meta: &BlobMetadata, key: &str) -> u64 {
    meta.get(key).and_then(|v| v.parse().ok()).unwrap_or(0)
}

fn parse_time(meta: &BlobMetadata, key: &str) -> Option<DateTime<Utc>> {
    meta.get(key)
        .and_then(|v| DateTime::parse_from_rfc3339(v).ok())
        .map(|t| t.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use proptest::prelude::*;

    fn record(id: Uuid, stage: JobStage, status: JobOutcome, at: DateTime<Utc>) -> JobStatusRecord {
        JobStatusRecord {
            id,
            stage,
            status,
            error: None,
            timestamp: at,
        }
    }

    #[test]
    fn test_record_accepts_short_field_names() {
        let id = Uuid::new_v4();
        let line = format!(
            r#"{{"id":"{id}","stage":"evaluation","status":"failed","err":"boom","ts":"2024-05-01T10:00:00Z"}}"#
        );
        let parsed: JobStatusRecord = serde_json::from_str(&line).unwrap();
        assert_eq!(parsed.stage, JobStage::Evaluation);
        assert_eq!(parsed.status, JobOutcome::Failed);
        assert_eq!(parsed.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_latest_record_per_item_wins() {
        let id = Uuid::new_v4();
        let t0 = Utc::now();
        let records = vec![
            record(id, JobStage::Inference, JobOutcome::Failed, t0),
            record(id, JobStage::Inference, JobOutcome::Success, t0 + Duration::seconds(5)),
            record(id, JobStage::Evaluation, JobOutcome::Success, t0 + Duration::seconds(9)),
            record(id, JobStage::Evaluation, JobOutcome::Failed, t0 + Duration::seconds(2)),
        ];

        let summary = JobStatusSummary::from_records(records);
        assert_eq!(summary.inference, JobStageStatus { succeeded: 1, failed: 0 });
        assert_eq!(summary.evaluation, JobStageStatus { succeeded: 1, failed: 0 });
        assert_eq!(summary.last_record_at, Some(t0 + Duration::seconds(9)));
    }

    #[test]
    fn test_zero_total_never_all_succeeded() {
        assert!(!JobStatusSummary::default().all_succeeded(0));
    }

    #[test]
    fn test_job_record_metadata_round_trip() {
        let job = JobRecord {
            run_id: Uuid::new_v4(),
            project: "p".into(),
            experiment: "e".into(),
            set: "s".into(),
            total_items: 6,
            started_at: DateTime::parse_from_rfc3339("2024-05-01T10:00:00Z")
                .unwrap()
                .with_timezone(&Utc),
        };
        assert_eq!(JobRecord::from_metadata(job.run_id, &job.to_metadata()), job);
    }

    #[test]
    fn test_cached_metadata_requires_completed_at() {
        let job = JobRecord::from_metadata(Uuid::new_v4(), &BlobMetadata::new());
        assert!(JobStatus::from_cached_metadata(job.run_id, &job.to_metadata()).is_none());
    }

    proptest! {
        #[test]
        fn prop_duplicates_and_failures_do_not_inflate_success_counts(
            n in 1usize..20,
            retries in proptest::collection::vec((0usize..20, any::<bool>()), 0..40),
        ) {
            let ids: Vec<Uuid> = (0..n).map(|_| Uuid::new_v4()).collect();
            let t0 = Utc::now();
            let mut records = Vec::new();
            // earlier retries, possibly failed
            for (i, (index, ok)) in retries.iter().enumerate() {
                let outcome = if *ok { JobOutcome::Success } else { JobOutcome::Failed };
                records.push(record(ids[index % n], JobStage::Inference, outcome, t0 + Duration::milliseconds(i as i64)));
            }
            // final successes for every id
            for id in &ids {
                records.push(record(*id, JobStage::Inference, JobOutcome::Success, t0 + Duration::seconds(60)));
            }

            let summary = JobStatusSummary::from_records(records);
            prop_assert_eq!(summary.inference.succeeded, n as u64);
            prop_assert_eq!(summary.inference.failed, 0);
        }
    }
}
