//! # Job Status Tracker
//!
//! One append blob per run holds newline-delimited [`JobStatusRecord`]s;
//! the blob's metadata holds the [`JobRecord`] and, once completion is
//! detected, the cached tally. A cached completion is terminal: later
//! queries return it without replaying the log, even if more records have
//! been appended since.
//!
//! Writes are best effort. A failed append is logged and swallowed so that
//! status tracking can never fail a stage's primary work.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::models::{
    CompletionReason, JobOutcome, JobRecord, JobStage, JobStatus, JobStatusRecord,
    JobStatusSummary, JobSummary,
};
use crate::constants::metadata;
use crate::error::PipelineResult;
use crate::storage::{BlobStore, StorageError};

const LOG_BLOB_SUFFIX: &str = ".jsonl";

#[derive(Clone)]
pub struct JobStatusTracker {
    store: Arc<dyn BlobStore>,
    container: Option<String>,
    idle_timeout: Duration,
}

impl std::fmt::Debug for JobStatusTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobStatusTracker")
            .field("container", &self.container)
            .field("idle_timeout", &self.idle_timeout)
            .finish()
    }
}

impl JobStatusTracker {
    /// `container = None` disables tracking: writes are skipped and
    /// queries answer `None`.
    pub fn new(store: Arc<dyn BlobStore>, container: Option<String>, idle_timeout: Duration) -> Self {
        Self {
            store,
            container: container.filter(|c| !c.trim().is_empty()),
            idle_timeout,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.container.is_some()
    }

    pub fn log_blob_name(run_id: Uuid) -> String {
        format!("{run_id}{LOG_BLOB_SUFFIX}")
    }

    /// Create the run's log blob and its job metadata if absent
    pub async fn create_job(&self, job: &JobRecord) -> PipelineResult<()> {
        let Some(container) = self.container.as_deref() else {
            return Ok(());
        };
        let name = Self::log_blob_name(job.run_id);

        let created = self.store.create_append_blob_if_absent(container, &name).await?;
        let needs_metadata = created
            || !self
                .store
                .get_metadata(container, &name)
                .await?
                .contains_key(metadata::STARTED_AT);

        if needs_metadata {
            self.store
                .set_metadata(container, &name, job.to_metadata())
                .await?;
            info!(
                run_id = %job.run_id,
                total_items = job.total_items,
                project = %job.project,
                experiment = %job.experiment,
                "📋 Job created"
            );
        } else {
            debug!(run_id = %job.run_id, "Job already exists, metadata left unchanged");
        }
        Ok(())
    }

    /// Append one outcome. Never fails; problems are logged as warnings.
    pub async fn record_outcome(
        &self,
        run_id: Uuid,
        id: Uuid,
        stage: JobStage,
        outcome: JobOutcome,
        error: Option<String>,
    ) {
        let Some(container) = self.container.as_deref() else {
            return;
        };
        let record = JobStatusRecord::new(id, stage, outcome, error);

        if let Err(e) = self.append_record(container, run_id, &record).await {
            warn!(
                run_id = %run_id,
                id = %id,
                stage = %stage,
                error = %e,
                "⚠️ Failed to record job status, continuing"
            );
        }
    }

    async fn append_record(
        &self,
        container: &str,
        run_id: Uuid,
        record: &JobStatusRecord,
    ) -> PipelineResult<()> {
        let name = Self::log_blob_name(run_id);
        let mut line = serde_json::to_vec(record)?;
        line.push(b'\n');

        self.store.create_append_blob_if_absent(container, &name).await?;
        self.store.append(container, &name, &line).await?;
        Ok(())
    }

    /// Current status of a run, or `None` if tracking is disabled or the
    /// run is unknown.
    pub async fn get_status(&self, run_id: Uuid) -> PipelineResult<Option<JobStatus>> {
        let Some(container) = self.container.as_deref() else {
            return Ok(None);
        };
        let name = Self::log_blob_name(run_id);

        let meta = match self.store.get_metadata(container, &name).await {
            Ok(meta) => meta,
            Err(StorageError::BlobNotFound { .. }) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        if let Some(cached) = JobStatus::from_cached_metadata(run_id, &meta) {
            debug!(run_id = %run_id, "Returning cached job completion");
            return Ok(Some(cached));
        }

        let content = self.store.read(container, &name).await?;
        let summary = JobStatusSummary::from_records(parse_log(run_id, &content));
        let job = JobRecord::from_metadata(run_id, &meta);

        let mut status = JobStatus::from_parts(job, &summary);
        let now = Utc::now();

        if summary.all_succeeded(status.total_items) {
            status.completed_at = Some(summary.last_record_at.unwrap_or(now));
            status.completion_reason = Some(CompletionReason::AllSucceeded);
        } else if let Some(last) = summary
            .last_record_at
            .filter(|last| self.idle_since(*last, now))
        {
            info!(
                run_id = %run_id,
                last_activity = %last,
                "⏱️ Job idle past timeout, declaring it complete"
            );
            status.completed_at = Some(now);
            status.completion_reason = Some(CompletionReason::IdleTimeout);
        }

        if status.is_complete() {
            let mut merged = meta;
            merged.extend(status.completion_metadata());
            if let Err(e) = self.store.set_metadata(container, &name, merged).await {
                warn!(run_id = %run_id, error = %e, "⚠️ Failed to cache job completion");
            }
        }

        Ok(Some(status))
    }

    fn idle_since(&self, last: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        match (now - last).to_std() {
            Ok(elapsed) => elapsed >= self.idle_timeout,
            Err(_) => false,
        }
    }

    /// Jobs started at or after `since`, newest first, from metadata only
    pub async fn list_jobs(&self, since: Option<DateTime<Utc>>) -> PipelineResult<Vec<JobSummary>> {
        let Some(container) = self.container.as_deref() else {
            return Ok(Vec::new());
        };

        let mut jobs: Vec<JobSummary> = self
            .store
            .list(container, None)
            .await?
            .into_iter()
            .filter_map(|item| {
                let run_id = item
                    .name
                    .strip_suffix(LOG_BLOB_SUFFIX)
                    .and_then(|id| Uuid::parse_str(id).ok())?;
                let job = JobRecord::from_metadata(run_id, &item.metadata);
                let completed_at = JobStatus::from_cached_metadata(run_id, &item.metadata)
                    .and_then(|status| status.completed_at);
                Some(JobSummary {
                    run_id,
                    project: job.project,
                    experiment: job.experiment,
                    set: job.set,
                    total_items: job.total_items,
                    started_at: job.started_at,
                    completed_at,
                })
            })
            .filter(|job| since.map_or(true, |since| job.started_at >= since))
            .collect();

        jobs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        Ok(jobs)
    }
}

fn parse_log(run_id: Uuid, content: &[u8]) -> Vec<JobStatusRecord> {
    String::from_utf8_lossy(content)
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<JobStatusRecord>(line) {
            Ok(record) => Some(record),
            Err(e) => {
                warn!(run_id = %run_id, error = %e, "⚠️ Skipping malformed status record");
                None
            }
        })
        .collect()
}
