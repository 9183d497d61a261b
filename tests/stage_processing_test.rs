//! Stage processor behaviour against in-memory queues and a scripted endpoint.

mod common;

use std::collections::HashMap;

use serde_json::{json, Value};

use common::*;
use evaluator_pipeline::messaging::{PipelineRequest, QueueClient};
use evaluator_pipeline::pipeline::{EndpointResponse, MessageDisposition};
use evaluator_pipeline::status::{JobOutcome, JobStage, JobStatusRecord, JobStatusTracker};
use uuid::Uuid;

fn status_records(harness: &Harness, run_id: Uuid) -> Vec<JobStatusRecord> {
    harness
        .blobs
        .get_string(STATUS_CONTAINER, &JobStatusTracker::log_blob_name(run_id))
        .unwrap_or_default()
        .lines()
        .map(|line| serde_json::from_str(line).expect("status line should parse"))
        .collect()
}

fn deadletter(queue: &str) -> String {
    format!("{queue}-deadletter")
}

#[tokio::test]
async fn test_successful_inference_forwards_identical_request() {
    let harness = Harness::new();
    harness.seed_ground_truth("qa/1.json", "item-1");
    harness
        .endpoint
        .set_default(INFERENCE_URL, EndpointResponse::new(200, r#"{"answer":"42"}"#));
    let processor = harness.inference_processor().await;
    let sent = harness.send_request("qa/1.json", "item-1").await;

    let disposition = harness.process_next(&processor, INFERENCE_QUEUE).await;
    assert_eq!(disposition, Some(MessageDisposition::Completed));

    assert!(harness.queue.is_empty(INFERENCE_QUEUE));
    let forwarded = harness.queue.messages(EVALUATION_QUEUE);
    assert_eq!(forwarded.len(), 1);
    let forwarded = PipelineRequest::from_body(&forwarded[0]).unwrap();
    assert_eq!(forwarded.run_id, sent.run_id);
    assert_eq!(forwarded.id, sent.id);
    assert_eq!(forwarded.reference, sent.reference);
    assert_eq!(forwarded.set, sent.set);

    let artifact = harness
        .blobs
        .get_string(INFERENCE_CONTAINER, &format!("{}/{}.json", sent.run_id, sent.id))
        .expect("inference artifact stored");
    assert_eq!(artifact, r#"{"answer":"42"}"#);

    let calls = harness.endpoint.requests_to(INFERENCE_URL);
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].header("x-run-id"), Some(sent.run_id.to_string().as_str()));
    assert!(calls[0].header("x-call-id").is_some());
    let payload: Value = serde_json::from_slice(&calls[0].body).unwrap();
    assert_eq!(payload["ref"], "item-1");

    let records = status_records(&harness, sent.run_id);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].stage, JobStage::Inference);
    assert_eq!(records[0].status, JobOutcome::Success);
}

#[tokio::test]
async fn test_custom_headers_and_fresh_call_ids() {
    let harness = Harness::new();
    harness.seed_ground_truth("1.json", "item-1");
    harness.endpoint.script(INFERENCE_URL, [EndpointResponse::new(500, "boom")]);
    let processor = harness.inference_processor().await;

    let mut request = request_for("1.json", "item-1");
    request.inf_headers = Some(HashMap::from([("x-api-key".to_string(), "secret".to_string())]));
    harness
        .queue
        .send_message(INFERENCE_QUEUE, &request.to_body().unwrap())
        .await
        .unwrap();

    harness.drain_queue(&processor, INFERENCE_QUEUE).await;

    let calls = harness.endpoint.requests_to(INFERENCE_URL);
    assert_eq!(calls.len(), 2);
    assert!(calls.iter().all(|c| c.header("x-api-key") == Some("secret")));
    assert_ne!(calls[0].header("x-call-id"), calls[1].header("x-call-id"));
}

#[tokio::test]
async fn test_poison_message_is_deadlettered_without_calling_endpoint() {
    let harness = Harness::new();
    harness.seed_ground_truth("1.json", "item-1");
    let processor = harness.inference_processor().await;
    let body = request_for("1.json", "item-1").to_body().unwrap();
    harness
        .queue
        .send_redelivered(INFERENCE_QUEUE, &body, harness.settings.max_attempts)
        .unwrap();

    let disposition = harness.process_next(&processor, INFERENCE_QUEUE).await;

    assert_eq!(disposition, Some(MessageDisposition::Deadlettered));
    assert!(harness.queue.is_empty(INFERENCE_QUEUE));
    assert_eq!(harness.queue.messages(&deadletter(INFERENCE_QUEUE)), vec![body.clone()]);
    assert_eq!(harness.endpoint.call_count(INFERENCE_URL), 0);

    let request = PipelineRequest::from_body(&body).unwrap();
    let records = status_records(&harness, request.run_id);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, JobOutcome::Failed);
    assert!(records[0].error.is_some());
}

#[tokio::test]
async fn test_fatal_status_deadletters_on_first_attempt() {
    let harness = Harness::new();
    harness.seed_ground_truth("1.json", "item-1");
    harness.endpoint.script(INFERENCE_URL, [EndpointResponse::new(422, "unprocessable")]);
    let processor = harness.inference_processor().await;
    let sent = harness.send_request("1.json", "item-1").await;

    let disposition = harness.process_next(&processor, INFERENCE_QUEUE).await;

    assert_eq!(disposition, Some(MessageDisposition::Deadlettered));
    let deadlettered = harness.queue.messages(&deadletter(INFERENCE_QUEUE));
    assert_eq!(deadlettered, vec![sent.to_body().unwrap()]);
    assert!(harness.queue.is_empty(INFERENCE_QUEUE));
    assert!(harness.queue.is_empty(EVALUATION_QUEUE));
}

#[tokio::test]
async fn test_transient_failures_retry_then_succeed() {
    let harness = Harness::new();
    harness.seed_ground_truth("1.json", "item-1");
    harness.endpoint.script(
        INFERENCE_URL,
        [
            EndpointResponse::new(500, "oops"),
            EndpointResponse::new(502, "bad gateway"),
            EndpointResponse::new(200, r#"{"answer":"ok"}"#),
        ],
    );
    let processor = harness.inference_processor().await;
    let sent = harness.send_request("1.json", "item-1").await;

    let dispositions = harness.drain_queue(&processor, INFERENCE_QUEUE).await;

    assert_eq!(
        dispositions,
        vec![
            MessageDisposition::Abandoned,
            MessageDisposition::Abandoned,
            MessageDisposition::Completed,
        ]
    );
    assert!(harness.queue.is_empty(&deadletter(INFERENCE_QUEUE)));
    assert_eq!(harness.queue.len(EVALUATION_QUEUE), 1);

    let records = status_records(&harness, sent.run_id);
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, JobOutcome::Success);
}

#[tokio::test]
async fn test_busy_status_raises_shared_delay() {
    let harness = Harness::new();
    harness.seed_ground_truth("1.json", "item-1");
    harness.endpoint.script(
        INFERENCE_URL,
        [
            EndpointResponse::new(429, "slow down").with_header("Retry-After", "2"),
            EndpointResponse::new(503, "busy"),
        ],
    );
    let processor = harness.inference_processor().await;
    harness.send_request("1.json", "item-1").await;

    assert_eq!(
        harness.process_next(&processor, INFERENCE_QUEUE).await,
        Some(MessageDisposition::Abandoned)
    );
    assert_eq!(harness.rate.current_delay_ms(), 2000);

    assert_eq!(
        harness.process_next(&processor, INFERENCE_QUEUE).await,
        Some(MessageDisposition::Abandoned)
    );
    assert_eq!(harness.rate.current_delay_ms(), 3000);
    assert!(harness.queue.is_empty(&deadletter(INFERENCE_QUEUE)));
}

#[tokio::test]
async fn test_empty_success_body_is_transient() {
    let harness = Harness::new();
    harness.seed_ground_truth("1.json", "item-1");
    harness.endpoint.script(INFERENCE_URL, [EndpointResponse::new(200, "  \n")]);
    let processor = harness.inference_processor().await;
    let sent = harness.send_request("1.json", "item-1").await;

    assert_eq!(
        harness.process_next(&processor, INFERENCE_QUEUE).await,
        Some(MessageDisposition::Abandoned)
    );
    assert!(harness
        .blobs
        .get_string(INFERENCE_CONTAINER, &format!("{}/{}.json", sent.run_id, sent.id))
        .is_none());
    assert_eq!(harness.queue.len(INFERENCE_QUEUE), 1);
}

#[tokio::test]
async fn test_missing_ground_truth_abandons_without_endpoint_call() {
    let harness = Harness::new();
    let processor = harness.inference_processor().await;
    harness.send_request("does-not-exist.json", "item-1").await;

    assert_eq!(
        harness.process_next(&processor, INFERENCE_QUEUE).await,
        Some(MessageDisposition::Abandoned)
    );
    assert_eq!(harness.endpoint.call_count(INFERENCE_URL), 0);
}

#[tokio::test]
async fn test_undecodable_body_is_retried_then_deadlettered() {
    let harness = Harness::new();
    let processor = harness.inference_processor().await;
    harness
        .queue
        .send_message(INFERENCE_QUEUE, "not a pipeline request")
        .await
        .unwrap();

    let dispositions = harness.drain_queue(&processor, INFERENCE_QUEUE).await;

    assert_eq!(
        dispositions,
        vec![
            MessageDisposition::Abandoned,
            MessageDisposition::Abandoned,
            MessageDisposition::Abandoned,
            MessageDisposition::Deadlettered,
        ]
    );
    assert_eq!(
        harness.queue.messages(&deadletter(INFERENCE_QUEUE)),
        vec!["not a pipeline request".to_string()]
    );
}

#[tokio::test]
async fn test_evaluation_composes_payload_and_records_metrics() {
    let harness = Harness::new();
    harness.seed_ground_truth("1.json", "item-1");
    harness
        .endpoint
        .set_default(INFERENCE_URL, EndpointResponse::new(200, r#"{"answer":"42"}"#));
    harness.endpoint.set_default(
        EVALUATION_URL,
        EndpointResponse::new(200, r#"{"score":0.9}"#)
            .with_header("x-metric-accuracy", "0.9")
            .with_header("x-tag-model", "m1")
            .with_header("x-histogram-latency", "type=int;name=latency;unit=ms;value=12"),
    );
    let inference = harness.inference_processor().await;
    let evaluation = harness.evaluation_processor().await;
    let sent = harness.send_request("1.json", "item-1").await;

    harness.drain_queue(&inference, INFERENCE_QUEUE).await;
    let dispositions = harness.drain_queue(&evaluation, EVALUATION_QUEUE).await;
    assert_eq!(dispositions, vec![MessageDisposition::Completed]);

    let calls = harness.endpoint.requests_to(EVALUATION_URL);
    assert_eq!(calls.len(), 1);
    let payload: Value = serde_json::from_slice(&calls[0].body).unwrap();
    assert_eq!(payload["inference"], json!({"answer": "42"}));
    assert_eq!(payload["ground_truth"]["ref"], "item-1");

    assert_eq!(
        harness
            .blobs
            .get_string(EVALUATION_CONTAINER, &format!("{}.json", sent.id))
            .as_deref(),
        Some(r#"{"score":0.9}"#)
    );

    let catalog_url = format!("{CATALOG_URL}/api/projects/proj/experiments/exp/results");
    let recorded = harness.endpoint.requests_to(&catalog_url);
    assert_eq!(recorded.len(), 1);
    let record: Value = serde_json::from_slice(&recorded[0].body).unwrap();
    assert_eq!(record["metrics"]["accuracy"], json!(0.9));
    assert_eq!(record["ref"], "item-1");
    assert_eq!(record["id"], sent.id.to_string());
    assert_eq!(
        record["inference_uri"],
        format!("memory://{INFERENCE_CONTAINER}/{}/{}.json", sent.run_id, sent.id)
    );

    let records = status_records(&harness, sent.run_id);
    let stages: Vec<_> = records.iter().map(|r| (r.stage, r.status)).collect();
    assert_eq!(
        stages,
        vec![
            (JobStage::Inference, JobOutcome::Success),
            (JobStage::Evaluation, JobOutcome::Success),
        ]
    );
}

#[tokio::test]
async fn test_catalog_failure_leaves_evaluation_for_retry() {
    let harness = Harness::new();
    harness.seed_ground_truth("1.json", "item-1");
    harness.endpoint.set_default(
        EVALUATION_URL,
        EndpointResponse::new(200, r#"{"score":1}"#).with_header("x-metric-score", "1"),
    );
    let catalog_url = format!("{CATALOG_URL}/api/projects/proj/experiments/exp/results");
    harness.endpoint.script(&catalog_url, [EndpointResponse::new(500, "down")]);
    let inference = harness.inference_processor().await;
    let evaluation = harness.evaluation_processor().await;
    harness.send_request("1.json", "item-1").await;

    harness.drain_queue(&inference, INFERENCE_QUEUE).await;
    let dispositions = harness.drain_queue(&evaluation, EVALUATION_QUEUE).await;

    assert_eq!(
        dispositions,
        vec![MessageDisposition::Abandoned, MessageDisposition::Completed]
    );
    assert_eq!(harness.endpoint.call_count(&catalog_url), 2);
}

#[tokio::test]
async fn test_inference_response_metrics_are_recorded_without_evaluation_uri() {
    let harness = Harness::new();
    harness.seed_ground_truth("1.json", "item-1");
    harness.endpoint.set_default(
        INFERENCE_URL,
        EndpointResponse::new(200, r#"{"answer":"42"}"#).with_header("x-metric-latency", "12"),
    );
    let handler = harness.inference_handler().with_response_metrics(true);
    let inference = harness.processor(handler, INFERENCE_QUEUE).await;
    let sent = harness.send_request("1.json", "item-1").await;

    let disposition = harness.process_next(&inference, INFERENCE_QUEUE).await;
    assert_eq!(disposition, Some(MessageDisposition::Completed));

    let catalog_url = format!("{CATALOG_URL}/api/projects/proj/experiments/exp/results");
    let recorded = harness.endpoint.requests_to(&catalog_url);
    assert_eq!(recorded.len(), 1);
    let record: Value = serde_json::from_slice(&recorded[0].body).unwrap();
    assert_eq!(record["metrics"]["latency"], json!(12.0));
    assert_eq!(record["id"], sent.id.to_string());
    assert_eq!(
        record["inference_uri"],
        format!("memory://{INFERENCE_CONTAINER}/{}/{}.json", sent.run_id, sent.id)
    );
    assert_eq!(record["evaluation_uri"], Value::Null);
}

#[tokio::test]
async fn test_inference_metrics_ignored_when_processing_is_off() {
    let harness = Harness::new();
    harness.seed_ground_truth("1.json", "item-1");
    harness.endpoint.set_default(
        INFERENCE_URL,
        EndpointResponse::new(200, r#"{"answer":"42"}"#).with_header("x-metric-latency", "12"),
    );
    let inference = harness.inference_processor().await;
    harness.send_request("1.json", "item-1").await;

    harness.drain_queue(&inference, INFERENCE_QUEUE).await;

    let catalog_url = format!("{CATALOG_URL}/api/projects/proj/experiments/exp/results");
    assert_eq!(harness.endpoint.call_count(&catalog_url), 0);
}

#[tokio::test]
async fn test_precomposed_inference_artifact_skips_ground_truth() {
    let harness = Harness::new();
    let processor = harness.evaluation_processor().await;
    let request = request_for("never-written.json", "item-1");
    harness.blobs.put(
        INFERENCE_CONTAINER,
        &request.inference_blob_name(),
        json!({"ground_truth": {"ref": "item-1"}, "inference": {"answer": "x"}}).to_string(),
    );
    harness
        .queue
        .send_message(EVALUATION_QUEUE, &request.to_body().unwrap())
        .await
        .unwrap();

    assert_eq!(
        harness.process_next(&processor, EVALUATION_QUEUE).await,
        Some(MessageDisposition::Completed)
    );
    let calls = harness.endpoint.requests_to(EVALUATION_URL);
    let payload: Value = serde_json::from_slice(&calls[0].body).unwrap();
    assert_eq!(payload["inference"]["answer"], "x");
}
