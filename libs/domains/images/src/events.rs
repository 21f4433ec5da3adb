//! Outcome event payloads and their publisher.
//!
//! Consumers of the results exchange see exactly one of `ImageProcessed`
//! or `image.failed` per job under normal operation (at-least-once across
//! crashes).

use crate::models::{ImageJob, ProcessedImage};
use async_trait::async_trait;
use bus_worker::{Fault, JobContext, OutcomePublisher, ResultsPublisher, WorkerError};
use serde::{Deserialize, Serialize};

/// Event type for successfully processed images.
pub const EVENT_IMAGE_PROCESSED: &str = "ImageProcessed";

/// Event type for permanently failed jobs.
pub const EVENT_IMAGE_FAILED: &str = "image.failed";

/// Payload of an `ImageProcessed` event.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageProcessedPayload {
    pub image_id: String,
    pub user_id: String,
    pub processed_url: String,
    pub public_id: String,
    pub style: String,
    /// Sum of the attempt's phase timings, in milliseconds.
    pub processing_time: u64,
}

/// Payload of an `image.failed` event.
///
/// Ids are null when the message could not be decoded.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageFailedPayload {
    pub image_id: Option<String>,
    pub user_id: Option<String>,
    pub error: String,
    pub error_code: String,
    pub retry_count: u32,
}

/// Builds and publishes the domain's outcome events.
pub struct ImageOutcomePublisher {
    results: ResultsPublisher,
}

impl ImageOutcomePublisher {
    pub fn new(results: ResultsPublisher) -> Self {
        Self { results }
    }
}

fn success_payload(
    job: &ImageJob,
    output: &ProcessedImage,
    ctx: &JobContext,
) -> ImageProcessedPayload {
    ImageProcessedPayload {
        image_id: job.image_id.clone(),
        user_id: job.user_id.clone(),
        processed_url: output.processed_url.clone(),
        public_id: output.public_id.clone(),
        style: job.style.clone(),
        processing_time: ctx.timings.total_ms(),
    }
}

fn failure_payload(
    job: Option<&ImageJob>,
    fault: Fault,
    error_message: &str,
    retry_count: u32,
) -> ImageFailedPayload {
    ImageFailedPayload {
        image_id: job.map(|j| j.image_id.clone()),
        user_id: job.map(|j| j.user_id.clone()),
        error: error_message.to_string(),
        error_code: fault.code.as_str().to_string(),
        retry_count,
    }
}

#[async_trait]
impl OutcomePublisher<ImageJob, ProcessedImage> for ImageOutcomePublisher {
    async fn publish_success(
        &self,
        job: &ImageJob,
        output: &ProcessedImage,
        ctx: &JobContext,
    ) -> Result<(), WorkerError> {
        let payload = success_payload(job, output, ctx);
        self.results
            .publish(EVENT_IMAGE_PROCESSED, &payload)
            .await?;
        Ok(())
    }

    async fn publish_failure(
        &self,
        job: Option<&ImageJob>,
        fault: Fault,
        error_message: &str,
        retry_count: u32,
    ) -> Result<(), WorkerError> {
        let payload = failure_payload(job, fault, error_message, retry_count);
        self.results.publish(EVENT_IMAGE_FAILED, &payload).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::PIPELINE_PHASES;
    use bus_worker::{ErrorCode, PhaseRecorder};
    use std::sync::Arc;

    fn job() -> ImageJob {
        ImageJob {
            image_id: "i1".to_string(),
            user_id: "u1".to_string(),
            original_image_url: "https://x/i1.jpg".to_string(),
            style: "anime".to_string(),
        }
    }

    #[test]
    fn test_success_payload_sums_phase_timings() {
        let timings = Arc::new(PhaseRecorder::new(PIPELINE_PHASES));
        timings.record("fetch", 100);
        timings.record("transform", 2_000);
        timings.record("store", 300);

        let ctx = JobContext {
            partition: 0,
            retry_count: 0,
            event_id: None,
            timings,
        };

        let output = ProcessedImage {
            public_id: "processed_i1_1700000000000".to_string(),
            processed_url: "https://cdn/x".to_string(),
            passed_through: false,
        };

        let payload = success_payload(&job(), &output, &ctx);
        assert_eq!(payload.image_id, "i1");
        assert_eq!(payload.user_id, "u1");
        assert_eq!(payload.processed_url, "https://cdn/x");
        assert_eq!(payload.style, "anime");
        assert_eq!(payload.processing_time, 2_400);

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json.get("imageId").is_some());
        assert!(json.get("processedUrl").is_some());
        assert!(json.get("processingTime").is_some());
    }

    #[test]
    fn test_failure_payload_carries_code_and_retry_count() {
        let fault = Fault {
            retryable: false,
            code: ErrorCode::RateLimitError,
        };

        let payload = failure_payload(Some(&job()), fault, "quota exhausted", 3);
        assert_eq!(payload.image_id.as_deref(), Some("i1"));
        assert_eq!(payload.error_code, "RATE_LIMIT_ERROR");
        assert_eq!(payload.retry_count, 3);
    }

    #[test]
    fn test_failure_payload_for_undecodable_message_has_nulls() {
        let fault = Fault {
            retryable: false,
            code: ErrorCode::UnknownError,
        };

        let payload = failure_payload(None, fault, "Malformed message: bad json", 0);
        assert!(payload.image_id.is_none());
        assert!(payload.user_id.is_none());

        let json = serde_json::to_value(&payload).unwrap();
        assert!(json["imageId"].is_null());
        assert!(json["userId"].is_null());
        assert_eq!(json["errorCode"], "UNKNOWN_ERROR");
    }
}
