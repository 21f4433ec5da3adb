//! Metrics module for worker observability.
//!
//! This module provides Prometheus-compatible metrics for monitoring
//! worker performance and health.
//!
//! ## Available Metrics
//!
//! - `worker_jobs_processed_total` - Counter of jobs by terminal status
//! - `worker_job_duration_seconds` - Histogram of whole-pipeline time
//! - `worker_phase_duration_seconds` - Histogram of per-phase time
//! - `worker_errors_total` - Counter of classified faults by code
//! - `worker_retries_total` - Counter of scheduled retries by attempt
//! - `worker_in_flight_jobs` - Gauge of jobs currently being processed
//! - `worker_events_published_total` - Counter of outcome events by type
//! - `worker_publish_failures_total` - Counter of swallowed publish errors
//! - `worker_consumer_errors_total` - Counter of delivery-stream errors

use crate::error::ErrorCode;
use metrics::{counter, gauge, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

use once_cell::sync::OnceCell;

/// Global Prometheus handle for metrics export
static PROMETHEUS_HANDLE: OnceCell<PrometheusHandle> = OnceCell::new();

/// Metric names as constants for consistency
pub mod names {
    pub const JOBS_PROCESSED: &str = "worker_jobs_processed_total";
    pub const JOB_DURATION: &str = "worker_job_duration_seconds";
    pub const PHASE_DURATION: &str = "worker_phase_duration_seconds";
    pub const ERRORS: &str = "worker_errors_total";
    pub const RETRIES: &str = "worker_retries_total";
    pub const IN_FLIGHT_JOBS: &str = "worker_in_flight_jobs";
    pub const EVENTS_PUBLISHED: &str = "worker_events_published_total";
    pub const PUBLISH_FAILURES: &str = "worker_publish_failures_total";
    pub const CONSUMER_ERRORS: &str = "worker_consumer_errors_total";
    /// Transform returned no image and the original bytes were stored
    pub const TRANSFORM_PASS_THROUGH: &str = "worker_transform_pass_through_total";
}

/// Terminal status of one delivery attempt, for metrics labeling
#[derive(Debug, Clone, Copy)]
pub enum JobStatus {
    Success,
    Retried,
    Dlq,
}

impl JobStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Retried => "retried",
            Self::Dlq => "dlq",
        }
    }
}

/// Initialize the Prometheus metrics exporter.
///
/// This should be called once at application startup.
/// Returns the PrometheusHandle for rendering metrics.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            PrometheusBuilder::new()
                .install_recorder()
                .expect("Failed to install Prometheus recorder")
        })
        .clone()
}

/// Get the global Prometheus handle.
///
/// Returns None if metrics haven't been initialized.
pub fn get_metrics_handle() -> Option<PrometheusHandle> {
    PROMETHEUS_HANDLE.get().cloned()
}

/// Record a job reaching a terminal status for this delivery attempt.
pub fn record_job_processed(partition: usize, status: JobStatus) {
    counter!(
        names::JOBS_PROCESSED,
        "partition" => partition.to_string(),
        "status" => status.as_str().to_string()
    )
    .increment(1);
}

/// Record whole-pipeline duration.
pub fn record_job_duration(partition: usize, duration: Duration) {
    histogram!(
        names::JOB_DURATION,
        "partition" => partition.to_string()
    )
    .record(duration.as_secs_f64());
}

/// Record one pipeline phase's duration.
pub fn record_phase_duration(phase: &str, elapsed_ms: u64) {
    histogram!(
        names::PHASE_DURATION,
        "phase" => phase.to_string()
    )
    .record(elapsed_ms as f64 / 1000.0);
}

/// Record a classified fault.
pub fn record_error(code: ErrorCode) {
    counter!(
        names::ERRORS,
        "code" => code.as_str().to_string()
    )
    .increment(1);
}

/// Record a scheduled retry.
pub fn record_retry(attempt: u32) {
    counter!(
        names::RETRIES,
        "attempt" => attempt.to_string()
    )
    .increment(1);
}

/// Track the number of in-flight jobs for a partition.
pub fn job_started(partition: usize) {
    gauge!(
        names::IN_FLIGHT_JOBS,
        "partition" => partition.to_string()
    )
    .increment(1.0);
}

/// Mark a previously-started job as no longer in flight.
pub fn job_finished(partition: usize) {
    gauge!(
        names::IN_FLIGHT_JOBS,
        "partition" => partition.to_string()
    )
    .decrement(1.0);
}

/// Record a published outcome event.
pub fn record_event_published(event_type: &str) {
    counter!(
        names::EVENTS_PUBLISHED,
        "event_type" => event_type.to_string()
    )
    .increment(1);
}

/// Record a swallowed outcome-publish failure.
pub fn record_publish_failure(event_type: &str) {
    counter!(
        names::PUBLISH_FAILURES,
        "event_type" => event_type.to_string()
    )
    .increment(1);
}

/// Record an error on a partition's delivery stream.
pub fn record_consumer_error(partition: usize) {
    counter!(
        names::CONSUMER_ERRORS,
        "partition" => partition.to_string()
    )
    .increment(1);
}

/// Record a transform pass-through (no image returned, original stored).
pub fn record_pass_through() {
    counter!(names::TRANSFORM_PASS_THROUGH).increment(1);
}
