//! Worker configuration
//!
//! This module provides:
//! - `QueueDef` - type-safe constants describing a partitioned queue family
//! - `WorkerConfig` - runtime configuration for the worker

use core_config::{env_or, env_var, ConfigError};
use std::time::Duration;
use uuid::Uuid;

/// Fallback republish delay when the configured delay table is empty.
const FALLBACK_RETRY_DELAY_MS: u64 = 30_000;

/// Partitioned queue family definition (type-safe constants)
///
/// Implement this trait to define the exchange, queue, and routing-key
/// names of a partitioned workload.
///
/// # Example
///
/// ```ignore
/// struct ImageProcessingQueue;
///
/// impl QueueDef for ImageProcessingQueue {
///     const INGRESS_EXCHANGE: &'static str = "pixpro.processing";
///     const RESULTS_EXCHANGE: &'static str = "image.results";
///     const QUEUE_PREFIX: &'static str = "image.processing.partition";
///     const RETRY_QUEUE_PREFIX: &'static str = "image.processing.retry.partition";
///     const ROUTING_KEY_PREFIX: &'static str = "image.uploaded.partition";
///     const DLQ_QUEUE: &'static str = "image.processing.dlq";
/// }
/// ```
pub trait QueueDef {
    /// Topic exchange jobs are published to.
    const INGRESS_EXCHANGE: &'static str;

    /// Fan-out exchange outcome events are published to.
    const RESULTS_EXCHANGE: &'static str;

    /// Partition queue name prefix; queue `p` is `<prefix>.<p>`.
    const QUEUE_PREFIX: &'static str;

    /// Retry wait queue name prefix; queue `p` is `<prefix>.<p>`.
    const RETRY_QUEUE_PREFIX: &'static str;

    /// Ingress routing key prefix; partition `p` binds `<prefix>.<p>`.
    const ROUTING_KEY_PREFIX: &'static str;

    /// Dead letter queue name.
    const DLQ_QUEUE: &'static str;

    /// Number of partitions (default: 3).
    const PARTITION_COUNT: usize = 3;

    /// Per-consumer prefetch bound (default: 1).
    const PREFETCH_COUNT: u16 = 1;
}

/// Configuration for the partitioned worker
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Unique worker ID (auto-generated if not provided)
    pub worker_id: String,

    /// Number of partition queues consumed in parallel
    pub partition_count: usize,

    /// Broker-side unacked-message bound per consumer (the back-pressure knob)
    pub prefetch_count: u16,

    /// Maximum scheduled retries before a retryable failure is dead-lettered
    pub max_retries: u32,

    /// Per-attempt republish delays in milliseconds; the last entry is sticky
    pub retry_delays_ms: Vec<u64>,

    /// Wall-clock cap on a single job's processing in milliseconds
    pub processing_deadline_ms: u64,

    /// Grace period in seconds for in-flight jobs during shutdown
    pub drain_grace_secs: u64,

    /// Topic exchange jobs arrive through
    pub ingress_exchange: String,

    /// Fan-out exchange outcome events are published to
    pub results_exchange: String,

    /// Partition queue name prefix
    pub queue_prefix: String,

    /// Retry wait queue name prefix
    pub retry_queue_prefix: String,

    /// Ingress routing key prefix
    pub routing_key_prefix: String,

    /// Dead letter queue name
    pub dlq_queue: String,
}

impl WorkerConfig {
    /// Create a new WorkerConfig from a QueueDef
    pub fn from_queue_def<Q: QueueDef>() -> Self {
        Self {
            worker_id: format!("worker-{}", Uuid::new_v4()),
            partition_count: Q::PARTITION_COUNT,
            prefetch_count: Q::PREFETCH_COUNT,
            max_retries: 3,
            retry_delays_ms: vec![5_000, 15_000, 30_000],
            processing_deadline_ms: 60_000,
            drain_grace_secs: 5,
            ingress_exchange: Q::INGRESS_EXCHANGE.to_string(),
            results_exchange: Q::RESULTS_EXCHANGE.to_string(),
            queue_prefix: Q::QUEUE_PREFIX.to_string(),
            retry_queue_prefix: Q::RETRY_QUEUE_PREFIX.to_string(),
            routing_key_prefix: Q::ROUTING_KEY_PREFIX.to_string(),
            dlq_queue: Q::DLQ_QUEUE.to_string(),
        }
    }

    /// Apply environment overrides:
    ///
    /// - `WORKER_ID`
    /// - `PARTITION_COUNT`
    /// - `PREFETCH_COUNT`
    /// - `MAX_RETRIES`
    /// - `RETRY_DELAY_1`, `RETRY_DELAY_2`, ... (contiguous from 1)
    /// - `PROCESSING_TIMEOUT_MS`
    /// - `DRAIN_GRACE_SECS`
    pub fn with_env_overrides(mut self) -> Result<Self, ConfigError> {
        if let Some(worker_id) = env_var("WORKER_ID")? {
            self.worker_id = worker_id;
        }
        self.partition_count = env_or("PARTITION_COUNT", self.partition_count)?;
        self.prefetch_count = env_or("PREFETCH_COUNT", self.prefetch_count)?;
        self.max_retries = env_or("MAX_RETRIES", self.max_retries)?;
        self.processing_deadline_ms =
            env_or("PROCESSING_TIMEOUT_MS", self.processing_deadline_ms)?;
        self.drain_grace_secs = env_or("DRAIN_GRACE_SECS", self.drain_grace_secs)?;

        let mut delays = Vec::new();
        for i in 1.. {
            match env_var::<u64>(&format!("RETRY_DELAY_{}", i))? {
                Some(delay) => delays.push(delay),
                None => break,
            }
        }
        if !delays.is_empty() {
            self.retry_delays_ms = delays;
        }

        Ok(self)
    }

    /// Set the worker ID
    pub fn with_worker_id(mut self, id: impl Into<String>) -> Self {
        self.worker_id = id.into();
        self
    }

    /// Set the partition count
    pub fn with_partition_count(mut self, count: usize) -> Self {
        self.partition_count = count.max(1);
        self
    }

    /// Set the prefetch bound
    pub fn with_prefetch_count(mut self, count: u16) -> Self {
        self.prefetch_count = count.max(1);
        self
    }

    /// Set the retry budget
    pub fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Set the republish delay table
    pub fn with_retry_delays_ms(mut self, delays: Vec<u64>) -> Self {
        self.retry_delays_ms = delays;
        self
    }

    /// Set the processing deadline
    pub fn with_processing_deadline_ms(mut self, deadline_ms: u64) -> Self {
        self.processing_deadline_ms = deadline_ms;
        self
    }

    /// Set the drain grace period
    pub fn with_drain_grace_secs(mut self, secs: u64) -> Self {
        self.drain_grace_secs = secs;
        self
    }

    /// Queue name for a partition
    pub fn partition_queue(&self, partition: usize) -> String {
        format!("{}.{}", self.queue_prefix, partition)
    }

    /// Retry wait queue name for a partition
    pub fn retry_queue(&self, partition: usize) -> String {
        format!("{}.{}", self.retry_queue_prefix, partition)
    }

    /// Ingress routing key for a partition
    pub fn ingress_routing_key(&self, partition: usize) -> String {
        format!("{}.{}", self.routing_key_prefix, partition)
    }

    /// The processing deadline as a Duration
    pub fn processing_deadline(&self) -> Duration {
        Duration::from_millis(self.processing_deadline_ms)
    }

    /// Republish delay for a retry attempt.
    ///
    /// Attempt `k` (1-based) uses `retry_delays_ms[k - 1]`; attempts past
    /// the end of the table use the last entry. An empty table falls back
    /// to a fixed delay rather than failing the republish.
    pub fn retry_delay_ms(&self, new_retry_count: u32) -> u64 {
        if self.retry_delays_ms.is_empty() {
            return FALLBACK_RETRY_DELAY_MS;
        }
        let index = (new_retry_count.max(1) - 1) as usize;
        self.retry_delays_ms[index.min(self.retry_delays_ms.len() - 1)]
    }
}
