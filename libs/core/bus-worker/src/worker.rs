//! Core worker traits and the generic BusWorker implementation.
//!
//! This module provides:
//! - `QueueJob` trait for job payloads
//! - `JobProcessor` trait for job processors
//! - `OutcomePublisher` trait for terminal-event emission
//! - `PhaseRecorder` for per-phase timing capture
//! - `BusWorker` struct that runs one consumer per partition

use crate::config::WorkerConfig;
use crate::consumer::PartitionConsumer;
use crate::error::{Fault, WorkerError};
use crate::retry::RetryScheduler;
use async_trait::async_trait;
use lapin::options::BasicQosOptions;
use lapin::Connection;
use serde::{de::DeserializeOwned, Serialize};
use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{error, info};

/// Trait for queue job payloads.
///
/// The retry counter and partition live in message headers, not in the
/// payload, so the payload only needs to identify itself for logging and
/// outcome events.
pub trait QueueJob: Serialize + DeserializeOwned + Send + Sync + Clone + 'static {
    /// Returns the job ID for logging and tracking.
    fn job_id(&self) -> String;
}

/// Records elapsed milliseconds per pipeline phase.
///
/// Shared between the worker and the processor through an `Arc` so that
/// timings recorded before a deadline expiry survive the cancelled attempt.
/// Each phase is recorded at most once, in execution order.
pub struct PhaseRecorder {
    phases: &'static [&'static str],
    recorded: Mutex<Vec<(&'static str, u64)>>,
}

impl PhaseRecorder {
    /// Create a recorder for the given phases, in execution order.
    pub fn new(phases: &'static [&'static str]) -> Self {
        Self {
            phases,
            recorded: Mutex::new(Vec::with_capacity(phases.len())),
        }
    }

    /// Record a phase's elapsed time. The first write wins.
    pub fn record(&self, phase: &'static str, elapsed_ms: u64) {
        let mut recorded = self
            .recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !recorded.iter().any(|(name, _)| *name == phase) {
            recorded.push((phase, elapsed_ms));
        }
    }

    /// Elapsed time for one phase, if recorded.
    pub fn get(&self, phase: &str) -> Option<u64> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(name, _)| *name == phase)
            .map(|(_, elapsed)| *elapsed)
    }

    /// All recorded phases in execution order.
    pub fn snapshot(&self) -> Vec<(&'static str, u64)> {
        self.recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Sum of all recorded phase times.
    pub fn total_ms(&self) -> u64 {
        self.snapshot().iter().map(|(_, elapsed)| elapsed).sum()
    }

    /// The first declared phase with no recorded timing - the phase a
    /// failed attempt died in. `"unknown"` if every phase completed.
    pub fn failure_phase(&self) -> &'static str {
        let recorded = self
            .recorded
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        self.phases
            .iter()
            .find(|phase| !recorded.iter().any(|(name, _)| name == *phase))
            .copied()
            .unwrap_or("unknown")
    }
}

/// Per-attempt context handed to the processor.
pub struct JobContext {
    /// Partition the job was consumed from.
    pub partition: usize,

    /// Scheduled-retry counter from the delivery headers.
    pub retry_count: u32,

    /// Correlation id (the ingress envelope's event id).
    pub event_id: Option<String>,

    /// Phase timing recorder for this attempt.
    pub timings: Arc<PhaseRecorder>,
}

/// Trait for job processors.
///
/// Domain pipelines implement this trait to process jobs from the
/// partition queues.
#[async_trait]
pub trait JobProcessor<J: QueueJob>: Send + Sync {
    /// What a successful run produces (consumed by the outcome publisher).
    type Output: Send + Sync;

    /// Process a single job.
    ///
    /// Errors are classified by the worker; the classification decides
    /// between a scheduled retry and the dead letter queue.
    async fn process(&self, job: &J, ctx: &JobContext) -> Result<Self::Output, WorkerError>;

    /// Get the processor name for logging.
    fn name(&self) -> &'static str;

    /// The processor's phases in execution order, for timing capture and
    /// failure-phase attribution.
    fn phases(&self) -> &'static [&'static str] {
        &[]
    }
}

/// Trait for terminal-outcome event emission.
///
/// Implementations build the domain event payloads and publish them via a
/// `ResultsPublisher`. Publish failures never block the ack path; the
/// worker logs and counts them and moves on.
#[async_trait]
pub trait OutcomePublisher<J: QueueJob, O>: Send + Sync {
    /// Emit the success event for a processed job.
    async fn publish_success(&self, job: &J, output: &O, ctx: &JobContext)
        -> Result<(), WorkerError>;

    /// Emit the failure event for a terminally-failed delivery.
    ///
    /// `job` is `None` when the payload could not be decoded.
    async fn publish_failure(
        &self,
        job: Option<&J>,
        fault: Fault,
        error_message: &str,
        retry_count: u32,
    ) -> Result<(), WorkerError>;
}

/// Generic partitioned worker.
///
/// Spawns one consumer task per partition queue, each with its own channel
/// and prefetch window, and joins them until shutdown.
pub struct BusWorker<J, P, O>
where
    J: QueueJob,
    P: JobProcessor<J> + 'static,
    O: OutcomePublisher<J, P::Output> + 'static,
{
    connection: Arc<Connection>,
    config: WorkerConfig,
    processor: Arc<P>,
    outcomes: Arc<O>,
    scheduler: Arc<RetryScheduler>,
    _phantom: PhantomData<fn() -> J>,
}

impl<J, P, O> BusWorker<J, P, O>
where
    J: QueueJob,
    P: JobProcessor<J> + 'static,
    O: OutcomePublisher<J, P::Output> + 'static,
{
    /// Create a new worker. Opens a dedicated channel for the retry
    /// scheduler; consumer channels are opened per partition in `run`.
    pub async fn new(
        connection: Arc<Connection>,
        config: WorkerConfig,
        processor: P,
        outcomes: O,
    ) -> Result<Self, WorkerError> {
        let retry_channel = connection.create_channel().await?;
        let scheduler = Arc::new(RetryScheduler::new(retry_channel, config.clone()));

        Ok(Self {
            connection,
            config,
            processor: Arc::new(processor),
            outcomes: Arc::new(outcomes),
            scheduler,
            _phantom: PhantomData,
        })
    }

    /// Run consumers for every partition until the shutdown signal fires,
    /// then drain in-flight work within the grace period.
    pub async fn run(&self, shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        info!(
            worker_id = %self.config.worker_id,
            partitions = self.config.partition_count,
            prefetch = self.config.prefetch_count,
            max_retries = self.config.max_retries,
            deadline_ms = self.config.processing_deadline_ms,
            processor = %self.processor.name(),
            "Starting partitioned worker"
        );

        let mut partitions: JoinSet<(usize, Result<(), WorkerError>)> = JoinSet::new();

        for partition in 0..self.config.partition_count {
            let channel = self.connection.create_channel().await?;
            channel
                .basic_qos(self.config.prefetch_count, BasicQosOptions::default())
                .await?;

            let consumer = PartitionConsumer::new(
                partition,
                channel,
                self.config.clone(),
                Arc::clone(&self.processor),
                Arc::clone(&self.outcomes),
                Arc::clone(&self.scheduler),
            );
            let shutdown = shutdown.clone();

            partitions.spawn(async move { (partition, consumer.run(shutdown).await) });
        }

        let mut failed = 0usize;
        while let Some(joined) = partitions.join_next().await {
            match joined {
                Ok((_, Ok(()))) => {}
                Ok((partition, Err(e))) => {
                    error!(partition = partition, error = %e, "Partition consumer failed");
                    failed += 1;
                }
                Err(e) => {
                    error!(error = %e, "Partition consumer task panicked");
                    failed += 1;
                }
            }
        }

        info!("All partition consumers stopped");
        if failed > 0 {
            return Err(WorkerError::Internal(format!(
                "{} partition consumer(s) stopped abnormally",
                failed
            )));
        }
        Ok(())
    }
}
