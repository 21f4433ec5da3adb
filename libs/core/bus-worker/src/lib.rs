//! Bus Worker - Generic AMQP Partitioned-Queue Worker Library
//!
//! A reusable library for building RabbitMQ workers with:
//! - Parallel consumption from N partition queues with per-consumer prefetch
//! - Delay-scheduled retries that preserve partition affinity
//! - Dead letter routing when retries are exhausted or an error is terminal
//! - Fault classification into a closed, stable error-code taxonomy
//! - Wall-clock deadline around each job's processing
//! - Outcome events published to a fan-out results exchange
//! - Graceful shutdown with a drain grace period
//! - Health check endpoints for Kubernetes probes
//! - Prometheus metrics
//!
//! # Architecture
//!
//! ```text
//! Ingress exchange (topic)
//!   ↓ (routing key <prefix>.<p>)
//! Partition queue <p>  ──nack──▶  DLX ──▶ DLQ
//!   ↓ (prefetch Q, manual ack)
//! BusWorker<J, P, O>
//!   ↓ (deadline + classify)
//! JobProcessor<J>
//!   ↓ (on retryable failure)
//! Retry wait queue <p>  ──TTL──▶  back to ingress exchange
//!   ↓ (on terminal outcome)
//! Results exchange (fanout)
//! ```
//!
//! # Example Usage
//!
//! ```rust,ignore
//! use bus_worker::{BusWorker, JobProcessor, QueueJob, WorkerConfig};
//!
//! // 1. Define your job payload
//! #[derive(Clone, Serialize, Deserialize)]
//! struct MyJob {
//!     id: String,
//! }
//!
//! impl QueueJob for MyJob {
//!     fn job_id(&self) -> String { self.id.clone() }
//! }
//!
//! // 2. Define your processor
//! struct MyProcessor;
//!
//! #[async_trait]
//! impl JobProcessor<MyJob> for MyProcessor {
//!     type Output = ();
//!     async fn process(&self, job: &MyJob, ctx: &JobContext) -> Result<(), WorkerError> {
//!         // Process the job
//!         Ok(())
//!     }
//!     fn name(&self) -> &'static str { "MyProcessor" }
//! }
//!
//! // 3. Run the worker
//! let config = WorkerConfig::from_queue_def::<MyQueue>();
//! let worker = BusWorker::new(connection, config, processor, outcomes).await?;
//! worker.run(shutdown_rx).await?;
//! ```

mod config;
mod connection;
mod consumer;
mod deadline;
mod delivery;
mod envelope;
mod error;
mod health;
pub mod metrics;
mod publisher;
mod retry;
mod worker;

// Re-export all public types
pub use config::{QueueDef, WorkerConfig};
pub use connection::{connect_with_retry, declare_topology};
pub use deadline::run_with_deadline;
pub use delivery::DeliveryContext;
pub use envelope::{new_event_id, EventEnvelope};
pub use error::{ErrorCode, Fault, WorkerError};
pub use health::{health_handler, health_router, metrics_handler, HealthState};
pub use publisher::ResultsPublisher;
pub use retry::RetryScheduler;
pub use worker::{BusWorker, JobContext, JobProcessor, OutcomePublisher, PhaseRecorder, QueueJob};

/// Result type alias for worker operations.
pub type WorkerResult<T> = Result<T, WorkerError>;
