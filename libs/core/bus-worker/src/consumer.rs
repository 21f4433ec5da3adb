//! Per-partition consumer loop and the per-message state machine.
//!
//! Exactly one of ack / nack(requeue=false) is issued for every received
//! delivery. Nacked messages reach the DLQ through the queue's dead-letter
//! exchange. Retryable failures under the retry budget are republished
//! through the partition's wait queue before the original is acked, so a
//! crash between the two cannot lose the job.

use crate::config::WorkerConfig;
use crate::deadline::run_with_deadline;
use crate::delivery::DeliveryContext;
use crate::envelope::EventEnvelope;
use crate::error::WorkerError;
use crate::metrics::{self, JobStatus};
use crate::retry::RetryScheduler;
use crate::worker::{JobContext, JobProcessor, OutcomePublisher, PhaseRecorder, QueueJob};
use futures::StreamExt;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicCancelOptions, BasicConsumeOptions, BasicNackOptions};
use lapin::types::FieldTable;
use lapin::Channel;
use std::marker::PhantomData;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

/// Consumer for one partition queue.
pub(crate) struct PartitionConsumer<J, P, O>
where
    J: QueueJob,
    P: JobProcessor<J> + 'static,
    O: OutcomePublisher<J, P::Output> + 'static,
{
    partition: usize,
    channel: Channel,
    handler: MessageHandler<J, P, O>,
    config: WorkerConfig,
}

impl<J, P, O> PartitionConsumer<J, P, O>
where
    J: QueueJob,
    P: JobProcessor<J> + 'static,
    O: OutcomePublisher<J, P::Output> + 'static,
{
    pub(crate) fn new(
        partition: usize,
        channel: Channel,
        config: WorkerConfig,
        processor: Arc<P>,
        outcomes: Arc<O>,
        scheduler: Arc<RetryScheduler>,
    ) -> Self {
        let handler = MessageHandler {
            partition,
            config: config.clone(),
            processor,
            outcomes,
            scheduler,
            _phantom: PhantomData,
        };

        Self {
            partition,
            channel,
            handler,
            config,
        }
    }

    /// Consume deliveries until shutdown, then drain.
    ///
    /// Handlers are spawned per delivery; the broker's prefetch window
    /// already bounds how many unacked deliveries exist at once, so the
    /// spawn itself needs no extra gate.
    pub(crate) async fn run(self, mut shutdown: watch::Receiver<bool>) -> Result<(), WorkerError> {
        let queue = self.config.partition_queue(self.partition);
        let consumer_tag = format!("{}-p{}", self.config.worker_id, self.partition);

        let mut deliveries = self
            .channel
            .basic_consume(
                &queue,
                &consumer_tag,
                BasicConsumeOptions::default(),
                FieldTable::default(),
            )
            .await?;

        info!(
            partition = self.partition,
            queue = %queue,
            consumer_tag = %consumer_tag,
            "Partition consumer registered"
        );

        let mut in_flight: JoinSet<()> = JoinSet::new();
        let mut stream_error = None;

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!(partition = self.partition, "Received shutdown signal, stopping consumer");
                        break;
                    }
                }
                next = deliveries.next() => match next {
                    Some(Ok(delivery)) => {
                        // Reap finished handlers so the set stays small
                        while in_flight.try_join_next().is_some() {}

                        let handler = self.handler.clone();
                        in_flight.spawn(async move { handler.handle(delivery).await });
                    }
                    Some(Err(e)) => {
                        error!(partition = self.partition, error = %e, "Delivery stream error");
                        metrics::record_consumer_error(self.partition);
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                    None => {
                        // Not a shutdown: the broker closed our consumer
                        error!(partition = self.partition, "Delivery stream closed unexpectedly");
                        metrics::record_consumer_error(self.partition);
                        stream_error = Some(WorkerError::Internal(format!(
                            "delivery stream for partition {} closed unexpectedly",
                            self.partition
                        )));
                        break;
                    }
                }
            }
        }

        // Stop new deliveries, then give in-flight pipelines the grace
        // period to reach an ack/nack.
        if let Err(e) = self
            .channel
            .basic_cancel(&consumer_tag, BasicCancelOptions::default())
            .await
        {
            warn!(partition = self.partition, error = %e, "Failed to cancel consumer");
        }

        let grace = Duration::from_secs(self.config.drain_grace_secs);
        let drained = tokio::time::timeout(grace, async {
            while in_flight.join_next().await.is_some() {}
        })
        .await
        .is_ok();

        if !drained {
            warn!(
                partition = self.partition,
                grace_secs = self.config.drain_grace_secs,
                "In-flight jobs still running after drain grace period"
            );
        }

        if let Err(e) = self.channel.close(200, "consumer stopped").await {
            warn!(partition = self.partition, error = %e, "Failed to close channel");
        }

        info!(partition = self.partition, "Partition consumer stopped");
        match stream_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Shared per-delivery handling; cheap to clone into spawned tasks.
struct MessageHandler<J, P, O>
where
    J: QueueJob,
    P: JobProcessor<J> + 'static,
    O: OutcomePublisher<J, P::Output> + 'static,
{
    partition: usize,
    config: WorkerConfig,
    processor: Arc<P>,
    outcomes: Arc<O>,
    scheduler: Arc<RetryScheduler>,
    _phantom: PhantomData<fn() -> J>,
}

impl<J, P, O> Clone for MessageHandler<J, P, O>
where
    J: QueueJob,
    P: JobProcessor<J> + 'static,
    O: OutcomePublisher<J, P::Output> + 'static,
{
    fn clone(&self) -> Self {
        Self {
            partition: self.partition,
            config: self.config.clone(),
            processor: Arc::clone(&self.processor),
            outcomes: Arc::clone(&self.outcomes),
            scheduler: Arc::clone(&self.scheduler),
            _phantom: PhantomData,
        }
    }
}

impl<J, P, O> MessageHandler<J, P, O>
where
    J: QueueJob,
    P: JobProcessor<J> + 'static,
    O: OutcomePublisher<J, P::Output> + 'static,
{
    async fn handle(&self, delivery: Delivery) {
        let ctx = DeliveryContext::from_delivery(&delivery, self.partition);

        metrics::job_started(self.partition);
        self.handle_inner(&delivery, &ctx).await;
        metrics::job_finished(self.partition);
    }

    async fn handle_inner(&self, delivery: &Delivery, ctx: &DeliveryContext) {
        // A retry counter past the budget means the retry protocol was
        // already exhausted elsewhere; route straight to the DLQ.
        if ctx.retry_count > self.config.max_retries {
            warn!(
                partition = self.partition,
                retry_count = ctx.retry_count,
                max_retries = self.config.max_retries,
                "Retry budget exceeded on arrival, dead-lettering without execution"
            );
            metrics::record_job_processed(self.partition, JobStatus::Dlq);
            self.nack(delivery).await;
            return;
        }

        let envelope: EventEnvelope<J> = match serde_json::from_slice(&delivery.data) {
            Ok(envelope) => envelope,
            Err(e) => {
                let err = WorkerError::MalformedMessage(e.to_string());
                let fault = err.classify();
                warn!(
                    partition = self.partition,
                    error = %e,
                    "Failed to decode message payload, dead-lettering"
                );
                metrics::record_error(fault.code);
                self.emit_failure(None, fault, &err, ctx.retry_count).await;
                metrics::record_job_processed(self.partition, JobStatus::Dlq);
                self.nack(delivery).await;
                return;
            }
        };

        let job = envelope.payload;
        let timings = Arc::new(PhaseRecorder::new(self.processor.phases()));
        let job_ctx = JobContext {
            partition: ctx.partition,
            retry_count: ctx.retry_count,
            event_id: Some(envelope.event_id.clone()),
            timings: Arc::clone(&timings),
        };

        debug!(
            job_id = %job.job_id(),
            partition = self.partition,
            retry_count = ctx.retry_count,
            event_id = %envelope.event_id,
            "Processing job"
        );

        let started = Instant::now();
        let result = run_with_deadline(
            self.config.processing_deadline(),
            self.processor.process(&job, &job_ctx),
        )
        .await;

        for (phase, elapsed_ms) in timings.snapshot() {
            metrics::record_phase_duration(phase, elapsed_ms);
        }

        match result {
            Ok(output) => {
                metrics::record_job_processed(self.partition, JobStatus::Success);
                metrics::record_job_duration(self.partition, started.elapsed());

                if let Err(e) = self.outcomes.publish_success(&job, &output, &job_ctx).await {
                    error!(job_id = %job.job_id(), error = %e, "Failed to publish success event");
                    metrics::record_publish_failure("success");
                }

                self.ack(delivery).await;

                info!(
                    job_id = %job.job_id(),
                    partition = self.partition,
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    "Job processed"
                );
            }
            Err(err) => {
                let fault = err.classify();
                metrics::record_error(fault.code);

                warn!(
                    job_id = %job.job_id(),
                    partition = self.partition,
                    retry_count = ctx.retry_count,
                    code = %fault.code,
                    retryable = fault.retryable,
                    failure_phase = timings.failure_phase(),
                    error = %err,
                    "Job processing failed"
                );

                if fault.retryable && ctx.retry_count < self.config.max_retries {
                    self.retry(delivery, &job, ctx, fault, &err).await;
                } else {
                    self.emit_failure(Some(&job), fault, &err, ctx.retry_count).await;
                    metrics::record_job_processed(self.partition, JobStatus::Dlq);
                    self.nack(delivery).await;
                }
            }
        }
    }

    /// Schedule a republish, then ack the original. If the republish
    /// itself fails the message goes to the DLQ instead of being acked,
    /// so the job is never dropped.
    async fn retry(
        &self,
        delivery: &Delivery,
        job: &J,
        ctx: &DeliveryContext,
        fault: crate::error::Fault,
        err: &WorkerError,
    ) {
        let next_retry = ctx.retry_count + 1;

        match self
            .scheduler
            .schedule_republish(&delivery.data, ctx.partition, next_retry)
            .await
        {
            Ok(delay_ms) => {
                metrics::record_retry(next_retry);
                metrics::record_job_processed(self.partition, JobStatus::Retried);

                info!(
                    job_id = %job.job_id(),
                    partition = self.partition,
                    retry_count = next_retry,
                    delay_ms = delay_ms,
                    "Scheduled retry"
                );

                self.ack(delivery).await;
            }
            Err(republish_err) => {
                error!(
                    job_id = %job.job_id(),
                    error = %republish_err,
                    "Failed to schedule retry, dead-lettering"
                );
                self.emit_failure(Some(job), fault, err, ctx.retry_count).await;
                metrics::record_job_processed(self.partition, JobStatus::Dlq);
                self.nack(delivery).await;
            }
        }
    }

    /// Publish a failure event. Publish errors are logged and counted but
    /// never keep the message from being acked or nacked.
    async fn emit_failure(
        &self,
        job: Option<&J>,
        fault: crate::error::Fault,
        err: &WorkerError,
        retry_count: u32,
    ) {
        if let Err(e) = self
            .outcomes
            .publish_failure(job, fault, &err.to_string(), retry_count)
            .await
        {
            error!(error = %e, "Failed to publish failure event");
            metrics::record_publish_failure("failure");
        }
    }

    async fn ack(&self, delivery: &Delivery) {
        if let Err(e) = delivery.ack(BasicAckOptions::default()).await {
            error!(
                partition = self.partition,
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "Failed to ack message"
            );
        }
    }

    async fn nack(&self, delivery: &Delivery) {
        let options = BasicNackOptions {
            requeue: false,
            ..Default::default()
        };
        if let Err(e) = delivery.nack(options).await {
            error!(
                partition = self.partition,
                delivery_tag = delivery.delivery_tag,
                error = %e,
                "Failed to nack message"
            );
        }
    }
}
