//! Delay-scheduled republish of retryable jobs.
//!
//! The delay is broker-side: each partition has a consumer-less wait queue
//! whose dead-letter exchange is the ingress exchange and whose dead-letter
//! routing key is the partition's ingress routing key. Publishing there with
//! a per-message TTL re-delivers the job to the same partition after the
//! delay, with no in-process timer to lose on a crash. The caller may ack
//! the original as soon as this publish returns.

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use lapin::options::BasicPublishOptions;
use lapin::types::{AMQPValue, FieldTable};
use lapin::{BasicProperties, Channel};
use tracing::debug;

/// Schedules retries by republishing through the partition's wait queue.
pub struct RetryScheduler {
    channel: Channel,
    config: WorkerConfig,
}

impl RetryScheduler {
    /// Create a scheduler that owns a dedicated publish channel.
    pub fn new(channel: Channel, config: WorkerConfig) -> Self {
        Self { channel, config }
    }

    /// Republish the original payload to partition `partition` after the
    /// delay for attempt `new_retry_count`.
    ///
    /// The payload is forwarded verbatim; only the `x-partition` and
    /// `x-retry-count` headers are rewritten. Returns the chosen delay.
    pub async fn schedule_republish(
        &self,
        payload: &[u8],
        partition: usize,
        new_retry_count: u32,
    ) -> Result<u64, WorkerError> {
        let delay_ms = self.config.retry_delay_ms(new_retry_count);

        let mut headers = FieldTable::default();
        headers.insert("x-partition".into(), AMQPValue::LongInt(partition as i32));
        headers.insert(
            "x-retry-count".into(),
            AMQPValue::LongInt(new_retry_count as i32),
        );

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2) // persistent
            .with_expiration(delay_ms.to_string().into())
            .with_headers(headers);

        self.channel
            .basic_publish(
                "",
                &self.config.retry_queue(partition),
                BasicPublishOptions::default(),
                payload,
                properties,
            )
            .await?
            .await?;

        debug!(
            partition = partition,
            retry_count = new_retry_count,
            delay_ms = delay_ms,
            "Scheduled republish through retry queue"
        );

        Ok(delay_ms)
    }
}
