//! Queue definitions for the image processing domain.

use bus_worker::QueueDef;

/// The image processing queue family.
///
/// Jobs are published to the `pixpro.processing` topic exchange with
/// routing key `image.uploaded.partition.<p>` and land on
/// `image.processing.partition.<p>`. Outcome events fan out through
/// `image.results`.
pub struct ImageProcessingQueue;

impl QueueDef for ImageProcessingQueue {
    /// Ingress topic exchange.
    const INGRESS_EXCHANGE: &'static str = "pixpro.processing";

    /// Outcome fan-out exchange.
    const RESULTS_EXCHANGE: &'static str = "image.results";

    /// Partition queues.
    const QUEUE_PREFIX: &'static str = "image.processing.partition";

    /// Retry wait queues (no consumers; TTL routes back to ingress).
    const RETRY_QUEUE_PREFIX: &'static str = "image.processing.retry.partition";

    /// Ingress routing keys.
    const ROUTING_KEY_PREFIX: &'static str = "image.uploaded.partition";

    /// Dead letter queue for permanently-failed jobs.
    const DLQ_QUEUE: &'static str = "image.processing.dlq";
}

#[cfg(test)]
mod tests {
    use super::*;
    use bus_worker::WorkerConfig;

    #[test]
    fn test_image_queue_names() {
        let config = WorkerConfig::from_queue_def::<ImageProcessingQueue>();

        assert_eq!(config.ingress_exchange, "pixpro.processing");
        assert_eq!(config.results_exchange, "image.results");
        assert_eq!(config.partition_queue(1), "image.processing.partition.1");
        assert_eq!(config.retry_queue(1), "image.processing.retry.partition.1");
        assert_eq!(config.ingress_routing_key(1), "image.uploaded.partition.1");
        assert_eq!(config.dlq_queue, "image.processing.dlq");
        assert_eq!(config.partition_count, 3);
        assert_eq!(config.prefetch_count, 1);
    }
}
