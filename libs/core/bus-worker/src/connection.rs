//! Broker connection and topology declaration.

use crate::config::WorkerConfig;
use crate::error::WorkerError;
use core_config::amqp::AmqpConfig;
use lapin::options::{ExchangeDeclareOptions, QueueBindOptions, QueueDeclareOptions};
use lapin::types::{AMQPValue, FieldTable};
use lapin::{Connection, ConnectionProperties, ExchangeKind};
use std::time::Duration;
use tracing::{info, warn};

/// Connect to the broker with a bounded number of attempts.
///
/// On final failure the error is returned so the supervisor can exit and
/// let the orchestrator restart the worker.
pub async fn connect_with_retry(config: &AmqpConfig) -> Result<Connection, WorkerError> {
    let mut attempt = 1;
    loop {
        match Connection::connect(&config.url, ConnectionProperties::default()).await {
            Ok(connection) => {
                info!(attempt = attempt, "Connected to RabbitMQ");
                return Ok(connection);
            }
            Err(e) if attempt < config.connect_attempts => {
                warn!(
                    attempt = attempt,
                    max_attempts = config.connect_attempts,
                    retry_in_secs = config.connect_retry_secs,
                    error = %e,
                    "RabbitMQ connection failed, retrying"
                );
                tokio::time::sleep(Duration::from_secs(config.connect_retry_secs)).await;
                attempt += 1;
            }
            Err(e) => return Err(WorkerError::Broker(e)),
        }
    }
}

/// Declare the worker's topology (idempotent):
///
/// - the ingress topic exchange and the results fan-out exchange
/// - the dead-letter exchange and its DLQ
/// - one durable queue per partition, bound to its ingress routing key,
///   dead-lettering to the DLX, with the configured message TTL
/// - one consumer-less retry wait queue per partition, whose expired
///   messages dead-letter back to the ingress exchange with the
///   partition's routing key
pub async fn declare_topology(
    connection: &Connection,
    worker: &WorkerConfig,
    amqp: &AmqpConfig,
) -> Result<(), WorkerError> {
    let channel = connection.create_channel().await?;

    let durable = ExchangeDeclareOptions {
        durable: true,
        ..Default::default()
    };

    channel
        .exchange_declare(
            &worker.ingress_exchange,
            ExchangeKind::Topic,
            durable,
            FieldTable::default(),
        )
        .await?;
    channel
        .exchange_declare(
            &worker.results_exchange,
            ExchangeKind::Fanout,
            durable,
            FieldTable::default(),
        )
        .await?;
    channel
        .exchange_declare(
            &amqp.dlx_exchange,
            ExchangeKind::Fanout,
            durable,
            FieldTable::default(),
        )
        .await?;

    let durable_queue = QueueDeclareOptions {
        durable: true,
        ..Default::default()
    };

    channel
        .queue_declare(&worker.dlq_queue, durable_queue, FieldTable::default())
        .await?;
    channel
        .queue_bind(
            &worker.dlq_queue,
            &amqp.dlx_exchange,
            "#",
            QueueBindOptions::default(),
            FieldTable::default(),
        )
        .await?;

    for partition in 0..worker.partition_count {
        let queue = worker.partition_queue(partition);
        let routing_key = worker.ingress_routing_key(partition);

        let mut arguments = FieldTable::default();
        arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(amqp.dlx_exchange.clone().into()),
        );
        arguments.insert(
            "x-message-ttl".into(),
            AMQPValue::LongInt(amqp.message_ttl_ms as i32),
        );

        channel.queue_declare(&queue, durable_queue, arguments).await?;
        channel
            .queue_bind(
                &queue,
                &worker.ingress_exchange,
                &routing_key,
                QueueBindOptions::default(),
                FieldTable::default(),
            )
            .await?;

        let mut retry_arguments = FieldTable::default();
        retry_arguments.insert(
            "x-dead-letter-exchange".into(),
            AMQPValue::LongString(worker.ingress_exchange.clone().into()),
        );
        retry_arguments.insert(
            "x-dead-letter-routing-key".into(),
            AMQPValue::LongString(routing_key.into()),
        );

        channel
            .queue_declare(&worker.retry_queue(partition), durable_queue, retry_arguments)
            .await?;
    }

    info!(
        ingress_exchange = %worker.ingress_exchange,
        results_exchange = %worker.results_exchange,
        dlx_exchange = %amqp.dlx_exchange,
        partitions = worker.partition_count,
        "Declared queue topology"
    );

    channel.close(200, "topology declared").await?;
    Ok(())
}
