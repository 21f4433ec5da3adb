//! Outcome event publisher.
//!
//! Wraps payloads in an `EventEnvelope` and publishes them, persistent, to
//! the durable fan-out results exchange.

use crate::envelope::EventEnvelope;
use crate::error::WorkerError;
use crate::metrics;
use lapin::options::BasicPublishOptions;
use lapin::{BasicProperties, Channel};
use serde::Serialize;
use tracing::debug;

/// Publisher for the results exchange.
///
/// Owns a dedicated channel; safe to share behind an `Arc` across
/// partition workers.
pub struct ResultsPublisher {
    channel: Channel,
    exchange: String,
}

impl ResultsPublisher {
    pub fn new(channel: Channel, exchange: impl Into<String>) -> Self {
        Self {
            channel,
            exchange: exchange.into(),
        }
    }

    /// Get the exchange name.
    pub fn exchange(&self) -> &str {
        &self.exchange
    }

    /// Publish an event and return its generated event id.
    pub async fn publish<T: Serialize>(
        &self,
        event_type: &str,
        payload: &T,
    ) -> Result<String, WorkerError> {
        let envelope = EventEnvelope::new(event_type, payload);
        let body = serde_json::to_vec(&envelope)?;

        let properties = BasicProperties::default()
            .with_content_type("application/json".into())
            .with_delivery_mode(2) // persistent
            .with_message_id(envelope.event_id.as_str().into());

        self.channel
            .basic_publish(
                &self.exchange,
                "",
                BasicPublishOptions::default(),
                &body,
                properties,
            )
            .await?
            .await?;

        metrics::record_event_published(event_type);

        debug!(
            exchange = %self.exchange,
            event_type = event_type,
            event_id = %envelope.event_id,
            "Published outcome event"
        );

        Ok(envelope.event_id)
    }
}
