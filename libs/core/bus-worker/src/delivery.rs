//! Per-delivery context extracted from AMQP metadata.

use lapin::message::Delivery;
use lapin::types::{AMQPValue, FieldTable};
use lapin::BasicProperties;

/// Metadata for one received message.
#[derive(Debug, Clone)]
pub struct DeliveryContext {
    /// Partition index, from the `x-partition` header or the consuming queue.
    pub partition: usize,

    /// Scheduled-retry counter, from the `x-retry-count` header (default 0).
    pub retry_count: u32,

    /// Broker-assigned handle for ack/nack.
    pub delivery_tag: u64,

    /// Producer-assigned message id, if any.
    pub message_id: Option<String>,

    /// Correlation id, if any.
    pub correlation_id: Option<String>,

    /// Broker timestamp, if any.
    pub timestamp: Option<u64>,
}

impl DeliveryContext {
    pub fn from_delivery(delivery: &Delivery, consumer_partition: usize) -> Self {
        Self::from_properties(&delivery.properties, delivery.delivery_tag, consumer_partition)
    }

    pub fn from_properties(
        properties: &BasicProperties,
        delivery_tag: u64,
        consumer_partition: usize,
    ) -> Self {
        let headers = properties.headers().as_ref();

        let partition = headers
            .and_then(|table| header_u64(table, "x-partition"))
            .map(|value| value as usize)
            .unwrap_or(consumer_partition);

        let retry_count = headers
            .and_then(|table| header_u64(table, "x-retry-count"))
            .unwrap_or(0) as u32;

        Self {
            partition,
            retry_count,
            delivery_tag,
            message_id: properties.message_id().as_ref().map(|s| s.to_string()),
            correlation_id: properties.correlation_id().as_ref().map(|s| s.to_string()),
            timestamp: *properties.timestamp(),
        }
    }
}

/// Read a numeric header, tolerating the integer widths and string
/// encodings different publishers use.
fn header_u64(table: &FieldTable, key: &str) -> Option<u64> {
    let value = table
        .inner()
        .iter()
        .find(|(name, _)| name.as_str() == key)
        .map(|(_, value)| value)?;

    match value {
        AMQPValue::ShortShortInt(v) => u64::try_from(*v).ok(),
        AMQPValue::ShortShortUInt(v) => Some(u64::from(*v)),
        AMQPValue::ShortInt(v) => u64::try_from(*v).ok(),
        AMQPValue::ShortUInt(v) => Some(u64::from(*v)),
        AMQPValue::LongInt(v) => u64::try_from(*v).ok(),
        AMQPValue::LongUInt(v) => Some(u64::from(*v)),
        AMQPValue::LongLongInt(v) => u64::try_from(*v).ok(),
        AMQPValue::LongString(v) => std::str::from_utf8(v.as_bytes()).ok()?.parse().ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn headers(entries: &[(&str, AMQPValue)]) -> FieldTable {
        let mut table = FieldTable::default();
        for (key, value) in entries {
            table.insert((*key).into(), value.clone());
        }
        table
    }

    #[test]
    fn test_context_from_headers() {
        let properties = BasicProperties::default().with_headers(headers(&[
            ("x-partition", AMQPValue::LongInt(2)),
            ("x-retry-count", AMQPValue::LongInt(1)),
        ]));

        let ctx = DeliveryContext::from_properties(&properties, 0, 0);
        assert_eq!(ctx.partition, 2);
        assert_eq!(ctx.retry_count, 1);
    }

    #[test]
    fn test_context_defaults() {
        let properties = BasicProperties::default();

        let ctx = DeliveryContext::from_properties(&properties, 42, 1);
        // Partition falls back to the consuming queue's index
        assert_eq!(ctx.partition, 1);
        assert_eq!(ctx.retry_count, 0);
        assert_eq!(ctx.delivery_tag, 42);
        assert!(ctx.message_id.is_none());
        assert!(ctx.correlation_id.is_none());
    }

    #[test]
    fn test_context_tolerates_header_encodings() {
        for value in [
            AMQPValue::ShortShortUInt(2),
            AMQPValue::ShortInt(2),
            AMQPValue::LongUInt(2),
            AMQPValue::LongLongInt(2),
            AMQPValue::LongString("2".into()),
        ] {
            let properties =
                BasicProperties::default().with_headers(headers(&[("x-retry-count", value.clone())]));
            let ctx = DeliveryContext::from_properties(&properties, 0, 0);
            assert_eq!(ctx.retry_count, 2, "header value: {:?}", value);
        }
    }

    #[test]
    fn test_context_ignores_negative_and_garbage_headers() {
        let properties = BasicProperties::default().with_headers(headers(&[
            ("x-partition", AMQPValue::LongInt(-1)),
            ("x-retry-count", AMQPValue::LongString("soon".into())),
        ]));

        let ctx = DeliveryContext::from_properties(&properties, 0, 1);
        assert_eq!(ctx.partition, 1);
        assert_eq!(ctx.retry_count, 0);
    }

    #[test]
    fn test_context_reads_optional_properties() {
        let properties = BasicProperties::default()
            .with_message_id("msg-1".into())
            .with_correlation_id("evt_1_abc".into())
            .with_timestamp(1_700_000_000);

        let ctx = DeliveryContext::from_properties(&properties, 7, 0);
        assert_eq!(ctx.message_id.as_deref(), Some("msg-1"));
        assert_eq!(ctx.correlation_id.as_deref(), Some("evt_1_abc"));
        assert_eq!(ctx.timestamp, Some(1_700_000_000));
    }
}
