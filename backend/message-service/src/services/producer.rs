use chrono::Utc;
use rdkafka::producer::{DeliveryFuture, FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::MessageEvent;

/// Asynchronous confirmation of where the broker placed a published
/// message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub partition: i32,
    pub offset: i64,
}

/// Publish path onto the primary topic.
///
/// Identity assignment happens here, exactly once: a message leaves
/// this component with a stable `id` and `created_at`, so consumer-side
/// retries of the same message always carry the same identity.
#[derive(Clone)]
pub struct MessageProducer {
    producer: FutureProducer,
    topic: String,
}

impl MessageProducer {
    pub fn new(brokers: &str, topic: String) -> Result<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("queue.buffering.max.messages", "100000")
            .set("acks", "all")
            .create()
            .map_err(AppError::Kafka)?;

        Ok(Self { producer, topic })
    }

    /// Validate-free enqueue (validation is the ingress handler's job).
    /// Fills in `id` and `created_at` if absent, hands the message to
    /// the broker client without blocking, and returns the prepared
    /// event together with the pending delivery confirmation.
    pub fn enqueue(&self, mut event: MessageEvent) -> Result<(MessageEvent, DeliveryFuture)> {
        let message_id = event
            .id
            .get_or_insert_with(|| Uuid::new_v4().to_string())
            .clone();
        event.created_at.get_or_insert_with(Utc::now);

        let payload = serde_json::to_string(&event)
            .map_err(|e| AppError::Internal(format!("failed to serialize message: {}", e)))?;

        let record = FutureRecord::to(&self.topic)
            .key(&message_id)
            .payload(&payload);

        let delivery = self
            .producer
            .send_result(record)
            .map_err(|(e, _)| AppError::Kafka(e))?;

        metrics::record_publish("enqueued");
        Ok((event, delivery))
    }

    /// Publish a message and log its delivery confirmation in the
    /// background. Returns as soon as the message is enqueued; the
    /// caller never waits on the broker.
    pub fn publish(&self, event: MessageEvent) -> Result<MessageEvent> {
        let (event, delivery) = self.enqueue(event)?;

        let topic = self.topic.clone();
        let message_id = event.id.clone().unwrap_or_default();
        tokio::spawn(log_confirmation(topic, message_id, delivery));

        Ok(event)
    }
}

/// Resolution callback for a pending delivery: logs both outcomes,
/// blocks nobody.
async fn log_confirmation(topic: String, message_id: String, delivery: DeliveryFuture) {
    match delivery.await {
        Ok(Ok((partition, offset))) => {
            let receipt = DeliveryReceipt { partition, offset };
            metrics::record_publish("delivered");
            info!(
                %topic,
                %message_id,
                partition = receipt.partition,
                offset = receipt.offset,
                "message delivered"
            );
        }
        Ok(Err((e, _message))) => {
            metrics::record_publish("failed");
            error!(%topic, %message_id, error = %e, "message delivery failed");
        }
        Err(_cancelled) => {
            warn!(%message_id, "delivery confirmation dropped before resolving");
        }
    }
}
