use std::sync::Arc;
use std::time::Duration;

use kafka_retry::{RetryDestination, RetryPolicy, RetryTopics};
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::{BorrowedMessage, Message};
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::ClientConfig;
use tokio::time::sleep;
use tracing::{error, info, warn};

use crate::config::KafkaConfig;
use crate::error::{AppError, Result};
use crate::metrics;
use crate::models::MessageEvent;
use crate::services::processing::{Disposition, MessageProcessor};

/// Consumes the primary topic and every retry tier, one in-flight
/// delivery per partition stream, and drives each delivery through the
/// ingestion pipeline.
///
/// Offsets are committed manually after a delivery is fully handled:
/// recorded, skipped, or routed onward. A delivery whose routing fails
/// is not committed, so the broker redelivers it.
pub struct MessageConsumer {
    consumer: StreamConsumer,
    processor: MessageProcessor,
    router: RetryRouter,
    policy: RetryPolicy,
}

impl MessageConsumer {
    pub fn new(config: &KafkaConfig, processor: MessageProcessor) -> Result<Self> {
        let policy = config.retry.policy();
        let topics = RetryTopics::new(&config.topic);

        let consumer: StreamConsumer = ClientConfig::new()
            .set("bootstrap.servers", &config.brokers)
            .set("group.id", &config.group_id)
            .set("auto.offset.reset", "earliest")
            .set("enable.auto.commit", "false")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "10000")
            .create()
            .map_err(AppError::Kafka)?;

        let subscription = topics.subscription(&policy);
        let subscription_refs: Vec<&str> = subscription.iter().map(String::as_str).collect();
        consumer
            .subscribe(&subscription_refs)
            .map_err(AppError::Kafka)?;

        info!(
            group_id = %config.group_id,
            topics = ?subscription,
            "subscribed to primary topic and retry tiers"
        );

        let router = RetryRouter::new(&config.brokers, topics, policy.clone())?;

        Ok(Self {
            consumer,
            processor,
            router,
            policy,
        })
    }

    /// Run forever; meant to be spawned as a background task. Transient
    /// loop failures restart consumption after a short pause.
    pub async fn start(self: Arc<Self>) {
        info!("starting message consumer loop");
        loop {
            match self.consume_loop().await {
                Ok(()) => warn!("consumer loop exited unexpectedly, restarting"),
                Err(e) => {
                    error!(error = %e, "consumer loop failed, restarting in 5s");
                    sleep(Duration::from_secs(5)).await;
                }
            }
        }
    }

    async fn consume_loop(&self) -> Result<()> {
        loop {
            let message = self.consumer.recv().await.map_err(AppError::Kafka)?;
            self.handle_delivery(&message).await?;
        }
    }

    async fn handle_delivery(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        let topic = message.topic();
        let partition = message.partition();
        let offset = message.offset();
        let attempt = kafka_retry::attempt_from_headers(message.headers());

        let Some(event) = decode_event(message.payload(), topic, partition, offset) else {
            // Undecodable payloads can never be deduplicated or
            // retried; drop them and move on.
            metrics::record_consumed("undecodable");
            return self.commit(message);
        };

        // Retried deliveries wait out their tier's backoff before
        // reprocessing; the first delivery is never delayed.
        let delay = self.policy.delay_for(attempt);
        if !delay.is_zero() {
            sleep(delay).await;
        }

        info!(
            topic,
            partition,
            offset,
            attempt,
            message_id = ?event.id,
            sender = %event.sender,
            "consuming delivery"
        );

        match self.processor.process(&event, partition, offset).await {
            Ok(Disposition::Completed) => metrics::record_consumed("completed"),
            Ok(Disposition::Skipped) => metrics::record_consumed("skipped"),
            Err(err) => {
                metrics::record_consumed("failed");
                // The FAILED record is already durable; what remains is
                // scheduling the redelivery. If that routing fails, the
                // offset stays uncommitted and the broker redelivers.
                self.router.route_failure(&event, attempt, &err).await?;
            }
        }

        self.commit(message)
    }

    fn commit(&self, message: &BorrowedMessage<'_>) -> Result<()> {
        self.consumer
            .commit_message(message, CommitMode::Async)
            .map_err(AppError::Kafka)
    }
}

fn decode_event(
    payload: Option<&[u8]>,
    topic: &str,
    partition: i32,
    offset: i64,
) -> Option<MessageEvent> {
    let Some(payload) = payload else {
        warn!(topic, partition, offset, "delivery has no payload, skipping");
        return None;
    };

    match serde_json::from_slice::<MessageEvent>(payload) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(
                topic,
                partition,
                offset,
                error = %e,
                "failed to decode delivery payload, skipping"
            );
            None
        }
    }
}

/// Re-routes failed deliveries to the next retry tier, or to the dead
/// letter once the attempt budget is spent. The attempt count rides on
/// the re-published envelope; no retry state lives in this process.
struct RetryRouter {
    producer: FutureProducer,
    topics: RetryTopics,
    policy: RetryPolicy,
    timeout: Duration,
}

impl RetryRouter {
    fn new(brokers: &str, topics: RetryTopics, policy: RetryPolicy) -> Result<Self> {
        let producer = ClientConfig::new()
            .set("bootstrap.servers", brokers)
            .set("message.timeout.ms", "5000")
            .set("acks", "all")
            .create()
            .map_err(AppError::Kafka)?;

        Ok(Self {
            producer,
            topics,
            policy,
            timeout: Duration::from_secs(5),
        })
    }

    async fn route_failure(
        &self,
        event: &MessageEvent,
        attempt: u32,
        cause: &AppError,
    ) -> Result<()> {
        let destination = self.policy.destination_after(attempt);
        let topic = self.topics.topic_for(destination);
        let attempts_made = attempt + 1;

        let payload = serde_json::to_string(event)
            .map_err(|e| AppError::Internal(format!("failed to serialize message: {}", e)))?;
        let key = event.id.clone().unwrap_or_default();
        let headers = kafka_retry::stamp_attempt(attempts_made);

        let record = FutureRecord::to(&topic)
            .key(&key)
            .payload(&payload)
            .headers(headers);

        match self.producer.send(record, self.timeout).await {
            Ok((partition, offset)) => {
                match destination {
                    RetryDestination::Tier(tier) => {
                        metrics::record_retry_routed(tier);
                        warn!(
                            message_id = ?event.id,
                            %topic,
                            partition,
                            offset,
                            attempts_made,
                            error = %cause,
                            "routed failed delivery to retry tier"
                        );
                    }
                    RetryDestination::DeadLetter => {
                        metrics::record_dead_lettered();
                        error!(
                            message_id = ?event.id,
                            %topic,
                            partition,
                            offset,
                            attempts_made,
                            error = %cause,
                            "retry attempts exhausted, message dead-lettered"
                        );
                    }
                }
                Ok(())
            }
            Err((e, _message)) => {
                error!(
                    message_id = ?event.id,
                    %topic,
                    error = %e,
                    "failed to route delivery onward"
                );
                Err(AppError::Kafka(e))
            }
        }
    }
}
