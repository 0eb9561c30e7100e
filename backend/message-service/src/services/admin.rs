//! Startup topic provisioning: the primary topic, every retry tier,
//! and the dead letter are created with the configured partition count
//! and replication factor. Already-existing topics are left alone.

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::types::RDKafkaErrorCode;
use tracing::{debug, info};

use kafka_retry::RetryTopics;

use crate::config::KafkaConfig;
use crate::error::{AppError, Result};

pub async fn ensure_topics(config: &KafkaConfig) -> Result<()> {
    let admin: AdminClient<DefaultClientContext> = ClientConfig::new()
        .set("bootstrap.servers", &config.brokers)
        .create()
        .map_err(AppError::Kafka)?;

    let names = provisioned_topics(config);
    let new_topics: Vec<NewTopic> = names
        .iter()
        .map(|name| {
            NewTopic::new(
                name,
                config.partitions,
                TopicReplication::Fixed(config.replication_factor),
            )
        })
        .collect();

    let results = admin
        .create_topics(new_topics.iter(), &AdminOptions::new())
        .await
        .map_err(AppError::Kafka)?;

    for result in results {
        match result {
            Ok(topic) => info!(%topic, "created topic"),
            Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                debug!(%topic, "topic already exists")
            }
            Err((topic, code)) => {
                return Err(AppError::Internal(format!(
                    "failed to create topic {}: {}",
                    topic, code
                )))
            }
        }
    }

    Ok(())
}

fn provisioned_topics(config: &KafkaConfig) -> Vec<String> {
    let topics = RetryTopics::new(&config.topic);
    let mut names = topics.subscription(&config.retry.policy());
    names.push(topics.dead_letter());
    names
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;

    #[test]
    fn provisions_primary_tiers_and_dead_letter() {
        let config = KafkaConfig {
            brokers: "localhost:9092".to_string(),
            topic: "message-events".to_string(),
            partitions: 3,
            replication_factor: 1,
            group_id: "message-service".to_string(),
            retry: RetryConfig {
                max_attempts: 4,
                base_delay_ms: 1000,
                backoff_multiplier: 2.0,
            },
        };

        assert_eq!(
            provisioned_topics(&config),
            vec![
                "message-events",
                "message-events-retry-0",
                "message-events-retry-1",
                "message-events-retry-2",
                "message-events-dlt",
            ]
        );
    }
}
