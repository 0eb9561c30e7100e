use kafka_retry::RetryPolicy;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub app: AppConfig,
    pub database: DatabaseConfig,
    pub kafka: KafkaConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub env: String,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KafkaConfig {
    pub brokers: String,
    /// Primary topic; retry tiers and the dead letter derive their
    /// names from it.
    pub topic: String,
    pub partitions: i32,
    pub replication_factor: i32,
    pub group_id: String,
    pub retry: RetryConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total delivery attempts, the first one included.
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_attempts, self.base_delay_ms, self.backoff_multiplier)
    }
}

impl Config {
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        Ok(Config {
            app: AppConfig {
                env: std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
                host: std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".to_string()),
                port: std::env::var("APP_PORT")
                    .unwrap_or_else(|_| "8080".to_string())
                    .parse()?,
            },
            database: DatabaseConfig {
                url: std::env::var("DATABASE_URL")?,
                max_connections: std::env::var("DATABASE_MAX_CONNECTIONS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
                acquire_timeout_secs: std::env::var("DATABASE_ACQUIRE_TIMEOUT_SECS")
                    .unwrap_or_else(|_| "10".to_string())
                    .parse()?,
            },
            kafka: KafkaConfig {
                brokers: std::env::var("KAFKA_BROKERS")
                    .unwrap_or_else(|_| "localhost:9092".to_string()),
                topic: std::env::var("KAFKA_TOPIC")
                    .unwrap_or_else(|_| "message-events".to_string()),
                partitions: std::env::var("KAFKA_TOPIC_PARTITIONS")
                    .unwrap_or_else(|_| "3".to_string())
                    .parse()?,
                replication_factor: std::env::var("KAFKA_REPLICATION_FACTOR")
                    .unwrap_or_else(|_| "1".to_string())
                    .parse()?,
                group_id: std::env::var("KAFKA_GROUP_ID")
                    .unwrap_or_else(|_| "message-service".to_string()),
                retry: RetryConfig {
                    max_attempts: std::env::var("KAFKA_RETRY_MAX_ATTEMPTS")
                        .unwrap_or_else(|_| "4".to_string())
                        .parse()?,
                    base_delay_ms: std::env::var("KAFKA_RETRY_BASE_DELAY_MS")
                        .unwrap_or_else(|_| "1000".to_string())
                        .parse()?,
                    backoff_multiplier: std::env::var("KAFKA_RETRY_BACKOFF_MULTIPLIER")
                        .unwrap_or_else(|_| "2.0".to_string())
                        .parse()?,
                },
            },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "DATABASE_MAX_CONNECTIONS",
            "DATABASE_ACQUIRE_TIMEOUT_SECS",
            "KAFKA_BROKERS",
            "KAFKA_TOPIC",
            "KAFKA_TOPIC_PARTITIONS",
            "KAFKA_REPLICATION_FACTOR",
            "KAFKA_GROUP_ID",
            "KAFKA_RETRY_MAX_ATTEMPTS",
            "KAFKA_RETRY_BASE_DELAY_MS",
            "KAFKA_RETRY_BACKOFF_MULTIPLIER",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    #[serial_test::serial]
    fn defaults_apply_when_env_is_unset() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/relay_test");

        let config = Config::from_env().unwrap();

        assert_eq!(config.app.port, 8080);
        assert_eq!(config.kafka.topic, "message-events");
        assert_eq!(config.kafka.partitions, 3);
        assert_eq!(config.kafka.retry.max_attempts, 4);
        assert_eq!(config.kafka.retry.base_delay_ms, 1000);
        assert_eq!(config.kafka.retry.backoff_multiplier, 2.0);

        std::env::remove_var("DATABASE_URL");
    }

    #[test]
    #[serial_test::serial]
    fn env_overrides_are_honored() {
        clear_env();
        std::env::set_var("DATABASE_URL", "postgres://localhost/relay_test");
        std::env::set_var("KAFKA_TOPIC", "orders");
        std::env::set_var("KAFKA_RETRY_MAX_ATTEMPTS", "6");

        let config = Config::from_env().unwrap();

        assert_eq!(config.kafka.topic, "orders");
        assert_eq!(config.kafka.retry.max_attempts, 6);
        assert_eq!(config.kafka.retry.policy().tier_count(), 5);

        std::env::remove_var("DATABASE_URL");
        std::env::remove_var("KAFKA_TOPIC");
        std::env::remove_var("KAFKA_RETRY_MAX_ATTEMPTS");
    }

    #[test]
    #[serial_test::serial]
    fn missing_database_url_is_an_error() {
        clear_env();
        std::env::remove_var("DATABASE_URL");

        assert!(Config::from_env().is_err());
    }
}
