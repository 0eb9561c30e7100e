//! Tiered retry routing for Kafka consumers.
//!
//! At-least-once consumers need somewhere to put a delivery that failed
//! processing. This library models the answer as an ordered sequence of
//! retry-tier topics (one per attempt index) ending in a dead-letter
//! topic, with the attempt count carried on the message envelope itself
//! so that any worker can pick up a retried delivery without shared
//! state.
//!
//! Three pieces:
//! - [`RetryPolicy`]: attempt budget and exponential backoff schedule.
//! - [`RetryTopics`]: topic naming for the tiers and the dead letter.
//! - The `x-retry-attempt` header codec ([`attempt_from_headers`],
//!   [`stamp_attempt`]).
//!
//! The policy is deliberately blind to error content: a failed attempt
//! is retried until the attempt budget is exhausted, then dead-lettered.
//! Failure classification stays in the consumer; scheduling stays here.

use rdkafka::message::{Header, Headers, OwnedHeaders};
use std::time::Duration;
use tracing::warn;

/// Envelope header carrying the number of prior delivery attempts.
/// Absent on first delivery.
pub const ATTEMPT_HEADER: &str = "x-retry-attempt";

/// Where a failed delivery goes next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDestination {
    /// Redeliver through the retry tier with this index.
    Tier(u32),
    /// Attempt budget exhausted; park the message terminally.
    DeadLetter,
}

/// Attempt budget and backoff schedule for failed deliveries.
///
/// `max_attempts` counts every delivery including the first, so a
/// budget of 4 means one primary delivery plus three retry tiers.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 4,
            base_delay: Duration::from_millis(1000),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay_ms: u64, multiplier: f64) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay: Duration::from_millis(base_delay_ms),
            multiplier,
        }
    }

    /// Whether a delivery that has already been attempted `attempt + 1`
    /// times gets another try.
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt + 1 < self.max_attempts
    }

    /// Delay to apply before reprocessing a delivery with the given
    /// attempt count. First deliveries are never delayed; retried ones
    /// back off exponentially: base, base*m, base*m^2, ...
    pub fn delay_for(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let factor = self.multiplier.powi(attempt as i32 - 1);
        let millis = (self.base_delay.as_millis() as f64 * factor).round() as u64;
        Duration::from_millis(millis)
    }

    /// Routing decision after a failed delivery with the given attempt
    /// count: the tier whose index equals the attempt count, or the
    /// dead letter once the budget is spent.
    pub fn destination_after(&self, attempt: u32) -> RetryDestination {
        if self.should_retry(attempt) {
            RetryDestination::Tier(attempt)
        } else {
            RetryDestination::DeadLetter
        }
    }

    /// Number of retry-tier topics this policy needs.
    pub fn tier_count(&self) -> u32 {
        self.max_attempts.saturating_sub(1)
    }
}

/// Topic naming for a primary topic and its retry/dead-letter side
/// channels: `{primary}-retry-{i}` per tier, `{primary}-dlt` terminal.
#[derive(Debug, Clone)]
pub struct RetryTopics {
    primary: String,
}

impl RetryTopics {
    pub fn new(primary: impl Into<String>) -> Self {
        Self {
            primary: primary.into(),
        }
    }

    pub fn primary(&self) -> &str {
        &self.primary
    }

    pub fn tier(&self, index: u32) -> String {
        format!("{}-retry-{}", self.primary, index)
    }

    pub fn dead_letter(&self) -> String {
        format!("{}-dlt", self.primary)
    }

    pub fn topic_for(&self, destination: RetryDestination) -> String {
        match destination {
            RetryDestination::Tier(index) => self.tier(index),
            RetryDestination::DeadLetter => self.dead_letter(),
        }
    }

    /// Every topic a consumer must subscribe to: the primary topic plus
    /// all retry tiers. The dead letter is excluded; nothing consumes
    /// it automatically.
    pub fn subscription(&self, policy: &RetryPolicy) -> Vec<String> {
        let mut topics = Vec::with_capacity(policy.tier_count() as usize + 1);
        topics.push(self.primary.clone());
        for index in 0..policy.tier_count() {
            topics.push(self.tier(index));
        }
        topics
    }
}

/// Read the attempt count off a delivery's headers. Missing or
/// unreadable headers count as a first delivery rather than poisoning
/// the pipeline.
pub fn attempt_from_headers<H: Headers>(headers: Option<&H>) -> u32 {
    let Some(headers) = headers else { return 0 };
    for header in headers.iter() {
        if header.key != ATTEMPT_HEADER {
            continue;
        }
        let parsed = header
            .value
            .and_then(|v| std::str::from_utf8(v).ok())
            .and_then(|s| s.parse::<u32>().ok());
        return match parsed {
            Some(attempt) => attempt,
            None => {
                warn!(
                    header = ATTEMPT_HEADER,
                    "unreadable attempt header, treating delivery as first attempt"
                );
                0
            }
        };
    }
    0
}

/// Build the headers for a re-routed delivery carrying its new attempt
/// count.
pub fn stamp_attempt(attempt: u32) -> OwnedHeaders {
    let value = attempt.to_string();
    OwnedHeaders::new().insert(Header {
        key: ATTEMPT_HEADER,
        value: Some(value.as_bytes()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_doubles_per_tier() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.delay_for(0), Duration::ZERO);
        assert_eq!(policy.delay_for(1), Duration::from_millis(1000));
        assert_eq!(policy.delay_for(2), Duration::from_millis(2000));
        assert_eq!(policy.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn delays_are_non_decreasing() {
        let policy = RetryPolicy::new(6, 250, 1.5);
        let mut previous = Duration::ZERO;
        for attempt in 0..6 {
            let delay = policy.delay_for(attempt);
            assert!(delay >= previous, "delay shrank at attempt {}", attempt);
            previous = delay;
        }
    }

    #[test]
    fn attempt_budget_is_total_deliveries() {
        let policy = RetryPolicy::default();

        assert!(policy.should_retry(0));
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
        assert_eq!(policy.tier_count(), 3);
    }

    #[test]
    fn exhausted_attempts_dead_letter() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.destination_after(0), RetryDestination::Tier(0));
        assert_eq!(policy.destination_after(2), RetryDestination::Tier(2));
        assert_eq!(policy.destination_after(3), RetryDestination::DeadLetter);
    }

    #[test]
    fn single_attempt_policy_never_retries() {
        let policy = RetryPolicy::new(1, 1000, 2.0);

        assert!(!policy.should_retry(0));
        assert_eq!(policy.destination_after(0), RetryDestination::DeadLetter);
        assert_eq!(policy.tier_count(), 0);
    }

    #[test]
    fn topic_names_suffix_by_index() {
        let topics = RetryTopics::new("message-events");

        assert_eq!(topics.primary(), "message-events");
        assert_eq!(topics.tier(0), "message-events-retry-0");
        assert_eq!(topics.tier(2), "message-events-retry-2");
        assert_eq!(topics.dead_letter(), "message-events-dlt");
    }

    #[test]
    fn subscription_covers_primary_and_tiers() {
        let topics = RetryTopics::new("message-events");
        let policy = RetryPolicy::default();

        assert_eq!(
            topics.subscription(&policy),
            vec![
                "message-events",
                "message-events-retry-0",
                "message-events-retry-1",
                "message-events-retry-2",
            ]
        );
    }

    #[test]
    fn attempt_header_round_trips() {
        let headers = stamp_attempt(2);
        assert_eq!(attempt_from_headers(Some(&headers)), 2);
    }

    #[test]
    fn missing_headers_mean_first_attempt() {
        assert_eq!(attempt_from_headers::<OwnedHeaders>(None), 0);

        let unrelated = OwnedHeaders::new().insert(Header {
            key: "content-type",
            value: Some(b"application/json".as_slice()),
        });
        assert_eq!(attempt_from_headers(Some(&unrelated)), 0);
    }

    #[test]
    fn garbage_attempt_header_falls_back_to_zero() {
        let headers = OwnedHeaders::new().insert(Header {
            key: ATTEMPT_HEADER,
            value: Some(b"not-a-number".as_slice()),
        });
        assert_eq!(attempt_from_headers(Some(&headers)), 0);
    }
}
