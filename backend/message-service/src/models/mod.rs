use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use validator::{Validate, ValidationError};

/// Transient wire entity published to and consumed from the broker.
///
/// `id` and `created_at` are optional on ingress; the publish path
/// assigns them exactly once before the message leaves the service, so
/// consumer-side retries always see the same identity.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct MessageEvent {
    #[serde(default, alias = "messageId", skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    #[validate(custom(function = not_blank))]
    pub content: String,

    #[validate(custom(function = not_blank))]
    pub sender: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
}

fn not_blank(value: &str) -> Result<(), ValidationError> {
    if value.trim().is_empty() {
        return Err(ValidationError::new("not_blank"));
    }
    Ok(())
}

/// Terminal processing status of a durable record.
///
/// `Retry` exists in the status vocabulary and the query API, but the
/// pipeline never rests a record there: in-flight retry state is
/// carried on the broker envelope, not in the store.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum ProcessingStatus {
    Success,
    Failed,
    Retry,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Success => "SUCCESS",
            ProcessingStatus::Failed => "FAILED",
            ProcessingStatus::Retry => "RETRY",
        }
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_uppercase().as_str() {
            "SUCCESS" => Ok(ProcessingStatus::Success),
            "FAILED" => Ok(ProcessingStatus::Failed),
            "RETRY" => Ok(ProcessingStatus::Retry),
            other => Err(format!("unknown processing status: {}", other)),
        }
    }
}

/// Durable record of one ingested message. Written at most once per
/// `message_id`; a SUCCESS record is never mutated afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcessedMessage {
    pub id: i64,
    pub message_id: String,
    pub content: String,
    pub sender: String,
    pub metadata: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
    pub status: ProcessingStatus,
    pub error_detail: Option<String>,
}

/// Insert payload for a processed-message record, built by the
/// pipeline from a delivered event. Status and error detail are
/// decided by the repository call that persists it.
#[derive(Debug, Clone)]
pub struct NewProcessedMessage {
    pub message_id: String,
    pub content: String,
    pub sender: String,
    pub metadata: Option<String>,
    pub received_at: DateTime<Utc>,
    pub processed_at: DateTime<Utc>,
}

impl NewProcessedMessage {
    /// Snapshot a delivered event at processing time. `received_at`
    /// defaults to the event's own timestamp and is clamped so it never
    /// trails `processed_at` (client clocks are not trusted).
    pub fn from_event(message_id: &str, event: &MessageEvent) -> Self {
        let processed_at = Utc::now();
        let received_at = event
            .created_at
            .unwrap_or(processed_at)
            .min(processed_at);

        Self {
            message_id: message_id.to_string(),
            content: event.content.clone(),
            sender: event.sender.clone(),
            metadata: event.metadata.clone(),
            received_at,
            processed_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(content: &str, sender: &str) -> MessageEvent {
        MessageEvent {
            id: None,
            content: content.to_string(),
            sender: sender.to_string(),
            metadata: None,
            created_at: None,
        }
    }

    #[test]
    fn blank_content_fails_validation() {
        assert!(event("   ", "alice").validate().is_err());
        assert!(event("", "alice").validate().is_err());
        assert!(event("hi", "alice").validate().is_ok());
    }

    #[test]
    fn blank_sender_fails_validation() {
        assert!(event("hi", " ").validate().is_err());
    }

    #[test]
    fn message_id_alias_is_accepted() {
        let parsed: MessageEvent =
            serde_json::from_str(r#"{"messageId":"m1","content":"hi","sender":"alice"}"#)
                .unwrap();
        assert_eq!(parsed.id.as_deref(), Some("m1"));

        let parsed: MessageEvent =
            serde_json::from_str(r#"{"id":"m2","content":"hi","sender":"alice"}"#).unwrap();
        assert_eq!(parsed.id.as_deref(), Some("m2"));
    }

    #[test]
    fn status_round_trips_through_strings() {
        for status in [
            ProcessingStatus::Success,
            ProcessingStatus::Failed,
            ProcessingStatus::Retry,
        ] {
            assert_eq!(status.as_str().parse::<ProcessingStatus>().unwrap(), status);
        }
        assert_eq!(
            "failed".parse::<ProcessingStatus>().unwrap(),
            ProcessingStatus::Failed
        );
        assert!("DONE".parse::<ProcessingStatus>().is_err());
    }

    #[test]
    fn received_at_never_trails_processed_at() {
        let mut ev = event("hi", "alice");
        ev.created_at = Some(Utc::now() + chrono::Duration::hours(1));

        let record = NewProcessedMessage::from_event("m1", &ev);
        assert!(record.received_at <= record.processed_at);
    }

    #[test]
    fn received_at_defaults_to_event_timestamp() {
        let stamp = Utc::now() - chrono::Duration::minutes(5);
        let mut ev = event("hi", "alice");
        ev.created_at = Some(stamp);

        let record = NewProcessedMessage::from_event("m1", &ev);
        assert_eq!(record.received_at, stamp);
    }
}
