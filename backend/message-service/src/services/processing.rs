use tracing::{error, info, warn};

use crate::db::ProcessedMessageRepository;
use crate::error::Result;
use crate::metrics;
use crate::models::{MessageEvent, NewProcessedMessage};

/// Terminal outcome of one delivery through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A durable SUCCESS record was written for this delivery.
    Completed,
    /// Duplicate (or unidentifiable) delivery; no record written, no
    /// error raised.
    Skipped,
}

/// The ingestion pipeline: dedup gate, persist, failure recording.
///
/// Per-delivery state machine:
/// Received -> dedup check -> Skipped (duplicate) | Processing
/// Processing -> Completed (record written)
///            -> Skipped (lost the insert race to a concurrent worker)
///            -> Failed (FAILED record written, error re-signaled so the
///               consumer loop engages the retry tiers)
///
/// The re-signal on failure is intentional non-local control flow: this
/// component never schedules retries itself, it only makes the failure
/// visible to the delivery mechanism that can.
#[derive(Clone)]
pub struct MessageProcessor {
    repository: ProcessedMessageRepository,
}

impl MessageProcessor {
    pub fn new(repository: ProcessedMessageRepository) -> Self {
        Self { repository }
    }

    pub async fn process(
        &self,
        event: &MessageEvent,
        partition: i32,
        offset: i64,
    ) -> Result<Disposition> {
        let Some(message_id) = event.id.as_deref().filter(|id| !id.trim().is_empty()) else {
            // No identity means no dedup and no meaningful retry.
            warn!(
                sender = %event.sender,
                partition,
                offset,
                "delivery carries no message id, skipping"
            );
            return Ok(Disposition::Skipped);
        };

        if self.repository.is_completed(message_id).await? {
            warn!(
                message_id,
                sender = %event.sender,
                partition,
                offset,
                "duplicate message detected, skipping"
            );
            metrics::record_duplicate();
            return Ok(Disposition::Skipped);
        }

        let record = NewProcessedMessage::from_event(message_id, event);

        match self.repository.record_success(&record).await {
            Ok(true) => {
                info!(
                    message_id,
                    sender = %event.sender,
                    partition,
                    offset,
                    "message processed"
                );
                Ok(Disposition::Completed)
            }
            Ok(false) => {
                // Lost the check-then-insert race; the other worker's
                // record stands.
                warn!(
                    message_id,
                    sender = %event.sender,
                    partition,
                    offset,
                    "message recorded concurrently by another worker, skipping"
                );
                metrics::record_duplicate();
                Ok(Disposition::Skipped)
            }
            Err(err) => {
                error!(
                    message_id,
                    sender = %event.sender,
                    partition,
                    offset,
                    error = %err,
                    "message processing failed"
                );
                // Record the failure before re-signaling so the outcome
                // is queryable even if no retry ever lands. Best effort;
                // the store may be what just failed.
                if let Err(persist_err) = self
                    .repository
                    .record_failure(&record, &err.to_string())
                    .await
                {
                    error!(
                        message_id,
                        error = %persist_err,
                        "could not persist failure record"
                    );
                }
                Err(err)
            }
        }
    }
}
