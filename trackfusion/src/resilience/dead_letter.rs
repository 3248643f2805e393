//! Dead-letter routing.
//!
//! Irrecoverable failures are wrapped in a [`DeadLetterEnvelope`] and handed
//! to a [`DeadLetterPublisher`]. Publishing is best-effort: a failed publish
//! is logged and counted, never retried and never fed back into the
//! pipeline.

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::classifier::full_message;
use crate::bus::Topic;

/// Longest trace kept in an envelope, in characters.
pub const MAX_TRACE_CHARS: usize = 2000;

/// Suffix appended to a truncated trace.
pub const TRUNCATION_MARKER: &str = "... [truncated]";

/// Context of the raw message that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailedMessage {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: Option<String>,
    /// Best-effort string form of the payload.
    pub value: Option<String>,
    pub attempts: u32,
}

/// A quarantined message with its error context. Write-once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterEnvelope {
    pub original_topic: String,
    pub original_partition: u32,
    pub original_offset: u64,
    pub original_key: Option<String>,
    pub original_value: Option<String>,
    pub error_type: String,
    pub error_message: String,
    pub error_trace: String,
    pub error_timestamp: DateTime<Utc>,
    pub attempts: u32,
}

impl DeadLetterEnvelope {
    pub fn new(message: &FailedMessage, error_type: &str, error: &(dyn Error + 'static)) -> Self {
        Self {
            original_topic: message.topic.clone(),
            original_partition: message.partition,
            original_offset: message.offset,
            original_key: message.key.clone(),
            original_value: message.value.clone(),
            error_type: error_type.to_string(),
            error_message: full_message(error),
            error_trace: truncate_trace(&format_trace(error)),
            error_timestamp: Utc::now(),
            attempts: message.attempts.max(1),
        }
    }

    /// Key the envelope is published under:
    /// `dlq_<topic>_<partition>_<offset>_<errorType>_<millis>`.
    pub fn key(&self) -> String {
        format!(
            "dlq_{}_{}_{}_{}_{}",
            self.original_topic,
            self.original_partition,
            self.original_offset,
            self.error_type,
            self.error_timestamp.timestamp_millis()
        )
    }
}

/// Render an error and its causes, one per line.
pub fn format_trace(error: &(dyn Error + 'static)) -> String {
    let mut trace = error.to_string();
    let mut cause = error.source();
    while let Some(inner) = cause {
        trace.push_str("\nCaused by: ");
        trace.push_str(&inner.to_string());
        cause = inner.source();
    }
    trace
}

/// Cut a trace to [`MAX_TRACE_CHARS`] characters plus [`TRUNCATION_MARKER`].
pub fn truncate_trace(trace: &str) -> String {
    match trace.char_indices().nth(MAX_TRACE_CHARS) {
        Some((idx, _)) => format!("{}{}", &trace[..idx], TRUNCATION_MARKER),
        None => trace.to_string(),
    }
}

/// Errors from a dead-letter publisher.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PublishError {
    #[error("dead-letter destination unavailable: {0}")]
    Unavailable(String),

    #[error("dead-letter envelope rejected: {0}")]
    Rejected(String),
}

/// Destination for quarantined messages.
pub trait DeadLetterPublisher: Send + Sync {
    fn publish(&self, key: &str, envelope: DeadLetterEnvelope) -> Result<(), PublishError>;
}

impl DeadLetterPublisher for Topic<DeadLetterEnvelope> {
    fn publish(&self, key: &str, envelope: DeadLetterEnvelope) -> Result<(), PublishError> {
        Topic::publish(self, key, envelope);
        Ok(())
    }
}

/// Wraps failures into envelopes and publishes them.
pub struct DeadLetterRouter {
    publisher: Arc<dyn DeadLetterPublisher>,
    routed: AtomicU64,
    failed: AtomicU64,
}

impl DeadLetterRouter {
    pub fn new(publisher: Arc<dyn DeadLetterPublisher>) -> Self {
        Self {
            publisher,
            routed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    /// Quarantine one failed message. Returns true when the publish succeeded.
    pub fn route(
        &self,
        message: &FailedMessage,
        error_type: &str,
        error: &(dyn Error + 'static),
    ) -> bool {
        let envelope = DeadLetterEnvelope::new(message, error_type, error);
        let key = envelope.key();

        match self.publisher.publish(&key, envelope) {
            Ok(()) => {
                let total = self.routed.fetch_add(1, Ordering::Relaxed) + 1;
                tracing::warn!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error_type,
                    dead_letters = total,
                    key = %key,
                    "Message routed to dead-letter topic"
                );
                true
            }
            Err(e) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    topic = %message.topic,
                    partition = message.partition,
                    offset = message.offset,
                    error = %e,
                    "Dead-letter publish failed, message dropped"
                );
                false
            }
        }
    }

    /// Successful quarantine publishes.
    pub fn routed_count(&self) -> u64 {
        self.routed.load(Ordering::Relaxed)
    }

    /// Failed quarantine publishes.
    pub fn failed_count(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn reset(&self) {
        self.routed.store(0, Ordering::Relaxed);
        self.failed.store(0, Ordering::Relaxed);
    }
}

impl std::fmt::Debug for DeadLetterRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeadLetterRouter")
            .field("routed", &self.routed_count())
            .field("failed", &self.failed_count())
            .finish_non_exhaustive()
    }
}
