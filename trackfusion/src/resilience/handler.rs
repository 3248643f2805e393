//! Failure policy applied by fusion workers.

use std::error::Error;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde::Serialize;

use super::classifier::{classify, full_message, Classification, DuplicateDetails};
use super::dead_letter::{DeadLetterPublisher, DeadLetterRouter, FailedMessage};
use super::monitor::{ErrorMonitor, ErrorReport, HealthSummary};

/// What the caller must do with the failed message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureOutcome {
    /// Entity already persisted; acknowledge and move on.
    Duplicate(DuplicateDetails),
    /// Leave uncommitted and request redelivery.
    Redeliver,
    /// Quarantined; acknowledge.
    DeadLettered,
    /// Quarantine publish failed; acknowledge anyway.
    DeadLetterFailed,
}

impl FailureOutcome {
    /// Whether the original message should be acknowledged.
    pub fn should_ack(&self) -> bool {
        !matches!(self, FailureOutcome::Redeliver)
    }
}

/// Counters kept by the [`ErrorHandler`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResilienceStats {
    pub duplicates_ignored: u64,
    pub transient_redeliveries: u64,
    pub dead_lettered: u64,
    pub dead_letter_failures: u64,
    /// Pattern and surge alerts raised by the monitor.
    pub alerts_raised: u64,
}

/// Classifies failures, records them and quarantines what cannot be
/// recovered.
pub struct ErrorHandler {
    monitor: ErrorMonitor,
    router: DeadLetterRouter,
    duplicates: AtomicU64,
    transient: AtomicU64,
    alerts: AtomicU64,
}

impl ErrorHandler {
    pub fn new(publisher: Arc<dyn DeadLetterPublisher>) -> Self {
        Self {
            monitor: ErrorMonitor::new(),
            router: DeadLetterRouter::new(publisher),
            duplicates: AtomicU64::new(0),
            transient: AtomicU64::new(0),
            alerts: AtomicU64::new(0),
        }
    }

    /// Apply the failure policy to one message.
    ///
    /// Duplicates are logged with an upsert suggestion and never counted as
    /// pipeline errors. Transient failures are recorded and redelivered.
    /// Everything else is recorded and dead-lettered.
    pub fn handle(&self, message: &FailedMessage, error: &(dyn Error + 'static)) -> FailureOutcome {
        let classification = classify(error);
        let error_type = classification.error_type();

        match classification {
            Classification::Duplicate(details) => {
                self.duplicates.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    topic = %message.topic,
                    key = message.key.as_deref().unwrap_or_default(),
                    constraint = details.constraint.as_deref().unwrap_or_default(),
                    column = details.column.as_deref().unwrap_or_default(),
                    value = details.value.as_deref().unwrap_or_default(),
                    entity = %details.entity,
                    "Duplicate write ignored"
                );
                tracing::info!(suggestion = %details.upsert_suggestion(), "Upsert suggestion");
                FailureOutcome::Duplicate(details)
            }
            Classification::Transient { reason } => {
                self.transient.fetch_add(1, Ordering::Relaxed);
                self.record(message, error_type, error);
                tracing::warn!(
                    topic = %message.topic,
                    offset = message.offset,
                    attempts = message.attempts,
                    reason = %reason,
                    "Transient failure, requesting redelivery"
                );
                FailureOutcome::Redeliver
            }
            Classification::Unclassified => {
                self.record(message, error_type, error);
                if self.router.route(message, error_type, error) {
                    FailureOutcome::DeadLettered
                } else {
                    FailureOutcome::DeadLetterFailed
                }
            }
        }
    }

    /// The monitor logs each alert it raises; only the count is kept here.
    fn record(&self, message: &FailedMessage, error_type: &str, error: &(dyn Error + 'static)) {
        let alerts = self
            .monitor
            .record_error(&message.topic, error_type, &full_message(error));
        self.alerts.fetch_add(alerts.len() as u64, Ordering::Relaxed);
    }

    pub fn monitor(&self) -> &ErrorMonitor {
        &self.monitor
    }

    pub fn router(&self) -> &DeadLetterRouter {
        &self.router
    }

    pub fn health(&self) -> HealthSummary {
        self.monitor.health(self.router.routed_count())
    }

    pub fn report(&self) -> ErrorReport {
        self.monitor.report(self.router.routed_count())
    }

    pub fn stats(&self) -> ResilienceStats {
        ResilienceStats {
            duplicates_ignored: self.duplicates.load(Ordering::Relaxed),
            transient_redeliveries: self.transient.load(Ordering::Relaxed),
            dead_lettered: self.router.routed_count(),
            dead_letter_failures: self.router.failed_count(),
            alerts_raised: self.alerts.load(Ordering::Relaxed),
        }
    }

    /// Clear error metrics and dead-letter counters.
    pub fn reset(&self) {
        self.monitor.reset();
        self.router.reset();
        self.duplicates.store(0, Ordering::Relaxed);
        self.transient.store(0, Ordering::Relaxed);
        self.alerts.store(0, Ordering::Relaxed);
        tracing::info!("Error metrics reset");
    }
}

impl std::fmt::Debug for ErrorHandler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorHandler")
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}
