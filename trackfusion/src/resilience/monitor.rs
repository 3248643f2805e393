//! Error-pattern monitoring and health summaries.
//!
//! Counters are atomics behind `DashMap` entries so recording an error never
//! blocks a worker on another topic; only the recent-error buffer takes a
//! short lock.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::Serialize;

use super::ring_buffer::RingBuffer;

/// Recent error summaries kept for surge detection and reports.
pub const RECENT_ERROR_CAPACITY: usize = 100;

/// A topic's cumulative count triggers a pattern alert at every multiple.
pub const TOPIC_ALERT_INTERVAL: u64 = 50;

/// An error type's cumulative count triggers a pattern alert at every multiple.
pub const TYPE_ALERT_INTERVAL: u64 = 25;

/// Errors for one topic in the recent buffer that constitute a surge.
pub const SURGE_THRESHOLD: usize = 10;

/// Recent errors included in a report.
pub const REPORT_RECENT_ERRORS: usize = 20;

/// Dead-letter volume that downgrades health one level.
pub const DEAD_LETTER_DOWNGRADE_THRESHOLD: u64 = 10;

/// Longest error message kept in a summary.
const SUMMARY_MESSAGE_LIMIT: usize = 200;

/// Aggregated error health.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorHealth {
    Healthy,
    MinorIssues,
    Degraded,
    Critical,
}

impl ErrorHealth {
    /// Level for a cumulative error count.
    pub fn from_total(total_errors: u64) -> Self {
        match total_errors {
            0 => ErrorHealth::Healthy,
            1..=99 => ErrorHealth::MinorIssues,
            100..=999 => ErrorHealth::Degraded,
            _ => ErrorHealth::Critical,
        }
    }

    /// One level worse, saturating at critical.
    pub fn downgrade(self) -> Self {
        match self {
            ErrorHealth::Healthy => ErrorHealth::MinorIssues,
            ErrorHealth::MinorIssues => ErrorHealth::Degraded,
            ErrorHealth::Degraded | ErrorHealth::Critical => ErrorHealth::Critical,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorHealth::Healthy => "HEALTHY",
            ErrorHealth::MinorIssues => "MINOR_ISSUES",
            ErrorHealth::Degraded => "DEGRADED",
            ErrorHealth::Critical => "CRITICAL",
        }
    }
}

/// One entry in the recent-error buffer.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorSummary {
    pub topic: String,
    pub error_type: String,
    pub message: String,
    pub at: DateTime<Utc>,
}

/// Alerts raised while recording an error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorAlert {
    /// A topic's cumulative count reached a multiple of [`TOPIC_ALERT_INTERVAL`].
    TopicPattern { topic: String, count: u64 },
    /// An error type's cumulative count reached a multiple of [`TYPE_ALERT_INTERVAL`].
    TypePattern { error_type: String, count: u64 },
    /// A topic holds at least [`SURGE_THRESHOLD`] entries of the recent buffer.
    Surge { topic: String, recent: usize },
}

/// On-demand health summary.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthSummary {
    pub status: ErrorHealth,
    pub total_errors: u64,
    pub dead_letter_count: u64,
    pub last_error_at: Option<DateTime<Utc>>,
    /// More than ten errors overall with one in the last five minutes.
    pub recent_error_spike: bool,
}

/// Full error report for operators.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErrorReport {
    pub total_errors: u64,
    pub errors_by_topic: BTreeMap<String, u64>,
    pub errors_by_type: BTreeMap<String, u64>,
    pub last_error_by_topic: BTreeMap<String, DateTime<Utc>>,
    pub most_problematic_topic: Option<(String, u64)>,
    pub most_common_error_type: Option<(String, u64)>,
    pub recent_errors: Vec<ErrorSummary>,
    pub health: HealthSummary,
}

/// Process-wide error aggregator.
pub struct ErrorMonitor {
    by_topic: DashMap<String, AtomicU64>,
    by_type: DashMap<String, AtomicU64>,
    last_error: DashMap<String, DateTime<Utc>>,
    total: AtomicU64,
    recent: Mutex<RingBuffer<ErrorSummary>>,
}

impl Default for ErrorMonitor {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorMonitor {
    pub fn new() -> Self {
        Self {
            by_topic: DashMap::new(),
            by_type: DashMap::new(),
            last_error: DashMap::new(),
            total: AtomicU64::new(0),
            recent: Mutex::new(RingBuffer::new(RECENT_ERROR_CAPACITY)),
        }
    }

    /// Record one processing error and return any alerts it raised.
    ///
    /// Alerts are also logged: pattern alerts at warn, surges at error.
    pub fn record_error(&self, topic: &str, error_type: &str, message: &str) -> Vec<ErrorAlert> {
        let now = Utc::now();
        let topic_count = increment(&self.by_topic, topic);
        let type_count = increment(&self.by_type, error_type);
        self.total.fetch_add(1, Ordering::Relaxed);
        self.last_error.insert(topic.to_string(), now);

        let recent_for_topic = {
            let mut recent = self.recent.lock();
            recent.push(ErrorSummary {
                topic: topic.to_string(),
                error_type: error_type.to_string(),
                message: truncate_chars(message, SUMMARY_MESSAGE_LIMIT),
                at: now,
            });
            recent.iter_newest().filter(|e| e.topic == topic).count()
        };

        let mut alerts = Vec::new();
        if topic_count % TOPIC_ALERT_INTERVAL == 0 {
            tracing::warn!(topic, count = topic_count, "Error pattern: topic error count milestone");
            alerts.push(ErrorAlert::TopicPattern {
                topic: topic.to_string(),
                count: topic_count,
            });
        }
        if type_count % TYPE_ALERT_INTERVAL == 0 {
            tracing::warn!(error_type, count = type_count, "Error pattern: error type count milestone");
            alerts.push(ErrorAlert::TypePattern {
                error_type: error_type.to_string(),
                count: type_count,
            });
        }
        if recent_for_topic >= SURGE_THRESHOLD {
            tracing::error!(
                topic,
                recent = recent_for_topic,
                "Error surge: topic dominates recent error history"
            );
            alerts.push(ErrorAlert::Surge {
                topic: topic.to_string(),
                recent: recent_for_topic,
            });
        }
        alerts
    }

    pub fn total_errors(&self) -> u64 {
        self.total.load(Ordering::Relaxed)
    }

    pub fn topic_count(&self, topic: &str) -> u64 {
        load(&self.by_topic, topic)
    }

    pub fn type_count(&self, error_type: &str) -> u64 {
        load(&self.by_type, error_type)
    }

    /// Health as of now, given the current dead-letter volume.
    pub fn health(&self, dead_letter_count: u64) -> HealthSummary {
        let total_errors = self.total_errors();
        let mut status = ErrorHealth::from_total(total_errors);
        if dead_letter_count >= DEAD_LETTER_DOWNGRADE_THRESHOLD {
            status = status.downgrade();
        }

        let last_error_at = self.last_error.iter().map(|e| *e.value()).max();
        let recent_error_spike = match last_error_at {
            Some(at) => Utc::now() - at < chrono::Duration::minutes(5) && total_errors > 10,
            None => false,
        };

        HealthSummary {
            status,
            total_errors,
            dead_letter_count,
            last_error_at,
            recent_error_spike,
        }
    }

    /// Full report with breakdowns and the latest errors.
    pub fn report(&self, dead_letter_count: u64) -> ErrorReport {
        let errors_by_topic = snapshot(&self.by_topic);
        let errors_by_type = snapshot(&self.by_type);
        let last_error_by_topic = self
            .last_error
            .iter()
            .map(|e| (e.key().clone(), *e.value()))
            .collect();

        ErrorReport {
            total_errors: self.total_errors(),
            most_problematic_topic: top_entry(&errors_by_topic),
            most_common_error_type: top_entry(&errors_by_type),
            errors_by_topic,
            errors_by_type,
            last_error_by_topic,
            recent_errors: self.recent.lock().recent(REPORT_RECENT_ERRORS),
            health: self.health(dead_letter_count),
        }
    }

    /// Clear every counter and the recent buffer.
    pub fn reset(&self) {
        self.by_topic.clear();
        self.by_type.clear();
        self.last_error.clear();
        self.total.store(0, Ordering::Relaxed);
        self.recent.lock().clear();
        tracing::info!("Error metrics reset");
    }
}

impl std::fmt::Debug for ErrorMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ErrorMonitor")
            .field("total", &self.total_errors())
            .field("topics", &self.by_topic.len())
            .finish_non_exhaustive()
    }
}

fn increment(map: &DashMap<String, AtomicU64>, key: &str) -> u64 {
    if let Some(counter) = map.get(key) {
        return counter.fetch_add(1, Ordering::Relaxed) + 1;
    }
    map.entry(key.to_string())
        .or_insert_with(|| AtomicU64::new(0))
        .fetch_add(1, Ordering::Relaxed)
        + 1
}

fn load(map: &DashMap<String, AtomicU64>, key: &str) -> u64 {
    map.get(key)
        .map(|c| c.load(Ordering::Relaxed))
        .unwrap_or(0)
}

fn snapshot(map: &DashMap<String, AtomicU64>) -> BTreeMap<String, u64> {
    map.iter()
        .map(|e| (e.key().clone(), e.value().load(Ordering::Relaxed)))
        .collect()
}

/// Highest count; ties go to the lexicographically first key.
fn top_entry(map: &BTreeMap<String, u64>) -> Option<(String, u64)> {
    map.iter()
        .fold(None, |best: Option<(&String, u64)>, (k, v)| match best {
            Some((_, best_v)) if best_v >= *v => best,
            _ => Some((k, *v)),
        })
        .map(|(k, v)| (k.clone(), v))
}

pub(crate) fn truncate_chars(s: &str, limit: usize) -> String {
    match s.char_indices().nth(limit) {
        Some((idx, _)) => s[..idx].to_string(),
        None => s.to_string(),
    }
}
