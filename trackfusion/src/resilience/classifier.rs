//! Constraint-violation classification.
//!
//! Walks an error and its `source()` chain once and returns a tagged
//! [`Classification`]. Call sites branch on the tag instead of inspecting
//! causes themselves.

use std::error::Error;
use std::fmt;
use std::io;
use std::sync::OnceLock;

use regex::Regex;
use serde::Serialize;

/// Substrings that mark a uniqueness violation.
const DUPLICATE_MARKERS: [&str; 3] = ["unique constraint", "duplicate key", "already exists"];

/// Substrings that mark a failure worth redelivering.
const TRANSIENT_MARKERS: [&str; 6] = [
    "connection refused",
    "connection reset",
    "timed out",
    "timeout",
    "temporarily unavailable",
    "too many connections",
];

/// Entity a duplicate-key violation most likely refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InferredEntity {
    Aircraft,
    Ship,
    Flight,
    Voyage,
    Unknown,
}

impl InferredEntity {
    pub fn as_str(&self) -> &'static str {
        match self {
            InferredEntity::Aircraft => "aircraft",
            InferredEntity::Ship => "ship",
            InferredEntity::Flight => "flight",
            InferredEntity::Voyage => "voyage",
            InferredEntity::Unknown => "unknown",
        }
    }

    /// Infer from constraint name and message keywords.
    fn infer(constraint: Option<&str>, message: &str) -> Self {
        let haystack = format!(
            "{} {}",
            constraint.unwrap_or_default().to_lowercase(),
            message.to_lowercase()
        );
        let has = |words: &[&str]| words.iter().any(|w| haystack.contains(w));

        if has(&["aircraft", "hexident"]) {
            InferredEntity::Aircraft
        } else if has(&["ship", "vessel", "mmsi"]) {
            InferredEntity::Ship
        } else if has(&["flight"]) {
            InferredEntity::Flight
        } else if has(&["voyage"]) {
            InferredEntity::Voyage
        } else {
            InferredEntity::Unknown
        }
    }
}

impl fmt::Display for InferredEntity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured detail extracted from a duplicate-key error.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DuplicateDetails {
    pub constraint: Option<String>,
    pub column: Option<String>,
    pub value: Option<String>,
    pub entity: InferredEntity,
}

impl DuplicateDetails {
    /// Remediation hint logged alongside the duplicate.
    pub fn upsert_suggestion(&self) -> String {
        let value = self.value.as_deref().unwrap_or("?");
        match (self.entity, self.column.as_deref()) {
            (InferredEntity::Aircraft, Some("hexident")) => format!(
                "aircraft with hexident '{}' already exists; write it as an upsert",
                value
            ),
            (InferredEntity::Ship, Some("mmsi")) => format!(
                "ship with MMSI '{}' already exists; write it as an upsert",
                value
            ),
            (entity, Some(column)) => format!(
                "{} with {} '{}' already exists; write it as an upsert",
                entity, column, value
            ),
            (entity, None) => format!(
                "{} record already exists; write it as an upsert keyed on the violated constraint",
                entity
            ),
        }
    }
}

/// Outcome of classifying a processing failure.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// Uniqueness violation: the entity already exists.
    Duplicate(DuplicateDetails),
    /// Infrastructure hiccup; redelivery may succeed.
    Transient { reason: String },
    /// Anything else.
    Unclassified,
}

impl Classification {
    /// Label used as the error type in metrics and dead-letter envelopes.
    pub fn error_type(&self) -> &'static str {
        match self {
            Classification::Duplicate(_) => "DUPLICATE_WRITE",
            Classification::Transient { .. } => "TRANSIENT",
            Classification::Unclassified => "UNCLASSIFIED",
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Classification::Duplicate(_))
    }
}

/// Matches `Key (column)=(value) already exists`.
fn key_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"Key \((\w+)\)=\(([^)]+)\) already exists").expect("valid key regex")
    })
}

/// Matches `violates unique constraint "name"`.
fn constraint_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r#"violates unique constraint "([^"]+)""#).expect("valid constraint regex")
    })
}

/// Join the messages of an error and all of its causes with `" | "`.
pub fn full_message(error: &(dyn Error + 'static)) -> String {
    let mut parts = vec![error.to_string()];
    let mut cause = error.source();
    while let Some(inner) = cause {
        parts.push(inner.to_string());
        cause = inner.source();
    }
    parts.join(" | ")
}

/// Classify a processing failure.
///
/// Duplicate detection wins over transient detection: a message that says
/// both "timeout" and "duplicate key" is a duplicate.
pub fn classify(error: &(dyn Error + 'static)) -> Classification {
    let message = full_message(error);
    classify_message(&message).unwrap_or_else(|| match transient_io_kind(error) {
        Some(kind) => Classification::Transient {
            reason: format!("io error: {:?}", kind),
        },
        None => Classification::Unclassified,
    })
}

/// Classify from message text alone. `None` means no marker matched.
pub fn classify_message(message: &str) -> Option<Classification> {
    let lower = message.to_lowercase();

    if DUPLICATE_MARKERS.iter().any(|m| lower.contains(m)) {
        let constraint = constraint_pattern()
            .captures(message)
            .map(|c| c[1].to_string());
        let (column, value) = match key_pattern().captures(message) {
            Some(c) => (Some(c[1].to_string()), Some(c[2].to_string())),
            None => (None, None),
        };
        let entity = InferredEntity::infer(constraint.as_deref(), message);
        return Some(Classification::Duplicate(DuplicateDetails {
            constraint,
            column,
            value,
            entity,
        }));
    }

    TRANSIENT_MARKERS
        .iter()
        .find(|m| lower.contains(*m))
        .map(|m| Classification::Transient {
            reason: (*m).to_string(),
        })
}

/// First transient `io::ErrorKind` in the cause chain.
fn transient_io_kind(error: &(dyn Error + 'static)) -> Option<io::ErrorKind> {
    let mut current: Option<&(dyn Error + 'static)> = Some(error);
    while let Some(err) = current {
        if let Some(io_err) = err.downcast_ref::<io::Error>() {
            let kind = io_err.kind();
            if matches!(
                kind,
                io::ErrorKind::TimedOut
                    | io::ErrorKind::ConnectionRefused
                    | io::ErrorKind::ConnectionReset
                    | io::ErrorKind::ConnectionAborted
                    | io::ErrorKind::NotConnected
                    | io::ErrorKind::BrokenPipe
                    | io::ErrorKind::Interrupted
                    | io::ErrorKind::WouldBlock
            ) {
                return Some(kind);
            }
        }
        current = err.source();
    }
    None
}
