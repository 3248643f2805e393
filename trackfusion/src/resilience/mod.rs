//! Failure classification, error monitoring and dead-letter routing.
//!
//! Fusion workers hand every sink failure to an [`ErrorHandler`], which
//! decides between three outcomes:
//!
//! | Classification | Recorded | Dead-lettered | Acknowledged |
//! |----------------|----------|---------------|--------------|
//! | duplicate      | no       | no            | yes          |
//! | transient      | yes      | no            | no (redeliver) |
//! | unclassified   | yes      | yes           | yes          |

mod classifier;
mod dead_letter;
mod handler;
mod monitor;
mod ring_buffer;

pub use classifier::{
    classify, classify_message, full_message, Classification, DuplicateDetails, InferredEntity,
};
pub use dead_letter::{
    format_trace, truncate_trace, DeadLetterEnvelope, DeadLetterPublisher, DeadLetterRouter,
    FailedMessage, PublishError, MAX_TRACE_CHARS, TRUNCATION_MARKER,
};
pub use handler::{ErrorHandler, FailureOutcome, ResilienceStats};
pub use monitor::{
    ErrorAlert, ErrorHealth, ErrorMonitor, ErrorReport, ErrorSummary, HealthSummary,
    DEAD_LETTER_DOWNGRADE_THRESHOLD, RECENT_ERROR_CAPACITY, REPORT_RECENT_ERRORS,
    SURGE_THRESHOLD, TOPIC_ALERT_INTERVAL, TYPE_ALERT_INTERVAL,
};
pub use ring_buffer::RingBuffer;
