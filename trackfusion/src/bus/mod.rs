//! Raw Observation Bus.
//!
//! In-process, partitioned, append-only topics with an explicit
//! acknowledgement contract:
//!
//! ```text
//!  provider workers                 raw topics                 fusion workers
//!  ────────────────          ──────────────────────          ───────────────
//!  flightradar24 ──publish──► raw-flightradar24-data ─┐
//!                              [p0][p1][p2][p3]       ├─ p0 ──► worker 0
//!  adsbexchange  ──publish──► raw-adsbexchange-data  ─┤  p1 ──► worker 1
//!                              [p0][p1][p2][p3]       │  ...
//! ```
//!
//! Keys are `<entity>:<identity>`, hashed with the same function for every
//! topic, so partition *n* of every raw topic of an entity type carries the
//! same identities and is consumed by the same fusion worker.
//!
//! Delivery is at-least-once. A record is committed only after the worker
//! acknowledges it; see [`Delivery::ack`].

mod consumer;
mod observation_bus;
mod partition;
mod topic;

pub use consumer::{Delivery, PartitionConsumer};
pub use observation_bus::{
    BusConfig, BusError, BusStats, ObservationBus, PublishReceipt, RawTopic, TopicStats,
    DEFAULT_CHANNEL_CAPACITY, DEFAULT_OUTPUT_RETENTION, DEFAULT_PARTITIONS,
};
pub use partition::{Partition, Record};
pub use topic::{fused_topic_name, partition_for_key, raw_topic_name, Topic, DEAD_LETTER_TOPIC};
