//! The raw observation bus.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use serde::Serialize;
use thiserror::Error;
use tokio::sync::watch;

use super::topic::{fused_topic_name, raw_topic_name, Topic, DEAD_LETTER_TOPIC};
use crate::observation::{CanonicalTrack, EntityType, RawObservation, ValidationError};
use crate::resilience::DeadLetterEnvelope;

/// Default partitions per raw topic.
pub const DEFAULT_PARTITIONS: u32 = 4;

/// Default capacity of each worker's delivery channel.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default records retained per partition on output topics.
pub const DEFAULT_OUTPUT_RETENTION: usize = 10_000;

/// Errors returned by [`ObservationBus::publish`].
#[derive(Debug, Clone, PartialEq, Error)]
pub enum BusError {
    /// Observation failed validation and was dropped.
    #[error("invalid observation from {provider}: {source}")]
    Invalid {
        provider: String,
        #[source]
        source: ValidationError,
    },

    /// The bus has stopped accepting new observations.
    #[error("bus is closed to new observations")]
    Closed,
}

/// Bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Partitions per raw topic; also the fusion worker count per entity type.
    pub partitions: u32,
    /// Capacity of each worker's delivery channel.
    pub channel_capacity: usize,
    /// Records kept per partition on fused and dead-letter topics.
    pub output_retention: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITIONS,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            output_retention: DEFAULT_OUTPUT_RETENTION,
        }
    }
}

/// Where a published observation landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// A raw topic plus the pair it serves.
#[derive(Debug, Clone)]
pub struct RawTopic {
    pub entity_type: EntityType,
    pub provider: String,
    pub topic: Arc<Topic<RawObservation>>,
}

/// Per-topic counters for status reporting.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TopicStats {
    pub name: String,
    pub partitions: u32,
    pub published: u64,
    pub lag: u64,
}

/// Bus-wide counters for status reporting.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BusStats {
    pub published: u64,
    pub invalid_total: u64,
    pub invalid_by_provider: BTreeMap<String, u64>,
    pub raw_topics: Vec<TopicStats>,
    pub fused_published: u64,
    pub dead_letters_retained: usize,
}

/// Validating router from provider workers to per-provider raw topics.
///
/// Holds one raw topic per `(entity type, provider)`, one fused topic per
/// entity type and the dead-letter topic. Safe for concurrent publishers.
pub struct ObservationBus {
    config: BusConfig,
    raw_topics: DashMap<(EntityType, String), RawTopic>,
    fused: BTreeMap<EntityType, Arc<Topic<CanonicalTrack>>>,
    dead_letter: Arc<Topic<DeadLetterEnvelope>>,
    invalid: DashMap<String, AtomicU64>,
    published: AtomicU64,
    accepting: AtomicBool,
    topics_changed: watch::Sender<usize>,
}

impl ObservationBus {
    pub fn new(config: BusConfig) -> Self {
        let fused = EntityType::ALL
            .into_iter()
            .map(|entity_type| {
                let topic = Topic::with_retention(
                    fused_topic_name(entity_type),
                    config.partitions,
                    config.output_retention,
                );
                (entity_type, Arc::new(topic))
            })
            .collect();
        let dead_letter = Arc::new(Topic::with_retention(
            DEAD_LETTER_TOPIC,
            1,
            config.output_retention,
        ));
        let (topics_changed, _) = watch::channel(0);

        Self {
            config,
            raw_topics: DashMap::new(),
            fused,
            dead_letter,
            invalid: DashMap::new(),
            published: AtomicU64::new(0),
            accepting: AtomicBool::new(true),
            topics_changed,
        }
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    /// Validate and route an observation to its raw topic.
    ///
    /// Invalid observations increment the provider's invalid counter and
    /// are dropped; they are never retried or dead-lettered.
    pub fn publish(&self, observation: RawObservation) -> Result<PublishReceipt, BusError> {
        if !self.accepting.load(Ordering::Acquire) {
            return Err(BusError::Closed);
        }

        let provider = observation.provider.trim().to_lowercase();
        let observation = match observation.validated() {
            Ok(obs) => obs,
            Err(source) => {
                self.record_invalid(&provider, &source);
                return Err(BusError::Invalid { provider, source });
            }
        };

        let raw = self.ensure_raw_topic(observation.entity_type, &provider);
        let key = observation.scoped_identity();
        let (partition, offset) = raw.topic.publish(&key, observation);
        self.published.fetch_add(1, Ordering::Relaxed);

        tracing::trace!(
            topic = raw.topic.name(),
            partition,
            offset,
            key = %key,
            "Observation published"
        );

        Ok(PublishReceipt {
            topic: raw.topic.name().to_string(),
            partition,
            offset,
        })
    }

    /// Get or create the raw topic for a pair.
    ///
    /// Subscribers to [`ObservationBus::watch_topics`] are notified when a
    /// new topic appears.
    pub fn ensure_raw_topic(&self, entity_type: EntityType, provider: &str) -> RawTopic {
        let provider = provider.trim().to_lowercase();
        let key = (entity_type, provider.clone());
        if let Some(existing) = self.raw_topics.get(&key) {
            return existing.clone();
        }

        let mut created = false;
        let raw = self
            .raw_topics
            .entry(key)
            .or_insert_with(|| {
                created = true;
                RawTopic {
                    entity_type,
                    topic: Arc::new(Topic::new(
                        raw_topic_name(entity_type, &provider),
                        self.config.partitions,
                    )),
                    provider: provider.clone(),
                }
            })
            .clone();

        if created {
            tracing::info!(topic = raw.topic.name(), "Raw topic created");
            self.topics_changed.send_modify(|count| *count += 1);
        }
        raw
    }

    /// All raw topics for an entity type, sorted by name.
    pub fn raw_topics(&self, entity_type: EntityType) -> Vec<RawTopic> {
        let mut topics: Vec<RawTopic> = self
            .raw_topics
            .iter()
            .filter(|entry| entry.key().0 == entity_type)
            .map(|entry| entry.value().clone())
            .collect();
        topics.sort_by(|a, b| a.topic.name().cmp(b.topic.name()));
        topics
    }

    /// Receiver that changes whenever a raw topic is created.
    pub fn watch_topics(&self) -> watch::Receiver<usize> {
        self.topics_changed.subscribe()
    }

    /// Append a canonical track to its entity type's fused topic.
    pub fn publish_track(&self, track: CanonicalTrack) {
        let key = format!("{}:{}", track.entity_type, track.identity);
        if let Some(topic) = self.fused.get(&track.entity_type) {
            topic.publish(&key, track);
        }
    }

    pub fn fused_topic(&self, entity_type: EntityType) -> Option<&Arc<Topic<CanonicalTrack>>> {
        self.fused.get(&entity_type)
    }

    pub fn dead_letter_topic(&self) -> &Arc<Topic<DeadLetterEnvelope>> {
        &self.dead_letter
    }

    /// Invalid observations counted for a provider.
    pub fn invalid_count(&self, provider: &str) -> u64 {
        self.invalid
            .get(&provider.to_lowercase())
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Stop accepting new observations. Already-published records stay
    /// readable so in-flight windows can drain.
    pub fn close(&self) {
        if self.accepting.swap(false, Ordering::AcqRel) {
            tracing::info!("Observation bus closed to new publishes");
        }
    }

    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Records published but not yet committed across all raw topics.
    pub fn raw_lag(&self) -> u64 {
        self.raw_topics
            .iter()
            .map(|entry| entry.value().topic.lag())
            .sum()
    }

    pub fn stats(&self) -> BusStats {
        let mut raw_topics: Vec<TopicStats> = self
            .raw_topics
            .iter()
            .map(|entry| {
                let topic = &entry.value().topic;
                TopicStats {
                    name: topic.name().to_string(),
                    partitions: topic.partition_count(),
                    published: topic.end_offset_total(),
                    lag: topic.lag(),
                }
            })
            .collect();
        raw_topics.sort_by(|a, b| a.name.cmp(&b.name));

        let invalid_by_provider: BTreeMap<String, u64> = self
            .invalid
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();

        BusStats {
            published: self.published.load(Ordering::Relaxed),
            invalid_total: invalid_by_provider.values().sum(),
            invalid_by_provider,
            raw_topics,
            fused_published: self.fused.values().map(|t| t.end_offset_total()).sum(),
            dead_letters_retained: self.dead_letter.len(),
        }
    }

    fn record_invalid(&self, provider: &str, error: &ValidationError) {
        let count = self
            .invalid
            .entry(provider.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed)
            + 1;
        tracing::debug!(
            provider,
            reason = error.kind(),
            invalid_total = count,
            "Dropped invalid observation: {}",
            error
        );
    }
}

impl Default for ObservationBus {
    fn default() -> Self {
        Self::new(BusConfig::default())
    }
}

impl std::fmt::Debug for ObservationBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ObservationBus")
            .field("config", &self.config)
            .field("raw_topics", &self.raw_topics.len())
            .field("accepting", &self.is_accepting())
            .finish_non_exhaustive()
    }
}
