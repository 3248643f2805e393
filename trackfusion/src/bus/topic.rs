//! Partitioned topics and topic naming.

use std::sync::Arc;

use super::consumer::PartitionConsumer;
use super::partition::{Partition, Record};
use crate::observation::EntityType;
use crate::provider::ProviderKind;

/// Name of the quarantine topic.
pub const DEAD_LETTER_TOPIC: &str = "dead-letter";

/// Raw topic name for a provider's observations of one entity type.
///
/// Catalogued providers get `raw-<provider>-data`. Providers outside the
/// catalogue, or reporting an entity type the catalogue does not list for
/// them, get the entity type appended so topics stay one per pair.
pub fn raw_topic_name(entity_type: EntityType, provider: &str) -> String {
    let provider = provider.trim().to_lowercase();
    match provider.parse::<ProviderKind>() {
        Ok(kind) if kind.entity_type() == entity_type => format!("raw-{}-data", provider),
        _ => format!("raw-{}-{}-data", provider, entity_type),
    }
}

/// Fused output topic for an entity type.
pub fn fused_topic_name(entity_type: EntityType) -> String {
    format!("processed-{}-data", entity_type)
}

/// Stable partition assignment for a key (FNV-1a).
///
/// The same key lands on the same partition index in every topic with the
/// same partition count, which is what lets one fusion worker own an
/// identity across all providers.
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

    let hash = key.bytes().fold(FNV_OFFSET, |hash, byte| {
        (hash ^ u64::from(byte)).wrapping_mul(FNV_PRIME)
    });
    (hash % u64::from(partitions.max(1))) as u32
}

/// A named set of ordered partitions.
pub struct Topic<T> {
    name: Arc<str>,
    partitions: Vec<Arc<Partition<T>>>,
}

impl<T> Topic<T> {
    /// Create a topic that retains records until acknowledged.
    pub fn new(name: impl Into<Arc<str>>, partitions: u32) -> Self {
        Self::build(name.into(), partitions, None)
    }

    /// Create a topic that keeps at most `max_retained` records per partition.
    ///
    /// Used for output topics nobody acknowledges.
    pub fn with_retention(name: impl Into<Arc<str>>, partitions: u32, max_retained: usize) -> Self {
        Self::build(name.into(), partitions, Some(max_retained))
    }

    fn build(name: Arc<str>, partitions: u32, max_retained: Option<usize>) -> Self {
        let partitions = (0..partitions.max(1))
            .map(|i| Arc::new(Partition::new(i, max_retained)))
            .collect();
        Self { name, partitions }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub(super) fn shared_name(&self) -> Arc<str> {
        Arc::clone(&self.name)
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions.len() as u32
    }

    pub fn partition(&self, index: u32) -> Option<&Arc<Partition<T>>> {
        self.partitions.get(index as usize)
    }

    /// Append a value, routing by key. Returns `(partition, offset)`.
    pub fn publish(&self, key: &str, value: T) -> (u32, u64) {
        let index = partition_for_key(key, self.partition_count());
        let offset = self.partitions[index as usize].append(key.to_string(), Arc::new(value));
        (index, offset)
    }

    /// Records published but not yet committed, across all partitions.
    pub fn lag(&self) -> u64 {
        self.partitions.iter().map(|p| p.lag()).sum()
    }

    /// Total records ever published.
    pub fn end_offset_total(&self) -> u64 {
        self.partitions.iter().map(|p| p.end_offset()).sum()
    }

    /// Every retained record, ordered by partition then offset.
    pub fn records(&self) -> Vec<(u32, Record<T>)> {
        self.partitions
            .iter()
            .flat_map(|p| {
                let index = p.index();
                p.snapshot().into_iter().map(move |r| (index, r))
            })
            .collect()
    }

    /// Number of retained records across partitions.
    pub fn len(&self) -> usize {
        self.partitions.iter().map(|p| p.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T: Send + Sync + 'static> Topic<T> {
    /// Consumer for one partition, starting at its committed offset.
    pub fn consumer(self: &Arc<Self>, partition: u32) -> Option<PartitionConsumer<T>> {
        let p = self.partition(partition)?;
        Some(PartitionConsumer::new(
            self.shared_name(),
            Arc::clone(p),
            p.committed_offset(),
        ))
    }
}

impl<T> std::fmt::Debug for Topic<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Topic")
            .field("name", &self.name)
            .field("partitions", &self.partitions.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_topic_names() {
        assert_eq!(
            raw_topic_name(EntityType::Aircraft, "FlightRadar24"),
            "raw-flightradar24-data"
        );
        assert_eq!(
            raw_topic_name(EntityType::Vessel, "marinetrafficv2"),
            "raw-marinetrafficv2-data"
        );
        assert_eq!(
            raw_topic_name(EntityType::Vessel, "flightradar24"),
            "raw-flightradar24-vessel-data"
        );
        assert_eq!(
            raw_topic_name(EntityType::Aircraft, "opensky"),
            "raw-opensky-aircraft-data"
        );
    }

    #[test]
    fn test_fused_topic_names() {
        assert_eq!(fused_topic_name(EntityType::Aircraft), "processed-aircraft-data");
        assert_eq!(fused_topic_name(EntityType::Vessel), "processed-vessel-data");
    }

    #[test]
    fn test_partition_assignment_is_stable() {
        let a = partition_for_key("aircraft:ABC123", 8);
        for _ in 0..10 {
            assert_eq!(partition_for_key("aircraft:ABC123", 8), a);
        }
        assert!(a < 8);
        assert_eq!(partition_for_key("anything", 1), 0);
        assert_eq!(partition_for_key("anything", 0), 0);
    }

    #[test]
    fn test_same_key_same_partition_across_topics() {
        let t1: Topic<u32> = Topic::new("raw-flightradar24-data", 4);
        let t2: Topic<u32> = Topic::new("raw-adsbexchange-data", 4);
        let (p1, _) = t1.publish("aircraft:ABC123", 1);
        let (p2, _) = t2.publish("aircraft:ABC123", 2);
        assert_eq!(p1, p2);
    }

    #[test]
    fn test_ordering_within_partition() {
        let topic: Topic<u32> = Topic::new("t", 2);
        for i in 0..5 {
            topic.publish("same-key", i);
        }
        let values: Vec<u32> = topic.records().iter().map(|(_, r)| *r.value).collect();
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert_eq!(topic.end_offset_total(), 5);
    }
}
