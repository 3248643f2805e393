//! Append-only partition log with deferred acknowledgement.
//!
//! Each partition keeps every record from its committed offset onward.
//! Consumers read ahead of the committed offset; records are only trimmed
//! once every offset below them has been acknowledged, so a consumer that
//! dies mid-window sees the unacknowledged tail again on restart.
//!
//! ```text
//!   base_offset     committed           next_offset
//!        │              │                    │
//!        ▼              ▼                    ▼
//!   ... [acked][acked][ pending | acked | pending ... ]
//!                      └─ pending offsets redelivered after rewind
//! ```

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::Notify;

/// One stored record.
#[derive(Debug)]
pub struct Record<T> {
    pub offset: u64,
    pub key: String,
    pub value: Arc<T>,
    pub published_at: DateTime<Utc>,
}

impl<T> Clone for Record<T> {
    fn clone(&self) -> Self {
        Self {
            offset: self.offset,
            key: self.key.clone(),
            value: Arc::clone(&self.value),
            published_at: self.published_at,
        }
    }
}

#[derive(Debug)]
struct PartitionLog<T> {
    records: VecDeque<Record<T>>,
    /// Offset of `records[0]`.
    base_offset: u64,
    next_offset: u64,
    /// Every offset below this has been acknowledged.
    committed: u64,
    /// Acknowledged offsets at or above `committed`.
    acked: BTreeSet<u64>,
    /// Delivery attempts per unacknowledged offset.
    attempts: HashMap<u64, u32>,
    /// Consumer should restart from `committed`.
    rewind: bool,
}

impl<T> PartitionLog<T> {
    fn new() -> Self {
        Self {
            records: VecDeque::new(),
            base_offset: 0,
            next_offset: 0,
            committed: 0,
            acked: BTreeSet::new(),
            attempts: HashMap::new(),
            rewind: false,
        }
    }

    fn advance_commit(&mut self) {
        while self.acked.remove(&self.committed) {
            self.attempts.remove(&self.committed);
            self.committed += 1;
        }
        while self.base_offset < self.committed && !self.records.is_empty() {
            self.records.pop_front();
            self.base_offset += 1;
        }
    }

    /// Drop records beyond the retention cap, oldest first.
    fn enforce_cap(&mut self, cap: usize) -> usize {
        let mut dropped = 0;
        while self.records.len() > cap {
            self.records.pop_front();
            self.attempts.remove(&self.base_offset);
            self.acked.remove(&self.base_offset);
            self.base_offset += 1;
            dropped += 1;
        }
        if self.committed < self.base_offset {
            self.committed = self.base_offset;
        }
        dropped
    }
}

/// A single ordered partition of a topic.
pub struct Partition<T> {
    index: u32,
    max_retained: Option<usize>,
    log: Mutex<PartitionLog<T>>,
    notify: Notify,
}

impl<T> Partition<T> {
    pub(super) fn new(index: u32, max_retained: Option<usize>) -> Self {
        Self {
            index,
            max_retained,
            log: Mutex::new(PartitionLog::new()),
            notify: Notify::new(),
        }
    }

    pub fn index(&self) -> u32 {
        self.index
    }

    /// Append a record and wake the consumer. Returns the assigned offset.
    pub(super) fn append(&self, key: String, value: Arc<T>) -> u64 {
        let offset = {
            let mut log = self.log.lock();
            let offset = log.next_offset;
            log.records.push_back(Record {
                offset,
                key,
                value,
                published_at: Utc::now(),
            });
            log.next_offset += 1;
            if let Some(cap) = self.max_retained {
                let dropped = log.enforce_cap(cap);
                if dropped > 0 {
                    tracing::trace!(partition = self.index, dropped, "Retention cap reached");
                }
            }
            offset
        };
        self.notify.notify_one();
        offset
    }

    /// Read up to `max` records starting at `offset`.
    ///
    /// Offsets already trimmed or acknowledged are skipped. Each returned
    /// record counts as one delivery attempt.
    pub fn read_from(&self, offset: u64, max: usize) -> Vec<Record<T>> {
        let mut log = self.log.lock();
        let start = offset.max(log.base_offset);
        let skip = (start - log.base_offset) as usize;
        let batch: Vec<Record<T>> = log
            .records
            .iter()
            .skip(skip)
            .filter(|record| !log.acked.contains(&record.offset))
            .take(max)
            .cloned()
            .collect();
        for record in &batch {
            *log.attempts.entry(record.offset).or_insert(0) += 1;
        }
        batch
    }

    /// Every retained record, oldest first, without counting a delivery.
    pub fn snapshot(&self) -> Vec<Record<T>> {
        self.log.lock().records.iter().cloned().collect()
    }

    /// Acknowledge one offset. The committed offset advances over any
    /// contiguous run of acknowledged offsets.
    pub fn ack(&self, offset: u64) {
        let mut log = self.log.lock();
        if offset < log.committed || offset >= log.next_offset {
            return;
        }
        log.acked.insert(offset);
        log.advance_commit();
    }

    /// Ask the consumer to restart from the committed offset.
    pub fn request_redelivery(&self) {
        self.log.lock().rewind = true;
        self.notify.notify_one();
    }

    pub(super) fn take_rewind(&self) -> bool {
        std::mem::take(&mut self.log.lock().rewind)
    }

    /// Delivery attempts recorded for an unacknowledged offset.
    pub fn attempts(&self, offset: u64) -> u32 {
        self.log.lock().attempts.get(&offset).copied().unwrap_or(0)
    }

    pub fn committed_offset(&self) -> u64 {
        self.log.lock().committed
    }

    pub fn end_offset(&self) -> u64 {
        self.log.lock().next_offset
    }

    /// Records published but not yet committed.
    pub fn lag(&self) -> u64 {
        let log = self.log.lock();
        log.next_offset - log.committed
    }

    /// Number of retained records.
    pub fn len(&self) -> usize {
        self.log.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Wait until a record is appended or a rewind is requested.
    pub async fn notified(&self) {
        self.notify.notified().await
    }
}

impl<T> std::fmt::Debug for Partition<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let log = self.log.lock();
        f.debug_struct("Partition")
            .field("index", &self.index)
            .field("base_offset", &log.base_offset)
            .field("committed", &log.committed)
            .field("next_offset", &log.next_offset)
            .finish_non_exhaustive()
    }
}
