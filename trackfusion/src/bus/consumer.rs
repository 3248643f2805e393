//! Explicit per-partition consumer loop.
//!
//! A [`PartitionConsumer`] reads records from one partition into a bounded
//! channel. Nothing is committed here: whoever receives a [`Delivery`] must
//! call [`Delivery::ack`] once the record is folded into an emitted result
//! or quarantined, or [`Delivery::nack`] to have the partition redelivered
//! from its committed offset.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::partition::{Partition, Record};

/// Records read per lock acquisition.
const READ_BATCH: usize = 256;

/// One record handed to a worker, carrying its own acknowledgement handle.
pub struct Delivery<T> {
    pub topic: Arc<str>,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub value: Arc<T>,
    /// Delivery attempts including this one.
    pub attempts: u32,
    source: Arc<Partition<T>>,
}

impl<T> Delivery<T> {
    /// Mark the record processed.
    pub fn ack(&self) {
        self.source.ack(self.offset);
    }

    /// Request redelivery of everything from the committed offset.
    pub fn nack(&self) {
        self.source.request_redelivery();
    }

    /// `(topic, partition, offset)`, unique per record.
    pub fn coordinates(&self) -> (Arc<str>, u32, u64) {
        (Arc::clone(&self.topic), self.partition, self.offset)
    }
}

impl<T> Clone for Delivery<T> {
    fn clone(&self) -> Self {
        Self {
            topic: Arc::clone(&self.topic),
            partition: self.partition,
            offset: self.offset,
            key: self.key.clone(),
            value: Arc::clone(&self.value),
            attempts: self.attempts,
            source: Arc::clone(&self.source),
        }
    }
}

impl<T> std::fmt::Debug for Delivery<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("topic", &self.topic)
            .field("partition", &self.partition)
            .field("offset", &self.offset)
            .field("key", &self.key)
            .field("attempts", &self.attempts)
            .finish_non_exhaustive()
    }
}

/// Reads one partition and forwards records to a worker channel.
pub struct PartitionConsumer<T> {
    topic: Arc<str>,
    partition: Arc<Partition<T>>,
    cursor: u64,
}

impl<T: Send + Sync + 'static> PartitionConsumer<T> {
    pub(super) fn new(topic: Arc<str>, partition: Arc<Partition<T>>, cursor: u64) -> Self {
        Self {
            topic,
            partition,
            cursor,
        }
    }

    /// Start the consumer as an async task.
    pub fn start(
        self,
        tx: mpsc::Sender<Delivery<T>>,
        shutdown: CancellationToken,
    ) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run(tx, shutdown).await;
        })
    }

    /// Run until cancelled or the receiving side closes.
    ///
    /// Cancellation stops following new appends, not delivery: the consumer
    /// keeps forwarding until it reaches the partition's end offset. The
    /// receiver must keep reading until the channel closes.
    pub async fn run(mut self, tx: mpsc::Sender<Delivery<T>>, shutdown: CancellationToken) {
        tracing::debug!(
            topic = %self.topic,
            partition = self.partition.index(),
            offset = self.cursor,
            "Partition consumer started"
        );

        let drained = if self.follow(&tx, &shutdown).await {
            self.drain(&tx).await
        } else {
            0
        };

        tracing::debug!(
            topic = %self.topic,
            partition = self.partition.index(),
            drained,
            "Partition consumer stopped"
        );
    }

    /// Forward records as they are appended. Returns `true` when cancelled,
    /// `false` when the channel closed.
    async fn follow(&mut self, tx: &mpsc::Sender<Delivery<T>>, shutdown: &CancellationToken) -> bool {
        loop {
            if self.partition.take_rewind() {
                let committed = self.partition.committed_offset();
                tracing::debug!(
                    topic = %self.topic,
                    partition = self.partition.index(),
                    from = self.cursor,
                    to = committed,
                    "Rewinding for redelivery"
                );
                self.cursor = committed;
            }

            let batch = self.partition.read_from(self.cursor, READ_BATCH);
            if batch.is_empty() {
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return true,
                    _ = self.partition.notified() => continue,
                }
            }

            for record in batch {
                let offset = record.offset;
                let delivery = self.delivery(record);

                // The cursor only moves past records the channel accepted,
                // so a cancelled send is picked up again by the drain.
                tokio::select! {
                    biased;
                    _ = shutdown.cancelled() => return true,
                    sent = tx.send(delivery) => {
                        if sent.is_err() {
                            tracing::debug!(topic = %self.topic, "Consumer channel closed, stopping");
                            return false;
                        }
                        self.cursor = offset + 1;
                    }
                }
            }
        }
    }

    /// Forward everything from the cursor to the current end offset.
    async fn drain(&mut self, tx: &mpsc::Sender<Delivery<T>>) -> u64 {
        let mut forwarded = 0;
        loop {
            let batch = self.partition.read_from(self.cursor, READ_BATCH);
            if batch.is_empty() {
                return forwarded;
            }
            for record in batch {
                let offset = record.offset;
                if tx.send(self.delivery(record)).await.is_err() {
                    return forwarded;
                }
                self.cursor = offset + 1;
                forwarded += 1;
            }
        }
    }

    fn delivery(&self, record: Record<T>) -> Delivery<T> {
        Delivery {
            topic: Arc::clone(&self.topic),
            partition: self.partition.index(),
            offset: record.offset,
            attempts: self.partition.attempts(record.offset),
            key: record.key,
            value: record.value,
            source: Arc::clone(&self.partition),
        }
    }
}
