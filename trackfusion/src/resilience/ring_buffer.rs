//! Fixed-capacity buffer of recent items.

/// A fixed-size circular buffer that overwrites its oldest entry.
#[derive(Clone, Debug)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Index the next push writes to.
    head: usize,
    len: usize,
}

impl<T> RingBuffer<T> {
    /// Creates a buffer holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            head: 0,
            len: 0,
        }
    }

    pub fn push(&mut self, value: T) {
        let capacity = self.slots.len();
        self.slots[self.head] = Some(value);
        self.head = (self.head + 1) % capacity;
        self.len = (self.len + 1).min(capacity);
    }

    /// Items from newest to oldest.
    pub fn iter_newest(&self) -> impl Iterator<Item = &T> {
        let capacity = self.slots.len();
        (1..=self.len).filter_map(move |back| {
            let idx = (self.head + capacity - back) % capacity;
            self.slots[idx].as_ref()
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.head = 0;
        self.len = 0;
    }
}

impl<T: Clone> RingBuffer<T> {
    /// Up to `n` items, newest first.
    pub fn recent(&self, n: usize) -> Vec<T> {
        self.iter_newest().take(n).cloned().collect()
    }
}
