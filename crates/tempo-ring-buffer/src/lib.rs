//! Tempo Ring Buffer - Fixed-capacity ring with wrapping sequence cursors
//!
//! Values are addressed by a monotonically increasing `u64` sequence number
//! rather than a raw slot index. The slot for a sequence is `seq % capacity`,
//! computed in one place, so callers never do modulo arithmetic themselves.
//!
//! # Features
//!
//! - **Bounded memory**: Fixed number of slots allocated up front
//! - **O(1) push**: The newest value always wins; the oldest is evicted
//! - **Sequence lookup**: Any retained value is reachable by its sequence
//! - **Stable ordering**: Iteration runs oldest to newest
//!
//! # Example
//!
//! ```rust
//! use tempo_ring_buffer::RingBuffer;
//!
//! let mut ring = RingBuffer::new(4);
//! for value in 0..5 {
//!     ring.push(value);
//! }
//!
//! // The first value was evicted, sequences 1..=4 remain
//! assert_eq!(ring.oldest_seq(), Some(1));
//! assert_eq!(ring.get(0), None);
//! assert_eq!(ring.get(4), Some(&4));
//! ```

/// A fixed-capacity ring addressed by sequence number
#[derive(Debug, Clone)]
pub struct RingBuffer<T> {
    slots: Vec<Option<T>>,
    /// Sequence the next push will receive
    next_seq: u64,
    /// Nothing below this sequence is retained, even if its slot is not yet reused
    floor: u64,
    capacity: usize,
}

impl<T> RingBuffer<T> {
    /// Create a ring with `capacity` slots
    ///
    /// # Panics
    ///
    /// Panics if `capacity` is zero.
    pub fn new(capacity: usize) -> Self {
        assert!(capacity > 0, "Capacity must be greater than 0");
        Self {
            slots: (0..capacity).map(|_| None).collect(),
            next_seq: 0,
            floor: 0,
            capacity,
        }
    }

    fn slot(&self, seq: u64) -> usize {
        (seq % self.capacity as u64) as usize
    }

    /// Store a value, evicting the oldest when full. Returns its sequence.
    pub fn push(&mut self, value: T) -> u64 {
        let seq = self.next_seq;
        let index = self.slot(seq);
        self.slots[index] = Some(value);
        self.next_seq += 1;
        seq
    }

    /// Sequence the next push will receive
    pub fn next_seq(&self) -> u64 {
        self.next_seq
    }

    /// Sequence of the oldest retained value
    pub fn oldest_seq(&self) -> Option<u64> {
        let oldest = self
            .next_seq
            .saturating_sub(self.capacity as u64)
            .max(self.floor);
        (oldest < self.next_seq).then_some(oldest)
    }

    /// Sequence of the newest value
    pub fn newest_seq(&self) -> Option<u64> {
        self.oldest_seq().map(|_| self.next_seq - 1)
    }

    /// Check whether `seq` is still retained
    pub fn contains(&self, seq: u64) -> bool {
        match self.oldest_seq() {
            Some(oldest) => seq >= oldest && seq < self.next_seq,
            None => false,
        }
    }

    /// Get a retained value by sequence
    pub fn get(&self, seq: u64) -> Option<&T> {
        if !self.contains(seq) {
            return None;
        }
        self.slots[self.slot(seq)].as_ref()
    }

    /// Get a retained value mutably by sequence
    pub fn get_mut(&mut self, seq: u64) -> Option<&mut T> {
        if !self.contains(seq) {
            return None;
        }
        let index = self.slot(seq);
        self.slots[index].as_mut()
    }

    /// The newest value
    pub fn newest(&self) -> Option<&T> {
        self.newest_seq().and_then(|seq| self.get(seq))
    }

    /// Iterate over retained values oldest to newest
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = (u64, &T)> + '_ {
        self.range_from(self.oldest_seq().unwrap_or(self.next_seq))
    }

    /// Iterate over retained values with sequence `>= from`, oldest first
    pub fn range_from(&self, from: u64) -> impl DoubleEndedIterator<Item = (u64, &T)> + '_ {
        let start = self.oldest_seq().map_or(self.next_seq, |oldest| from.max(oldest));
        (start..self.next_seq).filter_map(move |seq| self.get(seq).map(|v| (seq, v)))
    }

    /// Drop every value; sequence numbering continues
    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            *slot = None;
        }
        self.floor = self.next_seq;
    }

    /// Number of retained values
    pub fn len(&self) -> usize {
        self.oldest_seq()
            .map_or(0, |oldest| (self.next_seq - oldest) as usize)
    }

    /// Check if nothing is retained
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Slot count
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Get statistics about the ring
    pub fn stats(&self) -> BufferStats {
        BufferStats {
            capacity: self.capacity,
            count: self.len(),
            oldest_seq: self.oldest_seq().unwrap_or(0),
            newest_seq: self.newest_seq().unwrap_or(0),
        }
    }
}

/// Statistics about a ring buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BufferStats {
    /// Slot count
    pub capacity: usize,
    /// Retained values
    pub count: usize,
    /// Oldest retained sequence
    pub oldest_seq: u64,
    /// Newest retained sequence
    pub newest_seq: u64,
}

impl BufferStats {
    /// Get the fill percentage (0.0 to 1.0)
    pub fn fill_ratio(&self) -> f32 {
        self.count as f32 / self.capacity as f32
    }
}

impl<T> Default for RingBuffer<T> {
    fn default() -> Self {
        Self::new(120) // 2 seconds of samples at 60 Hz
    }
}
