//! Per-entity history of timestamped input samples
//!
//! The producer (client capture, or the server's packet intake) appends; the
//! consumer (prediction, or the authoritative step) reads through a cursor.
//! When the producer laps an unread sample, that sample is lost and the cursor
//! is pulled forward: the newest input always wins and the producer never
//! blocks on a stalled consumer.

use tempo_core::{EntityId, InputSample, Timestamp};
use tempo_ring_buffer::RingBuffer;

/// Lifecycle of a history
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryState {
    /// Not yet bound to an entity
    #[default]
    Idle,
    /// Bound and receiving samples
    Capturing,
    /// The consumer caught up with the producer on its last drain
    Starved,
}

/// Result of looking up a snapshot timestamp in the history
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Rewind {
    /// Cursor placed after the newest sample at or before the timestamp;
    /// this many samples are now unread
    Found(usize),
    /// Every retained sample is newer and nothing was ever evicted, so all of
    /// them are unread
    BeforeFirst(usize),
    /// The matching sample has been overwritten
    Lost,
}

/// Fixed-capacity history of one entity's input
#[derive(Debug, Clone)]
pub struct InputHistory {
    ring: RingBuffer<InputSample>,
    /// Sequence of the next sample to consume
    read_seq: u64,
    entity: Option<EntityId>,
    state: HistoryState,
    /// Unread samples lost to overflow
    overwritten: u64,
}

impl InputHistory {
    /// Create a history holding up to `capacity` samples
    pub fn new(capacity: usize) -> Self {
        Self {
            ring: RingBuffer::new(capacity),
            read_seq: 0,
            entity: None,
            state: HistoryState::Idle,
            overwritten: 0,
        }
    }

    /// Attach the history to the entity whose input it records
    pub fn bind(&mut self, entity: EntityId) {
        self.entity = Some(entity);
        self.state = HistoryState::Capturing;
    }

    /// The bound entity
    pub fn entity(&self) -> Option<EntityId> {
        self.entity
    }

    /// Current lifecycle state
    pub fn state(&self) -> HistoryState {
        self.state
    }

    /// Record a sample. O(1); overwrites the oldest slot when full.
    pub fn append(&mut self, sample: InputSample) {
        self.ring.push(sample);

        if let Some(oldest) = self.ring.oldest_seq() {
            if self.read_seq < oldest {
                self.overwritten += oldest - self.read_seq;
                self.read_seq = oldest;
            }
        }

        if self.state == HistoryState::Starved {
            self.state = HistoryState::Capturing;
        }
    }

    /// Consume the oldest unread sample
    pub fn next(&mut self) -> Option<InputSample> {
        let sample = self.ring.get(self.read_seq).copied()?;
        self.read_seq += 1;
        Some(sample)
    }

    /// Consume every unread sample, oldest first
    ///
    /// A bound history that yields nothing becomes `Starved` until the next
    /// append.
    pub fn drain(&mut self) -> Vec<InputSample> {
        let mut samples = Vec::with_capacity(self.unread());
        while let Some(sample) = self.next() {
            samples.push(sample);
        }
        if samples.is_empty() && self.state == HistoryState::Capturing {
            self.state = HistoryState::Starved;
        }
        samples
    }

    /// Unread samples, oldest first, without consuming them
    pub fn unread_samples(&self) -> impl Iterator<Item = &InputSample> + '_ {
        self.ring.range_from(self.read_seq).map(|(_, s)| s)
    }

    /// Number of unread samples
    pub fn unread(&self) -> usize {
        (self.ring.next_seq() - self.read_seq) as usize
    }

    /// The most recently appended sample
    pub fn newest(&self) -> Option<&InputSample> {
        self.ring.newest()
    }

    /// Timestamp of the most recently appended sample
    pub fn newest_timestamp(&self) -> Option<Timestamp> {
        self.newest().map(|s| s.timestamp)
    }

    /// Move the read cursor to just after the newest sample stamped at or
    /// before `timestamp`, scanning backward from the newest sample
    pub fn rewind_to(&mut self, timestamp: Timestamp) -> Rewind {
        let hit = self
            .ring
            .iter()
            .rev()
            .find(|(_, sample)| sample.timestamp <= timestamp)
            .map(|(seq, _)| seq);

        match hit {
            Some(seq) => {
                self.read_seq = seq + 1;
                Rewind::Found(self.unread())
            }
            None if self.ring.next_seq() <= self.ring.capacity() as u64 => {
                self.read_seq = self.ring.oldest_seq().unwrap_or(self.ring.next_seq());
                Rewind::BeforeFirst(self.unread())
            }
            None => Rewind::Lost,
        }
    }

    /// The sample the read cursor last passed, if still retained
    pub fn last_consumed(&self) -> Option<&InputSample> {
        self.read_seq.checked_sub(1).and_then(|seq| self.ring.get(seq))
    }

    /// Unread samples lost to overflow since creation
    pub fn overwritten(&self) -> u64 {
        self.overwritten
    }

    /// Number of retained samples
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// Check if no samples are retained
    pub fn is_empty(&self) -> bool {
        self.ring.is_empty()
    }

    /// Capacity in samples
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Unbind and drop every sample
    pub fn reset(&mut self) {
        self.ring.clear();
        self.read_seq = self.ring.next_seq();
        self.entity = None;
        self.state = HistoryState::Idle;
    }
}

impl Default for InputHistory {
    fn default() -> Self {
        Self::new(120)
    }
}
