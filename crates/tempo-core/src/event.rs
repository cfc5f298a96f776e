//! Intra-process message bus for gameplay notifications
//!
//! The core raises events here and never interprets them; scoring, audio and
//! UI drain the bus on their own schedule.

use crate::{EntityId, SideEffect, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// A gameplay notification tagged with the entity that raised it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameEvent {
    pub entity: EntityId,
    pub effect: SideEffect,
    /// Timestamp of the input sample that produced the event
    pub timestamp: Timestamp,
}

/// FIFO message bus
#[derive(Debug, Clone)]
pub struct EventBus<E> {
    queue: VecDeque<E>,
    posted: u64,
}

impl<E> EventBus<E> {
    /// Create an empty bus
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            posted: 0,
        }
    }

    /// Post a message
    pub fn post(&mut self, event: E) {
        self.posted += 1;
        self.queue.push_back(event);
    }

    /// Take the oldest message
    pub fn poll(&mut self) -> Option<E> {
        self.queue.pop_front()
    }

    /// Take every pending message, oldest first
    pub fn drain(&mut self) -> impl Iterator<Item = E> + '_ {
        self.queue.drain(..)
    }

    /// Check if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    /// Number of pending messages
    pub fn len(&self) -> usize {
        self.queue.len()
    }

    /// Total messages ever posted
    pub fn total_posted(&self) -> u64 {
        self.posted
    }
}

impl<E> Default for EventBus<E> {
    fn default() -> Self {
        Self::new()
    }
}
