//! Generational entity handles and the arena that issues them
//!
//! A handle stays valid only as long as the slot it points at holds the same
//! generation. Destroying an entity bumps the generation, so a message that
//! captured the old handle is detected as stale instead of acting on whatever
//! reuses the slot.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Handle to an entity owned by an [`Arena`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityId {
    index: u32,
    generation: u32,
}

impl EntityId {
    /// Build a handle from raw parts (wire decoding, tests)
    pub const fn from_raw_parts(index: u32, generation: u32) -> Self {
        Self { index, generation }
    }

    /// Slot index inside the arena
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Generation of the slot when this handle was issued
    pub fn generation(&self) -> u32 {
        self.generation
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "entity:{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

/// Slot storage with generational handles
///
/// Iteration order is slot order, which is deterministic for a given sequence
/// of inserts and removals.
#[derive(Debug, Clone)]
pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Arena<T> {
    /// Create an empty arena
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    /// Insert a value and return its handle
    pub fn insert(&mut self, value: T) -> EntityId {
        self.len += 1;
        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            return EntityId::from_raw_parts(index, slot.generation);
        }

        let index = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        EntityId::from_raw_parts(index, 0)
    }

    /// Remove a value, invalidating every outstanding handle to it
    pub fn remove(&mut self, id: EntityId) -> Option<T> {
        let slot = self.slots.get_mut(id.index as usize)?;
        if slot.generation != id.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(id.index);
        self.len -= 1;
        Some(value)
    }

    /// Check whether a handle still refers to a live value
    pub fn contains(&self, id: EntityId) -> bool {
        self.get(id).is_some()
    }

    /// Get a value by handle
    pub fn get(&self, id: EntityId) -> Option<&T> {
        self.slots
            .get(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    /// Get a mutable value by handle
    pub fn get_mut(&mut self, id: EntityId) -> Option<&mut T> {
        self.slots
            .get_mut(id.index as usize)
            .filter(|slot| slot.generation == id.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    /// Fetch a value, reporting a stale or unknown handle as an error
    pub fn try_get_mut(&mut self, id: EntityId) -> crate::Result<&mut T> {
        self.get_mut(id).ok_or(crate::Error::StaleHandle(id))
    }

    /// Iterate over live values with their handles
    pub fn iter(&self) -> impl Iterator<Item = (EntityId, &T)> {
        self.slots.iter().enumerate().filter_map(|(i, slot)| {
            slot.value
                .as_ref()
                .map(|v| (EntityId::from_raw_parts(i as u32, slot.generation), v))
        })
    }

    /// Iterate mutably over live values with their handles
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (EntityId, &mut T)> {
        self.slots.iter_mut().enumerate().filter_map(|(i, slot)| {
            let generation = slot.generation;
            slot.value
                .as_mut()
                .map(|v| (EntityId::from_raw_parts(i as u32, generation), v))
        })
    }

    /// Handles of every live value
    pub fn ids(&self) -> Vec<EntityId> {
        self.iter().map(|(id, _)| id).collect()
    }

    /// Number of live values
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if the arena holds no live values
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Remove everything; outstanding handles become stale
    pub fn clear(&mut self) {
        for (i, slot) in self.slots.iter_mut().enumerate() {
            if slot.value.take().is_some() {
                slot.generation = slot.generation.wrapping_add(1);
                self.free.push(i as u32);
            }
        }
        self.len = 0;
    }
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}
