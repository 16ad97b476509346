//! Generational arena used to own actors.
//!
//! Parents and children refer to each other through [`Index`] values instead
//! of shared pointers. A removed slot bumps its generation, so stale indices
//! stop resolving instead of aliasing whatever reuses the slot.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Index {
    slot: u32,
    generation: u32,
}

impl Index {
    pub fn slot(&self) -> u32 {
        self.slot
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }
}

struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

pub struct Arena<T> {
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
}

impl<T> Default for Arena<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Arena<T> {
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
        }
    }

    pub fn insert(&mut self, value: T) -> Index {
        self.len += 1;
        if let Some(slot) = self.free.pop() {
            let entry = &mut self.slots[slot as usize];
            entry.value = Some(value);
            return Index {
                slot,
                generation: entry.generation,
            };
        }
        let slot = self.slots.len() as u32;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        Index { slot, generation: 0 }
    }

    pub fn remove(&mut self, index: Index) -> Option<T> {
        let entry = self.slots.get_mut(index.slot as usize)?;
        if entry.generation != index.generation {
            return None;
        }
        let value = entry.value.take()?;
        entry.generation = entry.generation.wrapping_add(1);
        self.free.push(index.slot);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, index: Index) -> Option<&T> {
        self.slots
            .get(index.slot as usize)
            .filter(|entry| entry.generation == index.generation)
            .and_then(|entry| entry.value.as_ref())
    }

    pub fn get_mut(&mut self, index: Index) -> Option<&mut T> {
        self.slots
            .get_mut(index.slot as usize)
            .filter(|entry| entry.generation == index.generation)
            .and_then(|entry| entry.value.as_mut())
    }

    pub fn contains(&self, index: Index) -> bool {
        self.get(index).is_some()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = (Index, &T)> {
        self.slots.iter().enumerate().filter_map(|(slot, entry)| {
            entry.value.as_ref().map(|value| {
                (
                    Index {
                        slot: slot as u32,
                        generation: entry.generation,
                    },
                    value,
                )
            })
        })
    }
}
