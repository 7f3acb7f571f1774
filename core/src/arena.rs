//! Generational slab used as the owning table for signals, receivers and
//! in-flight receptions.
//!
//! Cross-references (interval tree payloads, events) hold a [`Key`] rather
//! than a pointer. Removing a value bumps the slot generation, so every key
//! that still names the old occupant resolves to `None` instead of aliasing
//! whatever reuses the slot.

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Key {
    index: u32,
    generation: u32,
}

impl Key {
    pub fn index(self) -> usize {
        self.index as usize
    }

    pub fn generation(self) -> u32 {
        self.generation
    }
}

impl std::fmt::Display for Key {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}v{}", self.index, self.generation)
    }
}

#[derive(Debug, Clone)]
struct Slot<T> {
    generation: u32,
    value: Option<T>,
}

#[derive(Debug, Clone)]
pub struct Slab<T> {
    what: &'static str,
    slots: Vec<Slot<T>>,
    free: Vec<u32>,
    len: usize,
    limit: Option<usize>,
}

impl<T> Slab<T> {
    pub fn new(what: &'static str) -> Self {
        Self {
            what,
            slots: Vec::new(),
            free: Vec::new(),
            len: 0,
            limit: None,
        }
    }

    /// A slab that refuses to hold more than `limit` live values.
    pub fn with_limit(what: &'static str, limit: usize) -> Self {
        Self {
            limit: Some(limit),
            ..Self::new(what)
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn insert(&mut self, value: T) -> Result<Key> {
        if let Some(limit) = self.limit {
            if self.len >= limit {
                return Err(SimError::Exhausted {
                    what: self.what,
                    capacity: limit,
                });
            }
        }

        if let Some(index) = self.free.pop() {
            let slot = &mut self.slots[index as usize];
            slot.value = Some(value);
            self.len += 1;
            return Ok(Key {
                index,
                generation: slot.generation,
            });
        }

        let index = u32::try_from(self.slots.len()).map_err(|_| SimError::Exhausted {
            what: self.what,
            capacity: u32::MAX as usize,
        })?;
        self.slots.try_reserve(1).map_err(|_| SimError::Exhausted {
            what: self.what,
            capacity: self.slots.len(),
        })?;
        self.slots.push(Slot {
            generation: 0,
            value: Some(value),
        });
        self.len += 1;
        Ok(Key {
            index,
            generation: 0,
        })
    }

    /// Removes the value named by `key`. Stale keys are a no-op.
    pub fn remove(&mut self, key: Key) -> Option<T> {
        let slot = self.slots.get_mut(key.index())?;
        if slot.generation != key.generation {
            return None;
        }
        let value = slot.value.take()?;
        slot.generation = slot.generation.wrapping_add(1);
        self.free.push(key.index);
        self.len -= 1;
        Some(value)
    }

    pub fn get(&self, key: Key) -> Option<&T> {
        self.slots
            .get(key.index())
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_ref())
    }

    pub fn get_mut(&mut self, key: Key) -> Option<&mut T> {
        self.slots
            .get_mut(key.index())
            .filter(|slot| slot.generation == key.generation)
            .and_then(|slot| slot.value.as_mut())
    }

    pub fn contains(&self, key: Key) -> bool {
        self.get(key).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (Key, &T)> {
        self.slots.iter().enumerate().filter_map(|(index, slot)| {
            slot.value.as_ref().map(|value| {
                (
                    Key {
                        index: index as u32,
                        generation: slot.generation,
                    },
                    value,
                )
            })
        })
    }
}
