//! Bounded slotted entity registry.
//!
//! Each resident actor lives in exactly one slot and its slot index doubles as
//! its process id: the key for deterministic ordering and array lookup.
//! Freed slots are handed out again (lowest first) before the registry grows,
//! which keeps the phase index range as small as the peak population.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;

/// Shared handle to an actor. The mutex is the per-actor critical section
/// used by parallel phases.
pub type ActorHandle<T> = Arc<Mutex<T>>;

/// An actor that can remember which registry slot it occupies.
pub trait Slotted {
    /// Slot currently occupied, if resident.
    fn slot(&self) -> Option<usize>;

    /// Record the slot assignment. Only the registry calls this.
    fn set_slot(&mut self, slot: Option<usize>);
}

/// Registry errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// Every slot is occupied.
    #[error("registry full ({capacity} slots)")]
    Full {
        /// Registry capacity.
        capacity: usize,
    },

    /// The actor already occupies a slot in this registry.
    #[error("actor already resident in slot {slot}")]
    AlreadyResident {
        /// Occupied slot.
        slot: usize,
    },
}

/// Fixed-capacity ordered array of optional actor slots.
pub struct EntityRegistry<T> {
    slots: Vec<Option<ActorHandle<T>>>,
    free: BTreeSet<usize>,
    capacity: usize,
    occupied: usize,
}

impl<T: Slotted> EntityRegistry<T> {
    /// Create an empty registry holding at most `capacity` actors.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            slots: Vec::new(),
            free: BTreeSet::new(),
            capacity,
            occupied: 0,
        }
    }

    /// Place an actor in the lowest free slot.
    ///
    /// Returns the assigned slot, which is also written back to the actor.
    pub fn add(&mut self, actor: ActorHandle<T>) -> Result<usize, RegistryError> {
        if let Some(slot) = actor.lock().slot() {
            if self.holds(slot, &actor) {
                return Err(RegistryError::AlreadyResident { slot });
            }
        }

        let slot = if let Some(slot) = self.free.pop_first() {
            slot
        } else if self.slots.len() < self.capacity {
            self.slots.push(None);
            self.slots.len() - 1
        } else {
            return Err(RegistryError::Full {
                capacity: self.capacity,
            });
        };

        actor.lock().set_slot(Some(slot));
        self.slots[slot] = Some(actor);
        self.occupied += 1;
        Ok(slot)
    }

    /// Clear the actor's slot. Returns `false` (and does nothing) if the
    /// actor is not resident here.
    pub fn remove(&mut self, actor: &ActorHandle<T>) -> bool {
        let Some(slot) = actor.lock().slot() else {
            return false;
        };
        if !self.holds(slot, actor) {
            return false;
        }

        self.slots[slot] = None;
        actor.lock().set_slot(None);
        self.free.insert(slot);
        self.occupied -= 1;
        true
    }

    /// Linear scan in slot order; first occupant matching `predicate`.
    pub fn search<F>(&self, mut predicate: F) -> Option<ActorHandle<T>>
    where
        F: FnMut(&T) -> bool,
    {
        self.iter().find(|handle| predicate(&handle.lock())).cloned()
    }
}

impl<T> EntityRegistry<T> {
    /// Occupant of `index`, if any.
    #[inline]
    pub fn get(&self, index: usize) -> Option<&ActorHandle<T>> {
        self.slots.get(index).and_then(Option::as_ref)
    }

    /// Resident actors in ascending slot order.
    pub fn iter(&self) -> impl Iterator<Item = &ActorHandle<T>> {
        self.slots.iter().flatten()
    }

    /// Copy of the slot table for a parallel phase.
    ///
    /// Actors added or removed after the snapshot is taken are not visible
    /// to it.
    pub fn snapshot(&self) -> Arc<[Option<ActorHandle<T>>]> {
        self.slots.iter().cloned().collect()
    }

    /// Index range covered by phases: one past the highest slot ever used.
    #[inline]
    pub fn size(&self) -> usize {
        self.slots.len()
    }

    /// Number of resident actors.
    #[inline]
    pub fn len(&self) -> usize {
        self.occupied
    }

    /// Whether no actor is resident.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.occupied == 0
    }

    /// Maximum number of resident actors.
    #[inline]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether an `add` would fail.
    #[inline]
    pub fn is_full(&self) -> bool {
        self.occupied >= self.capacity
    }

    fn holds(&self, slot: usize, actor: &ActorHandle<T>) -> bool {
        matches!(self.slots.get(slot), Some(Some(h)) if Arc::ptr_eq(h, actor))
    }
}
