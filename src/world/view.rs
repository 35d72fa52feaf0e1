//! Read-only world snapshot for the output-building phase.
//!
//! Captured on the clock thread after NPC logic and before view building, so
//! workers building one player's view never lock another actor.

use std::collections::BTreeSet;

use crate::core::registry::EntityRegistry;
use crate::world::actor::{Location, NpcActor, PlayerActor, UpdateFlags};

/// Tiles an actor can see in each direction.
pub const VIEW_DISTANCE: i32 = 15;

/// Where an actor stood and what changed, as of the capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sighting {
    /// Registry slot.
    pub slot: usize,
    /// Position.
    pub location: Location,
    /// Pending updates.
    pub flags: UpdateFlags,
}

/// Positions and flags of every resident actor.
#[derive(Debug, Default, Clone)]
pub struct WorldView {
    /// Players in slot order.
    pub players: Vec<Sighting>,
    /// NPCs in slot order.
    pub npcs: Vec<Sighting>,
}

impl WorldView {
    /// Capture both registries.
    pub fn capture<P, N>(players: &EntityRegistry<P>, npcs: &EntityRegistry<N>) -> Self
    where
        P: PlayerActor,
        N: NpcActor,
    {
        Self {
            players: players.iter().filter_map(|h| sighting(&*h.lock())).collect(),
            npcs: npcs.iter().filter_map(|h| sighting(&*h.lock())).collect(),
        }
    }

    /// Players within view of `origin`, other than `observer`.
    pub fn players_near(
        &self,
        origin: Location,
        observer: Option<usize>,
    ) -> impl Iterator<Item = &Sighting> {
        self.players
            .iter()
            .filter(move |s| Some(s.slot) != observer && s.location.is_within_distance(&origin, VIEW_DISTANCE))
    }

    /// NPCs within view of `origin`.
    pub fn npcs_near(&self, origin: Location) -> impl Iterator<Item = &Sighting> {
        self.npcs
            .iter()
            .filter(move |s| s.location.is_within_distance(&origin, VIEW_DISTANCE))
    }
}

fn sighting<A: crate::world::actor::Actor>(actor: &A) -> Option<Sighting> {
    actor.slot().map(|slot| Sighting {
        slot,
        location: actor.location(),
        flags: actor.update_flags(),
    })
}

/// Difference between what a client saw last tick and what it sees now.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ViewDelta {
    /// Newly visible slots.
    pub added: Vec<usize>,
    /// Slots no longer visible.
    pub removed: Vec<usize>,
    /// Still-visible slots with pending updates.
    pub updated: Vec<usize>,
}

impl ViewDelta {
    /// Whether there is nothing to send.
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// Slots a client currently knows about.
#[derive(Debug, Default, Clone)]
pub struct LocalList {
    known: BTreeSet<usize>,
}

impl LocalList {
    /// Replace the known set with `visible`, returning the difference.
    pub fn sync<'a, I>(&mut self, visible: I) -> ViewDelta
    where
        I: IntoIterator<Item = &'a Sighting>,
    {
        let mut delta = ViewDelta::default();
        let mut now = BTreeSet::new();

        for s in visible {
            now.insert(s.slot);
            if !self.known.contains(&s.slot) {
                delta.added.push(s.slot);
            } else if !s.flags.is_empty() {
                delta.updated.push(s.slot);
            }
        }
        delta.removed = self.known.difference(&now).copied().collect();
        self.known = now;
        delta
    }

    /// Number of known slots.
    pub fn len(&self) -> usize {
        self.known.len()
    }

    /// Whether nothing is known.
    pub fn is_empty(&self) -> bool {
        self.known.is_empty()
    }

    /// Whether `slot` is known.
    pub fn contains(&self, slot: usize) -> bool {
        self.known.contains(&slot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(slot: usize, x: i32, flags: UpdateFlags) -> Sighting {
        Sighting {
            slot,
            location: Location::new(x, 0, 0),
            flags,
        }
    }

    #[test]
    fn test_local_list_diff() {
        let mut list = LocalList::default();
        let first = [at(1, 0, UpdateFlags::empty()), at(2, 0, UpdateFlags::MOVED)];
        let delta = list.sync(&first);
        assert_eq!(delta.added, vec![1, 2]);
        assert!(delta.removed.is_empty());
        assert!(delta.updated.is_empty());

        let second = [at(2, 0, UpdateFlags::MOVED), at(3, 0, UpdateFlags::empty())];
        let delta = list.sync(&second);
        assert_eq!(delta.added, vec![3]);
        assert_eq!(delta.removed, vec![1]);
        assert_eq!(delta.updated, vec![2]);
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn test_players_near_excludes_observer_and_far() {
        let view = WorldView {
            players: vec![
                at(0, 0, UpdateFlags::empty()),
                at(1, 10, UpdateFlags::empty()),
                at(2, 40, UpdateFlags::empty()),
            ],
            npcs: vec![at(0, 15, UpdateFlags::empty()), at(1, 16, UpdateFlags::empty())],
        };

        let near: Vec<_> = view
            .players_near(Location::new(0, 0, 0), Some(0))
            .map(|s| s.slot)
            .collect();
        assert_eq!(near, vec![1]);

        let npcs: Vec<_> = view.npcs_near(Location::new(0, 0, 0)).map(|s| s.slot).collect();
        assert_eq!(npcs, vec![0]);
    }
}
