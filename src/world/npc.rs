//! Concrete NPC.

use crate::core::registry::Slotted;
use crate::world::actor::{Actor, ActorFault, Location, NpcActor, UpdateFlags};

/// Ticks between wander steps.
pub const WANDER_INTERVAL: u64 = 8;

/// Non-player character that idles around its spawn point.
#[derive(Debug, Clone)]
pub struct Npc {
    npc_id: u32,
    slot: Option<usize>,
    spawn: Location,
    location: Location,
    walk_radius: i32,
    flags: UpdateFlags,
    ticks: u64,
}

impl Npc {
    /// NPC of definition `npc_id` spawned at `spawn`, wandering up to
    /// `walk_radius` tiles away.
    pub fn new(npc_id: u32, spawn: Location, walk_radius: i32) -> Self {
        Self {
            npc_id,
            slot: None,
            spawn,
            location: spawn,
            walk_radius: walk_radius.max(0),
            flags: UpdateFlags::empty(),
            ticks: 0,
        }
    }

    /// Spawn point.
    pub fn spawn(&self) -> Location {
        self.spawn
    }

    // Cheap deterministic direction pick from slot and tick
    fn wander_step(&self) -> (i32, i32) {
        let seed = (self.slot.unwrap_or(0) as u64)
            .wrapping_mul(6364136223846793005)
            .wrapping_add(self.ticks.wrapping_mul(1442695040888963407));
        let dir = (seed >> 33) % 9;
        ((dir % 3) as i32 - 1, (dir / 3) as i32 - 1)
    }
}

impl Slotted for Npc {
    fn slot(&self) -> Option<usize> {
        self.slot
    }

    fn set_slot(&mut self, slot: Option<usize>) {
        self.slot = slot;
    }
}

impl Actor for Npc {
    fn location(&self) -> Location {
        self.location
    }

    fn update_flags(&self) -> UpdateFlags {
        self.flags
    }
}

impl NpcActor for Npc {
    fn npc_id(&self) -> u32 {
        self.npc_id
    }

    fn process(&mut self) -> Result<(), ActorFault> {
        self.ticks += 1;
        if self.walk_radius == 0 || self.ticks % WANDER_INTERVAL != 0 {
            return Ok(());
        }

        let (dx, dy) = self.wander_step();
        let next = Location::new(self.location.x + dx, self.location.y + dy, self.location.z);
        if next != self.location && next.is_within_distance(&self.spawn, self.walk_radius) {
            self.location = next;
            self.flags |= UpdateFlags::MOVED;
        }
        Ok(())
    }

    fn reset_updating(&mut self) -> Result<(), ActorFault> {
        self.flags = UpdateFlags::empty();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_npc_stays_within_radius() {
        let spawn = Location::new(3000, 3000, 0);
        let mut npc = Npc::new(1, spawn, 3);
        npc.set_slot(Some(7));

        for _ in 0..2000 {
            npc.process().unwrap();
            npc.reset_updating().unwrap();
            assert!(npc.location().is_within_distance(&spawn, 3));
        }
    }

    #[test]
    fn test_stationary_npc_never_moves() {
        let spawn = Location::new(10, 10, 0);
        let mut npc = Npc::new(2, spawn, 0);
        for _ in 0..100 {
            npc.process().unwrap();
        }
        assert_eq!(npc.location(), spawn);
        assert!(npc.update_flags().is_empty());
    }
}
