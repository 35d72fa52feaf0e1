//! World context.
//!
//! Owns both registries and the four pending queues. Constructed explicitly
//! and handed to the pipeline; producers on other threads keep clones of the
//! queue handles.
//!
//! Structural changes (slot add/remove) only happen on the clock thread
//! during the serial drain steps.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{error, info};

use crate::core::queue::PendingQueue;
use crate::core::registry::{ActorHandle, EntityRegistry};
use crate::services::persistence::PlayerStore;
use crate::world::actor::{identity_key, NpcActor, PlayerActor};

/// Outcome of saving every resident player.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SaveSummary {
    /// Records written.
    pub saved: usize,
    /// Records the store refused.
    pub failed: usize,
}

/// Registries, pending queues and the maintenance flag.
pub struct World<P, N> {
    players: EntityRegistry<P>,
    npcs: EntityRegistry<N>,
    player_admissions: PendingQueue<ActorHandle<P>>,
    player_evictions: PendingQueue<ActorHandle<P>>,
    npc_admissions: PendingQueue<ActorHandle<N>>,
    npc_evictions: PendingQueue<ActorHandle<N>>,
    updating: Arc<AtomicBool>,
}

impl<P: PlayerActor, N: NpcActor> World<P, N> {
    /// Empty world with the given registry capacities.
    pub fn new(max_players: usize, max_npcs: usize) -> Self {
        Self {
            players: EntityRegistry::with_capacity(max_players),
            npcs: EntityRegistry::with_capacity(max_npcs),
            player_admissions: PendingQueue::new(),
            player_evictions: PendingQueue::new(),
            npc_admissions: PendingQueue::new(),
            npc_evictions: PendingQueue::new(),
            updating: Arc::new(AtomicBool::new(false)),
        }
    }

    // =========================================================================
    // Producers
    // =========================================================================

    /// Queue a player for admission on a later tick. Returns its handle.
    pub fn queue_player(&self, player: P) -> ActorHandle<P> {
        let handle = Arc::new(Mutex::new(player));
        self.player_admissions.push(Arc::clone(&handle));
        handle
    }

    /// Queue an NPC for admission on a later tick. Returns its handle.
    pub fn queue_npc(&self, npc: N) -> ActorHandle<N> {
        let handle = Arc::new(Mutex::new(npc));
        self.npc_admissions.push(Arc::clone(&handle));
        handle
    }

    /// Queue a resident NPC for removal.
    pub fn remove_npc(&self, npc: &ActorHandle<N>) {
        self.npc_evictions.push(Arc::clone(npc));
    }

    /// Queue a player for eviction (disconnects and the like). The player
    /// still has to be safe to log out, or wait out its deadline. A player
    /// still waiting for admission never gets a slot.
    pub fn queue_logout(&self, player: &ActorHandle<P>) {
        let mut guard = player.lock();
        guard.request_logout();
        if !guard.logout_state().is_queued() {
            guard.logout_state_mut().mark_queued();
            self.player_evictions.push(Arc::clone(player));
        }
    }

    /// Shared handle to the player admission queue.
    pub fn player_admissions(&self) -> PendingQueue<ActorHandle<P>> {
        self.player_admissions.clone()
    }

    /// Shared handle to the player eviction queue.
    pub fn player_evictions(&self) -> PendingQueue<ActorHandle<P>> {
        self.player_evictions.clone()
    }

    /// Shared handle to the NPC admission queue.
    pub fn npc_admissions(&self) -> PendingQueue<ActorHandle<N>> {
        self.npc_admissions.clone()
    }

    /// Shared handle to the NPC eviction queue.
    pub fn npc_evictions(&self) -> PendingQueue<ActorHandle<N>> {
        self.npc_evictions.clone()
    }

    // =========================================================================
    // Maintenance state
    // =========================================================================

    /// Whether a server update is pending. While set, queued evictions are
    /// honored immediately.
    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }

    /// Enter or leave the maintenance state.
    pub fn set_updating(&self, updating: bool) {
        self.updating.store(updating, Ordering::Release);
    }

    /// Shared maintenance flag, for an admin console on another thread.
    pub fn updating_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.updating)
    }

    // =========================================================================
    // Queries
    // =========================================================================

    /// Player registry.
    pub fn players(&self) -> &EntityRegistry<P> {
        &self.players
    }

    /// NPC registry.
    pub fn npcs(&self) -> &EntityRegistry<N> {
        &self.npcs
    }

    pub(crate) fn players_mut(&mut self) -> &mut EntityRegistry<P> {
        &mut self.players
    }

    pub(crate) fn npcs_mut(&mut self) -> &mut EntityRegistry<N> {
        &mut self.npcs
    }

    /// Resident player with this name, compared by identity key.
    pub fn player_by_name(&self, name: &str) -> Option<ActorHandle<P>> {
        let key = identity_key(name);
        self.players.search(|p| p.identity() == key)
    }

    /// Queue `text` for every resident player. Returns the number reached.
    pub fn broadcast(&self, text: &str) -> usize {
        let mut reached = 0;
        for handle in self.players.iter() {
            handle.lock().queue_message(text);
            reached += 1;
        }
        reached
    }

    /// Save every resident player. Failures are logged and counted.
    pub fn save_players(&self, store: &dyn PlayerStore) -> SaveSummary {
        let mut summary = SaveSummary::default();
        for handle in self.players.iter() {
            let record = handle.lock().record();
            match store.save(&record) {
                Ok(()) => summary.saved += 1,
                Err(e) => {
                    error!("Failed to save player {}: {}", record.username, e);
                    summary.failed += 1;
                }
            }
        }
        if summary.saved + summary.failed > 0 {
            info!(
                "Saved {} player(s), {} failure(s)",
                summary.saved, summary.failed
            );
        }
        summary
    }
}
