//! Concrete player.

use serde::{Deserialize, Serialize};

use crate::core::registry::{RegistryError, Slotted};
use crate::services::persistence::PlayerRecord;
use crate::services::transport::{InboundPacket, NullSession, OutboundMessage, PacketInbox, Session};
use crate::world::actor::{Actor, ActorFault, Location, LogoutState, PlayerActor, UpdateFlags};
use crate::world::view::{LocalList, WorldView};

/// Inbound packets handled per player per tick; the rest wait.
pub const PACKETS_PER_TICK: usize = 25;

/// Farthest walk destination accepted from a client, in tiles.
pub const MAX_WALK_DISTANCE: i32 = 64;

/// Longest accepted chat message.
pub const MAX_CHAT_LENGTH: usize = 80;

/// This player's own update block, cached for the tick it was built in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateBlock {
    /// Position when built.
    pub location: Location,
    /// Flags that were pending.
    pub flags: UpdateFlags,
    /// Chat text, if the chat flag was set.
    pub chat: Option<String>,
}

/// A player resident (or waiting to be resident) in the world.
pub struct Player {
    username: String,
    slot: Option<usize>,
    location: Location,
    destination: Option<Location>,
    flags: UpdateFlags,
    synthetic: bool,
    inbox: PacketInbox,
    session: Box<dyn Session>,
    local_players: LocalList,
    local_npcs: LocalList,
    cached_update: Option<UpdateBlock>,
    last_chat: Option<String>,
    logout: LogoutState,
    logout_lock_ticks: u32,
    ticks_online: u64,
}

impl Player {
    /// Player connected through `session`.
    pub fn new(username: impl Into<String>, location: Location, session: Box<dyn Session>) -> Self {
        Self {
            username: username.into(),
            slot: None,
            location,
            destination: None,
            flags: UpdateFlags::APPEARANCE,
            synthetic: false,
            inbox: PacketInbox::new(),
            session,
            local_players: LocalList::default(),
            local_npcs: LocalList::default(),
            cached_update: None,
            last_chat: None,
            logout: LogoutState::default(),
            logout_lock_ticks: 0,
            ticks_online: 0,
        }
    }

    /// Simulated player with no connection.
    pub fn bot(username: impl Into<String>, location: Location) -> Self {
        let mut player = Self::new(username, location, Box::new(NullSession::default()));
        player.synthetic = true;
        player
    }

    /// Handle the network layer pushes decoded packets into.
    pub fn inbox(&self) -> PacketInbox {
        self.inbox.clone()
    }

    /// Block logout for `ticks` ticks (combat and the like).
    pub fn lock_logout(&mut self, ticks: u32) {
        self.logout_lock_ticks = self.logout_lock_ticks.max(ticks);
    }

    /// Queue a server message.
    pub fn send_message(&mut self, text: impl Into<String>) {
        self.session.queue(OutboundMessage::GameMessage { text: text.into() });
    }

    /// Outbound messages not flushed yet.
    pub fn pending_outbound(&self) -> usize {
        self.session.pending()
    }

    /// Walk target, if walking.
    pub fn destination(&self) -> Option<Location> {
        self.destination
    }

    /// Last chat line.
    pub fn last_chat(&self) -> Option<&str> {
        self.last_chat.as_deref()
    }

    /// Update block cached this tick.
    pub fn cached_update(&self) -> Option<&UpdateBlock> {
        self.cached_update.as_ref()
    }

    /// Players this client knows about.
    pub fn local_players(&self) -> &LocalList {
        &self.local_players
    }

    /// NPCs this client knows about.
    pub fn local_npcs(&self) -> &LocalList {
        &self.local_npcs
    }

    /// Ticks spent resident.
    pub fn ticks_online(&self) -> u64 {
        self.ticks_online
    }

    fn handle_packet(&mut self, packet: InboundPacket) -> Result<(), ActorFault> {
        let opcode = packet.opcode();
        match packet {
            InboundPacket::Walk { destination } => {
                if !destination.is_within_distance(&self.location, MAX_WALK_DISTANCE) {
                    return Err(ActorFault::Packet {
                        opcode,
                        reason: format!("walk to {} out of range", destination),
                    });
                }
                self.destination = Some(destination);
            }
            InboundPacket::Chat { text } => {
                if text.len() > MAX_CHAT_LENGTH {
                    return Err(ActorFault::Packet {
                        opcode,
                        reason: format!("chat of {} bytes", text.len()),
                    });
                }
                self.last_chat = Some(text);
                self.flags |= UpdateFlags::CHAT;
            }
            InboundPacket::Logout => self.request_logout(),
            InboundPacket::Unknown { opcode } => {
                return Err(ActorFault::Packet {
                    opcode,
                    reason: "unhandled opcode".to_string(),
                });
            }
        }
        Ok(())
    }
}

impl Slotted for Player {
    fn slot(&self) -> Option<usize> {
        self.slot
    }

    fn set_slot(&mut self, slot: Option<usize>) {
        self.slot = slot;
    }
}

impl Actor for Player {
    fn location(&self) -> Location {
        self.location
    }

    fn update_flags(&self) -> UpdateFlags {
        self.flags
    }
}

impl PlayerActor for Player {
    fn username(&self) -> &str {
        &self.username
    }

    fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    fn process_packets(&mut self) -> Result<(), ActorFault> {
        for _ in 0..PACKETS_PER_TICK {
            let Some(packet) = self.inbox.pop() else {
                break;
            };
            self.handle_packet(packet)?;
        }
        Ok(())
    }

    fn process_logic(&mut self) -> Result<(), ActorFault> {
        self.ticks_online += 1;
        self.logout_lock_ticks = self.logout_lock_ticks.saturating_sub(1);

        if let Some(destination) = self.destination {
            self.location = self.location.step_toward(&destination);
            self.flags |= UpdateFlags::MOVED;
            if self.location == destination {
                self.destination = None;
            }
        }
        Ok(())
    }

    fn update_view(&mut self, view: &WorldView) -> Result<(), ActorFault> {
        if !self.flags.is_empty() {
            self.cached_update = Some(UpdateBlock {
                location: self.location,
                flags: self.flags,
                chat: self
                    .flags
                    .contains(UpdateFlags::CHAT)
                    .then(|| self.last_chat.clone())
                    .flatten(),
            });
        }

        let players = self.local_players.sync(view.players_near(self.location, self.slot));
        if !players.is_empty() {
            self.session.queue(OutboundMessage::PlayerSync {
                added: players.added,
                removed: players.removed,
                updated: players.updated,
            });
        }

        let npcs = self.local_npcs.sync(view.npcs_near(self.location));
        if !npcs.is_empty() {
            self.session.queue(OutboundMessage::NpcSync {
                added: npcs.added,
                removed: npcs.removed,
                updated: npcs.updated,
            });
        }
        Ok(())
    }

    fn reset_updating(&mut self) {
        self.flags = UpdateFlags::empty();
    }

    fn clear_cached_update(&mut self) {
        self.cached_update = None;
    }

    fn queue_message(&mut self, text: &str) {
        self.send_message(text);
    }

    fn flush_outbound(&mut self) -> Result<(), ActorFault> {
        self.session.flush()?;
        Ok(())
    }

    fn logout_state(&self) -> &LogoutState {
        &self.logout
    }

    fn logout_state_mut(&mut self) -> &mut LogoutState {
        &mut self.logout
    }

    fn can_logout(&self) -> bool {
        self.logout_lock_ticks == 0
    }

    fn admission_rejected(&mut self, reason: &RegistryError) {
        self.session.queue(OutboundMessage::LoginRejected {
            reason: reason.to_string(),
        });
        let _ = self.session.flush();
    }

    fn evicted(&mut self) {
        self.session.queue(OutboundMessage::Logout);
        let _ = self.session.flush();
    }

    fn record(&self) -> PlayerRecord {
        PlayerRecord {
            username: self.username.clone(),
            location: self.location,
            ticks_online: self.ticks_online,
            saved_at: chrono::Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::transport::{ChannelSession, TransportError};
    use crate::world::view::Sighting;
    use tokio::sync::mpsc;

    fn connected(name: &str) -> (Player, mpsc::Receiver<OutboundMessage>) {
        let (tx, rx) = mpsc::channel(16);
        let player = Player::new(name, Location::new(3200, 3200, 0), Box::new(ChannelSession::new(tx)));
        (player, rx)
    }

    #[test]
    fn test_walk_then_logic_moves_one_tile() {
        let (mut player, _rx) = connected("walker");
        player.inbox().push(InboundPacket::Walk {
            destination: Location::new(3202, 3200, 0),
        });
        player.reset_updating();

        player.process_packets().unwrap();
        assert_eq!(player.destination(), Some(Location::new(3202, 3200, 0)));

        player.process_logic().unwrap();
        assert_eq!(player.location(), Location::new(3201, 3200, 0));
        assert!(player.update_flags().contains(UpdateFlags::MOVED));

        player.process_logic().unwrap();
        assert_eq!(player.destination(), None);
        assert_eq!(player.ticks_online(), 2);
    }

    #[test]
    fn test_bad_packet_faults_and_leaves_rest_queued() {
        let (mut player, _rx) = connected("sender");
        let inbox = player.inbox();
        inbox.push(InboundPacket::Unknown { opcode: 99 });
        inbox.push(InboundPacket::Logout);

        let err = player.process_packets().unwrap_err();
        assert!(matches!(err, ActorFault::Packet { opcode: 99, .. }));
        assert_eq!(inbox.len(), 1);

        player.process_packets().unwrap();
        assert!(player.logout_state().is_requested());
    }

    #[test]
    fn test_walk_out_of_range_rejected() {
        let (mut player, _rx) = connected("far");
        player.inbox().push(InboundPacket::Walk {
            destination: Location::new(0, 0, 0),
        });
        assert!(player.process_packets().is_err());
        assert_eq!(player.destination(), None);
    }

    #[test]
    fn test_walk_to_extreme_coordinate_is_packet_fault() {
        let (mut player, _rx) = connected("edge");
        player.inbox().push(InboundPacket::Walk {
            destination: Location::new(i32::MIN, 0, 0),
        });
        assert!(matches!(
            player.process_packets(),
            Err(ActorFault::Packet { .. })
        ));
        assert_eq!(player.destination(), None);
    }

    #[test]
    fn test_view_update_and_flush() {
        let (mut player, mut rx) = connected("viewer");
        player.set_slot(Some(0));

        let view = WorldView {
            players: vec![
                Sighting { slot: 0, location: player.location(), flags: UpdateFlags::empty() },
                Sighting { slot: 1, location: Location::new(3205, 3200, 0), flags: UpdateFlags::MOVED },
            ],
            npcs: vec![],
        };
        player.update_view(&view).unwrap();
        assert!(player.cached_update().is_some());
        assert!(player.local_players().contains(1));
        assert!(!player.local_players().contains(0));

        player.reset_updating();
        player.clear_cached_update();
        player.flush_outbound().unwrap();
        assert!(player.cached_update().is_none());
        assert!(player.update_flags().is_empty());

        match rx.try_recv().unwrap() {
            OutboundMessage::PlayerSync { added, .. } => assert_eq!(added, vec![1]),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_flush_to_closed_session_faults() {
        let (mut player, rx) = connected("gone");
        drop(rx);
        player.send_message("hello");
        assert_eq!(
            player.flush_outbound(),
            Err(ActorFault::Transport(TransportError::Disconnected))
        );
    }

    #[test]
    fn test_logout_lock() {
        let mut player = Player::bot("bot", Location::default());
        assert!(player.is_synthetic());
        player.lock_logout(2);
        assert!(!player.can_logout());
        player.process_logic().unwrap();
        player.process_logic().unwrap();
        assert!(player.can_logout());
    }
}
