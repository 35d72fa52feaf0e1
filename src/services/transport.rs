//! Transport seam.
//!
//! The network layer decodes packets into [`InboundPacket`]s and pushes them
//! into a player's inbox from its own threads. Outbound messages are queued
//! on the player's [`Session`] during the tick and flushed once, in the
//! flush phase.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::core::queue::PendingQueue;
use crate::world::actor::Location;

// =============================================================================
// CLIENT -> SERVER
// =============================================================================

/// Decoded client packet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundPacket {
    /// Walk to a tile.
    Walk {
        /// Destination.
        destination: Location,
    },

    /// Public chat.
    Chat {
        /// Message text.
        text: String,
    },

    /// Client asked to log out.
    Logout,

    /// Opcode the codec recognized but nothing handles.
    Unknown {
        /// Raw opcode.
        opcode: u8,
    },
}

impl InboundPacket {
    /// Wire opcode.
    pub fn opcode(&self) -> u8 {
        match self {
            InboundPacket::Walk { .. } => 164,
            InboundPacket::Chat { .. } => 4,
            InboundPacket::Logout => 185,
            InboundPacket::Unknown { opcode } => *opcode,
        }
    }
}

/// Per-player inbound packet queue, filled by the network threads.
pub type PacketInbox = PendingQueue<InboundPacket>;

// =============================================================================
// SERVER -> CLIENT
// =============================================================================

/// Message queued for a client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OutboundMessage {
    /// Server text message.
    GameMessage {
        /// Text.
        text: String,
    },

    /// Changes to the set of nearby players.
    PlayerSync {
        /// Slots that came into view.
        added: Vec<usize>,
        /// Slots that left view.
        removed: Vec<usize>,
        /// Slots still in view with pending updates.
        updated: Vec<usize>,
    },

    /// Changes to the set of nearby NPCs.
    NpcSync {
        /// Slots that came into view.
        added: Vec<usize>,
        /// Slots that left view.
        removed: Vec<usize>,
        /// Slots still in view with pending updates.
        updated: Vec<usize>,
    },

    /// Login refused; the session is about to close.
    LoginRejected {
        /// Reason shown to the client.
        reason: String,
    },

    /// Logout acknowledged.
    Logout,
}

/// Transport errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// Peer is not draining fast enough.
    #[error("outbound buffer full ({pending} messages held back)")]
    Backpressure {
        /// Messages still waiting.
        pending: usize,
    },

    /// Peer is gone.
    #[error("session disconnected")]
    Disconnected,
}

/// Outbound side of a player's connection.
pub trait Session: Send {
    /// Queue a message for the next flush.
    fn queue(&mut self, message: OutboundMessage);

    /// Deliver queued messages. Returns how many were sent.
    fn flush(&mut self) -> Result<usize, TransportError>;

    /// Messages waiting for the next flush.
    fn pending(&self) -> usize;
}

/// Session that flushes into a tokio channel drained by the connection task.
pub struct ChannelSession {
    pending: VecDeque<OutboundMessage>,
    sender: mpsc::Sender<OutboundMessage>,
}

impl ChannelSession {
    /// Wrap the sending half of a connection's outbound channel.
    pub fn new(sender: mpsc::Sender<OutboundMessage>) -> Self {
        Self {
            pending: VecDeque::new(),
            sender,
        }
    }
}

impl Session for ChannelSession {
    fn queue(&mut self, message: OutboundMessage) {
        self.pending.push_back(message);
    }

    fn flush(&mut self) -> Result<usize, TransportError> {
        let mut sent = 0;
        while let Some(message) = self.pending.pop_front() {
            match self.sender.try_send(message) {
                Ok(()) => sent += 1,
                Err(TrySendError::Full(message)) => {
                    // Keep order; retry next tick
                    self.pending.push_front(message);
                    return Err(TransportError::Backpressure {
                        pending: self.pending.len(),
                    });
                }
                Err(TrySendError::Closed(_)) => {
                    self.pending.clear();
                    return Err(TransportError::Disconnected);
                }
            }
        }
        Ok(sent)
    }

    fn pending(&self) -> usize {
        self.pending.len()
    }
}

/// Session for simulated players; everything is discarded.
#[derive(Debug, Default)]
pub struct NullSession {
    dropped: u64,
}

impl NullSession {
    /// Messages discarded so far.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

impl Session for NullSession {
    fn queue(&mut self, _message: OutboundMessage) {
        self.dropped += 1;
    }

    fn flush(&mut self) -> Result<usize, TransportError> {
        Ok(0)
    }

    fn pending(&self) -> usize {
        0
    }
}
