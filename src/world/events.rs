//! World events.
//!
//! Emitted from inside tick phases (including worker threads) and fanned out
//! over a tokio broadcast channel. Sending never blocks; a lagging subscriber
//! loses the oldest events.

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Subscriber backlog before the oldest events are dropped.
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Something that happened during a tick.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum WorldEvent {
    /// A player took a slot.
    PlayerAdmitted {
        /// Assigned slot.
        slot: usize,
        /// Display name.
        username: String,
        /// Tick number.
        tick: u64,
    },

    /// A player left its slot.
    PlayerEvicted {
        /// Freed slot.
        slot: usize,
        /// Display name.
        username: String,
        /// Tick number.
        tick: u64,
    },

    /// A player's outbound queue was flushed.
    PacketsFlushed {
        /// Player slot.
        slot: usize,
        /// Display name.
        username: String,
        /// Tick number.
        tick: u64,
    },
}

/// Fan-out point for [`WorldEvent`]s. Cloning shares the channel.
#[derive(Clone, Debug)]
pub struct EventDispatcher {
    tx: broadcast::Sender<WorldEvent>,
}

impl EventDispatcher {
    /// Dispatcher with the default backlog.
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Register a listener.
    pub fn subscribe(&self) -> broadcast::Receiver<WorldEvent> {
        self.tx.subscribe()
    }

    /// Number of live listeners.
    pub fn listener_count(&self) -> usize {
        self.tx.receiver_count()
    }

    /// Send to every listener. No listeners is not an error.
    pub fn dispatch(&self, event: WorldEvent) {
        if self.tx.receiver_count() > 0 {
            let _ = self.tx.send(event);
        }
    }
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dispatch_without_listeners_is_noop() {
        let events = EventDispatcher::new();
        events.dispatch(WorldEvent::PacketsFlushed {
            slot: 0,
            username: "nobody".into(),
            tick: 1,
        });
        assert_eq!(events.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_listeners_receive_in_order() {
        let events = EventDispatcher::new();
        let mut rx = events.subscribe();

        let from_worker = events.clone();
        std::thread::spawn(move || {
            for tick in 1..=2 {
                from_worker.dispatch(WorldEvent::PacketsFlushed {
                    slot: 3,
                    username: "worker".into(),
                    tick,
                });
            }
        })
        .join()
        .unwrap();

        for expected in 1..=2 {
            match rx.recv().await.unwrap() {
                WorldEvent::PacketsFlushed { slot, tick, .. } => {
                    assert_eq!(slot, 3);
                    assert_eq!(tick, expected);
                }
                other => panic!("unexpected {:?}", other),
            }
        }
    }
}
