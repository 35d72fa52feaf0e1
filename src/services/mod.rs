//! Collaborator seams.
//!
//! Narrow interfaces the tick consumes: persistence, transport, content
//! hooks and operator monitoring, plus default implementations.

pub mod hooks;
pub mod monitor;
pub mod persistence;
pub mod transport;

pub use hooks::{ContentHook, FnHook, HookError, ScheduledTask, TaskRunner, TaskStatus};
pub use monitor::{Monitor, Severity, TracingMonitor};
pub use persistence::{JsonFileStore, MemoryStore, PlayerRecord, PlayerStore, StoreError};
pub use transport::{
    ChannelSession, InboundPacket, NullSession, OutboundMessage, PacketInbox, Session,
    TransportError,
};
