//! Engine shell: configuration and the fixed-rate clock.

pub mod config;
pub mod scheduler;

pub use config::{ConfigError, EngineConfig};
pub use scheduler::{FatalShutdown, SchedulerHandle, TickScheduler, TickTarget};
