//! Engine configuration.
//!
//! Every value has a compiled-in default from the crate root; a handful can
//! be overridden through environment variables.
//!
//! | Variable | Default |
//! |----------|---------|
//! | `TICK_RATE` | 600 (ms) |
//! | `WORKER_THREADS` | available parallelism |
//! | `QUEUED_LOOP_THRESHOLD` | 50 |
//! | `FORCED_LOGOUT_SECS` | 60 |
//! | `PHASE_TIMEOUT_MS` | unset (wait forever) |
//! | `AUTOSAVE_TICKS` | 500, 0 disables |
//! | `SAVE_DIR` | `./data/saves/characters` |
//! | `SYNC_BOTS` | false |

use std::path::PathBuf;
use std::str::FromStr;
use std::thread;
use std::time::Duration;

/// Default autosave period in ticks (five minutes at 600 ms).
pub const DEFAULT_AUTOSAVE_TICKS: u64 = 500;

/// Default forced-logout delay.
pub const DEFAULT_FORCED_LOGOUT_SECS: u64 = 60;

/// Default character save directory.
pub const DEFAULT_SAVE_DIR: &str = "./data/saves/characters";

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A variable was set but could not be parsed.
    #[error("invalid value {value:?} for {key}")]
    Invalid {
        /// Variable name.
        key: &'static str,
        /// Raw value.
        value: String,
    },

    /// A value parsed but is out of range.
    #[error("{key} must be {requirement}")]
    OutOfRange {
        /// Field name.
        key: &'static str,
        /// What it must satisfy.
        requirement: &'static str,
    },
}

/// Engine settings.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Tick period in milliseconds.
    pub tick_rate_ms: u64,
    /// Barrier executor worker count.
    pub worker_threads: usize,
    /// Max entries drained from each pending queue per tick.
    pub queued_loop_threshold: usize,
    /// Player registry capacity.
    pub max_players: usize,
    /// NPC registry capacity.
    pub max_npcs: usize,
    /// Consecutive per-entity faults before a forced logout.
    pub entity_fault_threshold: u32,
    /// Consecutive failed ticks before fatal shutdown.
    pub max_consecutive_tick_errors: u32,
    /// Quiet period after which the tick error count resets.
    pub error_reset_window: Duration,
    /// How long a queued logout may be blocked before it is forced.
    pub forced_logout_after: Duration,
    /// Barrier wait limit per phase. `None` waits forever.
    pub phase_timeout: Option<Duration>,
    /// Save all players every this many successful ticks. 0 disables.
    pub autosave_interval_ticks: u64,
    /// Character save directory.
    pub save_dir: PathBuf,
    /// Build views for synthetic players too.
    pub sync_synthetic_players: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            tick_rate_ms: crate::DEFAULT_TICK_RATE_MS,
            worker_threads: default_workers(),
            queued_loop_threshold: crate::QUEUED_LOOP_THRESHOLD,
            max_players: crate::MAX_PLAYERS,
            max_npcs: crate::MAX_NPCS,
            entity_fault_threshold: crate::ENTITY_FAULT_THRESHOLD,
            max_consecutive_tick_errors: crate::MAX_CONSECUTIVE_TICK_ERRORS,
            error_reset_window: Duration::from_secs(crate::ERROR_RESET_SECS),
            forced_logout_after: Duration::from_secs(DEFAULT_FORCED_LOGOUT_SECS),
            phase_timeout: None,
            autosave_interval_ticks: DEFAULT_AUTOSAVE_TICKS,
            save_dir: PathBuf::from(DEFAULT_SAVE_DIR),
            sync_synthetic_players: false,
        }
    }
}

impl EngineConfig {
    /// Load from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load using `lookup` in place of the environment.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let config = Self {
            tick_rate_ms: parse(&lookup, "TICK_RATE")?.unwrap_or(defaults.tick_rate_ms),
            worker_threads: parse(&lookup, "WORKER_THREADS")?.unwrap_or(defaults.worker_threads),
            queued_loop_threshold: parse(&lookup, "QUEUED_LOOP_THRESHOLD")?
                .unwrap_or(defaults.queued_loop_threshold),
            forced_logout_after: parse(&lookup, "FORCED_LOGOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.forced_logout_after),
            phase_timeout: parse(&lookup, "PHASE_TIMEOUT_MS")?.map(Duration::from_millis),
            autosave_interval_ticks: parse(&lookup, "AUTOSAVE_TICKS")?
                .unwrap_or(defaults.autosave_interval_ticks),
            save_dir: lookup("SAVE_DIR")
                .filter(|v| !v.trim().is_empty())
                .map(PathBuf::from)
                .unwrap_or(defaults.save_dir),
            sync_synthetic_players: parse_flag(&lookup, "SYNC_BOTS")?
                .unwrap_or(defaults.sync_synthetic_players),
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject values the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let checks: [(bool, &'static str, &'static str); 6] = [
            (self.tick_rate_ms > 0, "tick_rate_ms", "greater than zero"),
            (self.worker_threads > 0, "worker_threads", "greater than zero"),
            (self.queued_loop_threshold > 0, "queued_loop_threshold", "greater than zero"),
            (self.entity_fault_threshold > 0, "entity_fault_threshold", "greater than zero"),
            (self.max_consecutive_tick_errors > 0, "max_consecutive_tick_errors", "greater than zero"),
            (
                self.phase_timeout.map_or(true, |t| !t.is_zero()),
                "phase_timeout",
                "unset or greater than zero",
            ),
        ];
        for (ok, key, requirement) in checks {
            if !ok {
                return Err(ConfigError::OutOfRange { key, requirement });
            }
        }
        Ok(())
    }

    /// Tick period.
    pub fn tick_rate(&self) -> Duration {
        Duration::from_millis(self.tick_rate_ms)
    }
}

fn default_workers() -> usize {
    thread::available_parallelism().map_or(1, |n| n.get())
}

fn parse<F, T>(lookup: &F, key: &'static str) -> Result<Option<T>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn parse_flag<F>(lookup: &F, key: &'static str) -> Result<Option<bool>, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    match lookup(key).as_deref().map(str::trim) {
        None => Ok(None),
        Some("true") | Some("1") => Ok(Some(true)),
        Some("false") | Some("0") => Ok(Some(false)),
        Some(other) => Err(ConfigError::Invalid {
            key,
            value: other.to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<EngineConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        EngineConfig::from_lookup(|key| map.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(&[]).unwrap();
        assert_eq!(config.tick_rate_ms, 600);
        assert_eq!(config.queued_loop_threshold, 50);
        assert_eq!(config.max_players, 500);
        assert_eq!(config.max_npcs, 5000);
        assert_eq!(config.entity_fault_threshold, 3);
        assert_eq!(config.max_consecutive_tick_errors, 10);
        assert_eq!(config.error_reset_window, Duration::from_secs(60));
        assert_eq!(config.phase_timeout, None);
        assert!(!config.sync_synthetic_players);
        assert!(config.worker_threads >= 1);
    }

    #[test]
    fn test_overrides() {
        let config = load(&[
            ("TICK_RATE", "100"),
            ("WORKER_THREADS", "3"),
            ("PHASE_TIMEOUT_MS", "250"),
            ("AUTOSAVE_TICKS", "0"),
            ("SAVE_DIR", "/tmp/saves"),
            ("SYNC_BOTS", "1"),
        ])
        .unwrap();
        assert_eq!(config.tick_rate(), Duration::from_millis(100));
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.phase_timeout, Some(Duration::from_millis(250)));
        assert_eq!(config.autosave_interval_ticks, 0);
        assert_eq!(config.save_dir, PathBuf::from("/tmp/saves"));
        assert!(config.sync_synthetic_players);
    }

    #[test]
    fn test_malformed_value_is_error() {
        assert_eq!(
            load(&[("TICK_RATE", "fast")]),
            Err(ConfigError::Invalid {
                key: "TICK_RATE",
                value: "fast".into()
            })
        );
        assert!(matches!(
            load(&[("SYNC_BOTS", "maybe")]),
            Err(ConfigError::Invalid { key: "SYNC_BOTS", .. })
        ));
    }

    #[test]
    fn test_zero_tick_rate_rejected() {
        assert!(matches!(
            load(&[("TICK_RATE", "0")]),
            Err(ConfigError::OutOfRange { key: "tick_rate_ms", .. })
        ));
        assert!(matches!(
            load(&[("PHASE_TIMEOUT_MS", "0")]),
            Err(ConfigError::OutOfRange { key: "phase_timeout", .. })
        ));
    }
}
