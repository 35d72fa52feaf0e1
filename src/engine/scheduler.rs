//! Fixed-rate tick scheduler.
//!
//! One dedicated thread drives ticks through a current-thread tokio runtime.
//! Failures are split three ways:
//!
//! - recoverable tick error: counted, emergency save, keep going
//! - ten in a row: fatal
//! - fatal tick error or panic: fatal immediately
//!
//! Fatal means emergency save, operator notification and a stopped clock.
//! The library never exits the process itself; the binary does that when
//! [`SchedulerHandle::finished`] reports a [`FatalShutdown`].

use std::io;
use std::ops::ControlFlow;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tokio::sync::{broadcast, oneshot};
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, instrument, warn};

use crate::core::barrier::panic_message;
use crate::core::clock::{Clock, SystemClock};
use crate::engine::config::EngineConfig;
use crate::services::monitor::{Monitor, Severity, TracingMonitor};
use crate::world::pipeline::TickError;
use crate::world::recovery::TickFailureTracker;
use crate::world::world::SaveSummary;

/// What the scheduler drives.
pub trait TickTarget: Send + 'static {
    /// Run one tick.
    fn process(&mut self) -> Result<(), TickError>;

    /// Save everything that can be saved. Must not panic on storage errors.
    fn save_all(&mut self) -> SaveSummary;
}

/// Why the engine stopped.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("fatal shutdown at tick {tick}: {reason}")]
pub struct FatalShutdown {
    /// Tick that failed.
    pub tick: u64,
    /// What happened.
    pub reason: String,
}

/// Drives a [`TickTarget`] at a fixed period.
pub struct TickScheduler<T: TickTarget> {
    target: T,
    period: Duration,
    autosave_interval: u64,
    failures: TickFailureTracker,
    clock: Arc<dyn Clock>,
    monitor: Arc<dyn Monitor>,
    ticks: u64,
    since_autosave: u64,
}

impl<T: TickTarget> TickScheduler<T> {
    /// Scheduler for `target` using the period and limits in `config`.
    pub fn new(target: T, config: &EngineConfig) -> Self {
        Self {
            target,
            period: config.tick_rate(),
            autosave_interval: config.autosave_interval_ticks,
            failures: TickFailureTracker::new(
                config.max_consecutive_tick_errors,
                config.error_reset_window,
            ),
            clock: Arc::new(SystemClock),
            monitor: Arc::new(TracingMonitor),
            ticks: 0,
            since_autosave: 0,
        }
    }

    /// Read time from `clock` instead of the wall clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Send fatal notices to `monitor`.
    pub fn with_monitor(mut self, monitor: Arc<dyn Monitor>) -> Self {
        self.monitor = monitor;
        self
    }

    /// The driven target.
    pub fn target(&self) -> &T {
        &self.target
    }

    /// Consecutive tick failures so far.
    pub fn consecutive_failures(&self) -> u32 {
        self.failures.count()
    }

    /// Ticks attempted.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    /// Run one tick and apply the failure policy.
    #[instrument(level = "trace", skip(self), fields(tick = self.ticks + 1))]
    pub fn tick(&mut self) -> ControlFlow<FatalShutdown> {
        self.ticks += 1;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.target.process()));
        let now = self.clock.now();

        match outcome {
            Ok(Ok(())) => {
                if self.failures.record_success(now) {
                    info!("Tick error count reset after quiet period");
                }
                self.autosave_if_due();
                ControlFlow::Continue(())
            }
            Ok(Err(e)) if !e.is_fatal() => {
                let count = self.failures.record_failure(now);
                error!(
                    "Error in game tick (error {} of {}): {}",
                    count,
                    self.failures.max(),
                    e
                );
                if self.failures.is_exhausted() {
                    return self.fatal(format!("{} consecutive tick errors, last: {}", count, e));
                }
                self.emergency_save();
                ControlFlow::Continue(())
            }
            Ok(Err(e)) => self.fatal(e.to_string()),
            Err(payload) => self.fatal(format!("panic: {}", panic_message(payload))),
        }
    }

    /// Tick at the configured period until `shutdown` fires or a fatal
    /// failure stops the clock. A graceful stop saves all players and hands
    /// the target back.
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) -> Result<T, FatalShutdown> {
        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        info!("Tick scheduler started ({:?} per tick)", self.period);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let ControlFlow::Break(fatal) = self.tick() {
                        return Err(fatal);
                    }
                }
                _ = shutdown.recv() => {
                    info!("Stopping tick scheduler after {} ticks", self.ticks);
                    let summary = self.target.save_all();
                    info!("Shutdown save: {} saved, {} failed", summary.saved, summary.failed);
                    return Ok(self.target);
                }
            }
        }
    }

    /// Start the clock on its own thread.
    pub fn init(self) -> io::Result<SchedulerHandle> {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        let (done_tx, done_rx) = oneshot::channel();

        let thread = thread::Builder::new()
            .name("game-clock".to_string())
            .spawn(move || {
                let outcome = match tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                {
                    Ok(runtime) => runtime.block_on(self.run(shutdown_rx)).map(|_| ()),
                    Err(e) => Err(FatalShutdown {
                        tick: 0,
                        reason: format!("clock runtime failed to start: {}", e),
                    }),
                };
                let _ = done_tx.send(outcome);
            })?;

        Ok(SchedulerHandle {
            shutdown_tx,
            done: Some(done_rx),
            thread: Some(thread),
        })
    }

    fn autosave_if_due(&mut self) {
        if self.autosave_interval == 0 {
            return;
        }
        self.since_autosave += 1;
        if self.since_autosave >= self.autosave_interval {
            self.since_autosave = 0;
            let summary = self.target.save_all();
            info!("Autosave: {} saved, {} failed", summary.saved, summary.failed);
        }
    }

    fn emergency_save(&mut self) {
        let target = &mut self.target;
        match panic::catch_unwind(AssertUnwindSafe(|| target.save_all())) {
            Ok(summary) if summary.failed > 0 => {
                warn!("Emergency save incomplete: {} failed", summary.failed)
            }
            Ok(summary) => info!("Emergency save: {} saved", summary.saved),
            Err(payload) => error!("Emergency save panicked: {}", panic_message(payload)),
        }
    }

    fn fatal(&mut self, reason: String) -> ControlFlow<FatalShutdown> {
        error!("FATAL: game engine stopping at tick {}: {}", self.ticks, reason);
        self.emergency_save();
        self.monitor.notify(
            Severity::Severe,
            &format!("Game engine fatal shutdown at tick {}: {}", self.ticks, reason),
        );
        ControlFlow::Break(FatalShutdown {
            tick: self.ticks,
            reason,
        })
    }
}

/// Control handle for a running clock thread.
pub struct SchedulerHandle {
    shutdown_tx: broadcast::Sender<()>,
    done: Option<oneshot::Receiver<Result<(), FatalShutdown>>>,
    thread: Option<JoinHandle<()>>,
}

impl SchedulerHandle {
    /// Ask the clock to stop after the current tick.
    pub fn stop(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Wait for the clock thread to end. `Ok` after a graceful stop, the
    /// fatal reason otherwise.
    pub async fn finished(&mut self) -> Result<(), FatalShutdown> {
        let Some(done) = self.done.as_mut() else {
            return Ok(());
        };
        let outcome = done.await.unwrap_or_else(|_| {
            Err(FatalShutdown {
                tick: 0,
                reason: "clock thread exited without reporting".to_string(),
            })
        });
        self.done = None;
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::clock::ManualClock;
    use crate::services::hooks::HookError;
    use crate::world::actor::ActorFault;
    use crate::world::recovery::{FatalFault, PhaseStep};
    use parking_lot::Mutex;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};

    /// Target that replays scripted outcomes, then succeeds.
    #[derive(Default)]
    struct Scripted {
        outcomes: VecDeque<Outcome>,
        ticks: Arc<AtomicU32>,
        saves: Arc<AtomicUsize>,
    }

    enum Outcome {
        Ok,
        Recoverable,
        Fatal,
        Panic,
    }

    impl Scripted {
        fn with(outcomes: impl IntoIterator<Item = Outcome>) -> Self {
            Self {
                outcomes: outcomes.into_iter().collect(),
                ..Self::default()
            }
        }
    }

    impl TickTarget for Scripted {
        fn process(&mut self) -> Result<(), TickError> {
            self.ticks.fetch_add(1, Ordering::SeqCst);
            match self.outcomes.pop_front().unwrap_or(Outcome::Ok) {
                Outcome::Ok => Ok(()),
                Outcome::Recoverable => Err(HookError::new("tasks", "scripted").into()),
                Outcome::Fatal => Err(TickError::Fatal(FatalFault {
                    step: PhaseStep::PlayerLogic,
                    actor: "corrupt".into(),
                    fault: ActorFault::Corrupted("scripted".into()),
                })),
                Outcome::Panic => panic!("scripted panic"),
            }
        }

        fn save_all(&mut self) -> SaveSummary {
            self.saves.fetch_add(1, Ordering::SeqCst);
            SaveSummary { saved: 1, failed: 0 }
        }
    }

    #[derive(Default)]
    struct RecordingMonitor {
        notices: Mutex<Vec<(Severity, String)>>,
    }

    impl Monitor for RecordingMonitor {
        fn notify(&self, severity: Severity, message: &str) {
            self.notices.lock().push((severity, message.to_string()));
        }
    }

    fn config() -> EngineConfig {
        EngineConfig {
            autosave_interval_ticks: 0,
            ..EngineConfig::default()
        }
    }

    #[test]
    fn test_ten_consecutive_failures_are_fatal() {
        let target = Scripted::with((0..10).map(|_| Outcome::Recoverable));
        let saves = Arc::clone(&target.saves);
        let monitor = Arc::new(RecordingMonitor::default());
        let mut scheduler = TickScheduler::new(target, &config())
            .with_clock(ManualClock::shared())
            .with_monitor(monitor.clone());

        for i in 1..=9 {
            assert_eq!(scheduler.tick(), ControlFlow::Continue(()));
            assert_eq!(scheduler.consecutive_failures(), i);
        }
        assert_eq!(saves.load(Ordering::SeqCst), 9);

        match scheduler.tick() {
            ControlFlow::Break(fatal) => {
                assert_eq!(fatal.tick, 10);
                assert!(fatal.reason.contains("10 consecutive"));
            }
            other => panic!("expected fatal, got {:?}", other),
        }
        assert_eq!(saves.load(Ordering::SeqCst), 10);

        let notices = monitor.notices.lock();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].0, Severity::Severe);
    }

    #[test]
    fn test_error_count_resets_after_quiet_window() {
        let clock = ManualClock::shared();
        let target = Scripted::with(
            std::iter::once(Outcome::Recoverable)
                .chain(std::iter::once(Outcome::Ok))
                .chain((0..9).map(|_| Outcome::Recoverable)),
        );
        let mut scheduler = TickScheduler::new(target, &config()).with_clock(clock.clone());

        scheduler.tick();
        assert_eq!(scheduler.consecutive_failures(), 1);

        clock.advance(Duration::from_secs(61));
        scheduler.tick();
        assert_eq!(scheduler.consecutive_failures(), 0);

        // Nine more failures stay below the limit
        for _ in 0..9 {
            assert_eq!(scheduler.tick(), ControlFlow::Continue(()));
        }
        assert_eq!(scheduler.consecutive_failures(), 9);
    }

    #[test]
    fn test_success_inside_window_keeps_count() {
        let clock = ManualClock::shared();
        let target = Scripted::with([Outcome::Recoverable, Outcome::Ok]);
        let mut scheduler = TickScheduler::new(target, &config()).with_clock(clock.clone());

        scheduler.tick();
        clock.advance(Duration::from_secs(10));
        scheduler.tick();
        assert_eq!(scheduler.consecutive_failures(), 1);
    }

    #[test]
    fn test_fatal_error_skips_counter() {
        let target = Scripted::with([Outcome::Fatal]);
        let saves = Arc::clone(&target.saves);
        let mut scheduler = TickScheduler::new(target, &config());

        assert!(matches!(scheduler.tick(), ControlFlow::Break(_)));
        assert_eq!(scheduler.consecutive_failures(), 0);
        assert_eq!(saves.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_panic_is_fatal() {
        let mut scheduler = TickScheduler::new(Scripted::with([Outcome::Panic]), &config());
        match scheduler.tick() {
            ControlFlow::Break(fatal) => assert!(fatal.reason.contains("scripted panic")),
            other => panic!("expected fatal, got {:?}", other),
        }
    }

    #[test]
    fn test_autosave_every_interval() {
        let target = Scripted::default();
        let saves = Arc::clone(&target.saves);
        let config = EngineConfig {
            autosave_interval_ticks: 3,
            ..EngineConfig::default()
        };
        let mut scheduler = TickScheduler::new(target, &config);

        for _ in 0..7 {
            scheduler.tick();
        }
        assert_eq!(saves.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_clock_thread_stops_gracefully() {
        let target = Scripted::default();
        let ticks = Arc::clone(&target.ticks);
        let saves = Arc::clone(&target.saves);
        let config = EngineConfig {
            tick_rate_ms: 5,
            autosave_interval_ticks: 0,
            ..EngineConfig::default()
        };

        let mut handle = TickScheduler::new(target, &config).init().unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;
        handle.stop();

        assert_eq!(handle.finished().await, Ok(()));
        assert!(ticks.load(Ordering::SeqCst) >= 1);
        assert_eq!(saves.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clock_thread_reports_fatal() {
        let config = EngineConfig {
            tick_rate_ms: 5,
            ..EngineConfig::default()
        };
        let mut handle = TickScheduler::new(Scripted::with([Outcome::Ok, Outcome::Fatal]), &config)
            .init()
            .unwrap();

        let fatal = handle.finished().await.unwrap_err();
        assert_eq!(fatal.tick, 2);
    }
}
