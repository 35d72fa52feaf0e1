//! Content hooks run at the start of every tick.
//!
//! Scheduled tasks, minigames and ground-item upkeep all plug in here. A
//! hook error fails the whole tick; the scheduler decides what happens next.

use tracing::debug;

use crate::core::queue::PendingQueue;

/// Failure raised by a content hook.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{hook}: {reason}")]
pub struct HookError {
    /// Hook or task name.
    pub hook: String,
    /// What went wrong.
    pub reason: String,
}

impl HookError {
    /// Build an error for `hook`.
    pub fn new(hook: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            reason: reason.into(),
        }
    }
}

/// Once-per-tick content processor.
pub trait ContentHook: Send {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// Advance by one tick.
    fn process(&mut self) -> Result<(), HookError>;
}

/// Adapter turning a closure into a hook.
pub struct FnHook<F> {
    name: String,
    f: F,
}

impl<F> FnHook<F>
where
    F: FnMut() -> Result<(), HookError> + Send,
{
    /// Wrap `f` under `name`.
    pub fn new(name: impl Into<String>, f: F) -> Self {
        Self { name: name.into(), f }
    }
}

impl<F> ContentHook for FnHook<F>
where
    F: FnMut() -> Result<(), HookError> + Send,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn process(&mut self) -> Result<(), HookError> {
        (self.f)()
    }
}

// =============================================================================
// SCHEDULED TASKS
// =============================================================================

/// What a task wants after running.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    /// Run again after another `delay` ticks.
    Repeat,
    /// Done; drop the task.
    Finished,
}

type TaskFn = Box<dyn FnMut() -> Result<TaskStatus, HookError> + Send>;

/// A job that fires every `delay` ticks until it reports [`TaskStatus::Finished`].
pub struct ScheduledTask {
    name: String,
    delay: u32,
    countdown: u32,
    job: TaskFn,
}

impl ScheduledTask {
    /// Create a task that first fires `delay` ticks from now (minimum 1).
    pub fn new<F>(name: impl Into<String>, delay: u32, job: F) -> Self
    where
        F: FnMut() -> Result<TaskStatus, HookError> + Send + 'static,
    {
        let delay = delay.max(1);
        Self {
            name: name.into(),
            delay,
            countdown: delay,
            job: Box::new(job),
        }
    }

    /// Task name.
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Runs scheduled tasks. New tasks can be submitted from any thread.
pub struct TaskRunner {
    active: Vec<ScheduledTask>,
    incoming: PendingQueue<ScheduledTask>,
}

impl TaskRunner {
    /// Runner with no tasks.
    pub fn new() -> Self {
        Self {
            active: Vec::new(),
            incoming: PendingQueue::new(),
        }
    }

    /// Handle for submitting tasks from elsewhere.
    pub fn submitter(&self) -> PendingQueue<ScheduledTask> {
        self.incoming.clone()
    }

    /// Submit a task; it starts counting down on the next tick.
    pub fn submit(&self, task: ScheduledTask) {
        self.incoming.push(task);
    }

    /// Active task count (excluding not-yet-picked-up submissions).
    pub fn active(&self) -> usize {
        self.active.len()
    }
}

impl Default for TaskRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ContentHook for TaskRunner {
    fn name(&self) -> &str {
        "tasks"
    }

    fn process(&mut self) -> Result<(), HookError> {
        while let Some(task) = self.incoming.pop() {
            self.active.push(task);
        }

        let mut first_error = None;
        self.active.retain_mut(|task| {
            task.countdown -= 1;
            if task.countdown > 0 {
                return true;
            }
            match (task.job)() {
                Ok(TaskStatus::Repeat) => {
                    task.countdown = task.delay;
                    true
                }
                Ok(TaskStatus::Finished) => {
                    debug!("Task {} finished", task.name);
                    false
                }
                Err(e) => {
                    // A failed task is dropped and fails the tick
                    first_error.get_or_insert(e);
                    false
                }
            }
        });

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}
