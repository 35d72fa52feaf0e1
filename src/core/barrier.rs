//! Fork-join barrier executor.
//!
//! A fixed pool of worker threads runs one phase at a time. `run_phase`
//! stripes the index range across the pool and does not return until every
//! stripe has reported back, so consecutive phases never overlap.
//!
//! ```text
//!   pipeline ──run_phase(n, op)──┬─► worker 0: 0, W, 2W, ...
//!                                ├─► worker 1: 1, W+1, ...
//!                                └─► worker W-1
//!   pipeline ◄──── join (all W stripes done) ────┘
//! ```
//!
//! Each stripe carries a caller-supplied context value (fault counters,
//! statistics) that is handed back after the join, in stripe order.

use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, RecvTimeoutError, Sender};
use tracing::{debug, error};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Barrier executor errors.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BarrierError {
    /// A per-index operation panicked. The other stripes still ran to
    /// completion before this was returned.
    #[error("worker panicked in stripe {stripe}: {message}")]
    WorkerPanicked {
        /// Stripe that panicked.
        stripe: usize,
        /// Panic payload, if it was a string.
        message: String,
    },

    /// The phase did not finish within the configured timeout.
    #[error("phase exceeded {timeout:?} ({completed}/{stripes} stripes done)")]
    Timeout {
        /// Configured timeout.
        timeout: Duration,
        /// Stripes that finished.
        completed: usize,
        /// Stripes dispatched.
        stripes: usize,
    },

    /// A worker went away without reporting.
    #[error("worker lost before reporting completion")]
    WorkerLost,

    /// The pool has been shut down.
    #[error("worker pool closed")]
    PoolClosed,
}

/// Fixed-size worker pool with a join barrier per phase.
pub struct SyncBarrierExecutor {
    job_tx: Option<Sender<Job>>,
    workers: Vec<JoinHandle<()>>,
    phase_timeout: Option<Duration>,
}

impl SyncBarrierExecutor {
    /// Spawn `worker_count` workers (at least one).
    pub fn new(worker_count: usize) -> io::Result<Self> {
        let worker_count = worker_count.max(1);
        let (job_tx, job_rx) = unbounded::<Job>();

        let mut workers = Vec::with_capacity(worker_count);
        for i in 0..worker_count {
            let rx = job_rx.clone();
            let handle = thread::Builder::new()
                .name(format!("sync-worker-{}", i))
                .spawn(move || {
                    for job in rx.iter() {
                        job();
                    }
                })?;
            workers.push(handle);
        }

        debug!("Barrier executor started with {} workers", worker_count);

        Ok(Self {
            job_tx: Some(job_tx),
            workers,
            phase_timeout: None,
        })
    }

    /// Abort the wait for a phase after `timeout`. `None` waits forever.
    pub fn with_phase_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.phase_timeout = timeout;
        self
    }

    /// Number of worker threads.
    #[inline]
    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Run `op` once for every index in `0..index_count`.
    ///
    /// The range is split into `contexts.len()` stripes; stripe `s` visits
    /// indices `s, s + k, s + 2k, ...` with `k = contexts.len()` and gets
    /// exclusive use of `contexts[s]`. Blocks until every stripe is done and
    /// returns the contexts in their original order.
    pub fn run_phase<S, F>(
        &self,
        index_count: usize,
        contexts: Vec<S>,
        op: F,
    ) -> Result<Vec<S>, BarrierError>
    where
        S: Send + 'static,
        F: Fn(&mut S, usize) + Send + Sync + 'static,
    {
        let stripes = contexts.len();
        if index_count == 0 || stripes == 0 {
            return Ok(contexts);
        }
        let job_tx = self.job_tx.as_ref().ok_or(BarrierError::PoolClosed)?;

        let op = Arc::new(op);
        let (done_tx, done_rx) = unbounded::<(usize, Result<S, String>)>();

        for (stripe, mut ctx) in contexts.into_iter().enumerate() {
            let op = Arc::clone(&op);
            let done_tx = done_tx.clone();
            let job: Job = Box::new(move || {
                let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
                    for index in (stripe..index_count).step_by(stripes) {
                        op(&mut ctx, index);
                    }
                }));
                let _ = done_tx.send((stripe, outcome.map(|()| ctx).map_err(panic_message)));
            });
            job_tx.send(job).map_err(|_| BarrierError::PoolClosed)?;
        }
        drop(done_tx);

        let deadline = self.phase_timeout.map(|t| Instant::now() + t);
        let mut results: Vec<Option<S>> = (0..stripes).map(|_| None).collect();
        let mut panicked = None;

        for completed in 0..stripes {
            let (stripe, outcome) = match deadline {
                Some(deadline) => done_rx.recv_deadline(deadline).map_err(|e| match e {
                    RecvTimeoutError::Timeout => BarrierError::Timeout {
                        timeout: self.phase_timeout.unwrap_or_default(),
                        completed,
                        stripes,
                    },
                    RecvTimeoutError::Disconnected => BarrierError::WorkerLost,
                })?,
                None => done_rx.recv().map_err(|_| BarrierError::WorkerLost)?,
            };

            match outcome {
                Ok(ctx) => results[stripe] = Some(ctx),
                Err(message) => {
                    error!("Stripe {} panicked: {}", stripe, message);
                    panicked.get_or_insert(BarrierError::WorkerPanicked { stripe, message });
                }
            }
        }

        if let Some(err) = panicked {
            return Err(err);
        }
        results
            .into_iter()
            .collect::<Option<Vec<S>>>()
            .ok_or(BarrierError::WorkerLost)
    }

    /// [`run_phase`](Self::run_phase) without per-stripe state.
    pub fn run_indexed<F>(&self, index_count: usize, op: F) -> Result<(), BarrierError>
    where
        F: Fn(usize) + Send + Sync + 'static,
    {
        let contexts = vec![(); self.worker_count()];
        self.run_phase(index_count, contexts, move |_, index| op(index))
            .map(|_| ())
    }
}

impl Drop for SyncBarrierExecutor {
    fn drop(&mut self) {
        // Closing the job channel ends each worker's receive loop
        self.job_tx.take();
        for worker in self.workers.drain(..) {
            let _ = worker.join();
        }
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::Rng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counters(n: usize) -> Arc<Vec<AtomicUsize>> {
        Arc::new((0..n).map(|_| AtomicUsize::new(0)).collect())
    }

    #[test]
    fn test_every_index_runs_exactly_once() {
        let executor = SyncBarrierExecutor::new(4).unwrap();
        let hits = counters(103);

        let h = Arc::clone(&hits);
        executor
            .run_indexed(103, move |i| {
                h[i].fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        assert!(hits.iter().all(|c| c.load(Ordering::SeqCst) == 1));
    }

    #[test]
    fn test_contexts_returned_in_stripe_order() {
        let executor = SyncBarrierExecutor::new(3).unwrap();
        let contexts = vec![Vec::new(), Vec::new(), Vec::new()];

        let out = executor
            .run_phase(10, contexts, |seen: &mut Vec<usize>, i| seen.push(i))
            .unwrap();

        assert_eq!(out[0], vec![0, 3, 6, 9]);
        assert_eq!(out[1], vec![1, 4, 7]);
        assert_eq!(out[2], vec![2, 5, 8]);
    }

    #[test]
    fn test_empty_phase_returns_immediately() {
        let executor = SyncBarrierExecutor::new(2).unwrap();
        let out = executor.run_phase(0, vec![7u32, 8], |_, _| unreachable!()).unwrap();
        assert_eq!(out, vec![7, 8]);
    }

    #[test]
    fn test_panic_reported_after_siblings_finish() {
        let executor = SyncBarrierExecutor::new(2).unwrap();
        let hits = counters(8);

        let h = Arc::clone(&hits);
        let result = executor.run_indexed(8, move |i| {
            if i == 2 {
                panic!("boom at {}", i);
            }
            h[i].fetch_add(1, Ordering::SeqCst);
        });

        match result {
            Err(BarrierError::WorkerPanicked { stripe, message }) => {
                assert_eq!(stripe, 0);
                assert!(message.contains("boom at 2"));
            }
            other => panic!("unexpected result: {:?}", other),
        }
        // Stripe 1 (odd indices) is untouched by the panic
        for i in [1, 3, 5, 7] {
            assert_eq!(hits[i].load(Ordering::SeqCst), 1);
        }

        // Pool survives for the next phase
        executor.run_indexed(4, |_| {}).unwrap();
    }

    #[test]
    fn test_timeout_when_configured() {
        let executor = SyncBarrierExecutor::new(2)
            .unwrap()
            .with_phase_timeout(Some(Duration::from_millis(20)));

        let result = executor.run_indexed(2, |i| {
            if i == 1 {
                thread::sleep(Duration::from_millis(300));
            }
        });

        assert!(matches!(result, Err(BarrierError::Timeout { stripes: 2, .. })));
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(24))]

        #[test]
        fn prop_returns_only_after_all_completions(workers in 1usize..6, extra in 1usize..60) {
            let n = workers + extra;
            let executor = SyncBarrierExecutor::new(workers).unwrap();
            let done = Arc::new(AtomicUsize::new(0));

            let d = Arc::clone(&done);
            let contexts = vec![0usize; workers];
            let out = executor.run_phase(n, contexts, move |count: &mut usize, _| {
                let delay = rand::thread_rng().gen_range(0..300);
                thread::sleep(Duration::from_micros(delay));
                *count += 1;
                d.fetch_add(1, Ordering::SeqCst);
            }).unwrap();

            prop_assert_eq!(done.load(Ordering::SeqCst), n);
            prop_assert_eq!(out.iter().sum::<usize>(), n);
        }
    }
}
