//! Randomized-priority job queue and fixed worker pool.
//!
//! Jobs live in a shared max-heap keyed by a random `u32` drawn at push time, which
//! spreads concurrently running tasks across the mesh. A fixed pool of scoped worker
//! threads drains the heap:
//!
//! - worker `0` runs whenever the heap is non-empty, so a shallow queue always makes
//!   progress;
//! - the other ("batch") workers only run while the depth exceeds the low-water mark, and
//!   are broadcast awake once it exceeds the high-water mark.
//!
//! Termination is detected with an `unfinished` counter: it is incremented *before* a job
//! becomes visible and decremented only after the job body (including every job it
//! pushed) has returned. A worker exits the moment it observes zero.
//!
//! Worker 0 sleeps on its own condition variable, which every push signals. Batch workers
//! sleep on a second one. A push that leaves the depth below the low-water mark therefore
//! always reaches the one worker able to run it.

#![forbid(unsafe_code)]

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::{Condvar, Mutex, MutexGuard, PoisonError};

/// Batch workers wait while the queue holds at most this many jobs.
pub const DEFAULT_LOW_WATER_MARK: usize = 50;

/// Every sleeping worker is woken once the queue holds more than this many jobs.
pub const DEFAULT_HIGH_WATER_MARK: usize = 100;

/// A job together with its scheduling priority; ordered by priority only.
#[derive(Debug)]
struct PrioritizedJob<T> {
    priority: u32,
    job: T,
}

impl<T> PartialEq for PrioritizedJob<T> {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority
    }
}

impl<T> Eq for PrioritizedJob<T> {}

impl<T> PartialOrd for PrioritizedJob<T> {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl<T> Ord for PrioritizedJob<T> {
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority.cmp(&other.priority)
    }
}

#[derive(Debug)]
struct QueueState<T> {
    jobs: BinaryHeap<PrioritizedJob<T>>,
    unfinished: usize,
    total_jobs: usize,
    halted: bool,
}

/// Shared worklist plus the synchronization used by [`JobQueue::run_jobs`].
///
/// # Examples
///
/// ```rust
/// use par_delaunay::core::scheduler::JobQueue;
/// use std::sync::atomic::{AtomicUsize, Ordering};
///
/// let queue = JobQueue::default();
/// let sum = AtomicUsize::new(0);
/// queue.push_job(3_usize);
/// queue
///     .run_jobs(4, |n, queue| {
///         sum.fetch_add(n, Ordering::Relaxed);
///         if n > 0 {
///             queue.push_job(n - 1);
///         }
///         Ok::<(), ()>(())
///     })
///     .unwrap();
/// assert_eq!(sum.load(Ordering::Relaxed), 3 + 2 + 1);
/// assert_eq!(queue.total_jobs(), 4);
/// ```
#[derive(Debug)]
pub struct JobQueue<T> {
    state: Mutex<QueueState<T>>,
    /// Signalled on every push; only worker 0 waits here.
    drain_ready: Condvar,
    /// Signalled when the depth exceeds the low-water mark; batch workers wait here.
    batch_ready: Condvar,
    low_water_mark: usize,
    high_water_mark: usize,
}

impl<T> JobQueue<T> {
    /// Creates an empty queue with the given water marks.
    #[must_use]
    pub const fn new(low_water_mark: usize, high_water_mark: usize) -> Self {
        Self {
            state: Mutex::new(QueueState {
                jobs: BinaryHeap::new(),
                unfinished: 0,
                total_jobs: 0,
                halted: false,
            }),
            drain_ready: Condvar::new(),
            batch_ready: Condvar::new(),
            low_water_mark,
            high_water_mark,
        }
    }

    fn lock_state(&self) -> MutexGuard<'_, QueueState<T>> {
        // Critical sections never panic; a poisoned lock can only come from a panicking
        // job body, which also halts the queue.
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Enqueues a job with a fresh random priority.
    ///
    /// The job counts as unfinished from this moment on. Pushing onto a halted queue is a
    /// no-op.
    pub fn push_job(&self, job: T) {
        let priority = rand::random::<u32>();
        let mut state = self.lock_state();
        if state.halted {
            return;
        }
        state.unfinished += 1;
        state.total_jobs += 1;
        state.jobs.push(PrioritizedJob { priority, job });
        let depth = state.jobs.len();
        drop(state);

        self.drain_ready.notify_one();
        if depth > self.low_water_mark {
            self.batch_ready.notify_one();
        }
    }

    /// Number of jobs ever pushed.
    #[must_use]
    pub fn total_jobs(&self) -> usize {
        self.lock_state().total_jobs
    }

    /// Jobs pushed but not yet finished (queued or running).
    #[must_use]
    pub fn unfinished_jobs(&self) -> usize {
        self.lock_state().unfinished
    }

    /// Jobs waiting in the heap.
    #[must_use]
    pub fn queued_jobs(&self) -> usize {
        self.lock_state().jobs.len()
    }

    /// Returns `true` once a job has failed (or panicked) and the queue was drained.
    #[must_use]
    pub fn is_halted(&self) -> bool {
        self.lock_state().halted
    }

    /// Drops every queued job and stops all workers at their next check.
    fn halt_locked(state: &mut QueueState<T>) {
        state.unfinished -= state.jobs.len();
        state.jobs.clear();
        state.halted = true;
    }

    fn wake_all(&self) {
        self.drain_ready.notify_all();
        self.batch_ready.notify_all();
    }

    const fn may_run(&self, worker: usize, depth: usize) -> bool {
        depth > self.low_water_mark || (worker == 0 && depth > 0)
    }

    const fn ready_signal(&self, worker: usize) -> &Condvar {
        if worker == 0 {
            &self.drain_ready
        } else {
            &self.batch_ready
        }
    }
}

impl<T: Send> JobQueue<T> {
    /// Runs `workers` threads until no job is unfinished, then returns.
    ///
    /// `executor` receives each job together with the queue, so it can push follow-up
    /// jobs. Jobs must be pushed before calling this (or by the executor); a queue with no
    /// unfinished job returns immediately.
    ///
    /// # Errors
    ///
    /// The first error returned by `executor` halts the queue: queued jobs are dropped,
    /// running jobs finish, and that error is returned.
    ///
    /// # Panics
    ///
    /// A panic inside `executor` halts the queue and is propagated once every worker has
    /// stopped.
    pub fn run_jobs<F, E>(&self, workers: usize, executor: F) -> Result<(), E>
    where
        F: Fn(T, &Self) -> Result<(), E> + Sync,
        E: Send,
    {
        let first_error = Mutex::new(None);
        std::thread::scope(|scope| {
            for worker in 0..workers.max(1) {
                let executor = &executor;
                let first_error = &first_error;
                scope.spawn(move || self.worker_loop(worker, executor, first_error));
            }
        });
        match first_error
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
        {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn worker_loop<F, E>(&self, worker: usize, executor: &F, first_error: &Mutex<Option<E>>)
    where
        F: Fn(T, &Self) -> Result<(), E>,
    {
        let mut state = self.lock_state();
        loop {
            if state.unfinished == 0 || state.halted {
                break;
            }
            if !self.may_run(worker, state.jobs.len()) {
                state = self
                    .ready_signal(worker)
                    .wait(state)
                    .unwrap_or_else(PoisonError::into_inner);
                continue;
            }
            let Some(PrioritizedJob { job, .. }) = state.jobs.pop() else {
                continue;
            };
            drop(state);

            let result = {
                let _guard = HaltOnPanic(self);
                executor(job, self)
            };
            let failed = if let Err(err) = result {
                let mut slot = first_error.lock().unwrap_or_else(PoisonError::into_inner);
                if slot.is_none() {
                    *slot = Some(err);
                }
                true
            } else {
                false
            };

            state = self.lock_state();
            state.unfinished -= 1;
            if failed && !state.halted {
                Self::halt_locked(&mut state);
            }
            if state.unfinished == 0 || state.halted || state.jobs.len() > self.high_water_mark
            {
                self.wake_all();
            }
        }
        drop(state);
        // Anyone still waiting must re-check the exit condition.
        self.wake_all();
    }
}

impl<T> Default for JobQueue<T> {
    fn default() -> Self {
        Self::new(DEFAULT_LOW_WATER_MARK, DEFAULT_HIGH_WATER_MARK)
    }
}

/// Halts the queue if a job body unwinds, so the remaining workers exit instead of
/// waiting for a job that will never finish.
struct HaltOnPanic<'a, T>(&'a JobQueue<T>);

impl<T> Drop for HaltOnPanic<'_, T> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut state = self.0.lock_state();
            JobQueue::halt_locked(&mut state);
            drop(state);
            self.0.wake_all();
        }
    }
}
