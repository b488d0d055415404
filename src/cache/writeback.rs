//! Write-Back Scheduler
//!
//! Persists memory-tier writes to the disk tier off the caller's thread.
//!
//! # Lifecycle
//!
//! ```text
//!   Running ──shutdown()──> Draining ──grace period / idle──> Stopped
//! ```
//!
//! In `async` mode tasks run on the blocking pool of a runtime owned by the
//! scheduler, sized to `diskIOThreads`. In `sync` mode no runtime is built and
//! `submit` runs the task on the calling thread.
//!
//! The runtime is never dropped in place: it is shut down in the background,
//! which is safe even when the owner lives inside another async runtime.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::runtime::{Builder, Runtime};
use tracing::{debug, info, warn};

use super::config::WriteMode;
use crate::error::{Error, Result};

/// Scheduler lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Accepting tasks
    Running,
    /// Rejecting tasks, waiting for queued ones
    Draining,
    /// Terminal
    Stopped,
}

impl std::fmt::Display for SchedulerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SchedulerState::Running => write!(f, "running"),
            SchedulerState::Draining => write!(f, "draining"),
            SchedulerState::Stopped => write!(f, "stopped"),
        }
    }
}

/// Count of submitted tasks that have not finished or been dropped
#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Decrements the pending count when the task that owns it finishes,
/// panics or is discarded by runtime shutdown
struct PendingGuard {
    pending: Arc<Pending>,
}

impl PendingGuard {
    fn new(pending: Arc<Pending>) -> Self {
        *pending.count.lock() += 1;
        Self { pending }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut count = self.pending.count.lock();
        *count = count.saturating_sub(1);
        if *count == 0 {
            self.pending.idle.notify_all();
        }
    }
}

/// Bounded worker pool for disk writes
pub struct WriteBackScheduler {
    mode: WriteMode,
    state: Mutex<SchedulerState>,
    runtime: Mutex<Option<Runtime>>,
    pending: Arc<Pending>,
    grace_period: Duration,
}

impl WriteBackScheduler {
    /// Create a scheduler; in `async` mode this starts `threads` workers
    pub fn new(mode: WriteMode, threads: usize, grace_period: Duration) -> Result<Self> {
        let runtime = match mode {
            WriteMode::Sync => None,
            WriteMode::Async => Some(
                Builder::new_multi_thread()
                    .worker_threads(1)
                    .max_blocking_threads(threads.max(1))
                    .thread_name("artifact-cache-writeback")
                    .enable_all()
                    .build()
                    .map_err(|e| Error::Config(format!("failed to start write-back pool: {}", e)))?,
            ),
        };

        debug!(mode = %mode, threads, "Write-back scheduler started");

        Ok(Self {
            mode,
            state: Mutex::new(SchedulerState::Running),
            runtime: Mutex::new(runtime),
            pending: Arc::new(Pending::default()),
            grace_period,
        })
    }

    pub fn mode(&self) -> WriteMode {
        self.mode
    }

    pub fn state(&self) -> SchedulerState {
        *self.state.lock()
    }

    /// Tasks submitted but not yet finished
    pub fn pending(&self) -> usize {
        *self.pending.count.lock()
    }

    /// Queue `task`, or run it inline in `sync` mode
    ///
    /// Returns false if the scheduler is no longer running and the task was
    /// dropped.
    pub fn submit<F>(&self, task: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        let state = self.state.lock();
        if *state != SchedulerState::Running {
            debug!(state = %*state, "Write-back task rejected");
            return false;
        }

        match self.mode {
            WriteMode::Sync => {
                drop(state);
                task();
                true
            }
            WriteMode::Async => {
                let runtime = self.runtime.lock();
                let Some(runtime) = runtime.as_ref() else {
                    return false;
                };

                let guard = PendingGuard::new(Arc::clone(&self.pending));
                runtime.spawn_blocking(move || {
                    let _guard = guard;
                    task();
                });
                true
            }
        }
    }

    /// Block until no tasks are pending or `timeout` elapses
    ///
    /// Returns true if the scheduler was idle when this returned. A false
    /// result only means the wait timed out; writes may still land later.
    pub fn await_idle(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut count = self.pending.count.lock();

        while *count > 0 {
            if self
                .pending
                .idle
                .wait_until(&mut count, deadline)
                .timed_out()
            {
                return *count == 0;
            }
        }
        true
    }

    /// Stop accepting tasks, drain for the grace period, then cancel the rest
    ///
    /// Idempotent: only the first call does any work. Returns
    /// [`Error::Shutdown`] if tasks were still pending when the grace period
    /// ran out; the scheduler is stopped either way.
    pub fn shutdown(&self) -> Result<()> {
        {
            let mut state = self.state.lock();
            if *state != SchedulerState::Running {
                return Ok(());
            }
            *state = SchedulerState::Draining;
        }

        let drained = self.await_idle(self.grace_period);
        let abandoned = self.pending();

        if let Some(runtime) = self.runtime.lock().take() {
            runtime.shutdown_background();
        }
        *self.state.lock() = SchedulerState::Stopped;

        if drained {
            info!(mode = %self.mode, "Write-back scheduler stopped");
            Ok(())
        } else {
            Err(Error::Shutdown(format!(
                "{} disk writes still pending after {:?}, cancelled",
                abandoned, self.grace_period
            )))
        }
    }
}

impl Drop for WriteBackScheduler {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            warn!(error = %e, "Write-back scheduler dropped with pending writes");
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const GRACE: Duration = Duration::from_secs(5);

    #[test]
    fn test_sync_mode_runs_inline() {
        let scheduler = WriteBackScheduler::new(WriteMode::Sync, 2, GRACE).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        let counter = Arc::clone(&done);
        assert!(scheduler.submit(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // No waiting needed
        assert_eq!(done.load(Ordering::SeqCst), 1);
        assert_eq!(scheduler.pending(), 0);
        assert!(scheduler.await_idle(Duration::ZERO));
    }

    #[test]
    fn test_async_mode_completes_after_await_idle() {
        let scheduler = WriteBackScheduler::new(WriteMode::Async, 3, GRACE).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..50 {
            let counter = Arc::clone(&done);
            assert!(scheduler.submit(move || {
                std::thread::sleep(Duration::from_millis(1));
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }

        assert!(scheduler.await_idle(Duration::from_secs(10)));
        assert_eq!(done.load(Ordering::SeqCst), 50);
        assert_eq!(scheduler.pending(), 0);
    }

    #[test]
    fn test_await_idle_times_out() {
        let scheduler = WriteBackScheduler::new(WriteMode::Async, 1, GRACE).unwrap();
        scheduler.submit(|| std::thread::sleep(Duration::from_millis(300)));

        assert!(!scheduler.await_idle(Duration::from_millis(10)));
        assert!(scheduler.await_idle(Duration::from_secs(5)));
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let scheduler = WriteBackScheduler::new(WriteMode::Async, 2, GRACE).unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Running);

        scheduler.shutdown().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);

        scheduler.shutdown().unwrap();
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
    }

    #[test]
    fn test_rejects_after_shutdown() {
        for mode in [WriteMode::Sync, WriteMode::Async] {
            let scheduler = WriteBackScheduler::new(mode, 1, GRACE).unwrap();
            scheduler.shutdown().unwrap();

            let ran = Arc::new(AtomicUsize::new(0));
            let counter = Arc::clone(&ran);
            assert!(!scheduler.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
            assert_eq!(ran.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn test_shutdown_drains_queued_writes() {
        let scheduler = WriteBackScheduler::new(WriteMode::Async, 2, GRACE).unwrap();
        let done = Arc::new(AtomicUsize::new(0));

        for _ in 0..10 {
            let counter = Arc::clone(&done);
            scheduler.submit(move || {
                std::thread::sleep(Duration::from_millis(5));
                counter.fetch_add(1, Ordering::SeqCst);
            });
        }

        scheduler.shutdown().unwrap();
        assert_eq!(done.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_shutdown_times_out_and_still_stops() {
        let scheduler =
            WriteBackScheduler::new(WriteMode::Async, 1, Duration::from_millis(20)).unwrap();
        scheduler.submit(|| std::thread::sleep(Duration::from_millis(500)));

        let result = scheduler.shutdown();
        assert_matches!(result, Err(Error::Shutdown(_)));
        assert_eq!(scheduler.state(), SchedulerState::Stopped);
        assert!(!scheduler.submit(|| {}));
    }

    #[test]
    fn test_panicking_task_does_not_leak_pending() {
        let scheduler = WriteBackScheduler::new(WriteMode::Async, 1, GRACE).unwrap();
        scheduler.submit(|| panic!("disk exploded"));
        assert!(scheduler.await_idle(Duration::from_secs(5)));
        assert_eq!(scheduler.pending(), 0);
    }

    #[tokio::test]
    async fn test_shutdown_inside_async_context() {
        let scheduler = WriteBackScheduler::new(WriteMode::Async, 2, GRACE).unwrap();
        scheduler.submit(|| {});
        scheduler.shutdown().unwrap();
        drop(scheduler);
    }

    #[tokio::test]
    async fn test_drop_inside_async_context() {
        let scheduler = WriteBackScheduler::new(WriteMode::Async, 2, GRACE).unwrap();
        scheduler.submit(|| {});
        drop(scheduler);
    }
}
