//! Per-owner task scheduler.
//!
//! Each lifecycle FSM and pooling manager owns one [`Scheduler`]: a dedicated
//! thread driving a current-thread tokio runtime. Tasks of one scheduler never
//! run concurrently with each other; different schedulers are independent.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use tokio::runtime::{Builder, Handle};
use tokio::sync::oneshot;
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use crate::error::{PdpdError, Result};

/// Handle to a scheduled task. Cancelling is idempotent.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    abort: Option<AbortHandle>,
    cancelled: Arc<AtomicBool>,
}

impl ScheduledTask {
    fn new(abort: AbortHandle, cancelled: Arc<AtomicBool>) -> Self {
        Self {
            abort: Some(abort),
            cancelled,
        }
    }

    fn already_cancelled() -> Self {
        Self {
            abort: None,
            cancelled: Arc::new(AtomicBool::new(true)),
        }
    }

    /// Cancels the task. A task currently running finishes its current
    /// invocation; no further invocations occur.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(abort) = &self.abort {
            abort.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

/// Single-threaded task executor owned by one component.
pub struct Scheduler {
    name: String,
    handle: Handle,
    stop_tx: Mutex<Option<oneshot::Sender<()>>>,
    thread: Mutex<Option<JoinHandle<()>>>,
    closed: AtomicBool,
}

impl Scheduler {
    /// Starts a scheduler thread with the given name.
    pub fn new(name: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let runtime = Builder::new_current_thread()
            .enable_time()
            .build()
            .map_err(|e| PdpdError::Scheduler(format!("{}: {}", name, e)))?;
        let handle = runtime.handle().clone();
        let (stop_tx, stop_rx) = oneshot::channel::<()>();

        let thread = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || {
                runtime.block_on(async {
                    let _ = stop_rx.await;
                });
                // dropping the runtime cancels every pending task
            })
            .map_err(|e| PdpdError::Scheduler(format!("{}: {}", name, e)))?;

        debug!(scheduler = %name, "Scheduler started");

        Ok(Self {
            name,
            handle,
            stop_tx: Mutex::new(Some(stop_tx)),
            thread: Mutex::new(Some(thread)),
            closed: AtomicBool::new(false),
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_shutdown(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Runs `f` as soon as possible on the scheduler thread.
    pub fn execute<F>(&self, f: F) -> ScheduledTask
    where
        F: FnOnce() + Send + 'static,
    {
        self.schedule(Duration::ZERO, f)
    }

    /// Runs `f` once after `delay`.
    pub fn schedule<F>(&self, delay: Duration, f: F) -> ScheduledTask
    where
        F: FnOnce() + Send + 'static,
    {
        if self.is_shutdown() {
            warn!(scheduler = %self.name, "Task scheduled after shutdown ignored");
            return ScheduledTask::already_cancelled();
        }

        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let task = self.handle.spawn(async move {
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            if !flag.load(Ordering::SeqCst) {
                f();
            }
        });

        ScheduledTask::new(task.abort_handle(), cancelled)
    }

    /// Runs `f` after `delay` and then every `period` until cancelled.
    /// Missed ticks are skipped rather than bunched.
    pub fn schedule_at_fixed_rate<F>(&self, delay: Duration, period: Duration, mut f: F) -> ScheduledTask
    where
        F: FnMut() + Send + 'static,
    {
        if self.is_shutdown() {
            warn!(scheduler = %self.name, "Periodic task scheduled after shutdown ignored");
            return ScheduledTask::already_cancelled();
        }

        let period = period.max(Duration::from_millis(1));
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&cancelled);
        let task = self.handle.spawn(async move {
            let start = tokio::time::Instant::now() + delay;
            let mut ticker = tokio::time::interval_at(start, period);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                f();
            }
        });

        ScheduledTask::new(task.abort_handle(), cancelled)
    }

    /// Stops the scheduler thread, dropping all pending tasks. Safe to call
    /// more than once, and from a task running on this scheduler.
    pub fn shutdown(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }

        if let Some(tx) = self.stop_tx.lock().take() {
            let _ = tx.send(());
        }

        if let Some(thread) = self.thread.lock().take() {
            if thread.thread().id() != std::thread::current().id() {
                if thread.join().is_err() {
                    warn!(scheduler = %self.name, "Scheduler thread panicked");
                }
            }
        }

        debug!(scheduler = %self.name, "Scheduler stopped");
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl std::fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("name", &self.name)
            .field("closed", &self.is_shutdown())
            .finish()
    }
}
