//! Tokio-backed [`Scheduler`]: each request becomes a delayed task that
//! pushes onto a single queue consumed by the chunk worker.

use backup_engine::scheduler::{ScheduledTask, Scheduler};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

struct PendingTimer {
    generation: u64,
    abort: AbortHandle,
}

#[derive(Default)]
struct Timers {
    next_generation: u64,
    pending: HashMap<ScheduledTask, PendingTimer>,
}

pub struct TokioScheduler {
    timers: Arc<Mutex<Timers>>,
    queue: mpsc::UnboundedSender<ScheduledTask>,
    runtime: Handle,
}

impl TokioScheduler {
    /// Must be called from within a tokio runtime. The receiver yields
    /// tasks as they come due.
    pub fn new() -> (Self, mpsc::UnboundedReceiver<ScheduledTask>) {
        let (queue, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            timers: Default::default(),
            queue,
            runtime: Handle::current(),
        };
        (scheduler, rx)
    }

    pub fn pending_count(&self) -> usize {
        self.lock().pending.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Timers> {
        self.timers.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn deliver(&self, task: ScheduledTask) {
        if self.queue.send(task).is_err() {
            tracing::warn!("Chunk queue closed, dropping scheduled task");
        }
    }
}

impl Scheduler for TokioScheduler {
    fn schedule_once(&self, delay: Duration, task: ScheduledTask) {
        let mut timers = self.lock();
        timers.next_generation += 1;
        let generation = timers.next_generation;

        let shared = self.timers.clone();
        let queue = self.queue.clone();
        let fired = task.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            // Only the most recent request for a task may deliver it
            let mut timers = shared.lock().unwrap_or_else(|e| e.into_inner());
            let current = timers
                .pending
                .get(&fired)
                .is_some_and(|t| t.generation == generation);
            if current {
                timers.pending.remove(&fired);
                drop(timers);
                if queue.send(fired).is_err() {
                    tracing::warn!("Chunk queue closed, dropping scheduled task");
                }
            }
        });

        let replaced = timers.pending.insert(
            task,
            PendingTimer {
                generation,
                abort: handle.abort_handle(),
            },
        );
        if let Some(old) = replaced {
            old.abort.abort();
        }
    }

    fn cancel_scheduled(&self, task: &ScheduledTask) {
        if let Some(timer) = self.lock().pending.remove(task) {
            timer.abort.abort();
            tracing::debug!(backup_id = %task.backup_id(), "Scheduled chunk cancelled");
        }
    }

    fn trigger_now(&self) {
        let due: Vec<ScheduledTask> = {
            let mut timers = self.lock();
            timers
                .pending
                .drain()
                .map(|(task, timer)| {
                    timer.abort.abort();
                    task
                })
                .collect()
        };
        for task in due {
            self.deliver(task);
        }
    }
}
