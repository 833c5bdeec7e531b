//! Deferred invocation of engine work.
//!
//! The engine never runs its own timers. It asks a [`Scheduler`] to call
//! back later; hosts decide how (tokio timers, a cron hook, a work queue).
//! Delivery must be at-least-once and, per backup id, never concurrent.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

/// Named callback plus its arguments.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ScheduledTask {
    ProcessChunk { backup_id: String },
}

impl ScheduledTask {
    pub fn process_chunk(backup_id: &str) -> Self {
        ScheduledTask::ProcessChunk {
            backup_id: backup_id.to_string(),
        }
    }

    pub fn backup_id(&self) -> &str {
        match self {
            ScheduledTask::ProcessChunk { backup_id } => backup_id,
        }
    }
}

pub trait Scheduler: Send + Sync {
    /// Run `task` once after `delay`. Scheduling a task that is already
    /// pending replaces the pending one.
    fn schedule_once(&self, delay: Duration, task: ScheduledTask);

    /// Drop a pending task, if any
    fn cancel_scheduled(&self, task: &ScheduledTask);

    /// Best-effort hint to run pending work now
    fn trigger_now(&self);
}

/// Scheduler that only records requests; the owner drains and runs them.
#[derive(Debug, Default)]
pub struct ManualScheduler {
    pending: Mutex<Vec<(Duration, ScheduledTask)>>,
    triggers: AtomicUsize,
}

impl ManualScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    /// Remove and return every pending task in request order, ignoring delays
    pub fn take_pending(&self) -> Vec<ScheduledTask> {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.drain(..).map(|(_, task)| task).collect()
    }

    pub fn pending(&self) -> Vec<(Duration, ScheduledTask)> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn trigger_count(&self) -> usize {
        self.triggers.load(Ordering::Relaxed)
    }
}

impl Scheduler for ManualScheduler {
    fn schedule_once(&self, delay: Duration, task: ScheduledTask) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|(_, t)| *t != task);
        pending.push((delay, task));
    }

    fn cancel_scheduled(&self, task: &ScheduledTask) {
        let mut pending = self.pending.lock().unwrap_or_else(|e| e.into_inner());
        pending.retain(|(_, t)| t != task);
    }

    fn trigger_now(&self) {
        self.triggers.fetch_add(1, Ordering::Relaxed);
    }
}
