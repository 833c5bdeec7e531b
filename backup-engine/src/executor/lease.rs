//! In-process per-job lease: at most one chunk per backup id at a time.

use std::collections::HashSet;
use std::sync::Mutex;

#[derive(Debug, Default)]
pub struct JobLeases {
    held: Mutex<HashSet<String>>,
}

/// Released on drop
#[derive(Debug)]
pub struct LeaseGuard<'a> {
    leases: &'a JobLeases,
    backup_id: String,
}

impl JobLeases {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` while another invocation holds the lease for `backup_id`
    pub fn try_acquire(&self, backup_id: &str) -> Option<LeaseGuard<'_>> {
        let mut held = self.held.lock().unwrap_or_else(|e| e.into_inner());
        if !held.insert(backup_id.to_string()) {
            return None;
        }
        Some(LeaseGuard {
            leases: self,
            backup_id: backup_id.to_string(),
        })
    }

    pub fn is_held(&self, backup_id: &str) -> bool {
        self.held
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .contains(backup_id)
    }
}

impl Drop for LeaseGuard<'_> {
    fn drop(&mut self) {
        let mut held = self.leases.held.lock().unwrap_or_else(|e| e.into_inner());
        held.remove(&self.backup_id);
    }
}
