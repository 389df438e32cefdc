use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Tracks whether a task currently has a run in flight.
#[derive(Debug, Clone, Default)]
pub struct OverrunGuard {
    running: Arc<AtomicBool>,
}

impl OverrunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the task for one run. Returns `None` while another run holds it.
    pub fn try_acquire(&self) -> Option<RunGuard> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunGuard {
                running: self.running.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// RAII claim on a task; releases the task when dropped.
#[derive(Debug)]
pub struct RunGuard {
    running: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.running.store(false, Ordering::Release);
    }
}
