//! Non-blocking run lock ensuring one cycle per tracker at a time.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Flag claimed by a tracker for the duration of one cycle.
///
/// A scheduled run that finds the lock held is skipped rather than queued.
#[derive(Default)]
pub struct RunLock {
    held: Arc<AtomicBool>,
}

impl RunLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the lock, or `None` if a cycle is already running.
    pub fn try_acquire(&self) -> Option<RunGuard> {
        self.held
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .ok()
            .map(|_| RunGuard {
                flag: self.held.clone(),
            })
    }

    pub fn is_held(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

/// Releases the run lock when dropped, including on panic.
pub struct RunGuard {
    flag: Arc<AtomicBool>,
}

impl Drop for RunGuard {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::SeqCst);
    }
}
