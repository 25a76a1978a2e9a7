//! Process-local "one at a time" guard

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const IDLE: u64 = 0;

/// Rejects a second run while one is active.
///
/// Acquiring is a single compare-and-swap; the returned [`RunPermit`] releases
/// the guard when dropped, including when the run panics or its future is
/// dropped.
#[derive(Debug, Clone, Default)]
pub struct RunGuard {
    inner: Arc<GuardState>,
}

#[derive(Debug, Default)]
struct GuardState {
    /// Token of the active run, or `IDLE`
    active: AtomicU64,
    next_token: AtomicU64,
}

#[derive(Debug)]
#[must_use = "the guard is released as soon as the permit is dropped"]
pub struct RunPermit {
    inner: Arc<GuardState>,
    token: u64,
}

impl RunGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// `None` if a run is already active.
    pub fn try_acquire(&self) -> Option<RunPermit> {
        let token = self.inner.next_token.fetch_add(1, Ordering::Relaxed) + 1;
        self.inner
            .active
            .compare_exchange(IDLE, token, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunPermit { inner: Arc::clone(&self.inner), token })
    }

    pub fn is_busy(&self) -> bool {
        self.inner.active.load(Ordering::Acquire) != IDLE
    }

    /// Clear a flag left set by a stuck run. Returns whether it was set.
    ///
    /// The stuck run keeps going if it is still alive; this only lets a new
    /// one start. Its permit no longer releases anything when dropped.
    pub fn force_release(&self) -> bool {
        self.inner.active.swap(IDLE, Ordering::AcqRel) != IDLE
    }
}

impl Drop for RunPermit {
    fn drop(&mut self) {
        // Only clear the guard if it still belongs to this run
        let _ = self.inner.active.compare_exchange(
            self.token,
            IDLE,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }
}
