use std::sync::atomic::{AtomicU64, Ordering};

/// Admits one holder at a time. Callers that find it taken are turned away
/// rather than queued.
///
/// Every acquisition gets a fresh token, and a guard only clears the gate if
/// its token is still the current one. That way, if the gate is forcibly
/// released (by a stop) and someone else acquires it, the old guard going
/// out of scope won't let a third party in.
#[derive(Debug, Default)]
pub(crate) struct BusyGate {
    owner: AtomicU64,
    next: AtomicU64,
}

#[must_use]
#[derive(Debug)]
pub(crate) struct GateGuard<'a> {
    gate: &'a BusyGate,
    token: u64,
}

impl BusyGate {
    pub fn try_acquire(&self) -> Option<GateGuard<'_>> {
        // Zero means "free", so tokens start at one.
        let token = self.next.fetch_add(1, Ordering::Relaxed).wrapping_add(1).max(1);
        self.owner
            .compare_exchange(0, token, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| GateGuard { gate: self, token })
    }

    pub fn is_held(&self) -> bool {
        self.owner.load(Ordering::Acquire) != 0
    }

    pub fn force_release(&self) {
        self.owner.store(0, Ordering::Release);
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        let _ = self
            .gate
            .owner
            .compare_exchange(self.token, 0, Ordering::AcqRel, Ordering::Acquire);
    }
}
