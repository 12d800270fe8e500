//! Coarse coordination between metadata recomputation and maintenance passes.
//!
//! Transactions are serialized by the backend; this lock is separate. A metadata
//! recomputation scans and repairs whole folder prefixes and must not observe a
//! maintenance pass halfway through rewriting those same prefixes.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

/// Reader/writer lock shared by every handle onto one database.
#[derive(Clone, Default)]
pub struct GcLock {
    inner: Arc<RwLock<LockState>>,
}

#[derive(Default, Debug)]
struct LockState {
    passes: u64,
}

/// Held by a metadata recomputation for the duration of its scan and repair.
pub struct RecalcGuard<'a> {
    _guard: RwLockReadGuard<'a, LockState>,
}

/// Held by a maintenance pass; excludes every recomputation.
pub struct MaintenanceGuard<'a> {
    guard: RwLockWriteGuard<'a, LockState>,
}

/// Counters for observability.
#[derive(Default, Debug, Clone, Copy, PartialEq, Eq)]
pub struct GcLockSnapshot {
    /// Completed maintenance passes.
    pub passes: u64,
    /// Whether a maintenance pass currently holds the lock.
    pub maintenance_active: bool,
}

impl GcLock {
    /// Creates an unlocked instance.
    pub fn new() -> Self {
        Self::default()
    }

    /// Shared acquisition; any number of recomputations may run together.
    pub fn recalc(&self) -> RecalcGuard<'_> {
        RecalcGuard {
            _guard: self.inner.read(),
        }
    }

    /// Exclusive acquisition, blocking until in-flight recomputations finish.
    pub fn maintenance(&self) -> MaintenanceGuard<'_> {
        MaintenanceGuard {
            guard: self.inner.write(),
        }
    }

    /// Non-blocking variant of [`GcLock::maintenance`].
    pub fn try_maintenance(&self) -> Option<MaintenanceGuard<'_>> {
        self.inner.try_write().map(|guard| MaintenanceGuard { guard })
    }

    /// Returns a snapshot of the lock counters.
    pub fn snapshot(&self) -> GcLockSnapshot {
        match self.inner.try_read() {
            Some(state) => GcLockSnapshot {
                passes: state.passes,
                maintenance_active: false,
            },
            None => GcLockSnapshot {
                passes: 0,
                maintenance_active: true,
            },
        }
    }
}

impl MaintenanceGuard<'_> {
    /// Records a completed pass before the guard is released.
    pub fn finish(mut self) {
        self.guard.passes += 1;
    }
}
