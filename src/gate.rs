//! Binary semaphore guarding process state transitions.
//!
//! Unlike a mutex, the gate is not owned by a thread: it can be acquired on one
//! thread and released on another. `suspend` relies on this to hold the gate
//! across calls.

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
pub(crate) struct Gate {
    held: Mutex<bool>,
    released: Condvar,
}

impl Gate {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Block until the gate is free, then take it.
    pub(crate) fn acquire(&self) {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
    }

    /// Take the gate if it is free.
    #[cfg(test)]
    pub(crate) fn try_acquire(&self) -> bool {
        let mut held = self.held.lock();
        if *held {
            false
        } else {
            *held = true;
            true
        }
    }

    /// Free the gate. May be called from any thread.
    pub(crate) fn release(&self) {
        let mut held = self.held.lock();
        debug_assert!(*held, "released a gate that was not held");
        *held = false;
        drop(held);
        self.released.notify_one();
    }

    /// Acquire the gate for the lifetime of the returned guard.
    pub(crate) fn enter(&self) -> GateGuard<'_> {
        self.acquire();
        GateGuard { gate: self }
    }

    /// Guard for a gate the caller already holds, e.g. one kept by
    /// [`GateGuard::hold`] on another thread.
    pub(crate) fn adopt(&self) -> GateGuard<'_> {
        debug_assert!(*self.held.lock(), "adopted a gate that was not held");
        GateGuard { gate: self }
    }
}

/// Releases the gate on drop.
#[must_use = "the gate is released as soon as the guard is dropped"]
pub(crate) struct GateGuard<'a> {
    gate: &'a Gate,
}

impl GateGuard<'_> {
    /// Keep the gate held after the guard is gone. Someone must later
    /// [`adopt`](Gate::adopt) or [`release`](Gate::release) it.
    pub(crate) fn hold(self) {
        std::mem::forget(self);
    }
}

impl Drop for GateGuard<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}
