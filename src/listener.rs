//! Listener trait for observing a view process, and the fan-out that calls it.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use view_flow::{ComputationResult, DeltaResult, ProcessListener};
//!
//! struct PrintChanges;
//!
//! impl ProcessListener for PrintChanges {
//!     fn cycle_completed(&self, _result: &Arc<ComputationResult>, delta: Option<&DeltaResult>) {
//!         if let Some(delta) = delta {
//!             println!("{} values changed", delta.results.len());
//!         }
//!     }
//! }
//!
//! process.attach(Arc::new(PrintChanges))?;
//! ```

use std::any::Any;
use std::cell::Cell;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, ReentrantMutex};

use crate::compiled::{CompiledViewDefinition, UserPrincipal};
use crate::cycle::{CycleId, CycleMetadata, ProcessId};
use crate::error::EngineError;
use crate::result::{ComputationResult, DeltaResult};

/// Receives notifications from a [`ViewProcess`](crate::ViewProcess).
///
/// All methods have default empty implementations, so you only need to
/// override the events you're interested in.
///
/// # Delivery
///
/// Notifications for one listener arrive in the order the process produced
/// them, one at a time. There is no ordering across listeners. Callbacks run
/// without any process lock held, so they may call back into the process. A
/// panic in a callback is caught and logged; it does not reach the process or
/// other listeners.
pub trait ProcessListener: Send + Sync + 'static {
    /// User on whose behalf results are received, for market-data permission
    /// checks. `None` means always permitted.
    fn user(&self) -> Option<&UserPrincipal> {
        None
    }

    /// The view definition was compiled. `has_market_data_permissions` says
    /// whether [`user`](Self::user) may see the live data it reads; it is
    /// advisory only.
    #[inline]
    fn view_definition_compiled(
        &self,
        _compiled: &Arc<CompiledViewDefinition>,
        _has_market_data_permissions: bool,
    ) {
    }

    /// Compilation failed. The process keeps running and retries.
    #[inline]
    fn view_definition_compilation_failed(&self, _valuation_time: SystemTime, _error: &EngineError) {}

    /// A cycle started.
    #[inline]
    fn cycle_started(&self, _metadata: &CycleMetadata) {}

    /// Part of a running cycle's values is ready. `delta` is relative to the
    /// latest full result.
    #[inline]
    fn cycle_fragment_completed(&self, _fragment: &ComputationResult, _delta: Option<&DeltaResult>) {}

    /// A cycle finished. `delta` is `None` when there is nothing to compare
    /// against, including when replaying the latest result to a new listener.
    #[inline]
    fn cycle_completed(&self, _result: &Arc<ComputationResult>, _delta: Option<&DeltaResult>) {}

    /// A cycle failed. The process keeps running.
    #[inline]
    fn cycle_execution_failed(&self, _cycle: CycleId, _error: &EngineError) {}

    /// A finite execution sequence was exhausted.
    #[inline]
    fn process_completed(&self) {}

    /// The process was shut down. Sent once per listener attached at the time.
    #[inline]
    fn process_terminated(&self, _execution_interrupted: bool) {}
}

/// Returns true if `a` and `b` point at the same listener object, whatever
/// type they are viewed through.
pub(crate) fn same_listener<A: ?Sized, B: ?Sized>(a: &Arc<A>, b: &Arc<B>) -> bool {
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// A notification waiting to be delivered to one listener.
type Notification = Box<dyn FnOnce(&dyn ProcessListener) + Send>;

/// An attached listener, its pending notifications, and the lock held by
/// whoever is delivering them.
///
/// Notifications are queued inside the process gate, so the queue holds them
/// in the order the process produced them. The thread holding the delivery
/// lock drains the queue; a drain started from inside one of this listener's
/// callbacks only leaves its notifications queued for the outer drain.
pub(crate) struct ListenerSlot {
    listener: Arc<dyn ProcessListener>,
    pending: Mutex<VecDeque<(&'static str, Notification)>>,
    /// Set while the holding thread is inside the drain loop.
    delivery: ReentrantMutex<Cell<bool>>,
}

impl ListenerSlot {
    pub(crate) fn new(listener: Arc<dyn ProcessListener>) -> Self {
        Self {
            listener,
            pending: Mutex::new(VecDeque::new()),
            delivery: ReentrantMutex::new(Cell::new(false)),
        }
    }

    pub(crate) fn is<L: ?Sized>(&self, listener: &Arc<L>) -> bool {
        same_listener(&self.listener, listener)
    }

    /// Queue a notification. Must be called inside the process gate.
    pub(crate) fn enqueue(
        &self,
        event: &'static str,
        notify: impl FnOnce(&dyn ProcessListener) + Send + 'static,
    ) {
        self.pending.lock().push_back((event, Box::new(notify)));
    }

    /// Deliver everything queued, in order, catching and logging panics.
    ///
    /// Blocks while another thread is delivering to this listener; that thread
    /// delivers what was queued before it finishes. Returns at once when called
    /// from inside one of this listener's callbacks.
    pub(crate) fn drain(&self, process: ProcessId) {
        let draining = self.delivery.lock();
        if draining.get() {
            return;
        }
        draining.set(true);
        loop {
            let next = self.pending.lock().pop_front();
            let Some((event, notify)) = next else {
                break;
            };
            let listener = self.listener.as_ref();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| notify(listener))) {
                tracing::error!(
                    %process,
                    event,
                    panic = panic_message(panic.as_ref()),
                    "listener panicked"
                );
            }
        }
        draining.set(false);
    }
}

/// Queue the same notification for each listener in `slots`. Must be called
/// inside the process gate.
pub(crate) fn publish(
    slots: &[Arc<ListenerSlot>],
    event: &'static str,
    notify: impl Fn(&dyn ProcessListener) + Send + Sync + 'static,
) {
    let notify = Arc::new(notify);
    for slot in slots {
        let notify = notify.clone();
        slot.enqueue(event, move |l| notify(l));
    }
}

/// Deliver what is queued for each listener in `slots`, in order.
pub(crate) fn drain(process: ProcessId, slots: &[Arc<ListenerSlot>]) {
    for slot in slots {
        slot.drain(process);
    }
}

pub(crate) fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(message) = panic.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message
    } else {
        "<non-string panic payload>"
    }
}
