//! Event collector for testing.
//!
//! [`ProcessEventCollector`] is a listener that records every notification as
//! a [`ProcessEvent`] for later inspection and assertion.
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use view_flow::{EventKind, ProcessEventCollector};
//!
//! let collector = Arc::new(ProcessEventCollector::new());
//! process.attach(collector.clone())?;
//!
//! assert!(collector.wait_for(Duration::from_secs(5), |events| {
//!     events.iter().any(|e| e.kind() == EventKind::CycleCompleted)
//! }));
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use parking_lot::{Condvar, Mutex};

use crate::compiled::{CompiledViewDefinition, UserPrincipal};
use crate::cycle::{CycleId, CycleMetadata};
use crate::error::EngineError;
use crate::listener::ProcessListener;
use crate::result::{ComputationResult, DeltaResult};

/// An owned copy of one listener notification.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// See [`ProcessListener::view_definition_compiled`].
    ViewDefinitionCompiled {
        /// The compiled definition.
        compiled: Arc<CompiledViewDefinition>,
        /// Permission flag for the listener's user.
        has_market_data_permissions: bool,
    },
    /// See [`ProcessListener::view_definition_compilation_failed`].
    ViewDefinitionCompilationFailed {
        /// Valuation time compiled for.
        valuation_time: SystemTime,
        /// The failure.
        error: EngineError,
    },
    /// See [`ProcessListener::cycle_started`].
    CycleStarted {
        /// Cycle metadata.
        metadata: CycleMetadata,
    },
    /// See [`ProcessListener::cycle_fragment_completed`].
    CycleFragmentCompleted {
        /// The partial result.
        fragment: ComputationResult,
        /// Changes relative to the latest full result.
        delta: Option<DeltaResult>,
    },
    /// See [`ProcessListener::cycle_completed`].
    CycleCompleted {
        /// The full result.
        result: Arc<ComputationResult>,
        /// Changes relative to the previous full result.
        delta: Option<DeltaResult>,
    },
    /// See [`ProcessListener::cycle_execution_failed`].
    CycleExecutionFailed {
        /// The failed cycle.
        cycle_id: CycleId,
        /// The failure.
        error: EngineError,
    },
    /// See [`ProcessListener::process_completed`].
    ProcessCompleted,
    /// See [`ProcessListener::process_terminated`].
    ProcessTerminated {
        /// Whether a worker was running at shutdown.
        execution_interrupted: bool,
    },
}

/// Discriminant of a [`ProcessEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// [`ProcessEvent::ViewDefinitionCompiled`].
    ViewDefinitionCompiled,
    /// [`ProcessEvent::ViewDefinitionCompilationFailed`].
    ViewDefinitionCompilationFailed,
    /// [`ProcessEvent::CycleStarted`].
    CycleStarted,
    /// [`ProcessEvent::CycleFragmentCompleted`].
    CycleFragmentCompleted,
    /// [`ProcessEvent::CycleCompleted`].
    CycleCompleted,
    /// [`ProcessEvent::CycleExecutionFailed`].
    CycleExecutionFailed,
    /// [`ProcessEvent::ProcessCompleted`].
    ProcessCompleted,
    /// [`ProcessEvent::ProcessTerminated`].
    ProcessTerminated,
}

impl ProcessEvent {
    /// Discriminant of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            ProcessEvent::ViewDefinitionCompiled { .. } => EventKind::ViewDefinitionCompiled,
            ProcessEvent::ViewDefinitionCompilationFailed { .. } => {
                EventKind::ViewDefinitionCompilationFailed
            }
            ProcessEvent::CycleStarted { .. } => EventKind::CycleStarted,
            ProcessEvent::CycleFragmentCompleted { .. } => EventKind::CycleFragmentCompleted,
            ProcessEvent::CycleCompleted { .. } => EventKind::CycleCompleted,
            ProcessEvent::CycleExecutionFailed { .. } => EventKind::CycleExecutionFailed,
            ProcessEvent::ProcessCompleted => EventKind::ProcessCompleted,
            ProcessEvent::ProcessTerminated { .. } => EventKind::ProcessTerminated,
        }
    }

    /// Replay this event to `listener`.
    pub fn deliver(&self, listener: &dyn ProcessListener) {
        match self {
            ProcessEvent::ViewDefinitionCompiled {
                compiled,
                has_market_data_permissions,
            } => listener.view_definition_compiled(compiled, *has_market_data_permissions),
            ProcessEvent::ViewDefinitionCompilationFailed {
                valuation_time,
                error,
            } => listener.view_definition_compilation_failed(*valuation_time, error),
            ProcessEvent::CycleStarted { metadata } => listener.cycle_started(metadata),
            ProcessEvent::CycleFragmentCompleted { fragment, delta } => {
                listener.cycle_fragment_completed(fragment, delta.as_ref())
            }
            ProcessEvent::CycleCompleted { result, delta } => {
                listener.cycle_completed(result, delta.as_ref())
            }
            ProcessEvent::CycleExecutionFailed { cycle_id, error } => {
                listener.cycle_execution_failed(*cycle_id, error)
            }
            ProcessEvent::ProcessCompleted => listener.process_completed(),
            ProcessEvent::ProcessTerminated {
                execution_interrupted,
            } => listener.process_terminated(*execution_interrupted),
        }
    }
}

/// Listener that accumulates events for assertions.
#[derive(Debug, Default)]
pub struct ProcessEventCollector {
    user: Option<UserPrincipal>,
    events: Mutex<Vec<ProcessEvent>>,
    recorded: Condvar,
}

impl ProcessEventCollector {
    /// Create a new empty event collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a collector receiving results on behalf of `user`.
    pub fn for_user(user: UserPrincipal) -> Self {
        Self {
            user: Some(user),
            ..Self::default()
        }
    }

    /// Get collected events as a vector.
    pub fn events(&self) -> Vec<ProcessEvent> {
        self.events.lock().clone()
    }

    /// Kinds of the collected events, in order.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(ProcessEvent::kind).collect()
    }

    /// Number of collected events of `kind`.
    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind() == kind).count()
    }

    /// Clear all collected events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    /// Take collected events, clearing the collector.
    pub fn take(&self) -> Vec<ProcessEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Get the number of collected events.
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Check if no events have been collected.
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }

    /// Block until `done` holds for the collected events or `timeout` passes.
    /// Returns whether `done` held.
    pub fn wait_for(&self, timeout: Duration, done: impl Fn(&[ProcessEvent]) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        let mut events = self.events.lock();
        while !done(&events) {
            if self.recorded.wait_until(&mut events, deadline).timed_out() {
                return done(&events);
            }
        }
        true
    }

    /// Block until at least `count` events of `kind` were collected.
    pub fn wait_for_count(&self, kind: EventKind, count: usize, timeout: Duration) -> bool {
        self.wait_for(timeout, |events| {
            events.iter().filter(|e| e.kind() == kind).count() >= count
        })
    }

    fn record(&self, event: ProcessEvent) {
        self.events.lock().push(event);
        self.recorded.notify_all();
    }
}

impl ProcessListener for ProcessEventCollector {
    fn user(&self) -> Option<&UserPrincipal> {
        self.user.as_ref()
    }

    fn view_definition_compiled(
        &self,
        compiled: &Arc<CompiledViewDefinition>,
        has_market_data_permissions: bool,
    ) {
        self.record(ProcessEvent::ViewDefinitionCompiled {
            compiled: compiled.clone(),
            has_market_data_permissions,
        });
    }

    fn view_definition_compilation_failed(&self, valuation_time: SystemTime, error: &EngineError) {
        self.record(ProcessEvent::ViewDefinitionCompilationFailed {
            valuation_time,
            error: error.clone(),
        });
    }

    fn cycle_started(&self, metadata: &CycleMetadata) {
        self.record(ProcessEvent::CycleStarted {
            metadata: metadata.clone(),
        });
    }

    fn cycle_fragment_completed(&self, fragment: &ComputationResult, delta: Option<&DeltaResult>) {
        self.record(ProcessEvent::CycleFragmentCompleted {
            fragment: fragment.clone(),
            delta: delta.cloned(),
        });
    }

    fn cycle_completed(&self, result: &Arc<ComputationResult>, delta: Option<&DeltaResult>) {
        self.record(ProcessEvent::CycleCompleted {
            result: result.clone(),
            delta: delta.cloned(),
        });
    }

    fn cycle_execution_failed(&self, cycle: CycleId, error: &EngineError) {
        self.record(ProcessEvent::CycleExecutionFailed {
            cycle_id: cycle,
            error: error.clone(),
        });
    }

    fn process_completed(&self) {
        self.record(ProcessEvent::ProcessCompleted);
    }

    fn process_terminated(&self, execution_interrupted: bool) {
        self.record(ProcessEvent::ProcessTerminated {
            execution_interrupted,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn test_collector_basic() {
        let collector = ProcessEventCollector::new();
        assert!(collector.is_empty());

        collector.process_completed();
        collector.process_terminated(false);

        assert_eq!(collector.len(), 2);
        assert_eq!(
            collector.kinds(),
            [EventKind::ProcessCompleted, EventKind::ProcessTerminated]
        );
        assert_eq!(collector.count(EventKind::ProcessTerminated), 1);
    }

    #[test]
    fn test_collector_take() {
        let collector = ProcessEventCollector::new();
        collector.process_completed();

        let events = collector.take();
        assert_eq!(events.len(), 1);
        assert!(collector.is_empty());
    }

    #[test]
    fn test_collector_clear() {
        let collector = ProcessEventCollector::new();
        collector.process_terminated(true);
        collector.clear();
        assert_eq!(collector.len(), 0);
    }

    #[test]
    fn test_deliver_replays_into_another_listener() {
        let source = ProcessEventCollector::new();
        source.process_completed();
        source.process_terminated(true);

        let copy = ProcessEventCollector::new();
        for event in source.events() {
            event.deliver(&copy);
        }
        assert_eq!(copy.kinds(), source.kinds());
        assert!(matches!(
            copy.events()[1],
            ProcessEvent::ProcessTerminated {
                execution_interrupted: true
            }
        ));
    }

    #[test]
    fn test_wait_for_wakes_on_record() {
        let collector = Arc::new(ProcessEventCollector::new());
        let producer = {
            let collector = collector.clone();
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                collector.process_completed();
            })
        };
        assert!(collector.wait_for_count(EventKind::ProcessCompleted, 1, Duration::from_secs(5)));
        producer.join().unwrap();
        assert!(!collector.wait_for_count(EventKind::ProcessCompleted, 2, Duration::from_millis(10)));
    }

    #[test]
    fn test_user_is_reported() {
        let collector = ProcessEventCollector::for_user(UserPrincipal::new("alice"));
        assert_eq!(collector.user().map(|u| u.user_name.as_str()), Some("alice"));
        assert!(ProcessEventCollector::new().user().is_none());
    }
}
