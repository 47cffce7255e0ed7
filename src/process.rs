//! The view process: lifecycle controller for one continuously computed view.
//!
//! A process runs cycles of a view definition while at least one listener is
//! attached, and fans out every compiled definition, full result and delta to
//! those listeners.
//!
//! # Locking
//!
//! All state transitions, changes to the listener set, worker start/stop and
//! swaps of the latest compilation and result happen inside a [`Gate`]. The
//! gate is never held while a listener is called: notifications are queued on
//! each listener inside the gate, in the order they happen, and delivered from
//! those queues after the gate is left.

use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

use parking_lot::{Mutex, MutexGuard};
use slab::Slab;

use crate::compiled::{
    CompilationOutput, CompiledViewDefinition, ViewDefinition, ViewDefinitionId,
    ViewDefinitionResolver,
};
use crate::cycle::{CycleId, CycleMetadata, CycleSequence, ProcessId};
use crate::delta::{compute_delta, DeltaDefinition};
use crate::engine::GraphEngine;
use crate::error::{EngineError, ProcessError};
use crate::gate::{Gate, GateGuard};
use crate::latest::Latest;
use crate::listener::{drain, publish, ListenerSlot, ProcessListener};
use crate::log::{ExecutionLogMode, ExecutionLogModeSource};
use crate::options::ExecutionOptions;
use crate::result::{ComputationResult, DeltaResult};
use crate::value::ValueSpecification;
use crate::worker::{ThreadWorkerFactory, Worker, WorkerContext, WorkerFactory, WorkerToken};

/// Lifecycle state of a [`ViewProcess`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ProcessState {
    /// No listeners, no worker.
    Stopped,
    /// Listeners attached and a worker running cycles.
    Running,
    /// A finite execution sequence was exhausted. Listeners may still attach
    /// and receive the final results.
    Finished,
    /// Shut down for good.
    Terminated,
}

/// Handle to a view process.
///
/// This is cheap to clone - all data is behind `Arc`.
///
/// # Example
///
/// ```ignore
/// let process = ViewProcess::builder(ViewDefinitionId::new("Equities"), engine)
///     .options(ExecutionOptions::realtime(Duration::from_secs(5)))
///     .delta_definition(DeltaDefinition::new().with_number_comparer(6))
///     .build();
///
/// process.attach(listener.clone())?;   // starts the worker
/// process.detach(&listener)?;          // stops it again
/// process.shutdown();
/// ```
#[derive(Clone)]
pub struct ViewProcess {
    shared: Arc<ProcessShared>,
}

/// State shared between process handles and the process's workers.
pub(crate) struct ProcessShared {
    id: ProcessId,
    definition_id: ViewDefinitionId,
    options: Arc<ExecutionOptions>,
    engine: Arc<dyn GraphEngine>,
    worker_factory: Arc<dyn WorkerFactory>,
    resolver: Option<Arc<dyn ViewDefinitionResolver>>,
    delta_definition: DeltaDefinition,
    full_delta_on_first_cycle: bool,
    gate: Gate,
    /// Only changed with the gate held. The mutex lets introspection read it
    /// while a suspension keeps the gate.
    core: Mutex<ProcessCore>,
    compilation: Latest<CompilationOutput>,
    latest_result: Latest<Arc<ComputationResult>>,
    cycles: CycleSequence,
    log_modes: Arc<ExecutionLogModeSource>,
}

struct ProcessCore {
    state: ProcessState,
    listeners: Slab<Arc<ListenerSlot>>,
    worker: Option<RunningWorker>,
    next_worker: u64,
    suspended: bool,
}

struct RunningWorker {
    token: WorkerToken,
    handle: Box<dyn Worker>,
}

impl ProcessCore {
    fn position<L: ?Sized>(&self, listener: &Arc<L>) -> Option<usize> {
        self.listeners
            .iter()
            .find(|(_, slot)| slot.is(listener))
            .map(|(key, _)| key)
    }

    fn snapshot(&self) -> Vec<Arc<ListenerSlot>> {
        self.listeners.iter().map(|(_, slot)| slot.clone()).collect()
    }

    fn owns(&self, worker: WorkerToken) -> bool {
        self.worker.as_ref().is_some_and(|w| w.token == worker)
    }

    /// Terminate and disown the current worker. Returns whether there was one.
    fn stop_worker(&mut self) -> bool {
        match self.worker.take() {
            Some(worker) => {
                worker.handle.terminate();
                true
            }
            None => false,
        }
    }
}

impl ViewProcess {
    /// Create a builder for a process computing `definition_id` with `engine`.
    pub fn builder(definition_id: ViewDefinitionId, engine: Arc<dyn GraphEngine>) -> ViewProcessBuilder {
        ViewProcessBuilder::new(definition_id, engine)
    }

    /// Unique id of this process.
    pub fn id(&self) -> ProcessId {
        self.shared.id
    }

    /// The view definition this process computes.
    pub fn definition_id(&self) -> &ViewDefinitionId {
        &self.shared.definition_id
    }

    /// Execution options the process was built with.
    pub fn options(&self) -> &ExecutionOptions {
        &self.shared.options
    }

    /// What counts as a change between cycles.
    pub fn delta_definition(&self) -> &DeltaDefinition {
        &self.shared.delta_definition
    }

    /// Current lifecycle state.
    pub fn state(&self) -> ProcessState {
        self.shared.core.lock().state
    }

    /// Number of attached listeners.
    pub fn listener_count(&self) -> usize {
        self.shared.core.lock().listeners.len()
    }

    /// Whether the process is suspended.
    pub fn is_suspended(&self) -> bool {
        self.shared.core.lock().suspended
    }

    /// The latest full result, if a cycle has completed.
    pub fn latest_result(&self) -> Option<Arc<ComputationResult>> {
        self.shared.latest_result.get()
    }

    /// The latest compiled definition, if compilation has succeeded.
    pub fn latest_compiled(&self) -> Option<Arc<CompiledViewDefinition>> {
        self.shared.latest_compilation().map(|c| c.compiled)
    }

    /// The current version of the view definition, through the resolver.
    pub fn latest_view_definition(&self) -> Option<ViewDefinition> {
        self.shared
            .resolver
            .as_ref()?
            .latest(&self.shared.definition_id)
    }

    /// Effective log mode for `value`.
    pub fn log_mode(&self, value: &ValueSpecification) -> ExecutionLogMode {
        self.shared.log_modes.mode(value)
    }

    /// Attach a listener.
    ///
    /// Attaching the same listener twice is a no-op. The first listener starts
    /// the worker; if that fails the listener is not attached and the error is
    /// returned. A listener joining a running or finished process is first
    /// sent, before this returns, the latest compiled definition and the
    /// latest result (with no delta), followed by `process_completed` if the
    /// process has finished. Live notifications for it only start after that.
    pub fn attach(&self, listener: Arc<dyn ProcessListener>) -> Result<(), ProcessError> {
        let gate = self.shared.gate.enter();
        let mut core = self.shared.core.lock();
        if core.state == ProcessState::Terminated {
            return Err(ProcessError::Terminated);
        }
        if core.position(&listener).is_some() {
            return Ok(());
        }

        let slot = Arc::new(ListenerSlot::new(listener));
        let key = core.listeners.insert(slot.clone());
        if core.state == ProcessState::Stopped {
            if let Err(error) = self.start_worker(&mut core) {
                core.listeners.remove(key);
                tracing::error!(process = %self.id(), %error, "failed to start computation worker");
                return Err(error);
            }
            tracing::debug!(process = %self.id(), "first listener attached, process running");
            return Ok(());
        }

        if let Some(compilation) = self.shared.compilation.get() {
            slot.enqueue("view_definition_compiled", move |l| {
                let permitted = compilation.has_market_data_permissions(l.user());
                l.view_definition_compiled(&compilation.compiled, permitted)
            });
        }
        if let Some(latest) = self.shared.latest_result.get() {
            slot.enqueue("cycle_completed", move |l| l.cycle_completed(&latest, None));
        }
        if core.state == ProcessState::Finished {
            slot.enqueue("process_completed", |l| l.process_completed());
        }
        drop(core);
        drop(gate);

        slot.drain(self.id());
        Ok(())
    }

    /// Detach a listener. Detaching a listener that is not attached is a
    /// no-op. Detaching the last listener stops the worker.
    pub fn detach<L: ProcessListener + ?Sized>(&self, listener: &Arc<L>) -> Result<(), ProcessError> {
        let _gate = self.shared.gate.enter();
        let mut core = self.shared.core.lock();
        if core.state == ProcessState::Terminated {
            return Err(ProcessError::Terminated);
        }
        if let Some(key) = core.position(listener) {
            core.listeners.remove(key);
        }
        if core.listeners.is_empty() && core.state == ProcessState::Running {
            core.stop_worker();
            core.state = ProcessState::Stopped;
            tracing::debug!(process = %self.id(), "last listener detached, process stopped");
        }
        Ok(())
    }

    /// Shut the process down for good.
    ///
    /// The worker is terminated without waiting for it and every attached
    /// listener is told once. Calling this again does nothing. A suspended
    /// process is shut down without waiting for `resume`.
    pub fn shutdown(&self) {
        let _gate = if self.take_over_suspension() {
            self.shared.gate.adopt()
        } else {
            self.shared.gate.enter()
        };
        let mut core = self.shared.core.lock();
        if core.state == ProcessState::Terminated {
            return;
        }
        let interrupted = core.stop_worker();
        core.state = ProcessState::Terminated;
        let slots: Vec<_> = core.listeners.drain().collect();
        publish(&slots, "process_terminated", move |l| {
            l.process_terminated(interrupted)
        });
        drop(core);
        drop(_gate);

        tracing::debug!(process = %self.id(), interrupted, "process terminated");
        drain(self.id(), &slots);
    }

    /// Suspend the process: terminate the worker and keep every other
    /// lifecycle operation waiting until [`resume`](Self::resume), which may be
    /// called from any thread.
    pub fn suspend(&self) -> Result<(), ProcessError> {
        if self.shared.core.lock().suspended {
            return Err(ProcessError::AlreadySuspended);
        }
        let gate = self.shared.gate.enter();
        let mut core = self.shared.core.lock();
        if core.state == ProcessState::Terminated {
            return Err(ProcessError::Terminated);
        }
        core.stop_worker();
        core.suspended = true;
        drop(core);
        gate.hold();
        tracing::debug!(process = %self.id(), "process suspended");
        Ok(())
    }

    /// Resume a suspended process, starting a fresh worker if listeners are
    /// attached.
    pub fn resume(&self) -> Result<(), ProcessError> {
        let mut core = self.shared.core.lock();
        if !core.suspended {
            return Err(ProcessError::NotSuspended);
        }
        core.suspended = false;
        let _gate = self.shared.gate.adopt();

        if core.state != ProcessState::Running || core.listeners.is_empty() {
            tracing::debug!(process = %self.id(), "process resumed");
            return Ok(());
        }
        match self.start_worker(&mut core) {
            Ok(()) => {
                tracing::debug!(process = %self.id(), "process resumed, worker restarted");
                Ok(())
            }
            Err(error) => {
                core.state = ProcessState::Stopped;
                tracing::error!(process = %self.id(), %error, "failed to restart computation worker");
                Err(error)
            }
        }
    }

    /// Ask the current worker to run a cycle now. No-op without a worker.
    pub fn trigger_cycle(&self) {
        if let Some(worker) = &self.shared.core.lock().worker {
            worker.handle.trigger_cycle();
        }
    }

    /// Ask the current worker to recompile before its next cycle. No-op
    /// without a worker.
    pub fn force_graph_rebuild(&self) {
        if let Some(worker) = &self.shared.core.lock().worker {
            worker.handle.force_graph_rebuild();
        }
    }

    /// Log `values` in full detail until a matching
    /// [`restore_log_verbosity`](Self::restore_log_verbosity).
    pub fn elevate_log_verbosity<'a>(&self, values: impl IntoIterator<Item = &'a ValueSpecification>) {
        self.shared.log_modes.elevate(values);
    }

    /// Undo one [`elevate_log_verbosity`](Self::elevate_log_verbosity).
    pub fn restore_log_verbosity<'a>(&self, values: impl IntoIterator<Item = &'a ValueSpecification>) {
        self.shared.log_modes.restore(values);
    }

    /// Start a worker. Must be called inside the gate.
    fn start_worker(&self, core: &mut ProcessCore) -> Result<(), ProcessError> {
        if core.worker.is_some() {
            return Err(ProcessError::AlreadyRunning);
        }
        let token = WorkerToken(core.next_worker);
        core.next_worker += 1;
        let handle = self.shared.worker_factory.start(self.worker_context(token))?;
        core.worker = Some(RunningWorker { token, handle });
        core.state = ProcessState::Running;
        Ok(())
    }

    fn worker_context(&self, token: WorkerToken) -> WorkerContext {
        let shared = &self.shared;
        WorkerContext {
            process: Arc::downgrade(shared),
            token,
            process_id: shared.id,
            definition_id: shared.definition_id.clone(),
            options: shared.options.clone(),
            engine: shared.engine.clone(),
            log_modes: shared.log_modes.clone(),
        }
    }

    /// If the process is suspended, end the suspension and take over the gate
    /// it holds.
    fn take_over_suspension(&self) -> bool {
        std::mem::take(&mut self.shared.core.lock().suspended)
    }
}

impl fmt::Debug for ViewProcess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let core = self.shared.core.lock();
        f.debug_struct("ViewProcess")
            .field("id", &self.shared.id)
            .field("definition_id", &self.shared.definition_id)
            .field("state", &core.state)
            .field("listeners", &core.listeners.len())
            .field("suspended", &core.suspended)
            .finish_non_exhaustive()
    }
}

impl Drop for ProcessShared {
    fn drop(&mut self) {
        // Wakes a worker parked waiting for a trigger.
        self.core.get_mut().stop_worker();
    }
}

// ============================================================================
// Worker intake
// ============================================================================

impl ProcessShared {
    pub(crate) fn latest_compilation(&self) -> Option<CompilationOutput> {
        self.compilation.get()
    }

    pub(crate) fn next_cycle_id(&self) -> CycleId {
        self.cycles.next_id()
    }

    /// Enter the gate on behalf of `worker`. Returns `None`, having left the
    /// gate again, if the process no longer owns that worker.
    fn admit(
        &self,
        worker: WorkerToken,
        event: &'static str,
    ) -> Option<(GateGuard<'_>, MutexGuard<'_, ProcessCore>)> {
        let gate = self.gate.enter();
        let core = self.core.lock();
        if core.owns(worker) {
            Some((gate, core))
        } else {
            tracing::debug!(process = %self.id, token = worker.0, event, "discarding event from disowned worker");
            None
        }
    }

    /// Delta of `current` against the latest full result.
    fn delta_against_latest(&self, current: &ComputationResult) -> Option<DeltaResult> {
        match self.latest_result.get() {
            Some(previous) => Some(compute_delta(&self.delta_definition, Some(&previous), current)),
            None if self.full_delta_on_first_cycle => {
                Some(compute_delta(&self.delta_definition, None, current))
            }
            None => None,
        }
    }

    pub(crate) fn on_compilation_completed(&self, worker: WorkerToken, output: CompilationOutput) -> bool {
        let Some((gate, core)) = self.admit(worker, "view_definition_compiled") else {
            return false;
        };
        self.compilation.set(output.clone());
        let slots = core.snapshot();
        publish(&slots, "view_definition_compiled", move |l| {
            let permitted = output.has_market_data_permissions(l.user());
            l.view_definition_compiled(&output.compiled, permitted)
        });
        drop(core);
        drop(gate);

        drain(self.id, &slots);
        true
    }

    pub(crate) fn on_compilation_failed(
        &self,
        worker: WorkerToken,
        valuation_time: SystemTime,
        error: EngineError,
    ) -> bool {
        let Some((gate, core)) = self.admit(worker, "view_definition_compilation_failed") else {
            return false;
        };
        let slots = core.snapshot();
        publish(&slots, "view_definition_compilation_failed", move |l| {
            l.view_definition_compilation_failed(valuation_time, &error)
        });
        drop(core);
        drop(gate);

        drain(self.id, &slots);
        true
    }

    pub(crate) fn on_cycle_started(&self, worker: WorkerToken, metadata: CycleMetadata) -> bool {
        let Some((gate, core)) = self.admit(worker, "cycle_started") else {
            return false;
        };
        let slots = core.snapshot();
        publish(&slots, "cycle_started", move |l| l.cycle_started(&metadata));
        drop(core);
        drop(gate);

        drain(self.id, &slots);
        true
    }

    pub(crate) fn on_cycle_fragment_completed(&self, worker: WorkerToken, fragment: ComputationResult) -> bool {
        let Some((gate, core)) = self.admit(worker, "cycle_fragment_completed") else {
            return false;
        };
        let delta = self.delta_against_latest(&fragment);
        let slots = core.snapshot();
        publish(&slots, "cycle_fragment_completed", move |l| {
            l.cycle_fragment_completed(&fragment, delta.as_ref())
        });
        drop(core);
        drop(gate);

        drain(self.id, &slots);
        true
    }

    pub(crate) fn on_cycle_completed(&self, worker: WorkerToken, result: ComputationResult) -> bool {
        let Some((gate, core)) = self.admit(worker, "cycle_completed") else {
            return false;
        };
        let delta = self.delta_against_latest(&result);
        let result = Arc::new(result);
        self.latest_result.set(result.clone());
        let slots = core.snapshot();
        publish(&slots, "cycle_completed", move |l| {
            l.cycle_completed(&result, delta.as_ref())
        });
        drop(core);
        drop(gate);

        drain(self.id, &slots);
        true
    }

    pub(crate) fn on_cycle_failed(&self, worker: WorkerToken, cycle: CycleId, error: EngineError) -> bool {
        let Some((gate, core)) = self.admit(worker, "cycle_execution_failed") else {
            return false;
        };
        let slots = core.snapshot();
        publish(&slots, "cycle_execution_failed", move |l| {
            l.cycle_execution_failed(cycle, &error)
        });
        drop(core);
        drop(gate);

        drain(self.id, &slots);
        true
    }

    pub(crate) fn on_worker_completed(&self, worker: WorkerToken) -> bool {
        let Some((gate, mut core)) = self.admit(worker, "process_completed") else {
            return false;
        };
        core.worker = None;
        core.state = ProcessState::Finished;
        let slots = core.snapshot();
        publish(&slots, "process_completed", |l| l.process_completed());
        drop(core);
        drop(gate);

        tracing::debug!(process = %self.id, "execution sequence exhausted, process finished");
        drain(self.id, &slots);
        true
    }
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`ViewProcess`] with customizable settings.
///
/// # Example
///
/// ```ignore
/// let process = ViewProcess::builder(ViewDefinitionId::new("Equities"), engine)
///     .options(ExecutionOptions::batch(cycles))
///     .full_delta_on_first_cycle(true)
///     .build();
/// ```
pub struct ViewProcessBuilder {
    definition_id: ViewDefinitionId,
    engine: Arc<dyn GraphEngine>,
    options: ExecutionOptions,
    delta_definition: DeltaDefinition,
    worker_factory: Arc<dyn WorkerFactory>,
    resolver: Option<Arc<dyn ViewDefinitionResolver>>,
    full_delta_on_first_cycle: bool,
}

impl ViewProcessBuilder {
    /// Create a new builder with default settings.
    pub fn new(definition_id: ViewDefinitionId, engine: Arc<dyn GraphEngine>) -> Self {
        Self {
            definition_id,
            engine,
            options: ExecutionOptions::default(),
            delta_definition: DeltaDefinition::default(),
            worker_factory: Arc::new(ThreadWorkerFactory),
            resolver: None,
            full_delta_on_first_cycle: false,
        }
    }

    /// Set the execution options.
    pub fn options(mut self, options: ExecutionOptions) -> Self {
        self.options = options;
        self
    }

    /// Set what counts as a change between cycles. Defaults to exact
    /// equality.
    pub fn delta_definition(mut self, definition: DeltaDefinition) -> Self {
        self.delta_definition = definition;
        self
    }

    /// Set how workers are started. Defaults to [`ThreadWorkerFactory`].
    pub fn worker_factory(mut self, factory: Arc<dyn WorkerFactory>) -> Self {
        self.worker_factory = factory;
        self
    }

    /// Set where [`ViewProcess::latest_view_definition`] looks definitions up.
    pub fn resolver(mut self, resolver: Arc<dyn ViewDefinitionResolver>) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Report the first cycle's result as a delta in which every value is a
    /// change, instead of no delta at all.
    pub fn full_delta_on_first_cycle(mut self, enabled: bool) -> Self {
        self.full_delta_on_first_cycle = enabled;
        self
    }

    /// Build the process. It starts out [`Stopped`](ProcessState::Stopped).
    pub fn build(self) -> ViewProcess {
        let id = ProcessId::next();
        ViewProcess {
            shared: Arc::new(ProcessShared {
                id,
                definition_id: self.definition_id,
                options: Arc::new(self.options),
                engine: self.engine,
                worker_factory: self.worker_factory,
                resolver: self.resolver,
                delta_definition: self.delta_definition,
                full_delta_on_first_cycle: self.full_delta_on_first_cycle,
                gate: Gate::new(),
                core: Mutex::new(ProcessCore {
                    state: ProcessState::Stopped,
                    listeners: Slab::new(),
                    worker: None,
                    next_worker: 0,
                    suspended: false,
                }),
                compilation: Latest::new(),
                latest_result: Latest::new(),
                cycles: CycleSequence::new(id),
                log_modes: Arc::new(ExecutionLogModeSource::new()),
            }),
        }
    }
}
