//! The computation worker: runs cycles on its own thread and reports every
//! step back to the process that owns it.
//!
//! A process owns at most one worker at a time. Each worker carries a token
//! minted by the process; events reported under a token the process no longer
//! owns are discarded, so a worker that was terminated mid-cycle cannot
//! publish a late result.

use std::fmt;
use std::io;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Weak};
use std::thread;
use std::time::{Instant, SystemTime};

use parking_lot::{Condvar, Mutex};

use crate::compiled::{CompilationOutput, CompiledViewDefinition, ViewDefinitionId};
use crate::cycle::{CycleId, CycleMetadata, ProcessId};
use crate::engine::{CycleContext, FragmentSink, GraphEngine};
use crate::error::EngineError;
use crate::listener::panic_message;
use crate::log::ExecutionLogModeSource;
use crate::options::{CycleOptions, ExecutionOptions, Pause};
use crate::process::ProcessShared;
use crate::result::ComputationResult;

/// Identity of one worker within its process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub(crate) struct WorkerToken(pub(crate) u64);

/// Handle the process keeps to a running worker.
pub trait Worker: Send + Sync {
    /// Run the next cycle now instead of waiting.
    fn trigger_cycle(&self);

    /// Recompile the view definition before the next cycle.
    fn force_graph_rebuild(&self);

    /// Stop as soon as possible. Must not block; an interrupted wait returns
    /// immediately and a running cycle is abandoned by the process.
    fn terminate(&self);
}

/// Starts workers for a process.
pub trait WorkerFactory: Send + Sync + 'static {
    /// Start a worker that reports through `context`.
    fn start(&self, context: WorkerContext) -> io::Result<Box<dyn Worker>>;
}

/// Runs each worker on a dedicated, named thread.
#[derive(Debug, Clone, Copy, Default)]
pub struct ThreadWorkerFactory;

impl WorkerFactory for ThreadWorkerFactory {
    fn start(&self, context: WorkerContext) -> io::Result<Box<dyn Worker>> {
        let signals = Arc::new(Signals::default());
        let name = format!("{}-worker-{}", context.process_id, context.token.0);
        let thread_signals = signals.clone();
        thread::Builder::new()
            .name(name)
            .spawn(move || run(context, &thread_signals))?;
        Ok(Box::new(ThreadWorker { signals }))
    }
}

/// A worker's view of its process.
///
/// Every report method returns `false` once the process has disowned this
/// worker or is gone; the worker should stop at that point.
pub struct WorkerContext {
    pub(crate) process: Weak<ProcessShared>,
    pub(crate) token: WorkerToken,
    pub(crate) process_id: ProcessId,
    pub(crate) definition_id: ViewDefinitionId,
    pub(crate) options: Arc<ExecutionOptions>,
    pub(crate) engine: Arc<dyn GraphEngine>,
    pub(crate) log_modes: Arc<ExecutionLogModeSource>,
}

impl WorkerContext {
    /// The owning process.
    pub fn process_id(&self) -> ProcessId {
        self.process_id
    }

    /// The view definition to compile.
    pub fn definition_id(&self) -> &ViewDefinitionId {
        &self.definition_id
    }

    /// The process's execution options.
    pub fn options(&self) -> &ExecutionOptions {
        &self.options
    }

    /// The graph engine.
    pub fn engine(&self) -> &dyn GraphEngine {
        self.engine.as_ref()
    }

    /// Per-value log verbosity.
    pub fn log_modes(&self) -> &ExecutionLogModeSource {
        &self.log_modes
    }

    /// Latest compilation published by any worker of this process.
    pub fn latest_compilation(&self) -> Option<CompilationOutput> {
        self.process.upgrade()?.latest_compilation()
    }

    /// Mint the next cycle id, or `None` if the process is gone.
    pub fn next_cycle_id(&self) -> Option<CycleId> {
        Some(self.process.upgrade()?.next_cycle_id())
    }

    /// Report a successful compilation.
    pub fn compilation_completed(&self, output: CompilationOutput) -> bool {
        self.with_process(|p| p.on_compilation_completed(self.token, output))
    }

    /// Report a failed compilation.
    pub fn compilation_failed(&self, valuation_time: SystemTime, error: EngineError) -> bool {
        self.with_process(|p| p.on_compilation_failed(self.token, valuation_time, error))
    }

    /// Report that a cycle started.
    pub fn cycle_started(&self, metadata: CycleMetadata) -> bool {
        self.with_process(|p| p.on_cycle_started(self.token, metadata))
    }

    /// Report a filtered partial result.
    pub fn cycle_fragment_completed(&self, fragment: ComputationResult) -> bool {
        self.with_process(|p| p.on_cycle_fragment_completed(self.token, fragment))
    }

    /// Report a filtered full result.
    pub fn cycle_completed(&self, result: ComputationResult) -> bool {
        self.with_process(|p| p.on_cycle_completed(self.token, result))
    }

    /// Report a failed cycle.
    pub fn cycle_failed(&self, cycle: CycleId, error: EngineError) -> bool {
        self.with_process(|p| p.on_cycle_failed(self.token, cycle, error))
    }

    /// Report that the execution sequence is exhausted.
    pub fn worker_completed(&self) -> bool {
        self.with_process(|p| p.on_worker_completed(self.token))
    }

    fn with_process(&self, report: impl FnOnce(&ProcessShared) -> bool) -> bool {
        match self.process.upgrade() {
            Some(process) => report(&process),
            None => false,
        }
    }
}

impl fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("process_id", &self.process_id)
            .field("token", &self.token)
            .field("definition_id", &self.definition_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Default)]
struct SignalState {
    terminated: bool,
    triggered: bool,
    rebuild: bool,
}

/// Wake-ups shared between a worker thread and its handle.
#[derive(Debug, Default)]
struct Signals {
    state: Mutex<SignalState>,
    wake: Condvar,
}

impl Signals {
    /// Wait out `pause`, returning early on a trigger. Returns false once
    /// terminated.
    fn wait(&self, pause: Pause) -> bool {
        let mut state = self.state.lock();
        match pause {
            Pause::None => {}
            Pause::For(period) => {
                let deadline = Instant::now() + period;
                while !state.triggered && !state.terminated {
                    if self.wake.wait_until(&mut state, deadline).timed_out() {
                        break;
                    }
                }
            }
            Pause::UntilTriggered => {
                while !state.triggered && !state.terminated {
                    self.wake.wait(&mut state);
                }
            }
        }
        state.triggered = false;
        !state.terminated
    }

    fn take_rebuild(&self) -> bool {
        std::mem::take(&mut self.state.lock().rebuild)
    }

    fn is_terminated(&self) -> bool {
        self.state.lock().terminated
    }

    fn update(&self, change: impl FnOnce(&mut SignalState)) {
        change(&mut self.state.lock());
        self.wake.notify_all();
    }
}

struct ThreadWorker {
    signals: Arc<Signals>,
}

impl Worker for ThreadWorker {
    fn trigger_cycle(&self) {
        self.signals.update(|s| s.triggered = true);
    }

    fn force_graph_rebuild(&self) {
        self.signals.update(|s| s.rebuild = true);
    }

    fn terminate(&self) {
        self.signals.update(|s| s.terminated = true);
    }
}

/// Outcome of one pass of the loop.
enum Step {
    Continue,
    /// Compilation failed; try the same cycle again later.
    Retry,
    Stop,
}

fn run(context: WorkerContext, signals: &Signals) {
    tracing::debug!(process = %context.process_id, token = context.token.0, "computation worker started");
    let mut sequence = context.options.sequence.clone();
    let mut pending: Option<CycleOptions> = None;
    let mut first = true;
    let mut after_failure = false;
    loop {
        if !signals.wait(context.options.pause(first, after_failure)) {
            break;
        }
        first = false;
        let Some(cycle) = pending.take().or_else(|| sequence.next_cycle()) else {
            context.worker_completed();
            break;
        };
        match run_cycle(&context, signals, &cycle) {
            Step::Continue => after_failure = false,
            Step::Retry => {
                after_failure = true;
                pending = Some(cycle);
            }
            Step::Stop => break,
        }
    }
    tracing::debug!(process = %context.process_id, token = context.token.0, "computation worker stopped");
}

fn run_cycle(context: &WorkerContext, signals: &Signals, cycle: &CycleOptions) -> Step {
    let valuation_time = cycle.valuation_time.unwrap_or_else(SystemTime::now);

    let rebuild = signals.take_rebuild();
    let compilation = match context.latest_compilation() {
        Some(compilation) if !rebuild => compilation,
        _ => match compile(context, valuation_time) {
            Ok(compilation) => {
                if !context.compilation_completed(compilation.clone()) {
                    return Step::Stop;
                }
                compilation
            }
            Err(error) => {
                tracing::error!(process = %context.process_id, %error, "view definition compilation failed");
                return if context.compilation_failed(valuation_time, error) {
                    Step::Retry
                } else {
                    Step::Stop
                };
            }
        },
    };
    if signals.is_terminated() {
        return Step::Stop;
    }

    let Some(cycle_id) = context.next_cycle_id() else {
        return Step::Stop;
    };
    let compiled = &compilation.compiled;
    let metadata = CycleMetadata {
        cycle_id,
        valuation_time,
        name: cycle.name.clone(),
        compiled: compiled.clone(),
    };
    if !context.cycle_started(metadata) {
        return Step::Stop;
    }

    let cycle_context = CycleContext::new(cycle_id, valuation_time, cycle, &context.log_modes);
    let mut fragments = FilteringSink {
        context,
        compiled,
        disowned: false,
    };
    let outcome = catch_unwind(AssertUnwindSafe(|| {
        context
            .engine
            .execute_cycle(compiled, &cycle_context, &mut fragments)
    }))
    .unwrap_or_else(|panic| {
        Err(EngineError::execution(
            Some(cycle_id),
            anyhow::anyhow!("engine panicked: {}", panic_message(panic.as_ref())),
        ))
    });
    if fragments.disowned {
        return Step::Stop;
    }

    let reported = match outcome {
        Ok(mut result) => {
            retain_outputs(compiled, &mut result);
            context.cycle_completed(result)
        }
        Err(error) => {
            tracing::error!(process = %context.process_id, %cycle_id, %error, "cycle execution failed");
            context.cycle_failed(cycle_id, error)
        }
    };
    if reported {
        Step::Continue
    } else {
        Step::Stop
    }
}

fn compile(context: &WorkerContext, valuation_time: SystemTime) -> Result<CompilationOutput, EngineError> {
    catch_unwind(AssertUnwindSafe(|| {
        context.engine.compile(&context.definition_id, valuation_time)
    }))
    .unwrap_or_else(|panic| {
        Err(EngineError::compilation(
            context.definition_id.clone(),
            anyhow::anyhow!("engine panicked: {}", panic_message(panic.as_ref())),
        ))
    })
}

fn retain_outputs(compiled: &CompiledViewDefinition, result: &mut ComputationResult) {
    compiled
        .result_model()
        .filter(&mut result.results, compiled.terminal_outputs());
}

/// Filters fragments and forwards them to the process.
struct FilteringSink<'a> {
    context: &'a WorkerContext,
    compiled: &'a CompiledViewDefinition,
    disowned: bool,
}

impl FragmentSink for FilteringSink<'_> {
    fn fragment_completed(&mut self, mut fragment: ComputationResult) {
        if self.disowned {
            return;
        }
        retain_outputs(self.compiled, &mut fragment);
        if !self.context.cycle_fragment_completed(fragment) {
            self.disowned = true;
        }
    }
}
