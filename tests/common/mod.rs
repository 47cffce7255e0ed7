//! Scripted engine and helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::{Condvar, Mutex};
use view_flow::{
    AggregatedExecutionLog, CompilationOutput, CompiledViewDefinition, ComputationResult,
    ComputedValueResult, CycleContext, DeltaResult, EngineError, ExecutionLog, ExecutionOptions,
    FragmentSink, GraphEngine, LogLevel, MarketDataPermissionProvider, PermitAll, ProcessEvent,
    ProcessEventCollector, ResultMap, ResultModelDefinition, TargetSpecification, TerminalOutputs,
    ThreadWorkerFactory, Value, ValueKey, ValueSpecification, ViewDefinition, ViewDefinitionId,
    ViewProcess, Worker, WorkerContext, WorkerFactory,
};

pub const CONFIG: &str = "Default";
pub const TIMEOUT: Duration = Duration::from_secs(10);

pub fn spec(name: &str) -> ValueSpecification {
    ValueSpecification::new(TargetSpecification::primitive("T"), ValueKey::new(name))
}

// ============================================================================
// Latch
// ============================================================================

/// One-shot gate a test and the engine use to hand off control.
#[derive(Default)]
pub struct Latch {
    open: Mutex<bool>,
    opened: Condvar,
}

impl Latch {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn open(&self) {
        *self.open.lock() = true;
        self.opened.notify_all();
    }

    pub fn wait(&self) -> bool {
        let mut open = self.open.lock();
        let deadline = std::time::Instant::now() + TIMEOUT;
        while !*open {
            if self.opened.wait_until(&mut open, deadline).timed_out() {
                return *open;
            }
        }
        true
    }
}

// ============================================================================
// Scripted engine
// ============================================================================

type Values = Vec<(&'static str, f64)>;

/// What the engine does for one cycle.
pub enum Step {
    Values(Values),
    Fragmented { fragments: Vec<Values>, values: Values },
    Fail(&'static str),
    Panic(&'static str),
    Blocked {
        entered: Arc<Latch>,
        release: Arc<Latch>,
        values: Values,
    },
}

/// Engine that plays back a script of cycles. Once the script runs out every
/// cycle produces an empty result.
pub struct ScriptedEngine {
    steps: Mutex<VecDeque<Step>>,
    terminal: Vec<&'static str>,
    failing_compiles: AtomicUsize,
    compiles: AtomicUsize,
    executions: AtomicUsize,
    result_model: ResultModelDefinition,
    permissions: Arc<dyn MarketDataPermissionProvider>,
}

impl ScriptedEngine {
    /// Engine whose compiled graphs have `terminal` as terminal outputs.
    pub fn new(terminal: impl IntoIterator<Item = &'static str>) -> Self {
        Self {
            steps: Mutex::new(VecDeque::new()),
            terminal: terminal.into_iter().collect(),
            failing_compiles: AtomicUsize::new(0),
            compiles: AtomicUsize::new(0),
            executions: AtomicUsize::new(0),
            result_model: ResultModelDefinition::default(),
            permissions: Arc::new(PermitAll),
        }
    }

    pub fn with_steps(self, steps: impl IntoIterator<Item = Step>) -> Self {
        self.steps.lock().extend(steps);
        self
    }

    pub fn with_failing_compiles(self, count: usize) -> Self {
        self.failing_compiles.store(count, Ordering::SeqCst);
        self
    }

    pub fn with_result_model(mut self, result_model: ResultModelDefinition) -> Self {
        self.result_model = result_model;
        self
    }

    pub fn with_permissions(mut self, permissions: Arc<dyn MarketDataPermissionProvider>) -> Self {
        self.permissions = permissions;
        self
    }

    pub fn push(&self, step: Step) {
        self.steps.lock().push_back(step);
    }

    pub fn compiles(&self) -> usize {
        self.compiles.load(Ordering::SeqCst)
    }

    pub fn executions(&self) -> usize {
        self.executions.load(Ordering::SeqCst)
    }
}

fn results(context: &CycleContext<'_>, values: &[(&'static str, f64)]) -> ResultMap {
    let mut map = ResultMap::new();
    for (name, value) in values {
        let spec = spec(name);
        let mode = context.log_mode(&spec);
        let mut log = ExecutionLog::new(mode);
        log.record(LogLevel::Info, format!("computed {name}"));
        map.insert(
            CONFIG,
            spec.clone(),
            ComputedValueResult::with_log(*value, AggregatedExecutionLog::leaf(spec, log, mode)),
        );
    }
    map
}

impl GraphEngine for ScriptedEngine {
    fn compile(
        &self,
        definition: &ViewDefinitionId,
        valuation_time: SystemTime,
    ) -> Result<CompilationOutput, EngineError> {
        let version = self.compiles.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        let failing = self
            .failing_compiles
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(EngineError::compilation(
                definition.clone(),
                anyhow::anyhow!("market data unavailable"),
            ));
        }
        let terminal = self
            .terminal
            .iter()
            .fold(TerminalOutputs::new(), |outputs, name| outputs.with(CONFIG, spec(name)));
        let compiled = CompiledViewDefinition::new(
            ViewDefinition {
                id: definition.clone(),
                name: definition.to_string(),
                version,
                configuration_names: vec![CONFIG.to_string()],
                result_model: self.result_model,
            },
            valuation_time,
            terminal,
            [spec("MarketData")].into(),
        );
        Ok(CompilationOutput::new(Arc::new(compiled), self.permissions.clone()))
    }

    fn execute_cycle(
        &self,
        _compiled: &CompiledViewDefinition,
        context: &CycleContext<'_>,
        fragments: &mut dyn FragmentSink,
    ) -> Result<ComputationResult, EngineError> {
        self.executions.fetch_add(1, Ordering::SeqCst);
        let step = self.steps.lock().pop_front();
        match step.unwrap_or(Step::Values(Vec::new())) {
            Step::Values(values) => Ok(context.result(results(context, &values))),
            Step::Fragmented {
                fragments: parts,
                values,
            } => {
                for part in parts {
                    fragments.fragment_completed(context.result(results(context, &part)));
                }
                Ok(context.result(results(context, &values)))
            }
            Step::Fail(message) => Err(EngineError::execution(
                Some(context.cycle_id()),
                anyhow::anyhow!(message),
            )),
            Step::Panic(message) => panic!("{message}"),
            Step::Blocked {
                entered,
                release,
                values,
            } => {
                entered.open();
                release.wait();
                Ok(context.result(results(context, &values)))
            }
        }
    }
}

// ============================================================================
// Worker factory
// ============================================================================

/// Thread workers, counted.
#[derive(Default)]
pub struct CountingFactory {
    inner: ThreadWorkerFactory,
    started: AtomicUsize,
}

impl CountingFactory {
    pub fn started(&self) -> usize {
        self.started.load(Ordering::SeqCst)
    }
}

impl WorkerFactory for CountingFactory {
    fn start(&self, context: WorkerContext) -> io::Result<Box<dyn Worker>> {
        self.started.fetch_add(1, Ordering::SeqCst);
        self.inner.start(context)
    }
}

/// Never manages to start a worker.
pub struct FailingFactory;

impl WorkerFactory for FailingFactory {
    fn start(&self, _context: WorkerContext) -> io::Result<Box<dyn Worker>> {
        Err(io::Error::new(io::ErrorKind::WouldBlock, "thread limit reached"))
    }
}

pub fn process(engine: &Arc<ScriptedEngine>, options: ExecutionOptions) -> (ViewProcess, Arc<CountingFactory>) {
    let factory = Arc::new(CountingFactory::default());
    let process = ViewProcess::builder(ViewDefinitionId::new("Equities"), engine.clone())
        .options(options)
        .worker_factory(factory.clone())
        .build();
    (process, factory)
}

// ============================================================================
// Assertions
// ============================================================================

/// Every `cycle_completed` a collector saw, in order.
pub fn completed(collector: &ProcessEventCollector) -> Vec<(Arc<ComputationResult>, Option<DeltaResult>)> {
    collector
        .events()
        .into_iter()
        .filter_map(|event| match event {
            ProcessEvent::CycleCompleted { result, delta } => Some((result, delta)),
            _ => None,
        })
        .collect()
}

pub fn value(result: &ComputationResult, name: &str) -> Option<Value> {
    result.results.get(CONFIG, &spec(name)).map(|r| r.value.clone())
}

pub fn names(results: &ResultMap) -> Vec<String> {
    results.iter().map(|(_, spec, _)| spec.key.name).collect()
}
