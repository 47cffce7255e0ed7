#![deny(missing_docs)]
#![doc = include_str!("../README.md")]

mod collector;
mod compiled;
mod cycle;
mod delta;
mod engine;
mod error;
mod gate;
mod latest;
mod listener;
mod log;
mod options;
mod output;
mod process;
mod result;
mod value;
mod worker;

pub use collector::{EventKind, ProcessEvent, ProcessEventCollector};
pub use compiled::{
    CompilationOutput, CompiledViewDefinition, MarketDataPermissionProvider, PermitAll,
    UserPrincipal, ViewDefinition, ViewDefinitionId, ViewDefinitionResolver,
};
pub use cycle::{CycleId, CycleMetadata, ProcessId};
pub use delta::{compute_delta, DeltaComparer, DeltaDefinition, NumberComparer};
pub use engine::{CycleContext, FragmentSink, GraphEngine};
pub use error::{EngineError, ProcessError};
pub use listener::ProcessListener;
pub use log::{
    AggregatedExecutionLog, ExceptionSummary, ExecutionLog, ExecutionLogMode,
    ExecutionLogModeSource, LogEntry, LogEvent, LogLevel, LogLevels,
};
pub use options::{CycleOptions, ExecutionOptions, ExecutionSequence, DEFAULT_CYCLE_PERIOD};
pub use output::{ResultModelDefinition, ResultOutputMode, TerminalOutputs};
pub use process::{ProcessState, ViewProcess, ViewProcessBuilder};
pub use result::{
    ComputationResult, ComputedValueResult, DeltaResult, ResultMap, ResultMetadata, TargetResults,
};
pub use value::{
    ComputationTargetType, TargetSpecification, Value, ValueKey, ValueKind, ValueSpecification,
};
pub use worker::{ThreadWorkerFactory, Worker, WorkerContext, WorkerFactory};
