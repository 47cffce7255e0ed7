//! The seam to the external dependency-graph engine.
//!
//! How a graph is built and evaluated is not this crate's concern. A
//! [`GraphEngine`] turns a view definition into a [`CompilationOutput`] and
//! evaluates one cycle of it into a [`ComputationResult`].

use std::time::SystemTime;

use crate::compiled::{CompilationOutput, CompiledViewDefinition, ViewDefinitionId};
use crate::cycle::{CycleId, ProcessId};
use crate::error::EngineError;
use crate::log::{ExecutionLogMode, ExecutionLogModeSource};
use crate::options::CycleOptions;
use crate::result::{ComputationResult, ResultMap, ResultMetadata};
use crate::value::ValueSpecification;

/// Builds and evaluates dependency graphs.
///
/// Called from the computation worker thread only, one call at a time per
/// process.
pub trait GraphEngine: Send + Sync + 'static {
    /// Compile `definition` for `valuation_time`.
    fn compile(
        &self,
        definition: &ViewDefinitionId,
        valuation_time: SystemTime,
    ) -> Result<CompilationOutput, EngineError>;

    /// Evaluate one cycle of `compiled`.
    ///
    /// Partial results may be pushed to `fragments` while the cycle runs. The
    /// returned result holds every computed value; output filtering is applied
    /// by the caller.
    fn execute_cycle(
        &self,
        compiled: &CompiledViewDefinition,
        context: &CycleContext<'_>,
        fragments: &mut dyn FragmentSink,
    ) -> Result<ComputationResult, EngineError>;
}

/// Receives partial results of a running cycle.
pub trait FragmentSink {
    /// A part of the cycle's values is ready.
    fn fragment_completed(&mut self, fragment: ComputationResult);
}

/// Everything an engine needs to know about the cycle it is evaluating.
#[derive(Debug, Clone, Copy)]
pub struct CycleContext<'a> {
    cycle_id: CycleId,
    valuation_time: SystemTime,
    options: &'a CycleOptions,
    log_modes: &'a ExecutionLogModeSource,
}

impl<'a> CycleContext<'a> {
    /// Create a context.
    pub fn new(
        cycle_id: CycleId,
        valuation_time: SystemTime,
        options: &'a CycleOptions,
        log_modes: &'a ExecutionLogModeSource,
    ) -> Self {
        Self {
            cycle_id,
            valuation_time,
            options,
            log_modes,
        }
    }

    /// The cycle.
    pub fn cycle_id(&self) -> CycleId {
        self.cycle_id
    }

    /// The process running the cycle.
    pub fn process_id(&self) -> ProcessId {
        self.cycle_id.process
    }

    /// Valuation time the cycle runs for.
    pub fn valuation_time(&self) -> SystemTime {
        self.valuation_time
    }

    /// Options the cycle was started with.
    pub fn options(&self) -> &'a CycleOptions {
        self.options
    }

    /// How much log detail to capture for `value` in this cycle.
    pub fn log_mode(&self, value: &ValueSpecification) -> ExecutionLogMode {
        self.log_modes.mode(value)
    }

    /// Stamp `results` with this cycle's metadata, produced now.
    pub fn result(&self, results: ResultMap) -> ComputationResult {
        ComputationResult::new(
            ResultMetadata {
                process_id: self.process_id(),
                cycle_id: self.cycle_id,
                valuation_time: self.valuation_time,
                result_timestamp: SystemTime::now(),
            },
            results,
        )
    }
}
