//! Execution options: when cycles run and what each cycle evaluates.

use std::collections::VecDeque;
use std::time::{Duration, SystemTime};

/// Default delay between cycles of a real-time process.
pub const DEFAULT_CYCLE_PERIOD: Duration = Duration::from_secs(1);

/// Parameters of one cycle.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CycleOptions {
    /// Valuation time. `None` means the wall-clock time when the cycle starts.
    pub valuation_time: Option<SystemTime>,
    /// Optional cycle name, passed through to listeners.
    pub name: Option<String>,
}

impl CycleOptions {
    /// Options for a cycle valued at `valuation_time`.
    pub fn at(valuation_time: SystemTime) -> Self {
        Self {
            valuation_time: Some(valuation_time),
            name: None,
        }
    }

    /// Set the cycle name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// The cycles a process runs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum ExecutionSequence {
    /// Live cycles at the current time, forever.
    #[default]
    Infinite,
    /// A bounded list of cycles. The process finishes when it is exhausted.
    Finite(VecDeque<CycleOptions>),
}

impl ExecutionSequence {
    /// A bounded sequence.
    pub fn finite(cycles: impl IntoIterator<Item = CycleOptions>) -> Self {
        ExecutionSequence::Finite(cycles.into_iter().collect())
    }

    /// Take the next cycle, or `None` once a finite sequence is exhausted.
    pub fn next_cycle(&mut self) -> Option<CycleOptions> {
        match self {
            ExecutionSequence::Infinite => Some(CycleOptions::default()),
            ExecutionSequence::Finite(cycles) => cycles.pop_front(),
        }
    }

    /// Cycles left, `None` for an infinite sequence.
    pub fn remaining(&self) -> Option<usize> {
        match self {
            ExecutionSequence::Infinite => None,
            ExecutionSequence::Finite(cycles) => Some(cycles.len()),
        }
    }
}

/// Immutable execution options of a process.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ExecutionOptions {
    /// Cycles to run.
    pub sequence: ExecutionSequence,

    /// Longest wait between cycles when nothing triggers one. `None` means
    /// cycles after the first only run when triggered.
    pub cycle_period: Option<Duration>,

    /// Start the next cycle as soon as the previous one finishes.
    pub run_as_fast_as_possible: bool,

    /// Hold the first cycle until a trigger arrives.
    pub wait_for_initial_trigger: bool,
}

impl Default for ExecutionOptions {
    fn default() -> Self {
        Self::realtime(DEFAULT_CYCLE_PERIOD)
    }
}

impl ExecutionOptions {
    /// Live cycles every `period`, or sooner when triggered.
    pub fn realtime(period: Duration) -> Self {
        Self {
            sequence: ExecutionSequence::Infinite,
            cycle_period: Some(period),
            run_as_fast_as_possible: false,
            wait_for_initial_trigger: false,
        }
    }

    /// Run `cycles` back to back, then finish.
    pub fn batch(cycles: impl IntoIterator<Item = CycleOptions>) -> Self {
        Self {
            sequence: ExecutionSequence::finite(cycles),
            cycle_period: None,
            run_as_fast_as_possible: true,
            wait_for_initial_trigger: false,
        }
    }

    /// One live cycle on start, then one per trigger.
    pub fn triggered() -> Self {
        Self {
            sequence: ExecutionSequence::Infinite,
            cycle_period: None,
            run_as_fast_as_possible: false,
            wait_for_initial_trigger: false,
        }
    }

    // === Builder methods ===

    /// Set the cycle sequence.
    pub fn with_sequence(mut self, sequence: ExecutionSequence) -> Self {
        self.sequence = sequence;
        self
    }

    /// Set the cycle period.
    pub fn with_cycle_period(mut self, period: Option<Duration>) -> Self {
        self.cycle_period = period;
        self
    }

    /// Set whether cycles run back to back.
    pub fn with_run_as_fast_as_possible(mut self, enabled: bool) -> Self {
        self.run_as_fast_as_possible = enabled;
        self
    }

    /// Set whether the first cycle waits for a trigger.
    pub fn with_wait_for_initial_trigger(mut self, enabled: bool) -> Self {
        self.wait_for_initial_trigger = enabled;
        self
    }

    /// How long the worker pauses before the next cycle.
    ///
    /// `after_failure` is set when the last attempt could not compile, in which
    /// case the worker never spins even when running as fast as possible.
    pub(crate) fn pause(&self, first: bool, after_failure: bool) -> Pause {
        if first {
            return if self.wait_for_initial_trigger {
                Pause::UntilTriggered
            } else {
                Pause::None
            };
        }
        if self.run_as_fast_as_possible && !after_failure {
            return Pause::None;
        }
        match self.cycle_period {
            Some(period) => Pause::For(period),
            None => Pause::UntilTriggered,
        }
    }
}

/// Wait before a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Pause {
    None,
    For(Duration),
    UntilTriggered,
}
