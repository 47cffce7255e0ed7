//! Process and cycle identity.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use crate::compiled::CompiledViewDefinition;

/// Global counter for process ids.
static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(1);

/// Unique identifier of a view process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ProcessId(pub u64);

impl ProcessId {
    /// Mint a process id that has not been handed out before in this program.
    pub fn next() -> Self {
        ProcessId(NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ProcessId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ViewProcess-{}", self.0)
    }
}

/// Unique identifier of a cycle: the owning process plus its sequence number.
///
/// Ordering is by process, then sequence, so ids of one process are strictly
/// increasing in the order they were minted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CycleId {
    /// Process that ran the cycle.
    pub process: ProcessId,
    /// Position of the cycle in the process's sequence.
    pub sequence: u64,
}

impl fmt::Display for CycleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-cycle-{}", self.process, self.sequence)
    }
}

/// Mints cycle ids for one process.
#[derive(Debug)]
pub(crate) struct CycleSequence {
    process: ProcessId,
    next: AtomicU64,
}

impl CycleSequence {
    pub(crate) fn new(process: ProcessId) -> Self {
        Self {
            process,
            next: AtomicU64::new(0),
        }
    }

    pub(crate) fn next_id(&self) -> CycleId {
        CycleId {
            process: self.process,
            sequence: self.next.fetch_add(1, Ordering::Relaxed),
        }
    }
}

/// What listeners learn when a cycle starts.
#[derive(Debug, Clone)]
pub struct CycleMetadata {
    /// The cycle.
    pub cycle_id: CycleId,
    /// Valuation time the cycle runs for.
    pub valuation_time: SystemTime,
    /// Optional name from the execution sequence.
    pub name: Option<String>,
    /// The compiled definition the cycle evaluates.
    pub compiled: Arc<CompiledViewDefinition>,
}

impl CycleMetadata {
    /// Names of the calculation configurations the cycle computes.
    pub fn configuration_names(&self) -> impl Iterator<Item = &str> + '_ {
        self.compiled.configuration_names()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cycle_ids_strictly_increase() {
        let sequence = CycleSequence::new(ProcessId::next());
        let ids: Vec<CycleId> = (0..5).map(|_| sequence.next_id()).collect();
        assert!(ids.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn test_process_ids_are_unique() {
        assert_ne!(ProcessId::next(), ProcessId::next());
    }
}
