//! Error types for the process controller and the graph engine seam.

use std::sync::Arc;

use crate::compiled::ViewDefinitionId;
use crate::cycle::CycleId;

/// Errors surfaced synchronously by [`ViewProcess`](crate::ViewProcess) operations.
///
/// These are programming errors or start-up failures; per-cycle failures are
/// reported to listeners instead.
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    /// The process was shut down and can no longer be used.
    #[error("view process has been terminated")]
    Terminated,

    /// A worker was asked to start while one is already running.
    #[error("view process is already running")]
    AlreadyRunning,

    /// `suspend` was called on a process that is already suspended.
    #[error("view process is already suspended")]
    AlreadySuspended,

    /// `resume` was called on a process that is not suspended.
    #[error("view process is not suspended")]
    NotSuspended,

    /// The computation worker could not be started.
    #[error("failed to start computation worker: {0}")]
    WorkerStart(#[from] std::io::Error),
}

/// Failures reported by a [`GraphEngine`](crate::GraphEngine).
///
/// The cause is shared so the same error can be handed to every listener.
#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    /// The dependency graph could not be built.
    #[error("failed to compile view definition {definition}: {cause}")]
    Compilation {
        /// Definition being compiled.
        definition: ViewDefinitionId,
        /// Underlying failure.
        cause: Arc<anyhow::Error>,
    },

    /// A compiled graph could not be evaluated.
    #[error("failed to execute cycle: {cause}")]
    Execution {
        /// Cycle being executed, if one was assigned.
        cycle: Option<CycleId>,
        /// Underlying failure.
        cause: Arc<anyhow::Error>,
    },
}

impl EngineError {
    /// A compilation failure for `definition`.
    pub fn compilation(definition: ViewDefinitionId, cause: impl Into<anyhow::Error>) -> Self {
        EngineError::Compilation {
            definition,
            cause: Arc::new(cause.into()),
        }
    }

    /// An execution failure, optionally tied to a cycle.
    pub fn execution(cycle: Option<CycleId>, cause: impl Into<anyhow::Error>) -> Self {
        EngineError::Execution {
            cycle,
            cause: Arc::new(cause.into()),
        }
    }

    /// Returns true for [`EngineError::Compilation`].
    pub fn is_compilation(&self) -> bool {
        matches!(self, EngineError::Compilation { .. })
    }

    /// The underlying failure.
    pub fn cause(&self) -> &anyhow::Error {
        match self {
            EngineError::Compilation { cause, .. } | EngineError::Execution { cause, .. } => cause,
        }
    }
}
