//! Saga error types.

use std::fmt;
use std::time::Duration;

use common::SagaId;
use thiserror::Error;

/// Why a single step action failed.
#[derive(Debug)]
pub enum StepFailure<E> {
    /// The step returned an error.
    Error(E),

    /// The step did not finish within the step deadline.
    TimedOut(Duration),

    /// The step panicked.
    Panicked(String),
}

impl<E> StepFailure<E> {
    /// Returns the step's own error, if it returned one.
    pub fn error(&self) -> Option<&E> {
        match self {
            StepFailure::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn into_error(self) -> Option<E> {
        match self {
            StepFailure::Error(e) => Some(e),
            _ => None,
        }
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, StepFailure::TimedOut(_))
    }
}

impl<E: fmt::Display> fmt::Display for StepFailure<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepFailure::Error(e) => write!(f, "{e}"),
            StepFailure::TimedOut(d) => write!(f, "timed out after {}ms", d.as_millis()),
            StepFailure::Panicked(msg) => write!(f, "panicked: {msg}"),
        }
    }
}

/// A compensation that did not succeed.
#[derive(Debug)]
pub struct CompensationError<E> {
    pub step: &'static str,
    pub failure: StepFailure<E>,
}

impl<E: fmt::Display> fmt::Display for CompensationError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.step, self.failure)
    }
}

/// Errors returned by [`SagaEngine::execute`](crate::SagaEngine::execute).
#[derive(Debug, Error)]
pub enum SagaError<E> {
    /// A step failed and rollback ran.
    ///
    /// At least one compensation succeeded, or none was needed. Any that
    /// failed are kept in `compensation_errors`.
    #[error("Saga '{saga}' failed at step '{step}': {failure}")]
    ExecutionFailed {
        saga_id: SagaId,
        saga: &'static str,
        step: &'static str,
        failure: StepFailure<E>,
        compensated: Vec<&'static str>,
        compensation_errors: Vec<CompensationError<E>>,
    },

    /// A step failed and every compensation attempted failed too.
    ///
    /// Nothing was rolled back and the records need manual reconciliation.
    #[error(
        "Saga '{saga}' failed at step '{step}': {failure}; {} compensation(s) failed",
        .compensation_errors.len()
    )]
    CompensationFailed {
        saga_id: SagaId,
        saga: &'static str,
        step: &'static str,
        failure: StepFailure<E>,
        compensation_errors: Vec<CompensationError<E>>,
        compensated: Vec<&'static str>,
    },
}

impl<E> SagaError<E> {
    pub fn saga_id(&self) -> SagaId {
        match self {
            SagaError::ExecutionFailed { saga_id, .. }
            | SagaError::CompensationFailed { saga_id, .. } => *saga_id,
        }
    }

    /// Name of the step whose `execute` failed.
    pub fn failed_step(&self) -> &'static str {
        match self {
            SagaError::ExecutionFailed { step, .. }
            | SagaError::CompensationFailed { step, .. } => step,
        }
    }

    /// The original step failure.
    pub fn failure(&self) -> &StepFailure<E> {
        match self {
            SagaError::ExecutionFailed { failure, .. }
            | SagaError::CompensationFailed { failure, .. } => failure,
        }
    }

    pub fn into_failure(self) -> StepFailure<E> {
        match self {
            SagaError::ExecutionFailed { failure, .. }
            | SagaError::CompensationFailed { failure, .. } => failure,
        }
    }

    /// Steps that were rolled back successfully, in rollback order.
    pub fn compensated(&self) -> &[&'static str] {
        match self {
            SagaError::ExecutionFailed { compensated, .. }
            | SagaError::CompensationFailed { compensated, .. } => compensated,
        }
    }

    /// Compensations that did not succeed, in rollback order.
    pub fn compensation_errors(&self) -> &[CompensationError<E>] {
        match self {
            SagaError::ExecutionFailed {
                compensation_errors,
                ..
            }
            | SagaError::CompensationFailed {
                compensation_errors,
                ..
            } => compensation_errors,
        }
    }

    pub fn is_compensation_failure(&self) -> bool {
        matches!(self, SagaError::CompensationFailed { .. })
    }

    /// Returns true if any compensation failed, so rollback did not converge.
    pub fn is_partially_rolled_back(&self) -> bool {
        !self.compensation_errors().is_empty()
    }
}
