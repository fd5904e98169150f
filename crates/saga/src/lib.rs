//! Generic saga execution engine.
//!
//! A saga is an ordered list of [`SagaStep`]s. The [`SagaEngine`] runs them
//! one at a time; if a step fails, every step that already completed is
//! compensated in reverse order and the original failure is returned.
//!
//! ```text
//! execute(a) ──► execute(b) ──► execute(c) ✗
//!                                   │
//!          compensate(a) ◄── compensate(b)
//! ```
//!
//! Compensation failures do not stop the rollback. They are collected on the
//! returned error. If every attempted compensation fails the run ends in
//! [`SagaError::CompensationFailed`], which signals that the affected records
//! need manual reconciliation.
//!
//! A run executes on its own task, so dropping the future returned by
//! [`SagaEngine::execute`] neither interrupts a step nor skips rollback.

pub mod context;
pub mod engine;
pub mod error;
pub mod step;

pub use common::SagaId;
pub use context::SagaContext;
pub use engine::{DEFAULT_STEP_TIMEOUT, SagaEngine};
pub use error::{CompensationError, SagaError, StepFailure};
pub use step::{Saga, SagaStep};
