//! Saga step trait and step lists.

use async_trait::async_trait;

use crate::context::SagaContext;

/// One local step of a saga.
///
/// `O` is the type steps record into the [`SagaContext`], `E` the error a
/// step fails with.
#[async_trait]
pub trait SagaStep<O, E>: Send + Sync {
    /// Step name used in logs, errors and as the context output key.
    fn name(&self) -> &'static str;

    /// Performs the step.
    async fn execute(&self, ctx: &mut SagaContext<O>) -> Result<(), E>;

    /// Undoes a step whose `execute` succeeded.
    ///
    /// Must be idempotent: it may run after a partial commit, so it should
    /// act on what is recorded in the context and the ledger rather than
    /// assume a clean prior state.
    async fn compensate(&self, ctx: &mut SagaContext<O>) -> Result<(), E>;

    /// Returns false for steps that have nothing to undo.
    ///
    /// Such steps are skipped during rollback and their `compensate` is
    /// never called.
    fn is_compensable(&self) -> bool {
        true
    }
}

/// A named, ordered list of steps.
pub struct Saga<O, E> {
    name: &'static str,
    steps: Vec<Box<dyn SagaStep<O, E>>>,
}

impl<O, E> Saga<O, E> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            steps: Vec::new(),
        }
    }

    /// Appends a step.
    pub fn step(mut self, step: impl SagaStep<O, E> + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Returns the step names in execution order.
    pub fn step_names(&self) -> Vec<&'static str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    pub(crate) fn into_steps(self) -> Vec<Box<dyn SagaStep<O, E>>> {
        self.steps
    }
}

impl<O, E> std::fmt::Debug for Saga<O, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Saga")
            .field("name", &self.name)
            .field("steps", &self.step_names())
            .finish()
    }
}
