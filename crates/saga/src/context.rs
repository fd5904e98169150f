//! Per-run saga context.

use std::collections::HashMap;

use common::SagaId;

/// State threaded through every step of one saga run.
///
/// Steps hold only their immutable parameters. Whatever a step produces that
/// its own compensation (or a later step) needs is recorded here under the
/// step's name, so rollback never depends on captured mutable state.
#[derive(Debug)]
pub struct SagaContext<O> {
    saga_id: SagaId,
    name: &'static str,
    outputs: HashMap<&'static str, O>,
    completed: Vec<&'static str>,
}

impl<O> SagaContext<O> {
    /// Creates a context for a new run of the named saga.
    pub fn new(name: &'static str) -> Self {
        Self {
            saga_id: SagaId::new(),
            name,
            outputs: HashMap::new(),
            completed: Vec::new(),
        }
    }

    pub fn saga_id(&self) -> SagaId {
        self.saga_id
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Records the output of a step, replacing any earlier value.
    pub fn record(&mut self, step: &'static str, output: O) {
        self.outputs.insert(step, output);
    }

    /// Returns the output recorded by a step, if it got that far.
    pub fn output(&self, step: &str) -> Option<&O> {
        self.outputs.get(step)
    }

    /// Removes and returns the output recorded by a step.
    pub fn take_output(&mut self, step: &str) -> Option<O> {
        self.outputs.remove(step)
    }

    /// Names of the steps whose `execute` succeeded, in execution order.
    pub fn completed_steps(&self) -> &[&'static str] {
        &self.completed
    }

    pub(crate) fn mark_completed(&mut self, step: &'static str) {
        self.completed.push(step);
    }
}
