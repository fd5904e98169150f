//! Saga execution engine.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::time::{Duration, Instant};

use futures_util::FutureExt;
use tracing::Instrument;

use crate::context::SagaContext;
use crate::error::{CompensationError, SagaError, StepFailure};
use crate::step::{Saga, SagaStep};

/// Deadline applied to each step's `execute` unless configured otherwise.
pub const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(5);

/// Step name reported when the task running a saga dies outside any step.
const RUN_TASK: &str = "saga_task";

/// Runs sagas: steps in order, then reverse-order compensation on failure.
///
/// The engine keeps no state between runs and can be shared freely.
///
/// Failure handling:
/// - A step returning `Err` is expected to have cleaned up its own partial
///   work; only the steps that completed before it are compensated.
/// - A step that times out or panics may have been interrupted halfway, so
///   it is compensated too (first), before the completed steps.
/// - Each run executes on its own task. Dropping the future returned by
///   [`SagaEngine::execute`] detaches the run without cancelling it, so
///   forward execution and any rollback still finish.
#[derive(Debug, Clone, Copy)]
pub struct SagaEngine {
    step_timeout: Duration,
}

impl Default for SagaEngine {
    fn default() -> Self {
        Self::new()
    }
}

type BoxedStep<O, E> = Box<dyn SagaStep<O, E>>;

struct Rollback<E> {
    compensated: Vec<&'static str>,
    errors: Vec<CompensationError<E>>,
}

impl SagaEngine {
    pub fn new() -> Self {
        Self::with_step_timeout(DEFAULT_STEP_TIMEOUT)
    }

    pub fn with_step_timeout(step_timeout: Duration) -> Self {
        Self { step_timeout }
    }

    pub fn step_timeout(&self) -> Duration {
        self.step_timeout
    }

    /// Executes a saga and returns its context on success.
    ///
    /// An empty saga succeeds without doing anything.
    #[tracing::instrument(
        skip(self, saga),
        fields(saga = saga.name(), saga_id = tracing::field::Empty)
    )]
    pub async fn execute<O, E>(&self, saga: Saga<O, E>) -> Result<SagaContext<O>, SagaError<E>>
    where
        O: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let name = saga.name();
        let ctx = SagaContext::new(name);
        let saga_id = ctx.saga_id();
        tracing::Span::current().record("saga_id", tracing::field::display(saga_id));

        let engine = *self;
        let run = engine.run(saga, ctx).in_current_span();
        match tokio::spawn(run).await {
            Ok(result) => result,
            Err(join_error) => {
                metrics::counter!("saga_compensation_failures_total", "saga" => name)
                    .increment(1);
                tracing::error!(
                    %saga_id,
                    error = %join_error,
                    "saga task died, manual reconciliation required"
                );
                let failure = || StepFailure::Panicked(join_error.to_string());
                Err(SagaError::CompensationFailed {
                    saga_id,
                    saga: name,
                    step: RUN_TASK,
                    failure: failure(),
                    compensation_errors: vec![CompensationError {
                        step: RUN_TASK,
                        failure: failure(),
                    }],
                    compensated: Vec::new(),
                })
            }
        }
    }

    /// Runs the steps and, on failure, the rollback.
    async fn run<O, E>(
        self,
        saga: Saga<O, E>,
        mut ctx: SagaContext<O>,
    ) -> Result<SagaContext<O>, SagaError<E>>
    where
        O: Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let name = saga.name();
        let saga_id = ctx.saga_id();
        metrics::counter!("saga_executions_total", "saga" => name).increment(1);
        let saga_start = Instant::now();

        let mut completed: Vec<BoxedStep<O, E>> = Vec::new();

        for step in saga.into_steps() {
            let step_name = step.name();
            tracing::info!(step = step_name, "saga step started");

            let failure = match self.run_step(step.as_ref(), &mut ctx).await {
                Ok(()) => {
                    tracing::info!(step = step_name, "saga step completed");
                    ctx.mark_completed(step_name);
                    completed.push(step);
                    continue;
                }
                Err(failure) => failure,
            };

            tracing::warn!(step = step_name, error = %failure, "saga step failed, compensating");

            // An interrupted step may have committed part of its work.
            if !matches!(failure, StepFailure::Error(_)) {
                completed.push(step);
            }

            let rollback = Self::rollback(&completed, &mut ctx).await;

            metrics::histogram!("saga_duration_seconds", "saga" => name)
                .record(saga_start.elapsed().as_secs_f64());
            metrics::counter!("saga_failed", "saga" => name).increment(1);

            if rollback.errors.is_empty() {
                tracing::warn!(
                    %saga_id,
                    step = step_name,
                    compensated = ?rollback.compensated,
                    "saga failed"
                );
                return Err(SagaError::ExecutionFailed {
                    saga_id,
                    saga: name,
                    step: step_name,
                    failure,
                    compensated: rollback.compensated,
                    compensation_errors: Vec::new(),
                });
            }

            metrics::counter!("saga_compensation_failures_total", "saga" => name)
                .increment(rollback.errors.len() as u64);
            let errors: Vec<String> = rollback.errors.iter().map(ToString::to_string).collect();
            tracing::error!(
                %saga_id,
                step = step_name,
                error = %failure,
                compensation_errors = ?errors,
                compensated = ?rollback.compensated,
                "saga compensation failed, manual reconciliation required"
            );

            if rollback.compensated.is_empty() {
                return Err(SagaError::CompensationFailed {
                    saga_id,
                    saga: name,
                    step: step_name,
                    failure,
                    compensation_errors: rollback.errors,
                    compensated: rollback.compensated,
                });
            }
            return Err(SagaError::ExecutionFailed {
                saga_id,
                saga: name,
                step: step_name,
                failure,
                compensated: rollback.compensated,
                compensation_errors: rollback.errors,
            });
        }

        let duration = saga_start.elapsed().as_secs_f64();
        metrics::histogram!("saga_duration_seconds", "saga" => name).record(duration);
        metrics::counter!("saga_completed", "saga" => name).increment(1);
        tracing::info!(%saga_id, duration, "saga completed successfully");

        Ok(ctx)
    }

    /// Runs one step's `execute` under the step deadline.
    async fn run_step<O, E>(
        &self,
        step: &dyn SagaStep<O, E>,
        ctx: &mut SagaContext<O>,
    ) -> Result<(), StepFailure<E>>
    where
        O: Send,
    {
        let attempt = tokio::time::timeout(self.step_timeout, step.execute(ctx));
        match AssertUnwindSafe(attempt).catch_unwind().await {
            Ok(Ok(Ok(()))) => Ok(()),
            Ok(Ok(Err(e))) => Err(StepFailure::Error(e)),
            Ok(Err(_elapsed)) => Err(StepFailure::TimedOut(self.step_timeout)),
            Err(panic) => Err(StepFailure::Panicked(panic_message(panic))),
        }
    }

    /// Compensates `steps` in reverse order.
    ///
    /// Every compensation is attempted even if an earlier one fails.
    async fn rollback<O, E>(steps: &[BoxedStep<O, E>], ctx: &mut SagaContext<O>) -> Rollback<E>
    where
        O: Send,
    {
        let mut compensated = Vec::new();
        let mut errors = Vec::new();

        for step in steps.iter().rev() {
            let step_name = step.name();
            if !step.is_compensable() {
                tracing::debug!(step = step_name, "step has no compensation, skipping");
                continue;
            }

            tracing::info!(step = step_name, "compensating saga step");
            let attempt = AssertUnwindSafe(step.compensate(ctx)).catch_unwind();
            let failure = match attempt.await {
                Ok(Ok(())) => {
                    compensated.push(step_name);
                    continue;
                }
                Ok(Err(e)) => StepFailure::Error(e),
                Err(panic) => StepFailure::Panicked(panic_message(panic)),
            };

            errors.push(CompensationError {
                step: step_name,
                failure,
            });
        }

        Rollback {
            compensated,
            errors,
        }
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(msg) = payload.downcast_ref::<&str>() {
        (*msg).to_string()
    } else if let Some(msg) = payload.downcast_ref::<String>() {
        msg.clone()
    } else {
        "unknown panic".to_string()
    }
}
