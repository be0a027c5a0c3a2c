use std::sync::Arc;
use std::time::Instant;

use tokio_util::sync::CancellationToken;

use crate::api::{Evaluation, EvaluationResult, JobService};
use crate::config::Config;
use crate::error::EvaluationError;
use crate::sandbox::{ContainerRuntime, SandboxRunner};
use crate::telemetry::{Event, EventKind, Outcome, Telemetry};

/// States of the polling loop
#[derive(Debug)]
enum LoopState {
    Idle,
    Allocating,
    Dispatching(Vec<Evaluation>),
    Sleeping,
    Terminated,
}

/// Claims evaluations from the grading service and runs them one at a time
pub struct Worker<S: JobService, R: ContainerRuntime> {
    service: Arc<S>,
    runner: SandboxRunner<R>,
    config: Arc<Config>,
    telemetry: Arc<dyn Telemetry>,
}

impl<S: JobService, R: ContainerRuntime> Worker<S, R> {
    pub fn new(
        service: Arc<S>,
        runtime: Arc<R>,
        config: Arc<Config>,
        telemetry: Arc<dyn Telemetry>,
    ) -> Self {
        let runner = SandboxRunner::new(runtime, Arc::clone(&config));
        Self {
            service,
            runner,
            config,
            telemetry,
        }
    }

    /// Polls until the token is cancelled, or exactly once in one-shot mode.
    ///
    /// Cancellation is observed at the start of each iteration and during the
    /// sleep between iterations; an evaluation that is already running is
    /// always finished first.
    pub async fn run(&self, token: CancellationToken) {
        log::info!(
            "Worker started (poll interval {}s, one-shot: {})",
            self.config.poll_interval.as_secs_f64(),
            self.config.one_shot
        );

        // One-shot mode always runs its single cycle, even if already cancelled
        let mut state = if self.config.one_shot {
            LoopState::Allocating
        } else {
            LoopState::Idle
        };
        loop {
            state = match state {
                LoopState::Idle if token.is_cancelled() => LoopState::Terminated,
                LoopState::Idle => LoopState::Allocating,
                LoopState::Allocating => LoopState::Dispatching(self.allocate_evaluations().await),
                LoopState::Dispatching(evaluations) => {
                    self.on_allocate(evaluations).await;
                    if self.config.one_shot {
                        LoopState::Terminated
                    } else {
                        LoopState::Sleeping
                    }
                }
                LoopState::Sleeping => {
                    tokio::select! {
                        _ = token.cancelled() => LoopState::Terminated,
                        _ = tokio::time::sleep(self.config.poll_interval) => LoopState::Idle,
                    }
                }
                LoopState::Terminated => break,
            };
        }

        log::info!("Worker has shut down gracefully");
    }

    /// Claims pending evaluations; a failed claim counts as an empty one
    async fn allocate_evaluations(&self) -> Vec<Evaluation> {
        let started = Instant::now();
        let allocated = self.service.allocate().await;
        let elapsed = started.elapsed();

        self.telemetry.publish(Event {
            kind: EventKind::Allocate,
            evaluation_id: None,
            elapsed,
            outcome: Outcome::from_result(&allocated),
        });

        match allocated {
            Ok(evaluations) => {
                if !evaluations.is_empty() {
                    log::info!("Allocated {} evaluation(s)", evaluations.len());
                }
                evaluations
            }
            Err(e) => {
                log::error!("Failed to allocate evaluations: {e}");
                self.telemetry.publish(Event {
                    kind: EventKind::AllocateFail,
                    evaluation_id: None,
                    elapsed,
                    outcome: Outcome::Failure(e.to_string()),
                });
                Vec::new()
            }
        }
    }

    async fn on_allocate(&self, evaluations: Vec<Evaluation>) {
        for evaluation in evaluations {
            self.on_evaluation(evaluation).await;
        }
    }

    /// Evaluates one evaluation and reports its result
    async fn on_evaluation(&self, mut evaluation: Evaluation) {
        let id = evaluation.id;

        let started = Instant::now();
        let evaluated = self.evaluate(&mut evaluation).await;
        self.telemetry.publish(Event {
            kind: EventKind::Evaluate,
            evaluation_id: Some(id),
            elapsed: started.elapsed(),
            outcome: Outcome::from_result(&evaluated),
        });

        match evaluated {
            Ok(result) => {
                log::info!("Evaluation {id} finished with exit code {}", result.exit_code);
                evaluation.apply(result);
            }
            Err(e) if e.is_job_fault() => {
                log::warn!("Evaluation {id} cannot be run, reporting failure: {e}");
                evaluation.apply(EvaluationResult::failure(&e));
            }
            Err(e) => {
                log::error!("Evaluation {id} failed, leaving it for re-allocation: {e}");
                return;
            }
        }

        let started = Instant::now();
        let saved = self.service.save(&evaluation).await;
        self.telemetry.publish(Event {
            kind: EventKind::Save,
            evaluation_id: Some(id),
            elapsed: started.elapsed(),
            outcome: Outcome::from_result(&saved),
        });

        if let Err(e) = saved {
            log::error!("Failed to save result of evaluation {id}: {e}");
        }
    }

    async fn evaluate(
        &self,
        evaluation: &mut Evaluation,
    ) -> Result<EvaluationResult, EvaluationError> {
        // Reject unknown languages before downloading anything
        evaluation.language()?;
        let package = evaluation.package(self.service.as_ref()).await?;
        self.runner.run(evaluation, package).await
    }
}
