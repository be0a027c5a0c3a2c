use std::sync::Arc;

use bytes::Bytes;

use crate::api::{Evaluation, EvaluationResult};
use crate::archive::{self, TarStream};
use crate::config::Config;
use crate::error::{ContainerRuntimeError, EvaluationError};

use super::runtime::{ContainerRuntime, ContainerState, RuntimeResult};
use super::{HOME_PATH, REPORT_PATH};

/// Runs evaluations inside throwaway containers
///
/// Each call to [`SandboxRunner::run`] creates exactly one container and
/// deletes it again before returning, whatever step fails in between.
pub struct SandboxRunner<R: ContainerRuntime> {
    runtime: Arc<R>,
    config: Arc<Config>,
}

impl<R: ContainerRuntime> SandboxRunner<R> {
    pub fn new(runtime: Arc<R>, config: Arc<Config>) -> Self {
        Self { runtime, config }
    }

    pub fn runtime(&self) -> &Arc<R> {
        &self.runtime
    }

    /// Main entry point for running an evaluation
    pub async fn run(
        &self,
        evaluation: &Evaluation,
        package: Bytes,
    ) -> Result<EvaluationResult, EvaluationError> {
        let language = evaluation.language()?;
        let image = self.config.image_for(language);

        // Step 1: Make sure the image exists and create the container
        self.runtime.ensure_image(&image).await?;
        let id = self.runtime.create(&image).await?;
        log::debug!(
            "Created container {id} from {image} for evaluation {}",
            evaluation.id
        );

        // Step 2: Run the package; the container is deleted whatever happens
        let container = ContainerHandle::new(Arc::clone(&self.runtime), id);
        let outcome = self.execute(container.id(), package).await;
        let cleanup = container.release().await;

        match (outcome, cleanup) {
            (outcome, Ok(())) => outcome,
            (Ok(result), Err(e)) => {
                log::warn!(
                    "Evaluation {} finished but its container was not removed: {e}",
                    evaluation.id
                );
                Ok(result)
            }
            (Err(err), Err(e)) => {
                log::warn!(
                    "Evaluation {} failed and its container was not removed: {e}",
                    evaluation.id
                );
                Err(err)
            }
        }
    }

    async fn execute(&self, id: &str, package: Bytes) -> Result<EvaluationResult, EvaluationError> {
        self.copy_package(id, package).await?;
        self.runtime.start(id).await?;

        let state = match self.config.execution_timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait_for_exit(id))
                .await
                .map_err(|_| ContainerRuntimeError::Timeout(limit))??,
            None => self.wait_for_exit(id).await?,
        };
        log::debug!("Container {id} exited with code {}", state.exit_code);

        let logs = self.runtime.logs(id).await?;
        let test_report = self.extract_test_report(id).await?;

        Ok(EvaluationResult {
            stdout: logs.stdout,
            stderr: logs.stderr,
            test_report,
            exit_code: state.exit_code,
        })
    }

    /// Streams the package, converted to tar, into the container's home
    async fn copy_package(&self, id: &str, package: Bytes) -> Result<(), EvaluationError> {
        let (body, failure) = TarStream::new(package)?.into_body();
        let copied = self.runtime.copy_in(id, HOME_PATH, body).await;

        // A transcoding failure truncates the body, so it explains any copy error
        if let Some(err) = failure.take() {
            return Err(err.into());
        }
        copied.map_err(EvaluationError::from)
    }

    async fn wait_for_exit(&self, id: &str) -> RuntimeResult<ContainerState> {
        loop {
            let state = self.runtime.state(id).await?;
            if !state.running {
                return Ok(state);
            }
            self.runtime.wait(id).await?;
        }
    }

    async fn extract_test_report(&self, id: &str) -> RuntimeResult<Option<Vec<u8>>> {
        let Some(archive) = self.runtime.copy_out(id, REPORT_PATH).await? else {
            log::debug!("Container {id} produced no report");
            return Ok(None);
        };

        match archive::first_entry(&archive) {
            Ok(report) => Ok(report),
            Err(e) => {
                log::warn!("Unreadable report archive from container {id}: {e}");
                Ok(None)
            }
        }
    }
}

/// Exclusive ownership of a created container
///
/// Must be consumed with [`ContainerHandle::release`]. A handle dropped
/// without release (e.g. the evaluation future was aborted) schedules the
/// delete on the current runtime instead.
struct ContainerHandle<R: ContainerRuntime> {
    runtime: Arc<R>,
    id: String,
    released: bool,
}

impl<R: ContainerRuntime> ContainerHandle<R> {
    fn new(runtime: Arc<R>, id: String) -> Self {
        Self {
            runtime,
            id,
            released: false,
        }
    }

    fn id(&self) -> &str {
        &self.id
    }

    async fn release(mut self) -> RuntimeResult<()> {
        self.released = true;
        let result = self.runtime.delete(&self.id).await;
        if result.is_ok() {
            log::debug!("Removed container {}", self.id);
        }
        result
    }
}

impl<R: ContainerRuntime> Drop for ContainerHandle<R> {
    fn drop(&mut self) {
        if self.released {
            return;
        }

        let runtime = Arc::clone(&self.runtime);
        let id = std::mem::take(&mut self.id);
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                log::warn!("Container {id} abandoned mid-evaluation, scheduling removal");
                handle.spawn(async move {
                    if let Err(e) = runtime.delete(&id).await {
                        log::error!("Failed to remove abandoned container {id}: {e}");
                    }
                });
            }
            Err(_) => log::error!("Container {id} abandoned outside of an async runtime"),
        }
    }
}
