use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::ContainerRuntimeError;

pub type RuntimeResult<T> = Result<T, ContainerRuntimeError>;

/// Run state of a container as reported by the runtime
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ContainerState {
    pub running: bool,
    pub exit_code: i64,
}

/// Captured output streams of a finished container
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ContainerLogs {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

/// Control surface of the container engine used to run evaluations
///
/// Every call blocks the caller until the engine has answered. Containers
/// created through [`ContainerRuntime::create`] carry the evaluator label so
/// that [`ContainerRuntime::list_stale`] can find them again.
#[async_trait]
pub trait ContainerRuntime: Send + Sync + 'static {
    /// Makes sure the image exists locally, pulling it if missing
    async fn ensure_image(&self, image: &str) -> RuntimeResult<()>;

    /// Creates a stopped container and returns its id
    async fn create(&self, image: &str) -> RuntimeResult<String>;

    /// Extracts a tar stream into `path` inside the container
    async fn copy_in(
        &self,
        id: &str,
        path: &str,
        archive: BoxStream<'static, Bytes>,
    ) -> RuntimeResult<()>;

    async fn start(&self, id: &str) -> RuntimeResult<()>;

    /// Blocks until the container stops running, or the engine gives up waiting
    async fn wait(&self, id: &str) -> RuntimeResult<()>;

    async fn state(&self, id: &str) -> RuntimeResult<ContainerState>;

    async fn logs(&self, id: &str) -> RuntimeResult<ContainerLogs>;

    /// Returns `path` as a tar archive, or `None` if it does not exist
    async fn copy_out(&self, id: &str, path: &str) -> RuntimeResult<Option<Vec<u8>>>;

    /// Removes the container, stopping it first if needed
    async fn delete(&self, id: &str) -> RuntimeResult<()>;

    /// Ids of evaluator containers created more than `age` ago
    async fn list_stale(&self, age: Duration) -> RuntimeResult<Vec<String>>;
}
