#![allow(dead_code)]

use std::collections::{HashMap, VecDeque};
use std::io::{Cursor, Read, Write};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use futures::stream::BoxStream;
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use zip::write::SimpleFileOptions;

use evaluator::api::{Evaluation, JobService};
use evaluator::config::{Config, Credentials};
use evaluator::error::{ApiError, ContainerRuntimeError};
use evaluator::sandbox::{ContainerLogs, ContainerRuntime, ContainerState, RuntimeResult};
use evaluator::telemetry::{Event, EventKind, Telemetry};

pub const TEST_HOST: &str = "http://localhost:3000";

pub fn credentials() -> Credentials {
    Credentials {
        user_email: "test@example.org".to_string(),
        token: "abcd".to_string(),
    }
}

pub fn test_config() -> Config {
    let mut config = Config::new(TEST_HOST, credentials());
    config.poll_interval = Duration::from_millis(10);
    config
}

// Helper function to build an in-memory zip package
pub fn build_zip(dirs: &[&str], files: &[(&str, &[u8])]) -> Bytes {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for dir in dirs {
        writer
            .add_directory(*dir, SimpleFileOptions::default())
            .unwrap();
    }
    for (name, content) in files {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .unwrap();
        writer.write_all(content).unwrap();
    }
    Bytes::from(writer.finish().unwrap().into_inner())
}

pub fn python_package() -> Bytes {
    build_zip(
        &["tests/"],
        &[
            ("solution.py", b"def add(a, b):\n    return a + b\n"),
            (
                "tests/test_solution.py",
                b"from solution import add\n\ndef test_add():\n    assert add(1, 1) == 2\n",
            ),
        ],
    )
}

/// A stored zip whose first entry claims more bytes than it holds
pub fn size_mismatched_package() -> Bytes {
    let stored = SimpleFileOptions::default().compression_method(zip::CompressionMethod::Stored);
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    writer.start_file("solution.py", stored).unwrap();
    writer.write_all(b"print(1)").unwrap();
    writer.start_file("tests/test_solution.py", stored).unwrap();
    writer.write_all(b"import solution").unwrap();
    let mut raw = writer.finish().unwrap().into_inner();

    let declared = 600u32.to_le_bytes();
    raw[22..26].copy_from_slice(&declared);
    let central = raw.windows(4).position(|w| w == b"PK\x01\x02").unwrap();
    raw[central + 24..central + 28].copy_from_slice(&declared);
    Bytes::from(raw)
}

pub fn tar_entries(archive: &[u8]) -> Vec<(String, Vec<u8>)> {
    let mut archive = tar::Archive::new(archive);
    archive
        .entries()
        .unwrap()
        .map(|entry| {
            let mut entry = entry.unwrap();
            let path = entry.path().unwrap().to_string_lossy().into_owned();
            let mut content = Vec::new();
            entry.read_to_end(&mut content).unwrap();
            (path, content)
        })
        .collect()
}

fn single_file_tar(name: &str, content: &[u8]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    let mut header = tar::Header::new_gnu();
    header.set_size(content.len() as u64);
    header.set_mode(0o644);
    builder.append_data(&mut header, name, content).unwrap();
    builder.into_inner().unwrap()
}

/// Container runtime operations, in the order a run issues them
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    EnsureImage,
    Create,
    CopyIn,
    Start,
    Wait,
    State,
    Logs,
    CopyOut,
    Delete,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    EnsureImage(String),
    Create(String),
    CopyIn { id: String, path: String },
    Start(String),
    Wait(String),
    State(String),
    Logs(String),
    CopyOut { id: String, path: String },
    Delete(String),
    ListStale,
}

/// Container runtime that records every call and never touches docker
pub struct FakeRuntime {
    calls: Mutex<Vec<Call>>,
    uploads: Mutex<Vec<Vec<u8>>>,
    fail_at: Option<Step>,
    stdout: Vec<u8>,
    stderr: Vec<u8>,
    exit_code: i64,
    report: Option<Vec<u8>>,
    running_polls: AtomicUsize,
    running_for: usize,
    hang: bool,
    stale: Vec<String>,
    next_id: AtomicUsize,
}

impl FakeRuntime {
    pub fn new() -> Self {
        Self {
            calls: Mutex::new(Vec::new()),
            uploads: Mutex::new(Vec::new()),
            fail_at: None,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: 0,
            report: None,
            running_polls: AtomicUsize::new(0),
            running_for: 0,
            hang: false,
            stale: Vec::new(),
            next_id: AtomicUsize::new(1),
        }
    }

    pub fn failing_at(mut self, step: Step) -> Self {
        self.fail_at = Some(step);
        self
    }

    pub fn with_output(mut self, stdout: &[u8], stderr: &[u8], exit_code: i64) -> Self {
        self.stdout = stdout.to_vec();
        self.stderr = stderr.to_vec();
        self.exit_code = exit_code;
        self
    }

    pub fn with_report(mut self, report: &[u8]) -> Self {
        self.report = Some(report.to_vec());
        self
    }

    /// Reports the container as running for the first `polls` state queries
    /// of each container
    pub fn running_for(mut self, polls: usize) -> Self {
        self.running_for = polls;
        self
    }

    /// Containers never exit and waiting on them never returns
    pub fn hanging(mut self) -> Self {
        self.hang = true;
        self
    }

    pub fn with_stale(mut self, ids: &[&str]) -> Self {
        self.stale = ids.iter().map(|id| id.to_string()).collect();
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn created(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Create(image) => Some(image.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.calls
            .lock()
            .iter()
            .filter_map(|call| match call {
                Call::Delete(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn count(&self, step: Step) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|call| {
                matches!(
                    (call, step),
                    (Call::EnsureImage(_), Step::EnsureImage)
                        | (Call::Create(_), Step::Create)
                        | (Call::CopyIn { .. }, Step::CopyIn)
                        | (Call::Start(_), Step::Start)
                        | (Call::Wait(_), Step::Wait)
                        | (Call::State(_), Step::State)
                        | (Call::Logs(_), Step::Logs)
                        | (Call::CopyOut { .. }, Step::CopyOut)
                        | (Call::Delete(_), Step::Delete)
                )
            })
            .count()
    }

    /// Tar archives received by `copy_in`, in order
    pub fn uploads(&self) -> Vec<Vec<u8>> {
        self.uploads.lock().clone()
    }

    fn record(&self, call: Call, step: Step) -> RuntimeResult<()> {
        self.calls.lock().push(call);
        if self.fail_at == Some(step) {
            return Err(ContainerRuntimeError::Engine {
                operation: "fake",
                message: format!("injected failure at {step:?}"),
            });
        }
        Ok(())
    }
}

#[async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn ensure_image(&self, image: &str) -> RuntimeResult<()> {
        self.record(Call::EnsureImage(image.to_string()), Step::EnsureImage)
    }

    async fn create(&self, image: &str) -> RuntimeResult<String> {
        self.record(Call::Create(image.to_string()), Step::Create)?;
        self.running_polls.store(0, Ordering::SeqCst);
        let n = self.next_id.fetch_add(1, Ordering::SeqCst);
        Ok(format!("container-{n}"))
    }

    async fn copy_in(
        &self,
        id: &str,
        path: &str,
        archive: BoxStream<'static, Bytes>,
    ) -> RuntimeResult<()> {
        let chunks: Vec<Bytes> = archive.collect().await;
        self.uploads.lock().push(chunks.concat());
        self.record(
            Call::CopyIn {
                id: id.to_string(),
                path: path.to_string(),
            },
            Step::CopyIn,
        )
    }

    async fn start(&self, id: &str) -> RuntimeResult<()> {
        self.record(Call::Start(id.to_string()), Step::Start)
    }

    async fn wait(&self, id: &str) -> RuntimeResult<()> {
        self.record(Call::Wait(id.to_string()), Step::Wait)?;
        if self.hang {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        Ok(())
    }

    async fn state(&self, id: &str) -> RuntimeResult<ContainerState> {
        self.record(Call::State(id.to_string()), Step::State)?;
        let polls = self.running_polls.fetch_add(1, Ordering::SeqCst);
        Ok(ContainerState {
            running: self.hang || polls < self.running_for,
            exit_code: self.exit_code,
        })
    }

    async fn logs(&self, id: &str) -> RuntimeResult<ContainerLogs> {
        self.record(Call::Logs(id.to_string()), Step::Logs)?;
        Ok(ContainerLogs {
            stdout: self.stdout.clone(),
            stderr: self.stderr.clone(),
        })
    }

    async fn copy_out(&self, id: &str, path: &str) -> RuntimeResult<Option<Vec<u8>>> {
        self.record(
            Call::CopyOut {
                id: id.to_string(),
                path: path.to_string(),
            },
            Step::CopyOut,
        )?;
        Ok(self
            .report
            .as_ref()
            .map(|report| single_file_tar("report.xml", report)))
    }

    async fn delete(&self, id: &str) -> RuntimeResult<()> {
        self.record(Call::Delete(id.to_string()), Step::Delete)
    }

    async fn list_stale(&self, _age: Duration) -> RuntimeResult<Vec<String>> {
        self.calls.lock().push(Call::ListStale);
        Ok(self.stale.clone())
    }
}

/// Job service that replays scripted allocations and records saves
pub struct FakeService {
    allocations: Mutex<VecDeque<Result<Vec<Evaluation>, ApiError>>>,
    packages: HashMap<u64, Bytes>,
    saved: Mutex<Vec<Evaluation>>,
    allocate_calls: AtomicUsize,
    package_fetches: AtomicUsize,
    save_calls: AtomicUsize,
    fail_saves: bool,
    exhausted: Option<CancellationToken>,
}

impl FakeService {
    pub fn new() -> Self {
        Self {
            allocations: Mutex::new(VecDeque::new()),
            packages: HashMap::new(),
            saved: Mutex::new(Vec::new()),
            allocate_calls: AtomicUsize::new(0),
            package_fetches: AtomicUsize::new(0),
            save_calls: AtomicUsize::new(0),
            fail_saves: false,
            exhausted: None,
        }
    }

    pub fn allocating(self, allocation: Result<Vec<Evaluation>, ApiError>) -> Self {
        self.allocations.lock().push_back(allocation);
        self
    }

    pub fn with_package(mut self, id: u64, package: Bytes) -> Self {
        self.packages.insert(id, package);
        self
    }

    pub fn failing_saves(mut self) -> Self {
        self.fail_saves = true;
        self
    }

    /// Cancels `token` once every scripted allocation has been handed out
    pub fn cancelling_when_exhausted(mut self, token: CancellationToken) -> Self {
        self.exhausted = Some(token);
        self
    }

    pub fn saved(&self) -> Vec<Evaluation> {
        self.saved.lock().clone()
    }

    pub fn saved_ids(&self) -> Vec<u64> {
        self.saved.lock().iter().map(|e| e.id).collect()
    }

    pub fn allocate_calls(&self) -> usize {
        self.allocate_calls.load(Ordering::SeqCst)
    }

    pub fn package_fetches(&self) -> usize {
        self.package_fetches.load(Ordering::SeqCst)
    }

    pub fn save_calls(&self) -> usize {
        self.save_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl JobService for FakeService {
    async fn find(&self, id: u64) -> Result<Evaluation, ApiError> {
        Err(ApiError::Status {
            url: format!("{TEST_HOST}/{id}"),
            status: 404,
        })
    }

    async fn allocate(&self) -> Result<Vec<Evaluation>, ApiError> {
        self.allocate_calls.fetch_add(1, Ordering::SeqCst);
        let next = self.allocations.lock().pop_front();
        match next {
            Some(allocation) => allocation,
            None => {
                if let Some(token) = &self.exhausted {
                    token.cancel();
                }
                Ok(Vec::new())
            }
        }
    }

    async fn save(&self, evaluation: &Evaluation) -> Result<(), ApiError> {
        self.save_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_saves {
            return Err(ApiError::Status {
                url: format!("{TEST_HOST}/{}/result", evaluation.id),
                status: 500,
            });
        }
        self.saved.lock().push(evaluation.clone());
        Ok(())
    }

    async fn fetch_package(&self, id: u64) -> Result<Bytes, ApiError> {
        self.package_fetches.fetch_add(1, Ordering::SeqCst);
        self.packages.get(&id).cloned().ok_or(ApiError::Status {
            url: format!("{TEST_HOST}/{id}/package"),
            status: 404,
        })
    }
}

/// Telemetry sink that keeps every event
#[derive(Default)]
pub struct RecordingTelemetry {
    events: Mutex<Vec<Event>>,
}

impl RecordingTelemetry {
    pub fn events(&self) -> Vec<Event> {
        self.events.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.events.lock().iter().map(|e| e.kind).collect()
    }
}

impl Telemetry for RecordingTelemetry {
    fn publish(&self, event: Event) {
        self.events.lock().push(event);
    }
}
