mod http;

pub use http::HttpJobService;

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::error::{ApiError, EvaluationError};
use crate::language::Language;

/// Access to the grading service that hands out evaluations
#[async_trait]
pub trait JobService: Send + Sync {
    /// Retrieves one evaluation by id
    async fn find(&self, id: u64) -> Result<Evaluation, ApiError>;

    /// Claims zero or more pending evaluations for this worker
    async fn allocate(&self) -> Result<Vec<Evaluation>, ApiError>;

    /// Persists the output fields of an evaluation
    async fn save(&self, evaluation: &Evaluation) -> Result<(), ApiError>;

    /// Downloads the raw zip package of an evaluation
    async fn fetch_package(&self, id: u64) -> Result<Bytes, ApiError>;
}

/// A programming evaluation as handed out by the grading service
#[derive(Serialize, Deserialize, Debug, Clone, Default)]
pub struct Evaluation {
    pub id: u64,
    pub language: String,
    #[serde(default)]
    pub stdout: Option<String>,
    #[serde(default)]
    pub stderr: Option<String>,
    #[serde(default)]
    pub test_report: Option<String>,
    #[serde(default)]
    pub exit_code: Option<i64>,
    #[serde(skip)]
    package: Option<Bytes>,
}

impl Evaluation {
    pub fn new(id: u64, language: impl Into<String>) -> Self {
        Self {
            id,
            language: language.into(),
            ..Default::default()
        }
    }

    pub fn language(&self) -> Result<Language, EvaluationError> {
        self.language.parse()
    }

    /// Returns the package, downloading it on first access
    pub async fn package(&mut self, service: &dyn JobService) -> Result<Bytes, EvaluationError> {
        if let Some(package) = &self.package {
            return Ok(package.clone());
        }

        let package = service
            .fetch_package(self.id)
            .await
            .map_err(EvaluationError::Package)?;
        self.package = Some(package.clone());
        Ok(package)
    }

    /// Writes the result into the output fields
    pub fn apply(&mut self, result: EvaluationResult) {
        self.stdout = Some(String::from_utf8_lossy(&result.stdout).into_owned());
        self.stderr = Some(String::from_utf8_lossy(&result.stderr).into_owned());
        self.test_report = result
            .test_report
            .map(|report| String::from_utf8_lossy(&report).into_owned());
        self.exit_code = Some(result.exit_code);
        self.package = None;
    }

    /// Whether the output fields have been written
    pub fn is_evaluated(&self) -> bool {
        self.exit_code.is_some()
    }
}

/// Output of one evaluation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EvaluationResult {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
    pub test_report: Option<Vec<u8>>,
    pub exit_code: i64,
}

impl EvaluationResult {
    /// Exit code reported for evaluations that never produced a run
    pub const FAILURE_EXIT_CODE: i64 = -1;

    /// Result reported for a submission that could not be run at all
    pub fn failure(err: &EvaluationError) -> Self {
        Self {
            stdout: Vec::new(),
            stderr: err.to_string().into_bytes(),
            test_report: None,
            exit_code: Self::FAILURE_EXIT_CODE,
        }
    }
}

/// Body of the result upload
#[derive(Serialize, Debug)]
pub struct SaveRequest<'a> {
    pub programming_evaluation: SavePayload<'a>,
}

#[derive(Serialize, Debug)]
pub struct SavePayload<'a> {
    pub stdout: Option<&'a str>,
    pub stderr: Option<&'a str>,
    pub test_report: Option<&'a str>,
    pub exit_code: Option<i64>,
}

impl<'a> From<&'a Evaluation> for SaveRequest<'a> {
    fn from(evaluation: &'a Evaluation) -> Self {
        Self {
            programming_evaluation: SavePayload {
                stdout: evaluation.stdout.as_deref(),
                stderr: evaluation.stderr.as_deref(),
                test_report: evaluation.test_report.as_deref(),
                exit_code: evaluation.exit_code,
            },
        }
    }
}
