use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use serde::de::DeserializeOwned;

use super::{Evaluation, JobService, SaveRequest};
use crate::config::{Config, Credentials};
use crate::error::ApiError;

const EVALUATIONS_PATH: &str = "courses/assessment/programming_evaluations";

const USER_EMAIL_HEADER: &str = "X-User-Email";
const USER_TOKEN_HEADER: &str = "X-User-Token";

/// [`JobService`] backed by the grading service's JSON API
pub struct HttpJobService {
    client: reqwest::Client,
    host: String,
    credentials: Credentials,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OneEvaluation {
    Wrapped { programming_evaluation: Evaluation },
    Bare(Evaluation),
}

#[derive(Deserialize)]
#[serde(untagged)]
enum EvaluationList {
    Wrapped {
        programming_evaluations: Vec<Evaluation>,
    },
    Bare(Vec<Evaluation>),
}

impl HttpJobService {
    pub fn new(config: &Config) -> Result<Self, ApiError> {
        let host = config.host.trim_end_matches('/').to_string();
        if !(host.starts_with("http://") || host.starts_with("https://")) {
            return Err(ApiError::InvalidHost {
                host,
                reason: "expected an http:// or https:// URL".to_string(),
            });
        }

        let client = reqwest::Client::builder()
            .user_agent(concat!("evaluator/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            host,
            credentials: config.credentials.clone(),
        })
    }

    /// Fails if the service host cannot be reached at all. Any HTTP response,
    /// including errors, counts as reachable.
    pub async fn check_reachable(&self) -> Result<(), ApiError> {
        self.client.get(&self.host).send().await?;
        Ok(())
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{EVALUATIONS_PATH}/{path}", self.host)
    }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        self.client
            .request(method, self.url(path))
            .header(USER_EMAIL_HEADER, &self.credentials.user_email)
            .header(USER_TOKEN_HEADER, &self.credentials.token)
    }

    async fn send(request: RequestBuilder) -> Result<Response, ApiError> {
        let response = request.send().await?;
        let status = response.status();
        let url = response.url().to_string();

        if status == StatusCode::UNAUTHORIZED {
            return Err(ApiError::Unauthorized { url });
        }
        if !status.is_success() {
            return Err(ApiError::Status {
                url,
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// Decodes a JSON body, mapping an empty or `null` body to `None`
    async fn json<T: DeserializeOwned>(response: Response) -> Result<Option<T>, ApiError> {
        let url = response.url().to_string();
        let body = response.bytes().await?;
        if body.iter().all(u8::is_ascii_whitespace) || body.as_ref() == b"null" {
            return Ok(None);
        }
        serde_json::from_slice(&body)
            .map(Some)
            .map_err(|source| ApiError::Decode { url, source })
    }
}

#[async_trait]
impl JobService for HttpJobService {
    async fn find(&self, id: u64) -> Result<Evaluation, ApiError> {
        let response = Self::send(self.request(Method::GET, &id.to_string())).await?;
        let url = response.url().to_string();

        match Self::json::<OneEvaluation>(response).await? {
            Some(OneEvaluation::Wrapped {
                programming_evaluation,
            }) => Ok(programming_evaluation),
            Some(OneEvaluation::Bare(evaluation)) => Ok(evaluation),
            None => Err(ApiError::Decode {
                url,
                source: serde::de::Error::custom("empty evaluation body"),
            }),
        }
    }

    async fn allocate(&self) -> Result<Vec<Evaluation>, ApiError> {
        let request = self
            .request(Method::POST, "allocate")
            .json(&serde_json::json!({}));
        let response = Self::send(request).await?;

        Ok(match Self::json::<EvaluationList>(response).await? {
            Some(EvaluationList::Wrapped {
                programming_evaluations,
            }) => programming_evaluations,
            Some(EvaluationList::Bare(evaluations)) => evaluations,
            None => Vec::new(),
        })
    }

    async fn save(&self, evaluation: &Evaluation) -> Result<(), ApiError> {
        let request = self
            .request(Method::PUT, &format!("{}/result", evaluation.id))
            .json(&SaveRequest::from(evaluation));
        Self::send(request).await?;
        Ok(())
    }

    async fn fetch_package(&self, id: u64) -> Result<Bytes, ApiError> {
        let response = Self::send(self.request(Method::GET, &format!("{id}/package"))).await?;
        Ok(response.bytes().await?)
    }
}
