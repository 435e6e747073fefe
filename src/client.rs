use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::fmt;
use std::time::Duration;
use tracing::debug;

use crate::error::{CompletionError, ConfigError};
use crate::models::{ChatCompletion, ChatRequest};

pub const API_KEY_ENV: &str = "OPENAI_API_KEY";
pub const BASE_URL_ENV: &str = "OPENAI_API_BASE_URL";
pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

// Endpoint identity that goes into every cache key.
// The credential is fingerprinted so keys never leak the raw secret.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BackendIdentity {
    pub base_url: String,
    pub credential_fingerprint: String,
}

impl BackendIdentity {
    pub fn new(base_url: &str, api_key: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(api_key.as_bytes());
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credential_fingerprint: format!("{:x}", hasher.finalize()),
        }
    }
}

// API key + base url, explicit values win over the environment
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub base_url: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl Credentials {
    pub fn resolve(api_key: Option<String>, base_url: Option<String>) -> Result<Self, ConfigError> {
        Self::resolve_with(api_key, base_url, |name| std::env::var(name).ok())
    }

    pub fn resolve_with(
        api_key: Option<String>,
        base_url: Option<String>,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let api_key = api_key
            .filter(|k| !k.is_empty())
            .or_else(|| env(API_KEY_ENV).filter(|k| !k.is_empty()))
            .ok_or_else(|| {
                ConfigError::MissingCredentials(format!(
                    "no api key given and {API_KEY_ENV} is not set"
                ))
            })?;

        let base_url = base_url
            .filter(|u| !u.is_empty())
            .or_else(|| env(BASE_URL_ENV).filter(|u| !u.is_empty()))
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());

        Ok(Self {
            api_key,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn identity(&self) -> BackendIdentity {
        BackendIdentity::new(&self.base_url, &self.api_key)
    }
}

// Remote completion endpoint the batcher talks to
#[async_trait]
pub trait CompletionBackend: Send + Sync {
    fn identity(&self) -> BackendIdentity;

    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, CompletionError>;
}

// OpenAI compatible chat completions client (OpenAI, vLLM, DeepSeek, ...)
#[derive(Clone, Debug)]
pub struct OpenAiClient {
    client: reqwest::Client,
    credentials: Credentials,
}

impl OpenAiClient {
    pub fn new(credentials: Credentials, timeout: Duration) -> Result<Self, ConfigError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid {
                field: "http_client".to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self::with_client(client, credentials))
    }

    pub fn with_client(client: reqwest::Client, credentials: Credentials) -> Self {
        Self {
            client,
            credentials,
        }
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.client
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    pub fn endpoint(&self, path: &str) -> String {
        format!("{}/{}", self.credentials.base_url, path.trim_start_matches('/'))
    }
}

#[async_trait]
impl CompletionBackend for OpenAiClient {
    fn identity(&self) -> BackendIdentity {
        self.credentials.identity()
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatCompletion, CompletionError> {
        let url = self.endpoint("chat/completions");
        debug!(%url, model = %request.model, "sending chat completion");

        let res = self
            .client
            .post(&url)
            .bearer_auth(&self.credentials.api_key)
            .json(request)
            .send()
            .await?;

        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            return Err(CompletionError::Status {
                status: status.as_u16(),
                body,
            });
        }

        res.json::<ChatCompletion>()
            .await
            .map_err(|e| CompletionError::Decode(e.to_string()))
    }
}
