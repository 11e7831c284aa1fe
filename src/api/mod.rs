use anyhow::{bail, Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Number;

pub mod types;

use types::{
    ErrorResponse, GenerationRequest, HealthResponse, ListResponse, MessageResponse,
    MultiplyRequest,
};

/// HTTP client for a running service.
pub struct Client {
    base_url: String,
    client: reqwest::Client,
}

impl Client {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            client: reqwest::Client::new(),
        }
    }

    /// Targets `LLM_SERVICE_HOST`, or the default listen address.
    pub fn from_env() -> Result<Self> {
        let config = crate::envconfig::Config::from_env()?;
        let host = match config.host.host.as_str() {
            "0.0.0.0" | "::" => "127.0.0.1".to_string(),
            h if h.contains(':') => format!("[{h}]"),
            h => h.to_string(),
        };
        Ok(Self::new(format!("http://{host}:{}", config.host.port)))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn llm(&self, request: &GenerationRequest) -> Result<String> {
        let response: MessageResponse = self.post("/llm", request).await?;
        Ok(response.message)
    }

    pub async fn multiply(&self, x: Number, y: Number) -> Result<String> {
        let response: MessageResponse = self.post("/multiply", &MultiplyRequest { x, y }).await?;
        Ok(response.message)
    }

    pub async fn models(&self) -> Result<ListResponse> {
        self.get("/models").await
    }

    pub async fn health(&self) -> Result<HealthResponse> {
        self.get("/health").await
    }

    async fn post<B, T>(&self, path: &str, body: &B) -> Result<T>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .with_context(|| format!("POST {url}"))?;
        decode(response).await
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let url = format!("{}{}", self.base_url, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET {url}"))?;
        decode(response).await
    }
}

async fn decode<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.error)
            .unwrap_or(text);
        bail!("{status}: {message}");
    }
    Ok(response.json().await?)
}
