use crate::config::ClientSettings;
use crate::error::TransportError;
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt, TryStreamExt};
use reqwest::header::ACCEPT;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use url::Url;

/// Response body chunks in arrival order.
pub type ByteStream = BoxStream<'static, Result<Bytes, TransportError>>;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: String,
}

/// Body of the non-streaming chat endpoint.
///
/// Sources stay raw so one malformed element does not lose the answer.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatResponse {
    pub response: String,
    #[serde(default)]
    pub sources: Vec<Value>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Network side of an exchange. The bearer token is passed per call; the
/// transport never looks credentials up itself.
#[async_trait]
pub trait ChatTransport: Send + Sync {
    async fn open_stream(
        &self,
        request: &ChatRequest,
        token: Option<&str>,
    ) -> Result<ByteStream, TransportError>;

    async fn send(
        &self,
        request: &ChatRequest,
        token: Option<&str>,
    ) -> Result<ChatResponse, TransportError>;
}

#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: Url,
    stream_path: String,
    chat_path: String,
}

impl HttpTransport {
    pub fn new(base_url: Url) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .build()
            .map_err(TransportError::Request)?;
        Ok(Self::with_client(client, base_url))
    }

    /// Uses a caller-built client, e.g. one with proxies or timeouts configured.
    pub fn with_client(client: reqwest::Client, base_url: Url) -> Self {
        Self {
            client,
            base_url,
            stream_path: "/chat/stream".to_string(),
            chat_path: "/chat".to_string(),
        }
    }

    pub fn from_settings(settings: &ClientSettings) -> Result<Self, TransportError> {
        let mut transport = Self::new(settings.api_url.clone())?;
        transport.stream_path = settings.stream_path.clone();
        transport.chat_path = settings.chat_path.clone();
        Ok(transport)
    }

    fn endpoint(&self, path: &str) -> Result<Url, TransportError> {
        let joined = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            path.trim_start_matches('/')
        );
        Ok(Url::parse(&joined)?)
    }

    fn post(&self, url: Url, request: &ChatRequest, token: Option<&str>) -> reqwest::RequestBuilder {
        let builder = self.client.post(url).json(request);
        match token {
            Some(token) => builder.bearer_auth(token),
            None => builder,
        }
    }
}

#[async_trait]
impl ChatTransport for HttpTransport {
    async fn open_stream(
        &self,
        request: &ChatRequest,
        token: Option<&str>,
    ) -> Result<ByteStream, TransportError> {
        let url = self.endpoint(&self.stream_path)?;
        debug!(%url, authorized = token.is_some(), "opening chat stream");
        let response = self
            .post(url, request, token)
            .header(ACCEPT, "text/event-stream")
            .send()
            .await
            .map_err(TransportError::Request)?;
        let response = ensure_success(response).await?;
        Ok(response
            .bytes_stream()
            .map_err(|err| TransportError::Interrupted(err.to_string()))
            .boxed())
    }

    async fn send(
        &self,
        request: &ChatRequest,
        token: Option<&str>,
    ) -> Result<ChatResponse, TransportError> {
        let url = self.endpoint(&self.chat_path)?;
        debug!(%url, authorized = token.is_some(), "sending chat request");
        let response = self
            .post(url, request, token)
            .send()
            .await
            .map_err(TransportError::Request)?;
        let response = ensure_success(response).await?;
        let body = response
            .bytes()
            .await
            .map_err(|err| TransportError::Interrupted(err.to_string()))?;
        Ok(serde_json::from_slice(&body)?)
    }
}

async fn ensure_success(response: reqwest::Response) -> Result<reqwest::Response, TransportError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    Err(TransportError::Status {
        status: status.as_u16(),
        body,
    })
}
