//! Transports and helpers shared by the integration tests.

use async_trait::async_trait;
use bytes::Bytes;
use futures::channel::mpsc;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedReceiver;
use vectormind_core::{
    BusyPolicy, ByteStream, ChatRequest, ChatResponse, ChatTransport, ExchangeConfig,
    ExchangeController, ExchangeUpdate, SessionStore, TransportError,
};

pub const TEST_TOKEN: &str = "test-token";

/// A request as seen by a test transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SeenRequest {
    pub request: ChatRequest,
    pub token: Option<String>,
}

enum Ending {
    Close,
    Fail(String),
}

/// Replays a fixed list of body chunks for every streaming call.
pub struct ScriptedTransport {
    chunks: Vec<Bytes>,
    ending: Ending,
    status: Option<u16>,
    reply: Option<String>,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedTransport {
    pub fn new<I, C>(chunks: I) -> Self
    where
        I: IntoIterator<Item = C>,
        C: AsRef<[u8]>,
    {
        Self {
            chunks: chunks
                .into_iter()
                .map(|chunk| Bytes::copy_from_slice(chunk.as_ref()))
                .collect(),
            ending: Ending::Close,
            status: None,
            reply: None,
            seen: Mutex::new(Vec::new()),
        }
    }

    /// Every call fails with the given HTTP status.
    pub fn rejecting(status: u16) -> Self {
        Self {
            status: Some(status),
            ..Self::new(Vec::<Vec<u8>>::new())
        }
    }

    /// Ends the body with a connection error instead of a clean close.
    pub fn then_fail(mut self, reason: impl Into<String>) -> Self {
        self.ending = Ending::Fail(reason.into());
        self
    }

    /// JSON body returned by the non-streaming endpoint.
    pub fn with_reply(mut self, body: impl Into<String>) -> Self {
        self.reply = Some(body.into());
        self
    }

    pub fn seen(&self) -> Vec<SeenRequest> {
        self.seen.lock().clone()
    }

    fn record(&self, request: &ChatRequest, token: Option<&str>) -> Result<(), TransportError> {
        self.seen.lock().push(SeenRequest {
            request: request.clone(),
            token: token.map(str::to_string),
        });
        match self.status {
            Some(status) => Err(TransportError::Status {
                status,
                body: String::new(),
            }),
            None => Ok(()),
        }
    }
}

#[async_trait]
impl ChatTransport for ScriptedTransport {
    async fn open_stream(
        &self,
        request: &ChatRequest,
        token: Option<&str>,
    ) -> Result<ByteStream, TransportError> {
        self.record(request, token)?;
        let mut items: Vec<Result<Bytes, TransportError>> =
            self.chunks.iter().cloned().map(Ok).collect();
        if let Ending::Fail(reason) = &self.ending {
            items.push(Err(TransportError::Interrupted(reason.clone())));
        }
        Ok(stream::iter(items).boxed())
    }

    async fn send(
        &self,
        request: &ChatRequest,
        token: Option<&str>,
    ) -> Result<ChatResponse, TransportError> {
        self.record(request, token)?;
        let body = self.reply.as_deref().unwrap_or(r#"{"response":""}"#);
        Ok(serde_json::from_str(body)?)
    }
}

/// Test-side end of one streaming response.
pub struct Connection {
    tx: mpsc::UnboundedSender<Result<Bytes, TransportError>>,
}

impl Connection {
    pub fn chunk(&self, bytes: impl AsRef<[u8]>) {
        self.tx
            .unbounded_send(Ok(Bytes::copy_from_slice(bytes.as_ref())))
            .ok();
    }

    pub fn fail(&self, reason: impl Into<String>) {
        self.tx
            .unbounded_send(Err(TransportError::Interrupted(reason.into())))
            .ok();
    }
}

/// Hands out responses the test feeds chunk by chunk. Each `open_stream`
/// takes the oldest unclaimed [`Connection`].
#[derive(Default)]
pub struct ChannelTransport {
    pending: Mutex<VecDeque<mpsc::UnboundedReceiver<Result<Bytes, TransportError>>>>,
}

impl ChannelTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection(&self) -> Connection {
        let (tx, rx) = mpsc::unbounded();
        self.pending.lock().push_back(rx);
        Connection { tx }
    }
}

#[async_trait]
impl ChatTransport for ChannelTransport {
    async fn open_stream(
        &self,
        _request: &ChatRequest,
        _token: Option<&str>,
    ) -> Result<ByteStream, TransportError> {
        self.pending
            .lock()
            .pop_front()
            .map(|rx| rx.boxed())
            .ok_or_else(|| TransportError::Interrupted("no connection prepared".to_string()))
    }

    async fn send(
        &self,
        _request: &ChatRequest,
        _token: Option<&str>,
    ) -> Result<ChatResponse, TransportError> {
        Err(TransportError::Interrupted("not supported".to_string()))
    }
}

/// Never answers; exchanges stay in the sending state until cancelled.
pub struct PendingTransport;

#[async_trait]
impl ChatTransport for PendingTransport {
    async fn open_stream(
        &self,
        _request: &ChatRequest,
        _token: Option<&str>,
    ) -> Result<ByteStream, TransportError> {
        futures::future::pending().await
    }

    async fn send(
        &self,
        _request: &ChatRequest,
        _token: Option<&str>,
    ) -> Result<ChatResponse, TransportError> {
        futures::future::pending().await
    }
}

pub fn signed_in() -> Arc<SessionStore> {
    Arc::new(SessionStore::with_token(TEST_TOKEN))
}

pub fn controller(transport: Arc<dyn ChatTransport>) -> ExchangeController {
    controller_with(transport, signed_in(), BusyPolicy::CancelPrevious)
}

pub fn controller_with(
    transport: Arc<dyn ChatTransport>,
    session: Arc<SessionStore>,
    busy_policy: BusyPolicy,
) -> ExchangeController {
    ExchangeController::new(
        transport,
        session,
        ExchangeConfig {
            conversation_id: "default".to_string(),
            busy_policy,
        },
    )
}

/// Everything left on an update channel once its sender is gone.
pub async fn drain(mut rx: UnboundedReceiver<ExchangeUpdate>) -> Vec<ExchangeUpdate> {
    let mut updates = Vec::new();
    while let Some(update) = rx.recv().await {
        updates.push(update);
    }
    updates
}

/// Number of terminal updates (completed, failed or cancelled).
pub fn terminal_count(updates: &[ExchangeUpdate]) -> usize {
    updates
        .iter()
        .filter(|update| {
            matches!(
                update,
                ExchangeUpdate::Completed(_)
                    | ExchangeUpdate::Failed { .. }
                    | ExchangeUpdate::Cancelled(_)
            )
        })
        .count()
}
