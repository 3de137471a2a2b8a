//! One request/response cycle at a time per conversation.
//!
//! [`ExchangeController::send`] records the user message, claims the
//! conversation's exchange slot and spawns a driver task that pushes response
//! chunks through the [`stream`](crate::stream) pipeline. Lifecycle changes are
//! reported to an [`ExchangeObserver`]; the final result is also available from
//! [`ExchangeHandle::outcome`].

use crate::auth::SessionProvider;
use crate::config::ClientSettings;
use crate::error::{ExchangeError, TransportError};
use crate::state::{Message, Source};
use crate::stream::{interpret, valid_sources, Assembler, FrameDecoder, Step};
use crate::transport::{ByteStream, ChatRequest, ChatTransport};
use futures::StreamExt;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use uuid::Uuid;

/// What `send` does when an exchange is already in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusyPolicy {
    /// Cancel the running exchange and start the new one.
    #[default]
    CancelPrevious,
    /// Refuse with [`ExchangeError::Busy`].
    Reject,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExchangeState {
    Idle,
    Sending,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl ExchangeState {
    pub fn is_active(self) -> bool {
        matches!(self, Self::Sending | Self::Streaming)
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeConfig {
    pub conversation_id: String,
    pub busy_policy: BusyPolicy,
}

impl Default for ExchangeConfig {
    fn default() -> Self {
        Self {
            conversation_id: "default".to_string(),
            busy_policy: BusyPolicy::default(),
        }
    }
}

impl From<&ClientSettings> for ExchangeConfig {
    fn from(settings: &ClientSettings) -> Self {
        Self {
            conversation_id: settings.conversation_id.clone(),
            busy_policy: settings.busy_policy,
        }
    }
}

/// Lifecycle callbacks for one exchange.
///
/// Content and source callbacks receive the message as accumulated so far.
/// Exactly one of `on_complete`, `on_error` or `on_cancelled` is called, last.
pub trait ExchangeObserver: Send + 'static {
    fn on_content(&mut self, _message: &Message) {}

    fn on_sources(&mut self, _message: &Message) {}

    fn on_complete(&mut self, message: &Message);

    fn on_error(&mut self, error: &ExchangeError, partial: &Message);

    fn on_cancelled(&mut self, _partial: &Message) {}
}

impl ExchangeObserver for () {
    fn on_complete(&mut self, _message: &Message) {}

    fn on_error(&mut self, _error: &ExchangeError, _partial: &Message) {}
}

/// Channel form of the observer callbacks.
#[derive(Debug, Clone)]
pub enum ExchangeUpdate {
    /// Cumulative content after a delta.
    Content { message_id: Uuid, content: String },
    Sources {
        message_id: Uuid,
        sources: Vec<Source>,
    },
    Completed(Message),
    Failed { partial: Message, error: String },
    Cancelled(Message),
}

impl ExchangeObserver for UnboundedSender<ExchangeUpdate> {
    fn on_content(&mut self, message: &Message) {
        let _ = self.send(ExchangeUpdate::Content {
            message_id: message.id(),
            content: message.content().to_string(),
        });
    }

    fn on_sources(&mut self, message: &Message) {
        let _ = self.send(ExchangeUpdate::Sources {
            message_id: message.id(),
            sources: message.sources().to_vec(),
        });
    }

    fn on_complete(&mut self, message: &Message) {
        let _ = self.send(ExchangeUpdate::Completed(message.clone()));
    }

    fn on_error(&mut self, error: &ExchangeError, partial: &Message) {
        let _ = self.send(ExchangeUpdate::Failed {
            partial: partial.clone(),
            error: error.to_string(),
        });
    }

    fn on_cancelled(&mut self, partial: &Message) {
        let _ = self.send(ExchangeUpdate::Cancelled(partial.clone()));
    }
}

#[derive(Debug)]
pub enum ExchangeOutcome {
    Completed(Message),
    Failed {
        error: ExchangeError,
        partial: Message,
    },
    /// The partial message keeps its streaming status.
    Cancelled(Message),
}

impl ExchangeOutcome {
    pub fn state(&self) -> ExchangeState {
        match self {
            Self::Completed(_) => ExchangeState::Completed,
            Self::Failed { .. } => ExchangeState::Failed,
            Self::Cancelled(_) => ExchangeState::Cancelled,
        }
    }

    pub fn message(&self) -> &Message {
        match self {
            Self::Completed(message) | Self::Cancelled(message) => message,
            Self::Failed { partial, .. } => partial,
        }
    }
}

/// Result of the non-streaming fallback.
#[derive(Debug, Clone)]
pub struct AskResponse {
    pub user_message: Message,
    pub assistant_message: Message,
    pub conversation_id: String,
}

pub struct ExchangeHandle {
    id: Uuid,
    user_message: Message,
    token: CancellationToken,
    task: JoinHandle<ExchangeOutcome>,
}

impl ExchangeHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn user_message(&self) -> &Message {
        &self.user_message
    }

    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Waits for the driver task to reach a terminal state.
    pub async fn outcome(self) -> ExchangeOutcome {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(err) if err.is_panic() => std::panic::resume_unwind(err.into_panic()),
            Err(_) => ExchangeOutcome::Cancelled(Message::assistant()),
        }
    }
}

struct ActiveExchange {
    id: Uuid,
    token: CancellationToken,
}

struct Slot {
    active: Option<ActiveExchange>,
    state: ExchangeState,
}

struct Inner {
    transport: Arc<dyn ChatTransport>,
    session: Arc<dyn SessionProvider>,
    config: ExchangeConfig,
    slot: Mutex<Slot>,
}

impl Inner {
    fn transition(&self, id: Uuid, state: ExchangeState) {
        let mut slot = self.slot.lock();
        if slot.active.as_ref().map(|active| active.id) == Some(id) {
            slot.state = state;
        }
    }

    fn conclude(&self, id: Uuid, state: ExchangeState) {
        let mut slot = self.slot.lock();
        if slot.active.as_ref().map(|active| active.id) == Some(id) {
            slot.state = state;
            slot.active = None;
        }
    }

    fn request(&self, message: String) -> ChatRequest {
        ChatRequest {
            message,
            conversation_id: self.config.conversation_id.clone(),
        }
    }

    fn note_transport_error(&self, err: &TransportError) {
        if err.is_unauthorized() {
            warn!("backend rejected credentials, invalidating session");
            self.session.invalidate();
        }
    }
}

/// Drives exchanges for a single conversation.
#[derive(Clone)]
pub struct ExchangeController {
    inner: Arc<Inner>,
}

impl ExchangeController {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        session: Arc<dyn SessionProvider>,
        config: ExchangeConfig,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                transport,
                session,
                config,
                slot: Mutex::new(Slot {
                    active: None,
                    state: ExchangeState::Idle,
                }),
            }),
        }
    }

    pub fn state(&self) -> ExchangeState {
        self.inner.slot.lock().state
    }

    pub fn active_exchange(&self) -> Option<Uuid> {
        self.inner.slot.lock().active.as_ref().map(|active| active.id)
    }

    /// Starts an exchange on the current tokio runtime.
    ///
    /// Must be called from within a runtime context.
    pub fn send<O: ExchangeObserver>(
        &self,
        query: impl Into<String>,
        observer: O,
    ) -> Result<ExchangeHandle, ExchangeError> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(ExchangeError::EmptyQuery);
        }

        let id = Uuid::new_v4();
        let token = CancellationToken::new();
        {
            let mut slot = self.inner.slot.lock();
            if slot.state.is_active() {
                match self.inner.config.busy_policy {
                    BusyPolicy::Reject => return Err(ExchangeError::Busy),
                    BusyPolicy::CancelPrevious => {
                        if let Some(previous) = slot.active.take() {
                            debug!(previous = %previous.id, "cancelling in-flight exchange");
                            previous.token.cancel();
                        }
                    }
                }
            }
            slot.state = ExchangeState::Sending;
            slot.active = Some(ActiveExchange {
                id,
                token: token.clone(),
            });
        }

        let user_message = Message::user(query.clone());
        let exchange = Exchange {
            id,
            inner: self.inner.clone(),
            token: token.clone(),
            assembler: Assembler::new(Message::assistant()),
            observer,
        };
        debug!(exchange = %id, conversation = %self.inner.config.conversation_id, "exchange started");
        let task = tokio::spawn(exchange.run(self.inner.request(query)));

        Ok(ExchangeHandle {
            id,
            user_message,
            token,
            task,
        })
    }

    /// Cancels the in-flight exchange, if any.
    pub fn cancel(&self) -> bool {
        let slot = self.inner.slot.lock();
        match slot.active.as_ref() {
            Some(active) if slot.state.is_active() => {
                active.token.cancel();
                true
            }
            _ => false,
        }
    }

    /// Non-streaming request against the fallback endpoint.
    ///
    /// Does not take the exchange slot.
    pub async fn ask(&self, query: impl Into<String>) -> Result<AskResponse, ExchangeError> {
        let query = query.into();
        if query.trim().is_empty() {
            return Err(ExchangeError::EmptyQuery);
        }
        let user_message = Message::user(query.clone());
        let request = self.inner.request(query);
        let bearer = self.inner.session.bearer_token();
        let response = match self.inner.transport.send(&request, bearer.as_deref()).await {
            Ok(response) => response,
            Err(err) => {
                self.inner.note_transport_error(&err);
                return Err(err.into());
            }
        };
        let sources = valid_sources(response.sources);
        Ok(AskResponse {
            user_message,
            assistant_message: Message::assistant_complete(response.response, sources),
            conversation_id: response
                .conversation_id
                .unwrap_or(request.conversation_id),
        })
    }
}

struct Exchange<O> {
    id: Uuid,
    inner: Arc<Inner>,
    token: CancellationToken,
    assembler: Assembler,
    observer: O,
}

impl<O: ExchangeObserver> Exchange<O> {
    async fn run(self, request: ChatRequest) -> ExchangeOutcome {
        let bearer = self.inner.session.bearer_token();
        let opened = tokio::select! {
            biased;
            _ = self.token.cancelled() => None,
            opened = self.inner.transport.open_stream(&request, bearer.as_deref()) => Some(opened),
        };
        match opened {
            None => self.cancelled(),
            Some(Err(err)) => self.transport_failed(err),
            Some(Ok(stream)) => {
                self.inner.transition(self.id, ExchangeState::Streaming);
                self.pump(stream).await
            }
        }
    }

    async fn pump(mut self, mut stream: ByteStream) -> ExchangeOutcome {
        let mut decoder = FrameDecoder::new();
        loop {
            let next = tokio::select! {
                biased;
                _ = self.token.cancelled() => None,
                next = stream.next() => Some(next),
            };
            let chunk = match next {
                None => return self.cancelled(),
                Some(None) => {
                    decoder.finish();
                    return self.transport_failed(TransportError::Truncated);
                }
                Some(Some(Err(err))) => return self.transport_failed(err),
                Some(Some(Ok(chunk))) => chunk,
            };

            for frame in decoder.feed(&chunk) {
                // Bytes already received are not applied once cancelled.
                if self.token.is_cancelled() {
                    return self.cancelled();
                }
                let Some(event) = interpret(&frame) else {
                    continue;
                };
                match self.assembler.apply(event) {
                    Step::Content => self.observer.on_content(self.assembler.message()),
                    Step::Sources => self.observer.on_sources(self.assembler.message()),
                    Step::Completed => return self.completed(),
                    Step::Failed(reason) => return self.failed(ExchangeError::Backend(reason)),
                    Step::Ignored => {}
                }
            }
        }
    }

    fn completed(mut self) -> ExchangeOutcome {
        self.inner.conclude(self.id, ExchangeState::Completed);
        let message = self.assembler.into_message();
        debug!(exchange = %self.id, bytes = message.content().len(), sources = message.sources().len(), "exchange completed");
        self.observer.on_complete(&message);
        ExchangeOutcome::Completed(message)
    }

    fn transport_failed(self, err: TransportError) -> ExchangeOutcome {
        self.inner.note_transport_error(&err);
        self.failed(ExchangeError::Transport(err))
    }

    fn failed(mut self, error: ExchangeError) -> ExchangeOutcome {
        self.inner.conclude(self.id, ExchangeState::Failed);
        let partial = self.assembler.into_message();
        warn!(exchange = %self.id, %error, kept = partial.content().len(), "exchange failed");
        self.observer.on_error(&error, &partial);
        ExchangeOutcome::Failed { error, partial }
    }

    fn cancelled(mut self) -> ExchangeOutcome {
        self.inner.conclude(self.id, ExchangeState::Cancelled);
        let partial = self.assembler.into_message();
        debug!(exchange = %self.id, kept = partial.content().len(), "exchange cancelled");
        self.observer.on_cancelled(&partial);
        ExchangeOutcome::Cancelled(partial)
    }
}
