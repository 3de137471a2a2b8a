use crate::error::ExchangeError;
use crate::exchange::{
    AskResponse, ExchangeController, ExchangeHandle, ExchangeObserver, ExchangeUpdate,
};
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use uuid::Uuid;

/// Assistant text placed in the transcript when an exchange fails before any
/// content was accepted.
pub const FALLBACK_REPLY: &str = "Sorry, there was an error processing your message.";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    User,
    Assistant,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    Streaming,
    Complete,
}

/// A document passage the backend cited for an answer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub document_id: Option<String>,
    pub filename: String,
    pub page_number: u32,
    pub relevance_score: f64,
}

impl Source {
    pub fn new(filename: impl Into<String>, page_number: u32, relevance_score: f64) -> Self {
        Self {
            document_id: None,
            filename: filename.into(),
            page_number,
            relevance_score,
        }
    }

    /// Pages are 1-based and scores are normalised to `[0, 1]`.
    pub fn is_valid(&self) -> bool {
        self.page_number >= 1
            && self.relevance_score.is_finite()
            && (0.0..=1.0).contains(&self.relevance_score)
    }
}

/// One transcript entry.
///
/// Content only grows while the message is [`MessageStatus::Streaming`]; once
/// complete every mutator is a no-op.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    id: Uuid,
    role: MessageRole,
    content: String,
    #[serde(default)]
    sources: Vec<Source>,
    status: MessageStatus,
    created_at: DateTime<Utc>,
}

impl Message {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            role: MessageRole::User,
            content: content.into(),
            sources: Vec::new(),
            status: MessageStatus::Complete,
            created_at: Utc::now(),
        }
    }

    /// An empty assistant message ready to receive deltas.
    pub fn assistant() -> Self {
        Self {
            id: Uuid::new_v4(),
            role: MessageRole::Assistant,
            content: String::new(),
            sources: Vec::new(),
            status: MessageStatus::Streaming,
            created_at: Utc::now(),
        }
    }

    pub fn assistant_complete(content: impl Into<String>, sources: Vec<Source>) -> Self {
        Self {
            content: content.into(),
            sources,
            status: MessageStatus::Complete,
            ..Self::assistant()
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn role(&self) -> MessageRole {
        self.role
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }

    pub fn status(&self) -> MessageStatus {
        self.status
    }

    pub fn is_complete(&self) -> bool {
        self.status == MessageStatus::Complete
    }

    pub(crate) fn append(&mut self, delta: &str) -> bool {
        if self.is_complete() {
            return false;
        }
        self.content.push_str(delta);
        true
    }

    pub(crate) fn replace_sources(&mut self, sources: Vec<Source>) -> bool {
        if self.is_complete() {
            return false;
        }
        self.sources = sources;
        true
    }

    pub(crate) fn complete(&mut self) -> bool {
        if self.is_complete() {
            return false;
        }
        self.status = MessageStatus::Complete;
        true
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<Message>,
}

impl Conversation {
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: "New chat".to_string(),
            created_at: now,
            updated_at: now,
            messages: Vec::new(),
        }
    }

    /// Appends a message, returning whether the title changed.
    pub fn add_message(&mut self, message: Message) -> bool {
        let mut title_changed = false;
        if self.messages.is_empty() && message.role == MessageRole::User {
            self.title = snippet(&message.content);
            title_changed = true;
        }
        self.messages.push(message);
        self.updated_at = Utc::now();
        title_changed
    }

    /// Replaces the message with the same id, or appends it when unseen.
    /// Returns `true` when the message was appended.
    pub fn upsert_message(&mut self, message: &Message) -> bool {
        self.updated_at = Utc::now();
        match self.messages.iter_mut().find(|m| m.id == message.id) {
            Some(existing) => {
                *existing = message.clone();
                false
            }
            None => {
                self.add_message(message.clone());
                true
            }
        }
    }

    pub fn remove_message(&mut self, id: Uuid) -> Option<Message> {
        let position = self.messages.iter().position(|m| m.id == id)?;
        self.updated_at = Utc::now();
        Some(self.messages.remove(position))
    }

    pub fn message(&self, id: Uuid) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new()
    }
}

/// A conversation transcript bound to the controller that feeds it.
#[derive(Clone)]
pub struct ChatSession {
    conversation: Arc<RwLock<Conversation>>,
    controller: ExchangeController,
}

impl ChatSession {
    pub fn new(controller: ExchangeController) -> Self {
        Self {
            conversation: Arc::new(RwLock::new(Conversation::new())),
            controller,
        }
    }

    pub fn conversation(&self) -> Conversation {
        self.conversation.read().clone()
    }

    /// Starts a streaming exchange and mirrors every update into the
    /// transcript before forwarding it on the returned channel.
    pub fn send_user_message(
        &self,
        content: impl Into<String>,
    ) -> Result<(ExchangeHandle, UnboundedReceiver<ExchangeUpdate>), ExchangeError> {
        let (tx, rx) = mpsc::unbounded_channel();
        let observer = TranscriptObserver {
            conversation: self.conversation.clone(),
            forward: tx,
        };
        // Held across `send` so the user message lands before any reply update.
        let mut conversation = self.conversation.write();
        let handle = self.controller.send(content, observer)?;
        conversation.add_message(handle.user_message().clone());
        Ok((handle, rx))
    }

    /// Non-streaming variant backed by the fallback endpoint.
    pub async fn ask_user_message(
        &self,
        content: impl Into<String>,
    ) -> Result<AskResponse, ExchangeError> {
        let response = self.controller.ask(content).await?;
        let mut conversation = self.conversation.write();
        conversation.add_message(response.user_message.clone());
        conversation.add_message(response.assistant_message.clone());
        Ok(response)
    }

    pub fn cancel(&self) -> bool {
        self.controller.cancel()
    }
}

struct TranscriptObserver {
    conversation: Arc<RwLock<Conversation>>,
    forward: UnboundedSender<ExchangeUpdate>,
}

impl ExchangeObserver for TranscriptObserver {
    fn on_content(&mut self, message: &Message) {
        self.conversation.write().upsert_message(message);
        self.forward.on_content(message);
    }

    fn on_sources(&mut self, message: &Message) {
        self.conversation.write().upsert_message(message);
        self.forward.on_sources(message);
    }

    fn on_complete(&mut self, message: &Message) {
        self.conversation.write().upsert_message(message);
        self.forward.on_complete(message);
    }

    fn on_error(&mut self, error: &ExchangeError, partial: &Message) {
        {
            let mut conversation = self.conversation.write();
            if partial.content().is_empty() {
                conversation.remove_message(partial.id());
                conversation.add_message(Message::assistant_complete(FALLBACK_REPLY, Vec::new()));
            } else {
                conversation.upsert_message(partial);
            }
        }
        self.forward.on_error(error, partial);
    }

    fn on_cancelled(&mut self, partial: &Message) {
        {
            let mut conversation = self.conversation.write();
            if partial.content().is_empty() {
                // A sources update may already have placed it.
                conversation.remove_message(partial.id());
            } else {
                conversation.upsert_message(partial);
            }
        }
        self.forward.on_cancelled(partial);
    }
}

fn snippet(content: &str) -> String {
    let trimmed = content.trim();
    const MAX: usize = 42;
    let mut chars = trimmed.chars();
    let mut acc = String::new();
    for _ in 0..MAX {
        if let Some(ch) = chars.next() {
            acc.push(ch);
        } else {
            return trimmed.to_string();
        }
    }
    if chars.next().is_none() {
        return acc;
    }
    acc.push('…');
    acc
}
