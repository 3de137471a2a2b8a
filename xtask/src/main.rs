use anyhow::{ensure, Result};
use async_trait::async_trait;
use bytes::Bytes;
use clap::{Parser, Subcommand};
use futures::stream::{self, StreamExt};
use std::sync::Arc;
use tokio::runtime::Runtime;
use tracing::info;
use tracing_subscriber::EnvFilter;
use vectormind_core::{
    telemetry, ByteStream, ChatRequest, ChatResponse, ChatSession, ChatTransport,
    ExchangeConfig, ExchangeController, ExchangeState, SessionStore, TransportError,
};

#[derive(Parser, Debug)]
#[command(name = "xtask", version, about = "Automation helpers for VectorMind")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Run a streamed exchange against a canned backend, without network access.
    Smoke,
}

fn main() -> Result<()> {
    telemetry::init_tracing(EnvFilter::new("info"))?;
    let cli = Cli::parse();

    match cli.command {
        Commands::Smoke => smoke_test(),
    }
}

/// Replays a fixed event stream, split at awkward offsets.
struct CannedBackend;

const CANNED_STREAM: &str = concat!(
    "data: {\"content\":\"Smoke \"}\n",
    "\n",
    "data: {\"chunk\":\"test passed.\"}\n",
    "data: {\"sources\":[{\"filename\":\"smoke.md\",\"pageNumber\":1,\"relevanceScore\":0.99}]}\n",
    "data: [DONE]\n",
);

#[async_trait]
impl ChatTransport for CannedBackend {
    async fn open_stream(
        &self,
        request: &ChatRequest,
        _token: Option<&str>,
    ) -> Result<ByteStream, TransportError> {
        info!(message = %request.message, "canned backend received request");
        let chunks: Vec<Result<Bytes, TransportError>> = CANNED_STREAM
            .as_bytes()
            .chunks(7)
            .map(|chunk| Ok(Bytes::copy_from_slice(chunk)))
            .collect();
        Ok(stream::iter(chunks).boxed())
    }

    async fn send(
        &self,
        request: &ChatRequest,
        _token: Option<&str>,
    ) -> Result<ChatResponse, TransportError> {
        Ok(ChatResponse {
            response: "Smoke test passed.".to_string(),
            sources: Vec::new(),
            conversation_id: Some(request.conversation_id.clone()),
        })
    }
}

fn smoke_test() -> Result<()> {
    let runtime = Runtime::new()?;
    let controller = ExchangeController::new(
        Arc::new(CannedBackend),
        Arc::new(SessionStore::with_token("smoke-token")),
        ExchangeConfig::default(),
    );
    let session = ChatSession::new(controller);

    let state = runtime.block_on(async {
        let (handle, _updates) = session.send_user_message("ping from xtask")?;
        Ok::<_, anyhow::Error>(handle.outcome().await.state())
    })?;
    ensure!(state == ExchangeState::Completed, "exchange ended as {state:?}");

    let conversation = session.conversation();
    let reply = conversation
        .messages
        .last()
        .map(|message| message.content().to_string())
        .unwrap_or_default();
    ensure!(reply == "Smoke test passed.", "unexpected reply {reply:?}");
    info!(
        "messages" = conversation.messages.len(),
        "sources" = conversation.messages.last().map_or(0, |m| m.sources().len()),
        "smoke test exchange completed"
    );

    Ok(())
}
