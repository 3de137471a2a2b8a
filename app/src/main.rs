use anyhow::{anyhow, bail, Context};
use clap::{Parser, Subcommand};
use std::io::{self, Write};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use vectormind::{write_answer, StreamPrinter};
use vectormind_core::{
    telemetry, ChatSession, ClientSettings, ExchangeConfig, ExchangeController, ExchangeState,
    ExchangeUpdate, HttpTransport, SessionStore,
};

#[derive(Parser, Debug)]
#[command(name = "vectormind", version, about = "Ask questions against a VectorMind knowledge base")]
struct Cli {
    #[command(subcommand)]
    command: Command,
    /// Backend base URL, e.g. http://localhost:3001/api
    #[arg(long, global = true)]
    api_url: Option<String>,
    #[arg(long, global = true)]
    conversation: Option<String>,
    /// Bearer token; falls back to VECTORMIND_TOKEN.
    #[arg(long, global = true)]
    token: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Ask a single question and print the reply.
    Ask {
        query: String,
        /// Use the non-streaming endpoint.
        #[arg(long)]
        no_stream: bool,
    },
    /// Interactive session; Ctrl-C interrupts the current reply.
    Chat,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    telemetry::init_tracing(telemetry::default_filter())?;

    let cli = Cli::parse();
    let settings = resolve_settings(&cli)?;
    let session = build_session(&settings)?;
    info!(
        api_url = %settings.api_url,
        conversation = %settings.conversation_id,
        "client ready"
    );

    match &cli.command {
        Command::Ask { query, no_stream: true } => {
            let response = session.ask_user_message(query.as_str()).await?;
            write_answer(&mut io::stdout(), &response.assistant_message)?;
        }
        Command::Ask { query, no_stream: false } => {
            if stream_reply(&session, query).await? == ExchangeState::Failed {
                bail!("the assistant could not answer");
            }
        }
        Command::Chat => chat(&session).await?,
    }
    Ok(())
}

fn resolve_settings(cli: &Cli) -> anyhow::Result<ClientSettings> {
    let mut settings = ClientSettings::load().map_err(|err| anyhow!(err.user_message()))?;
    settings
        .apply_overrides(|key| match key {
            "VECTORMIND_API_URL" => cli.api_url.clone(),
            "VECTORMIND_TOKEN" => cli.token.clone(),
            "VECTORMIND_CONVERSATION" => cli.conversation.clone(),
            _ => None,
        })
        .map_err(|err| anyhow!(err.user_message()))?;
    Ok(settings)
}

fn build_session(settings: &ClientSettings) -> anyhow::Result<ChatSession> {
    let store = match &settings.token {
        Some(token) => SessionStore::with_token(token.clone()),
        None => SessionStore::new(),
    };
    let transport =
        HttpTransport::from_settings(settings).context("failed to build HTTP client")?;
    let controller = ExchangeController::new(
        Arc::new(transport),
        Arc::new(store),
        ExchangeConfig::from(settings),
    );
    Ok(ChatSession::new(controller))
}

/// Streams one reply to stdout. Ctrl-C cancels the exchange, not the process.
async fn stream_reply(session: &ChatSession, query: &str) -> anyhow::Result<ExchangeState> {
    let (handle, mut updates) = session.send_user_message(query)?;
    let mut printer = StreamPrinter::new(io::stdout());
    loop {
        tokio::select! {
            update = updates.recv() => {
                let Some(update) = update else { break };
                if let ExchangeUpdate::Failed { error, .. } = &update {
                    warn!(%error, "exchange failed");
                }
                if printer.update(&update)? {
                    break;
                }
            }
            _ = tokio::signal::ctrl_c() => {
                handle.cancel();
            }
        }
    }
    Ok(handle.outcome().await.state())
}

async fn chat(session: &ChatSession) -> anyhow::Result<()> {
    println!("Type a question, /quit to leave.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        prompt()?;
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = tokio::signal::ctrl_c() => {
                // The stdin reader cannot be cancelled, so leave without
                // waiting for runtime shutdown.
                println!();
                std::process::exit(0);
            }
        };
        let Some(line) = line else { break };
        match line.trim() {
            "" => continue,
            "/quit" | "/exit" => break,
            query => {
                stream_reply(session, query).await?;
            }
        }
    }
    Ok(())
}

fn prompt() -> io::Result<()> {
    let mut stdout = io::stdout();
    write!(stdout, "> ")?;
    stdout.flush()
}
