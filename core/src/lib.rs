pub mod auth;
pub mod config;
pub mod error;
pub mod exchange;
pub mod state;
pub mod stream;
pub mod telemetry;
pub mod transport;

pub use auth::{Role, SessionProvider, SessionStore};
pub use config::{ClientSettings, ConfigError};
pub use error::{ExchangeError, TransportError};
pub use exchange::{
    AskResponse, BusyPolicy, ExchangeConfig, ExchangeController, ExchangeHandle,
    ExchangeObserver, ExchangeOutcome, ExchangeState, ExchangeUpdate,
};
pub use state::{ChatSession, Conversation, Message, MessageRole, MessageStatus, Source};
pub use transport::{ByteStream, ChatRequest, ChatResponse, ChatTransport, HttpTransport};
