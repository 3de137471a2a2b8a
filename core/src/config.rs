use crate::exchange::BusyPolicy;
use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use url::Url;

pub const DEFAULT_API_URL: &str = "http://localhost:3001";

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_url: Url,
    pub stream_path: String,
    pub chat_path: String,
    pub conversation_id: String,
    pub busy_policy: BusyPolicy,
    pub token: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("client configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Invalid(detail) => {
                format!("VectorMind not configured: {detail}. Update vectormind.yaml.")
            }
        }
    }
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            api_url: default_api_url(),
            stream_path: "/chat/stream".to_string(),
            chat_path: "/chat".to_string(),
            conversation_id: "default".to_string(),
            busy_policy: BusyPolicy::default(),
            token: None,
        }
    }
}

impl ClientSettings {
    /// Reads the first `vectormind.yaml` found, then applies `VECTORMIND_*`
    /// environment overrides. A missing file yields defaults.
    pub fn load() -> Result<Self, ConfigError> {
        let mut settings = match locate_config_file() {
            Some(path) => Self::from_file(&path)?,
            None => Self::default(),
        };
        settings.apply_overrides(|key| std::env::var(key).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = fs::read_to_string(path).map_err(|err| {
            ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
        })?;
        Self::from_yaml(&contents)
    }

    pub fn from_yaml(contents: &str) -> Result<Self, ConfigError> {
        let config: VectorMindConfig = serde_yaml::from_str(contents)
            .map_err(|err| ConfigError::Invalid(format!("invalid vectormind.yaml: {err}")))?;
        resolve_client_settings(config.client.unwrap_or_default())
    }

    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("VECTORMIND_API_URL") {
            self.api_url = parse_api_url(&url)?;
        }
        if let Some(token) = lookup("VECTORMIND_TOKEN") {
            self.token = non_empty(token);
        }
        if let Some(conversation) = lookup("VECTORMIND_CONVERSATION") {
            if let Some(conversation) = non_empty(conversation) {
                self.conversation_id = conversation;
            }
        }
        Ok(())
    }
}

fn resolve_client_settings(section: ClientSection) -> Result<ClientSettings, ConfigError> {
    let defaults = ClientSettings::default();
    let api_url = match section.api_url {
        Some(raw) => parse_api_url(&raw)?,
        None => defaults.api_url,
    };
    let conversation_id = match section.conversation_id {
        Some(raw) => non_empty(raw).ok_or_else(|| {
            ConfigError::Invalid("conversation_id must not be empty".to_string())
        })?,
        None => defaults.conversation_id,
    };
    Ok(ClientSettings {
        api_url,
        stream_path: section
            .stream_path
            .and_then(non_empty)
            .unwrap_or(defaults.stream_path),
        chat_path: section
            .chat_path
            .and_then(non_empty)
            .unwrap_or(defaults.chat_path),
        conversation_id,
        busy_policy: section.busy_policy.unwrap_or(defaults.busy_policy),
        token: section.token.and_then(non_empty),
    })
}

fn parse_api_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw.trim())
        .map_err(|err| ConfigError::Invalid(format!("invalid api_url `{raw}`: {err}")))?;
    match url.scheme() {
        "http" | "https" => Ok(url),
        other => Err(ConfigError::Invalid(format!(
            "api_url must be http or https, got `{other}`"
        ))),
    }
}

fn default_api_url() -> Url {
    Url::parse(DEFAULT_API_URL).expect("DEFAULT_API_URL is a valid url")
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn locate_config_file() -> Option<PathBuf> {
    config_candidates().into_iter().find(|path| path.exists())
}

fn config_candidates() -> Vec<PathBuf> {
    let mut paths = vec![PathBuf::from("vectormind.yaml")];
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("vectormind");
        paths.push(config_dir.join("vectormind.yaml"));
        paths.push(config_dir.join("vectormind.yml"));
        paths.push(base.home_dir().join(".vectormind").join("vectormind.yaml"));
    }
    paths
}

#[derive(Debug, Deserialize)]
struct VectorMindConfig {
    client: Option<ClientSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSection {
    api_url: Option<String>,
    stream_path: Option<String>,
    chat_path: Option<String>,
    conversation_id: Option<String>,
    busy_policy: Option<BusyPolicy>,
    token: Option<String>,
}
