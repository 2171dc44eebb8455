mod message;
mod orchestrator;
pub mod storage;

pub use message::{Message, Role};
pub use orchestrator::{PendingReply, SessionOrchestrator};

use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::config::Config;
use crate::reasoning::{ReasoningBinding, ReasoningError};
use crate::registry::{EnabledSet, RegistryError};

pub const DEFAULT_SESSION_TITLE: &str = "New Chat";

/// Appended in place of a reply whenever generation fails
pub const APOLOGY_MESSAGE: &str = "Sorry, I couldn't generate a response. Please try again.";

const DEFAULT_INSTRUCTIONS: &str = "You are a helpful assistant.";
const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_MAX_RESPONSE_TOKENS: u32 = 4096;
const TITLE_WORDS: usize = 4;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(SessionId),
    #[error("Session {0} has no reasoning binding")]
    NotInitialized(SessionId),
    #[error("Session initialization was cancelled")]
    Cancelled,
    #[error("Session task failed: {0}")]
    TaskFailed(String),
    #[error("Failed to load tools: {0}")]
    Registry(#[from] RegistryError),
    #[error(transparent)]
    Reasoning(#[from] ReasoningError),
    #[error("Session storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        SessionId(Uuid::new_v4())
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Published whenever the session set or a session's state changes
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    Created(SessionId),
    Deleted(SessionId),
    MessageAppended { session: SessionId, role: Role },
    BindingReplaced(SessionId),
}

/// Generation parameters used when a session does not set its own
#[derive(Debug, Clone)]
pub struct SessionDefaults {
    pub instructions: String,
    pub temperature: f32,
    pub max_response_tokens: u32,
}

impl Default for SessionDefaults {
    fn default() -> Self {
        Self {
            instructions: DEFAULT_INSTRUCTIONS.to_string(),
            temperature: DEFAULT_TEMPERATURE,
            max_response_tokens: DEFAULT_MAX_RESPONSE_TOKENS,
        }
    }
}

impl SessionDefaults {
    pub fn from_config(config: &Config) -> Self {
        Self {
            instructions: config
                .get_param("TOOLHUB_INSTRUCTIONS")
                .unwrap_or_else(|_| DEFAULT_INSTRUCTIONS.to_string()),
            temperature: config
                .get_param("TOOLHUB_TEMPERATURE")
                .unwrap_or(DEFAULT_TEMPERATURE),
            max_response_tokens: config
                .get_param("TOOLHUB_MAX_RESPONSE_TOKENS")
                .unwrap_or(DEFAULT_MAX_RESPONSE_TOKENS),
        }
    }
}

/// What a new session starts with; unset fields fall back to [`SessionDefaults`]
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub title: Option<String>,
    pub instructions: Option<String>,
    pub temperature: Option<f32>,
    /// Private tool selection; None follows the registry's global selection
    pub enabled_tools: Option<EnabledSet>,
}

impl SessionConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_title<S: Into<String>>(mut self, title: S) -> Self {
        self.title = Some(title.into());
        self
    }

    pub fn with_instructions<S: Into<String>>(mut self, instructions: S) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_enabled_tools(mut self, enabled: EnabledSet) -> Self {
        self.enabled_tools = Some(enabled);
        self
    }
}

/// One conversation: its history, parameters, tool override and engine binding
#[derive(Clone)]
pub struct Session {
    pub id: SessionId,
    pub title: String,
    pub instructions: String,
    pub temperature: f32,
    pub messages: Vec<Message>,
    pub enabled_tools: Option<EnabledSet>,
    pub binding: Option<Arc<dyn ReasoningBinding>>,
    pub created_at: DateTime<Utc>,
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("title", &self.title)
            .field("temperature", &self.temperature)
            .field("messages", &self.messages.len())
            .field("enabled_tools", &self.enabled_tools)
            .field("initialized", &self.binding.is_some())
            .finish()
    }
}

impl Session {
    pub(crate) fn new(config: SessionConfig, defaults: &SessionDefaults) -> Self {
        Self {
            id: SessionId::new(),
            title: config
                .title
                .unwrap_or_else(|| DEFAULT_SESSION_TITLE.to_string()),
            instructions: config
                .instructions
                .unwrap_or_else(|| defaults.instructions.clone()),
            temperature: config.temperature.unwrap_or(defaults.temperature),
            messages: Vec::new(),
            enabled_tools: config.enabled_tools,
            binding: None,
            created_at: Utc::now(),
        }
    }

    pub fn is_initialized(&self) -> bool {
        self.binding.is_some()
    }

    /// Append a message, titling the session from its first user message
    pub(crate) fn push(&mut self, message: Message) {
        if message.is_from_user()
            && self.title == DEFAULT_SESSION_TITLE
            && !self.messages.iter().any(Message::is_from_user)
        {
            if let Some(title) = derive_title(&message.content) {
                self.title = title;
            }
        }
        self.messages.push(message);
    }
}

/// The first few words of a message, with "..." when there were more
pub fn derive_title(content: &str) -> Option<String> {
    let words: Vec<&str> = content.split_whitespace().collect();
    if words.is_empty() {
        return None;
    }

    let mut title = words
        .iter()
        .take(TITLE_WORDS)
        .copied()
        .collect::<Vec<_>>()
        .join(" ");
    if words.len() > TITLE_WORDS {
        title.push_str("...");
    }
    Some(title)
}
