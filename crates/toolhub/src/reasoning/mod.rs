pub mod mock;

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::tool::Tool;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ReasoningError {
    #[error("Failed to create a reasoning session: {0}")]
    Binding(String),
    #[error("Failed to generate a response: {0}")]
    Generation(String),
}

/// Parameters for one reasoning session
#[derive(Debug, Clone)]
pub struct BindingConfig {
    pub instructions: String,
    pub temperature: f32,
    pub max_response_tokens: u32,
    pub tools: Vec<Tool>,
}

impl BindingConfig {
    pub fn tool_names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }
}

/// The inference engine that answers chat messages.
///
/// The engine decides how and when tools are invoked; this crate only chooses
/// which tools a session may see.
#[async_trait]
pub trait ReasoningEngine: Send + Sync {
    async fn bind(&self, config: BindingConfig)
        -> Result<Arc<dyn ReasoningBinding>, ReasoningError>;
}

/// A session with the engine, fixed to one set of instructions and tools
#[async_trait]
pub trait ReasoningBinding: Send + Sync {
    async fn respond(&self, input: &str) -> Result<String, ReasoningError>;
}
