use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use super::{BindingConfig, ReasoningBinding, ReasoningEngine, ReasoningError};

/// An engine that echoes input back, for tests
#[derive(Default)]
pub struct MockEngine {
    fail_binds: bool,
    fail_responses: bool,
    delay: Option<Duration>,
    bind_delays: Mutex<VecDeque<Duration>>,
    binds: AtomicUsize,
    configs: Mutex<Vec<BindingConfig>>,
}

impl MockEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every bind attempt fails
    pub fn failing_binds(mut self) -> Self {
        self.fail_binds = true;
        self
    }

    /// Bindings are created but every response fails
    pub fn failing_responses(mut self) -> Self {
        self.fail_responses = true;
        self
    }

    /// Delay each response, to hold a reply in flight
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Delay the next binds, one entry per bind in call order
    pub fn with_bind_delays<I>(self, delays: I) -> Self
    where
        I: IntoIterator<Item = Duration>,
    {
        self.bind_delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .extend(delays);
        self
    }

    pub fn bind_count(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    /// Configs of every successful bind, oldest first
    pub fn configs(&self) -> Vec<BindingConfig> {
        self.configs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn last_config(&self) -> Option<BindingConfig> {
        self.configs().pop()
    }
}

#[async_trait]
impl ReasoningEngine for MockEngine {
    async fn bind(
        &self,
        config: BindingConfig,
    ) -> Result<Arc<dyn ReasoningBinding>, ReasoningError> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        let delay = self
            .bind_delays
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_binds {
            return Err(ReasoningError::Binding("model unavailable".to_string()));
        }

        self.configs
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(config.clone());

        Ok(Arc::new(MockBinding {
            tools: config.tools.len(),
            fail: self.fail_responses,
            delay: self.delay,
        }))
    }
}

struct MockBinding {
    tools: usize,
    fail: bool,
    delay: Option<Duration>,
}

#[async_trait]
impl ReasoningBinding for MockBinding {
    async fn respond(&self, input: &str) -> Result<String, ReasoningError> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail {
            return Err(ReasoningError::Generation("context window exceeded".to_string()));
        }
        Ok(format!("echo ({} tools): {}", self.tools, input))
    }
}
