//! In-memory providers for tests and embedding.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

use super::base::{DiscoveredProvider, ProviderConnection, ProviderDiscovery};
use super::errors::ProviderError;
use crate::config::{ProviderConfig, ProviderConfigStore};

/// A connection that counts how often it was disconnected
pub struct MockConnection {
    name: String,
    fail_disconnect: bool,
    disconnect_delay: Option<Duration>,
    disconnects: AtomicUsize,
}

impl MockConnection {
    fn build(name: String, fail_disconnect: bool, disconnect_delay: Option<Duration>) -> Arc<Self> {
        Arc::new(Self {
            name,
            fail_disconnect,
            disconnect_delay,
            disconnects: AtomicUsize::new(0),
        })
    }

    pub fn new<S: Into<String>>(name: S) -> Arc<Self> {
        Self::build(name.into(), false, None)
    }

    /// A connection whose disconnect always reports failure
    pub fn failing<S: Into<String>>(name: S) -> Arc<Self> {
        Self::build(name.into(), true, None)
    }

    /// A connection that takes `delay` to disconnect
    pub fn slow<S: Into<String>>(name: S, delay: Duration) -> Arc<Self> {
        Self::build(name.into(), false, Some(delay))
    }

    pub fn disconnect_count(&self) -> usize {
        self.disconnects.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ProviderConnection for MockConnection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn disconnect(&self) -> Result<(), ProviderError> {
        self.disconnects.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.disconnect_delay {
            tokio::time::sleep(delay).await;
        }
        if self.fail_disconnect {
            return Err(ProviderError::disconnect(&self.name, "process already gone"));
        }
        Ok(())
    }
}

#[derive(Clone)]
enum Behavior {
    Connect {
        tools: Vec<(String, String)>,
        delay: Option<Duration>,
        fail_disconnect: bool,
        disconnect_delay: Option<Duration>,
    },
    Fail(String),
    Hang,
}

/// Discovery that serves scripted providers.
///
/// Every successful connect hands out a fresh [`MockConnection`], which stays
/// reachable through [`MockDiscovery::connections`] for assertions.
#[derive(Default)]
pub struct MockDiscovery {
    behaviors: Mutex<HashMap<String, Behavior>>,
    connect_calls: Mutex<HashMap<String, usize>>,
    total_calls: AtomicUsize,
    connections: Mutex<Vec<Arc<MockConnection>>>,
}

impl MockDiscovery {
    pub fn new() -> Self {
        Self::default()
    }

    fn set(&self, name: &str, behavior: Behavior) {
        self.behaviors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), behavior);
    }

    fn connecting(
        self,
        name: &str,
        tools: &[(&str, &str)],
        delay: Option<Duration>,
        fail_disconnect: bool,
        disconnect_delay: Option<Duration>,
    ) -> Self {
        self.set(
            name,
            Behavior::Connect {
                tools: tools
                    .iter()
                    .map(|(n, d)| (n.to_string(), d.to_string()))
                    .collect(),
                delay,
                fail_disconnect,
                disconnect_delay,
            },
        );
        self
    }

    /// Serve `tools` as `(name, description)` pairs for provider `name`
    pub fn provider(self, name: &str, tools: &[(&str, &str)]) -> Self {
        self.provider_with_delay(name, tools, None)
    }

    pub fn provider_with_delay(
        self,
        name: &str,
        tools: &[(&str, &str)],
        delay: Option<Duration>,
    ) -> Self {
        self.connecting(name, tools, delay, false, None)
    }

    /// A provider whose connections fail to disconnect
    pub fn provider_failing_disconnect(self, name: &str, tools: &[(&str, &str)]) -> Self {
        self.connecting(name, tools, None, true, None)
    }

    /// A provider whose connections take `delay` to disconnect
    pub fn provider_with_slow_disconnect(
        self,
        name: &str,
        tools: &[(&str, &str)],
        delay: Duration,
    ) -> Self {
        self.connecting(name, tools, None, false, Some(delay))
    }

    pub fn failing(self, name: &str, message: &str) -> Self {
        self.set(name, Behavior::Fail(message.to_string()));
        self
    }

    /// A provider that never finishes connecting
    pub fn hanging(self, name: &str) -> Self {
        self.set(name, Behavior::Hang);
        self
    }

    pub fn connect_count(&self, name: &str) -> usize {
        self.connect_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .copied()
            .unwrap_or(0)
    }

    pub fn total_connects(&self) -> usize {
        self.total_calls.load(Ordering::SeqCst)
    }

    /// Every connection handed out so far, in connect order
    pub fn connections(&self) -> Vec<Arc<MockConnection>> {
        self.connections
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl ProviderDiscovery for MockDiscovery {
    async fn connect(
        &self,
        name: &str,
        _config: &ProviderConfig,
    ) -> Result<DiscoveredProvider, ProviderError> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        *self
            .connect_calls
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .entry(name.to_string())
            .or_insert(0) += 1;

        let behavior = self
            .behaviors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned();

        match behavior {
            Some(Behavior::Connect {
                tools,
                delay,
                fail_disconnect,
                disconnect_delay,
            }) => {
                if let Some(delay) = delay {
                    tokio::time::sleep(delay).await;
                }
                let connection =
                    MockConnection::build(name.to_string(), fail_disconnect, disconnect_delay);
                self.connections
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .push(connection.clone());
                Ok(DiscoveredProvider::from_specs(connection, tools))
            }
            Some(Behavior::Fail(message)) => Err(ProviderError::connection(name, message)),
            Some(Behavior::Hang) => futures::future::pending().await,
            None => Err(ProviderError::connection(name, "no such provider")),
        }
    }
}

/// Provider configuration held in memory
#[derive(Default)]
pub struct MockConfigStore {
    providers: Mutex<BTreeMap<String, ProviderConfig>>,
}

impl MockConfigStore {
    /// A store with one enabled entry per name
    pub fn with_providers<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let providers = names
            .into_iter()
            .map(|name| {
                let name = name.into();
                let config = ProviderConfig::new(format!("{}-server", name));
                (name, config)
            })
            .collect();
        Self {
            providers: Mutex::new(providers),
        }
    }
}

impl ProviderConfigStore for MockConfigStore {
    fn load(&self) -> Result<BTreeMap<String, ProviderConfig>> {
        Ok(self
            .providers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone())
    }

    fn add(&self, name: &str, config: ProviderConfig) -> Result<()> {
        self.providers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.to_string(), config);
        Ok(())
    }

    fn remove(&self, name: &str) -> Result<bool> {
        Ok(self
            .providers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(name)
            .is_some())
    }
}
