use async_trait::async_trait;

use super::errors::ProviderError;
use crate::config::ProviderConfig;
use crate::tool::{ProviderHandle, Tool};

/// A live connection to one external tool provider
#[async_trait]
pub trait ProviderConnection: Send + Sync {
    fn name(&self) -> &str;

    /// Close the connection and stop the provider.
    ///
    /// Callers never retry; a failed disconnect is logged and left behind.
    async fn disconnect(&self) -> Result<(), ProviderError>;
}

/// Establishes connections to configured providers.
///
/// Each call covers a single provider so one unreachable provider never takes
/// down the others.
#[async_trait]
pub trait ProviderDiscovery: Send + Sync {
    async fn connect(
        &self,
        name: &str,
        config: &ProviderConfig,
    ) -> Result<DiscoveredProvider, ProviderError>;
}

/// A connected provider together with the tools it exposes
pub struct DiscoveredProvider {
    pub connection: ProviderHandle,
    pub tools: Vec<Tool>,
}

impl DiscoveredProvider {
    pub fn new(connection: ProviderHandle, tools: Vec<Tool>) -> Self {
        Self { connection, tools }
    }

    /// Build tools from `(name, description)` pairs owned by `connection`
    pub fn from_specs<I, N, D>(connection: ProviderHandle, specs: I) -> Self
    where
        I: IntoIterator<Item = (N, D)>,
        N: Into<String>,
        D: Into<String>,
    {
        let tools = specs
            .into_iter()
            .map(|(name, description)| {
                Tool::new(name, description).with_provider(connection.clone())
            })
            .collect();
        Self { connection, tools }
    }
}
