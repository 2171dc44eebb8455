use std::collections::HashSet;

use tracing::{info, instrument, warn};

use crate::registry::{RegistryEvent, ToolRegistry};
use crate::tool::{connection_key, ProviderHandle};

/// Outcome of tearing down provider connections
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Providers that disconnected cleanly
    pub disconnected: Vec<String>,
    /// Providers whose disconnect reported an error
    pub failed: Vec<String>,
}

impl ShutdownReport {
    pub fn total(&self) -> usize {
        self.disconnected.len() + self.failed.len()
    }
}

/// Disconnect every distinct connection once, carrying on past failures
pub(crate) async fn disconnect_all(connections: &[ProviderHandle]) -> ShutdownReport {
    let mut seen = HashSet::new();
    let mut report = ShutdownReport::default();

    for connection in connections {
        if !seen.insert(connection_key(connection)) {
            continue;
        }
        let name = connection.name().to_string();
        match connection.disconnect().await {
            Ok(()) => {
                info!(provider = %name, "Disconnected provider");
                report.disconnected.push(name);
            }
            Err(e) => {
                warn!(provider = %name, error = %e, "Failed to disconnect provider");
                report.failed.push(name);
            }
        }
    }
    report
}

/// Tears down the provider connections behind a registry's catalog.
///
/// The supervisor never owns connections; it looks them up from the catalog
/// at shutdown time.
#[derive(Clone)]
pub struct ToolSupervisor {
    registry: ToolRegistry,
}

impl ToolSupervisor {
    pub fn new(registry: ToolRegistry) -> Self {
        Self { registry }
    }

    /// Distinct connections currently backing the catalog
    pub async fn connections(&self) -> Vec<ProviderHandle> {
        self.registry.connections().await
    }

    /// Cancel any in-flight load, then disconnect each backing provider exactly once.
    ///
    /// Tools merged before the cancellation took effect are kept until their
    /// providers are disconnected. Afterwards the catalog is empty and the registry
    /// is back to NotLoaded, so calling this again disconnects nothing.
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> ShutdownReport {
        if let Some(task) = self.registry.cancel_load().await {
            info!("Cancelling in-flight tool load");
            // Only the wind-down matters here; the result is always Cancelled or partial
            let _ = task.wait().await;
        }

        let catalog = self.registry.take_catalog().await;
        let connections = catalog.connections();
        if connections.is_empty() {
            return ShutdownReport::default();
        }

        info!(providers = connections.len(), "Shutting down tool providers");
        let report = disconnect_all(&connections).await;
        self.registry.publish(RegistryEvent::ShutDown);
        report
    }
}
