mod enabled;

pub use enabled::EnabledSet;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Config, ProviderConfig, ProviderConfigStore};
use crate::providers::{DiscoveredProvider, ProviderDiscovery, ProviderError};
use crate::supervisor::disconnect_all;
use crate::tool::{ProviderHandle, Tool, ToolCatalog, DEFAULT_UNGROUPED_LABEL};

const EVENT_CHANNEL_CAPACITY: usize = 64;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum RegistryError {
    #[error("Tool loading was cancelled")]
    Cancelled,
    #[error("Tool loading task failed: {0}")]
    TaskFailed(String),
}

/// Where the registry is in its load cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    NotLoaded,
    Loading,
    Loaded,
}

/// Published whenever observable registry state changes
#[derive(Debug, Clone, PartialEq)]
pub enum RegistryEvent {
    LoadStarted,
    /// Tools were merged into or removed from the catalog
    CatalogChanged { tools: usize },
    /// A load pass completed
    Loaded { tools: usize },
    /// The global enabled selection changed
    EnabledChanged,
    /// The supervisor disconnected every provider
    ShutDown,
}

#[derive(Debug, Clone)]
pub struct RegistrySettings {
    /// Upper bound on a single provider connect; None waits indefinitely
    pub connect_timeout: Option<Duration>,
    /// Group name for tools that have no provider
    pub ungrouped_label: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            connect_timeout: None,
            ungrouped_label: DEFAULT_UNGROUPED_LABEL.to_string(),
        }
    }
}

impl RegistrySettings {
    pub fn from_config(config: &Config) -> Self {
        let connect_timeout = config
            .get_param::<u64>("TOOLHUB_CONNECT_TIMEOUT")
            .ok()
            .map(Duration::from_secs);
        let ungrouped_label = config
            .get_param::<String>("TOOLHUB_UNGROUPED_LABEL")
            .unwrap_or_else(|_| DEFAULT_UNGROUPED_LABEL.to_string());

        Self {
            connect_timeout,
            ungrouped_label,
        }
    }
}

type LoadFuture = Shared<BoxFuture<'static, Result<usize, RegistryError>>>;

/// Handle to the single in-flight load. Every waiter awaits the same future.
#[derive(Clone)]
pub(crate) struct LoadTask {
    generation: u64,
    cancel: CancellationToken,
    done: LoadFuture,
}

impl LoadTask {
    pub(crate) fn cancel(&self) {
        self.cancel.cancel();
    }

    pub(crate) async fn wait(&self) -> Result<usize, RegistryError> {
        self.done.clone().await
    }
}

enum LoadState {
    NotLoaded,
    Loading(LoadTask),
    Loaded,
}

struct RegistryInner {
    state: LoadState,
    generation: u64,
    catalog: ToolCatalog,
    /// None until the global selection is first set, explicitly or by the first load
    enabled: Option<EnabledSet>,
}

struct RegistryCore {
    inner: Mutex<RegistryInner>,
    store: Arc<dyn ProviderConfigStore>,
    discovery: Arc<dyn ProviderDiscovery>,
    settings: RegistrySettings,
    events: broadcast::Sender<RegistryEvent>,
}

/// Catalog of every tool exposed by the configured providers.
///
/// All catalog and global selection mutations go through the registry's lock.
/// Loading is single-flight: concurrent callers of [`ToolRegistry::load_if_needed`]
/// share one discovery pass.
#[derive(Clone)]
pub struct ToolRegistry {
    core: Arc<RegistryCore>,
}

impl ToolRegistry {
    pub fn new(store: Arc<dyn ProviderConfigStore>, discovery: Arc<dyn ProviderDiscovery>) -> Self {
        Self::with_settings(store, discovery, RegistrySettings::default())
    }

    pub fn with_settings(
        store: Arc<dyn ProviderConfigStore>,
        discovery: Arc<dyn ProviderDiscovery>,
        settings: RegistrySettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let catalog = ToolCatalog::new(settings.ungrouped_label.clone());

        Self {
            core: Arc::new(RegistryCore {
                inner: Mutex::new(RegistryInner {
                    state: LoadState::NotLoaded,
                    generation: 0,
                    catalog,
                    enabled: None,
                }),
                store,
                discovery,
                settings,
                events,
            }),
        }
    }

    pub fn settings(&self) -> &RegistrySettings {
        &self.core.settings
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RegistryEvent> {
        self.core.events.subscribe()
    }

    pub async fn status(&self) -> LoadStatus {
        match self.core.inner.lock().await.state {
            LoadState::NotLoaded => LoadStatus::NotLoaded,
            LoadState::Loading(_) => LoadStatus::Loading,
            LoadState::Loaded => LoadStatus::Loaded,
        }
    }

    /// Load the catalog unless it is already loaded, joining an in-flight load if any
    pub async fn load_if_needed(&self) -> Result<(), RegistryError> {
        let task = {
            let mut inner = self.core.inner.lock().await;
            let existing = match &inner.state {
                LoadState::Loaded => return Ok(()),
                LoadState::Loading(task) => Some(task.clone()),
                LoadState::NotLoaded => None,
            };
            match existing {
                Some(task) => task,
                None => self.start_load(&mut inner, Vec::new()),
            }
        };

        self.follow(task).await.map(|_| ())
    }

    /// Drop the current catalog and load from scratch, even if already loaded.
    ///
    /// The new load disconnects the connections backing the discarded catalog
    /// before it connects again. The registry lock is not held meanwhile, so
    /// readers see an empty catalog in the Loading state.
    pub async fn reload(&self) -> Result<usize, RegistryError> {
        let task = {
            let mut inner = self.core.inner.lock().await;
            if let LoadState::Loading(task) = &inner.state {
                task.cancel();
            }

            let retired = inner.catalog.connections();
            inner.catalog.clear();
            self.publish(RegistryEvent::CatalogChanged { tools: 0 });

            self.start_load(&mut inner, retired)
        };

        self.follow(task).await
    }

    /// Wait for a load, moving on to its replacement when a reload superseded it.
    ///
    /// A load cancelled by shutdown leaves nothing to follow and reports Cancelled.
    async fn follow(&self, mut task: LoadTask) -> Result<usize, RegistryError> {
        loop {
            match task.wait().await {
                Ok(tools) => return Ok(tools),
                Err(RegistryError::Cancelled) => {
                    let inner = self.core.inner.lock().await;
                    match &inner.state {
                        LoadState::Loading(next) if next.generation != task.generation => {
                            debug!(generation = next.generation, "Joining newer load");
                            task = next.clone();
                        }
                        LoadState::Loaded => return Ok(inner.catalog.len()),
                        _ => return Err(RegistryError::Cancelled),
                    }
                }
                Err(err) => {
                    self.reset_failed(&task, &err).await;
                    return Err(err);
                }
            }
        }
    }

    fn start_load(&self, inner: &mut RegistryInner, retired: Vec<ProviderHandle>) -> LoadTask {
        inner.generation += 1;
        let generation = inner.generation;
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(run_load(
            self.core.clone(),
            generation,
            cancel.clone(),
            retired,
        ));
        let done = async move {
            match handle.await {
                Ok(result) => result,
                Err(e) if e.is_cancelled() => Err(RegistryError::Cancelled),
                Err(e) => Err(RegistryError::TaskFailed(e.to_string())),
            }
        }
        .boxed()
        .shared();

        let task = LoadTask {
            generation,
            cancel,
            done,
        };
        inner.state = LoadState::Loading(task.clone());
        self.publish(RegistryEvent::LoadStarted);
        task
    }

    /// A load task that died without being cancelled would otherwise stick in Loading
    async fn reset_failed(&self, task: &LoadTask, err: &RegistryError) {
        if !matches!(err, RegistryError::TaskFailed(_)) {
            return;
        }
        let mut inner = self.core.inner.lock().await;
        let current = matches!(
            &inner.state,
            LoadState::Loading(current) if current.generation == task.generation
        );
        if current {
            error!(error = %err, "Tool loading failed, registry reset");
            inner.state = LoadState::NotLoaded;
        }
    }

    /// Cancel the in-flight load, if any, and hand back its handle so the caller can await it
    pub(crate) async fn cancel_load(&self) -> Option<LoadTask> {
        let inner = self.core.inner.lock().await;
        match &inner.state {
            LoadState::Loading(task) => {
                task.cancel();
                Some(task.clone())
            }
            _ => None,
        }
    }

    /// Empty the catalog and return to NotLoaded, handing back what was loaded
    pub(crate) async fn take_catalog(&self) -> ToolCatalog {
        let mut inner = self.core.inner.lock().await;
        inner.state = LoadState::NotLoaded;
        let empty = ToolCatalog::new(self.core.settings.ungrouped_label.clone());
        let catalog = std::mem::replace(&mut inner.catalog, empty);
        if !catalog.is_empty() {
            self.publish(RegistryEvent::CatalogChanged { tools: 0 });
        }
        catalog
    }

    pub(crate) fn publish(&self, event: RegistryEvent) {
        self.core.publish(event);
    }

    /// Snapshot of the current catalog
    pub async fn catalog(&self) -> ToolCatalog {
        self.core.inner.lock().await.catalog.clone()
    }

    pub async fn tools(&self) -> Vec<Tool> {
        self.core.inner.lock().await.catalog.tools().to_vec()
    }

    /// Distinct live connections backing the current catalog
    pub async fn connections(&self) -> Vec<ProviderHandle> {
        self.core.inner.lock().await.catalog.connections()
    }

    /// Catalog tools selected by `enabled`, in catalog order
    pub async fn effective_tools(&self, enabled: &EnabledSet) -> Vec<Tool> {
        self.core.inner.lock().await.catalog.effective(enabled)
    }

    /// Like [`ToolRegistry::effective_tools`] for a plain list; no names means every tool
    pub async fn effective_tools_for_names<S: AsRef<str>>(&self, names: &[S]) -> Vec<Tool> {
        let enabled = EnabledSet::from_names(names.iter().map(|n| n.as_ref().to_string()));
        self.effective_tools(&enabled).await
    }

    pub async fn group_by_provider(&self) -> BTreeMap<String, Vec<Tool>> {
        self.core.inner.lock().await.catalog.group_by_provider()
    }

    pub async fn filter(&self, query: &str) -> Vec<Tool> {
        self.core.inner.lock().await.catalog.filter(query)
    }

    /// The global selection; unfiltered until something sets it
    pub async fn global_enabled(&self) -> EnabledSet {
        self.core
            .inner
            .lock()
            .await
            .enabled
            .clone()
            .unwrap_or_default()
    }

    pub async fn set_global_enabled(&self, enabled: EnabledSet) {
        self.update_global_enabled(|set, _| *set = enabled).await;
    }

    /// Apply a selection change to the global set under the registry lock
    pub async fn update_global_enabled<F>(&self, update: F)
    where
        F: FnOnce(&mut EnabledSet, &ToolCatalog),
    {
        let mut guard = self.core.inner.lock().await;
        let inner = &mut *guard;
        let before = inner.enabled.clone();
        let mut set = inner.enabled.take().unwrap_or_default();
        update(&mut set, &inner.catalog);
        let changed = before.as_ref() != Some(&set);
        inner.enabled = Some(set);
        if changed {
            self.publish(RegistryEvent::EnabledChanged);
        }
    }

    pub async fn set_enabled(&self, name: &str, enabled: bool) {
        self.update_global_enabled(|set, catalog| set.set_enabled(name, enabled, catalog))
            .await;
    }

    pub async fn enable_all(&self) {
        self.update_global_enabled(|set, catalog| set.enable_all(catalog))
            .await;
    }

    pub async fn disable_all(&self) {
        self.update_global_enabled(|set, _| set.disable_all()).await;
    }

    pub async fn enable_provider(&self, provider: &str) {
        self.update_global_enabled(|set, catalog| set.enable_provider(provider, catalog))
            .await;
    }

    pub async fn disable_provider(&self, provider: &str) {
        self.update_global_enabled(|set, catalog| set.disable_provider(provider, catalog))
            .await;
    }

    pub async fn is_enabled(&self, name: &str) -> bool {
        self.global_enabled().await.contains(name)
    }

    pub async fn all_enabled_for_provider(&self, provider: &str) -> bool {
        let inner = self.core.inner.lock().await;
        inner
            .enabled
            .clone()
            .unwrap_or_default()
            .all_enabled_for_provider(provider, &inner.catalog)
    }

    pub async fn any_enabled_for_provider(&self, provider: &str) -> bool {
        let inner = self.core.inner.lock().await;
        inner
            .enabled
            .clone()
            .unwrap_or_default()
            .any_enabled_for_provider(provider, &inner.catalog)
    }
}

impl RegistryCore {
    fn publish(&self, event: RegistryEvent) {
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    async fn connect(
        &self,
        name: &str,
        config: &ProviderConfig,
    ) -> Result<DiscoveredProvider, ProviderError> {
        match self.settings.connect_timeout {
            Some(timeout) => tokio::time::timeout(timeout, self.discovery.connect(name, config))
                .await
                .map_err(|_| ProviderError::Timeout {
                    name: name.to_string(),
                    timeout,
                })?,
            None => self.discovery.connect(name, config).await,
        }
    }

    /// Merge one provider's tools into the catalog, first name wins.
    ///
    /// Returns false when this load was superseded or cancelled, in which case the
    /// connection is closed here rather than handed to the catalog.
    async fn merge(
        &self,
        generation: u64,
        cancel: &CancellationToken,
        provider: &str,
        discovered: DiscoveredProvider,
    ) -> bool {
        let DiscoveredProvider { connection, tools } = discovered;
        let mut inner = self.inner.lock().await;

        if inner.generation != generation || cancel.is_cancelled() {
            drop(inner);
            debug!(provider, "Load cancelled, closing late connection");
            if let Err(e) = connection.disconnect().await {
                warn!(provider, error = %e, "Failed to close late connection");
            }
            return false;
        }

        let mut added = 0;
        for tool in tools {
            let name = tool.name().to_string();
            if inner.catalog.insert(tool) {
                debug!(provider, tool = %name, "Registered tool");
                added += 1;
            } else {
                let owner = inner
                    .catalog
                    .get(&name)
                    .map(|t| inner.catalog.group_of(t).to_string())
                    .unwrap_or_default();
                warn!(provider, tool = %name, kept_from = %owner, "Dropping duplicate tool");
            }
        }

        let total = inner.catalog.len();
        drop(inner);

        if added == 0 {
            // Nothing in the catalog points at this connection, so shutdown would never reach it
            debug!(provider, "Provider contributed no tools, disconnecting");
            if let Err(e) = connection.disconnect().await {
                warn!(provider, error = %e, "Failed to disconnect unused provider");
            }
        } else {
            info!(provider, tools = added, "Loaded tools from provider");
            self.publish(RegistryEvent::CatalogChanged { tools: total });
        }
        true
    }

    async fn finish(
        &self,
        generation: u64,
        cancel: &CancellationToken,
    ) -> Result<usize, RegistryError> {
        let mut inner = self.inner.lock().await;
        if inner.generation != generation || cancel.is_cancelled() {
            return Err(RegistryError::Cancelled);
        }

        inner.state = LoadState::Loaded;
        // An empty catalog leaves the selection unset for the next load to fill in
        if inner.enabled.is_none() && !inner.catalog.is_empty() {
            inner.enabled = Some(EnabledSet::all_of(&inner.catalog));
        }

        let tools = inner.catalog.len();
        info!(tools, "Tool catalog loaded");
        self.publish(RegistryEvent::Loaded { tools });
        Ok(tools)
    }
}

#[instrument(skip(core, cancel, retired))]
async fn run_load(
    core: Arc<RegistryCore>,
    generation: u64,
    cancel: CancellationToken,
    retired: Vec<ProviderHandle>,
) -> Result<usize, RegistryError> {
    if !retired.is_empty() {
        info!(connections = retired.len(), "Disconnecting providers before reload");
        disconnect_all(&retired).await;
    }

    let providers = core.store.load().unwrap_or_else(|e| {
        error!(error = %e, "Failed to read provider configuration");
        BTreeMap::new()
    });

    for (name, config) in providers {
        if !config.enabled {
            debug!(provider = %name, "Skipping disabled provider");
            continue;
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                info!("Tool loading cancelled");
                return Err(RegistryError::Cancelled);
            }
            result = core.connect(&name, &config) => result,
        };

        match result {
            Ok(discovered) => {
                if !core.merge(generation, &cancel, &name, discovered).await {
                    return Err(RegistryError::Cancelled);
                }
            }
            Err(e) => warn!(provider = %name, error = %e, "Failed to load tools from provider"),
        }
    }

    core.finish(generation, &cancel).await
}
