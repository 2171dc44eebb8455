use std::collections::{BTreeMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::providers::ProviderConnection;
use crate::registry::EnabledSet;

/// Shared handle to the provider that hosts a tool
pub type ProviderHandle = Arc<dyn ProviderConnection>;

/// Label for tools that do not belong to any provider
pub const DEFAULT_UNGROUPED_LABEL: &str = "General";

/// A named capability exposed by a tool provider.
///
/// Tools are immutable once built. The owning provider is carried explicitly so
/// grouping and shutdown never have to guess where a tool came from.
#[derive(Clone)]
pub struct Tool {
    name: String,
    description: String,
    provider: Option<ProviderHandle>,
}

impl Tool {
    pub fn new<N, D>(name: N, description: D) -> Self
    where
        N: Into<String>,
        D: Into<String>,
    {
        Self {
            name: name.into(),
            description: description.into(),
            provider: None,
        }
    }

    pub fn with_provider(mut self, provider: ProviderHandle) -> Self {
        self.provider = Some(provider);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn provider(&self) -> Option<&ProviderHandle> {
        self.provider.as_ref()
    }

    pub fn provider_name(&self) -> Option<&str> {
        self.provider.as_ref().map(|p| p.name())
    }
}

impl fmt::Debug for Tool {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tool")
            .field("name", &self.name)
            .field("description", &self.description)
            .field("provider", &self.provider_name())
            .finish()
    }
}

impl PartialEq for Tool {
    fn eq(&self, other: &Self) -> bool {
        let same_provider = match (&self.provider, &other.provider) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            (None, None) => true,
            _ => false,
        };
        self.name == other.name && self.description == other.description && same_provider
    }
}

/// Identity of a connection, used to visit each shared connection once
pub(crate) fn connection_key(handle: &ProviderHandle) -> usize {
    Arc::as_ptr(handle) as *const () as usize
}

/// The deduplicated, ordered collection of known tools.
///
/// Order is discovery order. No two entries share a name: the first tool with a
/// given name wins and later ones are rejected by [`ToolCatalog::insert`].
#[derive(Clone, Debug)]
pub struct ToolCatalog {
    tools: Vec<Tool>,
    names: HashSet<String>,
    ungrouped_label: String,
}

impl Default for ToolCatalog {
    fn default() -> Self {
        Self::new(DEFAULT_UNGROUPED_LABEL)
    }
}

impl ToolCatalog {
    pub fn new<S: Into<String>>(ungrouped_label: S) -> Self {
        Self {
            tools: Vec::new(),
            names: HashSet::new(),
            ungrouped_label: ungrouped_label.into(),
        }
    }

    /// Build a catalog from tools in discovery order, dropping duplicate names
    pub fn from_tools<I>(tools: I) -> Self
    where
        I: IntoIterator<Item = Tool>,
    {
        let mut catalog = Self::default();
        for tool in tools {
            catalog.insert(tool);
        }
        catalog
    }

    /// Append a tool unless one with the same name is already present.
    /// Returns false when the tool was dropped as a duplicate.
    pub fn insert(&mut self, tool: Tool) -> bool {
        if self.names.contains(tool.name()) {
            return false;
        }
        self.names.insert(tool.name.clone());
        self.tools.push(tool);
        true
    }

    pub(crate) fn clear(&mut self) {
        self.tools.clear();
        self.names.clear();
    }

    pub fn tools(&self) -> &[Tool] {
        &self.tools
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.names.contains(name)
    }

    pub fn get(&self, name: &str) -> Option<&Tool> {
        self.tools.iter().find(|tool| tool.name() == name)
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.tools.iter().map(|tool| tool.name())
    }

    pub fn ungrouped_label(&self) -> &str {
        &self.ungrouped_label
    }

    /// The group a tool is listed under: its provider name, or the ungrouped label
    pub fn group_of<'a>(&'a self, tool: &'a Tool) -> &'a str {
        tool.provider_name().unwrap_or(&self.ungrouped_label)
    }

    pub fn tools_for_provider<'a>(&'a self, provider: &'a str) -> impl Iterator<Item = &'a Tool> {
        self.tools
            .iter()
            .filter(move |tool| self.group_of(tool) == provider)
    }

    /// Map each provider name to the tools it owns, keeping catalog order within a group
    pub fn group_by_provider(&self) -> BTreeMap<String, Vec<Tool>> {
        let mut groups: BTreeMap<String, Vec<Tool>> = BTreeMap::new();
        for tool in &self.tools {
            groups
                .entry(self.group_of(tool).to_string())
                .or_default()
                .push(tool.clone());
        }
        groups
    }

    /// The tools selected by `enabled`, in catalog order
    pub fn effective(&self, enabled: &EnabledSet) -> Vec<Tool> {
        self.tools
            .iter()
            .filter(|tool| enabled.contains(tool.name()))
            .cloned()
            .collect()
    }

    /// Case-insensitive substring search over name, description and provider name.
    /// A blank query matches everything.
    pub fn filter(&self, query: &str) -> Vec<Tool> {
        let query = query.trim().to_lowercase();
        if query.is_empty() {
            return self.tools.clone();
        }

        self.tools
            .iter()
            .filter(|tool| {
                tool.name().to_lowercase().contains(&query)
                    || tool.description().to_lowercase().contains(&query)
                    || self.group_of(tool).to_lowercase().contains(&query)
            })
            .cloned()
            .collect()
    }

    /// Distinct connections referenced by the catalog, in first-seen order
    pub fn connections(&self) -> Vec<ProviderHandle> {
        let mut seen = HashSet::new();
        self.tools
            .iter()
            .filter_map(|tool| tool.provider())
            .filter(|handle| seen.insert(connection_key(handle)))
            .cloned()
            .collect()
    }
}
