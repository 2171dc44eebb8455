use std::collections::BTreeSet;

use crate::tool::ToolCatalog;

/// A selection of tool names.
///
/// The two variants mean different things and are never interchangeable:
///
/// - `All` is the unfiltered selection. An empty list of names from a caller
///   maps here, and so does "every tool" over an empty catalog.
/// - `Only` is an explicit list. It may mention tools that are not in the
///   catalog; those simply select nothing. `Only` with no names at all is what
///   [`EnabledSet::disable_all`] produces and selects nothing.
///
/// Every mutation here is a pure set operation that consults the catalog only
/// to expand `All` or to find the tools of a provider.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum EnabledSet {
    #[default]
    All,
    Only(BTreeSet<String>),
}

impl EnabledSet {
    /// Build a selection from names; no names means everything
    pub fn from_names<I, S>(names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: BTreeSet<String> = names.into_iter().map(Into::into).collect();
        if names.is_empty() {
            EnabledSet::All
        } else {
            EnabledSet::Only(names)
        }
    }

    /// The explicit selection of every tool currently in the catalog, or `All`
    /// when the catalog is empty so that tools discovered later stay selected
    pub fn all_of(catalog: &ToolCatalog) -> Self {
        if catalog.is_empty() {
            return EnabledSet::All;
        }
        EnabledSet::Only(catalog.names().map(str::to_string).collect())
    }

    pub fn none() -> Self {
        EnabledSet::Only(BTreeSet::new())
    }

    pub fn is_all(&self) -> bool {
        matches!(self, EnabledSet::All)
    }

    pub fn contains(&self, name: &str) -> bool {
        match self {
            EnabledSet::All => true,
            EnabledSet::Only(names) => names.contains(name),
        }
    }

    /// Explicit names, or None for the unfiltered selection
    pub fn names(&self) -> Option<&BTreeSet<String>> {
        match self {
            EnabledSet::All => None,
            EnabledSet::Only(names) => Some(names),
        }
    }

    /// The names this selection stands for, expanding `All` over the catalog
    fn explicit_names(&self, catalog: &ToolCatalog) -> BTreeSet<String> {
        match self {
            EnabledSet::All => catalog.names().map(str::to_string).collect(),
            EnabledSet::Only(names) => names.clone(),
        }
    }

    /// Remove names, expanding `All` first. Removing nothing leaves `All` alone.
    fn remove_names<'a, I>(&mut self, names: I, catalog: &ToolCatalog)
    where
        I: IntoIterator<Item = &'a str>,
    {
        let names: Vec<&str> = names.into_iter().collect();
        if self.is_all() && !names.iter().any(|name| catalog.contains(name)) {
            return;
        }
        let mut kept = self.explicit_names(catalog);
        for name in names {
            kept.remove(name);
        }
        *self = EnabledSet::Only(kept);
    }

    pub fn set_enabled(&mut self, name: &str, enabled: bool, catalog: &ToolCatalog) {
        if !enabled {
            self.remove_names([name], catalog);
        } else if let EnabledSet::Only(names) = self {
            names.insert(name.to_string());
        }
    }

    pub fn enable_all(&mut self, catalog: &ToolCatalog) {
        *self = Self::all_of(catalog);
    }

    pub fn disable_all(&mut self) {
        *self = Self::none();
    }

    pub fn enable_provider(&mut self, provider: &str, catalog: &ToolCatalog) {
        if let EnabledSet::Only(names) = self {
            names.extend(
                catalog
                    .tools_for_provider(provider)
                    .map(|tool| tool.name().to_string()),
            );
        }
    }

    pub fn disable_provider(&mut self, provider: &str, catalog: &ToolCatalog) {
        self.remove_names(
            catalog.tools_for_provider(provider).map(|tool| tool.name()),
            catalog,
        );
    }

    /// True when the provider owns at least one tool and every one is selected
    pub fn all_enabled_for_provider(&self, provider: &str, catalog: &ToolCatalog) -> bool {
        let mut tools = catalog.tools_for_provider(provider).peekable();
        tools.peek().is_some() && tools.all(|tool| self.contains(tool.name()))
    }

    pub fn any_enabled_for_provider(&self, provider: &str, catalog: &ToolCatalog) -> bool {
        catalog
            .tools_for_provider(provider)
            .any(|tool| self.contains(tool.name()))
    }
}
