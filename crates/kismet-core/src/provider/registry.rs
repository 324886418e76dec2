//! Provider registry: the set of providers this control plane accepts.

use std::collections::BTreeMap;

use super::aws::AwsProvider;
use super::trait_def::Provider;

/// Registered [`Provider`] drivers, keyed by name.
#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Box<dyn Provider>>,
}

impl ProviderRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry containing every built-in provider.
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();
        registry.register(AwsProvider);
        registry
    }

    /// Register a driver under [`Provider::name`], returning any driver it
    /// replaced.
    pub fn register(&mut self, provider: impl Provider + 'static) -> Option<Box<dyn Provider>> {
        let name = provider.name().to_string();
        self.providers.insert(name, Box::new(provider))
    }

    pub fn get(&self, name: &str) -> Option<&dyn Provider> {
        self.providers.get(name).map(|b| b.as_ref())
    }

    /// Registered names in sorted order.
    pub fn names(&self) -> Vec<&str> {
        self.providers.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }
}

impl std::fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}
