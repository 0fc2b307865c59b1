//! Plugin discovery.
//!
//! A plugin provider contributes node-type handles under the same executor
//! contract as the built-ins. Providers are named in a plain-text services
//! manifest (one provider id per line, `#` comments allowed) resolved
//! against registered factories, mirroring a service-provider lookup.

use std::path::Path;
use std::sync::Arc;

use dashmap::DashMap;
use tracing::info;

use crate::error::EngineError;
use crate::executor::{NodeExecutor, NodeExecutorRegistry};
use crate::logger::LogEntry;

/// Conventional location of the services manifest inside a plugin bundle.
pub const SERVICES_MANIFEST_PATH: &str = "META-INF/services/PluginProvider";

/// A dependency on another plugin.
#[derive(Debug, Clone)]
pub struct PluginDependency {
    pub plugin_id: String,
    /// Version requirement, matched as an exact value or prefix
    /// (`"1"` accepts `"1.4.2"`). Empty accepts anything.
    pub version_req: String,
}

/// A discoverable bundle of node-type handles.
pub trait PluginProvider: Send + Sync {
    /// Stable plugin id, the name used in the services manifest.
    fn id(&self) -> &str;

    fn version(&self) -> &str;

    /// The node executors this plugin contributes.
    fn handles(&self) -> Vec<Arc<dyn NodeExecutor>>;

    fn dependencies(&self) -> Vec<PluginDependency> {
        Vec::new()
    }

    /// Lifecycle events the plugin subscribed to.
    fn on_engine_event(&self, _entry: &LogEntry) {}
}

/// Factory producing a provider instance, registered under its plugin id.
pub type ProviderFactory = fn() -> Arc<dyn PluginProvider>;

/// Composes plugin providers and feeds their handles into the executor
/// registry. Process-scoped by design, like the rate-limit buckets.
#[derive(Default)]
pub struct PluginRegistry {
    factories: DashMap<String, ProviderFactory>,
    providers: DashMap<String, Arc<dyn PluginProvider>>,
}

impl PluginRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make a provider implementation available for manifest resolution.
    pub fn register_factory(&self, id: impl Into<String>, factory: ProviderFactory) {
        self.factories.insert(id.into(), factory);
    }

    /// Register a provider after verifying its declared dependencies.
    pub fn register_provider(
        &self,
        provider: Arc<dyn PluginProvider>,
    ) -> Result<(), EngineError> {
        for dep in provider.dependencies() {
            let found = self.providers.get(&dep.plugin_id).ok_or_else(|| {
                EngineError::Internal(format!(
                    "plugin '{}' requires missing plugin '{}'",
                    provider.id(),
                    dep.plugin_id
                ))
            })?;
            let version = found.version();
            if !dep.version_req.is_empty()
                && version != dep.version_req
                && !version.starts_with(&format!("{}.", dep.version_req))
            {
                return Err(EngineError::Internal(format!(
                    "plugin '{}' requires '{}' version {}, found {}",
                    provider.id(),
                    dep.plugin_id,
                    dep.version_req,
                    version
                )));
            }
        }
        info!(plugin = provider.id(), version = provider.version(), "plugin registered");
        self.providers
            .insert(provider.id().to_string(), provider);
        Ok(())
    }

    /// Load a services manifest and register every named provider. Returns
    /// the registered plugin ids, in manifest order.
    pub fn load_manifest(&self, path: &Path) -> Result<Vec<String>, EngineError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Internal(format!("cannot read plugin manifest: {e}")))?;
        let mut loaded = Vec::new();
        for line in contents.lines() {
            let name = line.trim();
            if name.is_empty() || name.starts_with('#') {
                continue;
            }
            let factory = self.factories.get(name).map(|f| *f.value()).ok_or_else(|| {
                EngineError::Internal(format!("no provider factory registered for '{name}'"))
            })?;
            self.register_provider(factory())?;
            loaded.push(name.to_string());
        }
        Ok(loaded)
    }

    /// Merge every registered provider's handles into the executor
    /// registry.
    pub fn install_into(&self, registry: &NodeExecutorRegistry) {
        for provider in self.providers.iter() {
            for handle in provider.handles() {
                registry.register(handle);
            }
        }
    }

    /// Fan a lifecycle event out to subscribed providers.
    pub fn broadcast_event(&self, entry: &LogEntry) {
        for provider in self.providers.iter() {
            provider.on_engine_event(entry);
        }
    }

    pub fn provider_ids(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.key().clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executors::control::NoOpExecutor;

    struct TestProvider;

    impl PluginProvider for TestProvider {
        fn id(&self) -> &str {
            "test-plugin"
        }

        fn version(&self) -> &str {
            "1.2.0"
        }

        fn handles(&self) -> Vec<Arc<dyn NodeExecutor>> {
            vec![Arc::new(NoOpExecutor)]
        }
    }

    struct DependentProvider;

    impl PluginProvider for DependentProvider {
        fn id(&self) -> &str {
            "dependent"
        }

        fn version(&self) -> &str {
            "0.1.0"
        }

        fn handles(&self) -> Vec<Arc<dyn NodeExecutor>> {
            Vec::new()
        }

        fn dependencies(&self) -> Vec<PluginDependency> {
            vec![PluginDependency {
                plugin_id: "test-plugin".to_string(),
                version_req: "1".to_string(),
            }]
        }
    }

    #[test]
    fn dependency_resolution() {
        let registry = PluginRegistry::new();
        // Dependent first: refused, its dependency is absent.
        assert!(registry
            .register_provider(Arc::new(DependentProvider))
            .is_err());

        registry
            .register_provider(Arc::new(TestProvider))
            .unwrap();
        registry
            .register_provider(Arc::new(DependentProvider))
            .unwrap();
        assert_eq!(registry.provider_ids().len(), 2);
    }

    #[test]
    fn handles_install_into_executor_registry() {
        let plugins = PluginRegistry::new();
        plugins.register_provider(Arc::new(TestProvider)).unwrap();

        let executors = NodeExecutorRegistry::bare();
        plugins.install_into(&executors);
        assert!(executors.get("noOp").is_some());
    }
}
