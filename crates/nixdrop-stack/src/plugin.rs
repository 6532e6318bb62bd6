use std::sync::Arc;

use crate::{CloudProvider, ProviderName, Result, StackConfig};

/// Loads a [`CloudProvider`] from stack configuration.
pub trait ProviderPlugin: Send + Sync + 'static {
    fn name(&self) -> ProviderName;

    /// Semantic version of the plugin, e.g. `4.0.0`.
    fn version(&self) -> &str;

    /// Build a configured provider. Fails if required config is missing.
    fn connect(&self, config: &StackConfig) -> Result<Arc<dyn CloudProvider>>;
}

/// Major component of a version string. Accepts `v4`, `4`, `4.1.0`, `v4.1`.
pub fn major_version(version: &str) -> Option<u32> {
    let version = version.trim();
    let version = version.strip_prefix('v').unwrap_or(version);
    version.split('.').next()?.parse().ok()
}
