use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use tracing::info;

use crate::plugin::major_version;
use crate::{Error, ProviderName, ProviderPlugin, Result, StateManager};

/// A project's home: where its stacks are stored and which provider
/// plugins it can use.
///
/// Plugins are registered as available with [`Workspace::with_plugin`] and
/// must be installed with [`Workspace::install_plugin`] before a stack can
/// reach the provider.
#[derive(Clone)]
pub struct Workspace {
    project: String,
    state: StateManager,
    available: HashMap<ProviderName, Arc<dyn ProviderPlugin>>,
    installed: HashMap<ProviderName, Arc<dyn ProviderPlugin>>,
}

impl Workspace {
    pub fn new(project: impl Into<String>, state_dir: impl AsRef<Path>) -> Self {
        let project = project.into();
        Self {
            state: StateManager::new(state_dir, project.clone()),
            project,
            available: HashMap::new(),
            installed: HashMap::new(),
        }
    }

    /// Make a plugin available for installation.
    pub fn with_plugin(mut self, plugin: Arc<dyn ProviderPlugin>) -> Self {
        self.available.insert(plugin.name(), plugin);
        self
    }

    pub fn project(&self) -> &str {
        &self.project
    }

    pub fn state(&self) -> &StateManager {
        &self.state
    }

    /// Install a provider plugin by name, e.g. `("digitalocean", "v4")`.
    ///
    /// The requested major version must match the available plugin's.
    pub fn install_plugin(&mut self, name: &str, version: &str) -> Result<()> {
        let provider: ProviderName = name.parse()?;
        let plugin = self
            .available
            .get(&provider)
            .ok_or_else(|| Error::Plugin(format!("no {provider} plugin available")))?;

        let wanted = major_version(version)
            .ok_or_else(|| Error::Plugin(format!("invalid plugin version {version:?}")))?;
        let have = major_version(plugin.version()).ok_or_else(|| {
            Error::Plugin(format!(
                "{provider} plugin has invalid version {:?}",
                plugin.version()
            ))
        })?;
        if wanted != have {
            return Err(Error::Plugin(format!(
                "{provider} plugin {} does not satisfy {version}",
                plugin.version()
            )));
        }

        info!(plugin = %provider, version = plugin.version(), "plugin installed");
        self.installed.insert(provider, plugin.clone());
        Ok(())
    }

    pub fn installed_plugin(&self, name: ProviderName) -> Result<&Arc<dyn ProviderPlugin>> {
        self.installed
            .get(&name)
            .ok_or(Error::PluginNotInstalled(name))
    }
}
