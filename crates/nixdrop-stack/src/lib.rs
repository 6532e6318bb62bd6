//! Declarative stack engine for a single-droplet deployment.
//!
//! A [`Stack`] couples a [`Program`] (which declares resources and exports
//! through a [`Context`]) with a persisted [`StackState`]. The engine
//! refreshes recorded resources against the provider, diffs declared
//! resources against the state, applies the plan, and resolves exports.
//!
//! Providers are reached through the [`CloudProvider`] trait and loaded by
//! a [`ProviderPlugin`] installed into the [`Workspace`].

pub mod config;
pub mod digitalocean;
#[cfg(any(test, feature = "testing"))]
pub mod memory;
pub mod plan;
pub mod plugin;
pub mod program;
pub mod stack;
pub mod state;
pub mod types;
pub mod workspace;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use config::{ConfigValue, StackConfig};
pub use plan::{Action, ActionType, Plan, PlanSummary};
pub use plugin::ProviderPlugin;
pub use program::{Context, DropletArgs, DropletRef, OutputRef, Program};
pub use stack::{DestroyResult, RefreshResult, Stack, UpResult, WaitPolicy};
pub use state::{ResourceState, StackState, StateLock, StateManager};
pub use workspace::Workspace;

use types::{DropletId, DropletInfo, DropletSpec, SshKey};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("digitalocean provider error: {0}")]
    DigitalOcean(#[from] do_api::Error),

    #[error("provider error: {0}")]
    Provider(String),

    #[error("plugin error: {0}")]
    Plugin(String),

    #[error("no plugin installed for provider {0}")]
    PluginNotInstalled(ProviderName),

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("ssh key not found: {0}")]
    SshKeyNotFound(String),

    #[error("invalid id: {0}")]
    InvalidId(String),

    #[error("resource declared twice: {0}")]
    DuplicateResource(String),

    #[error("unknown provider: {0}")]
    UnknownProvider(String),

    #[error("state error: {0}")]
    State(String),

    #[error("state is locked: {0}")]
    Lock(String),

    #[error("timed out: {0}")]
    Timeout(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// Known provider backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderName {
    DigitalOcean,
}

impl ProviderName {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DigitalOcean => "digitalocean",
        }
    }
}

impl fmt::Display for ProviderName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderName {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "digitalocean" => Ok(Self::DigitalOcean),
            other => Err(Error::UnknownProvider(other.to_string())),
        }
    }
}

/// The narrow set of provider calls the engine needs.
///
/// Implementations are produced by a [`ProviderPlugin`] from the stack's
/// configuration; the engine never constructs them directly.
#[async_trait]
pub trait CloudProvider: Send + Sync + 'static {
    /// Verify the credentials. Returns a short account description.
    async fn check_auth(&self) -> Result<String>;

    /// Resolve a pre-registered SSH key by its exact name.
    async fn lookup_ssh_key(&self, name: &str) -> Result<SshKey>;

    /// Create a droplet. The returned info may not have an address yet.
    async fn create_droplet(&self, spec: &DropletSpec) -> Result<DropletInfo>;

    /// Read a droplet, `None` if it no longer exists.
    async fn get_droplet(&self, id: &DropletId) -> Result<Option<DropletInfo>>;

    /// Delete a droplet. Deleting one that is already gone succeeds.
    async fn delete_droplet(&self, id: &DropletId) -> Result<()>;

    /// Provider identifier.
    fn name(&self) -> ProviderName;
}
