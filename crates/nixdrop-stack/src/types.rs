use serde::{Deserialize, Serialize};
use std::fmt;

/// Opaque provider-side droplet identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DropletId(pub String);

impl fmt::Display for DropletId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Specification for creating a droplet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropletSpec {
    pub name: String,
    pub image: String,
    pub size: String,
    pub region: String,
    /// SSH key fingerprints installed for root.
    pub ssh_keys: Vec<String>,
    /// Cloud-init payload, passed through untouched.
    pub user_data: Option<String>,
}

/// Droplet status and metadata returned from the provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropletInfo {
    pub id: DropletId,
    pub name: String,
    pub state: DropletState,
    pub ipv4_address: Option<String>,
}

impl DropletInfo {
    /// Active and reachable on a public address.
    pub fn is_ready(&self) -> bool {
        self.state == DropletState::Running && self.ipv4_address.is_some()
    }
}

/// Provider-reported droplet state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropletState {
    Starting,
    Running,
    Stopped,
    Archived,
    Unknown,
}

impl fmt::Display for DropletState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Stopped => "stopped",
            Self::Archived => "archived",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// An SSH key registered with the provider account.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshKey {
    pub id: String,
    pub name: String,
    pub fingerprint: String,
}
