//! In-memory cloud for running stacks without a DigitalOcean account.
//!
//! `MemoryCloud` records every call it receives so tests can assert on
//! exactly what the engine asked the provider to do.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;

use crate::digitalocean::{PLUGIN_VERSION, TOKEN_KEY};
use crate::types::{DropletId, DropletInfo, DropletSpec, DropletState, SshKey};
use crate::{CloudProvider, Error, ProviderName, ProviderPlugin, Result, StackConfig};

/// A provider call as seen by the memory cloud.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    CheckAuth,
    LookupSshKey(String),
    CreateDroplet(DropletSpec),
    GetDroplet(DropletId),
    DeleteDroplet(DropletId),
}

#[derive(Default)]
struct Inner {
    ssh_keys: Vec<SshKey>,
    droplets: BTreeMap<u64, DropletInfo>,
    /// Remaining `get_droplet` polls before a booting droplet is active.
    booting: BTreeMap<u64, u32>,
    boot_polls: u32,
    next_id: u64,
    calls: Vec<Call>,
    reject_auth: bool,
    fail_creates: bool,
}

#[derive(Default)]
pub struct MemoryCloud {
    inner: Mutex<Inner>,
}

impl MemoryCloud {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an SSH key on the account.
    pub fn with_ssh_key(self, name: &str, fingerprint: &str) -> Self {
        {
            let mut inner = self.inner();
            let id = inner.ssh_keys.len() as u64 + 1;
            inner.ssh_keys.push(SshKey {
                id: id.to_string(),
                name: name.to_string(),
                fingerprint: fingerprint.to_string(),
            });
        }
        self
    }

    /// New droplets stay in `new` status for this many reads.
    pub fn with_boot_polls(self, polls: u32) -> Self {
        self.inner().boot_polls = polls;
        self
    }

    /// Fail every credential check, as with a revoked token.
    pub fn with_rejected_token(self) -> Self {
        self.inner().reject_auth = true;
        self
    }

    /// Make `create_droplet` fail until switched back, as with an exhausted
    /// droplet quota.
    pub fn fail_creates(&self, fail: bool) {
        self.inner().fail_creates = fail;
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn calls(&self) -> Vec<Call> {
        self.inner().calls.clone()
    }

    pub fn created(&self) -> Vec<DropletSpec> {
        self.inner()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::CreateDroplet(spec) => Some(spec.clone()),
                _ => None,
            })
            .collect()
    }

    pub fn deleted(&self) -> Vec<DropletId> {
        self.inner()
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::DeleteDroplet(id) => Some(id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Droplets that currently exist.
    pub fn droplets(&self) -> Vec<DropletInfo> {
        self.inner().droplets.values().cloned().collect()
    }

    /// Delete a droplet behind the engine's back.
    pub fn remove_out_of_band(&self, id: &DropletId) {
        if let Ok(id) = id.0.parse::<u64>() {
            self.inner().droplets.remove(&id);
        }
    }

    fn parse_id(id: &DropletId) -> Result<u64> {
        id.0.parse::<u64>()
            .map_err(|_| Error::InvalidId(id.0.clone()))
    }
}

#[async_trait]
impl CloudProvider for MemoryCloud {
    async fn check_auth(&self) -> Result<String> {
        let mut inner = self.inner();
        inner.calls.push(Call::CheckAuth);
        if inner.reject_auth {
            return Err(Error::Provider("401 unauthorized".into()));
        }
        Ok("memory account".into())
    }

    async fn lookup_ssh_key(&self, name: &str) -> Result<SshKey> {
        let mut inner = self.inner();
        inner.calls.push(Call::LookupSshKey(name.to_string()));
        inner
            .ssh_keys
            .iter()
            .find(|k| k.name == name)
            .cloned()
            .ok_or_else(|| Error::SshKeyNotFound(name.to_string()))
    }

    async fn create_droplet(&self, spec: &DropletSpec) -> Result<DropletInfo> {
        let mut inner = self.inner();
        inner.calls.push(Call::CreateDroplet(spec.clone()));
        if inner.fail_creates {
            return Err(Error::Provider("422 droplet limit exceeded".into()));
        }

        inner.next_id += 1;
        let id = inner.next_id;
        let booting = inner.boot_polls > 0;
        let info = DropletInfo {
            id: DropletId(id.to_string()),
            name: spec.name.clone(),
            state: if booting {
                DropletState::Starting
            } else {
                DropletState::Running
            },
            ipv4_address: (!booting).then(|| format!("203.0.113.{}", id % 256)),
        };

        inner.droplets.insert(id, info.clone());
        if booting {
            let polls = inner.boot_polls;
            inner.booting.insert(id, polls);
        }
        Ok(info)
    }

    async fn get_droplet(&self, id: &DropletId) -> Result<Option<DropletInfo>> {
        let droplet_id = Self::parse_id(id)?;
        let mut inner = self.inner();
        inner.calls.push(Call::GetDroplet(id.clone()));

        let booted = match inner.booting.get_mut(&droplet_id) {
            Some(remaining) => {
                *remaining = remaining.saturating_sub(1);
                *remaining == 0
            }
            None => false,
        };
        if booted {
            inner.booting.remove(&droplet_id);
            if let Some(droplet) = inner.droplets.get_mut(&droplet_id) {
                droplet.state = DropletState::Running;
                droplet.ipv4_address = Some(format!("203.0.113.{}", droplet_id % 256));
            }
        }

        Ok(inner.droplets.get(&droplet_id).cloned())
    }

    async fn delete_droplet(&self, id: &DropletId) -> Result<()> {
        let droplet_id = Self::parse_id(id)?;
        let mut inner = self.inner();
        inner.calls.push(Call::DeleteDroplet(id.clone()));
        inner.droplets.remove(&droplet_id);
        inner.booting.remove(&droplet_id);
        Ok(())
    }

    fn name(&self) -> ProviderName {
        ProviderName::DigitalOcean
    }
}

/// Plugin handing out a shared [`MemoryCloud`] in place of DigitalOcean.
///
/// Like the real plugin it refuses to connect without `digitalocean:token`.
pub struct MemoryPlugin {
    cloud: Arc<MemoryCloud>,
}

impl MemoryPlugin {
    pub fn new(cloud: Arc<MemoryCloud>) -> Self {
        Self { cloud }
    }
}

impl ProviderPlugin for MemoryPlugin {
    fn name(&self) -> ProviderName {
        ProviderName::DigitalOcean
    }

    fn version(&self) -> &str {
        PLUGIN_VERSION
    }

    fn connect(&self, config: &StackConfig) -> Result<Arc<dyn CloudProvider>> {
        if config.get_str(TOKEN_KEY).is_none() {
            return Err(Error::InvalidConfig(format!("{TOKEN_KEY} is not set")));
        }
        Ok(self.cloud.clone())
    }
}
