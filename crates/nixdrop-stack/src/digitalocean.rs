use std::sync::Arc;

use async_trait::async_trait;
use do_api::{CreateDropletRequest, DoClient, Droplet, DropletStatus};
use tracing::{info, warn};

use crate::types::{DropletId, DropletInfo, DropletSpec, DropletState, SshKey};
use crate::{CloudProvider, Error, ProviderName, ProviderPlugin, Result, StackConfig};

pub const PLUGIN_VERSION: &str = "4.0.0";
pub const TOKEN_KEY: &str = "digitalocean:token";
pub const API_ENDPOINT_KEY: &str = "digitalocean:apiEndpoint";

/// Plugin that builds a [`DigitalOceanProvider`] from stack config.
///
/// Reads `digitalocean:token` (required) and `digitalocean:apiEndpoint`
/// (optional, defaults to the public API).
#[derive(Debug, Clone, Copy, Default)]
pub struct DigitalOceanPlugin;

impl ProviderPlugin for DigitalOceanPlugin {
    fn name(&self) -> ProviderName {
        ProviderName::DigitalOcean
    }

    fn version(&self) -> &str {
        PLUGIN_VERSION
    }

    fn connect(&self, config: &StackConfig) -> Result<Arc<dyn CloudProvider>> {
        let token = config
            .get_str(TOKEN_KEY)
            .ok_or_else(|| Error::InvalidConfig(format!("{TOKEN_KEY} is not set")))?;

        let client = match config.get_str(API_ENDPOINT_KEY) {
            Some(endpoint) => DoClient::with_base_url(token, endpoint),
            None => DoClient::new(token),
        };

        Ok(Arc::new(DigitalOceanProvider::new(client)))
    }
}

/// DigitalOcean droplet provider.
///
/// Delegates to `do_api::DoClient` for all HTTP calls.
pub struct DigitalOceanProvider {
    client: DoClient,
}

impl DigitalOceanProvider {
    pub fn new(client: DoClient) -> Self {
        Self { client }
    }

    fn parse_state(status: DropletStatus) -> DropletState {
        match status {
            DropletStatus::New => DropletState::Starting,
            DropletStatus::Active => DropletState::Running,
            DropletStatus::Off => DropletState::Stopped,
            DropletStatus::Archive => DropletState::Archived,
            DropletStatus::Unknown => DropletState::Unknown,
        }
    }

    fn parse_id(id: &DropletId) -> Result<u64> {
        id.0.parse::<u64>()
            .map_err(|_| Error::InvalidId(id.0.clone()))
    }

    fn info(droplet: &Droplet) -> DropletInfo {
        DropletInfo {
            id: DropletId(droplet.id.to_string()),
            name: droplet.name.clone(),
            state: Self::parse_state(droplet.status),
            ipv4_address: droplet.public_ipv4().map(str::to_string),
        }
    }
}

#[async_trait]
impl CloudProvider for DigitalOceanProvider {
    async fn check_auth(&self) -> Result<String> {
        let account = self.client.get_account().await?;
        Ok(format!("account {} ({})", account.uuid, account.status))
    }

    async fn lookup_ssh_key(&self, name: &str) -> Result<SshKey> {
        let key = self
            .client
            .find_ssh_key_by_name(name)
            .await?
            .ok_or_else(|| Error::SshKeyNotFound(name.to_string()))?;

        Ok(SshKey {
            id: key.id.to_string(),
            name: key.name,
            fingerprint: key.fingerprint,
        })
    }

    async fn create_droplet(&self, spec: &DropletSpec) -> Result<DropletInfo> {
        let droplet = self
            .client
            .create_droplet(&CreateDropletRequest {
                name: spec.name.clone(),
                region: spec.region.clone(),
                size: spec.size.clone(),
                image: spec.image.clone(),
                ssh_keys: spec.ssh_keys.clone(),
                user_data: spec.user_data.clone(),
                tags: Vec::new(),
            })
            .await?;

        info!(
            droplet_id = droplet.id,
            name = %droplet.name,
            "digitalocean: droplet created"
        );
        Ok(Self::info(&droplet))
    }

    async fn get_droplet(&self, id: &DropletId) -> Result<Option<DropletInfo>> {
        let droplet_id = Self::parse_id(id)?;
        let droplet = self.client.get_droplet(droplet_id).await?;
        Ok(droplet.as_ref().map(Self::info))
    }

    async fn delete_droplet(&self, id: &DropletId) -> Result<()> {
        let droplet_id = Self::parse_id(id)?;

        if !self.client.delete_droplet(droplet_id).await? {
            warn!(droplet_id = %id, "digitalocean: droplet already destroyed");
            return Ok(());
        }

        info!(droplet_id = %id, "digitalocean: droplet destroyed");
        Ok(())
    }

    fn name(&self) -> ProviderName {
        ProviderName::DigitalOcean
    }
}
