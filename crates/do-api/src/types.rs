use serde::{Deserialize, Serialize};

// ── Account ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct Account {
    pub uuid: String,
    pub status: String,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct AccountResponse {
    pub account: Account,
}

// ── SSH keys ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SshKey {
    pub id: u64,
    pub name: String,
    pub fingerprint: String,
    #[serde(default)]
    pub public_key: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListSshKeysResponse {
    pub ssh_keys: Vec<SshKey>,
    #[serde(default)]
    pub links: Links,
    #[serde(default)]
    pub meta: Option<Meta>,
}

impl ListSshKeysResponse {
    pub fn has_next_page(&self) -> bool {
        self.links
            .pages
            .as_ref()
            .is_some_and(|p| p.next.is_some())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Links {
    #[serde(default)]
    pub pages: Option<Pages>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pages {
    #[serde(default)]
    pub next: Option<String>,
    #[serde(default)]
    pub last: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Meta {
    pub total: u64,
}

// ── Droplets ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct CreateDropletRequest {
    pub name: String,
    pub region: String,
    pub size: String,
    pub image: String,
    /// SSH key ids or fingerprints.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub ssh_keys: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_data: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Droplet {
    pub id: u64,
    pub name: String,
    pub status: DropletStatus,
    #[serde(default)]
    pub size_slug: Option<String>,
    #[serde(default)]
    pub region: Option<Region>,
    #[serde(default)]
    pub image: Option<Image>,
    #[serde(default)]
    pub networks: Networks,
}

impl Droplet {
    /// The first public IPv4 address, once the droplet has one.
    pub fn public_ipv4(&self) -> Option<&str> {
        self.networks
            .v4
            .iter()
            .find(|n| n.kind == "public")
            .map(|n| n.ip_address.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DropletStatus {
    New,
    Active,
    Off,
    Archive,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Networks {
    #[serde(default)]
    pub v4: Vec<NetworkV4>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct NetworkV4 {
    pub ip_address: String,
    #[serde(rename = "type")]
    pub kind: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Region {
    pub slug: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Image {
    pub id: u64,
    #[serde(default)]
    pub slug: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct DropletResponse {
    pub droplet: Droplet,
}
