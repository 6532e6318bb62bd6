use std::env;
use std::path::PathBuf;

/// The droplet this program manages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DropletSettings {
    /// Logical resource name; the provider name gets a random suffix.
    pub name: String,
    pub image: String,
    pub size: String,
    pub region: String,
}

impl Default for DropletSettings {
    fn default() -> Self {
        Self {
            name: "temp-drop".into(),
            image: "ubuntu-22-10-x64".into(),
            size: "s-2vcpu-2gb-amd".into(),
            region: "sgp1".into(),
        }
    }
}

#[derive(Clone, PartialEq, Eq)]
pub struct RunConfig {
    pub project: String,
    pub stack: String,
    pub state_dir: PathBuf,
    pub user_data_path: PathBuf,
    /// Name of a pre-registered SSH key on the account.
    pub ssh_key_name: String,
    pub token: String,
    pub plugin: String,
    pub plugin_version: String,
    pub droplet: DropletSettings,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            project: "nixostest".into(),
            stack: "dev".into(),
            state_dir: PathBuf::from(".nixdrop"),
            user_data_path: PathBuf::from("nixos.yml"),
            ssh_key_name: String::new(),
            token: String::new(),
            plugin: "digitalocean".into(),
            plugin_version: "v4".into(),
            droplet: DropletSettings::default(),
        }
    }
}

impl RunConfig {
    /// Read from env vars:
    ///
    /// - `SSH_HOST`: SSH key name (the variable name is historical)
    /// - `DIGITALOCEAN_TOKEN`: personal access token
    /// - `NIXDROP_STATE_DIR` (default: `.nixdrop`)
    /// - `NIXDROP_USER_DATA` (default: `nixos.yml`)
    ///
    /// Unset credentials read as empty; the provider rejects them later.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            ssh_key_name: env::var("SSH_HOST").unwrap_or_default(),
            token: env::var("DIGITALOCEAN_TOKEN").unwrap_or_default(),
            state_dir: env::var("NIXDROP_STATE_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.state_dir),
            user_data_path: env::var("NIXDROP_USER_DATA")
                .map(PathBuf::from)
                .unwrap_or(defaults.user_data_path),
            ..defaults
        }
    }
}

impl std::fmt::Debug for RunConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RunConfig")
            .field("project", &self.project)
            .field("stack", &self.stack)
            .field("state_dir", &self.state_dir)
            .field("user_data_path", &self.user_data_path)
            .field("ssh_key_name", &self.ssh_key_name)
            .field("token", &"[redacted]")
            .field("plugin", &self.plugin)
            .field("plugin_version", &self.plugin_version)
            .field("droplet", &self.droplet)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_the_deployed_droplet() {
        let config = RunConfig::default();
        assert_eq!(config.project, "nixostest");
        assert_eq!(config.stack, "dev");
        assert_eq!(config.droplet.image, "ubuntu-22-10-x64");
        assert_eq!(config.droplet.size, "s-2vcpu-2gb-amd");
        assert_eq!(config.droplet.region, "sgp1");
        assert_eq!(config.user_data_path, PathBuf::from("nixos.yml"));
    }

    #[test]
    fn debug_output_hides_the_token() {
        let config = RunConfig {
            token: "dop_v1_secret".into(),
            ..RunConfig::default()
        };
        assert!(!format!("{config:?}").contains("dop_v1_secret"));
    }
}
