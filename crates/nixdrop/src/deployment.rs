use async_trait::async_trait;
use nixdrop_stack::{Context, DropletArgs, Program};

use crate::config::DropletSettings;
use crate::userdata::UserData;

pub const OUTPUT_IP: &str = "dropletIP";
pub const OUTPUT_NAME: &str = "dropletName";

/// Declares the single droplet: an existing SSH key, the cloud-init
/// document, and two exports for its address and name.
pub struct DropletProgram {
    ssh_key_name: String,
    droplet: DropletSettings,
    user_data: UserData,
}

impl DropletProgram {
    pub fn new(
        ssh_key_name: impl Into<String>,
        droplet: DropletSettings,
        user_data: UserData,
    ) -> Self {
        Self {
            ssh_key_name: ssh_key_name.into(),
            droplet,
            user_data,
        }
    }
}

#[async_trait]
impl Program for DropletProgram {
    async fn run(&self, ctx: &mut Context) -> nixdrop_stack::Result<()> {
        let key = match ctx.lookup_ssh_key(&self.ssh_key_name).await {
            Ok(key) => key,
            Err(e) => {
                tracing::error!(ssh_key = %self.ssh_key_name, "{e}");
                return Err(e);
            }
        };

        let droplet = ctx.droplet(
            &self.droplet.name,
            DropletArgs {
                image: self.droplet.image.clone(),
                size: self.droplet.size.clone(),
                region: self.droplet.region.clone(),
                ssh_keys: vec![key.fingerprint],
                user_data: Some(self.user_data.0.clone()),
            },
        )?;

        ctx.export(OUTPUT_IP, droplet.ipv4_address());
        ctx.export(OUTPUT_NAME, droplet.name());
        Ok(())
    }
}
