use std::sync::Arc;

use nixdrop_stack::digitalocean::TOKEN_KEY;
use nixdrop_stack::{ConfigValue, ProviderPlugin, Stack, Workspace};
use tracing::info;

use crate::config::RunConfig;
use crate::deployment::{DropletProgram, OUTPUT_IP, OUTPUT_NAME};
use crate::error::RunError;
use crate::mode::Mode;
use crate::userdata::UserData;

/// How a successful run ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Destroyed,
    Applied { ip: String, name: String },
}

/// Load the cloud-init file, prepare the stack, refresh it, then destroy
/// it or bring it up. The first failing step ends the run.
pub async fn run(
    config: &RunConfig,
    mode: Mode,
    plugins: Vec<Arc<dyn ProviderPlugin>>,
) -> Result<Outcome, RunError> {
    let user_data = UserData::load(&config.user_data_path).await?;

    let workspace = plugins
        .into_iter()
        .fold(Workspace::new(&config.project, &config.state_dir), |ws, plugin| {
            ws.with_plugin(plugin)
        });
    let program = Arc::new(DropletProgram::new(
        &config.ssh_key_name,
        config.droplet.clone(),
        user_data,
    ));

    let mut stack = Stack::upsert(workspace, &config.stack, program)
        .await
        .map_err(RunError::UpsertStack)?;

    stack
        .workspace_mut()
        .install_plugin(&config.plugin, &config.plugin_version)
        .map_err(|source| RunError::InstallPlugin {
            plugin: config.plugin.clone(),
            source,
        })?;

    stack
        .set_config(TOKEN_KEY, ConfigValue::secret(&config.token))
        .await
        .map_err(RunError::SetConfig)?;

    stack.refresh().await.map_err(RunError::Refresh)?;

    if mode == Mode::Destroy {
        info!("destroying stack...");
        stack.destroy().await.map_err(RunError::Destroy)?;
        info!("stack destroyed");
        return Ok(Outcome::Destroyed);
    }

    info!("bringing up the stack...");
    let result = stack.up().await.map_err(RunError::Up)?;

    let output = |key: &'static str| {
        result
            .outputs
            .get(key)
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or(RunError::MissingOutput(key))
    };
    let ip = output(OUTPUT_IP)?;
    let name = output(OUTPUT_NAME)?;

    info!("Done, droplet IP {ip}");
    info!("droplet Name {name}");
    Ok(Outcome::Applied { ip, name })
}
