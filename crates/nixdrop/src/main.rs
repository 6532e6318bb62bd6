mod config;
mod deployment;
mod driver;
mod error;
mod mode;
mod userdata;

use std::process::ExitCode;
use std::sync::Arc;

use nixdrop_stack::ProviderPlugin;
use nixdrop_stack::digitalocean::DigitalOceanPlugin;
use tracing_subscriber::EnvFilter;

use crate::config::RunConfig;
use crate::mode::Mode;

#[tokio::main]
async fn main() -> ExitCode {
    // Load .env if present
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let mode = Mode::from_args(std::env::args());
    let config = RunConfig::from_env();
    tracing::debug!(?mode, ?config, "starting");

    let plugins: Vec<Arc<dyn ProviderPlugin>> = vec![Arc::new(DigitalOceanPlugin)];

    match driver::run(&config, mode, plugins).await {
        Ok(_) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{e}");
            ExitCode::FAILURE
        }
    }
}
