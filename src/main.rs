use anyhow::{Context, Result};
use log::{error, info};

use block_configurator::aps::{ApsClient, ClientCredentials};
use block_configurator::bootstrap::setup::{initialize_folder, initialize_logger, purge_bucket};
use block_configurator::build_rocket;
use block_configurator::common::errors::handle_error;
use block_configurator::common::{JOB_RUNTIME, ROCKET_RUNTIME};
use block_configurator::config::AppConfig;
use block_configurator::context::{AppContext, Remotes};
use block_configurator::notify::NotificationHub;

fn main() -> Result<()> {
    initialize_logger();

    let config = AppConfig::from_env().map_err(handle_error)?;
    initialize_folder(&config).map_err(handle_error)?;

    let client = ApsClient::new(
        &config.aps_base_url,
        ClientCredentials {
            client_id: config.aps_client_id.clone(),
            client_secret: config.aps_client_secret.clone(),
        },
    )
    .context("Failed to build APS client")
    .map_err(handle_error)?;

    let context = AppContext::new(
        config,
        Remotes::from_client(client),
        NotificationHub::new(),
        JOB_RUNTIME.handle().clone(),
    );
    info!(
        "Using bucket {} and nickname {}",
        context.bucket(),
        context.provisioner.nickname()
    );

    if context.config.purge_on_startup {
        JOB_RUNTIME.block_on(purge_bucket(&context));
    }

    let result = ROCKET_RUNTIME.block_on(async { build_rocket(context).launch().await });
    match result {
        Ok(rocket) => {
            if let Some(context) = rocket.state::<AppContext>() {
                context.submitter.supervisor().abort_all();
            }
            info!("Server stopped");
            Ok(())
        }
        Err(e) => {
            error!("Rocket server failed: {}", e);
            Err(anyhow::Error::from(e))
        }
    }
}
