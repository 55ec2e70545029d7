use anyhow::Result;
use clap::Parser;
use tracing::{error, info};

use super::context::CliContext;
use super::dispatch::dispatch;
use super::env::CliArgs;
use super::metrics::render_metrics;
use super::runtime::{apply_cli_overrides, init_logging, load_config, LoadedConfig};

pub async fn run() -> Result<()> {
    let cli = CliArgs::parse();

    init_logging(&cli.log_level, cli.debug, cli.log_json)?;

    info!("Starting Tabwright v{}", env!("CARGO_PKG_VERSION"));

    let LoadedConfig { mut config, path } = load_config(cli.config.as_ref()).await?;
    apply_cli_overrides(&mut config, &cli)?;
    let cli_context = CliContext::new(config, path, cli.output.clone());

    let result = dispatch(cli.command, &cli_context).await;

    if cli.metrics {
        match render_metrics() {
            Ok(text) => eprint!("{text}"),
            Err(err) => error!(?err, "failed to render metrics"),
        }
    }

    match result {
        Ok(()) => {
            info!("Command completed successfully");
            Ok(())
        }
        Err(err) => {
            error!("Command failed: {:#}", err);
            Err(err)
        }
    }
}
