use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use tradeguard::cli::{self, Cli, Commands};
use tradeguard::config::LoggingConfig;
use tradeguard::Result;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let (config, origin) = cli::load_config(cli.config.as_deref())?;
    init_logging(&config.logging, cli.json_logs);
    cli::log_config_origin(&origin);

    match cli.command {
        Commands::CheckConfig => cli::check_config(&config)?,
        Commands::Simulate {
            scenario,
            orders,
            json,
        } => {
            info!(scenario = %scenario, orders, "Starting simulation");
            cli::simulate(config, scenario, orders, json).await?;
        }
        Commands::InspectSnapshot { dir } => cli::inspect_snapshot(&config, dir).await?,
    }

    Ok(())
}

fn init_logging(logging: &LoggingConfig, force_json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},tradeguard=debug", logging.level))
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false);

    if logging.json || force_json {
        builder.json().init();
    } else {
        builder.init();
    }
}
