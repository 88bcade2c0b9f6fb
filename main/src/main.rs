use std::process::ExitCode;

use clap::{CommandFactory, Parser};
use common::{error::AppError, utils::config::get_config};
use dataset_pipeline::HfHubClient;
use tracing::error;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod args;
mod commands;
mod server;

use args::{Cli, Command};
use server::ServerSettings;

fn main() -> anyhow::Result<ExitCode> {
    let cli = Cli::parse();

    // Set up tracing
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .ok();

    let Some(command) = cli.command else {
        Cli::command().print_help()?;
        return Ok(ExitCode::SUCCESS);
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    match runtime.block_on(run(command)) {
        Ok(code) => Ok(code),
        Err(AppError::DatasetLayout(message)) => {
            error!("{message}");
            eprintln!("Error: {message}");
            Ok(ExitCode::FAILURE)
        }
        Err(err) => Err(err.into()),
    }
}

async fn run(command: Command) -> Result<ExitCode, AppError> {
    // Get config
    let config = get_config()?;

    match command {
        Command::Serve(args) => {
            let settings = ServerSettings::resolve(&args, &config)?;
            let hub = HfHubClient::new(&config.hf_endpoint, args.repo.token(&config))?;
            let Some(plan) = commands::prepare_serve(&args, &config, &hub).await? else {
                return Ok(ExitCode::SUCCESS);
            };
            server::serve(plan, settings, &config).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::DownloadArchives(args) => {
            let hub = HfHubClient::new(&config.hf_endpoint, args.repo.token(&config))?;
            commands::download_archives_command(&args, &config, &hub).await?;
            Ok(ExitCode::SUCCESS)
        }
        Command::Doctor => Ok(if commands::doctor(&config) {
            ExitCode::SUCCESS
        } else {
            ExitCode::FAILURE
        }),
    }
}
