mod area;
mod cli;
mod config;
mod dates;
mod download;
mod error;
mod extent;
mod geotiff;
mod governor;
mod mosaic;
mod render;
mod report;
mod tile;

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use cli::{command, Cli, Commands};
use config::Config;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    match run(&cli).await {
        Ok(message) => {
            println!("{}", message);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: &Cli) -> Result<String> {
    let config = Config::load(&cli.config)?;
    let data_dir = command::data_dir(&config, cli.data_dir.as_deref())?;

    match &cli.command {
        Commands::Fetch {
            start,
            end,
            area,
            show,
            overwrite,
            save_mosaic,
        } => {
            let options = command::FetchOptions {
                start: start.clone(),
                end: end.clone(),
                area: area.clone(),
                show: *show,
                overwrite: *overwrite,
                save_mosaic: *save_mosaic,
            };
            command::fetch(&config, &data_dir, &options).await
        }
        Commands::Summary { start, end, area } => {
            command::summary(&config, &data_dir, start, end, area)
        }
    }
}
