//! Command line interface.

pub mod command;

use std::{path::PathBuf, time::Duration};

use clap::{command, ArgAction, Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};

#[derive(Parser)]
#[command(version, about, long_about = None)]
/// Downloads Sentinel-2 vegetation indices for an area and builds daily mosaics
pub struct Cli {
    /// Configuration file
    #[arg(long, global = true, default_value = "conf/conf.toml")]
    pub config: PathBuf,

    /// Directory holding the day tiles (overrides the configuration)
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    /// Log debug output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Fetch one tile per day and mosaic them
    Fetch {
        /// First day, `2024-05-01` or `2024-05-01T00:00:00Z`
        #[arg(long)]
        start: String,
        /// Last day, inclusive
        #[arg(long)]
        end: String,
        /// KML file with the area polygon
        #[arg(long)]
        area: PathBuf,
        /// Mosaic the tiles and write a PNG quick-look
        #[arg(long, default_value_t = true, action = ArgAction::Set)]
        show: bool,
        /// Download again even when a day is already cached
        #[arg(long, default_value_t = false, action = ArgAction::Set)]
        overwrite: bool,
        /// Keep the mosaic as a GeoTIFF next to the tiles
        #[arg(long)]
        save_mosaic: bool,
    },
    /// Summarise the cached tiles of a period
    Summary {
        #[arg(long)]
        start: String,
        #[arg(long)]
        end: String,
        #[arg(long)]
        area: PathBuf,
    },
}

/// Creates a spinner.
pub fn create_spinner(message: String) -> ProgressBar {
    let bar = ProgressBar::new_spinner().with_message(message);
    bar.enable_steady_tick(Duration::from_millis(100));

    bar
}

/// Creates a progress bar.
pub fn create_progress_bar(size: u64, message: String) -> ProgressBar {
    ProgressBar::new(size).with_message(message).with_style(
        ProgressStyle::with_template("[{eta_precise}] {bar:40.cyan/blue} {pos}/{len} {msg}")
            .unwrap()
            .progress_chars("##-"),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn should_parse_fetch_defaults() {
        let cli = Cli::parse_from([
            "vegmosaic",
            "fetch",
            "--start",
            "2024-05-01",
            "--end",
            "2024-05-03",
            "--area",
            "field.kml",
        ]);

        assert_eq!(cli.config, PathBuf::from("conf/conf.toml"));
        match cli.command {
            Commands::Fetch {
                show,
                overwrite,
                save_mosaic,
                ..
            } => {
                assert!(show);
                assert!(!overwrite);
                assert!(!save_mosaic);
            }
            Commands::Summary { .. } => panic!("expected fetch"),
        }
    }

    #[test]
    fn should_accept_explicit_booleans() {
        let cli = Cli::parse_from([
            "vegmosaic",
            "--verbose",
            "fetch",
            "--start",
            "2024-05-01",
            "--end",
            "2024-05-01",
            "--area",
            "field.kml",
            "--show",
            "false",
            "--overwrite",
            "true",
        ]);

        assert!(cli.verbose);
        assert!(matches!(
            cli.command,
            Commands::Fetch {
                show: false,
                overwrite: true,
                ..
            }
        ));
    }
}
