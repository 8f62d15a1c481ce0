pub mod fetch;
pub mod summary;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

pub use fetch::{fetch, FetchOptions};
pub use summary::summary;

use crate::{config::Config, dates::DateRange};

/// Resolves the tile directory: command line first, then configuration, then the default.
pub fn data_dir(config: &Config, cli_dir: Option<&Path>) -> Result<PathBuf> {
    match cli_dir {
        Some(dir) => Ok(dir.to_path_buf()),
        None => Ok(config.data_dir()?),
    }
}

pub fn parse_range(start: &str, end: &str) -> Result<DateRange> {
    DateRange::parse(start, end)
        .with_context(|| format!("Invalid date range `{}` to `{}`", start, end))
}
