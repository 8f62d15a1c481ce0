use std::path::Path;

use anyhow::{bail, Result};
use log::info;

use crate::{
    area::area_name,
    cli::create_spinner,
    config::Config,
    report::{describe, summarize_period},
    tile::TileStore,
};

use super::parse_range;

/// Averages the cached tiles of a period and describes the result. Works offline.
pub fn summary(config: &Config, data_dir: &Path, start: &str, end: &str, area: &Path) -> Result<String> {
    let name = area_name(area)?;
    let range = parse_range(start, end)?;
    let store = TileStore::new(data_dir, name);

    let bar = create_spinner(format!("Reading tiles for `{}`...", name));
    let (means, tiles) = summarize_period(&store, &range)?;
    bar.finish_with_message(format!("{} tiles read", tiles));

    if tiles == 0 {
        bail!(
            "No cached tiles for `{}` between {} and {} in `{}`",
            name,
            range.start.date(),
            range.end.date(),
            data_dir.display()
        );
    }
    info!("{} of {} days have a tile", tiles, range.day_count());

    Ok(format!(
        "{}\n\n{}",
        means,
        describe(&means, &config.report.efficiency)
    ))
}
