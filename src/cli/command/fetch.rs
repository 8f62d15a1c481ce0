use std::{
    fs,
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};
use indicatif::ProgressBar;
use log::info;

use crate::{
    area::AreaOfInterest,
    cli::create_progress_bar,
    config::Config,
    dates::DateRange,
    download::{CopernicusClient, ImageryService},
    extent::GridExtent,
    governor::Governor,
    mosaic::reduce_tiles,
    render,
    report::{self, IndexMeans},
    tile::{DayOutcome, TileFetcher, TileStore},
};

use super::parse_range;

#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub start: String,
    pub end: String,
    pub area: PathBuf,
    pub show: bool,
    pub overwrite: bool,
    pub save_mosaic: bool,
}

#[derive(Debug, Default)]
struct Tally {
    written: usize,
    cached: usize,
    no_imagery: usize,
    failed: usize,
}

impl Tally {
    fn count(&mut self, outcome: &DayOutcome) {
        match outcome {
            DayOutcome::Written(_) => self.written += 1,
            DayOutcome::Cached(_) => self.cached += 1,
            DayOutcome::NoImagery => self.no_imagery += 1,
            DayOutcome::Failed => self.failed += 1,
        }
    }
}

pub async fn fetch(config: &Config, data_dir: &Path, options: &FetchOptions) -> Result<String> {
    // input errors surface before any network activity
    let area = AreaOfInterest::from_kml(&options.area)
        .with_context(|| format!("Cannot load area from `{}`", options.area.display()))?;
    let extent = GridExtent::from_area(&area)?;
    let range = parse_range(&options.start, &options.end)?;
    config.require_credentials()?;

    info!(
        "Area `{}`: {}x{} pixels, {} days",
        area.name,
        extent.width,
        extent.height,
        range.day_count()
    );

    let client = CopernicusClient::new(config.auth.clone(), &config.requests.process_url);

    run(&client, config, data_dir, &area, extent, &range, options).await
}

async fn run<S>(
    service: &S,
    config: &Config,
    data_dir: &Path,
    area: &AreaOfInterest,
    extent: GridExtent,
    range: &DateRange,
    options: &FetchOptions,
) -> Result<String>
where
    S: ImageryService + ?Sized,
{
    let store = TileStore::new(data_dir, &area.name);
    let mut governor = Governor::new(config.requests.minute_rate);
    let fetcher = TileFetcher::new(
        service,
        area,
        extent,
        &store,
        config.requests.max_cloud_coverage,
        options.overwrite,
    );

    let bar = create_progress_bar(range.day_count() as u64, "Fetching days...".to_string());
    let tiles = collect_tiles(&fetcher, &mut governor, range, &bar).await?;

    let mut lines = vec![format!(
        "{} of {} days have a tile in `{}`",
        tiles.len(),
        range.day_count(),
        data_dir.display()
    )];

    if !(options.show || options.save_mosaic) {
        return Ok(lines.join("\n"));
    }

    let mosaic = reduce_tiles(&tiles, extent).context("Cannot mosaic the day tiles")?;
    let stem = format!("{}_{}", area.name, range.label());
    fs::create_dir_all(data_dir)?;

    if options.save_mosaic {
        let path = data_dir.join(format!("{}_mosaic.tif", stem));
        mosaic.write(&path)?;
        lines.push(format!("Mosaic saved to `{}`", path.display()));
    }

    if options.show {
        let path = data_dir.join(format!("{}_quicklook.png", stem));
        render::save(&mosaic, &path)?;
        lines.push(format!("Quick-look saved to `{}`", path.display()));

        let means = IndexMeans::from_mosaic(&mosaic);
        lines.push(String::new());
        lines.push(report::legend());
        lines.push(String::new());
        lines.push(report::COMBINATIONS.to_string());
        lines.push(String::new());
        lines.push(means.to_string());
        lines.push(String::new());
        lines.push(report::describe(&means, &config.report.efficiency));
    }

    Ok(lines.join("\n"))
}

/// Walks the range one day at a time and returns the tiles that exist afterwards, in day order.
async fn collect_tiles<S>(
    fetcher: &TileFetcher<'_, S>,
    governor: &mut Governor,
    range: &DateRange,
    bar: &ProgressBar,
) -> Result<Vec<PathBuf>>
where
    S: ImageryService + ?Sized,
{
    let mut tiles = Vec::new();
    let mut tally = Tally::default();

    for day in range.days() {
        bar.set_message(day.start.format("%Y-%m-%d").to_string());

        let outcome = fetcher
            .fetch_day(governor, &day)
            .await
            .with_context(|| format!("Aborted at {}", day.label()))?;
        tally.count(&outcome);
        if let Some(path) = outcome.tile() {
            tiles.push(path.clone());
        }

        bar.inc(1);
    }

    bar.finish_with_message("Days fetched");
    info!(
        "{} downloaded, {} cached, {} without imagery, {} failed",
        tally.written, tally.cached, tally.no_imagery, tally.failed
    );

    Ok(tiles)
}
