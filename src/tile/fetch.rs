//! Downloads one day of imagery and turns it into a stored tile.

use std::path::PathBuf;

use log::{debug, info, warn};

use crate::{
    area::AreaOfInterest,
    dates::Day,
    download::{ImageryService, ProcessRequest},
    error::Result,
    extent::GridExtent,
    geotiff,
    governor::Governor,
};

use super::{pixel_records, TileStore};

/// What happened for one day. Only [`DayOutcome::Written`] and [`DayOutcome::Cached`] carry a
/// tile.
#[derive(Debug, Clone, PartialEq)]
pub enum DayOutcome {
    Written(PathBuf),
    Cached(PathBuf),
    /// Provider answered but the scene is fully masked or missing.
    NoImagery,
    /// Transport error, non-200 status, wrong content type or undecodable raster.
    Failed,
}

impl DayOutcome {
    pub fn tile(&self) -> Option<&PathBuf> {
        match self {
            DayOutcome::Written(path) | DayOutcome::Cached(path) => Some(path),
            DayOutcome::NoImagery | DayOutcome::Failed => None,
        }
    }
}

pub struct TileFetcher<'a, S: ImageryService + ?Sized> {
    service: &'a S,
    area: &'a AreaOfInterest,
    extent: GridExtent,
    store: &'a TileStore,
    max_cloud_coverage: u8,
    overwrite: bool,
}

impl<'a, S: ImageryService + ?Sized> TileFetcher<'a, S> {
    pub fn new(
        service: &'a S,
        area: &'a AreaOfInterest,
        extent: GridExtent,
        store: &'a TileStore,
        max_cloud_coverage: u8,
        overwrite: bool,
    ) -> Self {
        TileFetcher {
            service,
            area,
            extent,
            store,
            max_cloud_coverage,
            overwrite,
        }
    }

    /// Produces the tile for `day`. A cached tile short-circuits everything unless overwriting.
    ///
    /// Only credential and storage failures are returned as errors; anything going wrong with
    /// the request itself is logged and reported as [`DayOutcome::Failed`].
    pub async fn fetch_day(&self, governor: &mut Governor, day: &Day) -> Result<DayOutcome> {
        if !self.overwrite && self.store.contains(day) {
            let path = self.store.path_for(day);
            debug!("Using cached tile {}", path.display());
            return Ok(DayOutcome::Cached(path));
        }

        governor.admit().await;
        let token = governor.credential(self.service).await?;

        let request = ProcessRequest::new(
            self.area,
            self.extent,
            day.start,
            day.end,
            self.max_cloud_coverage,
        );

        let response = match self.service.process(&token, &request).await {
            Ok(response) => response,
            Err(e) => {
                warn!("Request for {} failed: {}", day.label(), e);
                return Ok(DayOutcome::Failed);
            }
        };

        if !response.is_image() {
            warn!(
                "Provider answered {} ({}) for {}: {}",
                response.status,
                response.content_type.as_deref().unwrap_or("no content type"),
                day.label(),
                String::from_utf8_lossy(&response.body)
            );
            return Ok(DayOutcome::Failed);
        }

        let raster = match geotiff::decode(&response.body) {
            Ok(raster) => raster,
            Err(e) => {
                warn!("Cannot decode raster for {}: {}", day.label(), e);
                return Ok(DayOutcome::Failed);
            }
        };

        if raster.is_empty() {
            info!("No usable imagery for {}", day.label());
            return Ok(DayOutcome::NoImagery);
        }

        let records = match pixel_records(&raster) {
            Ok(records) => records,
            Err(e) => {
                warn!("Unexpected raster layout for {}: {}", day.label(), e);
                return Ok(DayOutcome::Failed);
            }
        };

        let path = self.store.write(day, &records)?;
        info!("Saved {} pixels for {}", records.len(), day.label());

        Ok(DayOutcome::Written(path))
    }
}

// -- Tests -------------------------------------------------------------------
