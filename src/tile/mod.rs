//! Per-day tiles: pixel records and their CSV storage.

pub mod fetch;

use std::{
    fs::{self, File},
    path::{Path, PathBuf},
};

use serde::{Deserialize, Serialize};

use crate::{
    dates::Day,
    error::{Error, Result},
    geotiff::Raster,
};

pub use fetch::{DayOutcome, TileFetcher};

/// The four vegetation indices carried into mosaics, in band order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IndexBand {
    Ndvi,
    Ndre,
    Ndmi,
    Gci,
}

impl IndexBand {
    pub const ALL: [IndexBand; 4] = [
        IndexBand::Ndvi,
        IndexBand::Ndre,
        IndexBand::Ndmi,
        IndexBand::Gci,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            IndexBand::Ndvi => "NDVI",
            IndexBand::Ndre => "NDRE",
            IndexBand::Ndmi => "NDMI",
            IndexBand::Gci => "GCI",
        }
    }
}

/// One pixel of a day tile. X/Y are the pixel centre in the raster's coordinate system; an
/// empty value means no data.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PixelRecord {
    #[serde(rename = "X")]
    pub x: f64,
    #[serde(rename = "Y")]
    pub y: f64,
    #[serde(rename = "NDVI")]
    pub ndvi: Option<f32>,
    #[serde(rename = "NDRE")]
    pub ndre: Option<f32>,
    #[serde(rename = "NDMI")]
    pub ndmi: Option<f32>,
    #[serde(rename = "GCI")]
    pub gci: Option<f32>,
    #[serde(rename = "B08")]
    pub b08: Option<f32>,
    #[serde(rename = "B04")]
    pub b04: Option<f32>,
    #[serde(rename = "B05")]
    pub b05: Option<f32>,
}

impl PixelRecord {
    pub fn index(&self, band: IndexBand) -> Option<f32> {
        let value = match band {
            IndexBand::Ndvi => self.ndvi,
            IndexBand::Ndre => self.ndre,
            IndexBand::Ndmi => self.ndmi,
            IndexBand::Gci => self.gci,
        };
        value.filter(|v| !v.is_nan())
    }
}

/// Converts a decoded provider raster (`[NDVI, NDRE, NDMI, GCI, B08, B04, B05]`) into records,
/// row-major from the top-left pixel.
pub fn pixel_records(raster: &Raster) -> Result<Vec<PixelRecord>> {
    if raster.bands() < IndexBand::ALL.len() {
        return Err(Error::InvalidRaster(format!(
            "expected at least {} bands, got {}",
            IndexBand::ALL.len(),
            raster.bands()
        )));
    }

    let sample = |band: usize, row: usize, col: usize| -> Option<f32> {
        if band >= raster.bands() {
            return None;
        }
        let v = raster.data[[band, row, col]];
        (!v.is_nan()).then_some(v)
    };

    let mut records = Vec::with_capacity(raster.width() * raster.height());
    for row in 0..raster.height() {
        for col in 0..raster.width() {
            let (x, y) = raster.transform.pixel_center(row, col);
            records.push(PixelRecord {
                x,
                y,
                ndvi: sample(0, row, col),
                ndre: sample(1, row, col),
                ndmi: sample(2, row, col),
                gci: sample(3, row, col),
                b08: sample(4, row, col),
                b04: sample(5, row, col),
                b05: sample(6, row, col),
            });
        }
    }

    Ok(records)
}

/// Directory of day tiles for one area, one CSV file per day.
#[derive(Debug, Clone)]
pub struct TileStore {
    dir: PathBuf,
    area: String,
}

impl TileStore {
    pub fn new(dir: &Path, area: &str) -> Self {
        TileStore {
            dir: dir.to_path_buf(),
            area: area.to_string(),
        }
    }

    /// `{area}_{day start}_{day end}_pixels.csv`
    pub fn path_for(&self, day: &Day) -> PathBuf {
        self.dir
            .join(format!("{}_{}_pixels.csv", self.area, day.label()))
    }

    pub fn contains(&self, day: &Day) -> bool {
        self.path_for(day).is_file()
    }

    /// Writes the tile through a temporary file so an interrupted run never leaves a partial
    /// tile that would later be taken as cached.
    pub fn write(&self, day: &Day, records: &[PixelRecord]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir)?;

        let path = self.path_for(day);
        let partial = path.with_extension("csv.partial");

        let mut writer = csv::Writer::from_writer(File::create(&partial)?);
        for record in records {
            writer.serialize(record)?;
        }
        writer.flush()?;
        drop(writer);

        fs::rename(&partial, &path)?;

        Ok(path)
    }
}

pub fn read_tile(path: &Path) -> Result<Vec<PixelRecord>> {
    let mut reader = csv::Reader::from_path(path)?;
    let mut records = Vec::new();

    for result in reader.deserialize() {
        let record: PixelRecord = result?;
        records.push(record);
    }

    Ok(records)
}

// -- Tests -------------------------------------------------------------------
