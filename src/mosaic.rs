//! Merges day tiles into one averaged four-band raster, keyed by pixel coordinate.
//!
//! Georeferencing comes from the first tile. Every later tile contributes by coordinate only,
//! so tiles that do not share the first tile's grid still merge, but their cells may not line
//! up with the output grid.

use std::{cmp::Ordering, collections::BTreeMap, path::Path};

use log::{debug, info, warn};
use ndarray::Array3;

use crate::{
    error::{Error, Result},
    extent::GridExtent,
    geotiff::{self, GeoTransform, WGS84_EPSG},
    tile::{read_tile, IndexBand, PixelRecord},
};

const BANDS: usize = IndexBand::ALL.len();

/// Extra decimal places kept beyond the pixel size when rounding coordinates.
const KEY_EXTRA_DECIMALS: i32 = 3;
const MAX_KEY_DECIMALS: i32 = 12;

/// Mean length of one degree of latitude.
const METRES_PER_DEGREE: f64 = 111_320.0;
const MIN_COS_LAT: f64 = 1e-6;

/// Relative pixel-size difference above which a tile is reported as off-grid.
const PIXEL_SIZE_TOLERANCE: f64 = 0.01;

/// Rounded `(y, x)` coordinate. Orders north to south, then west to east.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct CoordKey {
    y: i64,
    x: i64,
}

impl Ord for CoordKey {
    fn cmp(&self, other: &Self) -> Ordering {
        other.y.cmp(&self.y).then(self.x.cmp(&other.x))
    }
}

impl PartialOrd for CoordKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct Accumulator {
    sum: f64,
    count: u32,
}

impl Accumulator {
    fn push(&mut self, value: f32) {
        self.sum += value as f64;
        self.count += 1;
    }

    fn mean(&self) -> f32 {
        if self.count == 0 {
            f32::NAN
        } else {
            (self.sum / self.count as f64) as f32
        }
    }
}

/// Reference grid taken from the first tile.
#[derive(Debug, Clone, Copy)]
struct Reference {
    transform: GeoTransform,
    pixel_size: (f64, f64),
    scale: f64,
}

impl Reference {
    /// `records` must not be empty.
    fn from_tile(records: &[PixelRecord]) -> Self {
        let pixel_size = pixel_size(records).unwrap_or_else(|| {
            // a single pixel has no spacing; the request grid is one metre per pixel
            let size = metre_in_degrees(records[0].y);
            debug!("Single-pixel first tile, assuming {} x {} degree pixels", size.0, size.1);
            size
        });

        let min_x = records.iter().map(|r| r.x).fold(f64::INFINITY, f64::min);
        let max_y = records.iter().map(|r| r.y).fold(f64::NEG_INFINITY, f64::max);

        // records hold pixel centres, the transform wants the outer corner
        let transform = GeoTransform::from_origin(
            min_x - pixel_size.0 / 2.0,
            max_y + pixel_size.1 / 2.0,
            pixel_size.0,
            pixel_size.1,
        );

        let finest = pixel_size.0.min(pixel_size.1);
        let decimals =
            ((-finest.log10()).ceil() as i32 + KEY_EXTRA_DECIMALS).clamp(0, MAX_KEY_DECIMALS);

        debug!(
            "Mosaic reference: origin ({}, {}), pixel {} x {}, {} key decimals",
            transform.0[0], transform.0[3], pixel_size.0, pixel_size.1, decimals
        );

        Reference {
            transform,
            pixel_size,
            scale: 10f64.powi(decimals),
        }
    }

    fn key(&self, record: &PixelRecord) -> CoordKey {
        CoordKey {
            y: (record.y * self.scale).round() as i64,
            x: (record.x * self.scale).round() as i64,
        }
    }

    fn matches(&self, size: (f64, f64)) -> bool {
        let close = |a: f64, b: f64| ((a - b) / b).abs() <= PIXEL_SIZE_TOLERANCE;
        close(size.0, self.pixel_size.0) && close(size.1, self.pixel_size.1)
    }
}

/// Size of one metre in degrees of longitude and latitude at `lat`.
fn metre_in_degrees(lat: f64) -> (f64, f64) {
    let lat_size = 1.0 / METRES_PER_DEGREE;
    let cos = lat.to_radians().cos().max(MIN_COS_LAT);

    (lat_size / cos, lat_size)
}

/// Smallest positive step between distinct values, or `None` for a single value.
fn min_step(mut values: Vec<f64>) -> Option<f64> {
    values.retain(|v| v.is_finite());
    values.sort_by(f64::total_cmp);

    values
        .windows(2)
        .map(|pair| pair[1] - pair[0])
        .filter(|step| *step > f64::EPSILON * 1024.0)
        .min_by(f64::total_cmp)
}

/// Pixel size of a tile as the smallest spacing between its distinct X and Y values. A tile one
/// pixel wide or tall borrows the spacing of the other axis.
fn pixel_size(records: &[PixelRecord]) -> Option<(f64, f64)> {
    let sx = min_step(records.iter().map(|r| r.x).collect());
    let sy = min_step(records.iter().map(|r| r.y).collect());

    match (sx, sy) {
        (Some(sx), Some(sy)) => Some((sx, sy)),
        (Some(s), None) | (None, Some(s)) => Some((s, s)),
        (None, None) => None,
    }
}

/// The finished mosaic: `(band, row, col)` in [`IndexBand::ALL`] order, NaN where no tile
/// contributed.
#[derive(Debug, Clone)]
pub struct Mosaic {
    pub data: Array3<f32>,
    pub transform: GeoTransform,
}

impl Mosaic {
    pub fn band(&self, band: IndexBand) -> ndarray::ArrayView2<'_, f32> {
        let index = IndexBand::ALL
            .iter()
            .position(|b| *b == band)
            .unwrap_or_default();
        self.data.index_axis(ndarray::Axis(0), index)
    }

    /// Mean of the finite cells of `band`.
    pub fn band_mean(&self, band: IndexBand) -> Option<f64> {
        let (sum, count) = self
            .band(band)
            .iter()
            .filter(|v| v.is_finite())
            .fold((0.0, 0usize), |(sum, count), v| (sum + *v as f64, count + 1));

        (count > 0).then(|| sum / count as f64)
    }

    /// Writes a four-band float32 GeoTIFF in geographic coordinates.
    pub fn write(&self, path: &Path) -> Result<()> {
        geotiff::write(path, &self.data, &self.transform, WGS84_EPSG)
    }
}

#[derive(Debug, Default)]
pub struct MosaicReducer {
    reference: Option<Reference>,
    cells: BTreeMap<CoordKey, [Accumulator; BANDS]>,
    tiles: usize,
}

impl MosaicReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn tiles(&self) -> usize {
        self.tiles
    }

    pub fn add(&mut self, records: &[PixelRecord]) -> Result<()> {
        if records.is_empty() {
            return Ok(());
        }

        let reference = match self.reference {
            Some(reference) => {
                if let Some(size) = pixel_size(records) {
                    if !reference.matches(size) {
                        warn!(
                            "Tile pixel size {} x {} differs from the mosaic's {} x {}",
                            size.0, size.1, reference.pixel_size.0, reference.pixel_size.1
                        );
                    }
                }
                reference
            }
            None => {
                let reference = Reference::from_tile(records);
                self.reference = Some(reference);
                reference
            }
        };

        for record in records {
            let cell = self.cells.entry(reference.key(record)).or_default();
            for (acc, band) in cell.iter_mut().zip(IndexBand::ALL) {
                if let Some(value) = record.index(band) {
                    acc.push(value);
                }
            }
        }
        self.tiles += 1;

        Ok(())
    }

    /// Averages every cell and lays the keys out row-major over `extent`.
    pub fn finish(self, extent: GridExtent) -> Result<Mosaic> {
        let reference = self.reference.ok_or(Error::NoTiles)?;

        let expected = extent.pixel_count();
        let found = self.cells.len();
        if found != expected {
            return Err(Error::SizeMismatch { expected, found });
        }

        let mut data = Array3::from_elem((BANDS, extent.height, extent.width), f32::NAN);
        for (i, cell) in self.cells.values().enumerate() {
            let (row, col) = (i / extent.width, i % extent.width);
            for (band, acc) in cell.iter().enumerate() {
                data[[band, row, col]] = acc.mean();
            }
        }

        Ok(Mosaic {
            data,
            transform: reference.transform,
        })
    }
}

/// Reads `paths` in order and reduces them into one mosaic.
pub fn reduce_tiles<P: AsRef<Path>>(paths: &[P], extent: GridExtent) -> Result<Mosaic> {
    if paths.is_empty() {
        return Err(Error::NoTiles);
    }

    let mut reducer = MosaicReducer::new();
    for path in paths {
        let records = read_tile(path.as_ref())?;
        debug!("Merging {} ({} pixels)", path.as_ref().display(), records.len());
        reducer.add(&records)?;
    }

    if reducer.tiles() == 0 {
        return Err(Error::NoTiles);
    }
    info!("Mosaicking {} tiles into {}x{}", reducer.tiles(), extent.width, extent.height);

    reducer.finish(extent)
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::{dates::DateRange, tile::TileStore};

    fn record(x: f64, y: f64, ndvi: Option<f32>) -> PixelRecord {
        PixelRecord {
            x,
            y,
            ndvi,
            ndre: ndvi,
            ndmi: ndvi,
            gci: ndvi,
            b08: None,
            b04: None,
            b05: None,
        }
    }

    /// 2x2 tile of pixel centres at x 10.5/11.5, y 20.5/19.5, NDVI row-major from the top left.
    fn grid(values: [[Option<f32>; 2]; 2]) -> Vec<PixelRecord> {
        vec![
            record(10.5, 20.5, values[0][0]),
            record(11.5, 20.5, values[0][1]),
            record(10.5, 19.5, values[1][0]),
            record(11.5, 19.5, values[1][1]),
        ]
    }

    fn ndvi(mosaic: &Mosaic) -> Vec<f32> {
        mosaic.band(IndexBand::Ndvi).iter().copied().collect()
    }

    #[test]
    fn should_reproduce_a_single_tile() {
        let mut reducer = MosaicReducer::new();
        reducer
            .add(&grid([[Some(0.1), Some(0.2)], [Some(0.3), Some(0.4)]]))
            .unwrap();

        let mosaic = reducer.finish(GridExtent::new(2, 2)).unwrap();

        assert_eq!(ndvi(&mosaic), vec![0.1, 0.2, 0.3, 0.4]);
        assert_eq!(mosaic.transform, GeoTransform::from_origin(10.0, 21.0, 1.0, 1.0));
    }

    #[test]
    fn should_average_overlapping_pixels_only() {
        // A covers k1, k2; B covers k2, k3; nobody has a value at k4
        let a = grid([[Some(0.2), Some(0.4)], [None, None]]);
        let b = grid([[None, Some(0.6)], [Some(0.3), None]]);
        let mut reducer = MosaicReducer::new();
        reducer.add(&a).unwrap();
        reducer.add(&b).unwrap();

        let values = ndvi(&reducer.finish(GridExtent::new(2, 2)).unwrap());

        assert!((values[0] - 0.2).abs() < 1e-6);
        assert!((values[1] - 0.5).abs() < 1e-6);
        assert!((values[2] - 0.3).abs() < 1e-6);
        assert!(values[3].is_nan());
    }

    #[test]
    fn should_average_tiles_with_different_coordinate_sets() {
        // A covers k1, k2, k3; B covers k3, k4; only k3 is shared
        let full = grid([[Some(0.2), Some(0.4)], [Some(0.6), Some(0.8)]]);
        let a = full[..3].to_vec();
        let b = vec![record(10.5, 19.5, Some(0.2)), record(11.5, 19.5, Some(0.8))];
        let mut reducer = MosaicReducer::new();
        reducer.add(&a).unwrap();
        reducer.add(&b).unwrap();

        let mosaic = reducer.finish(GridExtent::new(2, 2)).unwrap();
        let values = ndvi(&mosaic);

        assert!((values[0] - 0.2).abs() < 1e-6);
        assert!((values[1] - 0.4).abs() < 1e-6);
        assert!((values[2] - 0.4).abs() < 1e-6);
        assert!((values[3] - 0.8).abs() < 1e-6);
        assert_eq!(mosaic.transform, GeoTransform::from_origin(10.0, 21.0, 1.0, 1.0));
    }

    #[test]
    fn should_reproduce_a_single_pixel_tile() {
        let mut reducer = MosaicReducer::new();
        reducer.add(&[record(11.25, 43.77, Some(0.5))]).unwrap();

        let mosaic = reducer.finish(GridExtent::new(1, 1)).unwrap();

        assert_eq!(ndvi(&mosaic), vec![0.5]);
        let (size_x, size_y) = mosaic.transform.pixel_size();
        assert!((size_y - 1.0 / 111_320.0).abs() < 1e-12);
        assert!(size_x > size_y && size_x < 2.0 * size_y);
        let (west, north) = mosaic.transform.origin();
        assert!((west + size_x / 2.0 - 11.25).abs() < 1e-9);
        assert!((north - size_y / 2.0 - 43.77).abs() < 1e-9);
    }

    #[test]
    fn should_order_rows_north_to_south() {
        let mut records = grid([[Some(1.0), Some(2.0)], [Some(3.0), Some(4.0)]]);
        records.reverse();
        let mut reducer = MosaicReducer::new();
        reducer.add(&records).unwrap();

        let values = ndvi(&reducer.finish(GridExtent::new(2, 2)).unwrap());

        assert_eq!(values, vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn should_fail_when_keys_do_not_fill_the_grid() {
        let full = grid([[Some(0.1); 2]; 2]);

        let mut three = MosaicReducer::new();
        three.add(&full[..3]).unwrap();
        assert!(matches!(
            three.finish(GridExtent::new(2, 2)),
            Err(Error::SizeMismatch { expected: 4, found: 3 })
        ));

        let mut five = MosaicReducer::new();
        five.add(&full).unwrap();
        five.add(&[record(12.5, 20.5, Some(0.1))]).unwrap();
        assert!(matches!(
            five.finish(GridExtent::new(2, 2)),
            Err(Error::SizeMismatch { expected: 4, found: 5 })
        ));
    }

    #[test]
    fn should_merge_coordinates_within_key_precision() {
        let mut shifted = grid([[Some(0.3); 2]; 2]);
        for r in shifted.iter_mut() {
            r.x += 1e-9;
        }
        let mut reducer = MosaicReducer::new();
        reducer.add(&grid([[Some(0.1); 2]; 2])).unwrap();
        reducer.add(&shifted).unwrap();

        let values = ndvi(&reducer.finish(GridExtent::new(2, 2)).unwrap());

        assert!(values.iter().all(|v| (v - 0.2).abs() < 1e-6));
    }

    #[test]
    fn should_reject_empty_tile_list() {
        let paths: Vec<std::path::PathBuf> = Vec::new();

        assert!(matches!(
            reduce_tiles(&paths, GridExtent::new(2, 2)),
            Err(Error::NoTiles)
        ));
        assert!(matches!(
            MosaicReducer::new().finish(GridExtent::new(2, 2)),
            Err(Error::NoTiles)
        ));
    }

    #[test]
    fn should_reduce_stored_tiles_and_write_geotiff() {
        let dir = TempDir::new().unwrap();
        let store = TileStore::new(dir.path(), "field");
        let days: Vec<_> = DateRange::parse("2024-05-01", "2024-05-02")
            .unwrap()
            .days()
            .collect();
        let first = store
            .write(&days[0], &grid([[Some(0.1), Some(0.2)], [Some(0.3), Some(0.4)]]))
            .unwrap();
        let second = store
            .write(&days[1], &grid([[Some(0.3), Some(0.2)], [Some(0.1), Some(0.0)]]))
            .unwrap();

        let mosaic = reduce_tiles(&[first, second], GridExtent::new(2, 2)).unwrap();
        let out = dir.path().join("mosaic.tif");
        mosaic.write(&out).unwrap();

        assert!(ndvi(&mosaic).iter().all(|v| (v - 0.2).abs() < 1e-6));
        assert!((mosaic.band_mean(IndexBand::Gci).unwrap() - 0.2).abs() < 1e-6);

        let decoded = geotiff::decode(&std::fs::read(&out).unwrap()).unwrap();
        assert_eq!(decoded.data.dim(), (4, 2, 2));
        assert_eq!(decoded.transform, mosaic.transform);
    }
}
