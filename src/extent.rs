//! Grid sizing: projects the area of interest into its UTM zone and measures the bounding box.
//!
//! One metre of projected extent maps to one output pixel.

use log::debug;

use crate::{
    area::AreaOfInterest,
    error::{Error, Result},
};

// WGS84
const SEMI_MAJOR_AXIS: f64 = 6_378_137.0;
const FLATTENING: f64 = 1.0 / 298.257_223_563;
const SCALE_FACTOR: f64 = 0.9996;
const FALSE_EASTING: f64 = 500_000.0;
const FALSE_NORTHING_SOUTH: f64 = 10_000_000.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UtmZone {
    pub zone: u32,
    pub north: bool,
}

impl UtmZone {
    /// Standard 6° zoning, hemisphere by latitude sign. No Norway/Svalbard exceptions.
    pub fn containing(lon: f64, lat: f64) -> Self {
        let zone = (((lon + 180.0) / 6.0).floor() as i64).clamp(0, 59) as u32 + 1;

        UtmZone {
            zone,
            north: lat >= 0.0,
        }
    }

    pub fn epsg(&self) -> u32 {
        if self.north {
            32600 + self.zone
        } else {
            32700 + self.zone
        }
    }

    fn central_meridian(&self) -> f64 {
        -183.0 + (self.zone as f64) * 6.0
    }
}

/// Forward transverse Mercator (Krüger series to third order), returns (easting, northing)
/// in metres.
pub fn project(lon: f64, lat: f64, zone: UtmZone) -> (f64, f64) {
    let n = FLATTENING / (2.0 - FLATTENING);
    let n2 = n * n;
    let n3 = n2 * n;
    let a = SEMI_MAJOR_AXIS / (1.0 + n) * (1.0 + n2 / 4.0 + n2 * n2 / 64.0);
    let alpha = [
        n / 2.0 - 2.0 / 3.0 * n2 + 5.0 / 16.0 * n3,
        13.0 / 48.0 * n2 - 3.0 / 5.0 * n3,
        61.0 / 240.0 * n3,
    ];
    let c = 2.0 * n.sqrt() / (1.0 + n);

    let phi = lat.to_radians();
    let d_lambda = (lon - zone.central_meridian()).to_radians();

    let sin_phi = phi.sin();
    let t = (sin_phi.atanh() - c * (c * sin_phi).atanh()).sinh();
    let xi = (t / d_lambda.cos()).atan();
    let eta = (d_lambda.sin() / (1.0 + t * t).sqrt()).atanh();

    let mut easting = eta;
    let mut northing = xi;
    for (j, alpha_j) in alpha.iter().enumerate() {
        let k = 2.0 * (j + 1) as f64;
        easting += alpha_j * (k * xi).cos() * (k * eta).sinh();
        northing += alpha_j * (k * xi).sin() * (k * eta).cosh();
    }

    let false_northing = if zone.north { 0.0 } else { FALSE_NORTHING_SOUTH };

    (
        FALSE_EASTING + SCALE_FACTOR * a * easting,
        false_northing + SCALE_FACTOR * a * northing,
    )
}

/// Output raster size in pixels. Fixed for the whole run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GridExtent {
    pub width: usize,
    pub height: usize,
}

impl GridExtent {
    pub fn new(width: usize, height: usize) -> Self {
        GridExtent { width, height }
    }

    pub fn from_area(area: &AreaOfInterest) -> Result<Self> {
        // closing vertex excluded so it doesn't bias the mean
        let ring = area.vertices();
        let open = &ring[..ring.len() - 1];
        if open.len() < 3 {
            return Err(Error::InvalidArea(format!(
                "`{}` has fewer than 3 vertices",
                area.name
            )));
        }

        let mean_lon = open.iter().map(|v| v.lon).sum::<f64>() / open.len() as f64;
        let mean_lat = open.iter().map(|v| v.lat).sum::<f64>() / open.len() as f64;
        let zone = UtmZone::containing(mean_lon, mean_lat);

        let (mut min_x, mut max_x) = (f64::INFINITY, f64::NEG_INFINITY);
        let (mut min_y, mut max_y) = (f64::INFINITY, f64::NEG_INFINITY);
        for v in open {
            let (x, y) = project(v.lon, v.lat, zone);
            min_x = min_x.min(x);
            max_x = max_x.max(x);
            min_y = min_y.min(y);
            max_y = max_y.max(y);
        }

        let width = max_x - min_x;
        let height = max_y - min_y;
        debug!(
            "Area `{}` spans {:.2} x {:.2} m in EPSG:{}",
            area.name,
            width,
            height,
            zone.epsg()
        );

        if !(width > 0.0 && height > 0.0) {
            return Err(Error::DegenerateExtent { width, height });
        }

        Ok(GridExtent {
            width: width.ceil() as usize,
            height: height.ceil() as usize,
        })
    }

    pub fn pixel_count(&self) -> usize {
        self.width * self.height
    }
}

// -- Tests -------------------------------------------------------------------
