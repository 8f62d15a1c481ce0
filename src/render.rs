//! PNG quick-look of a mosaic: one colour-ramped panel per index on a 2x2 grid.

use std::path::Path;

use image::{Rgba, RgbaImage};
use ndarray::ArrayView2;

use crate::{error::Result, mosaic::Mosaic, tile::IndexBand};

/// Panels are enlarged until their longer side reaches this many pixels.
const MIN_PANEL_SIZE: u32 = 256;
const GAP: u32 = 8;
const TRANSPARENT: Rgba<u8> = Rgba([0, 0, 0, 0]);

// sampled from matplotlib's viridis
const VIRIDIS: [[u8; 3]; 5] = [
    [68, 1, 84],
    [59, 82, 139],
    [33, 145, 140],
    [94, 201, 98],
    [253, 231, 37],
];

/// Maps `t` in `[0, 1]` onto the ramp.
fn ramp(t: f32) -> Rgba<u8> {
    let t = t.clamp(0.0, 1.0) * (VIRIDIS.len() - 1) as f32;
    let i = (t.floor() as usize).min(VIRIDIS.len() - 2);
    let frac = t - i as f32;

    let (lo, hi) = (VIRIDIS[i], VIRIDIS[i + 1]);
    let mix = |a: u8, b: u8| (a as f32 + (b as f32 - a as f32) * frac).round() as u8;

    Rgba([mix(lo[0], hi[0]), mix(lo[1], hi[1]), mix(lo[2], hi[2]), 255])
}

/// Finite min and max of a band.
fn value_range(band: &ArrayView2<'_, f32>) -> Option<(f32, f32)> {
    band.iter()
        .filter(|v| v.is_finite())
        .fold(None, |range, v| match range {
            None => Some((*v, *v)),
            Some((lo, hi)) => Some((lo.min(*v), hi.max(*v))),
        })
}

fn scale_factor(width: usize, height: usize) -> u32 {
    let longest = width.max(height).max(1) as u32;
    MIN_PANEL_SIZE.div_ceil(longest).max(1)
}

pub fn render(mosaic: &Mosaic) -> RgbaImage {
    let (_, height, width) = mosaic.data.dim();
    let scale = scale_factor(width, height);
    let (panel_w, panel_h) = (width as u32 * scale, height as u32 * scale);

    let mut canvas = RgbaImage::from_pixel(panel_w * 2 + GAP, panel_h * 2 + GAP, TRANSPARENT);

    for (i, band) in IndexBand::ALL.iter().enumerate() {
        let values = mosaic.band(*band);
        let range = value_range(&values);
        let left = (i as u32 % 2) * (panel_w + GAP);
        let top = (i as u32 / 2) * (panel_h + GAP);

        for ((row, col), value) in values.indexed_iter() {
            let colour = match range {
                Some((lo, hi)) if value.is_finite() => {
                    let t = if hi > lo { (value - lo) / (hi - lo) } else { 0.5 };
                    ramp(t)
                }
                _ => TRANSPARENT,
            };

            for dy in 0..scale {
                for dx in 0..scale {
                    canvas.put_pixel(
                        left + col as u32 * scale + dx,
                        top + row as u32 * scale + dy,
                        colour,
                    );
                }
            }
        }
    }

    canvas
}

pub fn save(mosaic: &Mosaic, path: &Path) -> Result<()> {
    render(mosaic).save(path)?;
    Ok(())
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use ndarray::Array3;
    use tempfile::TempDir;

    use super::*;
    use crate::geotiff::GeoTransform;

    fn mosaic() -> Mosaic {
        let mut data = Array3::<f32>::zeros((4, 2, 2));
        data[[0, 0, 0]] = 0.1;
        data[[0, 0, 1]] = 0.9;
        data[[0, 1, 0]] = 0.5;
        data[[0, 1, 1]] = f32::NAN;
        Mosaic {
            data,
            transform: GeoTransform::from_origin(11.0, 43.0, 0.001, 0.001),
        }
    }

    #[test]
    fn should_ramp_from_dark_to_bright() {
        assert_eq!(ramp(0.0), Rgba([68, 1, 84, 255]));
        assert_eq!(ramp(1.0), Rgba([253, 231, 37, 255]));
        assert_eq!(ramp(2.0), ramp(1.0));
    }

    #[test]
    fn should_lay_out_four_scaled_panels() {
        let image = render(&mosaic());

        // 2 px band scaled x128
        assert_eq!(image.dimensions(), (2 * 256 + GAP, 2 * 256 + GAP));
        assert_eq!(*image.get_pixel(0, 0), ramp(0.0));
        assert_eq!(*image.get_pixel(200, 0), ramp(1.0));
        // flat band sits mid-ramp
        assert_eq!(*image.get_pixel(300, 0), ramp(0.5));
    }

    #[test]
    fn should_leave_missing_values_transparent() {
        let image = render(&mosaic());

        assert_eq!(image.get_pixel(255, 255)[3], 0);
        assert_eq!(image.get_pixel(256, 0)[3], 0);
    }

    #[test]
    fn should_save_png() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("quicklook.png");

        save(&mosaic(), &path).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        assert_eq!(&bytes[1..4], b"PNG");
    }
}
