//! GeoTIFF decoding of provider responses and encoding of mosaics.
//!
//! Pure Rust through the `tiff` crate. Only the georeferencing tags this tool needs are read or
//! written: ModelPixelScale, ModelTiepoint, ModelTransformation and the GeoKeyDirectory.

use std::{
    fs::File,
    io::{BufWriter, Cursor, Read, Seek, Write},
    path::Path,
};

use ndarray::Array3;
use tiff::{
    decoder::{Decoder, DecodingResult},
    encoder::TiffEncoder,
    tags::Tag,
};

use crate::error::{Error, Result};

// GeoKeys
const GT_MODEL_TYPE_GEO_KEY: u16 = 1024;
const GT_RASTER_TYPE_GEO_KEY: u16 = 1025;
const GEOGRAPHIC_TYPE_GEO_KEY: u16 = 2048;
const PROJECTED_CS_TYPE_GEO_KEY: u16 = 3072;
const MODEL_TYPE_PROJECTED: u16 = 1;
const MODEL_TYPE_GEOGRAPHIC: u16 = 2;
const RASTER_PIXEL_IS_AREA: u16 = 1;

pub const WGS84_EPSG: u16 = 4326;

/// Affine pixel-to-world transform in GDAL order:
/// `x = a + col * b + row * c`, `y = d + col * e + row * f`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GeoTransform(pub [f64; 6]);

impl GeoTransform {
    /// North-up transform with the top-left corner at (`west`, `north`).
    pub fn from_origin(west: f64, north: f64, size_x: f64, size_y: f64) -> Self {
        GeoTransform([west, size_x, 0.0, north, 0.0, -size_y])
    }

    /// World coordinates of the centre of pixel (`row`, `col`).
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let [a, b, c, d, e, f] = self.0;
        let col = col as f64 + 0.5;
        let row = row as f64 + 0.5;

        (a + col * b + row * c, d + col * e + row * f)
    }

    pub fn pixel_size(&self) -> (f64, f64) {
        (self.0[1].abs(), self.0[5].abs())
    }

    pub fn origin(&self) -> (f64, f64) {
        (self.0[0], self.0[3])
    }

    fn is_north_up(&self) -> bool {
        self.0[2] == 0.0 && self.0[4] == 0.0
    }
}

/// A decoded multi-band raster, stored band-major as `(bands, rows, cols)`.
#[derive(Debug, Clone)]
pub struct Raster {
    pub data: Array3<f32>,
    pub transform: GeoTransform,
}

impl Raster {
    pub fn bands(&self) -> usize {
        self.data.dim().0
    }

    pub fn height(&self) -> usize {
        self.data.dim().1
    }

    pub fn width(&self) -> usize {
        self.data.dim().2
    }

    /// True when no sample in any band carries a real value.
    pub fn is_empty(&self) -> bool {
        self.data.iter().all(|v| v.is_nan() || *v == 0.0)
    }
}

/// Decodes an in-memory GeoTIFF with pixel-interleaved samples.
pub fn decode(bytes: &[u8]) -> Result<Raster> {
    read_raster(Cursor::new(bytes))
}

fn read_raster<R: Read + Seek>(reader: R) -> Result<Raster> {
    let mut decoder = Decoder::new(reader)?;
    let (width, height) = decoder.dimensions()?;
    let (width, height) = (width as usize, height as usize);
    if width == 0 || height == 0 {
        return Err(Error::InvalidRaster(format!(
            "raster has invalid dimensions {}x{}",
            width, height
        )));
    }

    let transform = read_geotransform(&mut decoder)?;
    let samples = decode_samples(&mut decoder)?;

    let pixels = width * height;
    if samples.is_empty() || samples.len() % pixels != 0 {
        return Err(Error::InvalidRaster(format!(
            "{} samples do not fill a {}x{} grid",
            samples.len(),
            width,
            height
        )));
    }
    let bands = samples.len() / pixels;

    let interleaved = Array3::from_shape_vec((height, width, bands), samples)?;
    let data = interleaved
        .permuted_axes([2, 0, 1])
        .as_standard_layout()
        .into_owned();

    Ok(Raster { data, transform })
}

fn read_geotransform<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<GeoTransform> {
    if let Ok(m) = decoder.get_tag_f64_vec(Tag::ModelTransformationTag) {
        if m.len() >= 8 {
            return Ok(GeoTransform([m[3], m[0], m[1], m[7], m[4], m[5]]));
        }
    }

    let tiepoint = decoder.get_tag_f64_vec(Tag::ModelTiepointTag);
    let pixel_scale = decoder.get_tag_f64_vec(Tag::ModelPixelScaleTag);

    if let (Ok(tiepoint), Ok(scale)) = (tiepoint, pixel_scale) {
        if tiepoint.len() >= 6 && scale.len() >= 2 {
            // [i, j, k, x, y, z] ties raster (i, j) to world (x, y)
            let (i, j) = (tiepoint[0], tiepoint[1]);
            let (x, y) = (tiepoint[3], tiepoint[4]);
            let (sx, sy) = (scale[0], scale[1]);

            return Ok(GeoTransform::from_origin(x - i * sx, y + j * sy, sx, sy));
        }
    }

    Err(Error::InvalidRaster(
        "raster carries no georeferencing tags".to_string(),
    ))
}

fn decode_samples<R: Read + Seek>(decoder: &mut Decoder<R>) -> Result<Vec<f32>> {
    let samples = match decoder.read_image()? {
        DecodingResult::F32(data) => data,
        DecodingResult::F16(data) => data.into_iter().map(|v| v.to_f32()).collect(),
        DecodingResult::F64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::I64(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U8(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U16(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U32(data) => data.into_iter().map(|v| v as f32).collect(),
        DecodingResult::U64(data) => data.into_iter().map(|v| v as f32).collect(),
    };

    Ok(samples)
}

/// Writes a `(bands, rows, cols)` float raster as a single-strip, uncompressed GeoTIFF.
/// NaN is declared as nodata.
pub fn write<P: AsRef<Path>>(
    path: P,
    data: &Array3<f32>,
    transform: &GeoTransform,
    epsg: u16,
) -> Result<()> {
    let file = File::create(path)?;
    let mut writer = BufWriter::new(file);
    write_to(&mut writer, data, transform, epsg)?;
    writer.flush()?;

    Ok(())
}

pub fn write_to<W: Write + Seek>(
    writer: W,
    data: &Array3<f32>,
    transform: &GeoTransform,
    epsg: u16,
) -> Result<()> {
    let (bands, height, width) = data.dim();
    if bands == 0 || height == 0 || width == 0 {
        return Err(Error::InvalidRaster(format!(
            "cannot write a {}x{}x{} raster",
            bands, height, width
        )));
    }
    if !transform.is_north_up() {
        return Err(Error::InvalidRaster(
            "only north-up transforms can be written".to_string(),
        ));
    }

    let mut encoder = TiffEncoder::new(writer)?;
    let mut dir = encoder.image_directory()?;

    dir.write_tag(Tag::ImageWidth, width as u32)?;
    dir.write_tag(Tag::ImageLength, height as u32)?;
    dir.write_tag(Tag::BitsPerSample, vec![32u16; bands].as_slice())?;
    dir.write_tag(Tag::Compression, 1u16)?;
    dir.write_tag(Tag::PhotometricInterpretation, 1u16)?;
    dir.write_tag(Tag::SamplesPerPixel, bands as u16)?;
    dir.write_tag(Tag::SampleFormat, vec![3u16; bands].as_slice())?;
    dir.write_tag(Tag::PlanarConfiguration, 1u16)?;
    dir.write_tag(Tag::RowsPerStrip, height as u32)?;
    if bands > 1 {
        dir.write_tag(Tag::ExtraSamples, vec![0u16; bands - 1].as_slice())?;
    }

    let (size_x, size_y) = transform.pixel_size();
    let (west, north) = transform.origin();
    dir.write_tag(
        Tag::ModelPixelScaleTag,
        [size_x, size_y, 0.0].as_slice(),
    )?;
    dir.write_tag(
        Tag::ModelTiepointTag,
        [0.0, 0.0, 0.0, west, north, 0.0].as_slice(),
    )?;
    dir.write_tag(
        Tag::GeoKeyDirectoryTag,
        geokey_directory(epsg).as_slice(),
    )?;
    dir.write_tag(Tag::GdalNodata, "nan")?;

    // chunky layout: all bands of a pixel are adjacent
    let mut pixels = Vec::with_capacity(bands * height * width);
    for row in 0..height {
        for col in 0..width {
            for band in 0..bands {
                pixels.push(data[[band, row, col]]);
            }
        }
    }

    let offset = dir.write_data(pixels.as_slice())?;
    let offset = u32::try_from(offset)
        .map_err(|_| Error::InvalidRaster("raster too large for a classic TIFF".to_string()))?;
    let byte_count = u32::try_from(pixels.len() * 4)
        .map_err(|_| Error::InvalidRaster("raster too large for a classic TIFF".to_string()))?;
    dir.write_tag(Tag::StripOffsets, offset)?;
    dir.write_tag(Tag::StripByteCounts, byte_count)?;

    dir.finish()?;

    Ok(())
}

fn geokey_directory(epsg: u16) -> Vec<u16> {
    let geographic = epsg == WGS84_EPSG;

    // version, revision, minor revision, key count
    let mut keys = vec![1, 1, 0, 3];
    keys.extend_from_slice(&[
        GT_MODEL_TYPE_GEO_KEY,
        0,
        1,
        if geographic {
            MODEL_TYPE_GEOGRAPHIC
        } else {
            MODEL_TYPE_PROJECTED
        },
    ]);
    keys.extend_from_slice(&[GT_RASTER_TYPE_GEO_KEY, 0, 1, RASTER_PIXEL_IS_AREA]);
    if geographic {
        keys.extend_from_slice(&[GEOGRAPHIC_TYPE_GEO_KEY, 0, 1, epsg]);
    } else {
        keys.extend_from_slice(&[PROJECTED_CS_TYPE_GEO_KEY, 0, 1, epsg]);
    }

    keys
}

/// Encodes to memory; used to build provider-like payloads.
#[cfg(test)]
pub fn encode(data: &Array3<f32>, transform: &GeoTransform, epsg: u16) -> Result<Vec<u8>> {
    let mut cursor = Cursor::new(Vec::new());
    write_to(&mut cursor, data, transform, epsg)?;

    Ok(cursor.into_inner())
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use ndarray::array;

    use super::*;

    #[test]
    fn should_locate_pixel_centres() {
        let transform = GeoTransform::from_origin(10.0, 50.0, 0.5, 0.25);

        assert_eq!(transform.pixel_center(0, 0), (10.25, 49.875));
        assert_eq!(transform.pixel_center(1, 2), (11.25, 49.625));
    }

    #[test]
    fn should_keep_band_order_and_georeferencing_through_encoding() {
        let data = array![
            [[0.1f32, 0.2, 0.3], [0.4, 0.5, 0.6]],
            [[1.0, 2.0, 3.0], [4.0, 5.0, f32::NAN]],
        ];
        let transform = GeoTransform::from_origin(11.0, 43.5, 1e-4, 1e-4);

        let bytes = encode(&data, &transform, WGS84_EPSG).unwrap();
        let raster = decode(&bytes).unwrap();

        assert_eq!(raster.bands(), 2);
        assert_eq!(raster.height(), 2);
        assert_eq!(raster.width(), 3);
        assert_eq!(raster.data[[0, 1, 2]], 0.6);
        assert_eq!(raster.data[[1, 0, 1]], 2.0);
        assert!(raster.data[[1, 1, 2]].is_nan());
        assert_eq!(raster.transform, transform);
    }

    #[test]
    fn should_decode_seven_band_provider_raster() {
        let mut data = Array3::<f32>::from_elem((7, 3, 2), 0.25);
        data[[6, 2, 1]] = 0.75;
        let transform = GeoTransform::from_origin(11.0, 43.5, 1e-4, 2e-4);

        let raster = decode(&encode(&data, &transform, WGS84_EPSG).unwrap()).unwrap();

        assert_eq!(raster.data.dim(), (7, 3, 2));
        assert_eq!(raster.data[[6, 2, 1]], 0.75);
        assert_eq!(raster.transform.pixel_size(), (1e-4, 2e-4));
        assert_eq!(raster.transform.origin(), (11.0, 43.5));
    }

    #[test]
    fn should_prefer_model_transformation() {
        use tiff::encoder::colortype::Gray32Float;

        let mut cursor = Cursor::new(Vec::new());
        {
            let mut encoder = TiffEncoder::new(&mut cursor).unwrap();
            let mut image = encoder.new_image::<Gray32Float>(2, 2).unwrap();
            #[rustfmt::skip]
            let matrix = [
                0.5, 0.0, 0.0, 100.0,
                0.0, -0.5, 0.0, 200.0,
                0.0, 0.0, 0.0, 0.0,
                0.0, 0.0, 0.0, 1.0,
            ];
            image
                .encoder()
                .write_tag(Tag::ModelTransformationTag, matrix.as_slice())
                .unwrap();
            image.write_data(&[1.0f32, 2.0, 3.0, 4.0]).unwrap();
        }

        let raster = decode(cursor.get_ref()).unwrap();

        assert_eq!(raster.bands(), 1);
        assert_eq!(raster.transform, GeoTransform::from_origin(100.0, 200.0, 0.5, 0.5));
        assert_eq!(raster.data[[0, 1, 0]], 3.0);
    }

    #[test]
    fn should_detect_empty_raster() {
        let mut data = Array3::<f32>::zeros((7, 2, 2));
        data[[3, 0, 0]] = f32::NAN;
        let raster = Raster {
            data: data.clone(),
            transform: GeoTransform::from_origin(0.0, 0.0, 1.0, 1.0),
        };
        assert!(raster.is_empty());

        data[[0, 1, 1]] = 0.42;
        let raster = Raster { data, ..raster };
        assert!(!raster.is_empty());
    }

    #[test]
    fn should_reject_garbage() {
        assert!(decode(b"{\"error\": \"bad request\"}").is_err());
    }

    #[test]
    fn should_build_geographic_geokeys() {
        let keys = geokey_directory(WGS84_EPSG);

        assert_eq!(keys[3], 3);
        assert_eq!(&keys[4..8], &[1024, 0, 1, 2]);
        assert_eq!(&keys[12..16], &[2048, 0, 1, 4326]);
    }
}
