//! Area of interest loaded from a KML boundary file.
//!
//! Only the outer boundary of the first `<Polygon>` in the document is used.

use std::{fs, path::Path};

use quick_xml::{events::Event, Reader};

use crate::error::{Error, Result};

/// A vertex as (longitude, latitude, altitude). Altitude is kept when present but never used
/// in any computation.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Vertex {
    pub lon: f64,
    pub lat: f64,
    pub alt: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct AreaOfInterest {
    pub name: String,
    vertices: Vec<Vertex>,
}

impl AreaOfInterest {
    /// Builds a closed polygon from `vertices`, appending the first vertex when the ring is
    /// open. At least three distinct vertices are required.
    pub fn new(name: &str, mut vertices: Vec<Vertex>) -> Result<Self> {
        if vertices.is_empty() {
            return Err(Error::InvalidArea(format!("`{}` has no vertices", name)));
        }

        let first = vertices[0];
        let last = vertices[vertices.len() - 1];
        if first.lon != last.lon || first.lat != last.lat {
            vertices.push(first);
        }

        let distinct = vertices.len() - 1;
        if distinct < 3 {
            return Err(Error::InvalidArea(format!(
                "`{}` has {} distinct vertices, at least 3 are required",
                name, distinct
            )));
        }

        Ok(AreaOfInterest {
            name: name.to_string(),
            vertices,
        })
    }

    /// Reads the first polygon of a KML file. The area is named after the file stem.
    pub fn from_kml(path: &Path) -> Result<Self> {
        let name = area_name(path)?;
        let document = fs::read_to_string(path)?;

        Self::from_kml_str(name, &document)
    }

    pub fn from_kml_str(name: &str, document: &str) -> Result<Self> {
        let coordinates = outer_coordinates(name, document)?;
        let vertices = parse_coordinates(&coordinates)?;

        Self::new(name, vertices)
    }

    /// All vertices of the closed ring, first and last coinciding.
    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    /// Ring as `[lon, lat]` pairs, the form expected by GeoJSON polygon geometry.
    pub fn lon_lat_ring(&self) -> Vec<[f64; 2]> {
        self.vertices.iter().map(|v| [v.lon, v.lat]).collect()
    }
}

/// Area name used in tile file names: the KML file stem.
pub fn area_name(path: &Path) -> Result<&str> {
    path.file_stem()
        .and_then(|s| s.to_str())
        .ok_or_else(|| Error::InvalidArea(format!("bad area file name {}", path.display())))
}

/// Text of the `<coordinates>` inside the outer boundary of the first `<Polygon>`. Namespace
/// prefixes are ignored.
fn outer_coordinates(name: &str, document: &str) -> Result<String> {
    let mut reader = Reader::from_str(document);
    reader.trim_text(true);

    let mut in_polygon = false;
    let mut in_outer = false;
    let mut in_coordinates = false;
    let mut text = String::new();

    loop {
        match reader.read_event()? {
            Event::Start(ref e) => match e.local_name().as_ref() {
                b"Polygon" => in_polygon = true,
                b"outerBoundaryIs" if in_polygon => in_outer = true,
                b"coordinates" if in_outer => in_coordinates = true,
                _ => (),
            },
            Event::Text(e) if in_coordinates => text.push_str(&e.unescape()?),
            Event::CData(e) if in_coordinates => {
                text.push_str(&String::from_utf8_lossy(&e.into_inner()))
            }
            Event::End(ref e) => match e.local_name().as_ref() {
                b"coordinates" if in_coordinates => return Ok(text),
                b"Polygon" if in_polygon => {
                    return Err(Error::InvalidArea(format!(
                        "`{}` polygon has no outer boundary",
                        name
                    )))
                }
                _ => (),
            },
            Event::Empty(ref e) if e.local_name().as_ref() == b"Polygon" => {
                return Err(Error::InvalidArea(format!(
                    "`{}` polygon has no outer boundary",
                    name
                )))
            }
            Event::Eof => break,
            _ => (),
        }
    }

    Err(Error::InvalidArea(format!("`{}` contains no polygon", name)))
}

// KML tuples are `lon,lat[,alt]` separated by whitespace
fn parse_coordinates(text: &str) -> Result<Vec<Vertex>> {
    text.split_whitespace()
        .map(|tuple| {
            let parts: Vec<&str> = tuple.split(',').collect();
            if parts.len() < 2 || parts.len() > 3 {
                return Err(Error::InvalidArea(format!("bad coordinate tuple `{}`", tuple)));
            }

            let parse = |s: &str| {
                s.trim()
                    .parse::<f64>()
                    .map_err(|_| Error::InvalidArea(format!("bad coordinate value `{}`", s)))
            };

            let lon = parse(parts[0])?;
            let lat = parse(parts[1])?;
            let alt = parts.get(2).map(|s| parse(*s)).transpose()?;

            if !(-180.0..=180.0).contains(&lon) || !(-90.0..=90.0).contains(&lat) {
                return Err(Error::InvalidArea(format!(
                    "coordinate `{}` is outside geographic bounds",
                    tuple
                )));
            }

            Ok(Vertex { lon, lat, alt })
        })
        .collect()
}

// -- Tests -------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempfile::TempDir;

    use super::*;

    const KML: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<kml xmlns="http://www.opengis.net/kml/2.2">
  <Document>
    <Placemark>
      <name>vineyard</name>
      <Polygon>
        <outerBoundaryIs>
          <LinearRing>
            <coordinates>
              11.1000,43.5000,0 11.1010,43.5000,0 11.1010,43.5010,0 11.1000,43.5010,0 11.1000,43.5000,0
            </coordinates>
          </LinearRing>
        </outerBoundaryIs>
      </Polygon>
    </Placemark>
    <Placemark>
      <Polygon>
        <outerBoundaryIs><LinearRing><coordinates>1,1 2,1 2,2 1,1</coordinates></LinearRing></outerBoundaryIs>
      </Polygon>
    </Placemark>
  </Document>
</kml>"#;

    #[test]
    fn should_read_first_polygon() {
        let area = AreaOfInterest::from_kml_str("vineyard", KML).unwrap();

        assert_eq!(area.vertices().len(), 5);
        assert_eq!(area.vertices()[1].lon, 11.101);
        assert_eq!(area.vertices()[2].lat, 43.501);
        assert_eq!(area.vertices()[0].alt, Some(0.0));
    }

    #[test]
    fn should_read_kml_file_and_name_area_after_stem() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("north_field.kml");
        let mut file = fs::File::create(&path).unwrap();
        file.write_all(KML.as_bytes()).unwrap();

        let area = AreaOfInterest::from_kml(&path).unwrap();

        assert_eq!(area.name, "north_field");
    }

    #[test]
    fn should_close_open_ring() {
        let vertices = vec![
            Vertex { lon: 0.0, lat: 0.0, alt: None },
            Vertex { lon: 1.0, lat: 0.0, alt: None },
            Vertex { lon: 1.0, lat: 1.0, alt: None },
        ];
        let area = AreaOfInterest::new("open", vertices).unwrap();

        assert_eq!(area.vertices().len(), 4);
        assert_eq!(area.vertices()[0], area.vertices()[3]);
    }

    #[test]
    fn should_reject_fewer_than_three_vertices() {
        let vertices = vec![
            Vertex { lon: 0.0, lat: 0.0, alt: None },
            Vertex { lon: 1.0, lat: 0.0, alt: None },
            Vertex { lon: 0.0, lat: 0.0, alt: None },
        ];

        assert!(matches!(
            AreaOfInterest::new("line", vertices),
            Err(Error::InvalidArea(_))
        ));
    }

    #[test]
    fn should_reject_document_without_polygon() {
        let doc = "<kml><Document><Placemark><Point><coordinates>1,2</coordinates></Point></Placemark></Document></kml>";

        assert!(AreaOfInterest::from_kml_str("point", doc).is_err());
    }

    #[test]
    fn should_read_prefixed_elements() {
        let doc = r#"<kml:kml xmlns:kml="http://www.opengis.net/kml/2.2"><kml:Polygon>
            <kml:innerBoundaryIs><kml:LinearRing><kml:coordinates>5,5 6,5 6,6 5,5</kml:coordinates></kml:LinearRing></kml:innerBoundaryIs>
            <kml:outerBoundaryIs><kml:LinearRing><kml:coordinates>1,1 4,1 4,4 1,4</kml:coordinates></kml:LinearRing></kml:outerBoundaryIs>
            </kml:Polygon></kml:kml>"#;

        let area = AreaOfInterest::from_kml_str("prefixed", doc).unwrap();

        assert_eq!(area.vertices().len(), 5);
        assert_eq!(area.vertices()[1].lon, 4.0);
    }

    #[test]
    fn should_reject_polygon_without_outer_boundary() {
        let doc = "<kml><Polygon><innerBoundaryIs><coordinates>1,1 2,1 2,2</coordinates></innerBoundaryIs></Polygon></kml>";

        assert!(matches!(
            AreaOfInterest::from_kml_str("holes", doc),
            Err(Error::InvalidArea(_))
        ));
    }

    #[test]
    fn should_reject_malformed_xml() {
        let doc = "<kml><Polygon><outerBoundaryIs><coordinates>1,1 2,1 2,2</outerBoundaryIs></Polygon></kml>";

        assert!(AreaOfInterest::from_kml_str("broken", doc).is_err());
    }

    #[test]
    fn should_reject_bad_tuple() {
        assert!(parse_coordinates("1,2 3").is_err());
        assert!(parse_coordinates("200,2 3,4").is_err());
    }
}
