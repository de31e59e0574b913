// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Footprint ingestion from a GeoJSON FeatureCollection
//!
//! Only `Polygon` features are kept, and only their exterior ring. Features
//! whose ring cannot support a containment test are kept too, flagged with a
//! [`GeometryFailure`], so they pass through to the output unenriched.

use crate::error::{Error, Result};
use oview_lite_core::{GeoBounds, LonLat};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::Path;

/// Below this shoelace area (deg²) a ring is treated as collinear
const MIN_RING_AREA: f64 = 1e-18;

/// Why a polygon was excluded from matching
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GeometryFailure {
    /// Fewer than three distinct vertices
    TooFewVertices,
    /// All vertices collinear
    ZeroArea,
}

/// One footprint polygon with its source tags
#[derive(Debug, Clone, PartialEq)]
pub struct FootprintFeature {
    /// Closed exterior ring: last vertex equals the first
    pub ring: Vec<LonLat>,
    pub tags: Map<String, Value>,
}

impl FootprintFeature {
    /// Build a feature, closing `ring` if it is open
    pub fn new(mut ring: Vec<LonLat>, tags: Map<String, Value>) -> Self {
        if let (Some(&first), Some(&last)) = (ring.first(), ring.last()) {
            if first != last {
                ring.push(first);
            }
        }
        Self { ring, tags }
    }

    /// Vertices without the closing duplicate
    pub fn vertices(&self) -> &[LonLat] {
        match self.ring.len() {
            n if n > 1 && self.ring[0] == self.ring[n - 1] => &self.ring[..n - 1],
            _ => &self.ring,
        }
    }

    /// Arithmetic mean of the distinct vertices
    pub fn centroid(&self) -> Option<LonLat> {
        let vertices = self.vertices();
        if vertices.is_empty() {
            return None;
        }
        let n = vertices.len() as f64;
        let (lon, lat) = vertices
            .iter()
            .fold((0.0, 0.0), |(lon, lat), p| (lon + p.lon, lat + p.lat));
        Some(LonLat::new(lon / n, lat / n))
    }

    pub fn bounds(&self) -> Option<GeoBounds> {
        GeoBounds::from_points(self.ring.iter().copied())
    }

    /// Signed shoelace area in deg²
    pub fn signed_area(&self) -> f64 {
        self.ring
            .windows(2)
            .map(|w| w[0].lon * w[1].lat - w[1].lon * w[0].lat)
            .sum::<f64>()
            / 2.0
    }

    /// Ray-casting containment test against the closed ring
    #[inline]
    pub fn contains(&self, point: LonLat) -> bool {
        point_in_ring(point, &self.ring)
    }

    pub fn validate(&self) -> std::result::Result<(), GeometryFailure> {
        let vertices = self.vertices();
        let mut distinct: Vec<LonLat> = Vec::with_capacity(vertices.len());
        for v in vertices {
            if !distinct.contains(v) {
                distinct.push(*v);
            }
            if distinct.len() >= 3 {
                break;
            }
        }
        if distinct.len() < 3 {
            return Err(GeometryFailure::TooFewVertices);
        }
        if self.signed_area().abs() < MIN_RING_AREA {
            return Err(GeometryFailure::ZeroArea);
        }
        Ok(())
    }
}

/// Even-odd ray casting over a ring.
///
/// A horizontal ray is cast toward +lon and crossings are counted.
/// Points exactly on an edge may land either side.
pub fn point_in_ring(point: LonLat, ring: &[LonLat]) -> bool {
    let n = ring.len();
    if n < 3 {
        return false;
    }
    let (x, y) = (point.lon, point.lat);
    let mut inside = false;
    let mut j = n - 1;
    for i in 0..n {
        let (xi, yi) = (ring[i].lon, ring[i].lat);
        let (xj, yj) = (ring[j].lon, ring[j].lat);
        if (yi > y) != (yj > y) && x < (xj - xi) * (y - yi) / (yj - yi) + xi {
            inside = !inside;
        }
        j = i;
    }
    inside
}

#[derive(Deserialize)]
struct RawCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    name: Option<String>,
    features: Vec<RawFeature>,
}

#[derive(Deserialize)]
struct RawFeature {
    #[serde(default)]
    geometry: Option<RawGeometry>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
}

#[derive(Deserialize)]
struct RawGeometry {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    coordinates: Value,
}

/// Parsed footprint dataset
#[derive(Debug, Clone, Default)]
pub struct FootprintCollection {
    pub name: Option<String>,
    pub features: Vec<FootprintFeature>,
    /// Features without a `Polygon` geometry
    pub skipped_non_polygon: usize,
    /// `Polygon` features whose coordinates could not be read
    pub malformed: usize,
}

impl FootprintCollection {
    pub fn new(features: Vec<FootprintFeature>) -> Self {
        Self {
            features,
            ..Self::default()
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let collection = Self::from_geojson_str(&text)?;
        tracing::info!(
            path = %path.display(),
            polygons = collection.features.len(),
            skipped = collection.skipped_non_polygon,
            malformed = collection.malformed,
            "Loaded footprints"
        );
        Ok(collection)
    }

    pub fn from_geojson_str(text: &str) -> Result<Self> {
        let raw: RawCollection = serde_json::from_str(text)?;
        if raw.kind != "FeatureCollection" {
            return Err(Error::InvalidFootprints(format!(
                "expected a FeatureCollection, found {:?}",
                raw.kind
            )));
        }

        let mut collection = Self {
            name: raw.name,
            ..Self::default()
        };
        for feature in raw.features {
            let Some(geometry) = feature.geometry.filter(|g| g.kind == "Polygon") else {
                collection.skipped_non_polygon += 1;
                continue;
            };
            match exterior_ring(&geometry.coordinates) {
                Some(ring) => collection.features.push(FootprintFeature::new(
                    ring,
                    feature.properties.unwrap_or_default(),
                )),
                None => collection.malformed += 1,
            }
        }
        Ok(collection)
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// First ring of a Polygon's `coordinates`, or `None` if it is not an
/// array of numeric positions
fn exterior_ring(coordinates: &Value) -> Option<Vec<LonLat>> {
    let ring = coordinates.as_array()?.first()?.as_array()?;
    ring.iter()
        .map(|pos| {
            let pos = pos.as_array()?;
            let lon = pos.first()?.as_f64()?;
            let lat = pos.get(1)?.as_f64()?;
            Some(LonLat::new(lon, lat))
        })
        .collect::<Option<Vec<_>>>()
        .filter(|ring| !ring.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn square(x0: f64, y0: f64, side: f64) -> Vec<LonLat> {
        vec![
            LonLat::new(x0, y0),
            LonLat::new(x0 + side, y0),
            LonLat::new(x0 + side, y0 + side),
            LonLat::new(x0, y0 + side),
        ]
    }

    #[test]
    fn test_ring_is_closed() {
        let f = FootprintFeature::new(square(0.0, 0.0, 1.0), Map::new());
        assert_eq!(f.ring.len(), 5);
        assert_eq!(f.ring[0], f.ring[4]);
        assert_eq!(f.vertices().len(), 4);
    }

    #[test]
    fn test_centroid_ignores_closing_vertex() {
        let mut ring = square(121.0, 24.0, 0.001);
        ring.push(ring[0]);
        let f = FootprintFeature::new(ring, Map::new());
        let c = f.centroid().unwrap();
        assert_abs_diff_eq!(c.lon, 121.0005, epsilon = 1e-12);
        assert_abs_diff_eq!(c.lat, 24.0005, epsilon = 1e-12);
    }

    #[test]
    fn test_point_in_ring() {
        let f = FootprintFeature::new(square(0.0, 0.0, 1.0), Map::new());
        assert!(f.contains(LonLat::new(0.5, 0.5)));
        assert!(!f.contains(LonLat::new(1.5, 0.5)));
        assert!(!f.contains(LonLat::new(0.5, -0.1)));

        // Concave "L"
        let l = FootprintFeature::new(
            vec![
                LonLat::new(0.0, 0.0),
                LonLat::new(2.0, 0.0),
                LonLat::new(2.0, 1.0),
                LonLat::new(1.0, 1.0),
                LonLat::new(1.0, 2.0),
                LonLat::new(0.0, 2.0),
            ],
            Map::new(),
        );
        assert!(l.contains(LonLat::new(0.5, 1.5)));
        assert!(!l.contains(LonLat::new(1.5, 1.5)));
    }

    #[test]
    fn test_validate() {
        let ok = FootprintFeature::new(square(0.0, 0.0, 1.0), Map::new());
        assert_eq!(ok.validate(), Ok(()));

        let two = FootprintFeature::new(
            vec![LonLat::new(0.0, 0.0), LonLat::new(1.0, 1.0), LonLat::new(0.0, 0.0)],
            Map::new(),
        );
        assert_eq!(two.validate(), Err(GeometryFailure::TooFewVertices));

        let line = FootprintFeature::new(
            vec![LonLat::new(0.0, 0.0), LonLat::new(1.0, 1.0), LonLat::new(2.0, 2.0)],
            Map::new(),
        );
        assert_eq!(line.validate(), Err(GeometryFailure::ZeroArea));
    }

    #[test]
    fn test_parse_collection() {
        let text = r#"{
            "type": "FeatureCollection",
            "name": "osm",
            "features": [
                {"type": "Feature",
                 "properties": {"building": "yes", "name": "Lab"},
                 "geometry": {"type": "Polygon", "coordinates": [
                    [[121.0, 24.0], [121.001, 24.0], [121.001, 24.001], [121.0, 24.001], [121.0, 24.0]],
                    [[121.0002, 24.0002], [121.0003, 24.0002], [121.0003, 24.0003], [121.0002, 24.0002]]
                 ]}},
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "Point", "coordinates": [121.0, 24.0]}},
                {"type": "Feature", "properties": null, "geometry": null},
                {"type": "Feature", "properties": {},
                 "geometry": {"type": "Polygon", "coordinates": [[["a", "b"]]]}},
                {"type": "Feature",
                 "geometry": {"type": "Polygon", "coordinates": [[[121.0, 24.0], [121.001, 24.0], [121.0, 24.001]]]}}
            ]
        }"#;
        let c = FootprintCollection::from_geojson_str(text).unwrap();
        assert_eq!(c.name.as_deref(), Some("osm"));
        assert_eq!(c.len(), 2);
        assert_eq!(c.skipped_non_polygon, 2);
        assert_eq!(c.malformed, 1);

        // Holes are ignored
        assert_eq!(c.features[0].ring.len(), 5);
        assert_eq!(c.features[0].tags["name"], "Lab");
        // Open ring closed, missing properties become empty
        assert_eq!(c.features[1].ring.len(), 4);
        assert!(c.features[1].tags.is_empty());
    }

    #[test]
    fn test_rejects_non_collection() {
        let err = FootprintCollection::from_geojson_str(r#"{"type": "Feature", "features": []}"#)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidFootprints(_)));
        assert!(FootprintCollection::from_geojson_str("not json").is_err());
    }
}
