// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! GeoJSON output types

use oview_lite_core::{BuildingRecord, LonLat};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Property key carrying a record's source tile
pub const TILE_PROPERTY: &str = "tile";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Geometry {
    Point { coordinates: [f64; 2] },
    Polygon { coordinates: Vec<Vec<[f64; 2]>> },
}

impl Geometry {
    pub fn point(p: LonLat) -> Self {
        Geometry::Point {
            coordinates: [p.lon, p.lat],
        }
    }

    /// Single-ring polygon
    pub fn polygon(ring: &[LonLat]) -> Self {
        Geometry::Polygon {
            coordinates: vec![ring.iter().map(|p| [p.lon, p.lat]).collect()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FeatureTag {
    Feature,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CollectionTag {
    FeatureCollection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub tag: FeatureTag,
    pub geometry: Geometry,
    pub properties: Map<String, Value>,
}

impl Feature {
    pub fn new(geometry: Geometry, properties: Map<String, Value>) -> Self {
        Self {
            tag: FeatureTag::Feature,
            geometry,
            properties,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureCollection {
    #[serde(rename = "type")]
    pub tag: CollectionTag,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
    pub features: Vec<Feature>,
}

impl FeatureCollection {
    pub fn new(features: Vec<Feature>) -> Self {
        Self {
            tag: CollectionTag::FeatureCollection,
            name: None,
            metadata: None,
            features,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_metadata(mut self, metadata: Value) -> Self {
        self.metadata = Some(metadata);
        self
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Attribute values as JSON strings, plus the source tile label
pub fn record_properties(record: &BuildingRecord) -> Map<String, Value> {
    let mut props: Map<String, Value> = record
        .attributes
        .iter()
        .map(|(k, v)| (k.clone(), Value::String(v.clone())))
        .collect();
    if let Some(tile) = record.tile {
        props.insert(TILE_PROPERTY.to_string(), Value::String(tile.to_string()));
    }
    props
}

/// Point layer of every geo-referenced record, in record order
pub fn records_to_points(records: &[BuildingRecord]) -> FeatureCollection {
    let features = records
        .iter()
        .filter_map(|r| {
            let position = r.position?;
            Some(Feature::new(Geometry::point(position), record_properties(r)))
        })
        .collect();
    FeatureCollection::new(features)
}
