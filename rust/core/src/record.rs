// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Building attribute records and tile addressing

use crate::geodesy::LonLat;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

/// Canonical identity field, always the first declared field
pub const BUILD_ID: &str = "BUILD_ID";
/// Building height in meters
pub const BUILD_HEIGHT: &str = "BUILD_H";
/// TWD97 centroid easting
pub const CENTROID_EASTING: &str = "CENT_E_97";
/// TWD97 centroid northing
pub const CENTROID_NORTHING: &str = "CENT_N_97";
/// Placeholder the tiles use for an absent value
pub const MISSING_VALUE: &str = "NA";

/// Sparse field-name to value map
pub type Attributes = BTreeMap<String, String>;

/// Parse a textual attribute as a finite number
#[inline]
pub fn parse_number(value: &str) -> Option<f64> {
    fast_float::parse::<f64, _>(value.trim())
        .ok()
        .filter(|v| v.is_finite())
}

/// `(level, row, col)` address of one quadtree tile.
///
/// Ordering is level first, then row, then column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TileKey {
    pub level: u32,
    pub row: u32,
    pub col: u32,
}

impl TileKey {
    pub fn new(level: u32, row: u32, col: u32) -> Self {
        Self { level, row, col }
    }
}

impl fmt::Display for TileKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}/R{}_C{}", self.level, self.row, self.col)
    }
}

/// Error parsing a `L{level}/R{row}_C{col}` tile label
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid tile label: {0:?}")]
pub struct ParseTileKeyError(pub String);

impl FromStr for TileKey {
    type Err = ParseTileKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let err = || ParseTileKeyError(s.to_string());
        let (level, rest) = s.split_once('/').ok_or_else(err)?;
        let level = level.strip_prefix('L').ok_or_else(err)?;
        let (row, col) = rest
            .strip_prefix('R')
            .and_then(|r| r.split_once("_C"))
            .ok_or_else(err)?;

        Ok(Self {
            level: level.parse().map_err(|_| err())?,
            row: row.parse().map_err(|_| err())?,
            col: col.parse().map_err(|_| err())?,
        })
    }
}

/// One building's attributes as recovered from a tile
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildingRecord {
    /// Non-empty attribute values keyed by declared field name
    pub attributes: Attributes,
    /// Tile the record was first seen in
    pub tile: Option<TileKey>,
    /// WGS84 position derived from the TWD97 centroid
    pub position: Option<LonLat>,
}

impl BuildingRecord {
    pub fn new(attributes: Attributes) -> Self {
        Self {
            attributes,
            tile: None,
            position: None,
        }
    }

    /// Value of the `BUILD_ID` field
    #[inline]
    pub fn id(&self) -> Option<&str> {
        self.get(BUILD_ID)
    }

    #[inline]
    pub fn get(&self, field: &str) -> Option<&str> {
        self.attributes.get(field).map(String::as_str)
    }

    /// Field value parsed as a finite number
    pub fn number(&self, field: &str) -> Option<f64> {
        self.get(field).and_then(parse_number)
    }

    /// Height in meters, `0.0` when absent or unparsable
    pub fn height(&self) -> f64 {
        self.number(BUILD_HEIGHT).unwrap_or(0.0)
    }

    /// TWD97 `(easting, northing)` when both fields are numeric
    pub fn twd97_centroid(&self, easting: &str, northing: &str) -> Option<(f64, f64)> {
        Some((self.number(easting)?, self.number(northing)?))
    }
}

#[cfg(feature = "serde")]
mod serde_impl {
    use super::{Attributes, BuildingRecord, TileKey};
    use crate::geodesy::LonLat;
    use serde::de::Error as _;
    use serde::ser::SerializeMap;
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    impl Serialize for TileKey {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            serializer.collect_str(self)
        }
    }

    impl<'de> Deserialize<'de> for TileKey {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let label = String::deserialize(deserializer)?;
            label.parse().map_err(D::Error::custom)
        }
    }

    /// Records serialize flat: attributes, then `_tile`, `lon`, `lat`
    impl Serialize for BuildingRecord {
        fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
            let extra = self.tile.is_some() as usize + 2 * self.position.is_some() as usize;
            let mut map = serializer.serialize_map(Some(self.attributes.len() + extra))?;
            for (k, v) in &self.attributes {
                map.serialize_entry(k, v)?;
            }
            if let Some(tile) = &self.tile {
                map.serialize_entry("_tile", tile)?;
            }
            if let Some(p) = &self.position {
                map.serialize_entry("lon", &p.lon)?;
                map.serialize_entry("lat", &p.lat)?;
            }
            map.end()
        }
    }

    #[derive(Deserialize)]
    struct FlatRecord {
        #[serde(rename = "_tile", default)]
        tile: Option<TileKey>,
        #[serde(default)]
        lon: Option<f64>,
        #[serde(default)]
        lat: Option<f64>,
        #[serde(flatten)]
        attributes: Attributes,
    }

    impl<'de> Deserialize<'de> for BuildingRecord {
        fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
            let flat = FlatRecord::deserialize(deserializer)?;
            let position = match (flat.lon, flat.lat) {
                (Some(lon), Some(lat)) => Some(LonLat::new(lon, lat)),
                _ => None,
            };
            Ok(BuildingRecord {
                attributes: flat.attributes,
                tile: flat.tile,
                position,
            })
        }
    }
}
