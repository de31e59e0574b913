// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! BuildingDeduplicator - one record per distinct BUILD_ID
//!
//! The same building appears in every tile whose footprint touches it, and
//! at several levels of detail. The first sighting in traversal order wins;
//! later ones are counted and dropped whatever their content.

use oview_lite_core::record::{CENTROID_EASTING, CENTROID_NORTHING};
use oview_lite_core::{
    tm2_to_wgs84_with, Attributes, BuildingRecord, DecodedTile, GeoBounds, LonLat, TileKey,
    Tm2Series,
};
use rustc_hash::FxHashSet;
use serde::Serialize;

/// Decimal places kept on derived lon/lat
pub const COORDINATE_DECIMALS: i32 = 7;

/// Settings for turning raw attribute rows into records
#[derive(Debug, Clone)]
pub struct DedupConfig {
    pub easting_field: String,
    pub northing_field: String,
    pub series: Tm2Series,
    /// Keep only records whose position falls inside this rectangle.
    /// Applied before the ID is claimed, so an out-of-region sighting never
    /// shadows a later in-region one.
    pub region: Option<GeoBounds>,
    pub coordinate_decimals: i32,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            easting_field: CENTROID_EASTING.to_string(),
            northing_field: CENTROID_NORTHING.to_string(),
            series: Tm2Series::Standard,
            region: None,
            coordinate_decimals: COORDINATE_DECIMALS,
        }
    }
}

/// Counters kept while ingesting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DedupStats {
    pub tiles_ingested: usize,
    pub tiles_with_buildings: usize,
    pub raw_records: usize,
    pub records_without_id: usize,
    pub duplicates_discarded: usize,
    pub records_without_position: usize,
    pub records_outside_region: usize,
    pub unique_records: usize,
}

/// Accumulates unique building records across tiles
#[derive(Debug, Default)]
pub struct BuildingDeduplicator {
    config: DedupConfig,
    seen: FxHashSet<String>,
    records: Vec<BuildingRecord>,
    stats: DedupStats,
}

impl BuildingDeduplicator {
    pub fn new(config: DedupConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &DedupConfig {
        &self.config
    }

    /// Ingest every building of a decoded tile. Provenance comes from the
    /// tile's own header, falling back to `fallback` (usually the key
    /// parsed from the file path). Returns how many records were kept.
    pub fn ingest_tile(&mut self, fallback: Option<TileKey>, tile: &DecodedTile) -> usize {
        self.stats.tiles_ingested += 1;
        if tile.buildings.is_empty() {
            return 0;
        }
        self.stats.tiles_with_buildings += 1;

        let key = tile.key().or(fallback);
        tile.buildings
            .iter()
            .filter(|attrs| self.ingest(key, (*attrs).clone()))
            .count()
    }

    /// Ingest one attribute row. Returns `true` if it became a new record.
    pub fn ingest(&mut self, tile: Option<TileKey>, attributes: Attributes) -> bool {
        self.stats.raw_records += 1;

        let mut record = BuildingRecord::new(attributes);
        record.tile = tile;
        record.position = self.position_of(&record);

        let Some(id) = record.id().filter(|id| !id.is_empty()) else {
            self.stats.records_without_id += 1;
            return false;
        };

        if let Some(region) = &self.config.region {
            match record.position {
                None => {
                    self.stats.records_without_position += 1;
                    return false;
                }
                Some(p) if !region.contains(p) => {
                    self.stats.records_outside_region += 1;
                    return false;
                }
                Some(_) => {}
            }
        }

        if self.seen.contains(id) {
            self.stats.duplicates_discarded += 1;
            return false;
        }
        self.seen.insert(id.to_string());

        if self.config.region.is_none() && record.position.is_none() {
            self.stats.records_without_position += 1;
        }
        self.records.push(record);
        self.stats.unique_records += 1;
        true
    }

    fn position_of(&self, record: &BuildingRecord) -> Option<LonLat> {
        let (e, n) =
            record.twd97_centroid(&self.config.easting_field, &self.config.northing_field)?;
        let (lon, lat) = tm2_to_wgs84_with(self.config.series, e, n);
        Some(LonLat::new(lon, lat).rounded(self.config.coordinate_decimals))
    }

    #[inline]
    pub fn contains(&self, id: &str) -> bool {
        self.seen.contains(id)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn records(&self) -> &[BuildingRecord] {
        &self.records
    }

    pub fn stats(&self) -> DedupStats {
        self.stats
    }

    /// Unique records in first-seen order
    pub fn into_records(self) -> Vec<BuildingRecord> {
        self.records
    }
}
