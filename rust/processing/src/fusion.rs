// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! BuildingFusionEngine - attribute points onto footprint polygons
//!
//! Two phases, both in record order:
//!
//! 1. **Point in polygon**: the first footprint (input order) whose ring
//!    contains the record's position.
//! 2. **Nearest**: records still unmatched go to the footprint with the
//!    nearest centroid, if it lies within `max_distance_m`.
//!
//! A footprint collecting several records takes its attributes from the
//! tallest one; on equal height the earliest match stays primary. Records
//! left unmatched become point features when inside the area of interest.

use crate::footprint::FootprintCollection;
use crate::geojson::{record_properties, Feature, FeatureCollection, Geometry, TILE_PROPERTY};
use crate::spatial::{FootprintIndex, GridIndex, IndexKind, LinearIndex, PreparedFootprint};
use oview_lite_core::{BuildingRecord, GeoBounds, BUILD_HEIGHT};
use serde::Serialize;
use serde_json::{Map, Value};

/// Footprint tag filled from the primary record's height when absent
pub const HEIGHT_TAG: &str = "height";
/// `source` value on standalone point features
pub const ATTRIBUTE_ONLY_SOURCE: &str = "NLSC_only";

#[derive(Debug, Clone)]
pub struct FusionConfig {
    pub max_distance_m: f64,
    /// Unmatched records outside this rectangle are dropped
    pub area_of_interest: GeoBounds,
    /// Prefix for attribute keys copied onto footprints
    pub attribute_prefix: String,
    pub height_field: String,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            max_distance_m: 30.0,
            area_of_interest: GeoBounds::new(120.990, 121.005, 24.780, 24.795),
            attribute_prefix: "nlsc_".to_string(),
            height_field: BUILD_HEIGHT.to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPhase {
    PointInPolygon,
    Nearest,
}

impl MatchPhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            MatchPhase::PointInPolygon => "point_in_polygon",
            MatchPhase::Nearest => "nearest",
        }
    }
}

/// One record assigned to a footprint
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FootprintMatch {
    /// Index into the record slice
    pub record: usize,
    pub phase: MatchPhase,
    /// Centroid distance, phase 2 only
    pub distance_m: Option<f64>,
}

/// Aggregate counters, also written as the output's `metadata`
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FusionSummary {
    pub footprints: usize,
    pub footprints_skipped: usize,
    pub attribute_records: usize,
    pub records_without_position: usize,
    pub matched_point_in_polygon: usize,
    pub matched_nearest: usize,
    pub footprints_with_match: usize,
    pub footprints_without_match: usize,
    pub multi_match: usize,
    pub unmatched_in_area: usize,
    pub unmatched_outside_area: usize,
    pub total_features: usize,
}

#[derive(Debug, Clone)]
pub struct FusionOutcome {
    pub collection: FeatureCollection,
    pub summary: FusionSummary,
    /// Matches per footprint, in collection order
    pub matches: Vec<Vec<FootprintMatch>>,
}

/// Footprints that pass validation, paired with the count that did not
pub fn prepare_footprints(footprints: &FootprintCollection) -> (Vec<PreparedFootprint>, usize) {
    let prepared: Vec<_> = footprints
        .features
        .iter()
        .enumerate()
        .filter_map(|(i, f)| PreparedFootprint::prepare(i, f))
        .collect();
    let skipped = footprints.features.len() - prepared.len();
    (prepared, skipped)
}

#[derive(Debug, Clone, Default)]
pub struct BuildingFusionEngine {
    config: FusionConfig,
}

impl BuildingFusionEngine {
    pub fn new(config: FusionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &FusionConfig {
        &self.config
    }

    /// Fuse with the chosen index kind
    pub fn fuse(
        &self,
        records: &[BuildingRecord],
        footprints: &FootprintCollection,
        kind: IndexKind,
    ) -> FusionOutcome {
        let (prepared, _) = prepare_footprints(footprints);
        match kind {
            IndexKind::Linear => self.fuse_with(records, footprints, &prepared, &LinearIndex),
            IndexKind::Grid { cell_deg } => match GridIndex::build(&prepared, cell_deg) {
                Ok(index) => self.fuse_with(records, footprints, &prepared, &index),
                Err(err) => {
                    tracing::warn!(error = %err, "Grid index unavailable, using linear scan");
                    self.fuse_with(records, footprints, &prepared, &LinearIndex)
                }
            },
        }
    }

    /// Fuse against `prepared` (from [`prepare_footprints`]) through `index`
    pub fn fuse_with<I: FootprintIndex>(
        &self,
        records: &[BuildingRecord],
        footprints: &FootprintCollection,
        prepared: &[PreparedFootprint],
        index: &I,
    ) -> FusionOutcome {
        let mut summary = FusionSummary {
            footprints: footprints.features.len(),
            footprints_skipped: footprints.features.len() - prepared.len(),
            attribute_records: records.len(),
            ..FusionSummary::default()
        };

        let mut per_prepared: Vec<Vec<FootprintMatch>> = vec![Vec::new(); prepared.len()];
        let mut matched = vec![false; records.len()];

        for (i, record) in records.iter().enumerate() {
            let Some(position) = record.position else {
                summary.records_without_position += 1;
                continue;
            };
            if let Some(j) = index.containing(prepared, position) {
                per_prepared[j].push(FootprintMatch {
                    record: i,
                    phase: MatchPhase::PointInPolygon,
                    distance_m: None,
                });
                matched[i] = true;
                summary.matched_point_in_polygon += 1;
            }
        }

        for (i, record) in records.iter().enumerate() {
            let Some(position) = record.position.filter(|_| !matched[i]) else {
                continue;
            };
            if let Some((j, d)) = index.nearest_within(prepared, position, self.config.max_distance_m) {
                per_prepared[j].push(FootprintMatch {
                    record: i,
                    phase: MatchPhase::Nearest,
                    distance_m: Some(d),
                });
                matched[i] = true;
                summary.matched_nearest += 1;
            }
        }

        let mut matches: Vec<Vec<FootprintMatch>> = vec![Vec::new(); footprints.features.len()];
        for (p, found) in prepared.iter().zip(per_prepared) {
            matches[p.source] = found;
        }

        let mut features = Vec::with_capacity(footprints.features.len());
        for (feature, found) in footprints.features.iter().zip(&matches) {
            let mut properties = feature.tags.clone();
            if let Some(primary) = self.primary(records, found) {
                summary.footprints_with_match += 1;
                if found.len() > 1 {
                    summary.multi_match += 1;
                }
                self.enrich(&mut properties, &records[primary.record], primary.phase, found.len());
            } else {
                summary.footprints_without_match += 1;
            }
            features.push(Feature::new(Geometry::polygon(&feature.ring), properties));
        }

        for (record, _) in records.iter().zip(&matched).filter(|(_, m)| !**m) {
            let Some(position) = record.position else {
                continue;
            };
            if self.config.area_of_interest.contains(position) {
                summary.unmatched_in_area += 1;
                features.push(Feature::new(Geometry::point(position), self.point_properties(record)));
            } else {
                summary.unmatched_outside_area += 1;
            }
        }

        summary.total_features = features.len();
        tracing::info!(
            footprints = summary.footprints,
            skipped = summary.footprints_skipped,
            point_in_polygon = summary.matched_point_in_polygon,
            nearest = summary.matched_nearest,
            multi_match = summary.multi_match,
            unmatched_in_area = summary.unmatched_in_area,
            "Fusion complete"
        );

        let metadata = serde_json::to_value(&summary).unwrap_or(Value::Null);
        let mut collection = FeatureCollection::new(features).with_metadata(metadata);
        if let Some(name) = &footprints.name {
            collection = collection.with_name(name.clone());
        }

        FusionOutcome {
            collection,
            summary,
            matches,
        }
    }

    /// Tallest match; the earliest one wins ties
    fn primary<'a>(&self, records: &[BuildingRecord], found: &'a [FootprintMatch]) -> Option<&'a FootprintMatch> {
        let mut best: Option<(&FootprintMatch, f64)> = None;
        for m in found {
            let h = self.height_of(&records[m.record]);
            if best.map_or(true, |(_, bh)| h > bh) {
                best = Some((m, h));
            }
        }
        best.map(|(m, _)| m)
    }

    fn height_of(&self, record: &BuildingRecord) -> f64 {
        record.number(&self.config.height_field).unwrap_or(0.0)
    }

    fn enrich(&self, props: &mut Map<String, Value>, record: &BuildingRecord, phase: MatchPhase, count: usize) {
        let prefix = &self.config.attribute_prefix;
        for (k, v) in &record.attributes {
            props.insert(format!("{prefix}{k}"), Value::String(v.clone()));
        }
        props.insert(format!("{prefix}match_count"), Value::from(count));
        props.insert(format!("{prefix}match_phase"), Value::from(phase.as_str()));
        if let Some(tile) = record.tile {
            props.insert(format!("{prefix}{TILE_PROPERTY}"), Value::String(tile.to_string()));
        }
        if !props.contains_key(HEIGHT_TAG) {
            if let Some(h) = record.get(&self.config.height_field) {
                props.insert(HEIGHT_TAG.to_string(), Value::String(h.to_string()));
            }
        }
    }

    /// Record attributes plus the tile key, with `source` and `height` set
    /// last so attribute columns of the same name never mask them
    fn point_properties(&self, record: &BuildingRecord) -> Map<String, Value> {
        let mut props = record_properties(record);
        props.insert("source".to_string(), Value::from(ATTRIBUTE_ONLY_SOURCE));
        if let Some(h) = record.get(&self.config.height_field) {
            props.insert(HEIGHT_TAG.to_string(), Value::String(h.to_string()));
        }
        props
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::footprint::FootprintFeature;
    use oview_lite_core::{Attributes, LonLat, TileKey};
    use serde_json::json;

    /// Meters per degree of longitude at 24.79°N (haversine sphere)
    const M_PER_DEG_LON: f64 = 100_970.0;

    fn record(id: &str, height: Option<&str>, lon: f64, lat: f64) -> BuildingRecord {
        let mut attrs = Attributes::new();
        attrs.insert("BUILD_ID".into(), id.into());
        if let Some(h) = height {
            attrs.insert("BUILD_H".into(), h.into());
        }
        let mut r = BuildingRecord::new(attrs);
        r.position = Some(LonLat::new(lon, lat));
        r.tile = Some(TileKey::new(16, 1, 2));
        r
    }

    /// ~22 m square at the Hsinchu test site
    fn square(lon: f64, lat: f64) -> FootprintFeature {
        let s = 0.0002;
        let mut tags = Map::new();
        tags.insert("building".into(), json!("yes"));
        FootprintFeature::new(
            vec![
                LonLat::new(lon, lat),
                LonLat::new(lon + s, lat),
                LonLat::new(lon + s, lat + s),
                LonLat::new(lon, lat + s),
            ],
            tags,
        )
    }

    fn collection(features: Vec<FootprintFeature>) -> FootprintCollection {
        FootprintCollection::new(features)
    }

    const LON: f64 = 120.997;
    const LAT: f64 = 24.787;

    fn both_indexes(
        records: &[BuildingRecord],
        fps: &FootprintCollection,
    ) -> FusionOutcome {
        let engine = BuildingFusionEngine::default();
        let linear = engine.fuse(records, fps, IndexKind::Linear);
        let grid = engine.fuse(records, fps, IndexKind::Grid { cell_deg: 0.0005 });
        assert_eq!(linear.summary, grid.summary);
        assert_eq!(linear.collection, grid.collection);
        linear
    }

    #[test]
    fn test_phase_one_inside() {
        let fps = collection(vec![square(LON, LAT)]);
        let out = both_indexes(&[record("A", Some("12"), LON + 0.0001, LAT + 0.0001)], &fps);

        assert_eq!(out.summary.matched_point_in_polygon, 1);
        assert_eq!(out.summary.matched_nearest, 0);
        assert_eq!(out.matches[0][0].phase, MatchPhase::PointInPolygon);

        let props = &out.collection.features[0].properties;
        assert_eq!(props["nlsc_BUILD_ID"], "A");
        assert_eq!(props["nlsc_match_count"], 1);
        assert_eq!(props["nlsc_match_phase"], "point_in_polygon");
        assert_eq!(props["nlsc_tile"], "L16/R1_C2");
        assert_eq!(props["height"], "12");
        assert_eq!(props["building"], "yes");
    }

    #[test]
    fn test_phase_two_within_threshold() {
        let fps = collection(vec![square(LON, LAT)]);
        // Centroid at LON+0.0001; 10 m east of the east edge is ~21 m from it
        let east_edge = LON + 0.0002;
        let p = record("B", None, east_edge + 10.0 / M_PER_DEG_LON, LAT + 0.0001);
        let out = both_indexes(&[p], &fps);

        assert_eq!(out.summary.matched_point_in_polygon, 0);
        assert_eq!(out.summary.matched_nearest, 1);
        let m = out.matches[0][0];
        assert_eq!(m.phase, MatchPhase::Nearest);
        let d = m.distance_m.unwrap();
        assert!(d > 19.0 && d < 23.0, "distance {d}");
        assert_eq!(out.collection.features[0].properties["nlsc_match_phase"], "nearest");
    }

    #[test]
    fn test_phase_two_beyond_threshold() {
        let fps = collection(vec![square(LON, LAT)]);
        let centroid_lon = LON + 0.0001;
        let p = record("C", None, centroid_lon + 40.0 / M_PER_DEG_LON, LAT + 0.0001);
        let out = both_indexes(&[p], &fps);

        assert_eq!(out.summary.matched_nearest, 0);
        assert_eq!(out.summary.footprints_without_match, 1);
        assert_eq!(out.summary.unmatched_in_area, 1);

        let point = &out.collection.features[1];
        assert!(matches!(point.geometry, Geometry::Point { .. }));
        assert_eq!(point.properties["source"], "NLSC_only");
        assert_eq!(point.properties["BUILD_ID"], "C");
        assert_eq!(point.properties["tile"], "L16/R1_C2");
    }

    #[test]
    fn test_tallest_record_is_primary() {
        let fps = collection(vec![square(LON, LAT)]);
        let records = [
            record("LOW", Some("5"), LON + 0.00005, LAT + 0.00005),
            record("HIGH", Some("50"), LON + 0.00015, LAT + 0.00015),
        ];
        let out = both_indexes(&records, &fps);

        let props = &out.collection.features[0].properties;
        assert_eq!(props["nlsc_BUILD_ID"], "HIGH");
        assert_eq!(props["nlsc_match_count"], 2);
        assert_eq!(props["height"], "50");
        assert_eq!(out.summary.multi_match, 1);
    }

    #[test]
    fn test_equal_heights_keep_first_match() {
        let fps = collection(vec![square(LON, LAT)]);
        let records = [
            record("FIRST", Some("9"), LON + 0.00005, LAT + 0.00005),
            record("SECOND", Some("9.0"), LON + 0.00015, LAT + 0.00015),
            record("NONE", None, LON + 0.0001, LAT + 0.0001),
        ];
        let out = both_indexes(&records, &fps);
        assert_eq!(out.collection.features[0].properties["nlsc_BUILD_ID"], "FIRST");
    }

    #[test]
    fn test_phase_one_matches_precede_phase_two() {
        let fps = collection(vec![square(LON, LAT)]);
        let outside = record("OUT", Some("7"), LON + 0.0002 + 5.0 / M_PER_DEG_LON, LAT + 0.0001);
        let inside = record("IN", Some("7"), LON + 0.0001, LAT + 0.0001);
        let out = both_indexes(&[outside, inside], &fps);

        let found = &out.matches[0];
        assert_eq!(found[0].record, 1);
        assert_eq!(found[1].record, 0);
        assert_eq!(out.collection.features[0].properties["nlsc_BUILD_ID"], "IN");
    }

    #[test]
    fn test_existing_height_tag_is_kept() {
        let mut fp = square(LON, LAT);
        fp.tags.insert("height".into(), json!("33"));
        let out = both_indexes(&[record("A", Some("12"), LON + 0.0001, LAT + 0.0001)], &collection(vec![fp]));
        assert_eq!(out.collection.features[0].properties["height"], "33");
    }

    #[test]
    fn test_first_polygon_wins_overlap() {
        let fps = collection(vec![square(LON, LAT), square(LON + 0.0001, LAT + 0.0001)]);
        let out = both_indexes(&[record("A", None, LON + 0.00015, LAT + 0.00015)], &fps);
        assert_eq!(out.matches[0].len(), 1);
        assert!(out.matches[1].is_empty());
    }

    #[test]
    fn test_degenerate_footprint_passes_through() {
        let line = FootprintFeature::new(
            vec![LonLat::new(LON, LAT), LonLat::new(LON + 0.001, LAT), LonLat::new(LON + 0.002, LAT)],
            Map::new(),
        );
        let fps = collection(vec![line, square(LON, LAT)]);
        let out = both_indexes(&[record("A", None, LON + 0.0001, LAT + 0.0001)], &fps);

        assert_eq!(out.summary.footprints, 2);
        assert_eq!(out.summary.footprints_skipped, 1);
        assert!(out.matches[0].is_empty());
        assert_eq!(out.matches[1].len(), 1);
        assert!(out.collection.features[0].properties.is_empty());
        assert_eq!(out.collection.features[1].properties["nlsc_BUILD_ID"], "A");
    }

    #[test]
    fn test_unpositioned_and_out_of_area_records() {
        let fps = collection(vec![square(LON, LAT)]);
        let mut floating = record("F", None, 0.0, 0.0);
        floating.position = None;
        let far = record("T", None, 121.5645, 25.034);
        let out = both_indexes(&[floating, far], &fps);

        assert_eq!(out.summary.records_without_position, 1);
        assert_eq!(out.summary.unmatched_outside_area, 1);
        assert_eq!(out.summary.unmatched_in_area, 0);
        assert_eq!(out.summary.total_features, 1);
    }

    #[test]
    fn test_metadata_carries_summary() {
        let fps = collection(vec![square(LON, LAT)]);
        let out = both_indexes(&[record("A", None, LON + 0.0001, LAT + 0.0001)], &fps);
        let metadata = out.collection.metadata.unwrap();
        assert_eq!(metadata["matched_point_in_polygon"], 1);
        assert_eq!(metadata["total_features"], 1);
    }

    #[test]
    fn test_custom_prefix() {
        let engine = BuildingFusionEngine::new(FusionConfig {
            attribute_prefix: "moi_".into(),
            ..FusionConfig::default()
        });
        let out = engine.fuse(
            &[record("A", None, LON + 0.0001, LAT + 0.0001)],
            &collection(vec![square(LON, LAT)]),
            IndexKind::Linear,
        );
        assert_eq!(out.collection.features[0].properties["moi_BUILD_ID"], "A");
        assert_eq!(out.collection.features[0].properties["moi_match_count"], 1);
    }

    #[test]
    fn test_point_tags_override_same_named_columns() {
        let mut r = record("D", Some("7"), LON + 0.005, LAT + 0.001);
        r.attributes.insert("source".into(), "survey".into());
        r.attributes.insert("height".into(), "tall".into());
        let out = both_indexes(&[r], &collection(vec![square(LON, LAT)]));

        let point = &out.collection.features[1];
        assert_eq!(point.properties["source"], "NLSC_only");
        assert_eq!(point.properties["height"], "7");
        assert_eq!(point.properties["BUILD_ID"], "D");
        assert_eq!(point.properties["tile"], "L16/R1_C2");
    }

    #[test]
    fn test_invalid_grid_cell_falls_back_to_linear() {
        let fps = collection(vec![square(LON, LAT)]);
        let records = [record("A", Some("3"), LON + 0.0001, LAT + 0.0001)];
        let engine = BuildingFusionEngine::default();
        let linear = engine.fuse(&records, &fps, IndexKind::Linear);
        for cell_deg in [0.0, f64::NAN] {
            let grid = engine.fuse(&records, &fps, IndexKind::Grid { cell_deg });
            assert_eq!(grid.summary, linear.summary);
            assert_eq!(grid.collection, linear.collection);
        }
    }
}
