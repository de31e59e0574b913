// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Pipeline configuration loaded from environment variables.
//!
//! Unparsable values fall back to their defaults with a warning; only the
//! command line is strict.

use crate::corpus::TraversalOrder;
use crate::dedup::DedupConfig;
use crate::error::{Error, Result};
use crate::fusion::FusionConfig;
use crate::spatial::IndexKind;
use oview_lite_core::{GeoBounds, Tm2Series};
use std::path::PathBuf;
use std::str::FromStr;

/// Pipeline configuration.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Root of the `L{level}/R{row}_C{col}.bin` tree.
    pub tiles_dir: Option<PathBuf>,
    /// GeoJSON FeatureCollection of footprint polygons.
    pub footprints: Option<PathBuf>,
    /// Directory the three output files are written to.
    pub output_dir: PathBuf,
    /// Phase-2 matching threshold in meters.
    pub max_match_distance_m: f64,
    /// Unmatched records outside this box are dropped from the fused output.
    pub area_of_interest: GeoBounds,
    pub traversal: TraversalOrder,
    pub index: IndexKind,
    /// Prefix for attribute keys copied onto footprints.
    pub attribute_prefix: String,
    /// Optional record filter applied during deduplication.
    pub region: Option<GeoBounds>,
    pub tm2_series: Tm2Series,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let fusion = FusionConfig::default();
        Self {
            tiles_dir: None,
            footprints: None,
            output_dir: PathBuf::from("./output"),
            max_match_distance_m: fusion.max_distance_m,
            area_of_interest: fusion.area_of_interest,
            traversal: TraversalOrder::default(),
            index: IndexKind::default(),
            attribute_prefix: fusion.attribute_prefix,
            region: None,
            tm2_series: Tm2Series::default(),
        }
    }
}

impl PipelineConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from any key/value source.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        Self {
            tiles_dir: get("OVIEW_TILES_DIR").map(PathBuf::from),
            footprints: get("OVIEW_FOOTPRINTS").map(PathBuf::from),
            output_dir: get("OVIEW_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.output_dir),
            max_match_distance_m: parse_or(
                "OVIEW_MAX_MATCH_DISTANCE_M",
                get("OVIEW_MAX_MATCH_DISTANCE_M"),
                parse_distance,
                defaults.max_match_distance_m,
            ),
            area_of_interest: parse_or(
                "OVIEW_AREA_OF_INTEREST",
                get("OVIEW_AREA_OF_INTEREST"),
                parse_bounds,
                defaults.area_of_interest,
            ),
            traversal: parse_or(
                "OVIEW_TRAVERSAL",
                get("OVIEW_TRAVERSAL"),
                TraversalOrder::from_str,
                defaults.traversal,
            ),
            index: parse_or(
                "OVIEW_SPATIAL_INDEX",
                get("OVIEW_SPATIAL_INDEX"),
                IndexKind::from_str,
                defaults.index,
            ),
            attribute_prefix: lookup("OVIEW_ATTRIBUTE_PREFIX").unwrap_or(defaults.attribute_prefix),
            region: get("OVIEW_REGION").and_then(|s| match parse_bounds(&s) {
                Ok(b) => Some(b),
                Err(err) => {
                    tracing::warn!(error = %err, "Ignoring OVIEW_REGION");
                    None
                }
            }),
            tm2_series: parse_or(
                "OVIEW_TM2_SERIES",
                get("OVIEW_TM2_SERIES"),
                parse_tm2_series,
                defaults.tm2_series,
            ),
        }
    }

    pub fn dedup_config(&self) -> DedupConfig {
        DedupConfig {
            series: self.tm2_series,
            region: self.region,
            ..DedupConfig::default()
        }
    }

    pub fn fusion_config(&self) -> FusionConfig {
        FusionConfig {
            max_distance_m: self.max_match_distance_m,
            area_of_interest: self.area_of_interest,
            attribute_prefix: self.attribute_prefix.clone(),
            ..FusionConfig::default()
        }
    }
}

fn parse_or<T, P>(key: &str, value: Option<String>, parse: P, default: T) -> T
where
    P: Fn(&str) -> Result<T>,
{
    let Some(value) = value else {
        return default;
    };
    match parse(&value) {
        Ok(v) => v,
        Err(err) => {
            tracing::warn!(key, value = %value, error = %err, "Invalid setting, using default");
            default
        }
    }
}

/// Parse `lon_min,lon_max,lat_min,lat_max`
pub fn parse_bounds(s: &str) -> Result<GeoBounds> {
    let parts: Vec<f64> = s
        .split(',')
        .map(|p| p.trim().parse::<f64>())
        .collect::<std::result::Result<_, _>>()
        .map_err(|e| Error::Config(format!("bounds {s:?}: {e}")))?;

    let [lon_min, lon_max, lat_min, lat_max] = parts[..] else {
        return Err(Error::Config(format!(
            "bounds {s:?}: expected lon_min,lon_max,lat_min,lat_max"
        )));
    };
    if !(lon_min <= lon_max && lat_min <= lat_max) {
        return Err(Error::Config(format!("bounds {s:?}: minimum exceeds maximum")));
    }
    Ok(GeoBounds::new(lon_min, lon_max, lat_min, lat_max))
}

/// Parse a non-negative distance in meters
pub fn parse_distance(s: &str) -> Result<f64> {
    match s.trim().parse::<f64>() {
        Ok(d) if d.is_finite() && d >= 0.0 => Ok(d),
        _ => Err(Error::Config(format!("distance {s:?}: expected meters >= 0"))),
    }
}

pub fn parse_tm2_series(s: &str) -> Result<Tm2Series> {
    match s.trim().to_ascii_lowercase().as_str() {
        "standard" => Ok(Tm2Series::Standard),
        "legacy" => Ok(Tm2Series::Legacy),
        other => Err(Error::Config(format!(
            "unknown TM2 series {other:?} (expected standard or legacy)"
        ))),
    }
}
