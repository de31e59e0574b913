// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Spatial lookup of footprints for the fusion phases.
//!
//! [`LinearIndex`] scans every footprint and defines the reference answers.
//! [`GridIndex`] is a lon/lat spatial hash that must return exactly what the
//! linear scan returns, including its tie-breaks:
//!
//! - containment: the lowest-indexed footprint containing the point
//! - nearest: minimum centroid distance, lowest index on equal distance

use crate::error::{Error, Result};
use crate::footprint::{point_in_ring, FootprintFeature};
use oview_lite_core::geodesy::EARTH_RADIUS_M;
use oview_lite_core::{GeoBounds, LonLat};
use rustc_hash::FxHashMap;
use std::fmt;
use std::str::FromStr;

/// Default grid cell edge, roughly 110 m of latitude
pub const DEFAULT_CELL_DEG: f64 = 0.001;

/// Beyond this many cells per axis the grid defers to a linear scan, both
/// for query windows and for registering a footprint's bounds
const MAX_RING_CELLS: i64 = 512;

/// Smallest accepted cell edge, keeps cell coordinates far from `i64` limits
pub const MIN_CELL_DEG: f64 = 1e-9;

/// A footprint ready for matching
#[derive(Debug, Clone, PartialEq)]
pub struct PreparedFootprint {
    /// Position in the source collection
    pub source: usize,
    pub ring: Vec<LonLat>,
    pub centroid: LonLat,
    pub bounds: GeoBounds,
}

impl PreparedFootprint {
    /// `None` when the feature fails validation
    pub fn prepare(source: usize, feature: &FootprintFeature) -> Option<Self> {
        feature.validate().ok()?;
        Some(Self {
            source,
            ring: feature.ring.clone(),
            centroid: feature.centroid()?,
            bounds: feature.bounds()?,
        })
    }

    #[inline]
    pub fn contains(&self, point: LonLat) -> bool {
        self.bounds.contains(point) && point_in_ring(point, &self.ring)
    }
}

/// Footprint lookup used by the fusion engine.
///
/// Returned indices are positions in the `footprints` slice the index was
/// built over.
pub trait FootprintIndex {
    /// Lowest-indexed footprint whose polygon contains `point`
    fn containing(&self, footprints: &[PreparedFootprint], point: LonLat) -> Option<usize>;

    /// Footprint with the nearest centroid, if within `max_distance_m`
    fn nearest_within(
        &self,
        footprints: &[PreparedFootprint],
        point: LonLat,
        max_distance_m: f64,
    ) -> Option<(usize, f64)>;
}

/// Exhaustive scan
#[derive(Debug, Clone, Copy, Default)]
pub struct LinearIndex;

impl FootprintIndex for LinearIndex {
    fn containing(&self, footprints: &[PreparedFootprint], point: LonLat) -> Option<usize> {
        footprints.iter().position(|f| f.contains(point))
    }

    fn nearest_within(
        &self,
        footprints: &[PreparedFootprint],
        point: LonLat,
        max_distance_m: f64,
    ) -> Option<(usize, f64)> {
        let mut best: Option<(usize, f64)> = None;
        for (i, f) in footprints.iter().enumerate() {
            let d = point.distance_m(&f.centroid);
            if best.map_or(true, |(_, bd)| d < bd) {
                best = Some((i, d));
            }
        }
        best.filter(|&(_, d)| d <= max_distance_m)
    }
}

/// Grid spatial hash over lon/lat.
///
/// Polygons are registered in every cell their bounds overlap, centroids in
/// the single cell they fall in. Per-cell lists stay in ascending index
/// order, which is what keeps the first-match semantics of the linear scan.
///
/// A polygon whose bounds span more than `MAX_RING_CELLS` cells on either
/// axis goes to a separate oversized list that every containment query
/// merges in index order.
///
/// Longitudes are not wrapped, so a nearest query never crosses the
/// antimeridian.
#[derive(Debug)]
pub struct GridIndex {
    cell_deg: f64,
    polygons: FxHashMap<(i64, i64), Vec<usize>>,
    centroids: FxHashMap<(i64, i64), Vec<usize>>,
    oversized: Vec<usize>,
}

impl GridIndex {
    /// Empty grid. `cell_deg` must be finite and at least [`MIN_CELL_DEG`].
    pub fn new(cell_deg: f64) -> Result<Self> {
        if !(cell_deg.is_finite() && cell_deg >= MIN_CELL_DEG) {
            return Err(Error::Config(format!(
                "grid cell size must be a finite number of degrees >= {MIN_CELL_DEG}, got {cell_deg}"
            )));
        }
        Ok(Self {
            cell_deg,
            polygons: FxHashMap::default(),
            centroids: FxHashMap::default(),
            oversized: Vec::new(),
        })
    }

    pub fn build(footprints: &[PreparedFootprint], cell_deg: f64) -> Result<Self> {
        let mut index = Self::new(cell_deg)?;
        for (i, f) in footprints.iter().enumerate() {
            index.insert(i, f);
        }
        Ok(index)
    }

    /// Register footprint `i`. Indices must be inserted in ascending order.
    pub fn insert(&mut self, i: usize, footprint: &PreparedFootprint) {
        let cell = self.cell_coords(footprint.centroid);
        self.centroids.entry(cell).or_default().push(i);

        let (x0, y0) = self.cell_coords(LonLat::new(footprint.bounds.lon_min, footprint.bounds.lat_min));
        let (x1, y1) = self.cell_coords(LonLat::new(footprint.bounds.lon_max, footprint.bounds.lat_max));
        if x1.saturating_sub(x0) >= MAX_RING_CELLS || y1.saturating_sub(y0) >= MAX_RING_CELLS {
            self.oversized.push(i);
            return;
        }
        for cx in x0..=x1 {
            for cy in y0..=y1 {
                self.polygons.entry((cx, cy)).or_default().push(i);
            }
        }
    }

    pub fn cell_deg(&self) -> f64 {
        self.cell_deg
    }

    /// Footprints kept out of the cells because their bounds are too wide
    pub fn oversized(&self) -> &[usize] {
        &self.oversized
    }

    fn cell_coords(&self, p: LonLat) -> (i64, i64) {
        (
            (p.lon / self.cell_deg).floor() as i64,
            (p.lat / self.cell_deg).floor() as i64,
        )
    }

    /// Cells to search each side of the query cell, or `None` when the
    /// window is too wide to be worth it
    fn search_rings(&self, point: LonLat, max_distance_m: f64) -> Option<(i64, i64)> {
        let lat_span = (max_distance_m / EARTH_RADIUS_M).to_degrees();
        let worst_lat = (point.lat.abs() + lat_span).min(90.0);
        let cos_lat = worst_lat.to_radians().cos();
        if cos_lat < 1e-6 {
            return None;
        }
        let lon_span = lat_span / cos_lat;

        // One extra ring covers cell-boundary rounding
        let rings_lon = ((lon_span / self.cell_deg).ceil() as i64).saturating_add(1);
        let rings_lat = ((lat_span / self.cell_deg).ceil() as i64).saturating_add(1);
        (rings_lon <= MAX_RING_CELLS && rings_lat <= MAX_RING_CELLS).then_some((rings_lon, rings_lat))
    }
}

impl FootprintIndex for GridIndex {
    fn containing(&self, footprints: &[PreparedFootprint], point: LonLat) -> Option<usize> {
        let cell = self
            .polygons
            .get(&self.cell_coords(point))
            .map_or(&[][..], Vec::as_slice);
        // Merge both ascending lists so the lowest index is tested first
        let (mut a, mut b) = (0, 0);
        loop {
            let i = match (cell.get(a), self.oversized.get(b)) {
                (Some(&x), Some(&y)) if x < y => {
                    a += 1;
                    x
                }
                (_, Some(&y)) => {
                    b += 1;
                    y
                }
                (Some(&x), None) => {
                    a += 1;
                    x
                }
                (None, None) => return None,
            };
            if footprints[i].contains(point) {
                return Some(i);
            }
        }
    }

    fn nearest_within(
        &self,
        footprints: &[PreparedFootprint],
        point: LonLat,
        max_distance_m: f64,
    ) -> Option<(usize, f64)> {
        let Some((rings_lon, rings_lat)) = self.search_rings(point, max_distance_m) else {
            return LinearIndex.nearest_within(footprints, point, max_distance_m);
        };

        let (cx, cy) = self.cell_coords(point);
        let mut best: Option<(usize, f64)> = None;
        for dx in -rings_lon..=rings_lon {
            for dy in -rings_lat..=rings_lat {
                let Some(keys) = self.centroids.get(&(cx + dx, cy + dy)) else {
                    continue;
                };
                for &i in keys {
                    let d = point.distance_m(&footprints[i].centroid);
                    let better = match best {
                        None => true,
                        Some((bi, bd)) => d < bd || (d == bd && i < bi),
                    };
                    if better {
                        best = Some((i, d));
                    }
                }
            }
        }
        best.filter(|&(_, d)| d <= max_distance_m)
    }
}

/// Which index the fusion engine builds
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum IndexKind {
    Linear,
    Grid { cell_deg: f64 },
}

impl Default for IndexKind {
    fn default() -> Self {
        IndexKind::Linear
    }
}

impl fmt::Display for IndexKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexKind::Linear => f.write_str("linear"),
            IndexKind::Grid { .. } => f.write_str("grid"),
        }
    }
}

impl FromStr for IndexKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "linear" => Ok(IndexKind::Linear),
            "grid" => Ok(IndexKind::Grid {
                cell_deg: DEFAULT_CELL_DEG,
            }),
            other => Err(Error::Config(format!(
                "unknown spatial index {other:?} (expected linear or grid)"
            ))),
        }
    }
}
