// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Geodetic conversions
//!
//! Converts the two coordinate systems found in oview tiles into WGS84
//! degrees:
//!
//! - ECEF corner points of a tile's oriented bounding box
//! - TWD97 / TM2 (EPSG:3826) building centroids stored as text attributes
//!
//! Both transforms are closed-form with a fixed amount of work so results
//! are bit-reproducible across runs and platforms.

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// WGS84 semi-major axis (m)
pub const WGS84_A: f64 = 6378137.0;
/// WGS84 flattening
pub const WGS84_F: f64 = 1.0 / 298.257223563;

/// GRS80 semi-major axis (m), used by TWD97
pub const GRS80_A: f64 = 6378137.0;
/// GRS80 flattening
pub const GRS80_F: f64 = 1.0 / 298.257222101;

/// TM2 central meridian (degrees east)
pub const TM2_CENTRAL_MERIDIAN: f64 = 121.0;
/// TM2 scale factor on the central meridian
pub const TM2_SCALE: f64 = 0.9999;
/// TM2 false easting (m)
pub const TM2_FALSE_EASTING: f64 = 250000.0;

/// Mean earth radius for haversine distances (m)
pub const EARTH_RADIUS_M: f64 = 6371000.0;

/// Latitude refinement passes in [`ecef_to_wgs84`]
const ECEF_ITERATIONS: usize = 10;

/// A longitude/latitude pair in WGS84 degrees
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct LonLat {
    pub lon: f64,
    pub lat: f64,
}

impl LonLat {
    #[inline]
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }

    /// Great-circle distance to `other` in meters
    #[inline]
    pub fn distance_m(&self, other: &LonLat) -> f64 {
        haversine_m(self.lon, self.lat, other.lon, other.lat)
    }

    /// Round both ordinates to `decimals` places
    pub fn rounded(&self, decimals: i32) -> Self {
        let factor = 10f64.powi(decimals);
        Self {
            lon: (self.lon * factor).round() / factor,
            lat: (self.lat * factor).round() / factor,
        }
    }
}

/// An Earth-Centered-Earth-Fixed point (m)
#[derive(Debug, Clone, Copy, PartialEq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct EcefPoint {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl EcefPoint {
    #[inline]
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    /// All three components are exactly zero (unused OBB slot)
    #[inline]
    pub fn is_origin(&self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    /// Convert to WGS84 geodetic coordinates
    #[inline]
    pub fn to_wgs84(&self) -> Geodetic {
        let (lon, lat, alt) = ecef_to_wgs84(self.x, self.y, self.z);
        Geodetic { lon, lat, alt }
    }
}

/// Geodetic position: degrees plus ellipsoidal height (m)
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct Geodetic {
    pub lon: f64,
    pub lat: f64,
    pub alt: f64,
}

impl Geodetic {
    #[inline]
    pub fn lon_lat(&self) -> LonLat {
        LonLat::new(self.lon, self.lat)
    }
}

/// Axis-aligned lon/lat rectangle, inclusive on all edges
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GeoBounds {
    pub lon_min: f64,
    pub lon_max: f64,
    pub lat_min: f64,
    pub lat_max: f64,
}

impl GeoBounds {
    pub fn new(lon_min: f64, lon_max: f64, lat_min: f64, lat_max: f64) -> Self {
        Self {
            lon_min,
            lon_max,
            lat_min,
            lat_max,
        }
    }

    /// Smallest bounds covering every point, or `None` for an empty input
    pub fn from_points<I: IntoIterator<Item = LonLat>>(points: I) -> Option<Self> {
        let mut iter = points.into_iter();
        let first = iter.next()?;
        let mut bounds = Self::new(first.lon, first.lon, first.lat, first.lat);
        for p in iter {
            bounds.lon_min = bounds.lon_min.min(p.lon);
            bounds.lon_max = bounds.lon_max.max(p.lon);
            bounds.lat_min = bounds.lat_min.min(p.lat);
            bounds.lat_max = bounds.lat_max.max(p.lat);
        }
        Some(bounds)
    }

    #[inline]
    pub fn contains(&self, p: LonLat) -> bool {
        self.lon_min <= p.lon && p.lon <= self.lon_max && self.lat_min <= p.lat && p.lat <= self.lat_max
    }
}

/// Convert ECEF (m) to WGS84 `(lon, lat, alt)` in degrees and meters.
///
/// Latitude is refined with exactly ten fixed-point passes; there is no
/// convergence test. Altitude uses the prime-vertical radius from the last
/// pass.
pub fn ecef_to_wgs84(x: f64, y: f64, z: f64) -> (f64, f64, f64) {
    let e2 = 2.0 * WGS84_F - WGS84_F * WGS84_F;
    let lon = y.atan2(x);
    let p = (x * x + y * y).sqrt();

    let mut lat = z.atan2(p * (1.0 - e2));
    let mut n = WGS84_A;
    for _ in 0..ECEF_ITERATIONS {
        let sin_lat = lat.sin();
        n = WGS84_A / (1.0 - e2 * sin_lat * sin_lat).sqrt();
        lat = (z + e2 * n * sin_lat).atan2(p);
    }
    let alt = p / lat.cos() - n;

    (lon.to_degrees(), lat.to_degrees(), alt)
}

/// Which footpoint-latitude denominator the TM2 inverse uses.
///
/// Both share the same truncated series. `Legacy` keeps the coefficients
/// behind previously exported building datasets, which sit roughly 11 m
/// north of their true position.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub enum Tm2Series {
    /// Rectifying radius `a(1 - e²/4 - 3e⁴/64 - 5e⁶/256)`
    #[default]
    Standard,
    /// `a(1 - f(2+f)/4 - 3f²(1+f)/64)`
    Legacy,
}

/// Inverse TM2 (TWD97, EPSG:3826): easting/northing (m) to `(lon, lat)` degrees
#[inline]
pub fn tm2_to_wgs84(easting: f64, northing: f64) -> (f64, f64) {
    tm2_to_wgs84_with(Tm2Series::Standard, easting, northing)
}

/// Inverse TM2 with an explicit footpoint series variant
pub fn tm2_to_wgs84_with(series: Tm2Series, easting: f64, northing: f64) -> (f64, f64) {
    let a = GRS80_A;
    let f = GRS80_F;
    let k0 = TM2_SCALE;
    let e2 = 2.0 * f - f * f;
    let ep2 = e2 / (1.0 - e2);

    let x = easting - TM2_FALSE_EASTING;
    let y = northing;

    let m = y / k0;
    let rectifying = match series {
        Tm2Series::Standard => {
            1.0 - e2 / 4.0 - 3.0 * e2 * e2 / 64.0 - 5.0 * e2 * e2 * e2 / 256.0
        }
        Tm2Series::Legacy => 1.0 - f / 4.0 * (2.0 + f) - 3.0 / 64.0 * f * f * (1.0 + f),
    };
    let mu = m / (a * rectifying);

    let sqrt_1me2 = (1.0 - e2).sqrt();
    let e1 = (1.0 - sqrt_1me2) / (1.0 + sqrt_1me2);

    // Footpoint latitude
    let phi1 = mu
        + (3.0 * e1 / 2.0 - 27.0 * e1.powi(3) / 32.0) * (2.0 * mu).sin()
        + (21.0 * e1.powi(2) / 16.0 - 55.0 * e1.powi(4) / 32.0) * (4.0 * mu).sin()
        + (151.0 * e1.powi(3) / 96.0) * (6.0 * mu).sin();

    let sin_phi1 = phi1.sin();
    let cos_phi1 = phi1.cos();
    let tan_phi1 = phi1.tan();
    let w = 1.0 - e2 * sin_phi1 * sin_phi1;

    let c1 = ep2 * cos_phi1 * cos_phi1;
    let t1 = tan_phi1 * tan_phi1;
    let n1 = a / w.sqrt();
    let r1 = a * (1.0 - e2) / w.powf(1.5);
    let d = x / (n1 * k0);

    let lat = phi1
        - (n1 * tan_phi1 / r1)
            * (d.powi(2) / 2.0
                - (5.0 + 3.0 * t1 + 10.0 * c1 - 4.0 * c1 * c1 - 9.0 * ep2) * d.powi(4) / 24.0);
    let lon = TM2_CENTRAL_MERIDIAN.to_radians()
        + (d - (1.0 + 2.0 * t1 + c1) * d.powi(3) / 6.0
            + (5.0 - 2.0 * c1 + 28.0 * t1 - 3.0 * c1 * c1 + 8.0 * ep2 + 24.0 * t1 * t1)
                * d.powi(5)
                / 120.0)
            / cos_phi1;

    (lon.to_degrees(), lat.to_degrees())
}

/// Haversine great-circle distance in meters
#[inline]
pub fn haversine_m(lon1: f64, lat1: f64, lon2: f64, lat2: f64) -> f64 {
    let dlat = (lat2 - lat1).to_radians();
    let dlon = (lon2 - lon1).to_radians();
    let h = (dlat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (dlon / 2.0).sin().powi(2);
    EARTH_RADIUS_M * 2.0 * h.sqrt().asin()
}
