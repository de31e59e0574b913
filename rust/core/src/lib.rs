// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # oview-lite Core
//!
//! Decoder for PilotGaea "oview" 3D building tiles, the undocumented binary
//! format served by the NLSC 3D maps backend, plus the geodetic transforms
//! needed to place what it contains on a WGS84 map.
//!
//! ## Overview
//!
//! - **Geodesy**: ECEF → WGS84 and TWD97/TM2 → WGS84, closed form and
//!   bit-reproducible
//! - **Tile decoding**: gzip unwrapping, `(level, row, col)` header, OBB
//!   corners and their lon/lat extent
//! - **Attribute location**: signature-driven discovery of the
//!   variable-offset, column-major attribute table
//!
//! Nothing here performs I/O and nothing here fails on bad input: a
//! malformed tile decodes to zero buildings with the reason attached.
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use oview_lite_core::{TileDecoder, tm2_to_wgs84};
//!
//! let tile = TileDecoder::new().decode(&bytes);
//! for building in &tile.buildings {
//!     println!("{:?} in {:?}", building.get("BUILD_ID"), tile.key());
//! }
//!
//! let (lon, lat) = tm2_to_wgs84(249696.66, 2742185.64);
//! ```
//!
//! ## Feature Flags
//!
//! - `serde`: Serialization for records, tile keys and geodetic types
//! - `test-support`: Exposes [`testing`] to other crates' tests

pub mod error;
pub mod geodesy;
pub mod locator;
pub mod reader;
pub mod record;
pub mod tile;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

pub use error::{Error, Result};
pub use geodesy::{
    ecef_to_wgs84, haversine_m, tm2_to_wgs84, tm2_to_wgs84_with, EcefPoint, GeoBounds, Geodetic,
    LonLat, Tm2Series,
};
pub use locator::{
    AttributeLayout, AttributeSectionLocator, Extraction, LayoutStrategy, LocateOutcome,
    TypeCodeFingerprint,
};
pub use record::{parse_number, Attributes, BuildingRecord, TileKey, BUILD_HEIGHT, BUILD_ID};
pub use tile::{DecodedTile, ObbCorner, TileDecoder, TileHeader};
