// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tile Decoder - one oview tile buffer in, header and buildings out
//!
//! Layout of the fixed prefix:
//!
//! ```text
//! 0    u32 level, u32 row, u32 col
//! 12   8 × (f64 x, f64 y, f64 z)   OBB corners, ECEF
//! 204  ... mesh, textures, attribute table (see locator)
//! ```
//!
//! Most tiles, especially non-leaf levels, stop after the header. A short
//! buffer simply yields fewer fields; decoding never fails.

use crate::error::{Error, Result};
use crate::geodesy::{EcefPoint, GeoBounds, Geodetic};
use crate::locator::{AttributeSectionLocator, LocateOutcome};
use crate::reader::ByteCursor;
use crate::record::{Attributes, TileKey};
use flate2::read::MultiGzDecoder;
use smallvec::SmallVec;
use std::borrow::Cow;
use std::io::Read;

#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};

/// Gzip member magic bytes
pub const GZIP_MAGIC: [u8; 2] = [0x1F, 0x8B];
/// Byte length of `(level, row, col)`
pub const HEADER_LEN: usize = 12;
/// Corners in an oriented bounding box
pub const OBB_CORNERS: usize = 8;
/// Byte length of one ECEF corner
pub const CORNER_LEN: usize = 24;

/// `(level, row, col)` as stored in the tile itself
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct TileHeader {
    pub level: u32,
    pub row: u32,
    pub col: u32,
}

impl TileHeader {
    #[inline]
    pub fn key(&self) -> TileKey {
        TileKey::new(self.level, self.row, self.col)
    }
}

/// One OBB corner with its WGS84 conversion (absent for an all-zero slot)
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct ObbCorner {
    pub ecef: EcefPoint,
    pub wgs84: Option<Geodetic>,
}

/// Everything recovered from one tile
#[derive(Debug, Clone)]
pub struct DecodedTile {
    /// Size of the buffer as received
    pub raw_size: usize,
    /// Size after gzip unwrapping (equal to `raw_size` otherwise)
    pub decompressed_size: usize,
    pub gzipped: bool,
    pub header: Option<TileHeader>,
    pub corners: SmallVec<[ObbCorner; OBB_CORNERS]>,
    /// Lon/lat extent of the converted corners
    pub bbox: Option<GeoBounds>,
    pub outcome: LocateOutcome,
    /// Declared attribute field names
    pub fields: Vec<String>,
    pub buildings: Vec<Attributes>,
}

impl DecodedTile {
    #[inline]
    pub fn key(&self) -> Option<TileKey> {
        self.header.map(|h| h.key())
    }

    #[inline]
    pub fn building_count(&self) -> usize {
        self.buildings.len()
    }
}

/// Decompress every gzip member in `raw`. Bytes after the last member that
/// do not form another member are an error.
pub fn gunzip(raw: &[u8]) -> Result<Vec<u8>> {
    let mut decoder = MultiGzDecoder::new(raw);
    let mut out = Vec::with_capacity(raw.len() * 4);
    decoder
        .read_to_end(&mut out)
        .map_err(|e| Error::Decompress(e.to_string()))?;
    Ok(out)
}

/// Gzip-unwrapped bytes when the magic is present and decompression works,
/// otherwise the input unchanged
pub fn maybe_decompress(raw: &[u8]) -> (Cow<'_, [u8]>, bool) {
    if !raw.starts_with(&GZIP_MAGIC) {
        return (Cow::Borrowed(raw), false);
    }
    match gunzip(raw) {
        Ok(data) => (Cow::Owned(data), true),
        Err(err) => {
            tracing::debug!(error = %err, size = raw.len(), "Gzip magic present but decompression failed, using raw bytes");
            (Cow::Borrowed(raw), false)
        }
    }
}

/// Read `(level, row, col)` when the buffer is long enough
pub fn read_header(buf: &[u8]) -> Option<TileHeader> {
    let mut cursor = ByteCursor::new(buf);
    Some(TileHeader {
        level: cursor.read_u32().ok()?,
        row: cursor.read_u32().ok()?,
        col: cursor.read_u32().ok()?,
    })
}

/// Read every complete OBB corner present, up to eight
pub fn read_corners(buf: &[u8]) -> SmallVec<[ObbCorner; OBB_CORNERS]> {
    let mut corners = SmallVec::new();
    let mut cursor = ByteCursor::at(buf, HEADER_LEN);
    for _ in 0..OBB_CORNERS {
        let Ok((x, y, z)) = cursor.read_f64x3() else {
            break;
        };
        let ecef = EcefPoint::new(x, y, z);
        let wgs84 = (!ecef.is_origin()).then(|| ecef.to_wgs84());
        corners.push(ObbCorner { ecef, wgs84 });
    }
    corners
}

/// Decodes tiles with a configurable attribute locator
#[derive(Debug, Default)]
pub struct TileDecoder {
    locator: AttributeSectionLocator,
}

impl TileDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_locator(locator: AttributeSectionLocator) -> Self {
        Self { locator }
    }

    pub fn locator(&self) -> &AttributeSectionLocator {
        &self.locator
    }

    /// Decode one tile buffer. Never fails: every shortfall degrades to
    /// missing fields or zero buildings.
    pub fn decode(&self, raw: &[u8]) -> DecodedTile {
        let (data, gzipped) = maybe_decompress(raw);
        let data = data.as_ref();

        let header = read_header(data);
        let corners = if header.is_some() {
            read_corners(data)
        } else {
            SmallVec::new()
        };
        let bbox = GeoBounds::from_points(corners.iter().filter_map(|c| c.wgs84).map(|g| g.lon_lat()));

        let extraction = self.locator.extract(data);

        DecodedTile {
            raw_size: raw.len(),
            decompressed_size: data.len(),
            gzipped,
            header,
            corners,
            bbox,
            outcome: extraction.outcome,
            fields: extraction.fields,
            buildings: extraction.records,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{gzip, SyntheticTile};
    use approx::assert_abs_diff_eq;

    fn hsinchu_corners() -> Vec<EcefPoint> {
        vec![
            EcefPoint::new(-2984077.6493919184, 4966339.205623732, 2658015.9112886474),
            EcefPoint::new(-2984500.0, 4966100.0, 2658300.0),
        ]
    }

    #[test]
    fn test_empty_buffer() {
        let tile = TileDecoder::new().decode(&[]);
        assert!(tile.header.is_none());
        assert!(tile.corners.is_empty());
        assert!(tile.bbox.is_none());
        assert!(tile.buildings.is_empty());
        assert_eq!(tile.outcome, LocateOutcome::NoMarker);
    }

    #[test]
    fn test_header_only() {
        let buf = SyntheticTile::new(14, 7016, 13704).to_bytes();
        let tile = TileDecoder::new().decode(&buf);
        assert_eq!(
            tile.header,
            Some(TileHeader {
                level: 14,
                row: 7016,
                col: 13704
            })
        );
        assert_eq!(tile.key(), Some(TileKey::new(14, 7016, 13704)));
        assert!(tile.corners.is_empty());
        assert_eq!(tile.building_count(), 0);
    }

    #[test]
    fn test_short_header() {
        let tile = TileDecoder::new().decode(&[1, 0, 0, 0, 2, 0, 0, 0, 3, 0, 0]);
        assert!(tile.header.is_none());
    }

    #[test]
    fn test_corners_and_bbox() {
        let buf = SyntheticTile::new(16, 1, 2)
            .with_corners(hsinchu_corners())
            .to_bytes();
        let tile = TileDecoder::new().decode(&buf);

        // Two real corners plus six zero-filled slots
        assert_eq!(tile.corners.len(), 8);
        assert_eq!(tile.corners.iter().filter(|c| c.wgs84.is_some()).count(), 2);

        let first = tile.corners[0].wgs84.unwrap();
        assert_abs_diff_eq!(first.lon, 121.0, epsilon = 1e-7);
        assert_abs_diff_eq!(first.lat, 24.79, epsilon = 1e-7);

        let bbox = tile.bbox.unwrap();
        assert!(bbox.lon_min <= 121.0 && bbox.lon_max >= 121.0);
        assert!(bbox.lat_max > bbox.lat_min);
    }

    #[test]
    fn test_partial_corner_block() {
        let mut buf = SyntheticTile::new(16, 1, 2)
            .with_corners(hsinchu_corners())
            .to_bytes();
        buf.truncate(HEADER_LEN + 2 * CORNER_LEN + 10);
        let tile = TileDecoder::new().decode(&buf);
        assert_eq!(tile.corners.len(), 2);
        assert!(tile.bbox.is_some());
    }

    #[test]
    fn test_gzip_transparent() {
        let plain = SyntheticTile::new(17, 5, 6)
            .with_corners(hsinchu_corners())
            .with_buildings(
                &["BUILD_ID", "BUILD_H", "C", "D", "E", "F", "G", "H", "I", "J"],
                &[&["X1", "12.5", "", "", "", "", "", "", "", ""]],
            )
            .to_bytes();
        let wrapped = gzip(&plain);

        let tile = TileDecoder::new().decode(&wrapped);
        assert!(tile.gzipped);
        assert_eq!(tile.raw_size, wrapped.len());
        assert_eq!(tile.decompressed_size, plain.len());
        assert_eq!(tile.key(), Some(TileKey::new(17, 5, 6)));
        assert_eq!(tile.building_count(), 1);
        assert_eq!(tile.buildings[0].get("BUILD_H").map(String::as_str), Some("12.5"));
    }

    #[test]
    fn test_gunzip_concatenated_members() {
        let mut raw = gzip(b"first ");
        raw.extend_from_slice(&gzip(b"second"));
        assert_eq!(gunzip(&raw).unwrap(), b"first second");
    }

    #[test]
    fn test_gzip_with_trailing_garbage_falls_back_to_raw() {
        let plain = SyntheticTile::new(17, 5, 6).to_bytes();
        let mut raw = gzip(&plain);
        raw.extend_from_slice(b"trailing junk bytes");
        assert!(gunzip(&raw).is_err());

        let tile = TileDecoder::new().decode(&raw);
        assert!(!tile.gzipped);
        assert_eq!(tile.decompressed_size, raw.len());
    }

    #[test]
    fn test_corrupt_gzip_falls_back_to_raw() {
        let mut buf = vec![0x1F, 0x8B, 0xFF, 0xFF];
        buf.extend_from_slice(&[0u8; 20]);
        let tile = TileDecoder::new().decode(&buf);
        assert!(!tile.gzipped);
        assert_eq!(tile.decompressed_size, buf.len());
        let header = tile.header.unwrap();
        assert_eq!(header.level, u32::from_le_bytes([0x1F, 0x8B, 0xFF, 0xFF]));
    }
}
