// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Synthetic oview tile builder for tests

use crate::geodesy::EcefPoint;
use crate::locator::TEXT_TYPE_CODE;
use flate2::write::GzEncoder;
use flate2::Compression;
use std::io::Write;

/// Separator written between the field names and the column data
pub const SEPARATOR: [u8; 5] = [0, 0, 0, 0, 0x37];

/// Encode one column as consecutive `(u32 len, bytes)` entries
pub fn encode_column(values: &[String]) -> Vec<u8> {
    let mut out = Vec::new();
    for v in values {
        out.extend_from_slice(&(v.len() as u32).to_le_bytes());
        out.extend_from_slice(v.as_bytes());
    }
    out
}

/// Gzip-wrap a buffer
pub fn gzip(data: &[u8]) -> Vec<u8> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data).expect("write to Vec");
    encoder.finish().expect("finish gzip")
}

/// Builder for a byte-exact tile
#[derive(Debug, Clone)]
pub struct SyntheticTile {
    pub level: u32,
    pub row: u32,
    pub col: u32,
    pub corners: Option<Vec<EcefPoint>>,
    pub prelude: Vec<u8>,
    pub fields: Vec<String>,
    /// One row per building, one value per field
    pub rows: Vec<Vec<String>>,
    pub type_code: u32,
}

impl SyntheticTile {
    pub fn new(level: u32, row: u32, col: u32) -> Self {
        Self {
            level,
            row,
            col,
            corners: None,
            prelude: Vec::new(),
            fields: Vec::new(),
            rows: Vec::new(),
            type_code: TEXT_TYPE_CODE,
        }
    }

    /// Write an OBB block; missing corners are zero-filled up to 8
    pub fn with_corners(mut self, corners: Vec<EcefPoint>) -> Self {
        self.corners = Some(corners);
        self
    }

    /// Opaque bytes standing in for mesh and texture data
    pub fn with_prelude(mut self, prelude: Vec<u8>) -> Self {
        self.prelude = prelude;
        self
    }

    pub fn with_table(mut self, fields: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        self.fields = fields;
        self.rows = rows;
        self
    }

    /// Convenience: table from `(field, value)` pairs per building
    pub fn with_buildings(self, fields: &[&str], buildings: &[&[&str]]) -> Self {
        let fields = fields.iter().map(|s| s.to_string()).collect();
        let rows = buildings
            .iter()
            .map(|row| row.iter().map(|s| s.to_string()).collect())
            .collect();
        self.with_table(fields, rows)
    }

    pub fn with_type_code(mut self, code: u32) -> Self {
        self.type_code = code;
        self
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::new();
        for v in [self.level, self.row, self.col] {
            out.extend_from_slice(&v.to_le_bytes());
        }

        if let Some(corners) = &self.corners {
            for i in 0..8 {
                let c = corners.get(i).copied().unwrap_or_default();
                for v in [c.x, c.y, c.z] {
                    out.extend_from_slice(&v.to_le_bytes());
                }
            }
        }

        out.extend_from_slice(&self.prelude);

        if self.fields.is_empty() {
            return out;
        }

        let columns: Vec<Vec<u8>> = (0..self.fields.len())
            .map(|f| {
                let values: Vec<String> = self
                    .rows
                    .iter()
                    .map(|row| row.get(f).cloned().unwrap_or_default())
                    .collect();
                encode_column(&values)
            })
            .collect();

        out.extend_from_slice(&(self.fields.len() as u32).to_le_bytes());
        out.extend_from_slice(&(self.rows.len() as u32).to_le_bytes());
        for column in &columns {
            out.extend_from_slice(&(column.len() as u32).to_le_bytes());
        }
        for _ in &self.fields {
            out.extend_from_slice(&self.type_code.to_le_bytes());
        }
        for name in &self.fields {
            out.extend_from_slice(&(name.len() as u32).to_le_bytes());
            out.extend_from_slice(name.as_bytes());
        }
        out.extend_from_slice(&SEPARATOR);
        for column in &columns {
            out.extend_from_slice(column);
        }
        out
    }
}
