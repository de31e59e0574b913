// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Attribute Section Locator
//!
//! oview tiles embed a self-describing, column-major attribute table at no
//! fixed offset. Its layout, working backwards from the first field name:
//!
//! ```text
//! u32 field_count
//! u32 building_count
//! field_count × u32      column byte lengths
//! field_count × u32      type codes (8 for text)
//! field_count × (u32 len, bytes)  field names, "BUILD_ID" first
//! 5-byte separator
//! field_count columns of building_count × (u32 len, bytes)
//! ```
//!
//! There is no header pointing at the table, so a [`LayoutStrategy`] finds
//! it by fingerprint. [`TypeCodeFingerprint`] is the only strategy known to
//! match current tiles; other format variants slot in beside it.

use crate::error::{Error, Result};
use crate::reader::{u32_at, ByteCursor};
use crate::record::{Attributes, MISSING_VALUE};

/// Literal first field name anchoring the search
pub const BUILD_ID_MARKER: &[u8] = b"BUILD_ID";

/// Type code carried by every textual field
pub const TEXT_TYPE_CODE: u32 = 8;

/// Field counts probed, most common first
pub const DEFAULT_FIELD_COUNTS: [usize; 5] = [20, 15, 25, 10, 30];

/// Upper bound (exclusive) on a plausible building count
pub const MAX_BUILDINGS: u32 = 10_000;

/// Uninterpreted bytes between the last field name and the column data
pub const DATA_SEPARATOR_LEN: usize = 5;

/// Structure of one tile's attribute table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttributeLayout {
    pub field_count: usize,
    pub building_count: usize,
    /// Offset of the `(field_count, building_count)` pair
    pub meta_offset: usize,
    pub field_lengths_offset: usize,
    pub type_codes_offset: usize,
    /// Offset of the first name's length prefix
    pub field_names_offset: usize,
    /// Start of the column data region
    pub data_offset: usize,
}

/// A way of finding the attribute table in a tile buffer
pub trait LayoutStrategy: Send + Sync {
    /// Short name for logs and outcomes
    fn name(&self) -> &'static str;

    /// Locate the table, or explain why it was not found
    fn locate(&self, buf: &[u8]) -> Result<AttributeLayout>;

    /// Locate the table, discarding the failure reason
    fn try_locate(&self, buf: &[u8]) -> Option<AttributeLayout> {
        self.locate(buf).ok()
    }
}

/// Finds the table by the run of text type codes ahead of `BUILD_ID`.
///
/// Only recognises tables whose fields all carry type code 8.
#[derive(Debug, Clone)]
pub struct TypeCodeFingerprint {
    candidates: Vec<usize>,
}

impl Default for TypeCodeFingerprint {
    fn default() -> Self {
        Self {
            candidates: DEFAULT_FIELD_COUNTS.to_vec(),
        }
    }
}

impl TypeCodeFingerprint {
    /// Probe the given field counts in order
    pub fn with_candidates(candidates: impl Into<Vec<usize>>) -> Self {
        Self {
            candidates: candidates.into(),
        }
    }

    pub fn candidates(&self) -> &[usize] {
        &self.candidates
    }

    fn all_text_type_codes(buf: &[u8], start: usize, count: usize) -> Result<bool> {
        let mut cursor = ByteCursor::at(buf, start);
        for _ in 0..count {
            if cursor.read_u32()? != TEXT_TYPE_CODE {
                return Ok(false);
            }
        }
        Ok(true)
    }
}

impl LayoutStrategy for TypeCodeFingerprint {
    fn name(&self) -> &'static str {
        "type-code-fingerprint"
    }

    fn locate(&self, buf: &[u8]) -> Result<AttributeLayout> {
        let marker = memchr::memmem::find(buf, BUILD_ID_MARKER).ok_or(Error::MarkerNotFound)?;

        let name_len_pos = marker
            .checked_sub(4)
            .ok_or_else(|| Error::truncated(0, 4, buf.len()))?;
        let name_len = u32_at(buf, name_len_pos)?;
        if name_len as usize != BUILD_ID_MARKER.len() {
            return Err(Error::NameLengthMismatch(name_len));
        }

        for &n in &self.candidates {
            let Some(type_codes_offset) = name_len_pos.checked_sub(n * 4) else {
                continue;
            };
            if !Self::all_text_type_codes(buf, type_codes_offset, n)? {
                continue;
            }

            let Some(meta_offset) = type_codes_offset
                .checked_sub(n * 4)
                .and_then(|o| o.checked_sub(8))
            else {
                continue;
            };
            let field_lengths_offset = meta_offset + 8;

            let field_count = u32_at(buf, meta_offset)?;
            let building_count = u32_at(buf, meta_offset + 4)?;
            if field_count as usize != n || building_count == 0 || building_count >= MAX_BUILDINGS {
                tracing::trace!(
                    candidate = n,
                    field_count,
                    building_count,
                    "Rejected field count candidate"
                );
                continue;
            }

            // Walk the names to find where the column data begins
            let mut cursor = ByteCursor::at(buf, name_len_pos);
            for _ in 0..n {
                cursor.read_prefixed_str()?;
            }

            return Ok(AttributeLayout {
                field_count: n,
                building_count: building_count as usize,
                meta_offset,
                field_lengths_offset,
                type_codes_offset,
                field_names_offset: name_len_pos,
                data_offset: cursor.position() + DATA_SEPARATOR_LEN,
            });
        }

        Err(Error::FingerprintRejected)
    }
}

/// Read the declared field names
pub fn read_field_names(buf: &[u8], layout: &AttributeLayout) -> Result<Vec<String>> {
    let mut cursor = ByteCursor::at(buf, layout.field_names_offset);
    (0..layout.field_count)
        .map(|_| cursor.read_prefixed_str())
        .collect()
}

/// Read the per-field column byte lengths
pub fn read_field_lengths(buf: &[u8], layout: &AttributeLayout) -> Result<Vec<usize>> {
    let mut cursor = ByteCursor::at(buf, layout.field_lengths_offset);
    (0..layout.field_count)
        .map(|_| cursor.read_u32().map(|v| v as usize))
        .collect()
}

/// Decode one column: `count` length-prefixed values confined to `buf[start..end]`.
///
/// An entry whose prefix or payload would cross `end` yields an empty value;
/// a payload overrun consumes only the prefix.
pub fn decode_column(buf: &[u8], start: usize, end: usize, count: usize) -> Vec<String> {
    let end = end.min(buf.len());
    let mut values = Vec::with_capacity(count);
    let mut pos = start;

    for _ in 0..count {
        if pos + 4 > end {
            values.push(String::new());
            continue;
        }
        // In bounds: pos + 4 <= end <= buf.len()
        let len = u32::from_le_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]]) as usize;
        pos += 4;

        match pos.checked_add(len) {
            Some(value_end) if len > 0 && value_end <= end => {
                values.push(String::from_utf8_lossy(&buf[pos..value_end]).into_owned());
                pos = value_end;
            }
            _ => values.push(String::new()),
        }
    }

    values
}

/// Decode all columns into one sparse attribute map per building.
///
/// Empty values and the `"NA"` placeholder are dropped. When a field name is
/// declared twice the later non-empty value wins.
pub fn decode_records(buf: &[u8], layout: &AttributeLayout) -> Result<(Vec<String>, Vec<Attributes>)> {
    let lengths = read_field_lengths(buf, layout)?;
    let names = read_field_names(buf, layout)?;
    let mut records = vec![Attributes::new(); layout.building_count];

    let mut field_offset = layout.data_offset;
    for (name, &len) in names.iter().zip(&lengths) {
        let field_end = field_offset.saturating_add(len);
        let column = decode_column(buf, field_offset, field_end, layout.building_count);

        for (record, value) in records.iter_mut().zip(column) {
            if !value.is_empty() && value != MISSING_VALUE {
                record.insert(name.clone(), value);
            }
        }
        field_offset = field_end;
    }

    Ok((names, records))
}

/// Why a tile did or did not yield an attribute table
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LocateOutcome {
    Found {
        strategy: &'static str,
        field_count: usize,
        building_count: usize,
    },
    NoMarker,
    BadNameLength,
    FingerprintRejected,
    Malformed,
}

impl LocateOutcome {
    #[inline]
    pub fn is_found(&self) -> bool {
        matches!(self, LocateOutcome::Found { .. })
    }

    fn from_error(err: &Error) -> Self {
        match err {
            Error::MarkerNotFound => LocateOutcome::NoMarker,
            Error::NameLengthMismatch(_) => LocateOutcome::BadNameLength,
            Error::FingerprintRejected => LocateOutcome::FingerprintRejected,
            Error::Truncated { .. } | Error::Decompress(_) => LocateOutcome::Malformed,
        }
    }
}

/// Result of running the locator over one buffer
#[derive(Debug, Clone)]
pub struct Extraction {
    pub outcome: LocateOutcome,
    /// Declared field names, empty when nothing was found
    pub fields: Vec<String>,
    pub records: Vec<Attributes>,
}

impl Extraction {
    fn empty(outcome: LocateOutcome) -> Self {
        Self {
            outcome,
            fields: Vec::new(),
            records: Vec::new(),
        }
    }
}

/// Tries each strategy in order and decodes the first table found
pub struct AttributeSectionLocator {
    strategies: Vec<Box<dyn LayoutStrategy>>,
}

impl Default for AttributeSectionLocator {
    fn default() -> Self {
        Self {
            strategies: vec![Box::new(TypeCodeFingerprint::default())],
        }
    }
}

impl std::fmt::Debug for AttributeSectionLocator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.strategies.iter().map(|s| s.name()).collect();
        f.debug_struct("AttributeSectionLocator")
            .field("strategies", &names)
            .finish()
    }
}

impl AttributeSectionLocator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Locator with no strategies; add them with [`Self::with_strategy`]
    pub fn empty() -> Self {
        Self {
            strategies: Vec::new(),
        }
    }

    /// Append a strategy, tried after the existing ones
    pub fn with_strategy(mut self, strategy: impl LayoutStrategy + 'static) -> Self {
        self.strategies.push(Box::new(strategy));
        self
    }

    /// First layout any strategy finds, with that strategy's name
    pub fn locate(&self, buf: &[u8]) -> std::result::Result<(&'static str, AttributeLayout), LocateOutcome> {
        let mut first_failure = None;
        for strategy in &self.strategies {
            match strategy.locate(buf) {
                Ok(layout) => return Ok((strategy.name(), layout)),
                Err(err) => {
                    tracing::trace!(strategy = strategy.name(), error = %err, "Layout not found");
                    first_failure.get_or_insert(LocateOutcome::from_error(&err));
                }
            }
        }
        Err(first_failure.unwrap_or(LocateOutcome::NoMarker))
    }

    /// Locate and decode the attribute table. Never fails: structural
    /// problems produce an empty extraction with the reason attached.
    pub fn extract(&self, buf: &[u8]) -> Extraction {
        let (strategy, layout) = match self.locate(buf) {
            Ok(found) => found,
            Err(outcome) => return Extraction::empty(outcome),
        };

        match decode_records(buf, &layout) {
            Ok((fields, records)) => Extraction {
                outcome: LocateOutcome::Found {
                    strategy,
                    field_count: layout.field_count,
                    building_count: layout.building_count,
                },
                fields,
                records,
            },
            Err(err) => {
                tracing::debug!(strategy, error = %err, "Attribute table unreadable");
                Extraction::empty(LocateOutcome::Malformed)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{encode_column, SyntheticTile};

    fn standard_fields(n: usize) -> Vec<String> {
        let mut fields = vec!["BUILD_ID".to_string()];
        fields.extend((1..n).map(|i| format!("FIELD_{i:02}")));
        fields
    }

    fn standard_rows(fields: &[String], buildings: usize) -> Vec<Vec<String>> {
        (0..buildings)
            .map(|b| {
                fields
                    .iter()
                    .enumerate()
                    .map(|(f, _)| {
                        if f == 0 {
                            format!("B{b:05}")
                        } else {
                            format!("v{b}-{f}")
                        }
                    })
                    .collect()
            })
            .collect()
    }

    #[test]
    fn test_no_marker_yields_nothing() {
        let buf = vec![8u8; 4096];
        let extraction = AttributeSectionLocator::default().extract(&buf);
        assert_eq!(extraction.outcome, LocateOutcome::NoMarker);
        assert!(extraction.records.is_empty());
    }

    #[test]
    fn test_marker_at_buffer_start() {
        let extraction = AttributeSectionLocator::default().extract(b"BUILD_ID and nothing else");
        assert_eq!(extraction.outcome, LocateOutcome::Malformed);
        assert!(extraction.records.is_empty());
    }

    #[test]
    fn test_wrong_name_length() {
        let mut buf = vec![0u8; 64];
        buf.extend_from_slice(&9u32.to_le_bytes());
        buf.extend_from_slice(b"BUILD_ID");
        let extraction = AttributeSectionLocator::default().extract(&buf);
        assert_eq!(extraction.outcome, LocateOutcome::BadNameLength);
    }

    #[test]
    fn test_recovers_twenty_field_table() {
        let fields = standard_fields(20);
        let rows = standard_rows(&fields, 37);
        let buf = SyntheticTile::new(16, 3, 4)
            .with_prelude(vec![0xAB; 300])
            .with_table(fields.clone(), rows.clone())
            .to_bytes();

        let extraction = AttributeSectionLocator::default().extract(&buf);
        assert_eq!(
            extraction.outcome,
            LocateOutcome::Found {
                strategy: "type-code-fingerprint",
                field_count: 20,
                building_count: 37
            }
        );
        assert_eq!(extraction.fields, fields);
        assert_eq!(extraction.records.len(), 37);
        for (record, row) in extraction.records.iter().zip(&rows) {
            assert_eq!(record.len(), 20);
            for (name, value) in fields.iter().zip(row) {
                assert_eq!(record.get(name), Some(value));
            }
        }
    }

    #[test]
    fn test_recovers_each_candidate_count() {
        for n in DEFAULT_FIELD_COUNTS {
            let fields = standard_fields(n);
            let rows = standard_rows(&fields, 3);
            let buf = SyntheticTile::new(15, 1, 1)
                .with_table(fields, rows)
                .to_bytes();

            let layout = TypeCodeFingerprint::default().try_locate(&buf).unwrap();
            assert_eq!(layout.field_count, n);
            assert_eq!(layout.building_count, 3);
        }
    }

    #[test]
    fn test_unlisted_field_count_rejected() {
        let fields = standard_fields(12);
        let rows = standard_rows(&fields, 2);
        let buf = SyntheticTile::new(15, 1, 1).with_table(fields, rows).to_bytes();

        let extraction = AttributeSectionLocator::default().extract(&buf);
        assert_eq!(extraction.outcome, LocateOutcome::FingerprintRejected);

        // The same table is found once 12 is a candidate
        let locator = AttributeSectionLocator::empty()
            .with_strategy(TypeCodeFingerprint::with_candidates(vec![12]));
        assert_eq!(locator.extract(&buf).records.len(), 2);
    }

    #[test]
    fn test_non_text_type_code_rejected() {
        let fields = standard_fields(20);
        let rows = standard_rows(&fields, 2);
        let buf = SyntheticTile::new(15, 1, 1)
            .with_table(fields, rows)
            .with_type_code(7)
            .to_bytes();
        let extraction = AttributeSectionLocator::default().extract(&buf);
        assert_eq!(extraction.outcome, LocateOutcome::FingerprintRejected);
    }

    #[test]
    fn test_building_count_sanity_bound() {
        let fields = standard_fields(10);
        let rows = standard_rows(&fields, 1);
        let mut buf = SyntheticTile::new(15, 1, 1).with_table(fields, rows).to_bytes();

        let layout = TypeCodeFingerprint::default().try_locate(&buf).unwrap();
        buf[layout.meta_offset + 4..layout.meta_offset + 8]
            .copy_from_slice(&MAX_BUILDINGS.to_le_bytes());
        assert!(TypeCodeFingerprint::default().try_locate(&buf).is_none());

        buf[layout.meta_offset + 4..layout.meta_offset + 8].copy_from_slice(&0u32.to_le_bytes());
        assert!(TypeCodeFingerprint::default().try_locate(&buf).is_none());
    }

    #[test]
    fn test_empty_and_placeholder_values_dropped() {
        let fields = standard_fields(10);
        let mut rows = standard_rows(&fields, 2);
        rows[0][3] = String::new();
        rows[1][4] = "NA".to_string();
        let buf = SyntheticTile::new(15, 1, 1).with_table(fields, rows).to_bytes();

        let extraction = AttributeSectionLocator::default().extract(&buf);
        assert_eq!(extraction.records[0].len(), 9);
        assert!(!extraction.records[0].contains_key("FIELD_03"));
        assert_eq!(extraction.records[1].len(), 9);
        assert!(!extraction.records[1].contains_key("FIELD_04"));
    }

    #[test]
    fn test_column_overrun_truncates_to_empty() {
        // Second entry claims 100 bytes but the span ends first
        let mut column = encode_column(&["abc".to_string()]);
        column.extend_from_slice(&100u32.to_le_bytes());
        column.extend_from_slice(b"xy");
        let end = column.len();
        column.extend_from_slice(&[0u8; 200]);

        let values = decode_column(&column, 0, end, 3);
        assert_eq!(values, vec!["abc".to_string(), String::new(), String::new()]);
    }

    #[test]
    fn test_column_invalid_utf8_is_replaced() {
        let mut column = Vec::new();
        column.extend_from_slice(&4u32.to_le_bytes());
        column.extend_from_slice(&[b'R', b'C', 0xFF, 0xFE]);
        column.extend_from_slice(&encode_column(&["ok".to_string()]));

        let values = decode_column(&column, 0, column.len(), 2);
        assert_eq!(values, vec!["RC\u{FFFD}\u{FFFD}", "ok"]);
    }

    #[test]
    fn test_column_span_past_buffer_end() {
        let column = encode_column(&["abc".to_string(), "defg".to_string()]);
        let values = decode_column(&column, 0, usize::MAX, 3);
        assert_eq!(values, vec!["abc", "defg", ""]);
    }

    #[test]
    fn test_truncated_table_is_not_an_error() {
        let fields = standard_fields(20);
        let rows = standard_rows(&fields, 5);
        let buf = SyntheticTile::new(15, 1, 1).with_table(fields, rows).to_bytes();

        // Cut through the column data: still found, later values empty
        let layout = TypeCodeFingerprint::default().try_locate(&buf).unwrap();
        let cut = &buf[..layout.data_offset + 40];
        let extraction = AttributeSectionLocator::default().extract(cut);
        assert!(extraction.outcome.is_found());
        assert_eq!(extraction.records.len(), 5);
        assert_eq!(extraction.records[0].get("BUILD_ID").map(String::as_str), Some("B00000"));
        assert!(extraction.records[4].is_empty());

        // Cut through the field names: structural failure
        let cut = &buf[..layout.field_names_offset + 30];
        let extraction = AttributeSectionLocator::default().extract(cut);
        assert_eq!(extraction.outcome, LocateOutcome::Malformed);
    }

    #[test]
    fn test_duplicate_field_name_last_column_wins() {
        let mut fields = standard_fields(10);
        fields[5] = "FIELD_01".to_string();
        let mut rows = standard_rows(&fields, 1);
        rows[0][1] = "first".to_string();
        rows[0][5] = "second".to_string();
        let buf = SyntheticTile::new(15, 1, 1).with_table(fields, rows).to_bytes();

        let record = &AttributeSectionLocator::default().extract(&buf).records[0];
        assert_eq!(record.get("FIELD_01").map(String::as_str), Some("second"));
    }

    struct Fixed(AttributeLayout);

    impl LayoutStrategy for Fixed {
        fn name(&self) -> &'static str {
            "fixed"
        }
        fn locate(&self, _buf: &[u8]) -> Result<AttributeLayout> {
            Ok(self.0.clone())
        }
    }

    #[test]
    fn test_fallback_strategy_used_after_primary_fails() {
        let fields = standard_fields(12);
        let rows = standard_rows(&fields, 2);
        let buf = SyntheticTile::new(15, 1, 1).with_table(fields, rows).to_bytes();
        let layout = TypeCodeFingerprint::with_candidates(vec![12])
            .try_locate(&buf)
            .unwrap();

        let locator = AttributeSectionLocator::default().with_strategy(Fixed(layout));
        let extraction = locator.extract(&buf);
        assert!(matches!(
            extraction.outcome,
            LocateOutcome::Found { strategy: "fixed", .. }
        ));
        assert_eq!(extraction.records.len(), 2);
    }
}
