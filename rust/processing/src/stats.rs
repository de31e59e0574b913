// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Height statistics for run summaries

use oview_lite_core::{BuildingRecord, BUILD_HEIGHT};
use serde::Serialize;

/// Summary over records with a parsable `BUILD_H`
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct HeightStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    /// Upper median for even counts
    pub median: f64,
}

impl HeightStats {
    /// `None` when no record carries a numeric height
    pub fn from_records(records: &[BuildingRecord]) -> Option<Self> {
        let mut heights: Vec<f64> = records
            .iter()
            .filter_map(|r| r.number(BUILD_HEIGHT))
            .collect();
        if heights.is_empty() {
            return None;
        }
        heights.sort_by(f64::total_cmp);

        let count = heights.len();
        Some(Self {
            count,
            min: heights[0],
            max: heights[count - 1],
            mean: heights.iter().sum::<f64>() / count as f64,
            median: heights[count / 2],
        })
    }
}

/// Up to `n` records with the greatest height, tallest first.
/// Records without a height count as `0.0`; equal heights keep input order.
pub fn tallest(records: &[BuildingRecord], n: usize) -> Vec<&BuildingRecord> {
    let mut sorted: Vec<&BuildingRecord> = records.iter().collect();
    sorted.sort_by(|a, b| b.height().total_cmp(&a.height()));
    sorted.truncate(n);
    sorted
}
