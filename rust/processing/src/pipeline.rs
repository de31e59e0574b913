// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! End-to-end run: tile corpus → unique records → fused inventory.
//!
//! Tiles that cannot be read or decoded are counted and skipped. Only
//! whole-input problems (missing tile root, unreadable footprint file,
//! unwritable output) are errors.

use crate::config::PipelineConfig;
use crate::corpus::TileCorpus;
use crate::dedup::{BuildingDeduplicator, DedupStats};
use crate::error::{Error, Result};
use crate::footprint::FootprintCollection;
use crate::fusion::{BuildingFusionEngine, FusionOutcome, FusionSummary};
use crate::geojson::{records_to_points, FeatureCollection};
use crate::stats::HeightStats;
use oview_lite_core::{BuildingRecord, LocateOutcome, TileDecoder};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Deduplicated attribute dump
pub const ATTRIBUTES_FILE: &str = "buildings.json";
/// Point layer of every geo-referenced record
pub const POINTS_FILE: &str = "buildings_points.geojson";
/// Fused polygons plus unmatched in-area points
pub const MERGED_FILE: &str = "buildings_merged.geojson";

/// Per-tile outcomes over a corpus
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CorpusReport {
    pub tiles_found: usize,
    pub ignored_files: usize,
    pub unreadable_entries: usize,
    pub unreadable_tiles: usize,
    pub gzipped_tiles: usize,
    pub headerless_tiles: usize,
    pub tiles_with_table: usize,
    pub no_marker: usize,
    pub bad_name_length: usize,
    pub fingerprint_rejected: usize,
    pub malformed: usize,
}

impl CorpusReport {
    fn record_outcome(&mut self, outcome: &LocateOutcome) {
        match outcome {
            LocateOutcome::Found { .. } => self.tiles_with_table += 1,
            LocateOutcome::NoMarker => self.no_marker += 1,
            LocateOutcome::BadNameLength => self.bad_name_length += 1,
            LocateOutcome::FingerprintRejected => self.fingerprint_rejected += 1,
            LocateOutcome::Malformed => self.malformed += 1,
        }
    }
}

/// Unique records recovered from a corpus
#[derive(Debug, Clone, Default)]
pub struct BuildingInventory {
    pub records: Vec<BuildingRecord>,
    pub corpus: CorpusReport,
    pub dedup: DedupStats,
}

impl BuildingInventory {
    /// The `buildings.json` document
    pub fn dump(&self) -> AttributeDump<'_> {
        AttributeDump {
            total_buildings: self.records.len(),
            tiles_processed: self.dedup.tiles_with_buildings,
            buildings: &self.records,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AttributeDump<'a> {
    pub total_buildings: usize,
    /// Tiles that contributed at least one attribute row
    pub tiles_processed: usize,
    pub buildings: &'a [BuildingRecord],
}

/// Every counter of a run
#[derive(Debug, Clone, Default, Serialize)]
pub struct PipelineReport {
    pub corpus: CorpusReport,
    pub dedup: DedupStats,
    pub fusion: Option<FusionSummary>,
    pub heights: Option<HeightStats>,
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub inventory: BuildingInventory,
    pub points: FeatureCollection,
    pub fusion: Option<FusionOutcome>,
    pub report: PipelineReport,
}

#[derive(Debug, Default)]
pub struct Pipeline {
    config: PipelineConfig,
    decoder: TileDecoder,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            decoder: TileDecoder::new(),
        }
    }

    pub fn with_decoder(mut self, decoder: TileDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Scan `tiles_dir` and deduplicate its buildings
    pub fn collect(&self, tiles_dir: &Path) -> Result<BuildingInventory> {
        let corpus = TileCorpus::scan(tiles_dir)?;
        Ok(self.collect_corpus(&corpus))
    }

    /// Decode every tile of `corpus` in the configured traversal order
    pub fn collect_corpus(&self, corpus: &TileCorpus) -> BuildingInventory {
        let mut report = CorpusReport {
            tiles_found: corpus.len(),
            ignored_files: corpus.ignored_files(),
            unreadable_entries: corpus.unreadable_entries(),
            ..CorpusReport::default()
        };
        let mut dedup = BuildingDeduplicator::new(self.config.dedup_config());

        let order = self.config.traversal;
        tracing::info!(tiles = corpus.len(), order = %order, "Decoding tile corpus");

        for entry in corpus.ordered(order) {
            let raw = match fs::read(&entry.path) {
                Ok(raw) => raw,
                Err(err) => {
                    tracing::warn!(path = %entry.path.display(), error = %err, "Skipping unreadable tile");
                    report.unreadable_tiles += 1;
                    continue;
                }
            };

            let tile = self.decoder.decode(&raw);
            if tile.gzipped {
                report.gzipped_tiles += 1;
            }
            if tile.header.is_none() {
                report.headerless_tiles += 1;
            }
            report.record_outcome(&tile.outcome);
            if let Some(header) = tile.key().filter(|k| *k != entry.key) {
                tracing::debug!(path = %entry.key, header = %header, "Tile header disagrees with its path");
            }

            let kept = dedup.ingest_tile(Some(entry.key), &tile);
            if tile.building_count() > 0 {
                tracing::debug!(
                    tile = %entry.key,
                    buildings = tile.building_count(),
                    new = kept,
                    "Decoded buildings"
                );
            }
        }

        let stats = dedup.stats();
        tracing::info!(
            unique = stats.unique_records,
            duplicates = stats.duplicates_discarded,
            without_position = stats.records_without_position,
            tiles_with_buildings = stats.tiles_with_buildings,
            "Deduplicated building records"
        );

        BuildingInventory {
            records: dedup.into_records(),
            corpus: report,
            dedup: stats,
        }
    }

    pub fn fuse(&self, records: &[BuildingRecord], footprints: &FootprintCollection) -> FusionOutcome {
        BuildingFusionEngine::new(self.config.fusion_config()).fuse(records, footprints, self.config.index)
    }

    /// Run with the configured inputs. Fusion is skipped when no footprint
    /// dataset is configured.
    pub fn run(&self) -> Result<PipelineOutput> {
        let tiles_dir = self
            .config
            .tiles_dir
            .as_deref()
            .ok_or_else(|| Error::Config("no tile directory configured".to_string()))?;

        let footprints = match &self.config.footprints {
            Some(path) => Some(FootprintCollection::from_path(path)?),
            None => {
                tracing::info!("No footprint dataset configured, skipping fusion");
                None
            }
        };

        let inventory = self.collect(tiles_dir)?;
        Ok(self.finish(inventory, footprints.as_ref()))
    }

    /// Build outputs and the report from an already collected inventory
    pub fn finish(&self, inventory: BuildingInventory, footprints: Option<&FootprintCollection>) -> PipelineOutput {
        let points = records_to_points(&inventory.records);
        let fusion = footprints.map(|f| self.fuse(&inventory.records, f));
        let report = PipelineReport {
            corpus: inventory.corpus,
            dedup: inventory.dedup,
            fusion: fusion.as_ref().map(|f| f.summary.clone()),
            heights: HeightStats::from_records(&inventory.records),
        };
        PipelineOutput {
            inventory,
            points,
            fusion,
            report,
        }
    }
}

/// Write the attribute dump, the point layer and, when fused, the merged
/// collection into `dir`. Returns the paths written.
pub fn write_outputs(output: &PipelineOutput, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;

    let mut written = Vec::with_capacity(3);
    let path = dir.join(ATTRIBUTES_FILE);
    write_json(&path, &output.inventory.dump())?;
    written.push(path);

    let path = dir.join(POINTS_FILE);
    write_json(&path, &output.points)?;
    written.push(path);

    if let Some(fusion) = &output.fusion {
        let path = dir.join(MERGED_FILE);
        write_json(&path, &fusion.collection)?;
        written.push(path);
    }
    Ok(written)
}

/// Pretty-printed JSON, UTF-8 kept unescaped
pub fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let file = File::create(path).map_err(|e| Error::io(path, e))?;
    let mut writer = BufWriter::new(file);
    serde_json::to_writer_pretty(&mut writer, value)?;
    writer.flush().map_err(|e| Error::io(path, e))?;
    tracing::debug!(path = %path.display(), "Wrote output");
    Ok(())
}
