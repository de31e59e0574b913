// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! # oview-lite Processing
//!
//! Corpus-level work on top of `oview-lite-core`: walking a tile tree,
//! keeping one record per `BUILD_ID`, and fusing those records with
//! footprint polygons into one GeoJSON inventory.
//!
//! ## Pipeline
//!
//! ```text
//! L{level}/R{row}_C{col}.bin ──TileCorpus──▶ TileDecoder ──▶ BuildingDeduplicator
//!                                                                  │
//!                       footprints.geojson ──FootprintCollection──▶ BuildingFusionEngine
//!                                                                  │
//!                                                   buildings_merged.geojson
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use oview_lite_processing::{Pipeline, PipelineConfig, write_outputs};
//!
//! let config = PipelineConfig::from_env();
//! let output = Pipeline::new(config.clone()).run()?;
//! write_outputs(&output, &config.output_dir)?;
//! ```

pub mod config;
pub mod corpus;
pub mod dedup;
pub mod error;
pub mod footprint;
pub mod fusion;
pub mod geojson;
pub mod pipeline;
pub mod spatial;
pub mod stats;

pub use config::PipelineConfig;
pub use corpus::{TileCorpus, TileEntry, TraversalOrder};
pub use dedup::{BuildingDeduplicator, DedupConfig, DedupStats};
pub use error::{Error, Result};
pub use footprint::{FootprintCollection, FootprintFeature, GeometryFailure};
pub use fusion::{BuildingFusionEngine, FusionConfig, FusionOutcome, FusionSummary, MatchPhase};
pub use geojson::{Feature, FeatureCollection, Geometry};
pub use pipeline::{write_outputs, BuildingInventory, Pipeline, PipelineOutput, PipelineReport};
pub use spatial::{FootprintIndex, GridIndex, IndexKind, LinearIndex, PreparedFootprint};
pub use stats::{tallest, HeightStats};
