// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! CLI tool: decode an oview tile tree, deduplicate its buildings and fuse
//! them with footprint polygons
//!
//! Usage:
//!   oview-fuse [tiles_dir] [footprints.geojson] [options]
//!
//! Positional arguments and options override the `OVIEW_*` environment.

use anyhow::{bail, Context, Result};
use oview_lite_processing::config::{parse_bounds, parse_distance};
use oview_lite_processing::{tallest, write_outputs, IndexKind, Pipeline, PipelineConfig, TraversalOrder};
use std::env;
use std::path::PathBuf;

/// Records listed in the closing summary
const TALLEST_SHOWN: usize = 10;

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            env::var("RUST_LOG").unwrap_or_else(|_| "info,oview_lite_processing=debug".into()),
        )
        .init();

    let args: Vec<String> = env::args().skip(1).collect();
    if args.iter().any(|a| a == "--help" || a == "-h") {
        print_usage();
        return Ok(());
    }

    let mut config = PipelineConfig::from_env();
    apply_args(&mut config, &args)?;

    let output = Pipeline::new(config.clone())
        .run()
        .context("pipeline failed")?;
    let written = write_outputs(&output, &config.output_dir)
        .with_context(|| format!("writing outputs to {}", config.output_dir.display()))?;

    for path in &written {
        tracing::info!(path = %path.display(), "Wrote");
    }

    let report = &output.report;
    tracing::info!(
        tiles = report.corpus.tiles_found,
        with_table = report.corpus.tiles_with_table,
        unreadable = report.corpus.unreadable_tiles,
        unique_buildings = report.dedup.unique_records,
        "Corpus summary"
    );
    if let Some(h) = &report.heights {
        tracing::info!(
            count = h.count,
            min = h.min,
            max = h.max,
            mean = %format_args!("{:.1}", h.mean),
            median = h.median,
            "Height statistics"
        );
    }
    for (rank, record) in tallest(&output.inventory.records, TALLEST_SHOWN).iter().enumerate() {
        tracing::info!(
            rank = rank + 1,
            id = record.id().unwrap_or("-"),
            height = record.height(),
            "Tallest"
        );
    }
    if let Some(fusion) = &report.fusion {
        tracing::info!(
            footprints = fusion.footprints,
            point_in_polygon = fusion.matched_point_in_polygon,
            nearest = fusion.matched_nearest,
            multi_match = fusion.multi_match,
            unmatched_in_area = fusion.unmatched_in_area,
            total_features = fusion.total_features,
            "Fusion summary"
        );
    }

    Ok(())
}

fn apply_args(config: &mut PipelineConfig, args: &[String]) -> Result<()> {
    let mut positional = Vec::new();
    let mut i = 0;
    while i < args.len() {
        let arg = args[i].as_str();
        match arg {
            "--output" => config.output_dir = PathBuf::from(next_value(args, &mut i)?),
            "--traversal" => config.traversal = next_value(args, &mut i)?.parse::<TraversalOrder>()?,
            "--index" => config.index = next_value(args, &mut i)?.parse::<IndexKind>()?,
            "--max-distance" => config.max_match_distance_m = parse_distance(next_value(args, &mut i)?)?,
            "--region" => config.region = Some(parse_bounds(next_value(args, &mut i)?)?),
            other if other.starts_with("--") => {
                print_usage();
                bail!("unknown option: {other}");
            }
            other => positional.push(PathBuf::from(other)),
        }
        i += 1;
    }

    let mut positional = positional.into_iter();
    if let Some(tiles) = positional.next() {
        config.tiles_dir = Some(tiles);
    }
    if let Some(footprints) = positional.next() {
        config.footprints = Some(footprints);
    }
    if positional.next().is_some() {
        bail!("too many positional arguments");
    }
    Ok(())
}

/// Value following the flag at `*i`
fn next_value<'a>(args: &'a [String], i: &mut usize) -> Result<&'a str> {
    let flag = &args[*i];
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .with_context(|| format!("{flag} needs a value"))
}

fn print_usage() {
    eprintln!("Usage: oview-fuse [tiles_dir] [footprints.geojson] [options]");
    eprintln!();
    eprintln!("Options:");
    eprintln!("  --output <dir>          Output directory (OVIEW_OUTPUT_DIR, default ./output)");
    eprintln!("  --traversal <order>     level-asc | level-desc | path (OVIEW_TRAVERSAL)");
    eprintln!("  --index <kind>          linear | grid (OVIEW_SPATIAL_INDEX)");
    eprintln!("  --max-distance <m>      Nearest-match threshold (OVIEW_MAX_MATCH_DISTANCE_M, default 30)");
    eprintln!("  --region <bounds>       lon_min,lon_max,lat_min,lat_max record filter (OVIEW_REGION)");
    eprintln!();
    eprintln!("Without a footprint dataset only buildings.json and buildings_points.geojson are written.");
}
