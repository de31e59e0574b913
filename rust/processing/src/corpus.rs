// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Tile corpus enumeration
//!
//! A corpus is a directory tree of `L{level}/R{row}_C{col}.bin` files.
//! Deduplication is order-sensitive, so the visiting order is an explicit
//! [`TraversalOrder`] and never the filesystem's listing order.

use crate::error::{Error, Result};
use oview_lite_core::TileKey;
use std::cmp::Reverse;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use walkdir::WalkDir;

/// Layer descriptor sitting beside the level directories
pub const LAYER_FILE: &str = "LAYER.bin";

/// Order in which tiles are visited
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum TraversalOrder {
    /// Coarsest level first, then row, then column
    #[default]
    LevelAscending,
    /// Finest level first, then row, then column
    LevelDescending,
    /// Lexicographic relative path
    Path,
}

impl fmt::Display for TraversalOrder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            TraversalOrder::LevelAscending => "level-asc",
            TraversalOrder::LevelDescending => "level-desc",
            TraversalOrder::Path => "path",
        })
    }
}

impl FromStr for TraversalOrder {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "level-asc" | "level" => Ok(TraversalOrder::LevelAscending),
            "level-desc" | "lod" => Ok(TraversalOrder::LevelDescending),
            "path" => Ok(TraversalOrder::Path),
            other => Err(Error::Config(format!(
                "unknown traversal order {other:?} (expected level-asc, level-desc or path)"
            ))),
        }
    }
}

/// One tile file in a corpus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TileEntry {
    pub key: TileKey,
    pub path: PathBuf,
    /// Path relative to the corpus root
    pub relative: PathBuf,
}

/// Parse `.../L{level}/R{row}_C{col}.bin`
pub fn parse_tile_path(path: &Path) -> Option<TileKey> {
    let file = path.file_name()?.to_str()?;
    let level_dir = path.parent()?.file_name()?.to_str()?;

    let stem = file.strip_suffix(".bin")?;
    let (row, col) = stem.strip_prefix('R')?.split_once("_C")?;
    let level = level_dir.strip_prefix('L')?;

    Some(TileKey::new(
        level.parse().ok()?,
        row.parse().ok()?,
        col.parse().ok()?,
    ))
}

/// All tile files found under a root directory
#[derive(Debug, Clone, Default)]
pub struct TileCorpus {
    root: PathBuf,
    entries: Vec<TileEntry>,
    ignored_files: usize,
    unreadable_entries: usize,
}

impl TileCorpus {
    /// Walk `root` for tile files. Files not following the naming
    /// convention are ignored and counted.
    pub fn scan(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref();
        if !root.is_dir() {
            return Err(Error::io(
                root,
                std::io::Error::new(std::io::ErrorKind::NotFound, "tile directory not found"),
            ));
        }

        let mut corpus = Self {
            root: root.to_path_buf(),
            ..Self::default()
        };

        for entry in WalkDir::new(root).sort_by_file_name() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    tracing::warn!(error = %err, "Skipping unreadable corpus entry");
                    corpus.unreadable_entries += 1;
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }

            let path = entry.path();
            let relative = path.strip_prefix(root).unwrap_or(path).to_path_buf();
            if path.file_name().is_some_and(|n| n == LAYER_FILE) {
                continue;
            }

            match parse_tile_path(&relative) {
                Some(key) => corpus.entries.push(TileEntry {
                    key,
                    path: path.to_path_buf(),
                    relative,
                }),
                None => {
                    tracing::trace!(path = %relative.display(), "Ignoring non-tile file");
                    corpus.ignored_files += 1;
                }
            }
        }

        tracing::debug!(
            root = %root.display(),
            tiles = corpus.entries.len(),
            ignored = corpus.ignored_files,
            "Scanned tile corpus"
        );
        Ok(corpus)
    }

    /// Build a corpus from already-known entries
    pub fn from_entries(root: impl Into<PathBuf>, entries: Vec<TileEntry>) -> Self {
        Self {
            root: root.into(),
            entries,
            ignored_files: 0,
            unreadable_entries: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn ignored_files(&self) -> usize {
        self.ignored_files
    }

    pub fn unreadable_entries(&self) -> usize {
        self.unreadable_entries
    }

    /// Entries in the requested visiting order
    pub fn ordered(&self, order: TraversalOrder) -> Vec<&TileEntry> {
        let mut entries: Vec<&TileEntry> = self.entries.iter().collect();
        match order {
            TraversalOrder::LevelAscending => entries.sort_by_key(|e| e.key),
            TraversalOrder::LevelDescending => {
                entries.sort_by_key(|e| (Reverse(e.key.level), e.key.row, e.key.col))
            }
            TraversalOrder::Path => entries.sort_by(|a, b| a.relative.cmp(&b.relative)),
        }
        entries
    }
}
