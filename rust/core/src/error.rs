// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Error types for tile decoding.
//!
//! None of these escape a tile boundary: [`crate::TileDecoder`] turns them
//! into an empty building list and records why in [`crate::LocateOutcome`].

use thiserror::Error;

/// Result type for core decoding operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while walking a tile buffer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("buffer truncated: need {needed} bytes at offset {offset}, buffer is {len} bytes")]
    Truncated {
        offset: usize,
        needed: usize,
        len: usize,
    },

    #[error("gzip decompression failed: {0}")]
    Decompress(String),

    #[error("BUILD_ID marker not found")]
    MarkerNotFound,

    #[error("name length before BUILD_ID marker is {0}, expected 8")]
    NameLengthMismatch(u32),

    #[error("no candidate field count matched the type-code fingerprint")]
    FingerprintRejected,
}

impl Error {
    /// Build a truncation error for a read of `needed` bytes at `offset`
    #[inline]
    pub fn truncated(offset: usize, needed: usize, len: usize) -> Self {
        Error::Truncated {
            offset,
            needed,
            len,
        }
    }
}
