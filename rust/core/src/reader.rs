// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

//! Little-endian cursor over a tile buffer
//!
//! Thin wrapper over nom's binary number parsers. Every read is bounds
//! checked and reports the offending offset on failure.

use crate::error::{Error, Result};
use nom::multi::length_data;
use nom::number::complete::{le_f64, le_u32};
use nom::IResult;

type ParseResult<'a, T> = IResult<&'a [u8], T, nom::error::Error<&'a [u8]>>;

/// Read a little-endian `u32` at an absolute offset
#[inline]
pub fn u32_at(buf: &[u8], offset: usize) -> Result<u32> {
    ByteCursor::at(buf, offset).read_u32()
}

/// Forward-only cursor over a byte slice
#[derive(Debug, Clone)]
pub struct ByteCursor<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> ByteCursor<'a> {
    /// Create a cursor at the start of `buf`
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Create a cursor positioned at `pos`
    pub fn at(buf: &'a [u8], pos: usize) -> Self {
        Self { buf, pos }
    }

    /// Current absolute offset
    #[inline]
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the current offset
    #[inline]
    pub fn remaining(&self) -> usize {
        self.buf.len().saturating_sub(self.pos)
    }

    #[inline]
    pub fn read_u32(&mut self) -> Result<u32> {
        self.run(4, |input| le_u32(input))
    }

    #[inline]
    pub fn read_f64(&mut self) -> Result<f64> {
        self.run(8, |input| le_f64(input))
    }

    /// Read a `u32` length followed by that many bytes, decoded as UTF-8
    /// with replacement characters for invalid sequences.
    pub fn read_prefixed_str(&mut self) -> Result<String> {
        let bytes = self.run(4, |input| length_data(le_u32)(input))?;
        Ok(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Read three consecutive `f64` values
    pub fn read_f64x3(&mut self) -> Result<(f64, f64, f64)> {
        Ok((self.read_f64()?, self.read_f64()?, self.read_f64()?))
    }

    fn run<T>(
        &mut self,
        needed: usize,
        parser: impl FnOnce(&'a [u8]) -> ParseResult<'a, T>,
    ) -> Result<T> {
        let len = self.buf.len();
        let input = self
            .buf
            .get(self.pos..)
            .ok_or_else(|| Error::truncated(self.pos, needed, len))?;

        match parser(input) {
            Ok((rest, value)) => {
                self.pos = len - rest.len();
                Ok(value)
            }
            Err(_) => Err(Error::truncated(self.pos, needed, len)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_read_u32_and_f64() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&7u32.to_le_bytes());
        buf.extend_from_slice(&1.5f64.to_le_bytes());

        let mut cursor = ByteCursor::new(&buf);
        assert_eq!(cursor.read_u32().unwrap(), 7);
        assert_eq!(cursor.read_f64().unwrap(), 1.5);
        assert_eq!(cursor.remaining(), 0);
    }

    #[test]
    fn test_truncated_read_reports_offset() {
        let buf = [1u8, 2, 3];
        let err = u32_at(&buf, 0).unwrap_err();
        assert_eq!(err, Error::truncated(0, 4, 3));

        // Offset past the end is also a truncation, not a panic
        assert!(u32_at(&buf, 10).is_err());
    }

    #[test]
    fn test_prefixed_str_lenient_utf8() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&3u32.to_le_bytes());
        buf.extend_from_slice(&[b'a', 0xFF, b'b']);

        let mut cursor = ByteCursor::new(&buf);
        assert_eq!(cursor.read_prefixed_str().unwrap(), "a\u{FFFD}b");
        assert_eq!(cursor.position(), 7);
    }

    #[test]
    fn test_prefixed_str_short_payload() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&10u32.to_le_bytes());
        buf.extend_from_slice(b"abc");

        let mut cursor = ByteCursor::new(&buf);
        assert!(cursor.read_prefixed_str().is_err());
        // Failed reads leave the cursor where it was
        assert_eq!(cursor.position(), 0);
    }
}
