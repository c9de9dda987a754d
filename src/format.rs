//! Index file layout.
//!
//! ```text
//! ┌────────────────────────────────────────────┐
//! │ magic (BE32 0xBAAAD700) │ version (u8)     │
//! ├────────────────────────────────────────────┤
//! │ Symbols                                    │
//! │ Series (16-byte aligned records)           │
//! │ LabelIndices (deprecated value lists)      │
//! │ Postings (4-byte aligned lists)            │
//! │ LabelIndicesTable                          │
//! │ PostingsTable                              │
//! ├────────────────────────────────────────────┤
//! │ TOC: 6 x BE64 section offsets │ CRC32      │
//! └────────────────────────────────────────────┘
//! ```

use crate::encoding::{crc32, Decbuf, Encbuf, CRC_LEN};
use crate::{Error, Result};

pub const MAGIC_INDEX: u32 = 0xBAAA_D700;
pub const HEADER_LEN: usize = 5;

pub const FORMAT_V1: u8 = 1;
pub const FORMAT_V2: u8 = 2;

/// Series records start on this boundary; a v2 series reference is `offset / 16`.
pub const SERIES_ALIGN: u64 = 16;
/// Postings lists and label index entries start on this boundary.
pub const POSTINGS_ALIGN: u64 = 4;

/// 4-byte series references over 16-byte alignment cap the file at 64 GiB.
pub const MAX_INDEX_SIZE: u64 = SERIES_ALIGN * u32::MAX as u64;

pub const TOC_LEN: usize = 6 * 8 + CRC_LEN;

/// Reserved label pair whose postings list holds every series.
pub const ALL_POSTINGS_NAME: &str = "";
pub const ALL_POSTINGS_VALUE: &str = "";

/// Start offsets of each section, in TOC encoding order.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Toc {
    pub symbols: u64,
    pub series: u64,
    pub label_indices: u64,
    pub label_indices_table: u64,
    pub postings: u64,
    pub postings_table: u64,
}

impl Toc {
    /// Parses the trailing TOC of an index file.
    pub fn decode(bs: &[u8]) -> Result<Self> {
        if bs.len() < TOC_LEN {
            return Err(Error::corrupt("file too small for table of contents"));
        }
        let b = &bs[bs.len() - TOC_LEN..];
        let (body, sum) = b.split_at(TOC_LEN - CRC_LEN);
        let expected = crate::encoding::be32(sum);
        let actual = crc32(body);
        if expected != actual {
            return Err(Error::ChecksumMismatch { expected, actual });
        }

        let mut d = Decbuf::new(body);
        Ok(Self {
            symbols: d.be64()?,
            series: d.be64()?,
            label_indices: d.be64()?,
            label_indices_table: d.be64()?,
            postings: d.be64()?,
            postings_table: d.be64()?,
        })
    }

    pub fn encode(&self, buf: &mut Encbuf) {
        buf.reset();
        buf.put_be64(self.symbols);
        buf.put_be64(self.series);
        buf.put_be64(self.label_indices);
        buf.put_be64(self.label_indices_table);
        buf.put_be64(self.postings);
        buf.put_be64(self.postings_table);
        buf.put_hash();
    }
}
