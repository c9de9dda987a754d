//! On-disk inverted index for time-series blocks.
//!
//! An index file maps label pairs to the series that carry them. It is
//! written once by [`IndexWriter`] from sorted symbols and sorted series, and
//! read through [`IndexReader`] over a memory map. Query-time set operations
//! on series references live in [`postings`]; [`MemPostings`] holds the same
//! mapping in memory before it is flushed.

pub mod cancel;
pub mod chunks;
pub mod encoding;
pub mod error;
pub mod format;
pub mod labels;
pub mod mem_postings;
pub mod mmap;
pub mod postings;
pub mod reader;
pub mod stats;
pub mod symbols;
pub mod writer;

pub use cancel::CancelToken;
pub use chunks::ChunkMeta;
pub use error::{Error, Result};
pub use format::Toc;
pub use labels::{Label, Labels};
pub use mem_postings::{all_postings_key, MemPostings};
pub use mmap::{ByteSlice, MmapFile};
pub use postings::{Postings, SeriesRef};
pub use reader::IndexReader;
pub use stats::{PostingsStats, Stat};
pub use symbols::SymbolTable;
pub use writer::{IndexWriter, Stage, WriterConfig};
