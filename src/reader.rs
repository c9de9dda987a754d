use std::collections::HashMap;
use std::ops::Range;
use std::path::Path;

use log::{debug, info};

use crate::chunks::ChunkMeta;
use crate::encoding::{be32, Decbuf};
use crate::format::{
    Toc, ALL_POSTINGS_NAME, ALL_POSTINGS_VALUE, FORMAT_V1, FORMAT_V2, HEADER_LEN, MAGIC_INDEX,
};
use crate::labels::{Label, Labels};
use crate::mmap::{ByteSlice, MmapFile};
use crate::postings::{empty_postings, merge, BigEndianPostings, Postings};
use crate::symbols::{SymbolIter, SymbolTable};
use crate::{Error, Result};

/// Only every this many values per label name are kept from the postings
/// offset table; the first and last value always are.
const POSTINGS_OFFSET_FACTOR: usize = 32;

#[derive(Debug, Clone)]
struct PostingOffset {
    value: String,
    /// Entry position relative to the start of the offset table payload.
    off: usize,
}

/// Read access to one index file.
///
/// All state is loaded at open and never mutated afterwards, so a reader can
/// be shared between threads. Postings iterators borrow the underlying bytes.
pub struct IndexReader<B: ByteSlice = MmapFile> {
    b: B,
    toc: Toc,
    version: u8,
    symbols: SymbolTable,
    /// Sampled value offsets per label name (v2). Every name is present.
    postings: HashMap<String, Vec<PostingOffset>>,
    /// Full `name -> value -> postings offset` map (v1).
    postings_v1: HashMap<String, HashMap<String, u64>>,
    /// Label names make up half of all symbol lookups.
    name_symbols: HashMap<u32, String>,
}

impl IndexReader<MmapFile> {
    /// Maps the index file at `path` read-only.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let reader = Self::from_byte_slice(MmapFile::open(path)?)?;
        info!(
            "opened index {} (v{}, {} symbols, {} label names, {} bytes)",
            path.display(),
            reader.version,
            reader.symbols.len(),
            reader.postings.len(),
            reader.size()
        );
        Ok(reader)
    }
}

impl<B: ByteSlice> IndexReader<B> {
    pub fn from_byte_slice(b: B) -> Result<Self> {
        let bs = b.range(0, b.len());
        if bs.len() < HEADER_LEN {
            return Err(Error::corrupt("index header: invalid size"));
        }
        let magic = be32(bs);
        if magic != MAGIC_INDEX {
            return Err(Error::InvalidMagic(magic));
        }
        let version = bs[4];
        if version != FORMAT_V1 && version != FORMAT_V2 {
            return Err(Error::UnsupportedVersion(version));
        }

        let toc = Toc::decode(bs)?;
        let symbols = SymbolTable::new(bs, version, to_usize(toc.symbols)?)?;

        let mut postings: HashMap<String, Vec<PostingOffset>> = HashMap::new();
        let mut postings_v1: HashMap<String, HashMap<String, u64>> = HashMap::new();
        if version == FORMAT_V1 {
            // v1 tables are not sorted, so everything stays in memory.
            read_offset_table(bs, toc.postings_table, |key, off, _| {
                let [name, value] = key else {
                    return Err(unexpected_key_len(key.len()));
                };
                postings_v1
                    .entry((*name).to_owned())
                    .or_insert_with(|| {
                        postings.insert((*name).to_owned(), Vec::new());
                        HashMap::new()
                    })
                    .insert((*value).to_owned(), off);
                Ok(())
            })?;
        } else {
            let mut pending: Option<(&str, &str, usize)> = None;
            let mut value_count = 0usize;
            read_offset_table(bs, toc.postings_table, |key, _, off| {
                let [name, value] = key else {
                    return Err(unexpected_key_len(key.len()));
                };
                if !postings.contains_key(*name) {
                    postings.insert((*name).to_owned(), Vec::new());
                    if let Some((last_name, last_value, last_off)) = pending.take() {
                        push_offset(&mut postings, last_name, last_value, last_off);
                    }
                    value_count = 0;
                }
                if value_count % POSTINGS_OFFSET_FACTOR == 0 {
                    push_offset(&mut postings, name, value, off);
                    pending = None;
                } else {
                    pending = Some((*name, *value, off));
                }
                value_count += 1;
                Ok(())
            })?;
            if let Some((name, value, off)) = pending {
                push_offset(&mut postings, name, value, off);
            }
            for list in postings.values_mut() {
                list.shrink_to_fit();
            }
        }

        let mut name_symbols = HashMap::with_capacity(postings.len());
        for name in postings.keys() {
            if name.as_str() == ALL_POSTINGS_NAME {
                continue;
            }
            name_symbols.insert(symbols.reverse_lookup(bs, name)?, name.clone());
        }

        debug!(
            "loaded index v{version}: {} label names, symbol samples {} bytes",
            postings.len(),
            symbols.size()
        );
        Ok(Self {
            b,
            toc,
            version,
            symbols,
            postings,
            postings_v1,
            name_symbols,
        })
    }

    fn bytes(&self) -> &[u8] {
        self.b.range(0, self.b.len())
    }

    pub fn version(&self) -> u8 {
        self.version
    }

    pub fn toc(&self) -> &Toc {
        &self.toc
    }

    /// Size of the index file in bytes.
    pub fn size(&self) -> usize {
        self.b.len()
    }

    /// Every symbol in the file, in order.
    pub fn symbols(&self) -> SymbolIter<'_> {
        self.symbols.iter(self.bytes())
    }

    /// In-memory footprint of the symbol samples.
    pub fn symbol_table_size(&self) -> usize {
        self.symbols.size()
    }

    pub fn lookup_symbol(&self, o: u32) -> Result<&str> {
        if let Some(name) = self.name_symbols.get(&o) {
            return Ok(name.as_str());
        }
        self.symbols.lookup(self.bytes(), o)
    }

    /// Sorted label names, excluding the all-postings name.
    pub fn label_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .postings
            .keys()
            .map(String::as_str)
            .filter(|name| *name != ALL_POSTINGS_NAME)
            .collect();
        names.sort_unstable();
        names
    }

    /// Values of `name`. Sorted for v2 files, unordered for v1.
    pub fn label_values(&self, name: &str) -> Result<Vec<&str>> {
        if self.version == FORMAT_V1 {
            return Ok(self
                .postings_v1
                .get(name)
                .map(|e| e.keys().map(String::as_str).collect())
                .unwrap_or_default());
        }
        let Some(e) = self.postings.get(name) else {
            return Ok(Vec::new());
        };
        let (Some(first), Some(last)) = (e.first(), e.last()) else {
            return Ok(Vec::new());
        };

        let mut values = Vec::with_capacity(e.len() * POSTINGS_OFFSET_FACTOR);
        let mut d = Decbuf::at(self.bytes(), to_usize(self.toc.postings_table)?, false)?;
        d.skip(first.off)?;
        loop {
            d.uvarint()?; // key count
            d.uvarint_bytes()?; // name
            let value = d.uvarint_str()?;
            values.push(value);
            if value == last.value {
                break;
            }
            d.uvarint64()?; // offset
        }
        Ok(values)
    }

    pub fn sorted_label_values(&self, name: &str) -> Result<Vec<&str>> {
        let mut values = self.label_values(name)?;
        if self.version == FORMAT_V1 {
            values.sort_unstable();
        }
        Ok(values)
    }

    /// Union of the postings of `name=value` for every given value. Missing
    /// names or values contribute nothing.
    pub fn postings(&self, name: &str, values: &[&str]) -> Result<Box<dyn Postings + '_>> {
        let mut values = values.to_vec();
        values.sort_unstable();
        values.dedup();

        if self.version == FORMAT_V1 {
            let Some(e) = self.postings_v1.get(name) else {
                return Ok(empty_postings());
            };
            let mut res = Vec::with_capacity(values.len());
            for value in values {
                if let Some(&off) = e.get(value) {
                    res.push(self.decode_postings(off)?);
                }
            }
            return Ok(merge(res));
        }

        let Some(e) = self.postings.get(name) else {
            return Ok(empty_postings());
        };
        let Some(first) = e.first() else {
            return Ok(empty_postings());
        };

        let mut res = Vec::with_capacity(values.len());
        // Values before the first entry can't match.
        let mut vi = values.partition_point(|v| *v < first.value.as_str());
        while vi < values.len() {
            let mut value = values[vi];
            let mut i = e.partition_point(|p| p.value.as_str() < value);
            if i == e.len() {
                break;
            }
            if i > 0 && e[i].value != value {
                i -= 1;
            }

            // The table checksum was verified at open.
            let mut d = Decbuf::at(self.bytes(), to_usize(self.toc.postings_table)?, false)?;
            d.skip(e[i].off)?;
            loop {
                d.uvarint()?; // key count
                d.uvarint_bytes()?; // name
                let v = d.uvarint_str()?;
                let postings_off = d.uvarint64()?;
                while v >= value {
                    if v == value {
                        res.push(self.decode_postings(postings_off)?);
                    }
                    vi += 1;
                    if vi == values.len() {
                        break;
                    }
                    value = values[vi];
                }
                // Continue in a later sample window, if any.
                if i + 1 == e.len() || value >= e[i + 1].value.as_str() || vi == values.len() {
                    break;
                }
            }
        }
        Ok(merge(res))
    }

    /// Every series in the index.
    pub fn all_postings(&self) -> Result<Box<dyn Postings + '_>> {
        self.postings(ALL_POSTINGS_NAME, &[ALL_POSTINGS_VALUE])
    }

    fn decode_postings(&self, off: u64) -> Result<Box<dyn Postings + '_>> {
        let mut d = Decbuf::at(self.bytes(), to_usize(off)?, true)?;
        d.be32()?; // entry count
        Ok(Box::new(BigEndianPostings::new(d.get())))
    }

    /// Byte range of every postings list, keyed by its label pair.
    pub fn postings_ranges(&self) -> Result<HashMap<Label, Range<u64>>> {
        let bs = self.bytes();
        let mut m = HashMap::new();
        read_offset_table(bs, self.toc.postings_table, |key, off, _| {
            let [name, value] = key else {
                return Err(unexpected_key_len(key.len()));
            };
            let d = Decbuf::at(bs, to_usize(off)?, true)?;
            m.insert(Label::new(*name, *value), off + 4..off + 4 + d.len() as u64);
            Ok(())
        })?;
        Ok(m)
    }

    /// Decodes the series `id` into `lbls` and `chks`, replacing their contents.
    pub fn series(&self, id: u64, lbls: &mut Labels, chks: &mut Vec<ChunkMeta>) -> Result<()> {
        // v2 ids are multiples of the 16-byte series alignment.
        let offset = if self.version == FORMAT_V2 {
            id.checked_mul(16)
                .ok_or_else(|| Error::corrupt(format!("series id {id} out of range")))?
        } else {
            id
        };
        let d = Decbuf::uvarint_at(self.bytes(), to_usize(offset)?)?;
        self.decode_series(d, lbls, chks)
    }

    fn decode_series(&self, mut d: Decbuf<'_>, lbls: &mut Labels, chks: &mut Vec<ChunkMeta>) -> Result<()> {
        lbls.clear();
        chks.clear();

        let k = d.uvarint()?;
        for _ in 0..k {
            let name = self.lookup_symbol(d.uvarint32()?)?;
            let value = self.lookup_symbol(d.uvarint32()?)?;
            lbls.push(Label::new(name, value));
        }

        let k = d.uvarint()?;
        if k == 0 {
            return Ok(());
        }
        chks.reserve(k);

        let mut t0 = d.varint64()?;
        let mut maxt = (d.uvarint64()? as i64).wrapping_add(t0);
        let mut ref0 = d.uvarint64()? as i64;
        chks.push(ChunkMeta::new(ref0 as u64, t0, maxt));
        t0 = maxt;

        for _ in 1..k {
            let mint = (d.uvarint64()? as i64).wrapping_add(t0);
            maxt = (d.uvarint64()? as i64).wrapping_add(mint);
            ref0 = ref0.wrapping_add(d.varint64()?);
            t0 = maxt;
            chks.push(ChunkMeta::new(ref0 as u64, mint, maxt));
        }
        Ok(())
    }

    /// Releases the underlying bytes.
    pub fn close(self) -> Result<()> {
        Ok(())
    }
}

/// Walks a `count | (nkeys, keys.., offset)*` table at `off`, calling `f` with
/// the keys, the stored offset and the entry position within the payload.
pub fn read_offset_table<'a, F>(bs: &'a [u8], off: u64, mut f: F) -> Result<()>
where
    F: FnMut(&[&'a str], u64, usize) -> Result<()>,
{
    let mut d = Decbuf::at(bs, to_usize(off)?, true)?;
    let start_len = d.len();
    let mut cnt = d.be32()?;

    // Postings tables have two keys per entry, label index tables one.
    let mut keys = Vec::with_capacity(2);
    while !d.is_empty() && cnt > 0 {
        let offset_pos = start_len - d.len();
        let key_count = d.uvarint()?;
        keys.clear();
        for _ in 0..key_count {
            keys.push(d.uvarint_str()?);
        }
        let o = d.uvarint64()?;
        f(&keys, o, offset_pos)?;
        cnt -= 1;
    }
    Ok(())
}

fn push_offset(postings: &mut HashMap<String, Vec<PostingOffset>>, name: &str, value: &str, off: usize) {
    if let Some(list) = postings.get_mut(name) {
        list.push(PostingOffset {
            value: value.to_owned(),
            off,
        });
    }
}

fn unexpected_key_len(n: usize) -> Error {
    Error::corrupt(format!("unexpected key length for posting table {n}"))
}

fn to_usize(v: u64) -> Result<usize> {
    usize::try_from(v).map_err(|_| Error::corrupt(format!("offset {v} out of range")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::{crc32, Encbuf};
    use crate::postings::expand_postings;

    fn framed(out: &mut Vec<u8>, payload: &[u8]) {
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload);
        out.extend_from_slice(&crc32(payload).to_be_bytes());
    }

    // A minimal v1 file: one series {a="b"} with one chunk. Symbol references
    // are file offsets and the series reference is its raw position.
    fn v1_index() -> Vec<u8> {
        let mut out = Vec::new();
        out.extend_from_slice(&MAGIC_INDEX.to_be_bytes());
        out.push(FORMAT_V1);

        let mut buf = Encbuf::default();
        buf.put_be32(2);
        buf.put_uvarint_str("a"); // at 13
        buf.put_uvarint_str("b"); // at 15
        framed(&mut out, buf.get());
        assert_eq!(out.len(), 21);

        let mut series = Encbuf::default();
        for x in [1, 13, 15, 1] {
            series.put_uvarint(x);
        }
        series.put_varint(1);
        series.put_uvarint(2);
        series.put_uvarint(7);
        out.push(series.len() as u8);
        out.extend_from_slice(series.get());
        out.extend_from_slice(&crc32(series.get()).to_be_bytes());
        assert_eq!(out.len(), 33);

        for _ in 0..2 {
            buf.reset();
            buf.put_be32(1);
            buf.put_be32(21);
            framed(&mut out, buf.get());
        }
        assert_eq!(out.len(), 65);

        buf.reset();
        buf.put_be32(2);
        for (name, value, off) in [("a", "b", 33), ("", "", 49)] {
            buf.put_uvarint(2);
            buf.put_uvarint_str(name);
            buf.put_uvarint_str(value);
            buf.put_uvarint(off);
        }
        framed(&mut out, buf.get());

        let toc = Toc {
            symbols: 5,
            series: 21,
            label_indices: 33,
            label_indices_table: 65,
            postings: 33,
            postings_table: 65,
        };
        toc.encode(&mut buf);
        out.extend_from_slice(buf.get());
        out
    }

    #[test]
    fn reads_v1_files() -> Result<()> {
        let r = IndexReader::from_byte_slice(v1_index())?;
        assert_eq!(r.version(), FORMAT_V1);
        assert_eq!(r.label_names(), ["a"]);
        assert_eq!(r.sorted_label_values("a")?, ["b"]);
        assert_eq!(expand_postings(&mut r.postings("a", &["b", "zzz"])?)?, vec![21]);
        assert_eq!(expand_postings(&mut r.all_postings()?)?, vec![21]);

        let mut lbls = Labels::default();
        let mut chks = Vec::new();
        r.series(21, &mut lbls, &mut chks)?;
        assert_eq!(lbls, Labels::from_pairs([("a", "b")]));
        assert_eq!(chks, vec![ChunkMeta::new(7, 1, 3)]);
        Ok(())
    }

    #[test]
    fn rejects_bad_header() {
        let mut bytes = v1_index();
        bytes[4] = 3;
        assert!(matches!(
            IndexReader::from_byte_slice(bytes.clone()),
            Err(Error::UnsupportedVersion(3))
        ));
        bytes[0] = 0;
        assert!(matches!(
            IndexReader::from_byte_slice(bytes),
            Err(Error::InvalidMagic(_))
        ));
        assert!(IndexReader::from_byte_slice(vec![0xBA, 0xAA]).is_err());
    }

    #[test]
    fn offset_table_positions_are_payload_relative() -> Result<()> {
        let bytes = v1_index();
        let mut seen = Vec::new();
        read_offset_table(&bytes, 65, |key, off, pos| {
            seen.push((key.join("="), off, pos));
            Ok(())
        })?;
        // The first entry follows the 4-byte count.
        assert_eq!(seen, vec![("a=b".to_owned(), 33, 4), ("=".to_owned(), 49, 4 + 6)]);
        Ok(())
    }

    #[test]
    fn readers_are_thread_safe() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<IndexReader<crate::MmapFile>>();
        assert_send_sync::<IndexReader<Vec<u8>>>();
    }
}
