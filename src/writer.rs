//! Streaming index writer.
//!
//! Callers add every symbol in sorted order, then every series in label-set
//! order, then close. Postings and the lookup tables are derived from the
//! written series when the writer reaches [`Stage::Done`], using two side
//! files next to the index that are removed once their content is merged in.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, info, warn};

use crate::cancel::CancelToken;
use crate::chunks::ChunkMeta;
use crate::encoding::{align_up, crc32, Decbuf, Encbuf, CASTAGNOLI, CRC_LEN};
use crate::format::{
    Toc, ALL_POSTINGS_NAME, ALL_POSTINGS_VALUE, FORMAT_V2, MAGIC_INDEX, MAX_INDEX_SIZE,
    POSTINGS_ALIGN, SERIES_ALIGN,
};
use crate::labels::Labels;
use crate::mmap::{ByteSlice, MmapFile};
use crate::symbols::SymbolTable;
use crate::{Error, Result};

const DEFAULT_BUFFER_SIZE: usize = 1 << 22;
const DEFAULT_COPY_BUFFER_SIZE: usize = 1 << 20;
const SCRATCH_CAPACITY: usize = 1 << 16;

/// Build phases, in the only order they may be entered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    None,
    Symbols,
    Series,
    Done,
}

impl Stage {
    fn next(self) -> Stage {
        match self {
            Stage::None => Stage::Symbols,
            Stage::Symbols => Stage::Series,
            Stage::Series | Stage::Done => Stage::Done,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Stage::None => "none",
            Stage::Symbols => "symbols",
            Stage::Series => "series",
            Stage::Done => "done",
        })
    }
}

#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Write buffer in front of the index and each side file.
    pub buffer_size: usize,
    /// Chunk size used when copying the postings side file into the index.
    pub copy_buffer_size: usize,
    /// Checked each time a stage is requested.
    pub cancel: Option<CancelToken>,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            buffer_size: DEFAULT_BUFFER_SIZE,
            copy_buffer_size: DEFAULT_COPY_BUFFER_SIZE,
            cancel: None,
        }
    }
}

/// Buffered file with a tracked write position.
struct FileWriter {
    file: BufWriter<File>,
    pos: u64,
    path: PathBuf,
}

impl FileWriter {
    fn create(path: PathBuf, buffer_size: usize) -> Result<Self> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;
        Ok(Self {
            file: BufWriter::with_capacity(buffer_size, file),
            pos: 0,
            path,
        })
    }

    fn write(&mut self, bufs: &[&[u8]]) -> Result<()> {
        for b in bufs {
            self.file.write_all(b)?;
            self.pos += b.len() as u64;
            // Series references are 4 bytes over 16-byte alignment.
            if self.pos > MAX_INDEX_SIZE {
                return Err(Error::SizeLimitExceeded(format!(
                    "{} exceeding max size of 64GiB",
                    self.path.display()
                )));
            }
        }
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.file.flush()?;
        Ok(())
    }

    /// Overwrites bytes already written at `pos`.
    fn write_at(&mut self, buf: &[u8], pos: u64) -> Result<()> {
        self.flush()?;
        let file = self.file.get_mut();
        file.seek(SeekFrom::Start(pos))?;
        file.write_all(buf)?;
        file.seek(SeekFrom::Start(self.pos))?;
        Ok(())
    }

    /// Zero-pads until the position is a multiple of `align`.
    fn add_padding(&mut self, align: u64) -> Result<()> {
        let pad = (align_up(self.pos, align) - self.pos) as usize;
        if pad == 0 {
            return Ok(());
        }
        self.write(&[&vec![0u8; pad]])
    }

    /// Appends the whole content of `other`.
    fn append_file(&mut self, other: &mut FileWriter, copy_buffer_size: usize) -> Result<()> {
        other.flush()?;
        let src = other.file.get_mut();
        src.seek(SeekFrom::Start(0))?;

        let mut buf = vec![0u8; copy_buffer_size.max(1)];
        let mut copied = 0u64;
        loop {
            let n = match src.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err.into()),
            };
            self.write(&[&buf[..n]])?;
            copied += n as u64;
        }
        if copied != other.pos {
            return Err(Error::corrupt(format!(
                "wrote {} bytes to {}, but only read back {copied}",
                other.pos,
                other.path.display()
            )));
        }
        Ok(())
    }

    fn close(mut self) -> Result<()> {
        self.flush()?;
        self.file.get_ref().sync_all()?;
        Ok(())
    }

    fn remove(self) -> Result<()> {
        let path = self.path.clone();
        self.close()?;
        fs::remove_file(path)?;
        Ok(())
    }
}

#[derive(Debug)]
struct LabelIndexEntry {
    name: String,
    offset: u64,
}

/// Writes one index file. See the module docs for the call order.
pub struct IndexWriter {
    config: WriterConfig,
    f: FileWriter,
    /// Raw postings lists, offsets relative to this file.
    fp: Option<FileWriter>,
    /// Postings offset table entries pointing into `fp`.
    fpo: Option<FileWriter>,
    stage: Stage,
    toc: Toc,

    buf1: Encbuf,
    buf2: Encbuf,

    num_symbols: u32,
    last_symbol: String,
    symbol_file: Option<MmapFile>,
    symbols: Option<SymbolTable>,

    /// Series count per label name.
    label_names: HashMap<String, u64>,
    last_series: Labels,
    last_ref: u64,
    num_series: u64,

    cnt_po: u64,
    postings_start: u64,
    label_indexes: Vec<LabelIndexEntry>,
}

impl IndexWriter {
    pub fn create(path: impl AsRef<Path>) -> Result<Self> {
        Self::create_with_config(path, WriterConfig::default())
    }

    /// Replaces whatever exists at `path` with a new, empty index.
    pub fn create_with_config(path: impl AsRef<Path>, config: WriterConfig) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        remove_existing(&path)?;

        let f = FileWriter::create(path.clone(), config.buffer_size)?;
        let fp = FileWriter::create(side_path(&path, "_tmp_p"), config.buffer_size)?;
        let fpo = FileWriter::create(side_path(&path, "_tmp_po"), config.buffer_size)?;
        sync_dir(parent_dir(&path))?;

        let mut writer = Self {
            config,
            f,
            fp: Some(fp),
            fpo: Some(fpo),
            stage: Stage::None,
            toc: Toc::default(),
            buf1: Encbuf::with_capacity(SCRATCH_CAPACITY),
            buf2: Encbuf::with_capacity(SCRATCH_CAPACITY),
            num_symbols: 0,
            last_symbol: String::new(),
            symbol_file: None,
            symbols: None,
            label_names: HashMap::with_capacity(1 << 8),
            last_series: Labels::default(),
            last_ref: 0,
            num_series: 0,
            cnt_po: 0,
            postings_start: 0,
            label_indexes: Vec::new(),
        };
        writer.write_meta()?;
        debug!("created index writer at {}", path.display());
        Ok(writer)
    }

    pub fn stage(&self) -> Stage {
        self.stage
    }

    pub fn path(&self) -> &Path {
        &self.f.path
    }

    fn write_meta(&mut self) -> Result<()> {
        self.buf1.reset();
        self.buf1.put_be32(MAGIC_INDEX);
        self.buf1.put_byte(FORMAT_V2);
        self.f.write(&[self.buf1.get()])
    }

    /// Advances through every stage up to `s`, finalizing each one entered.
    fn ensure_stage(&mut self, s: Stage) -> Result<()> {
        if self
            .config
            .cancel
            .as_ref()
            .is_some_and(CancelToken::is_cancelled)
        {
            return Err(Error::Cancelled);
        }
        while self.stage != s {
            if self.stage > s {
                return Err(Error::InvalidStage {
                    requested: s,
                    current: self.stage,
                });
            }
            let next = self.stage.next();
            debug!("index {}: entering stage {next}", self.f.path.display());
            self.enter_stage(next)?;
            self.stage = next;
        }
        Ok(())
    }

    fn enter_stage(&mut self, s: Stage) -> Result<()> {
        match s {
            Stage::None => {}
            Stage::Symbols => {
                self.toc.symbols = self.f.pos;
                self.start_symbols()?;
            }
            Stage::Series => {
                self.finish_symbols()?;
                self.toc.series = self.f.pos;
            }
            Stage::Done => {
                self.toc.label_indices = self.f.pos;
                // Label indices are derived from the postings offset table.
                self.write_postings_to_tmp_files()?;
                self.write_label_indices()?;

                self.toc.postings = self.f.pos;
                self.write_postings()?;

                self.toc.label_indices_table = self.f.pos;
                self.write_label_indexes_offset_table()?;

                self.toc.postings_table = self.f.pos;
                self.write_postings_offset_table()?;
                self.write_toc()?;
            }
        }
        Ok(())
    }

    pub fn add_symbol(&mut self, sym: &str) -> Result<()> {
        self.ensure_stage(Stage::Symbols)?;
        if self.num_symbols != 0 && sym <= self.last_symbol.as_str() {
            return Err(Error::OrderViolation(format!("symbol {sym:?} out-of-order")));
        }
        let num_symbols = self
            .num_symbols
            .checked_add(1)
            .ok_or_else(|| Error::SizeLimitExceeded("symbol count exceeds 4 bytes".into()))?;

        self.buf1.reset();
        self.buf1.put_uvarint_str(sym);
        self.f.write(&[self.buf1.get()])?;

        self.last_symbol.clear();
        self.last_symbol.push_str(sym);
        self.num_symbols = num_symbols;
        Ok(())
    }

    fn start_symbols(&mut self) -> Result<()> {
        // Length and count are back-patched by finish_symbols.
        self.f.write(&[b"alenblen"])
    }

    fn finish_symbols(&mut self) -> Result<()> {
        let start = self.toc.symbols;
        let len = section_len(self.f.pos, start)?;
        self.buf1.reset();
        self.buf1.put_be32(len);
        self.buf1.put_be32(self.num_symbols);
        self.f.write_at(self.buf1.get(), start)?;

        // The checksum covers the count, which is only known now.
        let hash_pos = self.f.pos;
        self.f.write(&[b"hash"])?;
        self.f.flush()?;

        let file = MmapFile::open(&self.f.path)?;
        let hash = crc32(file.checked_range(start as usize + 4, hash_pos as usize)?);
        drop(file);
        self.buf1.reset();
        self.buf1.put_be32(hash);
        self.f.write_at(self.buf1.get(), hash_pos)?;

        let file = MmapFile::open(&self.f.path)?;
        let table = SymbolTable::new(file.as_slice(), FORMAT_V2, start as usize)?;
        debug!(
            "index {}: {} symbols, sample table {} bytes",
            self.f.path.display(),
            table.len(),
            table.size()
        );
        self.symbols = Some(table);
        self.symbol_file = Some(file);
        Ok(())
    }

    fn reverse_lookup(&self, sym: &str) -> Result<u32> {
        match (&self.symbols, &self.symbol_file) {
            (Some(table), Some(file)) => table.reverse_lookup(file.as_slice(), sym),
            _ => Err(Error::corrupt("symbol table not loaded")),
        }
    }

    fn lookup(&self, id: u32) -> Result<String> {
        match (&self.symbols, &self.symbol_file) {
            (Some(table), Some(file)) => Ok(table.lookup(file.as_slice(), id)?.to_owned()),
            _ => Err(Error::corrupt("symbol table not loaded")),
        }
    }

    /// Adds a series. Label sets must be strictly increasing and every label
    /// string must have been added as a symbol.
    pub fn add_series(&mut self, series_ref: u64, labels: &Labels, chunks: &[ChunkMeta]) -> Result<()> {
        self.ensure_stage(Stage::Series)?;
        if *labels <= self.last_series {
            return Err(Error::OrderViolation(format!(
                "out-of-order series added with label set {labels}"
            )));
        }
        if series_ref < self.last_ref && !self.last_series.is_empty() {
            return Err(Error::OrderViolation(format!(
                "series with reference greater than {series_ref} already added"
            )));
        }

        self.buf2.reset();
        self.buf2.put_uvarint(labels.len() as u64);
        for label in labels {
            let name = self.reverse_lookup(&label.name).map_err(|err| missing_symbol(&label.name, err))?;
            let value = self.reverse_lookup(&label.value).map_err(|err| missing_symbol(&label.value, err))?;
            self.buf2.put_uvarint(u64::from(name));
            self.buf2.put_uvarint(u64::from(value));
        }
        encode_chunks(&mut self.buf2, chunks);

        // 16-byte alignment widens what 4-byte series references can address.
        self.f.add_padding(SERIES_ALIGN)?;
        if self.f.pos % SERIES_ALIGN != 0 {
            return Err(Error::corrupt(format!(
                "series write not 16-byte aligned at {}",
                self.f.pos
            )));
        }

        self.buf1.reset();
        self.buf1.put_uvarint(self.buf2.len() as u64);
        self.buf2.put_hash();
        self.f.write(&[self.buf1.get(), self.buf2.get()])?;

        for label in labels {
            match self.label_names.get_mut(label.name.as_str()) {
                Some(count) => *count += 1,
                None => {
                    self.label_names.insert(label.name.clone(), 1);
                }
            }
        }
        self.last_series.clone_from_labels(labels);
        self.last_ref = series_ref;
        self.num_series += 1;
        Ok(())
    }

    fn write_postings_to_tmp_files(&mut self) -> Result<()> {
        let mut names: Vec<String> = self.label_names.keys().cloned().collect();
        names.sort_unstable();

        self.f.flush()?;
        let file = MmapFile::open(&self.f.path)?;
        let series = file.checked_range(self.toc.series as usize, self.toc.label_indices as usize)?;
        let end = self.toc.label_indices;

        // The all-postings list holds every series.
        let mut offsets = Vec::new();
        let mut d = Decbuf::new(series);
        while !d.is_empty() {
            d.consume_padding();
            if d.is_empty() {
                break;
            }
            let start = end - d.len() as u64;
            offsets.push(series_ref_at(start)?);
            let len = d.uvarint()?;
            d.skip(len + CRC_LEN)?;
        }
        self.write_posting(ALL_POSTINGS_NAME, ALL_POSTINGS_VALUE, &offsets)?;
        // No label name can have more postings than this.
        let max_postings = offsets.len() as u64;
        drop(offsets);

        let mut rest = &names[..];
        let mut batches = 0usize;
        while !rest.is_empty() {
            // Bunch names up as long as their postings together stay within
            // what one name could need; always take at least one.
            let mut take = 0;
            let mut count = 0u64;
            while take < rest.len() {
                let c = self.label_names[rest[take].as_str()];
                if take > 0 && count + c > max_postings {
                    break;
                }
                count += c;
                take += 1;
            }
            let (batch, tail) = rest.split_at(take);
            rest = tail;
            batches += 1;

            let mut name_symbols = HashSet::with_capacity(batch.len());
            for name in batch {
                name_symbols.insert(self.reverse_lookup(name)?);
            }

            // name symbol -> value symbol -> series refs.
            let mut postings: HashMap<u32, HashMap<u32, Vec<u32>>> = HashMap::new();
            let mut d = Decbuf::new(series);
            while !d.is_empty() {
                d.consume_padding();
                if d.is_empty() {
                    break;
                }
                let start = end - d.len() as u64;
                let len = d.uvarint()?;
                let start_len = d.len();

                let num_labels = d.uvarint()?;
                for _ in 0..num_labels {
                    let name = d.uvarint32()?;
                    let value = d.uvarint32()?;
                    if name_symbols.contains(&name) {
                        postings
                            .entry(name)
                            .or_default()
                            .entry(value)
                            .or_default()
                            .push(series_ref_at(start)?);
                    }
                }
                let consumed = start_len - d.len();
                let remaining = len
                    .checked_sub(consumed)
                    .ok_or_else(|| Error::corrupt(format!("series at {start} overruns its length")))?;
                d.skip(remaining + CRC_LEN)?;
            }

            for name in batch {
                let sid = self.reverse_lookup(name)?;
                let Some(by_value) = postings.remove(&sid) else {
                    continue;
                };
                let mut values: Vec<(u32, Vec<u32>)> = by_value.into_iter().collect();
                // Symbol ids are assigned in string order.
                values.sort_unstable_by_key(|(v, _)| *v);
                for (v, offs) in values {
                    let value = self.lookup(v)?;
                    self.write_posting(name, &value, &offs)?;
                }
            }
        }
        debug!(
            "index {}: wrote postings for {} label names in {batches} batches",
            self.f.path.display(),
            names.len()
        );
        Ok(())
    }

    fn write_posting(&mut self, name: &str, value: &str, offs: &[u32]) -> Result<()> {
        let (Some(fp), Some(fpo)) = (self.fp.as_mut(), self.fpo.as_mut()) else {
            return Err(Error::corrupt("postings side files already closed"));
        };
        fp.add_padding(POSTINGS_ALIGN)?;

        // Offset relative to the side file; rebased when the table is copied.
        self.buf1.reset();
        self.buf1.put_uvarint(2);
        self.buf1.put_uvarint_str(name);
        self.buf1.put_uvarint_str(value);
        self.buf1.put_uvarint(fp.pos);
        fpo.write(&[self.buf1.get()])?;
        self.cnt_po += 1;

        self.buf1.reset();
        self.buf1.put_be32(to_u32(offs.len() as u64, "postings list length")?);
        for &off in offs {
            self.buf1.put_be32(off);
        }
        self.buf2.reset();
        self.buf2.put_be32(to_u32(self.buf1.len() as u64, "postings list size")?);
        self.buf1.put_hash();
        fp.write(&[self.buf2.get(), self.buf1.get()])
    }

    fn write_label_indices(&mut self) -> Result<()> {
        let (file, len) = self.map_postings_offsets()?;
        let mut d = Decbuf::new(file.checked_range(0, len)?);

        let mut current: Option<&str> = None;
        let mut values = Vec::new();
        for _ in 0..self.cnt_po {
            d.uvarint()?; // key count
            let name = d.uvarint_str()?;
            let value = d.uvarint_str()?;
            d.uvarint64()?; // offset
            if name == ALL_POSTINGS_NAME {
                continue;
            }
            if let Some(prev) = current {
                if prev != name && !values.is_empty() {
                    self.write_label_index(prev, &values)?;
                    values.clear();
                }
            }
            current = Some(name);
            values.push(self.reverse_lookup(value)?);
        }
        if let Some(name) = current {
            if !values.is_empty() {
                self.write_label_index(name, &values)?;
            }
        }
        Ok(())
    }

    fn write_label_index(&mut self, name: &str, values: &[u32]) -> Result<()> {
        self.f.add_padding(POSTINGS_ALIGN)?;
        self.label_indexes.push(LabelIndexEntry {
            name: name.to_owned(),
            offset: self.f.pos,
        });

        self.buf2.reset();
        self.buf2.put_be32(1); // names per entry
        self.buf2.put_be32(to_u32(values.len() as u64, "label value count")?);
        for &v in values {
            self.buf2.put_be32(v);
        }
        self.buf1.reset();
        self.buf1.put_be32(to_u32(self.buf2.len() as u64, "label index size")?);
        self.buf2.put_hash();
        self.f.write(&[self.buf1.get(), self.buf2.get()])
    }

    fn write_postings(&mut self) -> Result<()> {
        // Side file offsets are 4-byte aligned, so the copy must start aligned too.
        self.f.add_padding(POSTINGS_ALIGN)?;
        self.postings_start = self.f.pos;

        let mut fp = self
            .fp
            .take()
            .ok_or_else(|| Error::corrupt("postings side file already closed"))?;
        self.f.append_file(&mut fp, self.config.copy_buffer_size)?;
        fp.remove()
    }

    fn write_label_indexes_offset_table(&mut self) -> Result<()> {
        self.buf2.reset();
        self.buf2.put_be32(to_u32(self.label_indexes.len() as u64, "label index count")?);
        for entry in &self.label_indexes {
            self.buf2.put_uvarint(1);
            self.buf2.put_uvarint_str(&entry.name);
            self.buf2.put_uvarint(entry.offset);
        }
        self.buf1.reset();
        self.buf1.put_be32(to_u32(self.buf2.len() as u64, "label index table size")?);
        self.buf2.put_hash();
        self.f.write(&[self.buf1.get(), self.buf2.get()])
    }

    fn write_postings_offset_table(&mut self) -> Result<()> {
        let start = self.f.pos;
        self.f.write(&[b"alen"])?;

        let mut digest = CASTAGNOLI.digest();
        self.buf1.reset();
        self.buf1.put_be32(to_u32(self.cnt_po, "postings count")?);
        digest.update(self.buf1.get());
        self.f.write(&[self.buf1.get()])?;

        let (file, len) = self.map_postings_offsets()?;
        let mut d = Decbuf::new(file.checked_range(0, len)?);
        for _ in 0..self.cnt_po {
            self.buf1.reset();
            self.buf1.put_uvarint(d.uvarint64()?);
            self.buf1.put_uvarint_bytes(d.uvarint_bytes()?);
            self.buf1.put_uvarint_bytes(d.uvarint_bytes()?);
            self.buf1.put_uvarint(d.uvarint64()? + self.postings_start);
            digest.update(self.buf1.get());
            self.f.write(&[self.buf1.get()])?;
        }
        drop(file);
        if let Some(fpo) = self.fpo.take() {
            fpo.remove()?;
        }

        let len = section_len(self.f.pos, start)?;
        self.buf1.reset();
        self.buf1.put_be32(len);
        self.f.write_at(self.buf1.get(), start)?;

        self.buf1.reset();
        self.buf1.put_be32(digest.finalize());
        self.f.write(&[self.buf1.get()])
    }

    fn write_toc(&mut self) -> Result<()> {
        self.toc.encode(&mut self.buf1);
        self.f.write(&[self.buf1.get()])
    }

    fn map_postings_offsets(&mut self) -> Result<(MmapFile, usize)> {
        let fpo = self
            .fpo
            .as_mut()
            .ok_or_else(|| Error::corrupt("postings offset side file already closed"))?;
        fpo.flush()?;
        Ok((MmapFile::open(&fpo.path)?, fpo.pos as usize))
    }

    /// Finishes the index if needed, syncs it and removes the side files.
    /// Returns the first error met; every file is closed either way.
    pub fn close(mut self) -> Result<()> {
        let mut result = self.ensure_stage(Stage::Done);
        self.symbols = None;
        self.symbol_file = None;

        for side in [self.fp.take(), self.fpo.take()].into_iter().flatten() {
            let path = side.path.clone();
            if let Err(err) = side.remove() {
                warn!("failed to remove {}: {err}", path.display());
                result = result.and(Err(err));
            }
        }

        let path = self.f.path.clone();
        let size = self.f.pos;
        result = result.and(self.f.close());
        if result.is_ok() {
            info!(
                "wrote index {} ({} series, {} symbols, {size} bytes)",
                path.display(),
                self.num_series,
                self.num_symbols
            );
        }
        result
    }
}

fn encode_chunks(buf: &mut Encbuf, chunks: &[ChunkMeta]) {
    buf.put_uvarint(chunks.len() as u64);
    let Some((first, rest)) = chunks.split_first() else {
        return;
    };
    buf.put_varint(first.min_time);
    buf.put_uvarint(first.max_time.wrapping_sub(first.min_time) as u64);
    buf.put_uvarint(first.chunk_ref);
    let mut t0 = first.max_time;
    let mut ref0 = first.chunk_ref as i64;
    for c in rest {
        buf.put_uvarint(c.min_time.wrapping_sub(t0) as u64);
        buf.put_uvarint(c.max_time.wrapping_sub(c.min_time) as u64);
        t0 = c.max_time;
        buf.put_varint((c.chunk_ref as i64).wrapping_sub(ref0));
        ref0 = c.chunk_ref as i64;
    }
}

fn missing_symbol(sym: &str, err: Error) -> Error {
    match err {
        Error::LookupMiss(_) => Error::LookupMiss(format!("symbol entry for {sym:?} does not exist")),
        other => other,
    }
}

fn series_ref_at(offset: u64) -> Result<u32> {
    if offset % SERIES_ALIGN != 0 {
        return Err(Error::corrupt(format!("series not 16-byte aligned at {offset}")));
    }
    to_u32(offset / SERIES_ALIGN, "series offset")
}

fn to_u32(v: u64, what: &str) -> Result<u32> {
    u32::try_from(v).map_err(|_| Error::SizeLimitExceeded(format!("{what} {v} exceeds 4 bytes")))
}

/// Length of a section framed by a 4-byte length prefix at `start`.
fn section_len(pos: u64, start: u64) -> Result<u32> {
    to_u32(pos - start - 4, "section length")
}

fn side_path(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(suffix);
    PathBuf::from(name)
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    }
}

fn remove_existing(path: &Path) -> Result<()> {
    let res = if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    };
    match res {
        Err(err) if err.kind() != io::ErrorKind::NotFound => Err(err.into()),
        _ => Ok(()),
    }
}

fn sync_dir(path: &Path) -> Result<()> {
    let dir = File::open(path)?;
    dir.sync_all()?;
    Ok(())
}
