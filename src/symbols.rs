//! Sampled symbol table.
//!
//! Symbols are stored back to back as uvarint-prefixed strings in sorted
//! order. Only the byte offset of every [`SYMBOL_FACTOR`]th symbol is kept in
//! memory; lookups jump to the closest sample and scan forward from there.

use crate::encoding::Decbuf;
use crate::format::FORMAT_V2;
use crate::{Error, Result};

pub const SYMBOL_FACTOR: usize = 32;

#[derive(Debug, Clone)]
pub struct SymbolTable {
    version: u8,
    /// End of the symbol payload, exclusive. The CRC follows it.
    end: usize,
    /// Absolute file offsets of every `SYMBOL_FACTOR`th symbol.
    offsets: Vec<usize>,
    seen: usize,
}

impl SymbolTable {
    /// Loads the table whose frame starts at `off` in `bs`, verifying its CRC.
    pub fn new(bs: &[u8], version: u8, off: usize) -> Result<Self> {
        let mut d = Decbuf::at(bs, off, true)?;
        let base = off + 4;
        let orig_len = d.len();
        let end = base + orig_len;
        let count = d.be32()? as usize;

        let mut offsets = Vec::with_capacity(1 + count / SYMBOL_FACTOR);
        let mut seen = 0;
        while seen < count {
            if seen % SYMBOL_FACTOR == 0 {
                offsets.push(base + orig_len - d.len());
            }
            d.uvarint_bytes()?;
            seen += 1;
        }
        Ok(Self {
            version,
            end,
            offsets,
            seen,
        })
    }

    /// Number of symbols in the table.
    pub fn len(&self) -> usize {
        self.seen
    }

    pub fn is_empty(&self) -> bool {
        self.seen == 0
    }

    /// Approximate in-memory footprint of the sample table in bytes.
    pub fn size(&self) -> usize {
        self.offsets.len() * 8
    }

    fn decbuf_from<'b>(&self, bs: &'b [u8], pos: usize) -> Result<Decbuf<'b>> {
        if pos > self.end || self.end > bs.len() {
            return Err(Error::LookupMiss(format!("symbol offset {pos} out of range")));
        }
        Ok(Decbuf::new(&bs[pos..self.end]))
    }

    /// Resolves a symbol reference. In v2 the reference is the symbol's
    /// sequence number, in v1 its absolute file offset.
    pub fn lookup<'b>(&self, bs: &'b [u8], o: u32) -> Result<&'b str> {
        let o = o as usize;
        if self.version == FORMAT_V2 {
            if o >= self.seen {
                return Err(Error::LookupMiss(format!("unknown symbol offset {o}")));
            }
            let mut d = self.decbuf_from(bs, self.offsets[o / SYMBOL_FACTOR])?;
            for _ in 0..o % SYMBOL_FACTOR {
                d.uvarint_bytes()?;
            }
            return d.uvarint_str();
        }

        let first = self.offsets.first().copied().unwrap_or(self.end);
        if o < first || o >= self.end {
            return Err(Error::LookupMiss(format!("unknown symbol offset {o}")));
        }
        self.decbuf_from(bs, o)?
            .uvarint_str()
            .map_err(|err| Error::LookupMiss(format!("symbol at offset {o}: {err}")))
    }

    /// Returns the reference of `sym`, or [`Error::LookupMiss`] if it was never added.
    pub fn reverse_lookup(&self, bs: &[u8], sym: &str) -> Result<u32> {
        if self.offsets.is_empty() {
            return Err(Error::LookupMiss(format!("unknown symbol {sym:?} - no symbols")));
        }
        // First sample strictly greater than `sym`; decode failures sort low
        // since the whole table was already walked at load time.
        let mut i = self.offsets.partition_point(|&pos| {
            self.decbuf_from(bs, pos)
                .and_then(|mut d| d.uvarint_str())
                .map_or(true, |s| s <= sym)
        });
        i = i.saturating_sub(1);

        let mut d = self.decbuf_from(bs, self.offsets[i])?;
        let mut res = i * SYMBOL_FACTOR;
        let mut found = None;
        while res <= self.seen {
            let pos = self.end - d.len();
            let Ok(candidate) = d.uvarint_str() else {
                break;
            };
            if candidate >= sym {
                found = Some((candidate, pos));
                break;
            }
            res += 1;
        }

        match found {
            Some((candidate, pos)) if candidate == sym && res < self.seen => {
                let reference = if self.version == FORMAT_V2 { res } else { pos };
                u32::try_from(reference).map_err(|_| {
                    Error::SizeLimitExceeded(format!("symbol reference {reference} exceeds 4 bytes"))
                })
            }
            _ => Err(Error::LookupMiss(format!("unknown symbol {sym:?}"))),
        }
    }

    /// Iterates every symbol in sorted order.
    pub fn iter<'b>(&self, bs: &'b [u8]) -> SymbolIter<'b> {
        let start = self.offsets.first().copied().unwrap_or(self.end);
        let d = if start <= self.end && self.end <= bs.len() {
            Decbuf::new(&bs[start..self.end])
        } else {
            Decbuf::new(&[])
        };
        SymbolIter {
            d,
            remaining: self.seen,
        }
    }
}

pub struct SymbolIter<'b> {
    d: Decbuf<'b>,
    remaining: usize,
}

impl<'b> Iterator for SymbolIter<'b> {
    type Item = Result<&'b str>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        self.remaining -= 1;
        match self.d.uvarint_str() {
            Ok(sym) => Some(Ok(sym)),
            Err(err) => {
                self.remaining = 0;
                Some(Err(err))
            }
        }
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        (0, Some(self.remaining))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encoding::Encbuf;
    use crate::format::FORMAT_V1;

    // Frames `symbols` the way the writer does, preceded by `lead` filler bytes.
    fn symbols_section(lead: usize, symbols: &[&str]) -> Vec<u8> {
        let mut payload = Encbuf::default();
        payload.put_be32(symbols.len() as u32);
        for sym in symbols {
            payload.put_uvarint_str(sym);
        }
        let mut out = vec![0u8; lead];
        out.extend_from_slice(&(payload.len() as u32).to_be_bytes());
        out.extend_from_slice(payload.get());
        out.extend_from_slice(&crate::encoding::crc32(payload.get()).to_be_bytes());
        out
    }

    fn numbered(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("sym{i:04}")).collect()
    }

    #[test]
    fn lookup_and_reverse_lookup_agree() -> Result<()> {
        let owned = numbered(100);
        let syms: Vec<&str> = owned.iter().map(String::as_str).collect();
        let bs = symbols_section(5, &syms);
        let table = SymbolTable::new(&bs, FORMAT_V2, 5)?;

        assert_eq!(table.len(), 100);
        assert_eq!(table.size(), 4 * 8);
        for (i, sym) in syms.iter().enumerate() {
            let id = table.reverse_lookup(&bs, sym)?;
            assert_eq!(id as usize, i);
            assert_eq!(table.lookup(&bs, id)?, *sym);
        }
        Ok(())
    }

    #[test]
    fn unknown_symbols_miss() -> Result<()> {
        let bs = symbols_section(0, &["a", "c", "e"]);
        let table = SymbolTable::new(&bs, FORMAT_V2, 0)?;

        for sym in ["", "b", "d", "f", "zzz"] {
            assert!(
                matches!(table.reverse_lookup(&bs, sym), Err(Error::LookupMiss(_))),
                "{sym:?} should miss"
            );
        }
        assert!(matches!(table.lookup(&bs, 3), Err(Error::LookupMiss(_))));
        Ok(())
    }

    #[test]
    fn empty_table_misses() -> Result<()> {
        let bs = symbols_section(0, &[]);
        let table = SymbolTable::new(&bs, FORMAT_V2, 0)?;
        assert!(table.is_empty());
        assert!(matches!(table.reverse_lookup(&bs, "a"), Err(Error::LookupMiss(_))));
        assert_eq!(table.iter(&bs).count(), 0);
        Ok(())
    }

    #[test]
    fn exact_sample_boundary() -> Result<()> {
        let owned = numbered(SYMBOL_FACTOR * 2);
        let syms: Vec<&str> = owned.iter().map(String::as_str).collect();
        let bs = symbols_section(0, &syms);
        let table = SymbolTable::new(&bs, FORMAT_V2, 0)?;

        let last = syms[syms.len() - 1];
        assert_eq!(table.reverse_lookup(&bs, last)? as usize, syms.len() - 1);
        assert!(table.reverse_lookup(&bs, "sym9999").is_err());
        Ok(())
    }

    #[test]
    fn v1_references_are_file_offsets() -> Result<()> {
        let bs = symbols_section(5, &["a", "bb"]);
        let table = SymbolTable::new(&bs, FORMAT_V1, 5)?;

        // 4-byte length + 4-byte count precede the first symbol.
        assert_eq!(table.reverse_lookup(&bs, "a")?, 13);
        assert_eq!(table.reverse_lookup(&bs, "bb")?, 15);
        assert_eq!(table.lookup(&bs, 15)?, "bb");
        assert!(table.lookup(&bs, 2).is_err());
        Ok(())
    }

    #[test]
    fn iter_yields_all_in_order() -> Result<()> {
        let bs = symbols_section(3, &["a", "b", "c"]);
        let table = SymbolTable::new(&bs, FORMAT_V2, 3)?;
        let all = table.iter(&bs).collect::<Result<Vec<_>>>()?;
        assert_eq!(all, ["a", "b", "c"]);
        Ok(())
    }
}
