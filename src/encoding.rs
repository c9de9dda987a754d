//! Byte-level encoding shared by the writer and the reader.
//!
//! Multi-byte integers are big-endian, variable-length integers follow the
//! LEB128 layout (signed values zig-zag encoded) and every checksum is a
//! CRC32 over the Castagnoli polynomial.

use crc::{Crc, CRC_32_ISCSI};

use crate::{Error, Result};

/// CRC32 with the Castagnoli polynomial. The table is computed at compile time.
pub static CASTAGNOLI: Crc<u32> = Crc::<u32>::new(&CRC_32_ISCSI);

pub const CRC_LEN: usize = 4;
pub const MAX_VARINT_LEN64: usize = 10;

pub fn crc32(bytes: &[u8]) -> u32 {
    CASTAGNOLI.checksum(bytes)
}

#[inline]
pub(crate) fn be32(bytes: &[u8]) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[..4]);
    u32::from_be_bytes(buf)
}

#[inline]
pub(crate) fn be64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_be_bytes(buf)
}

/// Aligns a value up to the nearest multiple of `align`.
#[inline]
pub(crate) fn align_up(value: u64, align: u64) -> u64 {
    if align == 0 {
        return value;
    }
    value.div_ceil(align) * align
}

/// Growable encoding buffer. Owners reuse one across calls via [`Encbuf::reset`].
#[derive(Debug, Default)]
pub struct Encbuf {
    b: Vec<u8>,
}

impl Encbuf {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            b: Vec::with_capacity(capacity),
        }
    }

    pub fn reset(&mut self) {
        self.b.clear();
    }

    pub fn get(&self) -> &[u8] {
        &self.b
    }

    pub fn len(&self) -> usize {
        self.b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.b.is_empty()
    }

    pub fn put_bytes(&mut self, bytes: &[u8]) {
        self.b.extend_from_slice(bytes);
    }

    pub fn put_byte(&mut self, byte: u8) {
        self.b.push(byte);
    }

    pub fn put_be32(&mut self, x: u32) {
        self.b.extend_from_slice(&x.to_be_bytes());
    }

    pub fn put_be64(&mut self, x: u64) {
        self.b.extend_from_slice(&x.to_be_bytes());
    }

    pub fn put_uvarint(&mut self, mut x: u64) {
        while x >= 0x80 {
            self.b.push((x as u8) | 0x80);
            x >>= 7;
        }
        self.b.push(x as u8);
    }

    pub fn put_varint(&mut self, x: i64) {
        let mut ux = (x as u64) << 1;
        if x < 0 {
            ux = !ux;
        }
        self.put_uvarint(ux);
    }

    pub fn put_uvarint_bytes(&mut self, bytes: &[u8]) {
        self.put_uvarint(bytes.len() as u64);
        self.put_bytes(bytes);
    }

    pub fn put_uvarint_str(&mut self, s: &str) {
        self.put_uvarint_bytes(s.as_bytes());
    }

    /// Appends the CRC32 of the current contents.
    pub fn put_hash(&mut self) {
        let sum = crc32(&self.b);
        self.put_be32(sum);
    }
}

/// Decodes a uvarint from the front of `bytes`, returning the value and the
/// number of bytes consumed.
pub fn read_uvarint(bytes: &[u8]) -> Result<(u64, usize)> {
    let mut x = 0u64;
    let mut shift = 0u32;
    for (i, &byte) in bytes.iter().enumerate() {
        if i == MAX_VARINT_LEN64 {
            return Err(Error::corrupt("varint overflows a 64-bit integer"));
        }
        if byte < 0x80 {
            if i == MAX_VARINT_LEN64 - 1 && byte > 1 {
                return Err(Error::corrupt("varint overflows a 64-bit integer"));
            }
            return Ok((x | (u64::from(byte) << shift), i + 1));
        }
        x |= u64::from(byte & 0x7f) << shift;
        shift += 7;
    }
    Err(Error::corrupt("invalid size"))
}

/// Read cursor over an encoded byte range.
#[derive(Debug, Clone, Copy)]
pub struct Decbuf<'a> {
    b: &'a [u8],
}

impl<'a> Decbuf<'a> {
    pub fn new(b: &'a [u8]) -> Self {
        Self { b }
    }

    /// Opens a `BE32 len | payload | BE32 crc` frame at `off`. The checksum is
    /// only verified when `verify` is set.
    pub fn at(bs: &'a [u8], off: usize, verify: bool) -> Result<Self> {
        let len_end = off
            .checked_add(4)
            .filter(|end| *end <= bs.len())
            .ok_or_else(|| Error::corrupt(format!("invalid size reading frame length at {off}")))?;
        let len = be32(&bs[off..len_end]) as usize;
        Self::framed(bs, len_end, len, verify)
    }

    /// Opens a `uvarint len | payload | BE32 crc` frame at `off`, verifying the
    /// checksum.
    pub fn uvarint_at(bs: &'a [u8], off: usize) -> Result<Self> {
        if off >= bs.len() {
            return Err(Error::corrupt(format!("invalid size reading frame at {off}")));
        }
        let (len, n) = read_uvarint(&bs[off..])?;
        let len = usize::try_from(len).map_err(|_| Error::corrupt("frame length overflow"))?;
        Self::framed(bs, off + n, len, true)
    }

    fn framed(bs: &'a [u8], start: usize, len: usize, verify: bool) -> Result<Self> {
        let end = start
            .checked_add(len)
            .filter(|end| end.saturating_add(CRC_LEN) <= bs.len())
            .ok_or_else(|| Error::corrupt(format!("invalid size for frame of {len} bytes at {start}")))?;
        let payload = &bs[start..end];
        if verify {
            let expected = be32(&bs[end..end + CRC_LEN]);
            let actual = crc32(payload);
            if expected != actual {
                return Err(Error::ChecksumMismatch { expected, actual });
            }
        }
        Ok(Self { b: payload })
    }

    pub fn len(&self) -> usize {
        self.b.len()
    }

    pub fn is_empty(&self) -> bool {
        self.b.is_empty()
    }

    /// Remaining undecoded bytes.
    pub fn get(&self) -> &'a [u8] {
        self.b
    }

    pub fn skip(&mut self, n: usize) -> Result<()> {
        if n > self.b.len() {
            return Err(Error::corrupt(format!(
                "invalid size: skip {n} with {} remaining",
                self.b.len()
            )));
        }
        self.b = &self.b[n..];
        Ok(())
    }

    /// Skips zero bytes used as alignment padding.
    pub fn consume_padding(&mut self) {
        let zeros = self.b.iter().take_while(|byte| **byte == 0).count();
        self.b = &self.b[zeros..];
    }

    pub fn byte(&mut self) -> Result<u8> {
        let (&first, rest) = self
            .b
            .split_first()
            .ok_or_else(|| Error::corrupt("invalid size reading byte"))?;
        self.b = rest;
        Ok(first)
    }

    pub fn be32(&mut self) -> Result<u32> {
        if self.b.len() < 4 {
            return Err(Error::corrupt("invalid size reading be32"));
        }
        let x = be32(self.b);
        self.b = &self.b[4..];
        Ok(x)
    }

    pub fn be64(&mut self) -> Result<u64> {
        if self.b.len() < 8 {
            return Err(Error::corrupt("invalid size reading be64"));
        }
        let x = be64(self.b);
        self.b = &self.b[8..];
        Ok(x)
    }

    pub fn uvarint64(&mut self) -> Result<u64> {
        let (x, n) = read_uvarint(self.b)?;
        self.b = &self.b[n..];
        Ok(x)
    }

    pub fn uvarint(&mut self) -> Result<usize> {
        let x = self.uvarint64()?;
        usize::try_from(x).map_err(|_| Error::corrupt("uvarint overflows usize"))
    }

    pub fn uvarint32(&mut self) -> Result<u32> {
        let x = self.uvarint64()?;
        u32::try_from(x).map_err(|_| Error::corrupt("uvarint overflows u32"))
    }

    pub fn varint64(&mut self) -> Result<i64> {
        let ux = self.uvarint64()?;
        let mut x = (ux >> 1) as i64;
        if ux & 1 != 0 {
            x = !x;
        }
        Ok(x)
    }

    pub fn uvarint_bytes(&mut self) -> Result<&'a [u8]> {
        let len = self.uvarint()?;
        if len > self.b.len() {
            return Err(Error::corrupt("invalid size reading uvarint-prefixed bytes"));
        }
        let (head, rest) = self.b.split_at(len);
        self.b = rest;
        Ok(head)
    }

    pub fn uvarint_str(&mut self) -> Result<&'a str> {
        let bytes = self.uvarint_bytes()?;
        std::str::from_utf8(bytes).map_err(|_| Error::corrupt("string is not valid utf-8"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn castagnoli_check_value() {
        assert_eq!(crc32(b"123456789"), 0xE306_9283);
    }

    #[test]
    fn varints_decode_what_was_encoded() -> Result<()> {
        let mut enc = Encbuf::default();
        let unsigned = [0u64, 1, 127, 128, 300, u32::MAX as u64, u64::MAX];
        let signed = [0i64, -1, 1, -64, 64, i64::MIN, i64::MAX];
        for x in unsigned {
            enc.put_uvarint(x);
        }
        for x in signed {
            enc.put_varint(x);
        }

        let mut dec = Decbuf::new(enc.get());
        for x in unsigned {
            assert_eq!(dec.uvarint64()?, x);
        }
        for x in signed {
            assert_eq!(dec.varint64()?, x);
        }
        assert!(dec.is_empty());
        Ok(())
    }

    #[test]
    fn truncated_varint_is_corrupt() {
        let mut dec = Decbuf::new(&[0x80, 0x80]);
        assert!(matches!(dec.uvarint64(), Err(Error::Corrupt(_))));
    }

    #[test]
    fn framed_payload_checks_crc() -> Result<()> {
        let mut payload = Encbuf::default();
        payload.put_uvarint_str("hello");
        let mut frame = Encbuf::default();
        frame.put_be32(payload.len() as u32);
        frame.put_bytes(payload.get());
        frame.put_be32(crc32(payload.get()));

        let mut bytes = frame.get().to_vec();
        let mut dec = Decbuf::at(&bytes, 0, true)?;
        assert_eq!(dec.uvarint_str()?, "hello");

        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        assert!(matches!(
            Decbuf::at(&bytes, 0, true),
            Err(Error::ChecksumMismatch { .. })
        ));
        assert!(Decbuf::at(&bytes, 0, false).is_ok());
        Ok(())
    }

    #[test]
    fn consume_padding_skips_zeros_only() -> Result<()> {
        let mut dec = Decbuf::new(&[0, 0, 0, 5, 0]);
        dec.consume_padding();
        assert_eq!(dec.byte()?, 5);
        assert_eq!(dec.len(), 1);
        Ok(())
    }

    #[test]
    fn align_up_rounds_to_multiple() {
        assert_eq!(align_up(0, 16), 0);
        assert_eq!(align_up(5, 16), 16);
        assert_eq!(align_up(32, 16), 32);
        assert_eq!(align_up(33, 4), 36);
    }
}
