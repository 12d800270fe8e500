#![forbid(unsafe_code)]
//! Encoding, varint, and cursor utilities shared by the key and value codecs.

pub mod ord {
    //! Order-preserving encoders for key fields.

    use core::convert::TryInto;

    /// Width of an encoded `u64`.
    pub const U64_LEN: usize = core::mem::size_of::<u64>();
    /// Width of a string length prefix.
    pub const LEN_PREFIX: usize = core::mem::size_of::<u32>();

    /// Appends `v` in big-endian order.
    pub fn push_u64_be(dst: &mut Vec<u8>, v: u64) {
        dst.extend_from_slice(&v.to_be_bytes());
    }

    /// Decodes a u64 from big-endian byte order.
    pub fn get_u64_be(src: &[u8]) -> u64 {
        let head = src
            .get(..U64_LEN)
            .unwrap_or_else(|| panic!("u64 source shorter than 8 bytes (have {})", src.len()));
        let bytes: [u8; U64_LEN] = head.try_into().unwrap();
        u64::from_be_bytes(bytes)
    }

    /// Appends a u32-length-prefixed byte string.
    pub fn push_len_prefixed(dst: &mut Vec<u8>, s: &[u8]) {
        let len = s.len();
        assert!(
            len <= u32::MAX as usize,
            "key component too long (>{} bytes)",
            u32::MAX
        );
        dst.extend_from_slice(&(len as u32).to_be_bytes());
        dst.extend_from_slice(s);
    }

    /// Splits a length-prefixed byte string, returning the body and the bytes consumed.
    pub fn split_len_prefixed(src: &[u8]) -> (&[u8], usize) {
        assert!(
            src.len() >= LEN_PREFIX,
            "key component shorter than length prefix"
        );
        match try_split_len_prefixed(src) {
            Some(split) => split,
            None => panic!(
                "key component truncated (have {} bytes)",
                src.len() - LEN_PREFIX
            ),
        }
    }

    /// Like [`split_len_prefixed`], returning `None` on truncated input.
    pub fn try_split_len_prefixed(src: &[u8]) -> Option<(&[u8], usize)> {
        let prefix: [u8; LEN_PREFIX] = src.get(..LEN_PREFIX)?.try_into().ok()?;
        let end = LEN_PREFIX.checked_add(u32::from_be_bytes(prefix) as usize)?;
        Some((src.get(LEN_PREFIX..end)?, end))
    }

    /// Like [`split_len_prefixed`] but requires the body to be UTF-8.
    pub fn split_str_key(src: &[u8]) -> (&str, usize) {
        let (body, used) = split_len_prefixed(src);
        let s = core::str::from_utf8(body).expect("string key not valid UTF-8");
        (s, used)
    }
}

pub mod var {
    //! Unsigned varints and ZigZag signed integers.

    /// Encodes a u64 as an unsigned varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a varint, returning `None` on truncation or overflow.
    pub fn try_decode_u64(src: &[u8], off: &mut usize) -> Option<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src.get(*off)?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return None;
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Some(result);
            }
            shift += 7;
        }
        None
    }

    /// Encodes an i64 as a ZigZag-encoded varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        let zigzag = ((v << 1) ^ (v >> 63)) as u64;
        encode_u64(zigzag, out);
    }

    /// Decodes a ZigZag varint written by [`encode_i64`].
    pub fn try_decode_i64(src: &[u8], off: &mut usize) -> Option<i64> {
        let zigzag = try_decode_u64(src, off)?;
        Some(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }
}

pub mod buf {
    //! Fallible reading of stored values.

    use super::var;
    use crate::types::{DbError, Result};

    /// A fallible cursor for decoding stored values.
    pub struct Reader<'a> {
        buf: &'a [u8],
        off: usize,
        what: &'static str,
    }

    impl<'a> Reader<'a> {
        /// Starts reading `buf`; `what` names the record kind in error messages.
        pub fn new(buf: &'a [u8], what: &'static str) -> Self {
            Self { buf, off: 0, what }
        }

        fn corrupt(&self, detail: &str) -> DbError {
            DbError::Corruption(format!("{}: {} at offset {}", self.what, detail, self.off))
        }

        /// Reads one byte.
        pub fn u8(&mut self) -> Result<u8> {
            let b = *self
                .buf
                .get(self.off)
                .ok_or_else(|| self.corrupt("truncated byte"))?;
            self.off += 1;
            Ok(b)
        }

        /// Reads an unsigned varint.
        pub fn var_u64(&mut self) -> Result<u64> {
            let mut off = self.off;
            let v = var::try_decode_u64(self.buf, &mut off)
                .ok_or_else(|| self.corrupt("bad varint"))?;
            self.off = off;
            Ok(v)
        }

        /// Reads a ZigZag varint.
        pub fn var_i64(&mut self) -> Result<i64> {
            let mut off = self.off;
            let v = var::try_decode_i64(self.buf, &mut off)
                .ok_or_else(|| self.corrupt("bad varint"))?;
            self.off = off;
            Ok(v)
        }

        /// Reads a varint that must fit a `u32`.
        pub fn var_u32(&mut self) -> Result<u32> {
            let v = self.var_u64()?;
            u32::try_from(v).map_err(|_| self.corrupt("u32 out of range"))
        }

        /// Reads a varint length followed by that many bytes.
        pub fn bytes(&mut self) -> Result<&'a [u8]> {
            let len = self.var_u64()? as usize;
            self.fixed(len)
        }

        /// Reads exactly `n` bytes.
        pub fn fixed(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .filter(|end| *end <= self.buf.len())
                .ok_or_else(|| self.corrupt("truncated field"))?;
            let slice = &self.buf[self.off..end];
            self.off = end;
            Ok(slice)
        }

        /// Reads a length-prefixed UTF-8 string.
        pub fn string(&mut self) -> Result<String> {
            let raw = self.bytes()?;
            String::from_utf8(raw.to_vec()).map_err(|_| self.corrupt("invalid UTF-8"))
        }

        /// Fails unless every byte has been consumed.
        pub fn finish(self) -> Result<()> {
            if self.off != self.buf.len() {
                return Err(self.corrupt("trailing bytes"));
            }
            Ok(())
        }

        /// Returns the number of bytes remaining.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    /// Appends a varint length followed by `bytes`.
    pub fn put_bytes(out: &mut Vec<u8>, bytes: &[u8]) {
        var::encode_u64(bytes.len() as u64, out);
        out.extend_from_slice(bytes);
    }
}
