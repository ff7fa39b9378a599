//! Length-prefixed binary encoding primitives for canonical object payloads.

use crate::Digest;

#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("unexpected end of object payload")]
    UnexpectedEof,
    #[error("invalid UTF-8 in object payload")]
    InvalidUtf8,
    #[error("invalid timestamp in object payload: {0}")]
    InvalidTime(String),
    #[error("trailing bytes after object payload")]
    TrailingBytes,
}

pub fn put_u32(buf: &mut Vec<u8>, v: u32) {
    buf.extend_from_slice(&v.to_be_bytes());
}

pub fn put_u64(buf: &mut Vec<u8>, v: u64) {
    buf.extend_from_slice(&v.to_be_bytes());
}

pub fn put_digest(buf: &mut Vec<u8>, d: &Digest) {
    buf.extend_from_slice(d.as_bytes());
}

pub fn put_str(buf: &mut Vec<u8>, s: &str) {
    put_u32(buf, s.len() as u32);
    buf.extend_from_slice(s.as_bytes());
}

/// Cursor over a canonical payload.
pub struct Reader<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Reader { buf, pos: 0 }
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], DecodeError> {
        if self.buf.len() - self.pos < n {
            return Err(DecodeError::UnexpectedEof);
        }
        let b = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(b)
    }

    pub fn u32(&mut self) -> Result<u32, DecodeError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn u64(&mut self) -> Result<u64, DecodeError> {
        let b = self.take(8)?;
        Ok(u64::from_be_bytes(b.try_into().unwrap()))
    }

    pub fn digest(&mut self) -> Result<Digest, DecodeError> {
        let b = self.take(Digest::LEN)?;
        Ok(Digest::from_slice(b).unwrap())
    }

    pub fn str(&mut self) -> Result<String, DecodeError> {
        let len = self.u32()? as usize;
        let b = self.take(len)?;
        String::from_utf8(b.to_vec()).map_err(|_| DecodeError::InvalidUtf8)
    }

    /// Every decoder ends with this so truncated or padded payloads are
    /// rejected rather than silently accepted under a fresh digest.
    pub fn finish(self) -> Result<(), DecodeError> {
        if self.pos != self.buf.len() {
            return Err(DecodeError::TrailingBytes);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_primitives() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 7);
        put_u64(&mut buf, u64::MAX - 1);
        put_str(&mut buf, "héllo");
        let d = Digest::of(b"x");
        put_digest(&mut buf, &d);

        let mut r = Reader::new(&buf);
        assert_eq!(r.u32().unwrap(), 7);
        assert_eq!(r.u64().unwrap(), u64::MAX - 1);
        assert_eq!(r.str().unwrap(), "héllo");
        assert_eq!(r.digest().unwrap(), d);
        r.finish().unwrap();
    }

    #[test]
    fn trailing_bytes_rejected() {
        let mut buf = Vec::new();
        put_u32(&mut buf, 1);
        buf.push(0xff);
        let mut r = Reader::new(&buf);
        r.u32().unwrap();
        assert!(matches!(r.finish(), Err(DecodeError::TrailingBytes)));
    }

    #[test]
    fn short_read_rejected() {
        let mut r = Reader::new(&[0, 0]);
        assert!(matches!(r.u32(), Err(DecodeError::UnexpectedEof)));
    }
}
