//! Packfile framing: an ordered stream of typed, content-addressed objects.
//!
//! Frame layout: `[tag u8][digest 16B][len u32 BE][payload]`, terminated by a
//! single zero tag. The digest travels with the frame so the receiving side
//! can verify payload integrity before storing anything. Profile frames are
//! the exception: a profile is addressed by the digest of the table it
//! describes, so its frame digest is a storage key rather than a checksum.

use std::io::{self, Read, Write};

use crate::{Digest, ObjectKind};

#[derive(Debug, thiserror::Error)]
pub enum PackfileError {
    #[error("unknown object tag {0}")]
    UnknownTag(u8),
    #[error("digest mismatch for {kind} frame: declared {declared}, computed {computed}")]
    DigestMismatch {
        kind: &'static str,
        declared: Digest,
        computed: Digest,
    },
    #[error("packfile truncated")]
    Truncated,
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub struct PackfileWriter<W: Write> {
    w: W,
}

impl<W: Write> PackfileWriter<W> {
    pub fn new(w: W) -> Self {
        PackfileWriter { w }
    }

    pub fn write_object(
        &mut self,
        kind: ObjectKind,
        sum: &Digest,
        payload: &[u8],
    ) -> Result<(), PackfileError> {
        self.w.write_all(&[kind.tag()])?;
        self.w.write_all(sum.as_bytes())?;
        self.w.write_all(&(payload.len() as u32).to_be_bytes())?;
        self.w.write_all(payload)?;
        Ok(())
    }

    /// Write the end-of-pack marker and return the inner writer.
    pub fn finish(mut self) -> Result<W, PackfileError> {
        self.w.write_all(&[0])?;
        self.w.flush()?;
        Ok(self.w)
    }
}

pub struct PackfileReader<R: Read> {
    r: R,
}

impl<R: Read> PackfileReader<R> {
    pub fn new(r: R) -> Self {
        PackfileReader { r }
    }

    /// Next verified frame, or `None` at the end-of-pack marker. A stream
    /// that ends without the marker is reported as truncated; a partial
    /// pack must never look complete.
    pub fn next_object(&mut self) -> Result<Option<(ObjectKind, Digest, Vec<u8>)>, PackfileError> {
        let mut tag = [0u8; 1];
        if let Err(e) = self.r.read_exact(&mut tag) {
            return if e.kind() == io::ErrorKind::UnexpectedEof {
                Err(PackfileError::Truncated)
            } else {
                Err(e.into())
            };
        }
        if tag[0] == 0 {
            return Ok(None);
        }
        let kind = ObjectKind::from_tag(tag[0]).ok_or(PackfileError::UnknownTag(tag[0]))?;
        let mut sum = [0u8; Digest::LEN];
        self.read_exact(&mut sum)?;
        let mut len = [0u8; 4];
        self.read_exact(&mut len)?;
        let mut payload = vec![0u8; u32::from_be_bytes(len) as usize];
        self.read_exact(&mut payload)?;

        let declared = Digest(sum);
        // Profile frames carry their table's digest as a key; everything
        // else is content-addressed and must hash to the declared digest.
        if kind != ObjectKind::Profile {
            let computed = Digest::of(&payload);
            if computed != declared {
                return Err(PackfileError::DigestMismatch {
                    kind: kind.as_str(),
                    declared,
                    computed,
                });
            }
        }
        Ok(Some((kind, declared, payload)))
    }

    fn read_exact(&mut self, buf: &mut [u8]) -> Result<(), PackfileError> {
        self.r.read_exact(buf).map_err(|e| {
            if e.kind() == io::ErrorKind::UnexpectedEof {
                PackfileError::Truncated
            } else {
                PackfileError::Io(e)
            }
        })
    }
}
