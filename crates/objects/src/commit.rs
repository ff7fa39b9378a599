use chrono::{DateTime, FixedOffset, SecondsFormat};
use serde::{Deserialize, Serialize};

use crate::encode::{put_digest, put_str, put_u32, DecodeError, Reader};
use crate::Digest;

/// An immutable commit. Its digest is the Blake2b-16 of [`Commit::encode`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    pub table: Digest,
    pub parents: Vec<Digest>,
    pub message: String,
    pub time: DateTime<FixedOffset>,
    pub author_name: String,
    pub author_email: String,
}

impl Commit {
    /// Canonical encoding. Field order is part of the identity of every
    /// commit already persisted; never reorder.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(96 + self.message.len());
        put_digest(&mut buf, &self.table);
        put_u32(&mut buf, self.parents.len() as u32);
        for p in &self.parents {
            put_digest(&mut buf, p);
        }
        put_str(&mut buf, &self.author_name);
        put_str(&mut buf, &self.author_email);
        put_str(&mut buf, &self.message);
        put_str(&mut buf, &self.time.to_rfc3339_opts(SecondsFormat::Secs, true));
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        let table = r.digest()?;
        let n = r.u32()? as usize;
        let mut parents = Vec::with_capacity(n);
        for _ in 0..n {
            parents.push(r.digest()?);
        }
        let author_name = r.str()?;
        let author_email = r.str()?;
        let message = r.str()?;
        let ts = r.str()?;
        r.finish()?;
        let time = DateTime::parse_from_rfc3339(&ts).map_err(|e| DecodeError::InvalidTime(e.to_string()))?;
        Ok(Commit {
            table,
            parents,
            message,
            time,
            author_name,
            author_email,
        })
    }

    pub fn sum(&self) -> Digest {
        Digest::of(&self.encode())
    }
}
