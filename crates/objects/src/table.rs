use serde::{Deserialize, Serialize};

use crate::encode::{put_digest, put_str, put_u32, put_u64, DecodeError, Reader};
use crate::Digest;

/// Rows per block. Bounds block payload size and gives row-range reads a
/// cheap offset → block mapping.
pub const BLOCK_ROWS: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockRef {
    pub sum: Digest,
    pub rows_count: u32,
}

/// An immutable table: ordered columns, primary-key column indices, and the
/// digests of its constituent row blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Table {
    pub columns: Vec<String>,
    pub pk: Vec<u32>,
    pub rows_count: u64,
    pub blocks: Vec<BlockRef>,
}

impl Table {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::new();
        put_u32(&mut buf, self.columns.len() as u32);
        for c in &self.columns {
            put_str(&mut buf, c);
        }
        put_u32(&mut buf, self.pk.len() as u32);
        for i in &self.pk {
            put_u32(&mut buf, *i);
        }
        put_u64(&mut buf, self.rows_count);
        put_u32(&mut buf, self.blocks.len() as u32);
        for b in &self.blocks {
            put_digest(&mut buf, &b.sum);
            put_u32(&mut buf, b.rows_count);
        }
        buf
    }

    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        let mut r = Reader::new(payload);
        let n = r.u32()? as usize;
        let mut columns = Vec::with_capacity(n);
        for _ in 0..n {
            columns.push(r.str()?);
        }
        let n = r.u32()? as usize;
        let mut pk = Vec::with_capacity(n);
        for _ in 0..n {
            pk.push(r.u32()?);
        }
        let rows_count = r.u64()?;
        let n = r.u32()? as usize;
        let mut blocks = Vec::with_capacity(n);
        for _ in 0..n {
            let sum = r.digest()?;
            let rows_count = r.u32()?;
            blocks.push(BlockRef { sum, rows_count });
        }
        r.finish()?;
        Ok(Table {
            columns,
            pk,
            rows_count,
            blocks,
        })
    }

    pub fn sum(&self) -> Digest {
        Digest::of(&self.encode())
    }

    /// Primary-key column names, in key order.
    pub fn pk_columns(&self) -> Vec<&str> {
        self.pk.iter().map(|&i| self.columns[i as usize].as_str()).collect()
    }

    /// Block index and in-block row offset for an absolute row offset.
    pub fn locate_row(&self, offset: u64) -> Option<(usize, usize)> {
        let mut base = 0u64;
        for (i, b) in self.blocks.iter().enumerate() {
            if offset < base + b.rows_count as u64 {
                return Some((i, (offset - base) as usize));
            }
            base += b.rows_count as u64;
        }
        None
    }
}

/// Parse a stored block payload (header-less CSV) back into rows.
pub fn decode_block(payload: &[u8]) -> Result<Vec<Vec<String>>, csv::Error> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(payload);
    let mut rows = Vec::new();
    for rec in rdr.records() {
        let rec = rec?;
        rows.push(rec.iter().map(|s| s.to_string()).collect());
    }
    Ok(rows)
}

/// Encode rows as a header-less CSV block payload.
pub fn encode_block(rows: &[Vec<String>]) -> Vec<u8> {
    let mut w = csv::WriterBuilder::new().flexible(true).from_writer(Vec::new());
    for row in rows {
        // Writing into a Vec cannot fail.
        w.write_record(row).expect("csv write to Vec");
    }
    w.into_inner().expect("csv flush to Vec")
}
