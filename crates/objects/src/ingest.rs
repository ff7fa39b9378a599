//! CSV ingest: stream rows through a sorter, materialize content-addressed
//! blocks, finalize a table object and its profile.

use std::io::Read;

use crate::profile::ProfileBuilder;
use crate::table::{encode_block, BLOCK_ROWS};
use crate::{save_block, save_table, save_table_profile, BlockRef, Digest, ObjectStore, Sorter, StoreError, Table};

#[derive(Debug, thiserror::Error)]
pub enum IngestError {
    /// CSV syntax error with a location the client can act on.
    #[error("parse error at row {row}, column {column}: {message}")]
    Csv {
        row: u64,
        column: u64,
        message: String,
    },
    #[error("primary key column {0:?} not found in CSV header")]
    MissingPkColumn(String),
    #[error("empty CSV: missing header row")]
    MissingHeader,
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl IngestError {
    fn from_csv(e: csv::Error) -> Self {
        let (row, column) = match e.position() {
            Some(pos) => (pos.line(), pos.byte()),
            None => (0, 0),
        };
        IngestError::Csv {
            row,
            column,
            message: match e.kind() {
                csv::ErrorKind::UnequalLengths { expected_len, len, .. } => {
                    format!("expected {expected_len} fields, got {len}")
                }
                other => format!("{other:?}"),
            },
        }
    }
}

/// Ingest a CSV stream and return the digest of the finalized table.
///
/// The first record is the header. `primary_key` names a subset of header
/// columns; rows are sorted by those columns. Blocks hold at most
/// [`BLOCK_ROWS`] rows each.
pub fn ingest_table(
    db: &dyn ObjectStore,
    sorter: &mut Sorter,
    input: impl Read,
    primary_key: &[String],
) -> Result<Digest, IngestError> {
    let mut rdr = csv::ReaderBuilder::new().has_headers(false).from_reader(input);
    let mut records = rdr.records();

    let header = match records.next() {
        Some(rec) => rec.map_err(IngestError::from_csv)?,
        None => return Err(IngestError::MissingHeader),
    };
    let columns: Vec<String> = header.iter().map(|s| s.to_string()).collect();

    let mut pk = Vec::with_capacity(primary_key.len());
    for name in primary_key {
        match columns.iter().position(|c| c == name) {
            Some(i) => pk.push(i as u32),
            None => return Err(IngestError::MissingPkColumn(name.clone())),
        }
    }

    for rec in records {
        let rec = rec.map_err(IngestError::from_csv)?;
        sorter.push(&pk, rec.iter().map(|s| s.to_string()).collect());
    }

    let mut profile = ProfileBuilder::new(&columns);
    let mut blocks: Vec<BlockRef> = Vec::new();
    let mut rows_count = 0u64;
    let mut chunk: Vec<Vec<String>> = Vec::with_capacity(BLOCK_ROWS);
    for row in sorter.sorted_rows() {
        profile.add_row(&row);
        rows_count += 1;
        chunk.push(row);
        if chunk.len() == BLOCK_ROWS {
            blocks.push(seal_block(db, &mut chunk)?);
        }
    }
    if !chunk.is_empty() {
        blocks.push(seal_block(db, &mut chunk)?);
    }

    let table = Table {
        columns,
        pk,
        rows_count,
        blocks,
    };
    let sum = save_table(db, &table)?;
    save_table_profile(db, &sum, &profile.build())?;
    Ok(sum)
}

fn seal_block(db: &dyn ObjectStore, chunk: &mut Vec<Vec<String>>) -> Result<BlockRef, IngestError> {
    let rows_count = chunk.len() as u32;
    let payload = encode_block(chunk);
    chunk.clear();
    let sum = save_block(db, &payload)?;
    Ok(BlockRef { sum, rows_count })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{get_table, get_table_profile, MemoryStore};

    const CSV: &str = "id,name\n3,carol\n1,alice\n2,bob\n";

    #[test]
    fn ingest_sorts_and_finalizes_table() {
        let db = MemoryStore::new();
        let mut sorter = Sorter::new(1024);
        let sum = ingest_table(&db, &mut sorter, CSV.as_bytes(), &["id".to_string()]).unwrap();

        let table = get_table(&db, &sum).unwrap();
        assert_eq!(table.columns, ["id", "name"]);
        assert_eq!(table.pk, [0]);
        assert_eq!(table.rows_count, 3);
        assert_eq!(table.blocks.len(), 1);

        let block = crate::get_block(&db, &table.blocks[0].sum).unwrap();
        let rows = crate::table::decode_block(&block).unwrap();
        assert_eq!(rows[0], ["1", "alice"]);
        assert_eq!(rows[2], ["3", "carol"]);

        let profile = get_table_profile(&db, &sum).unwrap();
        assert_eq!(profile.rows_count, 3);
        assert_eq!(profile.columns[0].min, Some(1.0));
        assert_eq!(profile.columns[0].max, Some(3.0));
    }

    #[test]
    fn identical_input_yields_identical_digest() {
        let db = MemoryStore::new();
        let mut sorter = Sorter::new(1024);
        let a = ingest_table(&db, &mut sorter, CSV.as_bytes(), &["id".to_string()]).unwrap();
        sorter.reset();
        let b = ingest_table(&db, &mut sorter, CSV.as_bytes(), &["id".to_string()]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn unknown_pk_column_rejected() {
        let db = MemoryStore::new();
        let mut sorter = Sorter::new(1024);
        let err = ingest_table(&db, &mut sorter, CSV.as_bytes(), &["missing".to_string()]).unwrap_err();
        assert!(matches!(err, IngestError::MissingPkColumn(_)));
    }

    #[test]
    fn ragged_row_reports_location() {
        let db = MemoryStore::new();
        let mut sorter = Sorter::new(1024);
        let err = ingest_table(
            &db,
            &mut sorter,
            "id,name\n1,alice\n2\n".as_bytes(),
            &[],
        )
        .unwrap_err();
        match err {
            IngestError::Csv { row, .. } => assert_eq!(row, 3),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn large_input_spans_blocks() {
        let db = MemoryStore::new();
        let mut sorter = Sorter::new(64 * 1024);
        let mut csv = String::from("id\n");
        for i in 0..600 {
            csv.push_str(&format!("{i:04}\n"));
        }
        let sum = ingest_table(&db, &mut sorter, csv.as_bytes(), &["id".to_string()]).unwrap();
        let table = get_table(&db, &sum).unwrap();
        assert_eq!(table.rows_count, 600);
        assert_eq!(table.blocks.len(), 3);
        assert_eq!(table.blocks[0].rows_count, 255);
        assert_eq!(table.blocks[2].rows_count, 90);
    }
}
