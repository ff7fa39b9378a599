//! Table read handlers: metadata, profile, block streams (CSV or the raw
//! binary block format), and row selection. The `/blocks/` and `/rows/`
//! root-addressed variants take the table digest as a query parameter.

use axum::extract::{Path, Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use wrgld_api_types::{TablePayload, CT_BLOCK, CT_CSV};
use wrgld_objects::{decode_block, get_block, get_table, get_table_profile, Digest, Table};

use crate::error::ApiErr;
use crate::routes::parse_hash;
use crate::AppState;

/// `GET /tables/{hash}/` — table metadata.
pub async fn get_table_handler(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, ApiErr> {
    let sum = parse_hash(&hash)?;
    let table = get_table(state.db.as_ref(), &sum)?;
    let payload = TablePayload {
        sum,
        columns: table.columns,
        pk: table.pk,
        rows_count: table.rows_count,
        exist: true,
    };
    Ok(([state.cache_control_immutable()], Json(payload)).into_response())
}

/// `GET /tables/{hash}/profile/`
pub async fn get_table_profile_handler(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, ApiErr> {
    let sum = parse_hash(&hash)?;
    let profile = get_table_profile(state.db.as_ref(), &sum)?;
    Ok(([state.cache_control_immutable()], Json(profile)).into_response())
}

#[derive(Deserialize)]
pub struct BlocksQuery {
    /// Inclusive start row offset.
    pub start: Option<u64>,
    /// Exclusive end row offset.
    pub end: Option<u64>,
    /// `csv` (default) or `bin`.
    pub format: Option<String>,
    pub with_header: Option<bool>,
}

// Flattening BlocksQuery here trips up query-string deserialization of the
// numeric fields, so the fields are spelled out.
#[derive(Deserialize)]
pub struct RootedBlocksQuery {
    pub table: String,
    pub start: Option<u64>,
    pub end: Option<u64>,
    pub format: Option<String>,
    pub with_header: Option<bool>,
}

#[derive(Deserialize)]
pub struct RowsQuery {
    /// Comma-separated row offsets.
    pub offsets: String,
}

#[derive(Deserialize)]
pub struct RootedRowsQuery {
    pub table: String,
    pub offsets: String,
}

/// `GET /tables/{hash}/blocks/?start=&end=&format=csv|bin&with_header=`
pub async fn get_table_blocks(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Query(q): Query<BlocksQuery>,
) -> Result<Response, ApiErr> {
    let sum = parse_hash(&hash)?;
    stream_blocks(&state, sum, q)
}

/// `GET /blocks/?table=<hex>&...` — root-addressed block stream.
pub async fn get_rooted_blocks(
    State(state): State<AppState>,
    Query(q): Query<RootedBlocksQuery>,
) -> Result<Response, ApiErr> {
    let sum = q
        .table
        .parse::<Digest>()
        .map_err(|_| ApiErr::bad_request("invalid table digest"))?;
    stream_blocks(
        &state,
        sum,
        BlocksQuery {
            start: q.start,
            end: q.end,
            format: q.format,
            with_header: q.with_header,
        },
    )
}

/// `GET /tables/{hash}/rows/?offsets=1,2,3`
pub async fn get_table_rows(
    State(state): State<AppState>,
    Path(hash): Path<String>,
    Query(q): Query<RowsQuery>,
) -> Result<Response, ApiErr> {
    let sum = parse_hash(&hash)?;
    select_rows(&state, sum, &q.offsets)
}

/// `GET /rows/?table=<hex>&offsets=...`
pub async fn get_rooted_rows(
    State(state): State<AppState>,
    Query(q): Query<RootedRowsQuery>,
) -> Result<Response, ApiErr> {
    let sum = q
        .table
        .parse::<Digest>()
        .map_err(|_| ApiErr::bad_request("invalid table digest"))?;
    select_rows(&state, sum, &q.offsets)
}

fn stream_blocks(state: &AppState, sum: Digest, q: BlocksQuery) -> Result<Response, ApiErr> {
    let db = state.db.as_ref();
    let table = get_table(db, &sum)?;
    let start = q.start.unwrap_or(0);
    let end = q.end.unwrap_or(table.rows_count).min(table.rows_count);
    if start > end {
        return Err(ApiErr::bad_request("start is after end"));
    }

    match q.format.as_deref().unwrap_or("csv") {
        "csv" => {
            let mut w = csv_writer();
            if q.with_header.unwrap_or(false) {
                w.write_record(&table.columns)
                    .map_err(ApiErr::from_internal("encoding csv"))?;
            }
            for_each_row(db, &table, start, end, |_, row| {
                w.write_record(row)
                    .map_err(ApiErr::from_internal("encoding csv"))
            })?;
            let body = w
                .into_inner()
                .map_err(ApiErr::from_internal("encoding csv"))?;
            Ok((
                [
                    (header::CONTENT_TYPE, CT_CSV.to_string()),
                    state.cache_control_immutable(),
                ],
                body,
            )
                .into_response())
        }
        // Raw stored block payloads; whole blocks overlapping the range.
        "bin" => {
            let mut body = Vec::new();
            let mut base = 0u64;
            for block in &table.blocks {
                let block_end = base + block.rows_count as u64;
                if block_end > start && base < end {
                    body.extend_from_slice(&get_block(db, &block.sum)?);
                }
                base = block_end;
            }
            Ok((
                [
                    (header::CONTENT_TYPE, CT_BLOCK.to_string()),
                    state.cache_control_immutable(),
                ],
                body,
            )
                .into_response())
        }
        other => Err(ApiErr::bad_request(format!("unknown format {other:?}"))),
    }
}

fn select_rows(state: &AppState, sum: Digest, offsets: &str) -> Result<Response, ApiErr> {
    let db = state.db.as_ref();
    let table = get_table(db, &sum)?;
    let mut wanted = Vec::new();
    for part in offsets.split(',').filter(|s| !s.is_empty()) {
        let off: u64 = part
            .trim()
            .parse()
            .map_err(|_| ApiErr::bad_request(format!("invalid row offset {part:?}")))?;
        if off >= table.rows_count {
            return Err(ApiErr::not_found(format!("row offset {off} out of range")));
        }
        wanted.push(off);
    }

    let mut w = csv_writer();
    for off in wanted {
        let (block_idx, in_block) = table
            .locate_row(off)
            .expect("offset bounds were checked above");
        let rows = decode_block(&get_block(db, &table.blocks[block_idx].sum)?)
            .map_err(ApiErr::from_internal("decoding block"))?;
        w.write_record(&rows[in_block])
            .map_err(ApiErr::from_internal("encoding csv"))?;
    }
    let body = w
        .into_inner()
        .map_err(ApiErr::from_internal("encoding csv"))?;
    Ok((
        [
            (header::CONTENT_TYPE, CT_CSV.to_string()),
            state.cache_control_immutable(),
        ],
        body,
    )
        .into_response())
}

fn csv_writer() -> csv::Writer<Vec<u8>> {
    csv::WriterBuilder::new().flexible(true).from_writer(Vec::new())
}

/// Invoke `f` with each `(offset, row)` in `[start, end)`, decoding only the
/// blocks that overlap the range.
fn for_each_row(
    db: &dyn wrgld_objects::ObjectStore,
    table: &Table,
    start: u64,
    end: u64,
    mut f: impl FnMut(u64, &[String]) -> Result<(), ApiErr>,
) -> Result<(), ApiErr> {
    let mut base = 0u64;
    for block in &table.blocks {
        let block_end = base + block.rows_count as u64;
        if block_end > start && base < end {
            let rows = decode_block(&get_block(db, &block.sum)?)
                .map_err(ApiErr::from_internal("decoding block"))?;
            for (i, row) in rows.iter().enumerate() {
                let off = base + i as u64;
                if off >= start && off < end {
                    f(off, row)?;
                }
            }
        }
        base = block_end;
    }
    Ok(())
}
