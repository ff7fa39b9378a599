//! `GET /diff/{new}/{old}/` — row-level diff between two commits' tables,
//! keyed by primary key, plus column/pk comparison.

use std::collections::HashMap;

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;

use wrgld_api_types::{DiffResponse, RowDiff};
use wrgld_objects::{decode_block, get_block, get_commit, get_table, ObjectStore, Table};

use crate::error::ApiErr;
use crate::routes::parse_hash;
use crate::AppState;

pub async fn diff(
    State(state): State<AppState>,
    Path((new_hash, old_hash)): Path<(String, String)>,
) -> Result<Response, ApiErr> {
    let db = state.db.as_ref();
    let new_commit = get_commit(db, &parse_hash(&new_hash)?)?;
    let old_commit = get_commit(db, &parse_hash(&old_hash)?)?;
    let new_table = get_table(db, &new_commit.table)?;
    let old_table = get_table(db, &old_commit.table)?;

    let pk: Vec<String> = new_table.pk_columns().iter().map(|s| s.to_string()).collect();
    let old_pk: Vec<String> = old_table.pk_columns().iter().map(|s| s.to_string()).collect();

    let mut resp = DiffResponse {
        table_sum: new_commit.table,
        old_table_sum: old_commit.table,
        columns: new_table.columns.clone(),
        old_columns: old_table.columns.clone(),
        pk: pk.clone(),
        old_pk: old_pk.clone(),
        pk_changed: pk != old_pk || pk.is_empty(),
        row_diff: Vec::new(),
    };
    // Row matching needs a shared primary key; without one, only the
    // column/pk comparison is meaningful.
    if resp.pk_changed {
        return Ok(([state.cache_control_immutable()], Json(resp)).into_response());
    }

    let new_rows = rows_by_pk(db, &new_table)?;
    let old_rows = rows_by_pk(db, &old_table)?;

    for (key, (new_offset, new_row)) in &new_rows {
        match old_rows.get(key) {
            None => resp.row_diff.push(RowDiff {
                pk: key.clone(),
                new_offset: Some(*new_offset),
                old_offset: None,
            }),
            Some((old_offset, old_row)) if old_row != new_row => resp.row_diff.push(RowDiff {
                pk: key.clone(),
                new_offset: Some(*new_offset),
                old_offset: Some(*old_offset),
            }),
            Some(_) => {}
        }
    }
    for (key, (old_offset, _)) in &old_rows {
        if !new_rows.contains_key(key) {
            resp.row_diff.push(RowDiff {
                pk: key.clone(),
                new_offset: None,
                old_offset: Some(*old_offset),
            });
        }
    }
    resp.row_diff.sort_by(|a, b| a.pk.cmp(&b.pk));

    Ok(([state.cache_control_immutable()], Json(resp)).into_response())
}

/// Map pk values → (offset, full row) across all blocks of a table.
fn rows_by_pk(
    db: &dyn ObjectStore,
    table: &Table,
) -> Result<HashMap<Vec<String>, (u64, Vec<String>)>, ApiErr> {
    let mut out = HashMap::new();
    let mut offset = 0u64;
    for block in &table.blocks {
        let rows = decode_block(&get_block(db, &block.sum)?)
            .map_err(ApiErr::from_internal("decoding block"))?;
        for row in rows {
            let key: Vec<String> = table
                .pk
                .iter()
                .map(|&i| row.get(i as usize).cloned().unwrap_or_default())
                .collect();
            out.insert(key, (offset, row));
            offset += 1;
        }
    }
    Ok(out)
}
