use axum::extract::{Path, Query, State};
use axum::Json;
use serde::Deserialize;

use wrgld_api_types::{CommitPayload, RefPayload, RefsResponse};

use crate::error::ApiErr;
use crate::routes::commit_payload;
use crate::AppState;

#[derive(Deserialize)]
pub struct ListRefsQuery {
    /// Name-prefix filter, e.g. `heads/`.
    pub prefix: Option<String>,
}

/// `GET /refs/` — list refs, optionally filtered by name prefix.
pub async fn list_refs(
    State(state): State<AppState>,
    Query(q): Query<ListRefsQuery>,
) -> Result<Json<RefsResponse>, ApiErr> {
    let refs = state
        .rs
        .list_refs(q.prefix.as_deref())?
        .into_iter()
        .map(|(name, sum)| RefPayload { name, sum })
        .collect();
    Ok(Json(RefsResponse { refs }))
}

/// `GET /refs/heads/{branch}` — the branch head, materialized with table
/// metadata.
pub async fn get_head(
    State(state): State<AppState>,
    Path(branch): Path<String>,
) -> Result<Json<CommitPayload>, ApiErr> {
    let sum = state
        .rs
        .get_head(&branch)?
        .ok_or_else(|| ApiErr::not_found(format!("branch {branch} not found")))?;
    Ok(Json(commit_payload(state.db.as_ref(), sum)?))
}
