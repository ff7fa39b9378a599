use std::collections::{HashSet, VecDeque};

use axum::extract::{Path, Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use wrgld_api_types::CommitsResponse;
use wrgld_objects::Digest;

use crate::error::ApiErr;
use crate::routes::{commit_payload, parse_hash};
use crate::AppState;

/// `GET /commits/{hash}/` — commit JSON, immutable-cached.
pub async fn get_commit(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, ApiErr> {
    let sum = parse_hash(&hash)?;
    let payload = commit_payload(state.db.as_ref(), sum)?;
    Ok(([state.cache_control_immutable()], Json(payload)).into_response())
}

#[derive(Deserialize)]
pub struct ListCommitsQuery {
    /// Starting point: a branch name or a commit hex.
    pub head: Option<String>,
    /// Maximum entries returned.
    pub max: Option<usize>,
}

const DEFAULT_COMMITS_MAX: usize = 20;

/// `GET /commits/?head=<branch|hex>&max=<n>` — ancestry-ordered listing.
/// Without `head`, walks from every branch head.
pub async fn list_commits(
    State(state): State<AppState>,
    Query(q): Query<ListCommitsQuery>,
) -> Result<Json<CommitsResponse>, ApiErr> {
    let mut queue: VecDeque<Digest> = match q.head.as_deref() {
        Some(head) => {
            let sum = match head.parse::<Digest>() {
                Ok(sum) => Some(sum),
                Err(_) => state.rs.get_head(head)?,
            };
            let sum = sum.ok_or_else(|| ApiErr::not_found(format!("head {head} not found")))?;
            VecDeque::from([sum])
        }
        None => state
            .rs
            .list_refs(Some(wrgld_store::HEADS_PREFIX))?
            .into_iter()
            .map(|(_, sum)| sum)
            .collect(),
    };

    let max = q.max.unwrap_or(DEFAULT_COMMITS_MAX).clamp(1, 1000);
    let mut seen: HashSet<Digest> = queue.iter().copied().collect();
    let mut commits = Vec::new();
    while let Some(sum) = queue.pop_front() {
        if commits.len() >= max {
            break;
        }
        let payload = commit_payload(state.db.as_ref(), sum)?;
        for p in &payload.parents {
            if seen.insert(*p) {
                queue.push_back(*p);
            }
        }
        commits.push(payload);
    }
    Ok(Json(CommitsResponse { commits }))
}

/// `GET /commits/{hash}/profile/` — the profile of the commit's table.
pub async fn get_commit_profile(
    State(state): State<AppState>,
    Path(hash): Path<String>,
) -> Result<Response, ApiErr> {
    let sum = parse_hash(&hash)?;
    let commit = wrgld_objects::get_commit(state.db.as_ref(), &sum)?;
    let profile = wrgld_objects::get_table_profile(state.db.as_ref(), &commit.table)?;
    Ok(([state.cache_control_immutable()], Json(profile)).into_response())
}
