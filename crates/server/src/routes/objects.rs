use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use serde::Deserialize;

use wrgld_objects::{Digest, ObjectKind, ObjectStore};

use crate::error::ApiErr;
use crate::AppState;

#[derive(Deserialize)]
pub struct ObjectQuery {
    /// `commit`, `table`, `block`, or `profile`.
    #[serde(rename = "type")]
    pub kind: String,
    pub sum: String,
}

/// `GET /objects/?type=&sum=` — raw canonical object bytes, for clients that
/// fetch without pack negotiation.
pub async fn get_object(
    State(state): State<AppState>,
    Query(q): Query<ObjectQuery>,
) -> Result<Response, ApiErr> {
    let kind = ObjectKind::from_str(&q.kind)
        .ok_or_else(|| ApiErr::bad_request(format!("unknown object type {:?}", q.kind)))?;
    let sum = q
        .sum
        .parse::<Digest>()
        .map_err(|_| ApiErr::bad_request("invalid object digest"))?;
    let payload = state.db.get(kind, &sum)?;
    Ok((
        [
            (
                header::CONTENT_TYPE,
                "application/octet-stream".to_string(),
            ),
            state.cache_control_immutable(),
        ],
        payload,
    )
        .into_response())
}
