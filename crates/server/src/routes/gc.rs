use axum::extract::State;
use axum::Json;

use wrgld_store::{expire_transactions, prune_objects};

use crate::auth::Author;
use crate::error::ApiErr;
use crate::AppState;

/// `POST /gc/` — expire stale transactions, then prune unreferenced objects.
/// The two sweeps run serially; expiry must finish first so expired staging
/// stops pinning objects.
pub async fn run(
    State(state): State<AppState>,
    _author: Author,
) -> Result<Json<serde_json::Value>, ApiErr> {
    expire_transactions(&state.rs, state.config.transaction_ttl())?;
    prune_objects(state.db.as_ref(), &state.rs)?;
    Ok(Json(serde_json::json!({})))
}
