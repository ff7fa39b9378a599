//! Transaction handlers: create, describe, and the terminal commit/discard.

use axum::extract::{Path, State};
use axum::Json;
use uuid::Uuid;

use wrgld_api_types::{
    CreateTransactionRequest, CreateTransactionResponse, EventCommit, GetTransactionResponse,
    TxBranch, UpdateTransactionRequest, WebhookEvent,
};
use wrgld_store::{commit_transaction, discard_transaction, head_ref, RefError, TxStatus};

use crate::auth::Author;
use crate::error::ApiErr;
use crate::AppState;

/// `POST /transactions` — create, optionally importing a transaction
/// wholesale (id, begin, end, status) from a peer.
pub async fn create(
    State(state): State<AppState>,
    _author: Author,
    body: Option<Json<CreateTransactionRequest>>,
) -> Result<Json<CreateTransactionResponse>, ApiErr> {
    let req = body.map(|Json(req)| req).unwrap_or_default();
    let status = match req.status.as_deref() {
        None => None,
        Some("open") => Some(TxStatus::Open),
        Some("committed") => Some(TxStatus::Committed),
        Some("discarded") => Some(TxStatus::Discarded),
        Some(other) => {
            return Err(ApiErr::bad_request(format!("invalid status {other:?}")));
        }
    };
    let id = state
        .rs
        .create_transaction(req.id, req.begin, req.end, status)
        .map_err(|e| match e {
            RefError::DuplicateTx(id) => ApiErr::conflict(format!("transaction {id} already exists")),
            other => other.into(),
        })?;
    Ok(Json(CreateTransactionResponse { id }))
}

/// `GET /transactions/{id}/` — status plus per-branch staged sums and the
/// branches' current sums.
pub async fn describe(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<GetTransactionResponse>, ApiErr> {
    let id = parse_txid(&id)?;
    let tx = state.rs.get_transaction(id).map_err(tx_not_found)?;
    let mut branches = Vec::new();
    for (name, new_sum) in state.rs.transaction_refs(id)? {
        let current_sum = state.rs.get_head(&name)?;
        branches.push(TxBranch {
            name,
            current_sum,
            new_sum,
        });
    }
    Ok(Json(GetTransactionResponse {
        begin: tx.begin,
        end: tx.end,
        status: tx.status.to_string(),
        branches,
    }))
}

/// `POST /transactions/{id}/` — `{commit: true}` or `{discard: true}`.
pub async fn update(
    State(state): State<AppState>,
    Path(id): Path<String>,
    author: Author,
    Json(req): Json<UpdateTransactionRequest>,
) -> Result<Json<serde_json::Value>, ApiErr> {
    let id = parse_txid(&id)?;
    if req.commit == req.discard {
        return Err(ApiErr::bad_request(
            "must either discard or commit transaction",
        ));
    }
    if req.discard {
        discard_transaction(&state.rs, id).map_err(tx_update_err)?;
        return Ok(Json(serde_json::json!({})));
    }

    let committed = commit_transaction(state.db.as_ref(), &state.rs, id).map_err(tx_update_err)?;
    let mut sender = state.webhook_sender();
    sender.enqueue(WebhookEvent::Commit {
        transaction_id: Some(id),
        commits: committed
            .into_iter()
            .map(|c| EventCommit {
                sum: c.sum,
                ref_name: head_ref(&c.branch),
                message: c.message,
            })
            .collect(),
        author_name: author.name,
        author_email: author.email,
        time: chrono::Utc::now(),
    });
    sender.flush();
    Ok(Json(serde_json::json!({})))
}

fn parse_txid(s: &str) -> Result<Uuid, ApiErr> {
    Uuid::parse_str(s).map_err(|_| ApiErr::bad_request("invalid transaction id"))
}

fn tx_not_found(e: RefError) -> ApiErr {
    match e {
        RefError::TxNotFound(_) => ApiErr::not_found("transaction not found"),
        other => other.into(),
    }
}

fn tx_update_err(e: wrgld_store::TxError) -> ApiErr {
    match e {
        wrgld_store::TxError::Ref(RefError::TxNotFound(_)) => {
            ApiErr::not_found("transaction not found")
        }
        other => other.into(),
    }
}
