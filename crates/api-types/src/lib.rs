//! Request/response payloads for the wrgld HTTP API, shared between the
//! server and clients (including the integration tests). JSON field names
//! are camelCase on the wire.

use std::collections::BTreeMap;

use chrono::{DateTime, FixedOffset, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use wrgld_objects::Digest;

// ── Content types, cookies, headers ─────────────────────────────────────────

pub const CT_JSON: &str = "application/json";
pub const CT_PACKFILE: &str = "application/x-wrgl-packfile";
pub const CT_BLOCK: &str = "application/x-wrgl-block";
pub const CT_CSV: &str = "text/csv";

pub const COOKIE_UPLOAD_PACK_SESSION: &str = "Upload-Pack-Session";
pub const COOKIE_RECEIVE_PACK_SESSION: &str = "Receive-Pack-Session";

/// Pack session cookies live for three hours.
pub const SESSION_COOKIE_MAX_AGE: u64 = 3 * 3600;

pub const WEBHOOK_SIGNATURE_HEADER: &str = "X-Wrgl-Signature-256";

// ── Errors ──────────────────────────────────────────────────────────────────

/// Body of every error response: `{"error": ...}`, plus a structured
/// location for CSV parse failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub csv: Option<CsvLocation>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsvLocation {
    pub row: u64,
    pub column: u64,
}

// ── Commits, tables, refs ───────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TablePayload {
    pub sum: Digest,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub columns: Vec<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub pk: Vec<u32>,
    #[serde(default)]
    pub rows_count: u64,
    /// False when only the commit is present locally and its table is not.
    pub exist: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitPayload {
    pub sum: Digest,
    pub author_name: String,
    pub author_email: String,
    pub message: String,
    pub time: DateTime<FixedOffset>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub parents: Vec<Digest>,
    pub table: TablePayload,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefPayload {
    pub name: String,
    pub sum: Digest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefsResponse {
    pub refs: Vec<RefPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitsResponse {
    pub commits: Vec<CommitPayload>,
}

/// Response of `POST /commits`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResponse {
    pub sum: Digest,
    pub table: Digest,
}

// ── Pack negotiation ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadPackRequest {
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub wants: Vec<Digest>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub haves: Vec<Digest>,
    #[serde(default)]
    pub done: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub depth: Option<u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UploadPackResponse {
    #[serde(default)]
    pub acks: Vec<Digest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefUpdate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_sum: Option<Digest>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_sum: Option<Digest>,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub err_msg: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivePackRequest {
    #[serde(default)]
    pub updates: BTreeMap<String, RefUpdate>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub table_haves: Vec<Digest>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReceivePackResponse {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updates: Option<BTreeMap<String, RefUpdate>>,
    #[serde(default, skip_serializing_if = "Option::is_none", rename = "tableACKs")]
    pub table_acks: Option<Vec<Digest>>,
}

// ── Transactions ────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CreateTransactionRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub begin: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateTransactionResponse {
    pub id: Uuid,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TxBranch {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_sum: Option<Digest>,
    pub new_sum: Digest,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetTransactionResponse {
    pub begin: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end: Option<DateTime<Utc>>,
    pub status: String,
    #[serde(default)]
    pub branches: Vec<TxBranch>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateTransactionRequest {
    #[serde(default)]
    pub commit: bool,
    #[serde(default)]
    pub discard: bool,
}

// ── Diff ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RowDiff {
    pub pk: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_offset: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_offset: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiffResponse {
    pub table_sum: Digest,
    pub old_table_sum: Digest,
    pub columns: Vec<String>,
    pub old_columns: Vec<String>,
    pub pk: Vec<String>,
    pub old_pk: Vec<String>,
    /// True when the primary keys are incompatible; `row_diff` is empty then.
    #[serde(default)]
    pub pk_changed: bool,
    #[serde(default)]
    pub row_diff: Vec<RowDiff>,
}

// ── Webhooks ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WebhookEventType {
    Commit,
    RefUpdate,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventCommit {
    pub sum: Digest,
    #[serde(rename = "ref")]
    pub ref_name: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WebhookEvent {
    #[serde(rename_all = "camelCase")]
    Commit {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        transaction_id: Option<Uuid>,
        commits: Vec<EventCommit>,
        author_name: String,
        author_email: String,
        time: DateTime<Utc>,
    },
    #[serde(rename_all = "camelCase")]
    RefUpdate {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        old_sum: Option<Digest>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sum: Option<Digest>,
        #[serde(rename = "ref")]
        ref_name: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        action: String,
        #[serde(default, skip_serializing_if = "String::is_empty")]
        message: String,
        time: DateTime<Utc>,
    },
}

impl WebhookEvent {
    pub fn event_type(&self) -> WebhookEventType {
        match self {
            WebhookEvent::Commit { .. } => WebhookEventType::Commit,
            WebhookEvent::RefUpdate { .. } => WebhookEventType::RefUpdate,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WebhookPayload {
    pub events: Vec<WebhookEvent>,
}
