//! `POST /commits` — multipart CSV ingest producing a commit, then either a
//! branch advance or a transaction staging.

use std::io::Read;
use std::sync::LazyLock;

use axum::extract::multipart::{Multipart, MultipartRejection};
use axum::extract::State;
use axum::Json;
use flate2::read::GzDecoder;
use regex::Regex;
use uuid::Uuid;

use wrgld_api_types::{CommitResponse, EventCommit, WebhookEvent};
use wrgld_objects::{ingest::ingest_table, save_commit, Commit};
use wrgld_store::{head_ref, RefError};

use crate::auth::Author;
use crate::error::ApiErr;
use crate::AppState;

static BRANCH_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[-_0-9A-Za-z]+$").expect("branch pattern compiles"));

#[derive(Default)]
struct CommitForm {
    branch: String,
    message: String,
    primary_key: Vec<String>,
    txid: Option<String>,
    file: Option<(String, Vec<u8>)>,
}

async fn parse_form(mut multipart: Multipart) -> Result<CommitForm, ApiErr> {
    let mut form = CommitForm::default();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiErr::bad_request(format!("invalid multipart form: {e}")))?
    {
        let name = field.name().unwrap_or("").to_string();
        match name.as_str() {
            "branch" => form.branch = field.text().await.unwrap_or_default(),
            "message" => form.message = field.text().await.unwrap_or_default(),
            "primaryKey" => {
                let text = field.text().await.unwrap_or_default();
                if !text.is_empty() {
                    form.primary_key = text.split(',').map(|s| s.to_string()).collect();
                }
            }
            "txid" => form.txid = Some(field.text().await.unwrap_or_default()),
            "file" => {
                let filename = field.file_name().unwrap_or("").to_string();
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ApiErr::bad_request(format!("reading file field: {e}")))?;
                form.file = Some((filename, bytes.to_vec()));
            }
            _ => {}
        }
    }
    Ok(form)
}

pub async fn create_commit(
    State(state): State<AppState>,
    author: Author,
    multipart: Result<Multipart, MultipartRejection>,
) -> Result<Json<CommitResponse>, ApiErr> {
    let multipart =
        multipart.map_err(|_| ApiErr::unsupported_media_type("multipart form expected"))?;
    let form = parse_form(multipart).await?;

    if form.branch.is_empty() {
        return Err(ApiErr::bad_request("missing branch name"));
    }
    if !BRANCH_PATTERN.is_match(&form.branch) {
        return Err(ApiErr::bad_request("invalid branch name"));
    }
    if form.message.is_empty() {
        return Err(ApiErr::bad_request("missing message"));
    }
    let Some((filename, file)) = form.file else {
        return Err(ApiErr::bad_request("missing file"));
    };

    let txid = match form.txid.as_deref() {
        Some(s) => {
            let id = Uuid::parse_str(s).map_err(|_| ApiErr::bad_request("invalid txid"))?;
            // Surface unknown transactions before doing any ingest work.
            state.rs.get_transaction(id).map_err(|e| match e {
                RefError::TxNotFound(_) => ApiErr::not_found("transaction not found"),
                other => other.into(),
            })?;
            Some(id)
        }
        None => None,
    };

    // Gzipped uploads are detected by filename, matching the CLI's behavior.
    let csv: Box<dyn Read + Send> = if filename.ends_with(".gz") {
        Box::new(GzDecoder::new(std::io::Cursor::new(file)))
    } else {
        Box::new(std::io::Cursor::new(file))
    };

    let mut sorter = state.sorters.get();
    let result = ingest_table(state.db.as_ref(), &mut sorter, csv, &form.primary_key);
    state.sorters.put(sorter);
    let table = result?;

    let parent = state.rs.get_head(&form.branch)?;
    let commit = Commit {
        table,
        parents: parent.into_iter().collect(),
        message: form.message.clone(),
        time: chrono::Utc::now().fixed_offset(),
        author_name: author.name.clone(),
        author_email: author.email.clone(),
    };
    let sum = save_commit(state.db.as_ref(), &commit)?;

    match txid {
        Some(id) => {
            // Staged under the transaction; the branch moves at tx commit.
            state.rs.save_transaction_ref(id, &form.branch, sum)?;
        }
        None => {
            state.rs.save_ref(
                &head_ref(&form.branch),
                parent,
                sum,
                &author.name,
                &author.email,
                "commit",
                &commit.message,
            )?;
            let mut sender = state.webhook_sender();
            sender.enqueue(WebhookEvent::Commit {
                transaction_id: None,
                commits: vec![EventCommit {
                    sum,
                    ref_name: head_ref(&form.branch),
                    message: commit.message.clone(),
                }],
                author_name: author.name,
                author_email: author.email,
                time: chrono::Utc::now(),
            });
            sender.flush();
        }
    }

    Ok(Json(CommitResponse { sum, table }))
}
