//! Receive-pack: ref-update preflight, table-have ACKs, packfile reception,
//! and the atomic ref apply.
//!
//! State machine: `greet → negotiate* → receiveObjects* → report`. A
//! precondition mismatch in greet short-circuits straight to report without
//! touching any ref.

use std::collections::BTreeMap;
use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use flate2::read::GzDecoder;
use uuid::Uuid;

use wrgld_api_types::{
    ReceivePackRequest, ReceivePackResponse, RefUpdate, WebhookEvent,
    COOKIE_RECEIVE_PACK_SESSION, CT_JSON, CT_PACKFILE,
};
use wrgld_objects::{graph, Digest, ObjectKind, ObjectReceiver, ObjectStore};
use wrgld_store::RefStore;

use crate::auth::Author;
use crate::cookies;
use crate::error::ApiErr;
use crate::webhook::WebhookSender;
use crate::AppState;

const ERR_REF_UPDATED: &str = "remote ref updated since checkout";
const ERR_DENY_DELETES: &str = "remote does not support deleting refs";
const ERR_DENY_NON_FF: &str = "remote does not support non-fast-forwards";
const ERR_COMMIT_MISSING: &str = "remote did not receive commit";

enum SessionState {
    Greet,
    Negotiate,
    ReceiveObjects,
}

pub struct ReceivePackSession {
    db: Arc<dyn ObjectStore>,
    rs: RefStore,
    author: Author,
    updates: BTreeMap<String, RefUpdate>,
    receiver: Option<ObjectReceiver>,
    state: SessionState,
}

enum Step {
    /// Intermediate response carrying table ACKs; session stays open.
    TableAcks(Vec<Digest>),
    /// Bare 200; the client must stream more pack data.
    Continue,
    /// Terminal per-ref report; session closes.
    Report(BTreeMap<String, RefUpdate>),
}

impl ReceivePackSession {
    fn new(state: &AppState, author: Author) -> Self {
        ReceivePackSession {
            db: state.db.clone(),
            rs: state.rs.clone(),
            author,
            updates: BTreeMap::new(),
            receiver: None,
            state: SessionState::Greet,
        }
    }

    fn advance(
        &mut self,
        state: &AppState,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Result<Step, ApiErr> {
        let content_type = headers
            .get(header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("");
        match self.state {
            SessionState::Greet => {
                if !content_type.contains(CT_JSON) {
                    return Err(ApiErr::bad_request("updates expected"));
                }
                let req = parse_request(body)?;
                self.greet(state, req)
            }
            SessionState::Negotiate => {
                if content_type == CT_PACKFILE {
                    self.state = SessionState::ReceiveObjects;
                    self.receive_objects(state, headers, body)
                } else if content_type.contains(CT_JSON) {
                    let req = parse_request(body)?;
                    Ok(Step::TableAcks(self.table_acks(&req)))
                } else {
                    Err(ApiErr::bad_request("unanticipated content-type"))
                }
            }
            SessionState::ReceiveObjects => {
                if content_type != CT_PACKFILE {
                    return Err(ApiErr::bad_request("packfile expected"));
                }
                self.receive_objects(state, headers, body)
            }
        }
    }

    fn greet(&mut self, state: &AppState, req: ReceivePackRequest) -> Result<Step, ApiErr> {
        self.updates = req.updates.clone();
        let mut wants = Vec::new();
        let mut outdated = false;
        for (refname, update) in self.updates.iter_mut() {
            let current = self.rs.get_ref(strip_refs_prefix(refname))?;
            if current != update.old_sum {
                outdated = true;
                update.err_msg = ERR_REF_UPDATED.to_string();
            }
            if let Some(sum) = update.new_sum {
                wants.push(sum);
            }
        }
        if outdated {
            return Ok(Step::Report(std::mem::take(&mut self.updates)));
        }
        if wants.is_empty() {
            // Pure deletes or a no-op: apply immediately.
            self.save_refs(state)?;
            return Ok(Step::Report(std::mem::take(&mut self.updates)));
        }
        self.receiver = Some(ObjectReceiver::new(self.db.clone(), wants));
        self.state = SessionState::Negotiate;
        Ok(Step::TableAcks(self.table_acks(&req)))
    }

    /// The subset of offered tables that already exist locally. The client
    /// skips resending those tables and their blocks.
    fn table_acks(&self, req: &ReceivePackRequest) -> Vec<Digest> {
        req.table_haves
            .iter()
            .filter(|sum| self.db.contains(ObjectKind::Table, sum))
            .copied()
            .collect()
    }

    fn receive_objects(
        &mut self,
        state: &AppState,
        headers: &HeaderMap,
        body: &Bytes,
    ) -> Result<Step, ApiErr> {
        let receiver = self
            .receiver
            .as_mut()
            .expect("receiver exists in receive state");
        let done = if is_gzip(headers) {
            receiver.receive(GzDecoder::new(body.as_ref()))
        } else {
            receiver.receive(body.as_ref())
        }
        .map_err(|e| ApiErr::bad_request(e.to_string()))?;
        if !done {
            return Ok(Step::Continue);
        }
        self.save_refs(state)?;
        Ok(Step::Report(std::mem::take(&mut self.updates)))
    }

    /// Apply ref updates with compare-and-set, append reflogs, emit events.
    /// Per-update failures land in `err_msg`; the rest still apply.
    fn save_refs(&mut self, state: &AppState) -> Result<(), ApiErr> {
        let mut sender = state.webhook_sender();
        let result = self.save_refs_inner(state, &mut sender);
        sender.flush();
        result
    }

    fn save_refs_inner(
        &mut self,
        state: &AppState,
        sender: &mut WebhookSender,
    ) -> Result<(), ApiErr> {
        for (refname, update) in self.updates.iter_mut() {
            if !update.err_msg.is_empty() {
                continue;
            }
            let name = strip_refs_prefix(refname).to_string();
            let current = self.rs.get_ref(&name)?;
            if current != update.old_sum {
                update.err_msg = ERR_REF_UPDATED.to_string();
                continue;
            }

            let Some(new_sum) = update.new_sum else {
                if state.config.receive.deny_deletes {
                    update.err_msg = ERR_DENY_DELETES.to_string();
                    continue;
                }
                self.rs.delete_ref(&name)?;
                sender.enqueue(WebhookEvent::RefUpdate {
                    old_sum: current,
                    sum: None,
                    ref_name: name,
                    action: "receive-pack".to_string(),
                    message: "delete ref".to_string(),
                    time: chrono::Utc::now(),
                });
                continue;
            };

            if !self.db.contains(ObjectKind::Commit, &new_sum) {
                update.err_msg = ERR_COMMIT_MISSING.to_string();
                continue;
            }
            let message = if let Some(old) = current {
                // Creation is always permitted; the ancestor check only
                // applies when the ref already points somewhere.
                if state.config.receive.deny_non_fast_forwards
                    && !graph::is_ancestor_of(self.db.as_ref(), &old, &new_sum)?
                {
                    update.err_msg = ERR_DENY_NON_FF.to_string();
                    continue;
                }
                "update ref"
            } else {
                "create ref"
            };

            match self.rs.save_ref(
                &name,
                current,
                new_sum,
                &self.author.name,
                &self.author.email,
                "receive-pack",
                message,
            ) {
                Ok(()) => sender.enqueue(WebhookEvent::RefUpdate {
                    old_sum: current,
                    sum: Some(new_sum),
                    ref_name: name,
                    action: "receive-pack".to_string(),
                    message: message.to_string(),
                    time: chrono::Utc::now(),
                }),
                Err(wrgld_store::RefError::CasFailed { .. }) => {
                    update.err_msg = ERR_REF_UPDATED.to_string();
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }
}

fn parse_request(body: &Bytes) -> Result<ReceivePackRequest, ApiErr> {
    serde_json::from_slice(body).map_err(|e| ApiErr::bad_request(format!("invalid request: {e}")))
}

fn strip_refs_prefix(refname: &str) -> &str {
    refname.strip_prefix("refs/").unwrap_or(refname)
}

fn is_gzip(headers: &HeaderMap) -> bool {
    headers
        .get(header::CONTENT_ENCODING)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.contains("gzip"))
        .unwrap_or(false)
}

pub async fn handle(
    State(state): State<AppState>,
    uri: axum::extract::OriginalUri,
    author: Author,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiErr> {
    let cookie_path = uri.path().to_string();
    let (id, session) = match cookies::session_id(&headers, COOKIE_RECEIVE_PACK_SESSION) {
        Some(id) => match state.rp_sessions.get(id) {
            Some(s) => (id, s),
            None => return Err(ApiErr::gone("receive-pack session expired")),
        },
        None => {
            let id = Uuid::new_v4();
            let session = state
                .rp_sessions
                .insert(id, ReceivePackSession::new(&state, author));
            (id, session)
        }
    };

    let mut guard = session.lock().await;
    let step = match guard.advance(&state, &headers, &body) {
        Ok(step) => step,
        Err(e) => {
            // A failed session leaves no committed refs; the client starts over.
            state.rp_sessions.remove(id);
            return Err(e);
        }
    };
    drop(guard);

    let set_cookie =
        || cookies::set_session_cookie(COOKIE_RECEIVE_PACK_SESSION, id, &cookie_path);
    match step {
        Step::TableAcks(acks) => Ok((
            StatusCode::OK,
            [(header::SET_COOKIE, set_cookie())],
            Json(ReceivePackResponse {
                updates: None,
                table_acks: Some(acks),
            }),
        )
            .into_response()),
        Step::Continue => {
            Ok((StatusCode::OK, [(header::SET_COOKIE, set_cookie())]).into_response())
        }
        Step::Report(updates) => {
            state.rp_sessions.remove(id);
            Ok((
                StatusCode::OK,
                [(
                    header::SET_COOKIE,
                    cookies::clear_session_cookie(COOKIE_RECEIVE_PACK_SESSION, id, &cookie_path),
                )],
                Json(ReceivePackResponse {
                    updates: Some(updates),
                    table_acks: None,
                }),
            )
                .into_response())
        }
    }
}
