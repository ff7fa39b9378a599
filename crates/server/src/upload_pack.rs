//! Upload-pack: multi-turn wants/haves negotiation ending in a packfile of
//! exactly the objects the client is missing.
//!
//! State machine: `greet → negotiate* → send pack`. The session resumes
//! across requests via the `Upload-Pack-Session` cookie; the terminal
//! response clears it.

use std::collections::HashSet;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use uuid::Uuid;

use wrgld_api_types::{
    UploadPackRequest, UploadPackResponse, COOKIE_UPLOAD_PACK_SESSION, CT_JSON, CT_PACKFILE,
};
use wrgld_objects::{graph, Digest, ObjectStore, PackfileWriter};

use crate::cookies;
use crate::error::ApiErr;
use crate::AppState;

/// Haves rounds accepted before the server forces pack transmission.
const NEGOTIATION_ROUND_CAP: u32 = 32;

enum SessionState {
    Greet,
    Negotiate {
        wants: Vec<Digest>,
        wants_closure: HashSet<Digest>,
        common: Vec<Digest>,
        depth: Option<u32>,
        rounds: u32,
    },
}

pub struct UploadPackSession {
    state: SessionState,
}

enum Step {
    Acks(Vec<Digest>),
    Pack(Vec<u8>),
}

impl UploadPackSession {
    fn new() -> Self {
        UploadPackSession {
            state: SessionState::Greet,
        }
    }

    fn advance(&mut self, state: &AppState, req: UploadPackRequest) -> Result<Step, ApiErr> {
        if let SessionState::Greet = self.state {
            // Empty wants: nothing to negotiate, close with an empty pack.
            if req.wants.is_empty() {
                return Ok(Step::Pack(write_pack(state, &[], &HashSet::new(), None)?));
            }
            // Unknown wants surface as 404 via the store error mapping.
            let wants_closure =
                graph::reachable_commits(state.db.as_ref(), &req.wants, req.depth)?;
            self.state = SessionState::Negotiate {
                wants: req.wants.clone(),
                wants_closure,
                common: Vec::new(),
                depth: req.depth,
                rounds: 0,
            };
        }

        let SessionState::Negotiate {
            wants,
            wants_closure,
            common,
            depth,
            rounds,
        } = &mut self.state
        else {
            unreachable!("greet always transitions to negotiate");
        };

        let mut acks = Vec::new();
        for have in &req.haves {
            if wants_closure.contains(have) {
                if !common.contains(have) {
                    common.push(*have);
                }
                acks.push(*have);
            }
        }
        *rounds += 1;

        // The client signals completion with `done`; an exhausted client
        // (no more haves) or the round cap also end negotiation.
        if req.done || req.haves.is_empty() || *rounds >= NEGOTIATION_ROUND_CAP {
            let common_closure =
                graph::reachable_known_commits(state.db.as_ref(), common.as_slice())?;
            let pack = write_pack(state, wants.as_slice(), &common_closure, *depth)?;
            return Ok(Step::Pack(pack));
        }
        Ok(Step::Acks(acks))
    }
}

fn write_pack(
    state: &AppState,
    wants: &[Digest],
    common: &HashSet<Digest>,
    depth: Option<u32>,
) -> Result<Vec<u8>, ApiErr> {
    let db = state.db.as_ref();
    let objects = graph::pack_objects(db, wants, common, depth)?;
    let mut w = PackfileWriter::new(Vec::new());
    for (kind, sum) in objects {
        let payload = db.get(kind, &sum)?;
        w.write_object(kind, &sum, &payload)
            .map_err(ApiErr::from_internal("writing packfile"))?;
    }
    w.finish().map_err(ApiErr::from_internal("writing packfile"))
}

pub async fn handle(
    State(state): State<AppState>,
    uri: axum::extract::OriginalUri,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, ApiErr> {
    let cookie_path = uri.path().to_string();
    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");
    if !content_type.contains(CT_JSON) {
        return Err(ApiErr::unsupported_media_type("JSON request expected"));
    }
    let req: UploadPackRequest = serde_json::from_slice(&body)
        .map_err(|e| ApiErr::bad_request(format!("invalid request: {e}")))?;

    let (id, session) = match cookies::session_id(&headers, COOKIE_UPLOAD_PACK_SESSION) {
        Some(id) => match state.up_sessions.get(id) {
            Some(s) => (id, s),
            None => return Err(ApiErr::gone("upload-pack session expired")),
        },
        None => {
            let id = Uuid::new_v4();
            (id, state.up_sessions.insert(id, UploadPackSession::new()))
        }
    };

    let mut session = session.lock().await;
    let step = match session.advance(&state, req) {
        Ok(step) => step,
        Err(e) => {
            // Session state is discarded on failure; the client re-initiates.
            state.up_sessions.remove(id);
            return Err(e);
        }
    };
    drop(session);

    match step {
        Step::Acks(acks) => Ok((
            StatusCode::OK,
            [(
                header::SET_COOKIE,
                cookies::set_session_cookie(COOKIE_UPLOAD_PACK_SESSION, id, &cookie_path),
            )],
            Json(UploadPackResponse { acks }),
        )
            .into_response()),
        Step::Pack(pack) => {
            state.up_sessions.remove(id);
            Ok((
                StatusCode::OK,
                [
                    (
                        header::CONTENT_TYPE,
                        header::HeaderValue::from_static(CT_PACKFILE),
                    ),
                    (
                        header::SET_COOKIE,
                        cookies::clear_session_cookie(COOKIE_UPLOAD_PACK_SESSION, id, &cookie_path),
                    ),
                ],
                pack,
            )
                .into_response())
        }
    }
}
