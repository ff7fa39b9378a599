//! Pack session cookie handling. Sessions resume across requests via an
//! HttpOnly cookie bound to the endpoint path.

use axum::http::{header, HeaderMap, HeaderValue};
use uuid::Uuid;

use wrgld_api_types::SESSION_COOKIE_MAX_AGE;

/// Session id presented by the client, if any.
pub fn session_id(headers: &HeaderMap, name: &str) -> Option<Uuid> {
    let cookies = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookies.split(';') {
        let (k, v) = part.trim().split_once('=')?;
        if k == name {
            return Uuid::parse_str(v).ok();
        }
    }
    None
}

pub fn set_session_cookie(name: &str, id: Uuid, path: &str) -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{name}={id}; Path={path}; HttpOnly; Max-Age={SESSION_COOKIE_MAX_AGE}"
    ))
    .expect("cookie value is ascii")
}

/// Expire the cookie: `Max-Age=0` plus a past `Expires` for old agents.
pub fn clear_session_cookie(name: &str, id: Uuid, path: &str) -> HeaderValue {
    HeaderValue::from_str(&format!(
        "{name}={id}; Path={path}; HttpOnly; Max-Age=0; Expires=Thu, 01 Jan 1970 00:00:00 GMT"
    ))
    .expect("cookie value is ascii")
}
