//! Route scopes and the authorization middleware.
//!
//! Every route carries a `read` or `write` scope. The decision whether a
//! request may use a scope is delegated to an injected `Enforce` capability;
//! the server core never interprets credentials itself. Author identity is
//! likewise injected into request extensions by the outer layer.

use std::sync::{Arc, LazyLock};

use axum::{
    extract::{FromRequestParts, Request, State},
    http::{request::Parts, HeaderMap, Method},
    middleware::Next,
    response::Response,
};
use regex::Regex;

use crate::config::Config;
use crate::error::ApiErr;
use crate::AppState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Read,
    Write,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Read => "read",
            Scope::Write => "write",
        }
    }
}

/// Decides whether a request's credentials grant a scope. Must be pure with
/// respect to the request.
pub type Enforce = Arc<dyn Fn(&HeaderMap, Scope) -> bool + Send + Sync>;

/// Resolves request credentials to an author identity, or `None`.
pub type ResolveAuthor = Arc<dyn Fn(&HeaderMap) -> Option<Author> + Send + Sync>;

/// Identity attached to mutating operations. Injected into request
/// extensions by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Author {
    pub name: String,
    pub email: String,
}

impl<S: Send + Sync> FromRequestParts<S> for Author {
    type Rejection = ApiErr;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Author>()
            .cloned()
            .ok_or_else(|| ApiErr::unauthorized("author identity required"))
    }
}

struct RouteScope {
    pat: Regex,
    method: Method,
    scope: Scope,
}

/// Compiled once at startup, read-only thereafter. Order matters: first
/// match wins, so the more specific patterns come first within a prefix.
static ROUTE_SCOPES: LazyLock<Vec<RouteScope>> = LazyLock::new(|| {
    let rs = |pat: &str, method: Method, scope: Scope| RouteScope {
        pat: Regex::new(pat).expect("route pattern compiles"),
        method,
        scope,
    };
    vec![
        rs(r"^/refs/heads/[-_0-9A-Za-z]+/?$", Method::GET, Scope::Read),
        rs(r"^/refs/$", Method::GET, Scope::Read),
        rs(r"^/upload-pack/$", Method::POST, Scope::Read),
        rs(r"^/receive-pack/$", Method::POST, Scope::Write),
        rs(r"^/blocks/$", Method::GET, Scope::Read),
        rs(r"^/rows/$", Method::GET, Scope::Read),
        rs(r"^/objects/$", Method::GET, Scope::Read),
        rs(r"^/commits/[0-9a-f]{32}/$", Method::GET, Scope::Read),
        rs(r"^/commits/[0-9a-f]{32}/profile/$", Method::GET, Scope::Read),
        rs(r"^/commits/?$", Method::POST, Scope::Write),
        rs(r"^/commits/?$", Method::GET, Scope::Read),
        rs(r"^/tables/[0-9a-f]{32}/$", Method::GET, Scope::Read),
        rs(r"^/tables/[0-9a-f]{32}/profile/$", Method::GET, Scope::Read),
        rs(r"^/tables/[0-9a-f]{32}/blocks/$", Method::GET, Scope::Read),
        rs(r"^/tables/[0-9a-f]{32}/rows/$", Method::GET, Scope::Read),
        rs(r"^/diff/[0-9a-f]{32}/[0-9a-f]{32}/$", Method::GET, Scope::Read),
        rs(r"^/transactions/?$", Method::POST, Scope::Write),
        // Loose UUID shape: the handler rejects malformed ids with 400.
        rs(r"^/transactions/[0-9a-fA-F-]+/$", Method::GET, Scope::Read),
        rs(r"^/transactions/[0-9a-fA-F-]+/$", Method::POST, Scope::Write),
        rs(r"^/gc/$", Method::POST, Scope::Write),
    ]
});

/// Scope of a route, or `None` for unknown paths (which must 404).
pub fn route_scope(path: &str, method: &Method) -> Option<Scope> {
    ROUTE_SCOPES
        .iter()
        .find(|r| r.method == *method && r.pat.is_match(path))
        .map(|r| r.scope)
}

/// Authentication layer: resolve credentials to an author identity and stash
/// it in request extensions. Runs before authorization.
pub async fn authenticate(State(state): State<AppState>, mut req: Request, next: Next) -> Response {
    if let Some(author) = (state.auth.resolve_author)(req.headers()) {
        req.extensions_mut().insert(author);
    }
    next.run(req).await
}

/// Authorization layer per request:
/// 1. unknown route → 404
/// 2. read scope + `anonymous_read` → allow
/// 3. `Enforce` says yes → allow
/// 4. otherwise 403, or 404 when masking is on
pub async fn authorize(
    State(state): State<AppState>,
    req: Request,
    next: Next,
) -> Result<Response, ApiErr> {
    let path = strip_root_path(req.uri().path(), state.config.root_path.as_deref());
    let Some(scope) = route_scope(&path, req.method()) else {
        return Err(not_found());
    };
    let allowed = (scope == Scope::Read && state.config.auth.anonymous_read)
        || (state.auth.enforce)(req.headers(), scope);
    if !allowed {
        return Err(if state.config.auth.mask_unauthorized_path {
            not_found()
        } else {
            ApiErr::forbidden("forbidden")
        });
    }
    Ok(next.run(req).await)
}

/// The body unmatched routes produce. Masked denials reuse it so they are
/// indistinguishable from a missing route.
pub fn not_found() -> ApiErr {
    ApiErr::not_found("not found")
}

/// Strip the configured mount prefix once before scope matching.
fn strip_root_path(path: &str, root: Option<&str>) -> String {
    let stripped = match root {
        Some(root) => path.strip_prefix(root).unwrap_or(path),
        None => path,
    };
    if stripped.starts_with('/') {
        stripped.to_string()
    } else {
        format!("/{stripped}")
    }
}

/// Options injected by the outer authentication layer.
pub struct AuthzOptions {
    pub enforce: Enforce,
    pub resolve_author: ResolveAuthor,
}

impl AuthzOptions {
    /// Allow everything; identity comes from the repo config. Used by tests
    /// and single-user deployments without an auth layer.
    pub fn allow_all(config: &Config) -> Self {
        let author = config_author(config);
        AuthzOptions {
            enforce: Arc::new(|_, _| true),
            resolve_author: Arc::new(move |_| author.clone()),
        }
    }

    /// Static bearer-token enforcer over `[[auth.tokens]]` from the config
    /// file. Token semantics live entirely here; the core only sees the
    /// closures.
    pub fn bearer_tokens(config: &Config) -> Self {
        let tokens = Arc::new(config.auth.tokens.clone());
        let find = move |headers: &HeaderMap| -> Option<crate::config::TokenConfig> {
            let presented = headers
                .get(axum::http::header::AUTHORIZATION)?
                .to_str()
                .ok()?
                .strip_prefix("Bearer ")?;
            tokens.iter().find(|t| t.token == presented).cloned()
        };
        let enforce_find = find.clone();
        AuthzOptions {
            enforce: Arc::new(move |headers, scope| {
                enforce_find(headers)
                    .map(|t| t.scopes.iter().any(|s| s == scope.as_str()))
                    .unwrap_or(false)
            }),
            resolve_author: Arc::new(move |headers| {
                find(headers).map(|t| Author {
                    name: t.name,
                    email: t.email,
                })
            }),
        }
    }
}

fn config_author(config: &Config) -> Option<Author> {
    if config.user.name.is_empty() && config.user.email.is_empty() {
        return None;
    }
    Some(Author {
        name: config.user.name.clone(),
        email: config.user.email.clone(),
    })
}
