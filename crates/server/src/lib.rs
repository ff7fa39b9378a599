//! HTTP daemon serving a wrgl data-versioning repository: content-addressed
//! commits/tables/blocks behind named branches, pack-based sync, transactional
//! multi-branch commits, and webhook notifications.

pub mod auth;
pub mod config;
mod cookies;
mod error;
mod pool;
mod receive_pack;
mod routes;
mod session_map;
mod upload_pack;
mod webhook;

use std::sync::Arc;

use axum::extract::DefaultBodyLimit;
use axum::http::header;
use axum::middleware;
use axum::routing::{get, post};
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use wrgld_objects::ObjectStore;
use wrgld_store::RefStore;

pub use auth::{Author, AuthzOptions, Scope};
pub use config::Config;
pub use error::ApiErr;
pub use session_map::SessionMap;
pub use webhook::{FlushGroup, WebhookSender};

use pool::SorterPool;
use receive_pack::ReceivePackSession;
use upload_pack::UploadPackSession;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn ObjectStore>,
    pub rs: RefStore,
    pub config: Arc<Config>,
    pub auth: Arc<AuthzOptions>,
    pub(crate) sorters: Arc<SorterPool>,
    pub(crate) up_sessions: Arc<SessionMap<UploadPackSession>>,
    pub(crate) rp_sessions: Arc<SessionMap<ReceivePackSession>>,
    /// Present only in tests, to join webhook flushes.
    flush_group: Option<Arc<FlushGroup>>,
}

impl AppState {
    pub fn new(
        db: Arc<dyn ObjectStore>,
        rs: RefStore,
        config: Config,
        auth: AuthzOptions,
    ) -> Self {
        let idle = config.session_idle();
        let run_size = config.sorter_run_size();
        AppState {
            db,
            rs,
            config: Arc::new(config),
            auth: Arc::new(auth),
            sorters: Arc::new(SorterPool::new(run_size)),
            up_sessions: SessionMap::new(idle),
            rp_sessions: SessionMap::new(idle),
            flush_group: None,
        }
    }

    /// Attach a completion signal to webhook flushes (tests only).
    pub fn with_flush_group(mut self, group: Arc<FlushGroup>) -> Self {
        self.flush_group = Some(group);
        self
    }

    /// Transient webhook sender bound to the configured webhooks.
    pub(crate) fn webhook_sender(&self) -> WebhookSender {
        WebhookSender::new(&self.config, self.flush_group.clone())
    }

    /// Stop session sweepers and drop live sessions. Called on shutdown.
    pub fn stop(&self) {
        self.up_sessions.stop();
        self.rp_sessions.stop();
    }

    pub(crate) fn cache_control_immutable(&self) -> (header::HeaderName, String) {
        (
            header::CACHE_CONTROL,
            format!("public, immutable, max-age={}", self.config.max_age().as_secs()),
        )
    }
}

/// Build the full middleware-wrapped router.
pub fn build_router(state: AppState) -> Router {
    let api = Router::new()
        .route("/refs/", get(routes::refs::list_refs))
        .route("/refs/heads/{branch}", get(routes::refs::get_head))
        .route("/refs/heads/{branch}/", get(routes::refs::get_head))
        .route("/upload-pack/", post(upload_pack::handle))
        .route("/receive-pack/", post(receive_pack::handle))
        .route(
            "/commits",
            post(routes::commit::create_commit).get(routes::commits::list_commits),
        )
        .route(
            "/commits/",
            post(routes::commit::create_commit).get(routes::commits::list_commits),
        )
        .route("/commits/{hash}/", get(routes::commits::get_commit))
        .route(
            "/commits/{hash}/profile/",
            get(routes::commits::get_commit_profile),
        )
        .route("/tables/{hash}/", get(routes::tables::get_table_handler))
        .route(
            "/tables/{hash}/profile/",
            get(routes::tables::get_table_profile_handler),
        )
        .route(
            "/tables/{hash}/blocks/",
            get(routes::tables::get_table_blocks),
        )
        .route("/tables/{hash}/rows/", get(routes::tables::get_table_rows))
        .route("/blocks/", get(routes::tables::get_rooted_blocks))
        .route("/rows/", get(routes::tables::get_rooted_rows))
        .route("/objects/", get(routes::objects::get_object))
        .route("/diff/{new_hash}/{old_hash}/", get(routes::diff::diff))
        .route("/transactions", post(routes::transactions::create))
        .route("/transactions/", post(routes::transactions::create))
        .route(
            "/transactions/{id}/",
            get(routes::transactions::describe).post(routes::transactions::update),
        )
        .route("/gc/", post(routes::gc::run));

    let api = match state.config.root_path.as_deref() {
        Some(root) => Router::new().nest(root, api),
        None => api,
    }
    .fallback(|| async { auth::not_found() });

    api.layer(DefaultBodyLimit::max(256 * 1024 * 1024))
        .layer(middleware::from_fn_with_state(state.clone(), auth::authorize))
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::authenticate,
        ))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers([header::WWW_AUTHENTICATE]),
        )
        .with_state(state)
}
