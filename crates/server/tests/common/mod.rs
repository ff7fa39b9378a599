//! Shared harness for the integration suite: a real server on an ephemeral
//! port, driven over HTTP with reqwest, plus a capturing webhook target.

// Each test binary uses a different slice of this module.
#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::http::HeaderMap;
use axum::routing::post;
use axum::Router;

use wrgld_api_types::{CommitResponse, WebhookPayload};
use wrgld_server::{auth::AuthzOptions, build_router, AppState, Config, FlushGroup};
use wrgld_store::{FsObjectStore, RefStore};

pub struct TestServer {
    pub base_url: String,
    pub state: AppState,
    pub flush_group: Arc<FlushGroup>,
    // Keeps the object directory alive for the duration of the test.
    _dir: tempfile::TempDir,
}

impl TestServer {
    pub async fn spawn(config: Config) -> Self {
        Self::spawn_with_auth(config, None).await
    }

    pub async fn spawn_with_auth(config: Config, auth: Option<AuthzOptions>) -> Self {
        let dir = tempfile::tempdir().expect("temp dir");
        let db = Arc::new(FsObjectStore::open(dir.path()).expect("object store"));
        let rs = RefStore::open_in_memory().expect("ref store");
        let auth = auth.unwrap_or_else(|| AuthzOptions::allow_all(&config));
        let flush_group = Arc::new(FlushGroup::new());
        let state =
            AppState::new(db, rs, config, auth).with_flush_group(flush_group.clone());

        let app = build_router(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        TestServer {
            base_url: format!("http://{addr}"),
            state,
            flush_group,
            _dir: dir,
        }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    /// Client with a cookie store, for pack sessions.
    pub fn client(&self) -> reqwest::Client {
        reqwest::Client::builder()
            .cookie_store(true)
            .build()
            .unwrap()
    }

    /// `POST /commits` with a CSV upload; panics on non-200.
    pub async fn commit(
        &self,
        client: &reqwest::Client,
        branch: &str,
        message: &str,
        csv: &str,
        primary_key: Option<&str>,
        txid: Option<&str>,
    ) -> CommitResponse {
        let resp = self
            .try_commit(client, branch, message, csv, primary_key, txid)
            .await;
        assert_eq!(resp.status(), 200, "commit failed: {}", resp.text().await.unwrap());
        resp.json().await.unwrap()
    }

    pub async fn try_commit(
        &self,
        client: &reqwest::Client,
        branch: &str,
        message: &str,
        csv: &str,
        primary_key: Option<&str>,
        txid: Option<&str>,
    ) -> reqwest::Response {
        let mut form = reqwest::multipart::Form::new()
            .text("branch", branch.to_string())
            .text("message", message.to_string())
            .part(
                "file",
                reqwest::multipart::Part::bytes(csv.as_bytes().to_vec()).file_name("data.csv"),
            );
        if let Some(pk) = primary_key {
            form = form.text("primaryKey", pk.to_string());
        }
        if let Some(id) = txid {
            form = form.text("txid", id.to_string());
        }
        client
            .post(self.url("/commits"))
            .multipart(form)
            .send()
            .await
            .unwrap()
    }
}

/// A local HTTP endpoint that records webhook deliveries.
pub struct WebhookTarget {
    pub url: String,
    deliveries: Arc<Mutex<Vec<(HeaderMap, Bytes)>>>,
}

impl WebhookTarget {
    pub async fn spawn() -> Self {
        let deliveries: Arc<Mutex<Vec<(HeaderMap, Bytes)>>> = Arc::new(Mutex::new(Vec::new()));
        let sink = deliveries.clone();
        let app = Router::new().route(
            "/hook",
            post(move |headers: HeaderMap, body: Bytes| {
                let sink = sink.clone();
                async move {
                    sink.lock().unwrap().push((headers, body));
                    "ok"
                }
            }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        WebhookTarget {
            url: format!("http://{addr}/hook"),
            deliveries,
        }
    }

    pub fn payloads(&self) -> Vec<WebhookPayload> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .map(|(_, body)| serde_json::from_slice(body).expect("webhook payload decodes"))
            .collect()
    }

    pub fn headers(&self) -> Vec<HeaderMap> {
        self.deliveries
            .lock()
            .unwrap()
            .iter()
            .map(|(h, _)| h.clone())
            .collect()
    }
}

/// Config preset: open access, a configured author, no webhooks.
pub fn base_config() -> Config {
    let mut config = Config::default();
    config.user.name = "Test Author".to_string();
    config.user.email = "author@test.local".to_string();
    config
}
