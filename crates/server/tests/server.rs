//! End-to-end scenarios over a live server: commit/read, authorization,
//! transactions, GC, webhooks.

mod common;

use std::sync::Arc;

use common::{base_config, TestServer, WebhookTarget};
use uuid::Uuid;

use wrgld_api_types::{
    CommitPayload, ErrorResponse, GetTransactionResponse, RefsResponse, WebhookEvent,
    WebhookEventType,
};
use wrgld_server::auth::AuthzOptions;

const CSV: &str = "id,name\n2,bob\n1,alice\n3,carol\n";

#[tokio::test]
async fn create_commit_then_read_head() {
    let server = TestServer::spawn(base_config()).await;
    let client = server.client();

    let cr = server
        .commit(&client, "main", "init", CSV, Some("id"), None)
        .await;

    let head: CommitPayload = client
        .get(server.url("/refs/heads/main"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(head.sum, cr.sum);
    assert_eq!(head.table.sum, cr.table);
    assert!(head.table.exist);
    assert_eq!(head.table.columns, ["id", "name"]);
    assert_eq!(head.table.pk, [0]);
    assert_eq!(head.table.rows_count, 3);
    assert!(head.parents.is_empty());
    assert_eq!(head.message, "init");
    assert_eq!(head.author_name, "Test Author");

    // Hash-addressed reads are immutable-cached.
    let resp = client
        .get(server.url(&format!("/commits/{}/", cr.sum)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let cache = resp.headers()["cache-control"].to_str().unwrap().to_string();
    assert!(cache.starts_with("public, immutable, max-age="), "{cache}");

    // Blocks stream back sorted by primary key.
    let body = client
        .get(server.url(&format!("/tables/{}/blocks/?with_header=true", cr.table)))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "id,name\n1,alice\n2,bob\n3,carol\n");

    // Row selection by offset.
    let body = client
        .get(server.url(&format!("/tables/{}/rows/?offsets=2,0", cr.table)))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "3,carol\n1,alice\n");

    // Rooted variants address the same table.
    let body = client
        .get(server.url(&format!("/blocks/?table={}", cr.table)))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(body, "1,alice\n2,bob\n3,carol\n");

    // Profile was computed at ingest time.
    let resp = client
        .get(server.url(&format!("/commits/{}/profile/", cr.sum)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let profile: serde_json::Value = resp.json().await.unwrap();
    assert_eq!(profile["rows_count"], 3);
}

#[tokio::test]
async fn identical_csv_yields_identical_table_digest() {
    let server = TestServer::spawn(base_config()).await;
    let client = server.client();

    let first = server
        .commit(&client, "main", "one", CSV, Some("id"), None)
        .await;
    let second = server
        .commit(&client, "main", "two", CSV, Some("id"), None)
        .await;
    assert_eq!(first.table, second.table);
    assert_ne!(first.sum, second.sum);

    let head: CommitPayload = client
        .get(server.url("/refs/heads/main"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(head.parents, vec![first.sum]);
}

#[tokio::test]
async fn csv_parse_error_reports_location() {
    let server = TestServer::spawn(base_config()).await;
    let client = server.client();

    let resp = server
        .try_commit(&client, "main", "bad", "id,name\n1,alice\n2\n", None, None)
        .await;
    assert_eq!(resp.status(), 400);
    let err: ErrorResponse = resp.json().await.unwrap();
    assert_eq!(err.csv.expect("csv location").row, 3);
}

#[tokio::test]
async fn commit_form_validation() {
    let server = TestServer::spawn(base_config()).await;
    let client = server.client();

    let resp = server.try_commit(&client, "", "msg", CSV, None, None).await;
    assert_eq!(resp.status(), 400);
    let resp = server
        .try_commit(&client, "bad branch!", "msg", CSV, None, None)
        .await;
    assert_eq!(resp.status(), 400);
    let resp = server.try_commit(&client, "main", "", CSV, None, None).await;
    assert_eq!(resp.status(), 400);
    let resp = server
        .try_commit(&client, "main", "msg", CSV, Some("nope"), None)
        .await;
    assert_eq!(resp.status(), 400);

    // Unknown transaction id.
    let resp = server
        .try_commit(&client, "main", "msg", CSV, None, Some(&Uuid::new_v4().to_string()))
        .await;
    assert_eq!(resp.status(), 404);

    // Non-multipart body.
    let resp = client
        .post(server.url("/commits"))
        .json(&serde_json::json!({"branch": "main"}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 415);
}

#[tokio::test]
async fn anonymous_read_bypass() {
    let mut config = base_config();
    config.auth.anonymous_read = true;
    // Enforce denies everything and no author resolves: reads must still work.
    let auth = AuthzOptions {
        enforce: Arc::new(|_, _| false),
        resolve_author: Arc::new(|_| None),
    };
    let server = TestServer::spawn_with_auth(config, Some(auth)).await;
    let client = server.client();

    let resp = client.get(server.url("/refs/")).send().await.unwrap();
    assert_eq!(resp.status(), 200);
    let refs: RefsResponse = resp.json().await.unwrap();
    assert!(refs.refs.is_empty());

    // Writes stay protected.
    let resp = server.try_commit(&client, "main", "m", CSV, None, None).await;
    assert_eq!(resp.status(), 403);
}

#[tokio::test]
async fn masked_denial_is_indistinguishable_from_unknown_route() {
    let mut config = base_config();
    config.auth.mask_unauthorized_path = true;
    let auth = AuthzOptions {
        enforce: Arc::new(|_, _| false),
        resolve_author: Arc::new(|_| None),
    };
    let server = TestServer::spawn_with_auth(config, Some(auth)).await;
    let client = server.client();

    let denied = client.get(server.url("/refs/")).send().await.unwrap();
    let unknown = client.get(server.url("/no-such-route/")).send().await.unwrap();
    assert_eq!(denied.status(), 404);
    assert_eq!(unknown.status(), 404);
    assert_eq!(
        denied.text().await.unwrap(),
        unknown.text().await.unwrap()
    );
}

#[tokio::test]
async fn bearer_token_enforcer() {
    let mut config = base_config();
    config.auth.tokens.push(wrgld_server::config::TokenConfig {
        token: "reader".into(),
        name: "Reader".into(),
        email: "reader@test.local".into(),
        scopes: vec!["read".into()],
    });
    config.auth.tokens.push(wrgld_server::config::TokenConfig {
        token: "writer".into(),
        name: "Writer".into(),
        email: "writer@test.local".into(),
        scopes: vec!["read".into(), "write".into()],
    });
    let auth = AuthzOptions::bearer_tokens(&config);
    let server = TestServer::spawn_with_auth(config, Some(auth)).await;
    let client = server.client();

    // No credentials.
    let resp = client.get(server.url("/refs/")).send().await.unwrap();
    assert_eq!(resp.status(), 403);

    // Read token can read but not write.
    let resp = client
        .get(server.url("/refs/"))
        .bearer_auth("reader")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client
        .post(server.url("/gc/"))
        .bearer_auth("reader")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 403);

    // Write token commits, and the commit is attributed to it.
    let form = reqwest::multipart::Form::new()
        .text("branch", "main")
        .text("message", "init")
        .part(
            "file",
            reqwest::multipart::Part::bytes(CSV.as_bytes().to_vec()).file_name("data.csv"),
        );
    let resp = client
        .post(server.url("/commits"))
        .bearer_auth("writer")
        .multipart(form)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let head: CommitPayload = client
        .get(server.url("/refs/heads/main"))
        .bearer_auth("reader")
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(head.author_name, "Writer");
}

#[tokio::test]
async fn transactional_two_branch_commit() {
    let hook = WebhookTarget::spawn().await;
    let mut config = base_config();
    config.webhooks.push(wrgld_server::config::WebhookConfig {
        url: hook.url.clone(),
        event_types: vec![WebhookEventType::Commit],
        secret_token: Some("hunter2".into()),
    });
    let server = TestServer::spawn(config).await;
    let client = server.client();

    let resp = client
        .post(server.url("/transactions"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let tx: serde_json::Value = resp.json().await.unwrap();
    let tid = tx["id"].as_str().unwrap().to_string();

    let cr_a = server
        .commit(&client, "alpha", "init alpha", CSV, Some("id"), Some(&tid))
        .await;
    let cr_b = server
        .commit(&client, "beta", "init beta", CSV, Some("id"), Some(&tid))
        .await;

    // Heads untouched while the transaction is open.
    for branch in ["alpha", "beta"] {
        let resp = client
            .get(server.url(&format!("/refs/heads/{branch}")))
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 404);
    }

    let tx: GetTransactionResponse = client
        .get(server.url(&format!("/transactions/{tid}/")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tx.status, "open");
    assert!(tx.end.is_none());
    assert_eq!(tx.branches.len(), 2);
    assert_eq!(tx.branches[0].name, "alpha");
    assert_eq!(tx.branches[0].new_sum, cr_a.sum);
    assert!(tx.branches[0].current_sum.is_none());

    // Commit the transaction: both heads advance atomically.
    let resp = client
        .post(server.url(&format!("/transactions/{tid}/")))
        .json(&serde_json::json!({"commit": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    for (branch, cr) in [("alpha", &cr_a), ("beta", &cr_b)] {
        let head: CommitPayload = client
            .get(server.url(&format!("/refs/heads/{branch}")))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(head.sum, cr.sum);
    }

    let tx: GetTransactionResponse = client
        .get(server.url(&format!("/transactions/{tid}/")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tx.status, "committed");
    assert!(tx.end.is_some());

    // One webhook delivery carrying both commits, message prefixed with the
    // transaction marker, HMAC-signed.
    server.flush_group.wait().await;
    let payloads = hook.payloads();
    assert_eq!(payloads.len(), 1);
    assert_eq!(payloads[0].events.len(), 1);
    let WebhookEvent::Commit {
        transaction_id,
        commits,
        author_name,
        ..
    } = &payloads[0].events[0]
    else {
        panic!("expected commit event");
    };
    assert_eq!(transaction_id.unwrap().to_string(), tid);
    assert_eq!(author_name, "Test Author");
    let mut commits = commits.clone();
    commits.sort_by(|a, b| a.ref_name.cmp(&b.ref_name));
    assert_eq!(commits[0].ref_name, "heads/alpha");
    assert_eq!(commits[0].sum, cr_a.sum);
    assert_eq!(commits[0].message, format!("commit [tx/{tid}]\ninit alpha"));
    assert_eq!(commits[1].ref_name, "heads/beta");
    assert_eq!(commits[1].message, format!("commit [tx/{tid}]\ninit beta"));
    assert!(hook.headers()[0].contains_key("X-Wrgl-Signature-256"));
}

#[tokio::test]
async fn transaction_commit_conflicts_when_branch_moved() {
    let server = TestServer::spawn(base_config()).await;
    let client = server.client();

    let resp = client
        .post(server.url("/transactions"))
        .send()
        .await
        .unwrap();
    let tx: serde_json::Value = resp.json().await.unwrap();
    let tid = tx["id"].as_str().unwrap().to_string();

    server
        .commit(&client, "alpha", "staged", CSV, Some("id"), Some(&tid))
        .await;
    // Direct commit moves the branch underneath the transaction.
    server
        .commit(&client, "alpha", "interloper", CSV, Some("id"), None)
        .await;

    let resp = client
        .post(server.url(&format!("/transactions/{tid}/")))
        .json(&serde_json::json!({"commit": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    let tx: GetTransactionResponse = client
        .get(server.url(&format!("/transactions/{tid}/")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(tx.status, "open");
}

#[tokio::test]
async fn transaction_update_requires_exactly_one_action() {
    let server = TestServer::spawn(base_config()).await;
    let client = server.client();
    let resp = client
        .post(server.url("/transactions"))
        .send()
        .await
        .unwrap();
    let tx: serde_json::Value = resp.json().await.unwrap();
    let tid = tx["id"].as_str().unwrap().to_string();

    for body in [
        serde_json::json!({}),
        serde_json::json!({"commit": true, "discard": true}),
    ] {
        let resp = client
            .post(server.url(&format!("/transactions/{tid}/")))
            .json(&body)
            .send()
            .await
            .unwrap();
        assert_eq!(resp.status(), 400);
    }
}

#[tokio::test]
async fn duplicate_transaction_id_conflicts() {
    let server = TestServer::spawn(base_config()).await;
    let client = server.client();
    let id = Uuid::new_v4();
    let body = serde_json::json!({"id": id});

    let resp = client
        .post(server.url("/transactions"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let resp = client
        .post(server.url("/transactions"))
        .json(&body)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);
}

#[tokio::test]
async fn discard_then_gc_prunes_staged_objects() {
    let mut config = base_config();
    config.transaction_ttl_secs = Some(0);
    let server = TestServer::spawn(config).await;
    let client = server.client();

    let resp = client
        .post(server.url("/transactions"))
        .send()
        .await
        .unwrap();
    let tx: serde_json::Value = resp.json().await.unwrap();
    let tid = tx["id"].as_str().unwrap().to_string();

    let cr = server
        .commit(&client, "alpha", "staged", CSV, Some("id"), Some(&tid))
        .await;

    let resp = client
        .post(server.url(&format!("/transactions/{tid}/")))
        .json(&serde_json::json!({"discard": true}))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    let resp = client.post(server.url("/gc/")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    // Nothing referenced the staged commit; it is gone, and so is the
    // transaction.
    let resp = client
        .get(server.url(&format!("/commits/{}/", cr.sum)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
    let resp = client
        .get(server.url(&format!("/transactions/{tid}/")))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn diff_reports_row_level_changes() {
    let server = TestServer::spawn(base_config()).await;
    let client = server.client();

    let old = server
        .commit(&client, "main", "v1", "id,name\n1,alice\n2,bob\n", Some("id"), None)
        .await;
    let new = server
        .commit(
            &client,
            "main",
            "v2",
            "id,name\n1,alice\n2,bobby\n3,carol\n",
            Some("id"),
            None,
        )
        .await;

    let resp = client
        .get(server.url(&format!("/diff/{}/{}/", new.sum, old.sum)))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let diff: wrgld_api_types::DiffResponse = resp.json().await.unwrap();
    assert_eq!(diff.table_sum, new.table);
    assert_eq!(diff.old_table_sum, old.table);
    assert!(!diff.pk_changed);
    assert_eq!(diff.pk, ["id"]);

    // Row 2 changed, row 3 added.
    assert_eq!(diff.row_diff.len(), 2);
    assert_eq!(diff.row_diff[0].pk, ["2"]);
    assert!(diff.row_diff[0].old_offset.is_some());
    assert!(diff.row_diff[0].new_offset.is_some());
    assert_eq!(diff.row_diff[1].pk, ["3"]);
    assert_eq!(diff.row_diff[1].old_offset, None);
}

#[tokio::test]
async fn commits_listing_walks_ancestry() {
    let server = TestServer::spawn(base_config()).await;
    let client = server.client();

    let c1 = server
        .commit(&client, "main", "one", "id\n1\n", Some("id"), None)
        .await;
    let c2 = server
        .commit(&client, "main", "two", "id\n1\n2\n", Some("id"), None)
        .await;

    let resp = client
        .get(server.url("/commits?head=main"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let listing: wrgld_api_types::CommitsResponse = resp.json().await.unwrap();
    let sums: Vec<_> = listing.commits.iter().map(|c| c.sum).collect();
    assert_eq!(sums, [c2.sum, c1.sum]);

    let resp = client
        .get(server.url("/commits?head=main&max=1"))
        .send()
        .await
        .unwrap();
    let listing: wrgld_api_types::CommitsResponse = resp.json().await.unwrap();
    assert_eq!(listing.commits.len(), 1);
}

#[tokio::test]
async fn root_path_prefix_mounts_the_api() {
    let mut config = base_config();
    config.root_path = Some("/repo-a".to_string());
    let server = TestServer::spawn(config).await;
    let client = server.client();

    let resp = client.get(server.url("/repo-a/refs/")).send().await.unwrap();
    assert_eq!(resp.status(), 200);

    // The unprefixed path no longer exists.
    let resp = client.get(server.url("/refs/")).send().await.unwrap();
    assert_eq!(resp.status(), 404);
}

#[tokio::test]
async fn single_commit_webhook_event() {
    let hook = WebhookTarget::spawn().await;
    let mut config = base_config();
    config.webhooks.push(wrgld_server::config::WebhookConfig {
        url: hook.url.clone(),
        event_types: vec![WebhookEventType::Commit, WebhookEventType::RefUpdate],
        secret_token: None,
    });
    let server = TestServer::spawn(config).await;
    let client = server.client();

    let cr = server
        .commit(&client, "main", "init", CSV, Some("id"), None)
        .await;
    server.flush_group.wait().await;

    let payloads = hook.payloads();
    assert_eq!(payloads.len(), 1);
    let WebhookEvent::Commit { commits, transaction_id, .. } = &payloads[0].events[0] else {
        panic!("expected commit event");
    };
    assert!(transaction_id.is_none());
    assert_eq!(commits.len(), 1);
    assert_eq!(commits[0].sum, cr.sum);
    assert_eq!(commits[0].ref_name, "heads/main");
    // Unsigned without a secret.
    assert!(!hook.headers()[0].contains_key("X-Wrgl-Signature-256"));
}
