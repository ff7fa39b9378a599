//! Outbound webhook delivery: best-effort, asynchronous, off the request
//! path. Handlers build a transient sender, enqueue events, and flush; the
//! flush task posts one payload per webhook whose subscribed event types
//! intersect the enqueued events.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use tokio::sync::Notify;

use wrgld_api_types::{WebhookEvent, WebhookPayload, WEBHOOK_SIGNATURE_HEADER};

use crate::config::{Config, WebhookConfig};

/// Completion signal for flush tasks. Tests wait on it to observe deliveries
/// deterministically; production code never blocks on it.
#[derive(Default)]
pub struct FlushGroup {
    pending: std::sync::Mutex<usize>,
    notify: Notify,
}

impl FlushGroup {
    pub fn new() -> Self {
        Self::default()
    }

    fn add(&self) {
        *self.pending.lock().unwrap() += 1;
    }

    fn done(&self) {
        let mut pending = self.pending.lock().unwrap();
        *pending -= 1;
        if *pending == 0 {
            // notify_one stores a permit, so a waiter that checks the count
            // just before this point still wakes up.
            self.notify.notify_one();
        }
    }

    /// Wait until every flush scheduled so far has finished.
    pub async fn wait(&self) {
        loop {
            if *self.pending.lock().unwrap() == 0 {
                return;
            }
            self.notify.notified().await;
        }
    }
}

pub struct WebhookSender {
    webhooks: Vec<WebhookConfig>,
    events: Vec<WebhookEvent>,
    group: Option<std::sync::Arc<FlushGroup>>,
}

impl WebhookSender {
    pub fn new(config: &Config, group: Option<std::sync::Arc<FlushGroup>>) -> Self {
        WebhookSender {
            webhooks: config.webhooks.clone(),
            events: Vec::new(),
            group,
        }
    }

    pub fn enqueue(&mut self, event: WebhookEvent) {
        self.events.push(event);
    }

    /// Schedule delivery on a detached task. Events enqueued on this sender
    /// travel together in one payload per webhook; errors are logged, never
    /// retried.
    pub fn flush(self) {
        if self.webhooks.is_empty() || self.events.is_empty() {
            return;
        }
        let WebhookSender { webhooks, events, group } = self;
        if let Some(g) = &group {
            g.add();
        }
        tokio::spawn(async move {
            let client = reqwest::Client::new();
            for wh in &webhooks {
                let selected: Vec<WebhookEvent> = events
                    .iter()
                    .filter(|e| wh.event_types.contains(&e.event_type()))
                    .cloned()
                    .collect();
                if selected.is_empty() {
                    continue;
                }
                let count = selected.len();
                let body = match serde_json::to_vec(&WebhookPayload { events: selected }) {
                    Ok(b) => b,
                    Err(e) => {
                        tracing::error!("encoding webhook payload: {e}");
                        continue;
                    }
                };
                let mut req = client
                    .post(&wh.url)
                    .header(reqwest::header::CONTENT_TYPE, "application/json");
                if let Some(secret) = wh.secret_token.as_deref().filter(|s| !s.is_empty()) {
                    req = req.header(WEBHOOK_SIGNATURE_HEADER, sign(secret, &body));
                }
                match req.body(body).send().await {
                    Ok(resp) => tracing::info!(
                        url = %wh.url,
                        status = resp.status().as_u16(),
                        events_count = count,
                        "sent payload to webhook"
                    ),
                    Err(e) => tracing::error!(url = %wh.url, "error sending payload: {e}"),
                }
            }
            if let Some(g) = &group {
                g.done();
            }
        });
    }
}

/// Hex HMAC-SHA256 of the payload body.
fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).expect("hmac accepts any key length");
    mac.update(body);
    hex::encode(mac.finalize().into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signature_matches_reference_vector() {
        // echo -n 'body' | openssl dgst -sha256 -hmac 'secret'
        assert_eq!(
            sign("secret", b"body"),
            "dc46983557fea127b43af721467eb9b3fde2338fe3e14f51952aa8478c13d355"
        );
    }

    #[tokio::test]
    async fn flush_group_waits_for_all_flushes() {
        let group = std::sync::Arc::new(FlushGroup::new());
        group.add();
        group.add();
        let g = group.clone();
        tokio::spawn(async move {
            g.done();
            g.done();
        });
        group.wait().await;
    }

    #[tokio::test]
    async fn flush_without_webhooks_is_a_no_op() {
        let config = Config::default();
        let group = std::sync::Arc::new(FlushGroup::new());
        let mut sender = WebhookSender::new(&config, Some(group.clone()));
        sender.enqueue(WebhookEvent::RefUpdate {
            old_sum: None,
            sum: None,
            ref_name: "heads/main".into(),
            action: String::new(),
            message: String::new(),
            time: chrono::Utc::now(),
        });
        sender.flush();
        // Nothing scheduled, wait returns immediately.
        group.wait().await;
    }
}
