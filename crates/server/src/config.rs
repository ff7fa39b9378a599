//! Repository configuration, persisted as `config.toml` in the repository
//! directory. Every field has a default so a fresh repo runs with an empty
//! file.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use wrgld_api_types::WebhookEventType;

pub const CONFIG_FILE_NAME: &str = "config.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Mount prefix when the daemon is served behind a path, e.g. `/repo-a`.
    /// Must start with `/`.
    pub root_path: Option<String>,
    pub user: UserConfig,
    pub auth: AuthConfig,
    pub receive: ReceiveConfig,
    pub pack: PackConfig,
    /// Transactions older than this are removed by GC.
    pub transaction_ttl_secs: Option<u64>,
    pub webhooks: Vec<WebhookConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserConfig {
    /// Author identity resolved for every request when the daemon runs
    /// without an auth layer. Mutating endpoints reply 401 when empty.
    pub name: String,
    pub email: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// Grant `read` scope to requests without credentials.
    pub anonymous_read: bool,
    /// Report denied requests as 404 instead of 403.
    pub mask_unauthorized_path: bool,
    /// Static bearer tokens understood by the built-in enforcer. The server
    /// core never reads this; only the binary's auth layer does.
    pub tokens: Vec<TokenConfig>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct TokenConfig {
    pub token: String,
    pub name: String,
    pub email: String,
    /// Granted scopes: `read`, `write`.
    pub scopes: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ReceiveConfig {
    pub deny_deletes: bool,
    pub deny_non_fast_forwards: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackConfig {
    /// `max-age` of Cache-Control on hash-addressed responses.
    pub max_age_secs: Option<u64>,
    /// Pack sessions idle longer than this are expired.
    pub session_idle_secs: Option<u64>,
    /// Sorter run size in bytes.
    pub sorter_run_size: Option<usize>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WebhookConfig {
    pub url: String,
    pub event_types: Vec<WebhookEventType>,
    /// When set, payloads carry an HMAC-SHA256 signature header.
    pub secret_token: Option<String>,
}

impl Config {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(toml::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        std::fs::write(path, toml::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn transaction_ttl(&self) -> Duration {
        Duration::from_secs(self.transaction_ttl_secs.unwrap_or(30 * 24 * 3600))
    }

    pub fn max_age(&self) -> Duration {
        Duration::from_secs(self.pack.max_age_secs.unwrap_or(90 * 24 * 3600))
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(self.pack.session_idle_secs.unwrap_or(600))
    }

    pub fn sorter_run_size(&self) -> usize {
        self.pack
            .sorter_run_size
            .unwrap_or(wrgld_objects::DEFAULT_RUN_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config_uses_defaults() {
        let c: Config = toml::from_str("").unwrap();
        assert!(!c.auth.anonymous_read);
        assert!(!c.receive.deny_deletes);
        assert_eq!(c.transaction_ttl(), Duration::from_secs(30 * 24 * 3600));
        assert!(c.webhooks.is_empty());
    }

    #[test]
    fn full_config_round_trip() {
        let text = r#"
            transaction_ttl_secs = 60

            [user]
            name = "Alice"
            email = "alice@example.com"

            [auth]
            anonymous_read = true
            mask_unauthorized_path = true

            [[auth.tokens]]
            token = "secret"
            name = "CI"
            email = "ci@example.com"
            scopes = ["read", "write"]

            [receive]
            deny_deletes = true

            [pack]
            max_age_secs = 3600

            [[webhooks]]
            url = "http://localhost:9999/hook"
            event_types = ["commit", "ref_update"]
            secret_token = "hunter2"
        "#;
        let c: Config = toml::from_str(text).unwrap();
        assert!(c.auth.anonymous_read);
        assert_eq!(c.auth.tokens[0].scopes, ["read", "write"]);
        assert_eq!(c.transaction_ttl(), Duration::from_secs(60));
        assert_eq!(c.max_age(), Duration::from_secs(3600));
        assert_eq!(c.webhooks[0].event_types.len(), 2);

        let back: Config = toml::from_str(&toml::to_string_pretty(&c).unwrap()).unwrap();
        assert_eq!(back.webhooks[0].url, c.webhooks[0].url);
    }

    #[test]
    fn unknown_fields_rejected() {
        assert!(toml::from_str::<Config>("bogus = 1").is_err());
    }
}
