//! Client configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`). Unset or unparsable numeric values fall
//! back to their defaults.

use std::time::Duration;

use chrono::TimeDelta;
use reqwest::Url;
use serde::Serialize;

use crate::error::BroadcastError;
use crate::routing::RouterSettings;
use crate::sse::DEFAULT_RETRY_MILLISECONDS;
use crate::tunnel::TunnelSettings;

/// Opaque identifiers sent with every listen and unsubscribe request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientIdentity {
    /// Application token issued by the broadcasting server.
    pub app_token: String,
    /// Identifier of the running client build.
    pub build_id: String,
    /// Hash of the deployed backend, if any.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend_hash: Option<String>,
    /// Client session the subscriptions belong to.
    pub session_id: String,
}

/// Top-level client configuration.
///
/// Loaded once at startup via [`ClientConfig::from_env`].
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Base URL of the broadcasting server (always ends with `/`).
    pub server_url: Url,

    /// Identifiers sent with each request.
    pub identity: ClientIdentity,

    /// Seconds a pending subscription may wait for a handler.
    pub pending_expiration_secs: u64,

    /// Reconnect delay used until the server sends `retry`.
    pub default_retry_ms: u64,

    /// Timeout in seconds for establishing the HTTP connection.
    pub connect_timeout_secs: u64,

    /// Log every raw chunk at `trace` level.
    pub log_raw_chunks: bool,

    /// Subscriptions the `broadcast-tail` binary attaches to, as
    /// `(channel, token)` pairs.
    pub subscriptions: Vec<(String, String)>,
}

impl ClientConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to sensible defaults when a variable is not set.
    /// Calls `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns an error if `BROADCAST_SERVER_URL` is set but is not a valid
    /// URL.
    pub fn from_env() -> Result<Self, Box<dyn std::error::Error>> {
        dotenvy::dotenv().ok();

        let server_url = normalize_base(
            std::env::var("BROADCAST_SERVER_URL")
                .unwrap_or_else(|_| "http://localhost:8000/".to_string())
                .parse()?,
        );

        let identity = ClientIdentity {
            app_token: std::env::var("BROADCAST_APP_TOKEN").unwrap_or_default(),
            build_id: std::env::var("BROADCAST_BUILD_ID")
                .unwrap_or_else(|_| env!("CARGO_PKG_VERSION").to_string()),
            backend_hash: std::env::var("BROADCAST_BACKEND_HASH").ok(),
            session_id: std::env::var("BROADCAST_SESSION_ID")
                .unwrap_or_else(|_| uuid::Uuid::new_v4().to_string()),
        };

        let pending_expiration_secs = parse_env("BROADCAST_PENDING_EXPIRATION_SECS", 300);
        let default_retry_ms = parse_env("BROADCAST_DEFAULT_RETRY_MS", DEFAULT_RETRY_MILLISECONDS);
        let connect_timeout_secs = parse_env("BROADCAST_CONNECT_TIMEOUT_SECS", 10);
        let log_raw_chunks = parse_env_bool("BROADCAST_LOG_RAW_CHUNKS", false);

        let subscriptions = std::env::var("BROADCAST_SUBSCRIPTIONS")
            .map(|raw| parse_subscriptions(&raw))
            .unwrap_or_default();

        Ok(Self {
            server_url,
            identity,
            pending_expiration_secs,
            default_retry_ms,
            connect_timeout_secs,
            log_raw_chunks,
            subscriptions,
        })
    }

    /// Endpoint streaming the broadcasting events.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Configuration`] if the endpoint cannot be
    /// joined onto the base URL.
    pub fn listen_url(&self) -> Result<Url, BroadcastError> {
        self.endpoint("_broadcasting/listen")
    }

    /// Endpoint ending channel subscriptions.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Configuration`] if the endpoint cannot be
    /// joined onto the base URL.
    pub fn unsubscribe_url(&self) -> Result<Url, BroadcastError> {
        self.endpoint("_broadcasting/unsubscribe")
    }

    fn endpoint(&self, path: &str) -> Result<Url, BroadcastError> {
        self.server_url
            .join(path)
            .map_err(|err| BroadcastError::Configuration(format!("invalid endpoint {path}: {err}")))
    }

    /// HTTP connect timeout.
    #[must_use]
    pub const fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Settings for the [`crate::tunnel::Tunnel`].
    #[must_use]
    pub const fn tunnel_settings(&self) -> TunnelSettings {
        TunnelSettings {
            default_retry_ms: self.default_retry_ms,
            log_raw_chunks: self.log_raw_chunks,
        }
    }

    /// Settings for the [`crate::routing::SubscriptionRouter`].
    #[must_use]
    pub fn router_settings(&self) -> RouterSettings {
        let secs = i64::try_from(self.pending_expiration_secs).unwrap_or(i64::MAX);
        RouterSettings {
            pending_expiration: TimeDelta::try_seconds(secs).unwrap_or(TimeDelta::MAX),
        }
    }
}

/// Makes sure relative joins append to the base path instead of replacing
/// its last segment.
fn normalize_base(mut url: Url) -> Url {
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    url
}

/// Parses `channel=token` pairs separated by commas. Malformed entries are
/// skipped.
fn parse_subscriptions(raw: &str) -> Vec<(String, String)> {
    raw.split(',')
        .filter_map(|entry| {
            let (channel, token) = entry.trim().split_once('=')?;
            let (channel, token) = (channel.trim(), token.trim());
            if channel.is_empty() || token.is_empty() {
                tracing::warn!(entry, "ignoring malformed subscription entry");
                return None;
            }
            Some((channel.to_string(), token.to_string()))
        })
        .collect()
}

/// Parses an environment variable as `T`, returning `default` on missing
/// or invalid values.
fn parse_env<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Parses an environment variable as a boolean. Accepts `"true"`, `"1"`,
/// `"false"`, `"0"` (case-insensitive). Returns `default` otherwise.
fn parse_env_bool(key: &str, default: bool) -> bool {
    match std::env::var(key).ok().as_deref() {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}
