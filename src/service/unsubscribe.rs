//! Ending channel subscriptions on the server.
//!
//! The router only needs a fire-and-forget call: local teardown never waits
//! for the server and never sees its failures.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use reqwest::Url;
use serde::Serialize;

use crate::config::{ClientConfig, ClientIdentity};
use crate::error::BroadcastError;

/// Ends subscriptions for whole channels.
pub trait UnsubscribeRpc: fmt::Debug {
    /// Asks the server to end this client's subscriptions on `channels`.
    /// Must not block; failures are the implementation's to log.
    fn unsubscribe(&self, channels: Vec<String>);
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct UnsubscribeRequest<'a> {
    #[serde(flatten)]
    identity: &'a ClientIdentity,
    channels: Vec<String>,
}

/// Posts unsubscribe requests on the current tokio runtime.
#[derive(Debug, Clone)]
pub struct HttpUnsubscribeRpc {
    client: reqwest::Client,
    url: Url,
    identity: ClientIdentity,
}

impl HttpUnsubscribeRpc {
    /// Creates an RPC posting to `url`.
    #[must_use]
    pub const fn new(client: reqwest::Client, url: Url, identity: ClientIdentity) -> Self {
        Self {
            client,
            url,
            identity,
        }
    }

    /// Creates an RPC from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Http`] if the HTTP client cannot be built
    /// and [`BroadcastError::Configuration`] if the endpoint is invalid.
    pub fn from_config(config: &ClientConfig) -> Result<Self, BroadcastError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self::new(client, config.unsubscribe_url()?, config.identity.clone()))
    }
}

impl UnsubscribeRpc for HttpUnsubscribeRpc {
    fn unsubscribe(&self, channels: Vec<String>) {
        let runtime = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => runtime,
            Err(err) => {
                tracing::warn!(%err, ?channels, "no tokio runtime, unsubscribe request not sent");
                return;
            }
        };

        let client = self.client.clone();
        let url = self.url.clone();
        let identity = self.identity.clone();
        runtime.spawn(async move {
            let request = UnsubscribeRequest {
                identity: &identity,
                channels,
            };
            let result = client
                .post(url)
                .json(&request)
                .send()
                .await
                .and_then(reqwest::Response::error_for_status);
            match result {
                Ok(_) => tracing::debug!(channels = ?request.channels, "unsubscribed"),
                Err(err) => {
                    tracing::warn!(%err, channels = ?request.channels, "unsubscribe request failed");
                }
            }
        });
    }
}

/// Records unsubscribe calls instead of sending them.
#[derive(Debug, Clone, Default)]
pub struct RecordingUnsubscribeRpc {
    calls: Rc<RefCell<Vec<Vec<String>>>>,
}

impl RecordingUnsubscribeRpc {
    /// Creates an RPC with no recorded calls.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every call so far, in order.
    #[must_use]
    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.borrow().clone()
    }
}

impl UnsubscribeRpc for RecordingUnsubscribeRpc {
    fn unsubscribe(&self, channels: Vec<String>) {
        self.calls.borrow_mut().push(channels);
    }
}
