//! HTTP streaming transport built on `reqwest`.
//!
//! Each connection is one `POST` to the listen endpoint with
//! `Accept: text/event-stream`. The response body is decoded as UTF-8 across
//! network chunk boundaries and forwarded chunk by chunk. When the stream
//! ends the transport reports `Broken` and waits for the tunnel to ask for a
//! reconnect, then sleeps for the retry hint before the next attempt.

use std::time::Duration;

use futures_util::StreamExt;
use reqwest::Url;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::transport::{SignalSink, Transport, TransportFactory, TransportSignal};
use crate::config::{ClientConfig, ClientIdentity};
use crate::error::BroadcastError;
use crate::sse::ResumeHint;

/// Body of a listen request.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ListenRequest<'a> {
    #[serde(flatten)]
    identity: &'a ClientIdentity,
    last_received_event_id: Option<u64>,
}

#[derive(Debug)]
enum Command {
    Reconnect(ResumeHint),
}

/// Opens [`HttpTransport`]s against one broadcasting server.
#[derive(Debug, Clone)]
pub struct HttpTransportFactory {
    client: reqwest::Client,
    listen_url: Url,
    identity: ClientIdentity,
}

impl HttpTransportFactory {
    /// Creates a factory posting to `listen_url`.
    #[must_use]
    pub const fn new(client: reqwest::Client, listen_url: Url, identity: ClientIdentity) -> Self {
        Self {
            client,
            listen_url,
            identity,
        }
    }

    /// Creates a factory from the client configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BroadcastError::Http`] if the HTTP client cannot be built
    /// and [`BroadcastError::Configuration`] if the listen URL is invalid.
    pub fn from_config(config: &ClientConfig) -> Result<Self, BroadcastError> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .build()?;
        Ok(Self::new(client, config.listen_url()?, config.identity.clone()))
    }
}

impl TransportFactory for HttpTransportFactory {
    fn open(&self, hint: ResumeHint, sink: SignalSink) -> Box<dyn Transport> {
        let (commands, command_rx) = mpsc::unbounded_channel();
        let task = match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(listen_loop(
                self.client.clone(),
                self.listen_url.clone(),
                self.identity.clone(),
                hint,
                sink,
                command_rx,
            ))),
            Err(err) => {
                tracing::error!(%err, "no tokio runtime, broadcasting transport not started");
                let reason = BroadcastError::Transport(format!("no tokio runtime: {err}"));
                sink.send(TransportSignal::Broken {
                    reason: reason.to_string(),
                });
                None
            }
        };
        Box::new(HttpTransport { commands, task })
    }
}

/// A running listen loop.
#[derive(Debug)]
pub struct HttpTransport {
    commands: mpsc::UnboundedSender<Command>,
    task: Option<JoinHandle<()>>,
}

impl Transport for HttpTransport {
    fn reconnect(&mut self, hint: ResumeHint) {
        if self.commands.send(Command::Reconnect(hint)).is_err() {
            tracing::debug!("listen loop already stopped, reconnect ignored");
        }
    }

    fn close(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

impl Drop for HttpTransport {
    fn drop(&mut self) {
        self.close();
    }
}

async fn listen_loop(
    client: reqwest::Client,
    url: Url,
    identity: ClientIdentity,
    mut hint: ResumeHint,
    sink: SignalSink,
    mut commands: mpsc::UnboundedReceiver<Command>,
) {
    let mut retrying = false;
    loop {
        if retrying {
            tokio::time::sleep(Duration::from_millis(hint.retry_ms)).await;
        }
        retrying = true;

        if !sink.send(TransportSignal::Attempting) {
            break;
        }
        tracing::debug!(
            generation = sink.generation(),
            last_event_id = ?hint.last_event_id,
            "opening broadcasting stream"
        );

        let reason = match stream_once(&client, &url, &identity, hint, &sink).await {
            Ok(()) => "stream ended".to_string(),
            Err(err) => err.to_string(),
        };
        if !sink.send(TransportSignal::Broken { reason }) {
            break;
        }

        match commands.recv().await {
            Some(Command::Reconnect(next)) => hint = next,
            None => break,
        }
    }
    tracing::debug!(generation = sink.generation(), "listen loop finished");
}

async fn stream_once(
    client: &reqwest::Client,
    url: &Url,
    identity: &ClientIdentity,
    hint: ResumeHint,
    sink: &SignalSink,
) -> Result<(), BroadcastError> {
    let request = ListenRequest {
        identity,
        last_received_event_id: hint.last_event_id,
    };
    let response = client
        .post(url.clone())
        .header(reqwest::header::ACCEPT, "text/event-stream")
        .json(&request)
        .send()
        .await?
        .error_for_status()?;

    let mut decoder = Utf8Accumulator::default();
    let mut body = response.bytes_stream();
    while let Some(bytes) = body.next().await {
        let text = decoder.push(&bytes?);
        if !text.is_empty() && !sink.send(TransportSignal::Chunk(text)) {
            break;
        }
    }
    Ok(())
}

/// Decodes UTF-8 incrementally, holding back a trailing partial sequence
/// until the rest of it arrives. Invalid sequences become U+FFFD.
#[derive(Debug, Default)]
pub(crate) struct Utf8Accumulator {
    pending: Vec<u8>,
}

impl Utf8Accumulator {
    pub(crate) fn push(&mut self, bytes: &[u8]) -> String {
        self.pending.extend_from_slice(bytes);
        let mut out = String::new();
        loop {
            match std::str::from_utf8(&self.pending) {
                Ok(text) => {
                    out.push_str(text);
                    self.pending.clear();
                    return out;
                }
                Err(err) => {
                    let rest = self.pending.split_off(err.valid_up_to());
                    let valid = std::mem::replace(&mut self.pending, rest);
                    out.push_str(&String::from_utf8_lossy(&valid));
                    match err.error_len() {
                        None => return out,
                        Some(invalid) => {
                            self.pending = self.pending.split_off(invalid);
                            out.push(char::REPLACEMENT_CHARACTER);
                        }
                    }
                }
            }
        }
    }
}
