//! Jetstream client
//!
//! Subscribes to the Jetstream JSON firehose over WebSocket and forwards
//! decoded events to the coordinator through a channel. The connection loop
//! reconnects with exponential backoff, resuming from the shared cursor.

use crate::cursor::SharedCursor;
use crate::error::FirehoseError;
use crate::firehose::events::{PostEvent, PostRecord, StreamEvent, POST_COLLECTION};
use futures_util::StreamExt;
use serde::Deserialize;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

/// Jetstream client configuration
#[derive(Debug, Clone)]
pub struct JetstreamConfig {
    pub endpoint: String,
    pub collection: String,
    /// When non-empty, Jetstream only delivers events from these accounts
    pub wanted_dids: Vec<String>,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl Default for JetstreamConfig {
    fn default() -> Self {
        Self {
            endpoint: "wss://jetstream1.us-east.bsky.network/subscribe".to_string(),
            collection: POST_COLLECTION.to_string(),
            wanted_dids: Vec::new(),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct JetstreamMessage {
    did: String,
    time_us: u64,
    kind: String,
    #[serde(default)]
    commit: Option<JetstreamCommit>,
}

#[derive(Debug, Deserialize)]
struct JetstreamCommit {
    operation: String,
    collection: String,
    rkey: String,
    #[serde(default)]
    record: Option<serde_json::Value>,
    #[serde(default)]
    cid: Option<String>,
}

/// Decode one Jetstream text frame
///
/// Record creations in `collection` become [`StreamEvent::Post`]; every other
/// well-formed message becomes [`StreamEvent::Progress`] so the cursor still
/// advances. Frames that are not Jetstream JSON yield `None`.
pub fn decode_message(text: &str, collection: &str) -> Option<StreamEvent> {
    let message: JetstreamMessage = match serde_json::from_str(text) {
        Ok(message) => message,
        Err(e) => {
            warn!(error = %e, "Skipping undecodable firehose message");
            return None;
        }
    };

    match message.commit {
        Some(commit)
            if message.kind == "commit"
                && commit.operation == "create"
                && commit.collection == collection =>
        {
            Some(StreamEvent::Post(PostEvent {
                did: message.did,
                time_us: message.time_us,
                rkey: commit.rkey,
                cid: commit.cid,
                record: commit
                    .record
                    .map(PostRecord::from_value)
                    .unwrap_or_default(),
            }))
        }
        _ => Some(StreamEvent::Progress {
            time_us: message.time_us,
        }),
    }
}

/// How one connection attempt ended
enum SessionEnd {
    /// Close was requested or the coordinator went away
    Stopped,
    Closed { opened: bool },
    Failed { opened: bool, error: FirehoseError },
}

pub struct JetstreamSource {
    config: JetstreamConfig,
    cursor: SharedCursor,
}

impl JetstreamSource {
    pub fn new(config: JetstreamConfig, cursor: SharedCursor) -> Self {
        Self { config, cursor }
    }

    /// Subscribe URL resuming from `cursor` (omitted when zero)
    pub fn subscribe_url(&self, cursor: u64) -> Result<Url, FirehoseError> {
        let mut url = Url::parse(&self.config.endpoint)?;
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("wantedCollections", &self.config.collection);
            for did in &self.config.wanted_dids {
                query.append_pair("wantedDids", did);
            }
            if cursor > 0 {
                query.append_pair("cursor", &cursor.to_string());
            }
        }
        Ok(url)
    }

    /// Connection loop; returns once `close` fires or `events` is dropped
    pub async fn run(self, events: mpsc::Sender<StreamEvent>, mut close: watch::Receiver<bool>) {
        let mut backoff = self.config.initial_backoff;

        while !close_requested(&close) {
            let cursor = self.cursor.get();
            if events.send(StreamEvent::Connecting { cursor }).await.is_err() {
                break;
            }

            let (opened, event) = match self.run_session(cursor, &events, &mut close).await {
                SessionEnd::Stopped => break,
                SessionEnd::Closed { opened } => (opened, StreamEvent::Close),
                SessionEnd::Failed { opened, error } => {
                    warn!(error = %error, "Firehose connection failed");
                    (opened, StreamEvent::Error(error.to_string()))
                }
            };

            if events.send(event).await.is_err() {
                break;
            }

            if opened {
                backoff = self.config.initial_backoff;
            }

            info!(delay_ms = backoff.as_millis() as u64, "Reconnecting to firehose");
            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = close.changed() => {}
            }
            backoff = (backoff * 2).min(self.config.max_backoff);
        }

        info!("Firehose client stopped");
    }

    async fn run_session(
        &self,
        cursor: u64,
        events: &mpsc::Sender<StreamEvent>,
        close: &mut watch::Receiver<bool>,
    ) -> SessionEnd {
        let url = match self.subscribe_url(cursor) {
            Ok(url) => url,
            Err(error) => {
                return SessionEnd::Failed {
                    opened: false,
                    error,
                }
            }
        };

        debug!(url = %url, "Connecting to firehose");
        let (mut ws, _response) = tokio::select! {
            result = tokio_tungstenite::connect_async(url.as_str()) => match result {
                Ok(connection) => connection,
                Err(e) => {
                    return SessionEnd::Failed {
                        opened: false,
                        error: e.into(),
                    }
                }
            },
            _ = close.changed() => return SessionEnd::Stopped,
        };

        info!(cursor = cursor, "Connected to firehose");
        if events.send(StreamEvent::Open { cursor }).await.is_err() {
            let _ = ws.close(None).await;
            return SessionEnd::Stopped;
        }

        loop {
            tokio::select! {
                _ = close.changed() => {
                    if let Err(e) = ws.close(None).await {
                        debug!(error = %e, "Error sending close frame");
                    }
                    return SessionEnd::Stopped;
                }
                message = ws.next() => match message {
                    Some(Ok(Message::Text(text))) => {
                        let Some(event) = decode_message(text.as_str(), &self.config.collection) else {
                            continue;
                        };
                        if events.send(event).await.is_err() {
                            let _ = ws.close(None).await;
                            return SessionEnd::Stopped;
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        info!(frame = ?frame, "Firehose closed the connection");
                        return SessionEnd::Closed { opened: true };
                    }
                    // Ping/pong are handled by tungstenite; Jetstream sends no binary frames
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return SessionEnd::Failed {
                            opened: true,
                            error: e.into(),
                        }
                    }
                    None => return SessionEnd::Closed { opened: true },
                }
            }
        }
    }
}

fn close_requested(close: &watch::Receiver<bool>) -> bool {
    *close.borrow() || close.has_changed().is_err()
}
