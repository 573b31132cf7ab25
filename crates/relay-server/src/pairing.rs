use std::sync::Arc;
use std::time::Instant;

use axum::extract::ws::{Message as BrowserMessage, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as BackendMessage;
use uuid::Uuid;

/// Unique pairing identifier.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct PairingId(pub String);

impl Default for PairingId {
    fn default() -> Self {
        Self(format!("pair_{}", Uuid::now_v7()))
    }
}

impl PairingId {
    pub fn new() -> Self {
        Self::default()
    }
}

impl std::fmt::Display for PairingId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Registry of live browser/backend pairings.
#[derive(Default)]
pub struct PairingRegistry {
    pairings: DashMap<PairingId, Instant>,
}

impl PairingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn open(&self) -> PairingId {
        let id = PairingId::new();
        self.pairings.insert(id.clone(), Instant::now());
        id
    }

    fn close(&self, id: &PairingId) {
        self.pairings.remove(id);
    }

    /// Number of live pairings.
    pub fn count(&self) -> usize {
        self.pairings.len()
    }
}

/// Join one browser socket to one backend socket and relay until either side
/// goes away.
///
/// Lifecycle per connection: backend-connecting, relaying, closed. Messages
/// are forwarded verbatim, unparsed, preserving text/binary framing and
/// arrival order per direction. There is no buffering and no backend-leg
/// reconnect: closing either leg closes the other, and the browser client is
/// responsible for establishing a fresh connection.
pub async fn run(browser: WebSocket, backend_url: String, registry: Arc<PairingRegistry>) {
    let backend = match connect_async(backend_url.as_str()).await {
        Ok((socket, _)) => socket,
        Err(e) => {
            tracing::warn!(url = %backend_url, error = %e, "backend websocket connect failed");
            let mut browser = browser;
            let _ = browser.close().await;
            return;
        }
    };

    let id = registry.open();
    tracing::info!(pairing = %id, "websocket pairing established");

    let (mut browser_tx, mut browser_rx) = browser.split();
    let (mut backend_tx, mut backend_rx) = backend.split();

    loop {
        tokio::select! {
            msg = browser_rx.next() => match msg {
                Some(Ok(BrowserMessage::Close(_))) | None => {
                    tracing::debug!(pairing = %id, "browser leg closed");
                    break;
                }
                Some(Ok(msg)) => {
                    if let Some(forward) = browser_to_backend(msg) {
                        if backend_tx.send(forward).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(pairing = %id, error = %e, "browser leg error");
                    break;
                }
            },
            msg = backend_rx.next() => match msg {
                Some(Ok(BackendMessage::Close(_))) | None => {
                    tracing::debug!(pairing = %id, "backend leg closed");
                    break;
                }
                Some(Ok(msg)) => {
                    if let Some(forward) = backend_to_browser(msg) {
                        if browser_tx.send(forward).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!(pairing = %id, error = %e, "backend leg error");
                    break;
                }
            },
        }
    }

    // Linked teardown: closing an already-closed leg is a no-op.
    let _ = backend_tx.close().await;
    let _ = browser_tx.close().await;
    registry.close(&id);
    tracing::info!(pairing = %id, "websocket pairing closed");
}

/// Data frames cross the pairing verbatim; transport-level frames do not —
/// each leg answers its own pings.
fn browser_to_backend(msg: BrowserMessage) -> Option<BackendMessage> {
    match msg {
        BrowserMessage::Text(text) => Some(BackendMessage::Text(text.as_str().into())),
        BrowserMessage::Binary(data) => Some(BackendMessage::Binary(data)),
        BrowserMessage::Ping(_) | BrowserMessage::Pong(_) | BrowserMessage::Close(_) => None,
    }
}

fn backend_to_browser(msg: BackendMessage) -> Option<BrowserMessage> {
    match msg {
        BackendMessage::Text(text) => Some(BrowserMessage::Text(text.as_str().into())),
        BackendMessage::Binary(data) => Some(BrowserMessage::Binary(data)),
        _ => None,
    }
}
