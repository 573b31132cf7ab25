use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use futures::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message as WsMessage;

use relay_core::backoff::ReconnectPolicy;
use relay_core::errors::GatewayError;
use relay_core::protocol::Envelope;

use crate::snapshot::DashboardSnapshot;

/// Connectivity of the manager's single gateway socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

impl ConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
        }
    }
}

/// Connection manager configuration.
#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Gateway WebSocket endpoint.
    pub url: String,
    pub policy: ReconnectPolicy,
    pub send_queue: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:5000/ws".into(),
            policy: ReconnectPolicy::default(),
            send_queue: 64,
        }
    }
}

type MessageHandler = Arc<dyn Fn(&Envelope) + Send + Sync>;
type StateHandler = Arc<dyn Fn(ConnectionState) + Send + Sync>;

enum HandlerKind {
    Message,
    State,
}

/// Registration handle returned by [`ConnectionManager::subscribe`] and
/// [`ConnectionManager::on_connection_change`]. Dropping it unregisters the
/// handler.
pub struct Subscription {
    id: u64,
    kind: HandlerKind,
    inner: Weak<Inner>,
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(inner) = self.inner.upgrade() {
            match self.kind {
                HandlerKind::Message => {
                    inner.message_handlers.lock().retain(|(id, _)| *id != self.id)
                }
                HandlerKind::State => {
                    inner.state_handlers.lock().retain(|(id, _)| *id != self.id)
                }
            }
        }
    }
}

/// Owns the single WebSocket connection to the gateway, re-establishes it
/// with exponential backoff, and fans incoming envelopes and state
/// transitions out to registered observers.
///
/// Built explicitly by the application root; `connect` and `disconnect` are
/// deliberate lifecycle calls, not module-load side effects. Clones share the
/// same underlying connection.
#[derive(Clone)]
pub struct ConnectionManager {
    inner: Arc<Inner>,
}

struct Inner {
    config: ClientConfig,
    state: RwLock<ConnectionState>,
    message_handlers: Mutex<Vec<(u64, MessageHandler)>>,
    state_handlers: Mutex<Vec<(u64, StateHandler)>>,
    next_handler_id: AtomicU64,
    /// Consecutive failed attempts since the last successful connect.
    attempts: AtomicU32,
    /// Presence test standing in for a reconnect timer: at most one pending.
    reconnect_pending: AtomicBool,
    /// Guards against a second concurrent connect driver.
    driver_active: AtomicBool,
    /// Set by `disconnect()`; suppresses reconnect scheduling.
    shutdown: AtomicBool,
    outbound: Mutex<Option<mpsc::Sender<String>>>,
    snapshot: Mutex<DashboardSnapshot>,
}

impl ConnectionManager {
    pub fn new(config: ClientConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                config,
                state: RwLock::new(ConnectionState::Disconnected),
                message_handlers: Mutex::new(Vec::new()),
                state_handlers: Mutex::new(Vec::new()),
                next_handler_id: AtomicU64::new(0),
                attempts: AtomicU32::new(0),
                reconnect_pending: AtomicBool::new(false),
                driver_active: AtomicBool::new(false),
                shutdown: AtomicBool::new(false),
                outbound: Mutex::new(None),
                snapshot: Mutex::new(DashboardSnapshot::default()),
            }),
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.inner.state.read()
    }

    /// Last known dashboard state assembled from `system_update` envelopes.
    pub fn snapshot(&self) -> DashboardSnapshot {
        self.inner.snapshot.lock().clone()
    }

    /// Open the gateway socket. Idempotent: a no-op while already connected.
    ///
    /// Also the explicit way back in after the reconnect budget is exhausted
    /// or after `disconnect()`.
    pub fn connect(&self) {
        if self.state() == ConnectionState::Connected {
            tracing::debug!("already connected to gateway");
            return;
        }
        self.inner.shutdown.store(false, Ordering::SeqCst);
        Inner::spawn_driver(Arc::clone(&self.inner));
    }

    /// Register a message observer. Invoked synchronously, in registration
    /// order, for every successfully parsed inbound envelope.
    pub fn subscribe(&self, handler: impl Fn(&Envelope) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .message_handlers
            .lock()
            .push((id, Arc::new(handler)));
        Subscription {
            id,
            kind: HandlerKind::Message,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Register a state observer. Invoked immediately with the current state
    /// so late subscribers are not blind to current connectivity, then on
    /// every transition.
    pub fn on_connection_change(
        &self,
        handler: impl Fn(ConnectionState) + Send + Sync + 'static,
    ) -> Subscription {
        let handler: StateHandler = Arc::new(handler);
        let id = self.inner.next_handler_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .state_handlers
            .lock()
            .push((id, Arc::clone(&handler)));
        handler(self.state());
        Subscription {
            id,
            kind: HandlerKind::State,
            inner: Arc::downgrade(&self.inner),
        }
    }

    /// Serialize and transmit a payload. Only while connected: otherwise the
    /// send is dropped with a warning — it is never queued for later
    /// delivery.
    pub fn send<T: Serialize>(&self, payload: &T) {
        let text = match serde_json::to_string(payload) {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize outbound payload");
                return;
            }
        };

        if self.state() != ConnectionState::Connected {
            tracing::warn!("not connected to gateway, message dropped");
            return;
        }

        let guard = self.inner.outbound.lock();
        match guard.as_ref() {
            Some(tx) => {
                if let Err(e) = tx.try_send(text) {
                    tracing::warn!(error = %e, "send queue rejected message, dropping");
                }
            }
            None => tracing::warn!("not connected to gateway, message dropped"),
        }
    }

    /// Cancel any pending reconnect, close the active socket, and clear all
    /// observer registrations. Terminal until observers re-subscribe and
    /// `connect()` is called again.
    pub fn disconnect(&self) {
        self.inner.shutdown.store(true, Ordering::SeqCst);
        self.inner.reconnect_pending.store(false, Ordering::SeqCst);

        // Dropping the sender closes the driver's write loop, which closes
        // the socket.
        *self.inner.outbound.lock() = None;

        self.inner.set_state(ConnectionState::Disconnected);
        self.inner.message_handlers.lock().clear();
        self.inner.state_handlers.lock().clear();
    }
}

impl Inner {
    fn set_state(&self, next: ConnectionState) {
        {
            let mut state = self.state.write();
            if *state == next {
                return;
            }
            *state = next;
        }
        tracing::debug!(state = next.as_str(), "connection state changed");
        let handlers: Vec<StateHandler> = self
            .state_handlers
            .lock()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(next);
        }
    }

    fn dispatch(&self, raw: &str) {
        let envelope: Envelope = match serde_json::from_str(raw) {
            Ok(env) => env,
            Err(e) => {
                let err = GatewayError::MalformedMessage(e.to_string());
                tracing::warn!(kind = err.error_kind(), "dropping inbound message");
                return;
            }
        };

        if let Envelope::SystemUpdate(update) = &envelope {
            self.snapshot.lock().apply(update);
        }

        let handlers: Vec<MessageHandler> = self
            .message_handlers
            .lock()
            .iter()
            .map(|(_, h)| Arc::clone(h))
            .collect();
        for handler in handlers {
            handler(&envelope);
        }
    }

    /// Spawn the connect driver unless one is already running.
    fn spawn_driver(inner: Arc<Inner>) {
        if inner
            .driver_active
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        tokio::spawn(async move {
            inner.set_state(ConnectionState::Connecting);
            tracing::debug!(url = %inner.config.url, "connecting to gateway");

            match connect_async(inner.config.url.as_str()).await {
                Ok((socket, _)) => {
                    inner.attempts.store(0, Ordering::SeqCst);
                    let (tx, mut rx) = mpsc::channel::<String>(inner.config.send_queue);
                    *inner.outbound.lock() = Some(tx);
                    inner.set_state(ConnectionState::Connected);
                    tracing::info!(url = %inner.config.url, "connected to gateway");

                    let (mut sink, mut stream) = socket.split();
                    loop {
                        tokio::select! {
                            out = rx.recv() => match out {
                                Some(text) => {
                                    if sink.send(WsMessage::Text(text.into())).await.is_err() {
                                        break;
                                    }
                                }
                                // disconnect() dropped the sender
                                None => break,
                            },
                            msg = stream.next() => match msg {
                                Some(Ok(WsMessage::Text(text))) => inner.dispatch(text.as_str()),
                                Some(Ok(WsMessage::Close(_))) | None => break,
                                Some(Ok(_)) => {}
                                Some(Err(e)) => {
                                    tracing::warn!(error = %e, "gateway socket error");
                                    break;
                                }
                            },
                        }
                    }

                    let _ = sink.close().await;
                    *inner.outbound.lock() = None;
                    tracing::info!("disconnected from gateway");
                }
                Err(e) => {
                    tracing::warn!(error = %e, "failed to connect to gateway");
                }
            }

            inner.driver_active.store(false, Ordering::SeqCst);
            inner.set_state(ConnectionState::Disconnected);
            inner.schedule_reconnect();
        });
    }

    /// Schedule a single reconnect after the backoff delay. A presence test,
    /// not a lock: at most one timer is ever pending.
    fn schedule_reconnect(self: &Arc<Self>) {
        if self.shutdown.load(Ordering::SeqCst) {
            return;
        }
        if self
            .reconnect_pending
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            return;
        }

        let attempts = self.attempts.load(Ordering::SeqCst);
        if self.config.policy.is_exhausted(attempts) {
            self.reconnect_pending.store(false, Ordering::SeqCst);
            tracing::warn!(
                attempts = attempts,
                "reconnect budget exhausted, staying disconnected"
            );
            return;
        }

        let delay = self.config.policy.delay(attempts);
        self.attempts.store(attempts + 1, Ordering::SeqCst);
        tracing::info!(
            delay_ms = delay.as_millis() as u64,
            attempt = attempts + 1,
            max_attempts = self.config.policy.max_attempts,
            "scheduling reconnect"
        );

        let inner = Arc::clone(self);
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            inner.reconnect_pending.store(false, Ordering::SeqCst);
            if !inner.shutdown.load(Ordering::SeqCst) {
                Inner::spawn_driver(inner);
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
    use axum::extract::State;
    use axum::response::IntoResponse;
    use axum::routing::get;
    use axum::Router;

    #[derive(Clone)]
    struct EchoState {
        accepted: Arc<AtomicUsize>,
        received: Arc<Mutex<Vec<String>>>,
        push: tokio::sync::broadcast::Sender<String>,
    }

    async fn ws_route(ws: WebSocketUpgrade, State(state): State<EchoState>) -> impl IntoResponse {
        ws.on_upgrade(move |socket| serve_socket(socket, state))
    }

    async fn serve_socket(mut socket: WebSocket, state: EchoState) {
        state.accepted.fetch_add(1, Ordering::SeqCst);
        let mut push = state.push.subscribe();
        loop {
            tokio::select! {
                msg = socket.recv() => match msg {
                    Some(Ok(Message::Text(text))) => state.received.lock().push(text.to_string()),
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(_)) => break,
                },
                out = push.recv() => {
                    if let Ok(text) = out {
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                }
            }
        }
    }

    async fn start_test_server() -> (String, EchoState) {
        let (push, _) = tokio::sync::broadcast::channel(16);
        let state = EchoState {
            accepted: Arc::new(AtomicUsize::new(0)),
            received: Arc::new(Mutex::new(Vec::new())),
            push,
        };
        let router = Router::new()
            .route("/ws", get(ws_route))
            .with_state(state.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        tokio::spawn(async move {
            axum::serve(listener, router).await.ok();
        });
        (format!("ws://127.0.0.1:{port}/ws"), state)
    }

    fn manager_for(url: &str) -> ConnectionManager {
        ConnectionManager::new(ClientConfig {
            url: url.into(),
            ..Default::default()
        })
    }

    async fn wait_for_state(manager: &ConnectionManager, want: ConnectionState) {
        for _ in 0..100 {
            if manager.state() == want {
                return;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        panic!("manager never reached {want:?}, stuck at {:?}", manager.state());
    }

    #[tokio::test]
    async fn state_observer_invoked_immediately_with_current_state() {
        let manager = manager_for("ws://127.0.0.1:1/ws");
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let _sub = manager.on_connection_change(move |state| seen_in.lock().push(state));
        assert_eq!(seen.lock().as_slice(), &[ConnectionState::Disconnected]);
    }

    #[tokio::test]
    async fn connect_is_idempotent_while_connected() {
        let (url, state) = start_test_server().await;
        let manager = manager_for(&url);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let _sub = manager.on_connection_change(move |s| seen_in.lock().push(s));

        manager.connect();
        wait_for_state(&manager, ConnectionState::Connected).await;

        // No new socket while already connected.
        manager.connect();
        manager.connect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(state.accepted.load(Ordering::SeqCst), 1);

        let transitions = seen.lock().clone();
        assert_eq!(
            transitions,
            vec![
                ConnectionState::Disconnected,
                ConnectionState::Connecting,
                ConnectionState::Connected,
            ]
        );
    }

    #[tokio::test]
    async fn send_while_disconnected_is_dropped_not_queued() {
        let (url, state) = start_test_server().await;
        let manager = manager_for(&url);

        // Dropped silently, no panic.
        manager.send(&serde_json::json!({"type": "subscribe"}));

        manager.connect();
        wait_for_state(&manager, ConnectionState::Connected).await;
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Nothing delivered after the connect: no queueing.
        assert!(state.received.lock().is_empty());

        // The live path still works.
        manager.send(&serde_json::json!({"type": "subscribe"}));
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(state.received.lock().len(), 1);
    }

    #[tokio::test]
    async fn parsed_envelopes_reach_observers_in_order() {
        let (url, state) = start_test_server().await;
        let manager = manager_for(&url);

        let first = Arc::new(Mutex::new(Vec::new()));
        let second = Arc::new(Mutex::new(Vec::new()));
        let order = Arc::new(Mutex::new(Vec::new()));

        let (f, o) = (Arc::clone(&first), Arc::clone(&order));
        let _sub_a = manager.subscribe(move |env| {
            f.lock().push(env.clone());
            o.lock().push("first");
        });
        let (s, o) = (Arc::clone(&second), Arc::clone(&order));
        let _sub_b = manager.subscribe(move |env| {
            s.lock().push(env.clone());
            o.lock().push("second");
        });

        manager.connect();
        wait_for_state(&manager, ConnectionState::Connected).await;

        state
            .push
            .send(r#"{"type":"system_update","timestamp":"10:00:00"}"#.into())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(first.lock().len(), 1);
        assert_eq!(second.lock().len(), 1);
        assert_eq!(order.lock().as_slice(), &["first", "second"]);
    }

    #[tokio::test]
    async fn malformed_messages_dropped_without_observer_call() {
        let (url, state) = start_test_server().await;
        let manager = manager_for(&url);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let _sub = manager.subscribe(move |_| {
            calls_in.fetch_add(1, Ordering::SeqCst);
        });

        manager.connect();
        wait_for_state(&manager, ConnectionState::Connected).await;

        state.push.send("this is not json".into()).unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);

        // The connection survives the malformed message.
        assert_eq!(manager.state(), ConnectionState::Connected);
    }

    #[tokio::test]
    async fn unrecognized_envelope_type_is_inert() {
        let (url, state) = start_test_server().await;
        let manager = manager_for(&url);

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let _sub = manager.subscribe(move |env| seen_in.lock().push(env.clone()));

        manager.connect();
        wait_for_state(&manager, ConnectionState::Connected).await;

        state
            .push
            .send(r#"{"type":"agent_heartbeat","timestamp":"10:00:00"}"#.into())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        // Observers see the envelope, but no snapshot mutation occurs.
        assert_eq!(seen.lock().as_slice(), &[Envelope::Unknown]);
        let snapshot = manager.snapshot();
        assert!(snapshot.last_update.is_none());
        assert!(snapshot.agents.is_empty());
        assert!(snapshot.metrics.is_none());
    }

    #[tokio::test]
    async fn system_update_mutates_snapshot() {
        let (url, state) = start_test_server().await;
        let manager = manager_for(&url);
        manager.connect();
        wait_for_state(&manager, ConnectionState::Connected).await;

        state
            .push
            .send(
                r#"{"type":"system_update","timestamp":"10:00:00","metrics":{
                    "autonomous_actions":95,"total_decisions":120,
                    "prevention_savings":128000,"prediction_accuracy":91.0,
                    "active_incidents":3}}"#
                    .into(),
            )
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;

        let snapshot = manager.snapshot();
        assert_eq!(snapshot.last_update.as_deref(), Some("10:00:00"));
        assert_eq!(snapshot.metrics.unwrap().prediction_accuracy, 91.0);
    }

    #[tokio::test]
    async fn reconnect_stops_after_max_attempts() {
        // Bind then drop to get a port nothing is listening on.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let manager = ConnectionManager::new(ClientConfig {
            url: format!("ws://127.0.0.1:{port}/ws"),
            policy: ReconnectPolicy {
                base: Duration::from_millis(20),
                cap: Duration::from_millis(100),
                max_attempts: 2,
            },
            send_queue: 8,
        });

        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_in = Arc::clone(&seen);
        let _sub = manager.on_connection_change(move |s| seen_in.lock().push(s));

        manager.connect();

        // Initial attempt plus two scheduled retries, then the circuit
        // breaker stops scheduling.
        tokio::time::sleep(Duration::from_millis(600)).await;
        let connecting = |log: &[ConnectionState]| {
            log.iter()
                .filter(|s| **s == ConnectionState::Connecting)
                .count()
        };
        assert_eq!(connecting(&seen.lock()), 3);

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(connecting(&seen.lock()), 3);
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        // An explicit connect() is the only way back in.
        manager.connect();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(connecting(&seen.lock()), 4);
    }

    #[tokio::test]
    async fn disconnect_clears_observers_and_stops_reconnect() {
        let (url, state) = start_test_server().await;
        let manager = manager_for(&url);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let _sub = manager.subscribe(move |_| {
            calls_in.fetch_add(1, Ordering::SeqCst);
        });

        manager.connect();
        wait_for_state(&manager, ConnectionState::Connected).await;

        manager.disconnect();
        assert_eq!(manager.state(), ConnectionState::Disconnected);

        tokio::time::sleep(Duration::from_millis(200)).await;
        // No reconnect after an explicit disconnect.
        assert_eq!(state.accepted.load(Ordering::SeqCst), 1);
        // Cleared observers never fire.
        state
            .push
            .send(r#"{"type":"system_update","timestamp":"10:00:00"}"#.into())
            .ok();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropping_subscription_unregisters() {
        let (url, state) = start_test_server().await;
        let manager = manager_for(&url);

        let calls = Arc::new(AtomicUsize::new(0));
        let calls_in = Arc::clone(&calls);
        let sub = manager.subscribe(move |_| {
            calls_in.fetch_add(1, Ordering::SeqCst);
        });

        manager.connect();
        wait_for_state(&manager, ConnectionState::Connected).await;

        drop(sub);
        state
            .push
            .send(r#"{"type":"system_update","timestamp":"10:00:00"}"#.into())
            .unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }
}
