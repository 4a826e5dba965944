//! Socket transport over tokio-tungstenite.
//!
//! One `WsTransport` exists per authenticated session and is shared by every
//! room. Reconnect policy is a fixed delay between attempts with a bounded
//! attempt count; held topics are re-subscribed after a successful reconnect
//! so consumers never observe a silent subscription loss.

use std::collections::HashSet;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, warn};

use careline_config::TransportConfig;

use crate::error::{TransportError, TransportResult};
use crate::frames::{ConnectionState, ControlFrame, RawFrame};

type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;

/// Capacity of the inbound frame fan-out channel
const FRAME_CHANNEL_CAPACITY: usize = 256;

/// Seam over the real-time connection.
///
/// The dispatcher is the only component that publishes or subscribes against
/// this directly; rooms never touch the socket themselves.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Establish the connection for the given user. Idempotent: calling while
    /// already connected or connecting is a no-op.
    async fn connect(&self, user_id: &str) -> TransportResult<()>;

    /// Tear the connection down, releasing every subscription. Runs to
    /// completion on every exit path and is safe to call repeatedly.
    async fn disconnect(&self);

    /// Fire-and-forget send. Fails with `NotConnected` while no connection
    /// exists; callers surface that instead of silently dropping the frame.
    async fn publish(&self, destination: &str, payload: serde_json::Value) -> TransportResult<()>;

    /// Register interest in a topic. Subscribing to an already-subscribed
    /// topic is a no-op.
    async fn subscribe(&self, topic: &str) -> TransportResult<()>;

    /// Deregister interest in a topic.
    async fn unsubscribe(&self, topic: &str) -> TransportResult<()>;

    /// Current connection state
    fn state(&self) -> ConnectionState;

    /// Watch channel for connection-state changes
    fn watch_state(&self) -> watch::Receiver<ConnectionState>;

    /// New receiver for inbound frames
    fn frames(&self) -> broadcast::Receiver<RawFrame>;
}

/// Transport implementation over a websocket connection
pub struct WsTransport {
    core: Arc<TransportCore>,
}

struct TransportCore {
    config: TransportConfig,
    write: Mutex<Option<WsSink>>,
    read_task: Mutex<Option<JoinHandle<()>>>,
    topics: Mutex<HashSet<String>>,
    user_id: Mutex<Option<String>>,
    state_tx: watch::Sender<ConnectionState>,
    frame_tx: broadcast::Sender<RawFrame>,
    shutting_down: AtomicBool,
}

impl WsTransport {
    pub fn new(config: TransportConfig) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (frame_tx, _) = broadcast::channel(FRAME_CHANNEL_CAPACITY);

        Self {
            core: Arc::new(TransportCore {
                config,
                write: Mutex::new(None),
                read_task: Mutex::new(None),
                topics: Mutex::new(HashSet::new()),
                user_id: Mutex::new(None),
                state_tx,
                frame_tx,
                shutting_down: AtomicBool::new(false),
            }),
        }
    }
}

#[async_trait]
impl Transport for WsTransport {
    async fn connect(&self, user_id: &str) -> TransportResult<()> {
        let state = *self.core.state_tx.borrow();
        if state != ConnectionState::Disconnected {
            debug!(?state, "connect called while not disconnected, ignoring");
            return Ok(());
        }

        self.core.shutting_down.store(false, Ordering::SeqCst);
        *self.core.user_id.lock().await = Some(user_id.to_string());

        self.core.clone().establish(user_id).await
    }

    async fn disconnect(&self) {
        self.core.shutting_down.store(true, Ordering::SeqCst);

        if let Some(task) = self.core.read_task.lock().await.take() {
            task.abort();
        }

        if let Some(mut sink) = self.core.write.lock().await.take() {
            let _ = sink.send(Message::Close(None)).await;
        }

        self.core.topics.lock().await.clear();
        *self.core.user_id.lock().await = None;
        self.core.state_tx.send_replace(ConnectionState::Disconnected);
        info!("transport disconnected");
    }

    async fn publish(&self, destination: &str, payload: serde_json::Value) -> TransportResult<()> {
        let frame = ControlFrame::Send {
            destination,
            payload: &payload,
        };
        let text = serde_json::to_string(&frame)?;

        let mut guard = self.core.write.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| TransportError::send_failed(e.to_string()))
    }

    async fn subscribe(&self, topic: &str) -> TransportResult<()> {
        let mut topics = self.core.topics.lock().await;
        if !topics.insert(topic.to_string()) {
            debug!(topic, "already subscribed, ignoring");
            return Ok(());
        }

        // A failure here is not fatal: the topic is recorded and will be
        // re-issued on the next reconnect.
        if let Err(e) = self.core.send_control(ControlFrame::Subscribe { topic }).await {
            warn!(topic, error = %e, "subscribe frame not sent, will retry on reconnect");
        }
        Ok(())
    }

    async fn unsubscribe(&self, topic: &str) -> TransportResult<()> {
        let mut topics = self.core.topics.lock().await;
        if !topics.remove(topic) {
            return Ok(());
        }

        if let Err(e) = self
            .core
            .send_control(ControlFrame::Unsubscribe { topic })
            .await
        {
            debug!(topic, error = %e, "unsubscribe frame not sent");
        }
        Ok(())
    }

    fn state(&self) -> ConnectionState {
        *self.core.state_tx.borrow()
    }

    fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.core.state_tx.subscribe()
    }

    fn frames(&self) -> broadcast::Receiver<RawFrame> {
        self.core.frame_tx.subscribe()
    }
}

impl TransportCore {
    /// Connect with the bounded fixed-delay retry policy, then spawn the
    /// read loop and re-issue held subscriptions.
    async fn establish(self: Arc<Self>, user_id: &str) -> TransportResult<()> {
        // send_replace stores the state even while nobody holds a receiver;
        // `state()` reads the sender side directly.
        self.state_tx.send_replace(ConnectionState::Connecting);

        let url = format!("{}?user_id={}", self.config.url, user_id);
        let delay = Duration::from_secs(self.config.reconnect_delay_seconds);

        for attempt in 1..=self.config.max_reconnect_attempts {
            if self.shutting_down.load(Ordering::SeqCst) {
                self.state_tx.send_replace(ConnectionState::Disconnected);
                return Ok(());
            }

            match connect_async(url.as_str()).await {
                Ok((stream, _response)) => {
                    let (sink, read) = stream.split();
                    *self.write.lock().await = Some(sink);

                    let core = self.clone();
                    let task = tokio::spawn(core.read_loop(read));
                    *self.read_task.lock().await = Some(task);

                    self.resubscribe_all().await;
                    self.state_tx.send_replace(ConnectionState::Connected);
                    info!(attempt, "transport connected");
                    return Ok(());
                }
                Err(e) => {
                    warn!(attempt, error = %e, "connection attempt failed");
                    if attempt < self.config.max_reconnect_attempts {
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        self.state_tx.send_replace(ConnectionState::Disconnected);
        Err(TransportError::unavailable(format!(
            "handshake failed after {} attempts",
            self.config.max_reconnect_attempts
        )))
    }

    /// Forward inbound text frames until the socket closes, then reconnect
    /// unless a deliberate teardown is in progress.
    async fn read_loop(
        self: Arc<Self>,
        mut read: futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>,
    ) {
        while let Some(result) = read.next().await {
            match result {
                Ok(Message::Text(text)) => match serde_json::from_str::<RawFrame>(&text) {
                    Ok(frame) => {
                        let _ = self.frame_tx.send(frame);
                    }
                    Err(e) => {
                        warn!(error = %e, "dropping malformed inbound frame");
                    }
                },
                Ok(Message::Close(_)) => {
                    debug!("server closed the connection");
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!(error = %e, "socket read error");
                    break;
                }
            }
        }

        if self.shutting_down.load(Ordering::SeqCst) {
            return;
        }

        *self.write.lock().await = None;
        self.state_tx.send_replace(ConnectionState::Disconnected);

        let user_id = self.user_id.lock().await.clone();
        if let Some(user_id) = user_id {
            info!("connection lost, reconnecting");
            if let Err(e) = self.clone().reconnect(user_id).await {
                error!(error = %e, "reconnect attempts exhausted");
            }
        }
    }

    /// Boxed re-entry into `establish` so the read loop can await a
    /// reconnect without the two futures' opaque types becoming mutually
    /// recursive (which would make the spawned read loop unprovably `Send`).
    fn reconnect(
        self: Arc<Self>,
        user_id: String,
    ) -> Pin<Box<dyn Future<Output = TransportResult<()>> + Send>> {
        Box::pin(async move { self.establish(&user_id).await })
    }

    /// Re-issue subscribe frames for every held topic after a reconnect.
    async fn resubscribe_all(&self) {
        let topics = self.topics.lock().await.clone();
        for topic in topics {
            if let Err(e) = self.send_control(ControlFrame::Subscribe { topic: &topic }).await {
                warn!(topic, error = %e, "resubscribe frame not sent");
            }
        }
    }

    async fn send_control(&self, frame: ControlFrame<'_>) -> TransportResult<()> {
        let text = serde_json::to_string(&frame)?;

        let mut guard = self.write.lock().await;
        let sink = guard.as_mut().ok_or(TransportError::NotConnected)?;
        sink.send(Message::Text(text))
            .await
            .map_err(|e| TransportError::send_failed(e.to_string()))
    }
}
