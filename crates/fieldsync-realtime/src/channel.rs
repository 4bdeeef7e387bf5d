// SPDX-FileCopyrightText: 2026 Fieldsync Contributors
// SPDX-License-Identifier: MIT OR Apache-2.0

//! Self-healing WebSocket channel for the realtime order feed.
//!
//! One socket is live at a time. `connect` supersedes any previous socket
//! (closed with a normal-closure code) and any pending reconnect. When the
//! server closes or the socket fails, a reconnect to the last requested
//! topic is scheduled through [`ReconnectScheduler`].

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use fieldsync_config::model::{ApiConfig, RealtimeConfig};
use fieldsync_core::{ConnectionState, FieldsyncError, SocketEvent};
use fieldsync_vault::CredentialStore;
use futures::future::BoxFuture;
use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, oneshot, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};

use crate::protocol;
use crate::reconnect::{ReconnectPolicy, ReconnectScheduler};
use crate::router::MessageRouter;
use crate::store::OrderStore;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const EVENT_CAPACITY: usize = 256;
/// Time allowed for the close handshake before the session task is aborted.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

pub const NORMAL_CLOSURE: u16 = 1000;
const NO_STATUS_RECEIVED: u16 = 1005;
const ABNORMAL_CLOSURE: u16 = 1006;

struct CloseRequest {
    code: u16,
    reason: String,
    done: oneshot::Sender<()>,
}

struct Session {
    id: u64,
    close: oneshot::Sender<CloseRequest>,
    task: JoinHandle<()>,
}

#[derive(Default)]
struct Link {
    session: Option<Session>,
    /// Topic the change subscription was last sent for.
    subscribed_topic: Option<String>,
    /// Topic to return to after an unexpected close.
    desired_topic: Option<String>,
    /// Bumped by every connect and disconnect. A retry scheduled under an
    /// older generation is stale and must not touch the socket.
    generation: u64,
}

enum Ended {
    Closed { code: u16, reason: String },
    Failed(String),
}

struct Inner {
    config: RealtimeConfig,
    api_key: String,
    anon_key: String,
    credentials: Arc<CredentialStore>,
    router: MessageRouter,
    policy: ReconnectPolicy,
    scheduler: ReconnectScheduler,
    state: watch::Sender<ConnectionState>,
    events: broadcast::Sender<SocketEvent>,
    link: Mutex<Link>,
    next_session: AtomicU64,
    attempts: AtomicU32,
}

/// Handle to the realtime channel. Clones share the same socket.
#[derive(Clone)]
pub struct RealtimeChannel {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for RealtimeChannel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeChannel")
            .field("url", &self.inner.config.url)
            .field("state", &*self.inner.state.borrow())
            .finish_non_exhaustive()
    }
}

impl RealtimeChannel {
    pub fn new(
        config: &RealtimeConfig,
        api: &ApiConfig,
        credentials: Arc<CredentialStore>,
        store: Arc<OrderStore>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let (state, _) = watch::channel(ConnectionState::Idle);
        Self {
            inner: Arc::new(Inner {
                config: config.clone(),
                api_key: api.api_key.clone(),
                anon_key: api.anon_key.clone(),
                credentials,
                router: MessageRouter::new(store, events.clone()),
                policy: ReconnectPolicy::from_config(config),
                scheduler: ReconnectScheduler::new(),
                state,
                events,
                link: Mutex::new(Link::default()),
                next_session: AtomicU64::new(1),
                attempts: AtomicU32::new(0),
            }),
        }
    }

    /// Open a socket for `topic`, replacing any current one.
    ///
    /// Sends the join frame, then the change subscription unless it was
    /// already sent for this topic. A failed attempt schedules a retry
    /// before the error is returned.
    pub async fn connect(&self, topic: &str) -> Result<(), FieldsyncError> {
        self.inner.connect(topic).await
    }

    /// Close the socket with a normal-closure code and stop reconnecting.
    pub async fn disconnect(&self) {
        self.inner.disconnect().await;
    }

    pub fn state(&self) -> ConnectionState {
        self.inner.state.borrow().clone()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SocketEvent> {
        self.inner.events.subscribe()
    }

    pub fn store(&self) -> &Arc<OrderStore> {
        self.inner.router.store()
    }

    pub fn is_reconnect_pending(&self) -> bool {
        self.inner.scheduler.is_pending()
    }

    pub async fn subscribed_topic(&self) -> Option<String> {
        self.inner.link.lock().await.subscribed_topic.clone()
    }
}

impl Inner {
    async fn connect(self: &Arc<Self>, topic: &str) -> Result<(), FieldsyncError> {
        let mut link = self.link.lock().await;
        self.connect_locked(&mut link, topic).await
    }

    async fn connect_locked(
        self: &Arc<Self>,
        link: &mut Link,
        topic: &str,
    ) -> Result<(), FieldsyncError> {
        self.scheduler.cancel();
        link.generation += 1;
        link.desired_topic = Some(topic.to_owned());
        self.close_current(link, "superseded by new connect").await;

        self.state.send_replace(ConnectionState::Connecting);
        match self.open(topic, link).await {
            Ok(session) => {
                link.session = Some(session);
                self.attempts.store(0, Ordering::SeqCst);
                self.state.send_replace(ConnectionState::Open);
                let _ = self.events.send(SocketEvent::Open);
                info!(topic, "realtime channel open");
                Ok(())
            }
            Err(e) => {
                warn!(topic, error = %e, "realtime connect failed");
                self.state.send_replace(ConnectionState::Failed {
                    error: e.to_string(),
                });
                let _ = self.events.send(SocketEvent::Error(e.to_string()));
                self.schedule_reconnect(link.generation);
                Err(e)
            }
        }
    }

    async fn open(self: &Arc<Self>, topic: &str, link: &mut Link) -> Result<Session, FieldsyncError> {
        let token = match self.credentials.access_token().await {
            Some(token) => Some(token),
            None if !self.anon_key.is_empty() => Some(self.anon_key.clone()),
            None => None,
        };
        let url = protocol::connect_url(&self.config.url, &self.api_key, token.as_deref())?;

        let timeout = Duration::from_secs(self.config.connect_timeout_secs);
        let (socket, _) = tokio::time::timeout(timeout, tokio_tungstenite::connect_async(url.as_str()))
            .await
            .map_err(|_| FieldsyncError::Timeout { duration: timeout })?
            .map_err(|e| FieldsyncError::channel("websocket handshake failed", e))?;

        let (mut sink, stream) = socket.split();
        sink.send(Message::Text(protocol::join_frame(topic).into()))
            .await
            .map_err(|e| FieldsyncError::channel("failed to send join frame", e))?;

        if link.subscribed_topic.as_deref() == Some(topic) {
            debug!(topic, "already subscribed, skipping subscribe frame");
        } else {
            let frame = protocol::subscribe_frame(topic, &self.config.schema, &self.config.table);
            sink.send(Message::Text(frame.into()))
                .await
                .map_err(|e| FieldsyncError::channel("failed to send subscribe frame", e))?;
            link.subscribed_topic = Some(topic.to_owned());
            debug!(topic, table = %self.config.table, "subscribed to changes");
        }

        let id = self.next_session.fetch_add(1, Ordering::SeqCst);
        let heartbeat = match self.config.heartbeat_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let (close, close_rx) = oneshot::channel();
        let task = tokio::spawn(run_session(
            Arc::downgrade(self),
            id,
            self.router.clone(),
            heartbeat,
            sink,
            stream,
            close_rx,
        ));
        Ok(Session { id, close, task })
    }

    async fn disconnect(&self) {
        let mut link = self.link.lock().await;
        self.scheduler.cancel();
        link.generation += 1;
        link.desired_topic = None;
        link.subscribed_topic = None;
        self.attempts.store(0, Ordering::SeqCst);
        if self.close_current(&mut link, "client disconnect").await {
            info!("realtime channel disconnected");
        }
    }

    /// Close the live socket, if any, with a normal-closure code.
    async fn close_current(&self, link: &mut Link, reason: &str) -> bool {
        let Some(session) = link.session.take() else {
            return false;
        };
        self.state.send_replace(ConnectionState::Closing);
        close_session(session, NORMAL_CLOSURE, reason).await;
        self.state.send_replace(ConnectionState::Closed {
            code: NORMAL_CLOSURE,
            reason: reason.to_owned(),
        });
        let _ = self.events.send(SocketEvent::Closed {
            code: NORMAL_CLOSURE,
            reason: reason.to_owned(),
        });
        true
    }

    /// Called by a session task that ended without being asked to.
    async fn on_session_ended(self: &Arc<Self>, id: u64, ended: Ended) {
        let mut link = self.link.lock().await;
        if link.session.as_ref().map(|s| s.id) != Some(id) {
            return;
        }
        link.session = None;

        match ended {
            Ended::Closed { code, reason } => {
                info!(code, %reason, "realtime socket closed by server");
                self.state.send_replace(ConnectionState::Closed {
                    code,
                    reason: reason.clone(),
                });
                let _ = self.events.send(SocketEvent::Closed { code, reason });
            }
            Ended::Failed(error) => {
                warn!(%error, "realtime socket failed");
                self.state.send_replace(ConnectionState::Failed {
                    error: error.clone(),
                });
                let _ = self.events.send(SocketEvent::Error(error));
            }
        }

        if link.desired_topic.is_some() {
            self.schedule_reconnect(link.generation);
        }
    }

    fn schedule_reconnect(self: &Arc<Self>, generation: u64) {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst);
        let delay = self.policy.next_delay(attempt);
        debug!(attempt, ?delay, "scheduling realtime reconnect");
        self.scheduler
            .schedule(delay, reconnect_task(Arc::downgrade(self), generation));
    }
}

/// Retry for the connect made under `generation`. The link lock is held from
/// the staleness check through the reconnect.
fn reconnect_task(channel: Weak<Inner>, generation: u64) -> BoxFuture<'static, ()> {
    Box::pin(async move {
        let Some(inner) = channel.upgrade() else {
            return;
        };
        let mut link = inner.link.lock().await;
        if link.generation != generation {
            debug!(generation, current = link.generation, "dropping stale reconnect");
            return;
        }
        let Some(topic) = link.desired_topic.clone() else {
            return;
        };
        info!(%topic, "reconnecting realtime channel");
        if let Err(e) = inner.connect_locked(&mut link, &topic).await {
            debug!(error = %e, "reconnect attempt failed");
        }
    })
}

async fn close_session(session: Session, code: u16, reason: &str) {
    let (done, done_rx) = oneshot::channel();
    let request = CloseRequest {
        code,
        reason: reason.to_owned(),
        done,
    };
    if session.close.send(request).is_ok()
        && tokio::time::timeout(CLOSE_GRACE * 2, done_rx).await.is_ok()
    {
        return;
    }
    session.task.abort();
}

async fn run_session(
    channel: Weak<Inner>,
    id: u64,
    router: MessageRouter,
    heartbeat: Option<Duration>,
    mut sink: SplitSink<Socket, Message>,
    mut stream: SplitStream<Socket>,
    mut close_rx: oneshot::Receiver<CloseRequest>,
) {
    let mut beat = heartbeat.map(|period| tokio::time::interval_at(Instant::now() + period, period));
    let mut seq = 0u64;

    let ended = loop {
        tokio::select! {
            request = &mut close_rx => {
                if let Ok(request) = request {
                    close_gracefully(&mut sink, &mut stream, request).await;
                }
                return;
            }
            _ = tick(&mut beat) => {
                seq += 1;
                if let Err(e) = sink.send(Message::Text(protocol::heartbeat_frame(seq).into())).await {
                    break Ended::Failed(format!("heartbeat failed: {e}"));
                }
            }
            incoming = stream.next() => match incoming {
                Some(Ok(Message::Text(text))) => router.route(text.as_str()),
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f| (u16::from(f.code), f.reason.to_string()))
                        .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                    break Ended::Closed { code, reason };
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => break Ended::Failed(e.to_string()),
                None => break Ended::Closed {
                    code: ABNORMAL_CLOSURE,
                    reason: "connection dropped".into(),
                },
            },
        }
    };

    drop(close_rx);
    if let Some(inner) = channel.upgrade() {
        inner.on_session_ended(id, ended).await;
    }
}

async fn tick(beat: &mut Option<Interval>) {
    match beat {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

async fn close_gracefully(
    sink: &mut SplitSink<Socket, Message>,
    stream: &mut SplitStream<Socket>,
    request: CloseRequest,
) {
    let frame = CloseFrame {
        code: CloseCode::from(request.code),
        reason: request.reason.into(),
    };
    match sink.send(Message::Close(Some(frame))).await {
        Ok(()) => {
            // Wait for the peer's close reply so the handshake completes.
            let _ = tokio::time::timeout(CLOSE_GRACE, async {
                while let Some(Ok(message)) = stream.next().await {
                    if message.is_close() {
                        break;
                    }
                }
            })
            .await;
        }
        Err(e) => debug!(error = %e, "close frame not sent"),
    }
    let _ = request.done.send(());
}
