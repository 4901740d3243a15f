//! Socket.IO event channel over WebSocket.
//!
//! [`EventChannel`] accepts simulator connections and gives each one:
//!
//! 1. **A connection task** that owns the socket. It answers the Engine.IO
//!    handshake and heartbeat, decodes frames, and writes every frame queued
//!    for the session in the [`SessionRegistry`].
//!
//! 2. **A worker task** that takes the session's events from a bounded FIFO
//!    and hands them to the [`EventRouter`] one at a time. A slow handler
//!    therefore only delays its own session.
//!
//! When the FIFO is full the connection task stops reading the socket until
//! the worker catches up ([`OverflowPolicy::Backpressure`]); heartbeats and
//! outbound frames keep flowing meanwhile. [`OverflowPolicy::DropNewest`]
//! instead discards events that find the FIFO full.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use drivelink_types::{DriveError, SessionId};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_tungstenite::{WebSocketStream, accept_hdr_async};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tracing::{debug, error, info, warn};

use crate::registry::{OutboundReceiver, SessionRegistry};
use crate::router::{EventRouter, RawEvent};
use crate::session::SessionHandle;
use crate::wire::{self, EnginePacket, EngineVersion, SocketPacket};

/// What happens to an inbound event that finds the session FIFO full.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverflowPolicy {
    /// Stop reading the socket until the worker frees a slot. No event is
    /// lost.
    #[default]
    Backpressure,
    /// Discard the event with a warning.
    DropNewest,
}

/// Connection-level tuning shared by every session.
#[derive(Debug, Clone, PartialEq)]
pub struct ChannelConfig {
    /// Interval between server pings (Engine.IO v4 only).
    pub ping_interval: Duration,
    /// How long a server ping may go unanswered before the session closes.
    pub ping_timeout: Duration,
    /// Capacity of each session's inbound event FIFO.
    pub queue_depth: usize,
    pub overflow: OverflowPolicy,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            ping_interval: Duration::from_millis(25_000),
            ping_timeout: Duration::from_millis(20_000),
            queue_depth: 8,
            overflow: OverflowPolicy::Backpressure,
        }
    }
}

struct Shared {
    registry: Arc<SessionRegistry>,
    router: EventRouter,
    config: ChannelConfig,
}

/// A bound, not yet serving, event channel.
pub struct EventChannel {
    listener: TcpListener,
    registry: Arc<SessionRegistry>,
    config: ChannelConfig,
}

impl EventChannel {
    /// Bind the listening socket.
    ///
    /// # Errors
    ///
    /// * [`DriveError::Config`] – `queue_depth` or `ping_interval` is zero.
    /// * [`DriveError::Channel`] – the address cannot be bound.
    pub async fn bind(addr: SocketAddr, config: ChannelConfig) -> Result<Self, DriveError> {
        if config.queue_depth == 0 {
            return Err(DriveError::Config("session queue depth must be at least 1".to_string()));
        }
        if config.ping_interval.is_zero() {
            return Err(DriveError::Config("ping interval must be non-zero".to_string()));
        }
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|e| DriveError::Channel(format!("bind error on {addr}: {e}")))?;
        Ok(Self {
            listener,
            registry: Arc::new(SessionRegistry::new()),
            config,
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, DriveError> {
        self.listener
            .local_addr()
            .map_err(|e| DriveError::Channel(format!("local address unavailable: {e}")))
    }

    /// The table of live sessions, for emitting from outside a handler.
    pub fn registry(&self) -> Arc<SessionRegistry> {
        Arc::clone(&self.registry)
    }

    /// Emit `event` to one session. `false` if it is not connected.
    pub fn emit(&self, session: SessionId, event: &str, payload: &Value) -> bool {
        self.registry.emit(session, event, payload)
    }

    /// Accept connections until the task is cancelled.
    pub async fn serve(self, router: EventRouter) -> Result<(), DriveError> {
        let Self {
            listener,
            registry,
            config,
        } = self;
        if let Ok(addr) = listener.local_addr() {
            info!(addr = %addr, "event channel listening");
        }
        let shared = Arc::new(Shared {
            registry,
            router,
            config,
        });

        loop {
            match listener.accept().await {
                Ok((stream, peer)) => {
                    let shared = Arc::clone(&shared);
                    tokio::spawn(async move {
                        if let Err(e) = handle_connection(stream, peer, shared).await {
                            warn!(peer = %peer, error = %e, "session ended with error");
                        }
                    });
                }
                Err(e) => {
                    error!(error = %e, "accept error");
                }
            }
        }
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Per-connection state
// ────────────────────────────────────────────────────────────────────────────

enum FrameAction {
    Continue,
    Reply(String),
    Queue(RawEvent),
    Close,
}

struct Connection {
    session: SessionHandle,
    version: EngineVersion,
    overflow: OverflowPolicy,
    queue: mpsc::Sender<RawEvent>,
    next_seq: u64,
    attached: bool,
    awaiting_pong: Option<Instant>,
}

impl Connection {
    fn new(
        session: SessionHandle,
        version: EngineVersion,
        overflow: OverflowPolicy,
        queue: mpsc::Sender<RawEvent>,
    ) -> Self {
        Self {
            session,
            version,
            overflow,
            queue,
            next_seq: 0,
            attached: false,
            awaiting_pong: None,
        }
    }

    fn take_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    /// Attach the default namespace and queue the `connect` event.
    fn attach(&mut self) -> String {
        self.attached = true;
        let seq = self.take_seq();
        self.enqueue(RawEvent::connect(seq));
        wire::encode_connect(self.version, &self.session.id().to_string())
    }

    /// Queue `raw` for the worker without waiting. Returns `false` if it was
    /// dropped.
    fn enqueue(&self, raw: RawEvent) -> bool {
        match self.submit(raw) {
            None => true,
            Some(raw) => {
                warn!(session = %self.session.id(), seq = raw.seq, event = %raw.name, "session queue full; event dropped");
                false
            }
        }
    }

    /// Try to hand `raw` to the worker. A full FIFO gives the event back.
    fn submit(&self, raw: RawEvent) -> Option<RawEvent> {
        match self.queue.try_send(raw) {
            Ok(()) => None,
            Err(TrySendError::Full(raw)) => Some(raw),
            Err(TrySendError::Closed(raw)) => {
                warn!(session = %self.session.id(), seq = raw.seq, event = %raw.name, "session worker gone; event dropped");
                None
            }
        }
    }

    /// Apply the overflow policy to an inbound event. Returns the event when
    /// it must wait for a free slot.
    fn admit(&self, raw: RawEvent) -> Option<RawEvent> {
        match self.overflow {
            OverflowPolicy::DropNewest => {
                self.enqueue(raw);
                None
            }
            OverflowPolicy::Backpressure => {
                let pending = self.submit(raw)?;
                debug!(session = %self.session.id(), seq = pending.seq, "session queue full; pausing reads");
                Some(pending)
            }
        }
    }

    fn on_frame(&mut self, text: &str) -> FrameAction {
        let packet = match wire::decode(text) {
            Ok(packet) => packet,
            Err(e) => {
                warn!(session = %self.session.id(), error = %e, "undecodable frame ignored");
                return FrameAction::Continue;
            }
        };

        match packet {
            EnginePacket::Ping(data) => FrameAction::Reply(wire::encode_pong(&data)),
            EnginePacket::Pong(_) => {
                self.awaiting_pong = None;
                FrameAction::Continue
            }
            EnginePacket::Close => FrameAction::Close,
            EnginePacket::Message(SocketPacket::Connect { namespace }) => {
                if namespace != "/" {
                    debug!(session = %self.session.id(), namespace = %namespace, "connect to unknown namespace ignored");
                    return FrameAction::Continue;
                }
                if self.attached {
                    return FrameAction::Continue;
                }
                FrameAction::Reply(self.attach())
            }
            EnginePacket::Message(SocketPacket::Disconnect { namespace }) if namespace != "/" => FrameAction::Continue,
            EnginePacket::Message(SocketPacket::Disconnect { .. }) => FrameAction::Close,
            EnginePacket::Message(SocketPacket::Event {
                namespace,
                name,
                payload,
                ..
            }) => {
                if namespace != "/" {
                    debug!(session = %self.session.id(), namespace = %namespace, event = %name, "event on unknown namespace dropped");
                    return FrameAction::Continue;
                }
                if !self.attached {
                    warn!(session = %self.session.id(), event = %name, "event before connect dropped");
                    return FrameAction::Continue;
                }
                let seq = self.take_seq();
                FrameAction::Queue(RawEvent::new(seq, name, payload))
            }
            _ => FrameAction::Continue,
        }
    }
}

async fn run_worker(shared: Arc<Shared>, session: SessionHandle, mut queue: mpsc::Receiver<RawEvent>) {
    while let Some(raw) = queue.recv().await {
        shared.router.dispatch(&session, raw).await;
    }
}

async fn handle_connection(stream: TcpStream, peer: SocketAddr, shared: Arc<Shared>) -> Result<(), DriveError> {
    let mut query: Option<String> = None;
    let ws_stream = accept_hdr_async(stream, |req: &Request, resp: Response| -> Result<Response, ErrorResponse> {
        query = req.uri().query().map(str::to_owned);
        Ok(resp)
    })
    .await
    .map_err(|e| DriveError::Channel(format!("ws handshake from {peer}: {e}")))?;

    let version = EngineVersion::from_query(query.as_deref());
    let session = SessionHandle::new(SessionId::new(), peer, Arc::clone(&shared.registry));
    let id = session.id();
    let mut outbound = shared.registry.register(id);
    info!(session = %id, peer = %peer, version = ?version, "session opened");

    let (queue_tx, queue_rx) = mpsc::channel(shared.config.queue_depth);
    let worker = tokio::spawn(run_worker(Arc::clone(&shared), session.clone(), queue_rx));
    let mut conn = Connection::new(session.clone(), version, shared.config.overflow, queue_tx);

    let result = pump(ws_stream, &mut conn, &mut outbound, &shared.config, peer).await;

    shared.registry.unregister(id);
    if conn.attached {
        let seq = conn.take_seq();
        if conn.queue.send(RawEvent::disconnect(seq)).await.is_err() {
            debug!(session = %id, "worker stopped before disconnect");
        }
    }
    drop(conn);
    if let Err(e) = worker.await {
        error!(session = %id, error = %e, "session worker panicked");
    }

    let duration_ms = (Utc::now() - session.connected_at()).num_milliseconds();
    info!(session = %id, peer = %peer, duration_ms, "session closed");
    result
}

type WsSink = SplitSink<WebSocketStream<TcpStream>, Message>;

/// Drive one socket until the peer leaves or the connection fails.
async fn pump(
    ws_stream: WebSocketStream<TcpStream>,
    conn: &mut Connection,
    outbound: &mut OutboundReceiver,
    config: &ChannelConfig,
    peer: SocketAddr,
) -> Result<(), DriveError> {
    let (mut ws_tx, mut ws_rx) = ws_stream.split();
    let version = conn.version;

    let open = wire::encode_open(
        &conn.session.id().to_string(),
        config.ping_interval.as_millis() as u64,
        config.ping_timeout.as_millis() as u64,
    );
    send_text(&mut ws_tx, open, peer).await?;
    if version == EngineVersion::V3 {
        let ack = conn.attach();
        send_text(&mut ws_tx, ack, peer).await?;
    }

    let mut heartbeat = tokio::time::interval_at(Instant::now() + config.ping_interval, config.ping_interval);
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // An event waiting for a FIFO slot; socket reads pause while it is set.
    let mut pending: Option<RawEvent> = None;
    let queue = conn.queue.clone();

    loop {
        tokio::select! {
            Some(frame) = outbound.recv() => {
                send_text(&mut ws_tx, frame, peer).await?;
            }
            _ = heartbeat.tick(), if version == EngineVersion::V4 => {
                if conn.awaiting_pong.is_some_and(|sent| sent.elapsed() > config.ping_timeout) {
                    return Err(DriveError::Channel(format!("heartbeat timeout from {peer}")));
                }
                send_text(&mut ws_tx, wire::encode_ping(), peer).await?;
                conn.awaiting_pong.get_or_insert_with(Instant::now);
            }
            permit = queue.reserve(), if pending.is_some() => {
                match (permit, pending.take()) {
                    (Ok(permit), Some(raw)) => permit.send(raw),
                    (Err(_), Some(raw)) => {
                        warn!(session = %conn.session.id(), seq = raw.seq, event = %raw.name, "session worker gone; event dropped");
                    }
                    (_, None) => {}
                }
            }
            msg = ws_rx.next(), if pending.is_none() => {
                match msg {
                    Some(Ok(Message::Text(text))) => match conn.on_frame(text.as_str()) {
                        FrameAction::Continue => {}
                        FrameAction::Reply(frame) => send_text(&mut ws_tx, frame, peer).await?,
                        FrameAction::Queue(raw) => pending = conn.admit(raw),
                        FrameAction::Close => return Ok(()),
                    },
                    Some(Ok(Message::Close(_))) | None => return Ok(()),
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        return Err(DriveError::Channel(format!("ws read from {peer}: {e}")));
                    }
                }
            }
        }
    }
}

async fn send_text(ws_tx: &mut WsSink, frame: String, peer: SocketAddr) -> Result<(), DriveError> {
    ws_tx
        .send(Message::Text(frame.into()))
        .await
        .map_err(|e| DriveError::Channel(format!("ws write to {peer}: {e}")))
}
