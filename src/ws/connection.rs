//! WebSocket connection manager
//!
//! Owns one physical WebSocket connection and keeps it alive:
//! - dial with retry and exponential backoff
//! - on-connect hook whose frames are written before anything else
//! - read task: text frames into pooled [`Message`]s; tungstenite queues the
//!   pong for every ping and flushes it on the next read or write
//! - write task: sole writer, multiplexes outbound frames, heartbeat pings,
//!   scheduled resets and reader termination
//! - transparent reconnect on benign close codes; every other failure is
//!   forwarded on the error channel and the manager stops

use crate::infrastructure::config::StreamOptions;
use crate::infrastructure::pool::BufferPool;
use crate::ws::message::Message;
use crate::{log_ws, Result, StreamError};
use bytes::Bytes;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, timeout, Instant, MissedTickBehavior};
use tokio_tungstenite::tungstenite::error::{Error as WsError, ProtocolError};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;
use tracing::Level;
use url::Url;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Hook run on every successful dial
///
/// Returned frames are written on the fresh socket before the read and write
/// tasks start. An error aborts the connection.
pub type ConnectHook = Arc<dyn Fn() -> Result<Vec<String>> + Send + Sync>;

/// Close code sent by the server when no payload was present
pub const CLOSE_NO_STATUS: u16 = 1005;
/// Stream ended without a close frame
pub const CLOSE_ABNORMAL: u16 = 1006;

/// Connection state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not started
    Disconnected,
    /// Dial in progress (first connect or internal reconnect)
    Connecting,
    /// Socket open, loops running
    Connected,
    /// Shutdown requested, tearing down
    Closing,
    /// Terminal
    Closed,
}

/// Cloneable handle for queueing outbound text frames
#[derive(Debug, Clone)]
pub struct FrameSender {
    tx: mpsc::Sender<String>,
}

impl FrameSender {
    /// Queue a text frame, waiting for queue capacity
    ///
    /// Fails with [`StreamError::ConnectionClosed`] once the manager stopped.
    pub async fn send(&self, frame: impl Into<String>) -> Result<()> {
        self.tx
            .send(frame.into())
            .await
            .map_err(|_| StreamError::ConnectionClosed)
    }
}

/// One physical WebSocket connection
pub struct ConnectionManager {
    url: String,
    options: StreamOptions,
    pool: Arc<BufferPool>,
    on_connect: Option<ConnectHook>,
    send_tx: mpsc::Sender<String>,
    msgs_rx: mpsc::Receiver<Message>,
    errs_rx: mpsc::Receiver<StreamError>,
    /// Halves moved into the supervisor on start
    wiring: Option<Wiring>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: CancellationToken,
    task: Option<JoinHandle<()>>,
}

struct Wiring {
    send_rx: mpsc::Receiver<String>,
    msgs_tx: mpsc::Sender<Message>,
    errs_tx: mpsc::Sender<StreamError>,
}

impl ConnectionManager {
    pub fn new(url: impl Into<String>, options: StreamOptions) -> Self {
        let (send_tx, send_rx) = mpsc::channel(options.send_queue_size.max(1));
        let (msgs_tx, msgs_rx) = mpsc::channel(options.inbound_queue_size.max(1));
        // Exactly one terminal error is ever forwarded
        let (errs_tx, errs_rx) = mpsc::channel(1);
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        let pool = Arc::new(BufferPool::new(
            options.buffer_pool_size,
            options.buffer_capacity,
        ));

        Self {
            url: url.into(),
            options,
            pool,
            on_connect: None,
            send_tx,
            msgs_rx,
            errs_rx,
            wiring: Some(Wiring {
                send_rx,
                msgs_tx,
                errs_tx,
            }),
            state: Arc::new(state),
            shutdown: CancellationToken::new(),
            task: None,
        }
    }

    /// Install the on-connect hook (before `start`)
    pub fn with_on_connect(mut self, hook: ConnectHook) -> Self {
        self.on_connect = Some(hook);
        self
    }

    /// Dial, run the hook and spawn the read/write loops
    ///
    /// Returns once the first connection is up. Fails on dial exhaustion,
    /// hook failure or cancellation of `ctx`; in that case the channels are
    /// closed and the manager is `Closed`.
    pub async fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        if self.shutdown.is_cancelled() {
            self.state.send_replace(ConnectionState::Closed);
            return Err(StreamError::Cancelled);
        }
        let wiring = self.wiring.take().ok_or(StreamError::AlreadyStarted)?;
        self.shutdown = ctx.child_token();
        self.state.send_replace(ConnectionState::Connecting);

        let socket = match open(
            &self.url,
            &self.options,
            self.on_connect.as_ref(),
            &self.shutdown,
        )
        .await
        {
            Ok(socket) => socket,
            Err(e) => {
                self.state.send_replace(ConnectionState::Closed);
                // wiring dropped: channels close
                return Err(e);
            }
        };

        self.state.send_replace(ConnectionState::Connected);
        let supervisor = Supervisor {
            url: self.url.clone(),
            options: self.options.clone(),
            pool: Arc::clone(&self.pool),
            on_connect: self.on_connect.clone(),
            send_rx: wiring.send_rx,
            msgs_tx: wiring.msgs_tx,
            errs_tx: wiring.errs_tx,
            state: Arc::clone(&self.state),
            shutdown: self.shutdown.clone(),
        };
        self.task = Some(tokio::spawn(supervisor.run(socket)));
        Ok(())
    }

    /// Queue a text frame for the write task
    pub async fn send(&self, frame: impl Into<String>) -> Result<()> {
        self.send_tx
            .send(frame.into())
            .await
            .map_err(|_| StreamError::ConnectionClosed)
    }

    pub fn sender(&self) -> FrameSender {
        FrameSender {
            tx: self.send_tx.clone(),
        }
    }

    /// Inbound text frames, in receipt order
    pub fn messages(&mut self) -> &mut mpsc::Receiver<Message> {
        &mut self.msgs_rx
    }

    /// Terminal connection errors; closed when the manager stops
    pub fn errors(&mut self) -> &mut mpsc::Receiver<StreamError> {
        &mut self.errs_rx
    }

    /// Both receivers at once, for a single `select!`
    pub fn receivers_mut(
        &mut self,
    ) -> (
        &mut mpsc::Receiver<Message>,
        &mut mpsc::Receiver<StreamError>,
    ) {
        (&mut self.msgs_rx, &mut self.errs_rx)
    }

    /// Initiate teardown; idempotent
    pub fn close(&self) {
        if !self.shutdown.is_cancelled() {
            if self.task.is_some() {
                self.state.send_if_modified(|s| {
                    let changed = *s != ConnectionState::Closed;
                    if changed {
                        *s = ConnectionState::Closing;
                    }
                    changed
                });
            }
            self.shutdown.cancel();
        }
    }

    /// Wait until both loops have exited
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log_ws!(Level::ERROR, url = %self.url, error = %e, "supervisor task failed");
            }
        }
        if self.wiring.take().is_some() {
            // never started
            self.state.send_replace(ConnectionState::Closed);
        }
    }

    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.state.subscribe()
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }
}

impl Drop for ConnectionManager {
    fn drop(&mut self) {
        self.shutdown.cancel();
    }
}

/// Why one socket's loops ended
enum Outcome {
    Shutdown,
    Reconnect(String),
    Forward(StreamError),
}

/// Write task: owns the socket sink and all channel senders
struct Supervisor {
    url: String,
    options: StreamOptions,
    pool: Arc<BufferPool>,
    on_connect: Option<ConnectHook>,
    send_rx: mpsc::Receiver<String>,
    msgs_tx: mpsc::Sender<Message>,
    errs_tx: mpsc::Sender<StreamError>,
    state: Arc<watch::Sender<ConnectionState>>,
    shutdown: CancellationToken,
}

impl Supervisor {
    async fn run(mut self, first: WsStream) {
        let mut socket = first;
        loop {
            match self.serve(socket).await {
                Outcome::Shutdown => break,
                Outcome::Forward(err) => {
                    log_ws!(Level::WARN, url = %self.url, error = %err, "connection failed");
                    let _ = self.errs_tx.try_send(err);
                    break;
                }
                Outcome::Reconnect(reason) => {
                    log_ws!(Level::INFO, url = %self.url, %reason, "reconnecting");
                    self.state.send_replace(ConnectionState::Connecting);
                    match open(
                        &self.url,
                        &self.options,
                        self.on_connect.as_ref(),
                        &self.shutdown,
                    )
                    .await
                    {
                        Ok(fresh) => socket = fresh,
                        Err(StreamError::Cancelled) => break,
                        Err(err) => {
                            let err = match err {
                                StreamError::DialExhausted { attempts, source } => {
                                    StreamError::ReconnectFailed { attempts, source }
                                }
                                other => other,
                            };
                            log_ws!(Level::ERROR, url = %self.url, error = %err, "reconnect failed");
                            let _ = self.errs_tx.try_send(err);
                            break;
                        }
                    }
                }
            }
        }
        self.state.send_replace(ConnectionState::Closed);
        log_ws!(Level::DEBUG, url = %self.url, "connection manager stopped");
        // senders drop with self: channels close only now
    }

    async fn serve(&mut self, socket: WsStream) -> Outcome {
        let (mut sink, stream) = socket.split();
        let reader_token = self.shutdown.child_token();
        let mut reader = tokio::spawn(read_loop(
            stream,
            Arc::clone(&self.pool),
            self.msgs_tx.clone(),
            reader_token.clone(),
        ));
        let mut reader_done = false;

        self.state.send_replace(ConnectionState::Connected);
        log_ws!(Level::INFO, url = %self.url, "connected");

        let period = self.options.ping_interval;
        let mut ping = interval_at(Instant::now() + period, period);
        ping.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let reset_after = self.options.reset_interval;
        let reset = async move {
            match reset_after {
                Some(d) => sleep(d).await,
                None => std::future::pending::<()>().await,
            }
        };
        tokio::pin!(reset);

        let outcome = loop {
            tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break Outcome::Shutdown,
                res = &mut reader => {
                    reader_done = true;
                    break match res {
                        Ok(Some(err)) => disposition(err),
                        Ok(None) => Outcome::Shutdown,
                        Err(e) => Outcome::Forward(StreamError::Protocol(format!("read task: {e}"))),
                    };
                }
                frame = self.send_rx.recv() => match frame {
                    Some(text) => {
                        if let Err(e) = sink.send(WsMessage::text(text)).await {
                            break disposition(write_error(e));
                        }
                    }
                    None => break Outcome::Shutdown,
                },
                _ = ping.tick() => {
                    if let Err(e) = sink.send(WsMessage::Ping(Bytes::new())).await {
                        break disposition(write_error(e));
                    }
                }
                _ = &mut reset => break Outcome::Reconnect("scheduled reset".to_string()),
            }
        };

        reader_token.cancel();
        if matches!(outcome, Outcome::Shutdown) {
            self.state.send_replace(ConnectionState::Closing);
        }
        if !matches!(outcome, Outcome::Forward(_)) {
            send_close(&mut sink).await;
        }
        if !reader_done {
            let _ = reader.await;
        }
        outcome
    }
}

/// Benign close codes reconnect in place; anything else is forwarded
fn disposition(err: StreamError) -> Outcome {
    match err {
        StreamError::Closed { code, reason } if is_reconnect_code(code) => {
            Outcome::Reconnect(format!("close {code}: {reason}"))
        }
        other => Outcome::Forward(other),
    }
}

/// Normal, no status, abnormal, service restart, try again later
#[inline]
pub fn is_reconnect_code(code: u16) -> bool {
    matches!(code, 1000 | CLOSE_NO_STATUS | CLOSE_ABNORMAL | 1012 | 1013)
}

async fn send_close(sink: &mut SplitSink<WsStream, WsMessage>) {
    let frame = CloseFrame {
        code: CloseCode::Normal,
        reason: "".into(),
    };
    let _ = timeout(Duration::from_secs(1), sink.send(WsMessage::Close(Some(frame)))).await;
}

async fn read_loop(
    mut stream: SplitStream<WsStream>,
    pool: Arc<BufferPool>,
    msgs_tx: mpsc::Sender<Message>,
    token: CancellationToken,
) -> Option<StreamError> {
    loop {
        let next = tokio::select! {
            biased;
            _ = token.cancelled() => return None,
            next = stream.next() => next,
        };

        match next {
            Some(Ok(WsMessage::Text(text))) => {
                let msg = Message::from_payload(text.as_str().as_bytes(), Arc::clone(&pool));
                // Full channel blocks the reader: backpressure, never drop
                tokio::select! {
                    biased;
                    _ = token.cancelled() => return None,
                    res = msgs_tx.send(msg) => {
                        if res.is_err() {
                            return None;
                        }
                    }
                }
            }
            Some(Ok(WsMessage::Close(frame))) => return Some(close_error(frame)),
            Some(Ok(WsMessage::Binary(data))) => {
                log_ws!(Level::DEBUG, len = data.len(), "ignoring binary frame");
            }
            // Ping: tungstenite already queued the pong
            Some(Ok(_)) => {}
            Some(Err(e)) => return Some(read_error(e)),
            None => {
                return Some(StreamError::Closed {
                    code: CLOSE_ABNORMAL,
                    reason: "stream ended".to_string(),
                })
            }
        }
    }
}

fn close_error(frame: Option<CloseFrame>) -> StreamError {
    match frame {
        Some(frame) => StreamError::Closed {
            code: u16::from(frame.code),
            reason: frame.reason.as_str().to_string(),
        },
        None => StreamError::Closed {
            code: CLOSE_NO_STATUS,
            reason: String::new(),
        },
    }
}

fn read_error(e: WsError) -> StreamError {
    match e {
        WsError::Io(e) => StreamError::Read(e.to_string()),
        WsError::ConnectionClosed | WsError::AlreadyClosed => StreamError::ConnectionClosed,
        WsError::Protocol(ProtocolError::ResetWithoutClosingHandshake) => StreamError::Closed {
            code: CLOSE_ABNORMAL,
            reason: "reset without closing handshake".to_string(),
        },
        other => StreamError::Protocol(other.to_string()),
    }
}

fn write_error(e: WsError) -> StreamError {
    match e {
        WsError::Io(e) => StreamError::Write(e.to_string()),
        WsError::ConnectionClosed | WsError::AlreadyClosed => StreamError::ConnectionClosed,
        other => StreamError::Protocol(other.to_string()),
    }
}

fn dial_error(e: WsError) -> StreamError {
    match e {
        WsError::Http(resp) => StreamError::Handshake(format!("HTTP {}", resp.status())),
        WsError::Url(e) => StreamError::InvalidUrl(e.to_string()),
        other => StreamError::Handshake(other.to_string()),
    }
}

/// Dial with retry, then write the hook's frames
async fn open(
    url: &str,
    options: &StreamOptions,
    hook: Option<&ConnectHook>,
    token: &CancellationToken,
) -> Result<WsStream> {
    let mut socket = dial(url, options, token).await?;
    if let Some(hook) = hook {
        for frame in hook()? {
            socket
                .send(WsMessage::text(frame))
                .await
                .map_err(write_error)?;
        }
    }
    Ok(socket)
}

/// Reject anything that is not a `ws://` or `wss://` URL before dialing
fn check_url(url: &str) -> Result<()> {
    let parsed = Url::parse(url).map_err(|e| StreamError::InvalidUrl(format!("{url}: {e}")))?;
    match parsed.scheme() {
        "ws" | "wss" => Ok(()),
        other => Err(StreamError::InvalidUrl(format!("{url}: unsupported scheme {other}"))),
    }
}

async fn dial(url: &str, options: &StreamOptions, token: &CancellationToken) -> Result<WsStream> {
    check_url(url)?;
    let attempts = options.dial_attempts.max(1);
    let mut delay = options.dial_backoff;
    let mut last_err = StreamError::ConnectionClosed;

    for attempt in 1..=attempts {
        let res = tokio::select! {
            biased;
            _ = token.cancelled() => return Err(StreamError::Cancelled),
            res = timeout(options.dial_timeout, connect_async(url)) => res,
        };

        match res {
            Ok(Ok((socket, _response))) => {
                if let MaybeTlsStream::Plain(tcp) = socket.get_ref() {
                    // Disable Nagle's algorithm - send frames immediately
                    let _ = tcp.set_nodelay(true);
                }
                return Ok(socket);
            }
            Ok(Err(e)) => last_err = dial_error(e),
            Err(_) => last_err = StreamError::DialTimeout(options.dial_timeout),
        }

        if matches!(last_err, StreamError::InvalidUrl(_)) {
            return Err(last_err);
        }

        log_ws!(Level::WARN, %url, attempt, max = attempts, error = %last_err, "dial failed");

        if attempt < attempts {
            tokio::select! {
                biased;
                _ = token.cancelled() => return Err(StreamError::Cancelled),
                _ = sleep(delay) => {}
            }
            delay = delay.saturating_mul(2);
        }
    }

    Err(StreamError::DialExhausted {
        attempts,
        source: Box::new(last_err),
    })
}
