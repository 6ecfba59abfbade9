//! Test utilities: a scriptable local venue
//!
//! `MockVenue` accepts WebSocket clients on 127.0.0.1 and hands each one out
//! as a `MockConn` that records inbound text frames and pongs, and can push
//! frames or pings, close with a code or drop the TCP connection. The venue
//! can also turn away a number of upcoming handshakes with HTTP 503.

use crate::infrastructure::config::StreamOptions;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::{CloseFrame, Message as WsMessage};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::{accept_async, accept_hdr_async, WebSocketStream};

const WAIT: Duration = Duration::from_secs(5);

/// Options with short timers so tests finish quickly
pub fn fast_options() -> StreamOptions {
    StreamOptions {
        ping_interval: Duration::from_secs(30),
        heartbeat_interval: Duration::from_secs(60),
        reconnect_delay: Duration::from_millis(50),
        dial_attempts: 3,
        dial_backoff: Duration::from_millis(10),
        dial_timeout: Duration::from_secs(2),
        ..StreamOptions::default()
    }
}

enum Command {
    Send(String),
    Ping(Vec<u8>),
    Close(u16),
    Drop,
}

pub struct MockVenue {
    url: String,
    conns: mpsc::UnboundedReceiver<MockConn>,
    refusals: Arc<AtomicUsize>,
}

/// Server side of one accepted client
pub struct MockConn {
    frames: mpsc::UnboundedReceiver<String>,
    pongs: mpsc::UnboundedReceiver<Vec<u8>>,
    commands: mpsc::UnboundedSender<Command>,
}

impl MockVenue {
    pub async fn bind() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let (conn_tx, conns) = mpsc::unbounded_channel();
        let refusals = Arc::new(AtomicUsize::new(0));
        let pending = Arc::clone(&refusals);

        tokio::spawn(async move {
            while let Ok((tcp, _)) = listener.accept().await {
                let refuse = pending
                    .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                    .is_ok();
                if refuse {
                    let _ = accept_hdr_async(tcp, unavailable).await;
                    continue;
                }
                let Ok(ws) = accept_async(tcp).await else {
                    continue;
                };
                let (frames_tx, frames) = mpsc::unbounded_channel();
                let (pongs_tx, pongs) = mpsc::unbounded_channel();
                let (commands, cmd_rx) = mpsc::unbounded_channel();
                tokio::spawn(serve_client(ws, frames_tx, pongs_tx, cmd_rx));
                if conn_tx.send(MockConn { frames, pongs, commands }).is_err() {
                    break;
                }
            }
        });

        Self {
            url: format!("ws://{addr}"),
            conns,
            refusals,
        }
    }

    /// Answer the next `count` handshakes with HTTP 503
    pub fn refuse_handshakes(&self, count: usize) {
        self.refusals.store(count, Ordering::SeqCst);
    }

    /// URL of a port nobody listens on
    pub async fn unused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{addr}")
    }

    pub fn url(&self) -> String {
        self.url.clone()
    }

    /// Next accepted client
    pub async fn accept(&mut self) -> MockConn {
        timeout(WAIT, self.conns.recv())
            .await
            .expect("no client connected in time")
            .expect("venue stopped")
    }

    /// Next accepted client, if any arrives within `wait`
    pub async fn try_accept(&mut self, wait: Duration) -> Option<MockConn> {
        timeout(wait, self.conns.recv()).await.ok().flatten()
    }
}

impl MockConn {
    /// Next text frame sent by the client
    pub async fn next_frame(&mut self) -> String {
        timeout(WAIT, self.frames.recv())
            .await
            .expect("no frame received in time")
            .expect("client disconnected")
    }

    pub async fn next_json(&mut self) -> serde_json::Value {
        let frame = self.next_frame().await;
        serde_json::from_str(&frame).expect("client sent invalid JSON")
    }

    /// Next frame, if any arrives within `wait`
    pub async fn try_next_frame(&mut self, wait: Duration) -> Option<String> {
        timeout(wait, self.frames.recv()).await.ok().flatten()
    }

    /// Next pong payload received from the client, if any within `wait`
    pub async fn try_next_pong(&mut self, wait: Duration) -> Option<Vec<u8>> {
        timeout(wait, self.pongs.recv()).await.ok().flatten()
    }

    pub fn ping(&self, payload: &[u8]) {
        let _ = self.commands.send(Command::Ping(payload.to_vec()));
    }

    pub fn send(&self, frame: impl Into<String>) {
        let _ = self.commands.send(Command::Send(frame.into()));
    }

    /// Send a close frame with `code`, then hang up
    pub fn close(&self, code: u16) {
        let _ = self.commands.send(Command::Close(code));
    }

    /// Hang up without a close frame
    pub fn drop_connection(self) {
        let _ = self.commands.send(Command::Drop);
    }
}

fn unavailable(_: &Request, _: Response) -> Result<Response, ErrorResponse> {
    let mut resp = ErrorResponse::new(None);
    *resp.status_mut() = StatusCode::SERVICE_UNAVAILABLE;
    Err(resp)
}

async fn serve_client(
    ws: WebSocketStream<TcpStream>,
    frames_tx: mpsc::UnboundedSender<String>,
    pongs_tx: mpsc::UnboundedSender<Vec<u8>>,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
) {
    let (mut sink, mut stream) = ws.split();
    loop {
        tokio::select! {
            cmd = cmd_rx.recv() => match cmd {
                Some(Command::Send(text)) => {
                    if sink.send(WsMessage::text(text)).await.is_err() {
                        break;
                    }
                }
                Some(Command::Ping(payload)) => {
                    if sink.send(WsMessage::Ping(Bytes::from(payload))).await.is_err() {
                        break;
                    }
                }
                Some(Command::Close(code)) => {
                    let frame = CloseFrame { code: CloseCode::from(code), reason: "".into() };
                    let _ = sink.send(WsMessage::Close(Some(frame))).await;
                    break;
                }
                Some(Command::Drop) | None => break,
            },
            msg = stream.next() => match msg {
                Some(Ok(WsMessage::Text(text))) => {
                    let _ = frames_tx.send(text.as_str().to_string());
                }
                Some(Ok(WsMessage::Pong(payload))) => {
                    let _ = pongs_tx.send(payload.to_vec());
                }
                Some(Ok(_)) => {}
                _ => break,
            },
        }
    }
}
