//! Generic stream session
//!
//! A session supervises one logical stream: it owns the subscription set,
//! drives a [`ConnectionManager`], resubscribes after every (re)connect,
//! sends application heartbeats, routes decoded records to a bounded output
//! channel and decides between reconnect and termination on failure.
//!
//! The control task is the only owner of the subscription set and the only
//! writer of the session state. Consumers talk to it through queues.

use super::codec::DecodeFn;
use super::dialect::{Dialect, Envelope};
use super::Credentials;
use crate::infrastructure::config::StreamOptions;
use crate::infrastructure::metrics::StreamMetrics;
use crate::ws::classify::ErrorClassifier;
use crate::ws::connection::{ConnectHook, ConnectionManager};
use crate::ws::message::Message;
use crate::ws::subscription::{batches, Subscription, SubscriptionSet};
use crate::{log_session, Result, StreamError};
use serde_json::Value;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::Level;

/// Depth of the subscribe / unsubscribe request queues
const REQUEST_QUEUE_SIZE: usize = 16;

/// Session lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Created, not started
    Idle,
    /// Dialing
    Connecting,
    /// Connected, sending the full subscription set
    Subscribing,
    /// Streaming
    Active,
    /// Waiting out the reconnect delay after a transient failure
    Reconnecting,
    /// Terminal
    Closed,
}

/// Typed, self-healing stream of `T` driven by subscriptions `U`
pub struct StreamSession<T, U> {
    name: String,
    url: String,
    dialect: Dialect,
    decode: DecodeFn<T>,
    initial: Vec<String>,
    options: StreamOptions,
    credentials: Option<Credentials>,
    classifier: ErrorClassifier,
    metrics: Arc<StreamMetrics>,
    ids: Arc<AtomicI64>,
    msgs_rx: mpsc::Receiver<T>,
    errs_rx: mpsc::Receiver<StreamError>,
    sub_tx: mpsc::Sender<Vec<String>>,
    unsub_tx: mpsc::Sender<Vec<String>>,
    /// Control-task halves, taken on start
    wiring: Option<Wiring<T>>,
    closed: CancellationToken,
    state: Arc<watch::Sender<SessionState>>,
    task: Option<JoinHandle<()>>,
    _subs: PhantomData<fn(U)>,
}

struct Wiring<T> {
    msgs_tx: mpsc::Sender<T>,
    errs_tx: mpsc::Sender<StreamError>,
    sub_rx: mpsc::Receiver<Vec<String>>,
    unsub_rx: mpsc::Receiver<Vec<String>>,
}

/// Cloneable handle for changing subscriptions from other tasks
pub struct SessionController<U> {
    sub_tx: mpsc::Sender<Vec<String>>,
    unsub_tx: mpsc::Sender<Vec<String>>,
    closed: CancellationToken,
    _subs: PhantomData<fn(U)>,
}

impl<U> Clone for SessionController<U> {
    fn clone(&self) -> Self {
        Self {
            sub_tx: self.sub_tx.clone(),
            unsub_tx: self.unsub_tx.clone(),
            closed: self.closed.clone(),
            _subs: PhantomData,
        }
    }
}

impl<U: Subscription> SessionController<U> {
    /// Queue a subscribe request; a no-op once the session is closed
    pub async fn subscribe<I: IntoIterator<Item = U>>(&self, subs: I) {
        enqueue(&self.sub_tx, &self.closed, subs).await;
    }

    /// Queue an unsubscribe request; a no-op once the session is closed
    pub async fn unsubscribe<I: IntoIterator<Item = U>>(&self, subs: I) {
        enqueue(&self.unsub_tx, &self.closed, subs).await;
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }
}

async fn enqueue<U: Subscription, I: IntoIterator<Item = U>>(
    tx: &mpsc::Sender<Vec<String>>,
    closed: &CancellationToken,
    subs: I,
) {
    if closed.is_cancelled() {
        return;
    }
    let channels: Vec<String> = subs.into_iter().map(|s| s.channel()).collect();
    if channels.is_empty() {
        return;
    }
    tokio::select! {
        biased;
        _ = closed.cancelled() => {}
        // Err only when the control task is gone
        _ = tx.send(channels) => {}
    }
}

impl<T, U> StreamSession<T, U>
where
    T: Send + 'static,
    U: Subscription,
{
    /// New idle session
    ///
    /// `name` prefixes the terminal error, e.g. `"bybit TradesStream"`.
    pub fn new(
        name: impl Into<String>,
        url: impl Into<String>,
        dialect: Dialect,
        decode: DecodeFn<T>,
        subscriptions: Vec<U>,
    ) -> Self {
        let options = StreamOptions::default();
        let (msgs_tx, msgs_rx) = mpsc::channel(options.output_capacity.max(1));
        let (errs_tx, errs_rx) = mpsc::channel(1);
        let (sub_tx, sub_rx) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let (unsub_tx, unsub_rx) = mpsc::channel(REQUEST_QUEUE_SIZE);
        let (state, _) = watch::channel(SessionState::Idle);

        Self {
            name: name.into(),
            url: url.into(),
            dialect,
            decode,
            initial: subscriptions.iter().map(Subscription::channel).collect(),
            options,
            credentials: None,
            classifier: ErrorClassifier::default(),
            metrics: Arc::new(StreamMetrics::new()),
            ids: Arc::new(AtomicI64::new(1)),
            msgs_rx,
            errs_rx,
            sub_tx,
            unsub_tx,
            wiring: Some(Wiring {
                msgs_tx,
                errs_tx,
                sub_rx,
                unsub_rx,
            }),
            closed: CancellationToken::new(),
            state: Arc::new(state),
            task: None,
            _subs: PhantomData,
        }
    }

    /// Credentials sent as an auth request on every connect (before `start`)
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = Some(credentials);
    }

    /// Replace tunables (before `start`); rebuilds the output channel
    pub fn set_options(&mut self, options: StreamOptions) {
        if let Some(wiring) = self.wiring.as_mut() {
            let (msgs_tx, msgs_rx) = mpsc::channel(options.output_capacity.max(1));
            wiring.msgs_tx = msgs_tx;
            self.msgs_rx = msgs_rx;
        }
        self.options = options;
    }

    /// Replace the reconnect classifier (before `start`)
    pub fn set_classifier(&mut self, classifier: ErrorClassifier) {
        self.classifier = classifier;
    }

    /// Connect and spawn the control task
    ///
    /// Returns once the first connection is up; the initial subscriptions
    /// are sent right after. Fails on invalid options, dial exhaustion,
    /// cancellation or a second call.
    pub async fn start(&mut self, ctx: CancellationToken) -> Result<()> {
        self.options.validate()?;
        let wiring = self.wiring.take().ok_or(StreamError::AlreadyStarted)?;
        let ctx = ctx.child_token();
        self.state.send_replace(SessionState::Connecting);
        log_session!(Level::INFO, stream = %self.name, url = %self.url, "starting");

        // Capacity 1: triggers coalesce, one full resend covers them all
        let (resub_tx, resub_rx) = mpsc::channel(1);
        let hook = connect_hook(
            self.dialect,
            self.credentials.clone(),
            Arc::clone(&self.ids),
            Arc::clone(&self.metrics),
            resub_tx,
        );

        let mut conn = ConnectionManager::new(self.url.clone(), self.options.clone())
            .with_on_connect(Arc::clone(&hook));
        if let Err(e) = conn.start(ctx.clone()).await {
            self.closed.cancel();
            self.state.send_replace(SessionState::Closed);
            log_session!(Level::ERROR, stream = %self.name, error = %e, "start failed");
            return Err(e.context(self.name.clone()));
        }

        let control = ControlTask {
            name: self.name.clone(),
            url: self.url.clone(),
            dialect: self.dialect,
            decode: self.decode,
            options: self.options.clone(),
            classifier: self.classifier.clone(),
            metrics: Arc::clone(&self.metrics),
            ids: Arc::clone(&self.ids),
            hook,
            set: self.initial.iter().cloned().collect(),
            conn,
            msgs_tx: wiring.msgs_tx,
            errs_tx: wiring.errs_tx,
            sub_rx: wiring.sub_rx,
            unsub_rx: wiring.unsub_rx,
            resub_rx,
            state: Arc::clone(&self.state),
            closed: self.closed.clone(),
            ctx,
        };
        self.task = Some(tokio::spawn(control.run()));
        Ok(())
    }

    /// Decoded records, in socket receipt order
    pub fn messages(&mut self) -> &mut mpsc::Receiver<T> {
        &mut self.msgs_rx
    }

    /// At most one terminal error, then closed
    pub fn errors(&mut self) -> &mut mpsc::Receiver<StreamError> {
        &mut self.errs_rx
    }

    /// Next record or the terminal error; `None` once both channels closed
    pub async fn recv(&mut self) -> Option<Result<T>> {
        tokio::select! {
            biased;
            Some(msg) = self.msgs_rx.recv() => Some(Ok(msg)),
            Some(err) = self.errs_rx.recv() => Some(Err(err)),
            else => None,
        }
    }

    pub async fn subscribe<I: IntoIterator<Item = U>>(&self, subs: I) {
        enqueue(&self.sub_tx, &self.closed, subs).await;
    }

    pub async fn unsubscribe<I: IntoIterator<Item = U>>(&self, subs: I) {
        enqueue(&self.unsub_tx, &self.closed, subs).await;
    }

    pub fn controller(&self) -> SessionController<U> {
        SessionController {
            sub_tx: self.sub_tx.clone(),
            unsub_tx: self.unsub_tx.clone(),
            closed: self.closed.clone(),
            _subs: PhantomData,
        }
    }

    /// Records waiting in the output channel
    pub fn pending_messages_count(&self) -> usize {
        self.msgs_rx.len()
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn watch_state(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    pub fn metrics(&self) -> Arc<StreamMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    /// Wait for the control task to finish
    pub async fn join(&mut self) {
        if let Some(task) = self.task.take() {
            if let Err(e) = task.await {
                log_session!(Level::ERROR, stream = %self.name, error = %e, "control task failed");
            }
        }
    }
}

impl<T, U> Drop for StreamSession<T, U> {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

/// On every connect: auth frame first (if configured), then a coalesced
/// "subscribe all" trigger for the control task
fn connect_hook(
    dialect: Dialect,
    credentials: Option<Credentials>,
    ids: Arc<AtomicI64>,
    metrics: Arc<StreamMetrics>,
    resub_tx: mpsc::Sender<()>,
) -> ConnectHook {
    Arc::new(move || {
        let mut frames = Vec::with_capacity(1);
        if let Some(creds) = &credentials {
            frames.push(dialect.auth_request(creds, next_id(&ids))?);
            metrics.record_requests(1);
        }
        match resub_tx.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => {}
            Err(TrySendError::Closed(())) => return Err(StreamError::ConnectionClosed),
        }
        Ok(frames)
    })
}

#[inline]
fn next_id(ids: &AtomicI64) -> i64 {
    ids.fetch_add(1, Ordering::Relaxed)
}

enum Event {
    Heartbeat,
    Resubscribe,
    Subscribe(Vec<String>),
    Unsubscribe(Vec<String>),
    Inbound(Message),
    ConnectionError(StreamError),
}

struct ControlTask<T> {
    name: String,
    url: String,
    dialect: Dialect,
    decode: DecodeFn<T>,
    options: StreamOptions,
    classifier: ErrorClassifier,
    metrics: Arc<StreamMetrics>,
    ids: Arc<AtomicI64>,
    hook: ConnectHook,
    set: SubscriptionSet,
    conn: ConnectionManager,
    msgs_tx: mpsc::Sender<T>,
    errs_tx: mpsc::Sender<StreamError>,
    sub_rx: mpsc::Receiver<Vec<String>>,
    unsub_rx: mpsc::Receiver<Vec<String>>,
    resub_rx: mpsc::Receiver<()>,
    state: Arc<watch::Sender<SessionState>>,
    closed: CancellationToken,
    ctx: CancellationToken,
}

impl<T: Send + 'static> ControlTask<T> {
    async fn run(mut self) {
        let terminal = self.control_loop().await;

        self.closed.cancel();
        self.conn.close();
        self.conn.join().await;
        self.state.send_replace(SessionState::Closed);

        match terminal {
            Some(err) => {
                log_session!(Level::ERROR, stream = %self.name, error = %err, "stream terminated");
                let _ = self.errs_tx.try_send(err.context(self.name.clone()));
            }
            None => log_session!(Level::INFO, stream = %self.name, "stream closed"),
        }
        // msgs_tx / errs_tx drop here, after the last send
    }

    /// Runs until cancellation (`None`) or a terminal error
    async fn control_loop(&mut self) -> Option<StreamError> {
        let period = self.options.heartbeat_interval;
        let mut heartbeat = interval_at(Instant::now() + period, period);
        heartbeat.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let event = {
                let (messages, errors) = self.conn.receivers_mut();
                tokio::select! {
                    biased;
                    _ = self.ctx.cancelled() => return None,
                    _ = heartbeat.tick() => Event::Heartbeat,
                    Some(()) = self.resub_rx.recv() => Event::Resubscribe,
                    Some(channels) = self.sub_rx.recv() => Event::Subscribe(channels),
                    Some(channels) = self.unsub_rx.recv() => Event::Unsubscribe(channels),
                    Some(msg) = messages.recv() => Event::Inbound(msg),
                    err = errors.recv() => Event::ConnectionError(
                        err.unwrap_or(StreamError::ConnectionClosed),
                    ),
                }
            };

            let res = match event {
                Event::Heartbeat => {
                    let frame = self.dialect.heartbeat(next_id(&self.ids));
                    self.send_frames(vec![frame]).await;
                    Ok(())
                }
                Event::Resubscribe => {
                    self.resubscribe_all().await;
                    Ok(())
                }
                Event::Subscribe(channels) => {
                    let added = self.set.add_new(channels);
                    self.send_batched(&added, true).await;
                    Ok(())
                }
                Event::Unsubscribe(channels) => {
                    let removed = self.set.remove_present(channels);
                    self.send_batched(&removed, false).await;
                    Ok(())
                }
                Event::Inbound(msg) => self.route(msg).await,
                Event::ConnectionError(err) => self.handle_connection_error(err).await,
            };

            if let Err(err) = res {
                return Some(err);
            }
        }
    }

    async fn resubscribe_all(&mut self) {
        self.state.send_replace(SessionState::Subscribing);
        let all = self.set.to_vec();
        log_session!(Level::INFO, stream = %self.name, channels = all.len(), "resubscribing");
        self.send_batched(&all, true).await;
        self.state.send_replace(SessionState::Active);
    }

    async fn send_batched(&mut self, channels: &[String], subscribe: bool) {
        let frames: Vec<String> = batches(channels, self.options.max_batch_size)
            .map(|batch| {
                let id = next_id(&self.ids);
                if subscribe {
                    self.dialect.subscribe_request(batch, id)
                } else {
                    self.dialect.unsubscribe_request(batch, id)
                }
            })
            .collect();
        self.send_frames(frames).await;
    }

    /// Queue frames on the current connection
    ///
    /// A failed send means the connection is gone; its error arrives on the
    /// error channel and drives the reconnect.
    async fn send_frames(&mut self, frames: Vec<String>) {
        for frame in frames {
            let sent = tokio::select! {
                biased;
                _ = self.ctx.cancelled() => return,
                res = self.conn.send(frame) => res,
            };
            match sent {
                Ok(()) => self.metrics.record_requests(1),
                Err(e) => {
                    log_session!(Level::DEBUG, stream = %self.name, error = %e, "request not sent");
                    return;
                }
            }
        }
    }

    async fn route(&mut self, mut msg: Message) -> Result<()> {
        self.metrics.record_frame();
        let frame: Value = simd_json::serde::from_slice(msg.data_mut())
            .map_err(|e| StreamError::InvalidMessage(e.to_string()))?;
        msg.release();

        let (channel, payload) = match self.dialect.classify(&frame)? {
            Envelope::Control => {
                self.metrics.record_control();
                return Ok(());
            }
            Envelope::Data { channel, payload } => (channel, payload),
        };

        if !self.set.contains(channel) {
            self.metrics.record_dropped();
            log_session!(Level::TRACE, stream = %self.name, %channel, "dropping unsubscribed frame");
            return Ok(());
        }

        let record = (self.decode)(payload)?;
        // Full channel blocks here: backpressure towards the socket
        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => {}
            res = self.msgs_tx.send(record) => {
                if res.is_ok() {
                    self.metrics.record_delivered();
                }
            }
        }
        Ok(())
    }

    async fn handle_connection_error(&mut self, err: StreamError) -> Result<()> {
        if !self.classifier.is_reconnectable(&err) {
            return Err(err);
        }

        log_session!(
            Level::WARN,
            stream = %self.name,
            error = %err,
            delay_ms = self.options.reconnect_delay.as_millis() as u64,
            "reconnecting"
        );
        self.metrics.record_reconnect();
        self.state.send_replace(SessionState::Reconnecting);
        self.conn.close();
        self.conn.join().await;

        tokio::select! {
            biased;
            _ = self.ctx.cancelled() => return Ok(()),
            _ = sleep(self.options.reconnect_delay) => {}
        }

        self.state.send_replace(SessionState::Connecting);
        let mut conn = ConnectionManager::new(self.url.clone(), self.options.clone())
            .with_on_connect(Arc::clone(&self.hook));
        match conn.start(self.ctx.clone()).await {
            Ok(()) => {
                self.conn = conn;
                Ok(())
            }
            // loop observes the cancellation next
            Err(StreamError::Cancelled) => Ok(()),
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::stream::codec::{decode_json, CodecError};
    use crate::test_utils::{fast_options, MockVenue};
    use crate::ws::classify::ErrorMatcher;
    use serde::Deserialize;
    use serde_json::json;
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug, Clone, Deserialize, PartialEq)]
    struct Tick {
        topic: String,
        seq: i64,
    }

    #[derive(Debug, Clone)]
    struct Sub(String);

    impl Subscription for Sub {
        fn channel(&self) -> String {
            format!("tickers.{}", self.0)
        }
    }

    fn subs(names: &[&str]) -> Vec<Sub> {
        names.iter().map(|n| Sub(n.to_string())).collect()
    }

    fn topic_session(url: String, initial: Vec<Sub>) -> StreamSession<Tick, Sub> {
        let mut session =
            StreamSession::new("test TickStream", url, Dialect::Topic, decode_json::<Tick>, initial);
        session.set_options(fast_options());
        session
    }

    fn tick(channel: &str, seq: i64) -> String {
        json!({"topic": channel, "seq": seq}).to_string()
    }

    async fn next_msg(session: &mut StreamSession<Tick, Sub>) -> Tick {
        timeout(Duration::from_secs(5), session.messages().recv())
            .await
            .expect("no message in time")
            .expect("stream closed")
    }

    #[tokio::test]
    async fn test_initial_subscribe_and_delivery() {
        let mut venue = MockVenue::bind().await;
        let mut session = topic_session(venue.url(), subs(&["A", "B"]));
        assert_eq!(session.state(), SessionState::Idle);
        session.start(CancellationToken::new()).await.unwrap();

        let mut peer = venue.accept().await;
        let req = peer.next_json().await;
        assert_eq!(req, json!({"op": "subscribe", "args": ["tickers.A", "tickers.B"]}));

        peer.send(r#"{"success":true,"op":"subscribe","ret_msg":""}"#);
        peer.send(tick("tickers.A", 1));
        peer.send(tick("tickers.B", 2));
        assert_eq!(next_msg(&mut session).await.seq, 1);
        assert_eq!(next_msg(&mut session).await.seq, 2);
        assert_eq!(session.state(), SessionState::Active);

        let snap = session.metrics().snapshot();
        assert_eq!(snap.control_frames, 1);
        assert_eq!(snap.messages_delivered, 2);
    }

    #[tokio::test]
    async fn test_subscribe_is_chunked() {
        let mut venue = MockVenue::bind().await;
        let mut session = topic_session(venue.url(), Vec::new());
        session.start(CancellationToken::new()).await.unwrap();
        let mut peer = venue.accept().await;

        let names: Vec<String> = (0..45).map(|i| format!("S{i:02}")).collect();
        session.subscribe(names.iter().map(|n| Sub(n.clone()))).await;

        let mut sizes = Vec::new();
        for _ in 0..3 {
            let req = peer.next_json().await;
            assert_eq!(req["op"], "subscribe");
            sizes.push(req["args"].as_array().unwrap().len());
        }
        assert_eq!(sizes, vec![20, 20, 5]);

        // Already present: no request at all
        session.subscribe(subs(&["S00", "S01"])).await;
        session.unsubscribe(subs(&["S00", "nope"])).await;
        let req = peer.next_json().await;
        assert_eq!(req, json!({"op": "unsubscribe", "args": ["tickers.S00"]}));
    }

    #[tokio::test]
    async fn test_unsubscribed_frames_are_dropped() {
        let mut venue = MockVenue::bind().await;
        let mut session = topic_session(venue.url(), subs(&["A"]));
        session.start(CancellationToken::new()).await.unwrap();
        let mut peer = venue.accept().await;
        peer.next_frame().await;

        peer.send(tick("tickers.Z", 1));
        peer.send(tick("tickers.A", 2));
        assert_eq!(next_msg(&mut session).await.seq, 2);
        assert!(session.errors().try_recv().is_err());
        assert_eq!(session.metrics().snapshot().dropped_unsubscribed, 1);
    }

    #[tokio::test]
    async fn test_backpressure_without_loss() {
        let mut venue = MockVenue::bind().await;
        let mut session = topic_session(venue.url(), subs(&["A"]));
        let mut options = fast_options();
        options.output_capacity = 1;
        options.inbound_queue_size = 1;
        session.set_options(options);
        session.start(CancellationToken::new()).await.unwrap();
        let mut peer = venue.accept().await;
        peer.next_frame().await;

        for seq in 0..50 {
            peer.send(tick("tickers.A", seq));
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(session.pending_messages_count() <= 1);

        for seq in 0..50 {
            assert_eq!(next_msg(&mut session).await.seq, seq);
        }
    }

    #[tokio::test]
    async fn test_internal_reconnect_resends_full_set() {
        let mut venue = MockVenue::bind().await;
        let mut session = topic_session(venue.url(), subs(&["A"]));
        session.start(CancellationToken::new()).await.unwrap();

        let mut first = venue.accept().await;
        first.next_frame().await;
        session.subscribe(subs(&["B"])).await;
        assert_eq!(
            first.next_json().await,
            json!({"op": "subscribe", "args": ["tickers.B"]})
        );

        first.close(1012);
        let mut second = venue.accept().await;
        assert_eq!(
            second.next_json().await,
            json!({"op": "subscribe", "args": ["tickers.A", "tickers.B"]})
        );

        second.send(tick("tickers.B", 7));
        assert_eq!(next_msg(&mut session).await.seq, 7);
        assert!(session.errors().try_recv().is_err());
    }

    #[tokio::test]
    async fn test_refused_redial_reconnects_session() {
        let mut venue = MockVenue::bind().await;
        let mut session = topic_session(venue.url(), subs(&["A", "B"]));
        session.start(CancellationToken::new()).await.unwrap();

        let mut first = venue.accept().await;
        first.next_frame().await;
        // Every in-place re-dial of the manager gets HTTP 503
        venue.refuse_handshakes(3);
        first.close(1012);

        let mut second = venue.accept().await;
        assert_eq!(
            second.next_json().await,
            json!({"op": "subscribe", "args": ["tickers.A", "tickers.B"]})
        );
        assert_eq!(session.metrics().snapshot().reconnects, 1);
        assert!(session.errors().try_recv().is_err());

        second.send(tick("tickers.A", 3));
        assert_eq!(next_msg(&mut session).await.seq, 3);
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_fatal_close_yields_single_error() {
        let mut venue = MockVenue::bind().await;
        let mut session = topic_session(venue.url(), subs(&["A"]));
        session.start(CancellationToken::new()).await.unwrap();
        let mut peer = venue.accept().await;
        peer.next_frame().await;

        peer.close(1008);

        let err = timeout(Duration::from_secs(5), session.errors().recv())
            .await
            .unwrap()
            .unwrap();
        assert!(err.to_string().starts_with("test TickStream: websocket: close 1008"), "{err}");
        assert!(session.errors().recv().await.is_none());
        assert!(session.messages().recv().await.is_none());
        assert_eq!(session.state(), SessionState::Closed);

        // Later requests are ignored
        session.subscribe(subs(&["B"])).await;
        assert!(venue.try_accept(Duration::from_millis(200)).await.is_none());
    }

    #[tokio::test]
    async fn test_custom_matcher_triggers_session_reconnect() {
        let mut venue = MockVenue::bind().await;
        let mut session = topic_session(venue.url(), subs(&["A", "B"]));
        session.set_classifier(
            ErrorClassifier::default().with_matcher(ErrorMatcher::substring("close 1008")),
        );
        session.start(CancellationToken::new()).await.unwrap();

        let mut first = venue.accept().await;
        first.next_frame().await;
        first.close(1008);

        let mut second = venue.accept().await;
        assert_eq!(
            second.next_json().await,
            json!({"op": "subscribe", "args": ["tickers.A", "tickers.B"]})
        );
        assert_eq!(session.metrics().snapshot().reconnects, 1);
        assert!(session.errors().try_recv().is_err());
    }

    #[tokio::test]
    async fn test_server_error_is_fatal() {
        let mut venue = MockVenue::bind().await;
        let mut session: StreamSession<Tick, Sub> = StreamSession::new(
            "deribit TickStream",
            venue.url(),
            Dialect::Rpc { private: false },
            decode_json::<Tick>,
            subs(&["A"]),
        );
        session.set_options(fast_options());
        session.start(CancellationToken::new()).await.unwrap();
        let mut peer = venue.accept().await;
        let req = peer.next_json().await;
        assert_eq!(req["method"], "public/subscribe");

        peer.send(r#"{"jsonrpc":"2.0","id":1,"error":{"code":11050,"message":"bad_request"}}"#);
        match session.recv().await {
            Some(Err(err)) => assert!(err.to_string().contains("server error"), "{err}"),
            other => panic!("unexpected {other:?}"),
        }
        assert!(session.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_decode_failure_is_fatal() {
        let mut venue = MockVenue::bind().await;
        let mut session = topic_session(venue.url(), subs(&["A"]));
        session.start(CancellationToken::new()).await.unwrap();
        let mut peer = venue.accept().await;
        peer.next_frame().await;

        peer.send(r#"{"topic":"tickers.A","seq":"not a number"}"#);
        let err = timeout(Duration::from_secs(5), session.errors().recv())
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(
            &err,
            StreamError::Context { source, .. } if matches!(**source, StreamError::Decode(CodecError::Json(_)))
        ));
    }

    #[tokio::test]
    async fn test_credentials_auth_precedes_subscribe() {
        let mut venue = MockVenue::bind().await;
        let mut session: StreamSession<Tick, Sub> = StreamSession::new(
            "deribit PortfolioStream",
            venue.url(),
            Dialect::Rpc { private: true },
            decode_json::<Tick>,
            subs(&["A"]),
        );
        session.set_options(fast_options());
        session.set_credentials(Credentials::new("id", "secret"));
        session.start(CancellationToken::new()).await.unwrap();

        let mut peer = venue.accept().await;
        let auth = peer.next_json().await;
        assert_eq!(auth["method"], "public/auth");
        let sub = peer.next_json().await;
        assert_eq!(sub["method"], "private/subscribe");
        assert_ne!(auth["id"], sub["id"]);
    }

    #[tokio::test]
    async fn test_cancel_closes_channels_once() {
        let mut venue = MockVenue::bind().await;
        let ctx = CancellationToken::new();
        let mut session = topic_session(venue.url(), subs(&["A"]));
        session.start(ctx.clone()).await.unwrap();
        let mut peer = venue.accept().await;
        peer.next_frame().await;
        let controller = session.controller();

        ctx.cancel();
        session.join().await;
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.messages().recv().await.is_none());
        assert!(session.errors().recv().await.is_none());
        assert!(controller.is_closed());

        controller.subscribe(subs(&["B"])).await;
        session.subscribe(subs(&["C"])).await;
        assert!(peer.try_next_frame(Duration::from_millis(200)).await.is_none());
    }

    #[tokio::test]
    async fn test_cancel_during_resubscribe() {
        let venue = MockVenue::bind().await;
        let ctx = CancellationToken::new();
        let names: Vec<String> = (0..2000).map(|i| format!("S{i:04}")).collect();
        let initial = names.iter().map(|n| Sub(n.clone())).collect();
        let mut session = topic_session(venue.url(), initial);
        let mut options = fast_options();
        options.send_queue_size = 1;
        session.set_options(options);
        let mut state = session.watch_state();
        session.start(ctx.clone()).await.unwrap();

        // 100 batches through a one-slot queue: still going when we look
        timeout(
            Duration::from_secs(5),
            state.wait_for(|s| *s == SessionState::Subscribing),
        )
        .await
        .unwrap()
        .unwrap();
        ctx.cancel();

        timeout(Duration::from_secs(5), session.join()).await.unwrap();
        assert_eq!(session.state(), SessionState::Closed);
        assert!(session.messages().recv().await.is_none());
        assert!(session.errors().recv().await.is_none());
        assert!(session.controller().is_closed());
    }

    #[tokio::test]
    async fn test_heartbeat_is_sent() {
        let mut venue = MockVenue::bind().await;
        let mut session = topic_session(venue.url(), Vec::new());
        let mut options = fast_options();
        options.heartbeat_interval = Duration::from_millis(50);
        session.set_options(options);
        session.start(CancellationToken::new()).await.unwrap();

        let mut peer = venue.accept().await;
        assert_eq!(peer.next_frame().await, r#"{"op":"ping"}"#);
    }

    #[tokio::test]
    async fn test_invalid_options_rejected() {
        let mut session = topic_session("ws://127.0.0.1:1".to_string(), Vec::new());
        let mut options = fast_options();
        options.heartbeat_interval = Duration::ZERO;
        session.set_options(options);
        let err = session.start(CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, StreamError::Config(_)), "{err:?}");
    }

    #[tokio::test]
    async fn test_start_twice_and_dial_failure() {
        let url = MockVenue::unused_url().await;
        let mut session = topic_session(url, Vec::new());
        let err = session.start(CancellationToken::new()).await.unwrap_err();
        assert!(err.to_string().contains("dial failed after 3 attempts"), "{err}");
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(
            session.start(CancellationToken::new()).await,
            Err(StreamError::AlreadyStarted)
        ));
    }
}
