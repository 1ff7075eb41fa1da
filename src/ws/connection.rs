use std::{sync::Arc, time::Duration};

use bytes::Bytes;
use futures_util::{
    SinkExt, StreamExt,
    stream::{SplitSink, SplitStream},
};
use tokio::{
    io::{AsyncRead, AsyncWrite},
    sync::Mutex,
    time::{Instant, timeout, timeout_at},
};
use tokio_tungstenite::{
    WebSocketStream,
    tungstenite::{
        Message,
        protocol::{CloseFrame, frame::coding::CloseCode},
    },
};
use tokio_util::sync::CancellationToken;

use super::{ConnState, Reader, state::StateCell};
use crate::{
    error::ConnectionError,
    protocol::{PingStats, PongError},
    role::Role,
};

pub(crate) type WsSink<S> = SplitSink<WebSocketStream<S>, Message>;
pub(crate) type WsSource<S> = SplitStream<WebSocketStream<S>>;

/// Protocol-level frames, as opposed to application data.
#[derive(Debug, Clone, PartialEq)]
pub enum ControlFrame {
    Ping(Bytes),
    Pong(Bytes),
    Close(CloseCode, String),
}

impl From<ControlFrame> for Message {
    fn from(frame: ControlFrame) -> Self {
        match frame {
            ControlFrame::Ping(data) => Message::Ping(data),
            ControlFrame::Pong(data) => Message::Pong(data),
            ControlFrame::Close(code, reason) => Message::Close(Some(CloseFrame {
                code,
                reason: reason.into(),
            })),
        }
    }
}

/// Handle to one established WebSocket connection.
///
/// Owns the outbound half of the socket behind a single async mutex: pings,
/// pongs, close frames and data all go through [`Connection::write_control`]
/// or [`Connection::write_data`], so frames are never interleaved. The
/// inbound half is handed out once, as a [`Reader`].
pub struct Connection<S> {
    id: u64,
    role: Role,
    remote: String,
    created_at: Instant,
    write_wait: Duration,
    writer: Mutex<WsSink<S>>,
    state: StateCell,
    closed: CancellationToken,
    failure: parking_lot::Mutex<Option<ConnectionError>>,
    ping_stats: parking_lot::Mutex<PingStats>,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    /// Wraps an upgraded stream. `read_wait` is the read-deadline window,
    /// `None` disables it.
    pub fn new(
        id: u64,
        role: Role,
        remote: impl Into<String>,
        ws: WebSocketStream<S>,
        write_wait: Duration,
        read_wait: Option<Duration>,
    ) -> (Arc<Self>, Reader<S>) {
        let (sink, stream) = ws.split();
        let conn = Arc::new(Self {
            id,
            role,
            remote: remote.into(),
            created_at: Instant::now(),
            write_wait,
            writer: Mutex::new(sink),
            state: StateCell::new(ConnState::Connecting),
            closed: CancellationToken::new(),
            failure: parking_lot::Mutex::new(None),
            ping_stats: parking_lot::Mutex::new(PingStats::new()),
        });
        conn.state.connect();
        (conn, Reader::new(stream, read_wait))
    }

    #[must_use]
    pub fn id(&self) -> u64 { self.id }

    #[must_use]
    pub fn role(&self) -> Role { self.role }

    #[must_use]
    pub fn remote(&self) -> &str { &self.remote }

    #[must_use]
    pub fn state(&self) -> ConnState { self.state.get() }

    #[must_use]
    pub fn uptime(&self) -> Duration { self.created_at.elapsed() }

    /// Average round trip of the last pings answered by the peer.
    #[must_use]
    pub fn latency(&self) -> Option<Duration> { self.ping_stats.lock().average() }

    /// Deadline for a write started now.
    #[must_use]
    pub fn write_deadline(&self) -> Instant { Instant::now() + self.write_wait }

    /// Sends a control frame, failing if it is not written by `deadline`.
    pub async fn write_control(
        &self,
        frame: ControlFrame,
        deadline: Instant,
    ) -> Result<(), ConnectionError> {
        self.write(frame.into(), deadline).await
    }

    /// Sends an application message within the write deadline.
    pub async fn write_data(&self, message: Message) -> Result<(), ConnectionError> {
        debug_assert!(message.is_text() || message.is_binary());
        self.write(message, self.write_deadline()).await
    }

    async fn write(&self, message: Message, deadline: Instant) -> Result<(), ConnectionError> {
        let write = async {
            let mut sink = self.writer.lock().await;
            sink.send(message).await
        };
        match timeout_at(deadline, write).await {
            Ok(res) => res.map_err(ConnectionError::Write),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }

    /// Flushes whatever tungstenite has queued on its own, such as the pong
    /// for a ping it just read. If another writer already flushed it this
    /// sends nothing.
    pub(crate) async fn flush(&self) -> Result<(), ConnectionError> {
        let flush = async {
            let mut sink = self.writer.lock().await;
            sink.flush().await
        };
        match timeout_at(self.write_deadline(), flush).await {
            Ok(res) => res.map_err(ConnectionError::Write),
            Err(_) => Err(ConnectionError::WriteTimeout),
        }
    }

    /// Sends a ping carrying a fresh nonce.
    pub async fn ping(&self) -> Result<(), ConnectionError> {
        debug_assert!(self.role.originates_pings(), "servers only answer pings");
        let nonce = self.ping_stats.lock().new_ping();
        self.write_control(ControlFrame::Ping(nonce), self.write_deadline())
            .await
    }

    pub(crate) fn on_pong(&self, payload: &[u8]) {
        match self.ping_stats.lock().on_pong(payload) {
            Ok(rtt) => tracing::debug!(rtt_ms = rtt.as_millis(), "received PONG"),
            Err(PongError::Unsolicited) => tracing::trace!("unsolicited PONG"),
            Err(PongError::Nonce(expected)) => {
                tracing::debug!(got = ?payload, expected = ?expected, "mismatched pong nonce");
            }
        }
    }

    /// Best-effort close frame followed by [`Connection::close_socket`].
    ///
    /// Only the first caller that finds the connection open sends the
    /// frame; a failed send is ignored since the socket may already be gone.
    pub async fn shutdown(&self, code: CloseCode, reason: &str) {
        if self.state.begin_closing() {
            tracing::debug!(?code, reason, "sending close");
            let frame = ControlFrame::Close(code, reason.to_owned());
            if let Err(e) = self.write_control(frame, self.write_deadline()).await {
                tracing::debug!(error = %e, "close frame not sent");
            }
        }
        self.close_socket().await;
    }

    /// Closes the socket. Idempotent; returns false if it was already closed.
    ///
    /// A pending read on the [`Reader`] returns
    /// [`ConnectionError::LocallyClosed`], unless [`Connection::fail`]
    /// recorded a cause.
    pub async fn close_socket(&self) -> bool {
        if !self.state.close() {
            return false;
        }
        self.closed.cancel();
        let mut sink = self.writer.lock().await;
        let _ = timeout(self.write_wait, sink.close()).await;
        true
    }

    /// Closes the socket because of `err`. The first recorded error is what
    /// a pending or later read on the [`Reader`] returns.
    pub async fn fail(&self, err: ConnectionError) {
        {
            let mut failure = self.failure.lock();
            if failure.is_none() && !self.is_closed() {
                *failure = Some(err);
            }
        }
        self.close_socket().await;
    }

    pub(crate) fn take_failure(&self) -> Option<ConnectionError> { self.failure.lock().take() }

    #[must_use]
    pub fn is_closed(&self) -> bool { self.closed.is_cancelled() }

    /// Resolves once the socket has been closed.
    pub async fn closed(&self) { self.closed.cancelled().await }
}
