use std::time::Duration;

use futures_util::StreamExt;
use tokio::{
    io::{AsyncRead, AsyncWrite},
    time::{Instant, timeout_at},
};
use tokio_tungstenite::tungstenite::{self, Message};

use super::{Connection, connection::WsSource};
use crate::error::{CloseReason, ConnectionError};

/// The single reader of a connection.
///
/// Every inbound frame, control frames included, pushes the read deadline
/// out by the wait window. Pings are answered before the next frame is
/// read.
pub struct Reader<S> {
    stream: WsSource<S>,
    wait: Option<Duration>,
    deadline: Option<Instant>,
}

impl<S> Reader<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    pub(crate) fn new(stream: WsSource<S>, wait: Option<Duration>) -> Self {
        Self {
            stream,
            wait,
            deadline: wait.map(|w| Instant::now() + w),
        }
    }

    /// Time by which the next inbound frame must arrive.
    #[must_use]
    pub fn deadline(&self) -> Option<Instant> { self.deadline }

    /// Reads until the next text or binary message.
    ///
    /// Pings are answered with exactly one pong carrying the same payload,
    /// sent before the next frame is read. Pongs are matched against the
    /// last ping. Fails when the deadline passes, the peer closes, the
    /// transport errors, or `conn` is closed locally.
    pub async fn next_data(&mut self, conn: &Connection<S>) -> Result<Message, ConnectionError> {
        loop {
            let next = tokio::select! {
                biased;
                () = conn.closed() => {
                    return Err(conn.take_failure().unwrap_or(ConnectionError::LocallyClosed));
                }
                next = self.recv() => next?,
            };
            let frame = match next {
                Some(Ok(frame)) => frame,
                Some(Err(tungstenite::Error::ConnectionClosed)) | None => {
                    return Err(ConnectionError::Eof);
                }
                Some(Err(e)) => return Err(ConnectionError::Read(e)),
            };
            self.extend_deadline();

            match frame {
                Message::Text(_) | Message::Binary(_) => return Ok(frame),
                Message::Ping(data) => {
                    tracing::trace!(len = data.len(), "received PING, flushing PONG");
                    // tungstenite queued the pong while reading the ping
                    conn.flush().await?;
                }
                Message::Pong(data) => conn.on_pong(&data),
                Message::Close(frame) => {
                    return Err(ConnectionError::Closed(CloseReason::from(frame.as_ref())));
                }
                Message::Frame(_) => {}
            }
        }
    }

    async fn recv(&mut self) -> Result<Option<tungstenite::Result<Message>>, ConnectionError> {
        match (self.deadline, self.wait) {
            (Some(deadline), Some(wait)) => timeout_at(deadline, self.stream.next())
                .await
                .map_err(|_| ConnectionError::DeadlineExceeded(wait)),
            _ => Ok(self.stream.next().await),
        }
    }

    fn extend_deadline(&mut self) {
        if let Some(wait) = self.wait {
            self.deadline = Some(Instant::now() + wait);
        }
    }
}
