use std::{sync::Arc, time::Duration};

use tokio::{
    io::{AsyncRead, AsyncWrite},
    task::JoinHandle,
    time::{Instant, MissedTickBehavior, interval_at},
};
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use super::Connection;

/// Pings the peer every `period` until the connection closes or `cancel`
/// fires. A failed ping closes the socket and the read loop returns the
/// write error.
pub fn spawn_ping_loop<S>(
    conn: Arc<Connection<S>>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(
        async move {
            let mut ticker = interval_at(Instant::now() + period, period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        if let Err(e) = conn.ping().await {
                            tracing::error!(error = %e, "ping failed, closing connection");
                            conn.fail(e).await;
                            return;
                        }
                        tracing::trace!("sent PING");
                    }
                    () = cancel.cancelled() => return,
                    () = conn.closed() => return,
                }
            }
        }
        .in_current_span(),
    )
}

/// Logs the connection's state every `interval`. Performs no I/O on the
/// connection.
pub fn spawn_status_loop<S>(
    conn: Arc<Connection<S>>,
    interval: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(
        async move {
            let mut ticker = interval_at(Instant::now() + interval, interval);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        tracing::info!(
                            status = %conn.state(),
                            url = conn.remote(),
                            uptime_secs = conn.uptime().as_secs(),
                            latency = ?conn.latency(),
                            "connection status"
                        );
                    }
                    () = cancel.cancelled() => return,
                    () = conn.closed() => return,
                }
            }
        }
        .in_current_span(),
    )
}

/// Races `cancel` against the connection closing on its own.
///
/// On cancellation a close frame with `code` and `reason` is sent, at most
/// once, and the socket is closed. If the read loop tore the connection
/// down first, this task just exits.
pub fn spawn_close_on_cancel<S>(
    conn: Arc<Connection<S>>,
    cancel: CancellationToken,
    code: CloseCode,
    reason: &'static str,
) -> JoinHandle<()>
where
    S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
{
    tokio::spawn(
        async move {
            tokio::select! {
                () = cancel.cancelled() => {
                    tracing::debug!("cancelled, closing connection");
                    conn.shutdown(code, reason).await;
                }
                () = conn.closed() => {}
            }
        }
        .in_current_span(),
    )
}
