use std::{
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use tokio::{
    net::{TcpListener, TcpStream},
    time::timeout,
};
use tokio_tungstenite::{
    accept_hdr_async,
    tungstenite::{
        handshake::server::{ErrorResponse, Request, Response},
        http::StatusCode,
        protocol::frame::coding::CloseCode,
    },
};
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use tracing::Instrument;

use crate::{
    config::{ServerConfig, WS_PATH},
    error::ServerError,
    metrics::Metrics,
    registry::{Registry, spawn_reporter},
    role::Role,
    ws::{Connection, spawn_close_on_cancel},
};

/// Echo server: every text or binary message is written back unchanged on
/// the connection it arrived on.
pub struct WebSocketServer {
    listener: TcpListener,
    registry: Arc<Registry>,
    config: ServerConfig,
    next_id: AtomicU64,
}

impl WebSocketServer {
    pub async fn bind(
        addr: &str,
        config: ServerConfig,
        metrics: Metrics,
    ) -> Result<Self, ServerError> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.to_owned(),
                source,
            })?;
        let local = listener.local_addr().map_err(ServerError::Addr)?;
        tracing::info!(addr = %local, path = WS_PATH, "listening");
        Ok(Self {
            listener,
            registry: Arc::new(Registry::new(metrics)),
            config,
            next_id: AtomicU64::new(1),
        })
    }

    pub fn local_addr(&self) -> Result<SocketAddr, ServerError> {
        self.listener.local_addr().map_err(ServerError::Addr)
    }

    #[must_use]
    pub fn registry(&self) -> Arc<Registry> { Arc::clone(&self.registry) }

    /// Number of connections whose read loop is currently running.
    #[must_use]
    pub fn connection_count(&self) -> usize { self.registry.len() }

    /// Accepts connections until `cancel` fires, then waits up to the
    /// shutdown grace for open connections to finish.
    pub async fn run(self, cancel: CancellationToken) {
        let Self {
            listener,
            registry,
            config,
            next_id,
        } = self;
        let tracker = TaskTracker::new();
        let reporter = spawn_reporter(Arc::clone(&registry), config.report_interval, cancel.clone());

        loop {
            let accepted = tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                accepted = listener.accept() => accepted,
            };
            let (stream, peer) = match accepted {
                Ok(accepted) => accepted,
                Err(e) => {
                    tracing::warn!(error = %e, "accept failed");
                    tokio::time::sleep(Duration::from_millis(100)).await;
                    continue;
                }
            };

            let id = next_id.fetch_add(1, Ordering::Relaxed);
            let span = tracing::info_span!("conn", id, role = Role::Server.label(), remote = %peer);
            tracker.spawn(
                handle_connection(stream, peer, id, Arc::clone(&registry), config, cancel.clone())
                    .instrument(span),
            );
        }

        drop(listener);
        tracker.close();
        tracing::info!(open = tracker.len(), "shutting down");
        if timeout(config.shutdown_grace, tracker.wait()).await.is_err() {
            tracing::error!(
                open = tracker.len(),
                grace_secs = config.shutdown_grace.as_secs(),
                "connections still open after shutdown grace"
            );
        }
        let _ = reporter.await;
    }
}

#[allow(clippy::result_large_err)]
fn check_path(req: &Request, resp: Response) -> Result<Response, ErrorResponse> {
    if req.uri().path() == WS_PATH {
        return Ok(resp);
    }
    let mut err = ErrorResponse::new(Some("not found".to_owned()));
    *err.status_mut() = StatusCode::NOT_FOUND;
    Err(err)
}

async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    id: u64,
    registry: Arc<Registry>,
    config: ServerConfig,
    cancel: CancellationToken,
) {
    let ws = match timeout(config.handshake_timeout, accept_hdr_async(stream, check_path)).await {
        Ok(Ok(ws)) => ws,
        Ok(Err(e)) => {
            tracing::warn!(error = %e, "websocket upgrade failed");
            return;
        }
        Err(_) => {
            tracing::warn!("websocket upgrade timed out");
            return;
        }
    };

    let remote = peer.to_string();
    let (conn, mut reader) = Connection::new(
        id,
        Role::Server,
        remote.clone(),
        ws,
        config.write_wait,
        config.idle_timeout,
    );
    registry.insert(id, remote);
    tracing::info!(count = registry.len(), "websocket connected");

    let watcher = spawn_close_on_cancel(
        Arc::clone(&conn),
        cancel,
        CloseCode::Away,
        "server shutting down",
    );

    let err = loop {
        let msg = match reader.next_data(&conn).await {
            Ok(msg) => msg,
            Err(e) => break e,
        };
        tracing::debug!(len = msg.len(), binary = msg.is_binary(), "echo");
        if let Err(e) = conn.write_data(msg).await {
            break e;
        }
    };

    registry.remove(id);
    conn.close_socket().await;
    let _ = watcher.await;

    if err.is_expected_closure() {
        tracing::info!(reason = %err, count = registry.len(), "websocket disconnected");
    } else {
        tracing::warn!(error = %err, count = registry.len(), "websocket disconnected");
    }
}

#[cfg(test)]
mod tests {
    use tokio_tungstenite::tungstenite::http::Uri;

    use super::*;

    fn request(path: &str) -> Request {
        Request::builder()
            .uri(path.parse::<Uri>().unwrap())
            .body(())
            .unwrap()
    }

    #[test]
    fn only_ws_path_upgrades() {
        assert!(check_path(&request("/ws"), Response::new(())).is_ok());
        assert!(check_path(&request("/ws?x=1"), Response::new(())).is_ok());

        let err = check_path(&request("/"), Response::new(())).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        let err = check_path(&request("/ws/extra"), Response::new(())).unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bind_failure_names_address() {
        let taken = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = taken.local_addr().unwrap().to_string();

        let Err(err) = WebSocketServer::bind(&addr, ServerConfig::default(), Metrics::new()).await
        else {
            panic!("second bind on {addr} succeeded");
        };
        assert!(matches!(&err, ServerError::Bind { addr: a, .. } if *a == addr));
    }

    #[tokio::test]
    async fn run_returns_after_cancel() {
        let server = WebSocketServer::bind("127.0.0.1:0", ServerConfig::default(), Metrics::new())
            .await
            .unwrap();
        assert_eq!(server.connection_count(), 0);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(server.run(cancel.clone()));
        cancel.cancel();
        task.await.unwrap();
    }
}
