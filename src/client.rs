use std::sync::Arc;

use tokio::net::TcpStream;
use tokio_tungstenite::{
    Connector, MaybeTlsStream, WebSocketStream, connect_async_tls_with_config,
    tungstenite::protocol::frame::coding::CloseCode,
};
use tokio_util::sync::CancellationToken;
use tracing::Instrument;
use url::Url;

use crate::{
    config::{ClientConfig, WS_PATH},
    error::ConnectionError,
    role::Role,
    supervisor::Worker,
    ws::{Connection, spawn_close_on_cancel, spawn_ping_loop, spawn_status_loop},
};

type ClientStream = MaybeTlsStream<TcpStream>;

/// Opens WebSocket connections to one server and keeps each alive until it
/// fails or is cancelled. Never retries on its own.
pub struct WebSocketClient {
    config: ClientConfig,
    url: String,
}

/// Client connection implementation for WebSocket
impl WebSocketClient {
    pub fn new(config: ClientConfig) -> Result<Self, url::ParseError> {
        let mut url = Url::parse(&format!("{}://{}:{}", config.scheme(), config.host, config.port))?;
        url.set_path(WS_PATH);
        Ok(Self {
            config,
            url: url.into(),
        })
    }

    #[must_use]
    pub fn url(&self) -> &str { &self.url }

    /// Opens exactly one connection and blocks until `cancel` fires or the
    /// connection fails.
    ///
    /// Returns `Ok(())` when the connection ended because of `cancel`.
    pub async fn start(&self, id: u64, cancel: CancellationToken) -> Result<(), ConnectionError> {
        let keepalive = self.config.keepalive;
        let ws = tokio::select! {
            biased;
            () = cancel.cancelled() => return Ok(()),
            ws = self.dial() => ws?,
        };

        let (conn, mut reader) = Connection::new(
            id,
            Role::Client,
            self.url.clone(),
            ws,
            keepalive.write_wait,
            Some(keepalive.pong_wait),
        );
        tracing::info!(url = %self.url, "connected");

        let tasks = [
            spawn_close_on_cancel(
                Arc::clone(&conn),
                cancel.clone(),
                CloseCode::Normal,
                "context cancelled",
            ),
            spawn_ping_loop(Arc::clone(&conn), keepalive.ping_period, cancel.clone()),
            spawn_status_loop(Arc::clone(&conn), keepalive.status_interval, cancel.clone()),
        ];

        // nothing is sent by the client, inbound data is drained and dropped
        let err = loop {
            match reader.next_data(&conn).await {
                Ok(msg) => tracing::trace!(len = msg.len(), "discarding message"),
                Err(e) => break e,
            }
        };

        conn.close_socket().await;
        for task in tasks {
            let _ = task.await;
        }

        if cancel.is_cancelled() {
            tracing::info!(url = %self.url, "connection closed on cancellation");
            return Ok(());
        }
        if err.is_expected_closure() {
            tracing::warn!(url = %self.url, error = %err, "websocket read failed");
        } else {
            tracing::error!(url = %self.url, error = %err, "websocket closed unexpectedly");
        }
        Err(err)
    }

    async fn dial(&self) -> Result<WebSocketStream<ClientStream>, ConnectionError> {
        let timeout = self.config.keepalive.handshake_timeout;
        let connector = if self.config.tls {
            Some(tls_connector()?)
        } else {
            None
        };
        let connect = connect_async_tls_with_config(self.url.as_str(), None, false, connector);
        match tokio::time::timeout(timeout, connect).await {
            Ok(Ok((ws, _response))) => Ok(ws),
            Ok(Err(e)) => Err(ConnectionError::from_handshake(e)),
            Err(_) => Err(ConnectionError::HandshakeTimeout(timeout)),
        }
    }
}

#[async_trait::async_trait]
impl Worker for WebSocketClient {
    async fn run(&self, id: u64, cancel: CancellationToken) -> Result<(), ConnectionError> {
        let span = tracing::info_span!("conn", id, role = Role::Client.label());
        self.start(id, cancel).instrument(span).await
    }
}

fn tls_connector() -> Result<Connector, ConnectionError> {
    let mut roots = rustls::RootCertStore::empty();
    roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());
    let provider = Arc::new(rustls::crypto::aws_lc_rs::default_provider());
    let config = rustls::ClientConfig::builder_with_provider(provider)
        .with_safe_default_protocol_versions()
        .map_err(ConnectionError::Tls)?
        .with_root_certificates(roots)
        .with_no_client_auth();
    Ok(Connector::Rustls(Arc::new(config)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn url_targets_ws_path() {
        let client = WebSocketClient::new(ClientConfig::new("localhost", 3003)).unwrap();
        assert_eq!(client.url(), "ws://localhost:3003/ws");

        let client =
            WebSocketClient::new(ClientConfig::new("example.com", 443).with_tls(true)).unwrap();
        assert_eq!(client.url(), "wss://example.com/ws");
    }

    #[test]
    fn tls_connector_builds() {
        assert!(matches!(tls_connector(), Ok(Connector::Rustls(_))));
    }

    #[tokio::test]
    async fn refused_dial_is_a_handshake_error() {
        // bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let client = WebSocketClient::new(ClientConfig::new("127.0.0.1", port)).unwrap();
        let err = client.start(1, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, ConnectionError::Handshake { status: None, .. }));
    }

    #[tokio::test]
    async fn cancelled_before_dial_is_clean() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let client = WebSocketClient::new(ClientConfig::new("127.0.0.1", 9)).unwrap();
        assert!(client.start(1, cancel).await.is_ok());
    }
}
