use std::{io, time::Duration};

use tokio_tungstenite::tungstenite::{
    self, error::ProtocolError, http::StatusCode, protocol::CloseFrame,
};

/// Close reason codes as specified in
/// [RFC 6455](https://www.rfc-editor.org/rfc/rfc6455.html#section-7.4)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// Normal close
    Normal,
    /// Going away
    GoingAway,
    /// Websocket protocol violation
    ProtoError,
    /// Unsupported data type
    DataType,
    /// No reason code provided
    NoneGiven,
    /// Abnormal closure, the peer vanished without a close frame
    Abnormal,
    /// Invalid UTF-8 in Text message
    DataError,
    /// Generic policy violation
    Policy,
    /// Messages are too big
    TooBig,
    /// An unexpected condition that prevented the request from being fulfilled
    Unexpected,
    /// Other valid codes with unknown meanings
    Other(u16),
}

impl From<u16> for CloseReason {
    fn from(code: u16) -> Self {
        match code {
            1000 => CloseReason::Normal,
            1001 => CloseReason::GoingAway,
            1002 => CloseReason::ProtoError,
            1003 => CloseReason::DataType,
            1005 => CloseReason::NoneGiven,
            1006 => CloseReason::Abnormal,
            1007 => CloseReason::DataError,
            1008 => CloseReason::Policy,
            1009 => CloseReason::TooBig,
            1011 => CloseReason::Unexpected,
            n => CloseReason::Other(n),
        }
    }
}

impl From<Option<&CloseFrame>> for CloseReason {
    fn from(frame: Option<&CloseFrame>) -> Self {
        frame.map_or(CloseReason::NoneGiven, |f| u16::from(f.code).into())
    }
}

impl std::fmt::Display for CloseReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CloseReason::Normal => write!(f, "normal closure (1000)"),
            CloseReason::GoingAway => write!(f, "going away (1001)"),
            CloseReason::ProtoError => write!(f, "protocol error (1002)"),
            CloseReason::DataType => write!(f, "unsupported data (1003)"),
            CloseReason::NoneGiven => write!(f, "no status received (1005)"),
            CloseReason::Abnormal => write!(f, "abnormal closure (1006)"),
            CloseReason::DataError => write!(f, "invalid payload (1007)"),
            CloseReason::Policy => write!(f, "policy violation (1008)"),
            CloseReason::TooBig => write!(f, "message too big (1009)"),
            CloseReason::Unexpected => write!(f, "internal error (1011)"),
            CloseReason::Other(n) => write!(f, "close code {n}"),
        }
    }
}

/// Terminal outcome of a single connection.
///
/// Cancellation is not represented here: a connection that ends because its
/// owner asked it to returns `Ok(())`.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// Dial or upgrade was rejected.
    #[error("dial failed{}: {source}", http_status(.status))]
    Handshake {
        /// HTTP status returned by the peer, if it answered at all.
        status: Option<StatusCode>,
        #[source]
        source: tungstenite::Error,
    },
    /// The TLS client configuration could not be built.
    #[error("tls configuration failed: {0}")]
    Tls(#[source] rustls::Error),
    /// Dial did not complete within the handshake timeout.
    #[error("handshake timed out after {0:?}")]
    HandshakeTimeout(Duration),
    /// No inbound frame arrived before the read deadline.
    #[error("no inbound frame within {0:?}")]
    DeadlineExceeded(Duration),
    /// The peer sent a close frame.
    #[error("websocket closed by peer: {0}")]
    Closed(CloseReason),
    /// The stream ended without a close frame.
    #[error("websocket stream ended")]
    Eof,
    /// The socket was closed locally while a read was pending.
    #[error("websocket closed locally")]
    LocallyClosed,
    #[error("websocket read failed: {0}")]
    Read(#[source] tungstenite::Error),
    #[error("websocket write failed: {0}")]
    Write(#[source] tungstenite::Error),
    #[error("websocket write deadline exceeded")]
    WriteTimeout,
}

fn http_status(status: &Option<StatusCode>) -> String {
    status.map(|s| format!(" (http {s})")).unwrap_or_default()
}

impl ConnectionError {
    pub(crate) fn from_handshake(source: tungstenite::Error) -> Self {
        let status = match &source {
            tungstenite::Error::Http(response) => Some(response.status()),
            _ => None,
        };
        ConnectionError::Handshake { status, source }
    }

    /// The peer or the local side went away, as opposed to the protocol or
    /// transport misbehaving. Either way the connection is over.
    #[must_use]
    pub fn is_expected_closure(&self) -> bool {
        match self {
            ConnectionError::Closed(reason) => matches!(
                reason,
                CloseReason::Normal | CloseReason::GoingAway | CloseReason::Abnormal
            ),
            ConnectionError::Eof | ConnectionError::LocallyClosed => true,
            ConnectionError::Read(e) => is_abnormal(e),
            _ => false,
        }
    }

    /// HTTP status of a rejected upgrade.
    #[must_use]
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            ConnectionError::Handshake { status, .. } => *status,
            _ => None,
        }
    }
}

fn is_abnormal(e: &tungstenite::Error) -> bool {
    match e {
        tungstenite::Error::ConnectionClosed | tungstenite::Error::AlreadyClosed => true,
        tungstenite::Error::Protocol(ProtocolError::ResetWithoutClosingHandshake) => true,
        tungstenite::Error::Io(err) => matches!(
            err.kind(),
            io::ErrorKind::ConnectionReset
                | io::ErrorKind::ConnectionAborted
                | io::ErrorKind::BrokenPipe
                | io::ErrorKind::UnexpectedEof
        ),
        _ => false,
    }
}

/// Errors that stop the server as a whole.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind TCP listener.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },
    /// Failed to obtain the listener's local address.
    #[error("failed to read local address: {0}")]
    Addr(#[source] io::Error),
}
