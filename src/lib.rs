#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::empty_docs,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::missing_safety_doc
)]

mod client;
mod config;
mod error;
mod metrics;
mod protocol;
mod registry;
mod role;
mod server;
pub mod shutdown;
mod supervisor;
pub mod telemetry;
mod ws;

pub use client::WebSocketClient;
pub use config::{ClientConfig, KeepaliveConfig, ServerConfig, WS_PATH};
pub use error::{CloseReason, ConnectionError, ServerError};
pub use crate::metrics::{Metrics, WS_CONNECTIONS, router as metrics_router, serve_metrics};
pub use registry::Registry;
pub use role::Role;
pub use server::WebSocketServer;
pub use supervisor::{Supervisor, Worker};
pub use ws::{
    ConnState, Connection, ControlFrame, Reader, spawn_close_on_cancel, spawn_ping_loop,
    spawn_status_loop,
};
