use std::process::ExitCode;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use ws_soak::{
    ClientConfig, Supervisor, WebSocketClient, shutdown,
    telemetry::{self, LogFormat},
};

#[derive(Parser)]
#[command(author, version, about = "Holds WebSocket connections open against a server")]
struct Args {
    /// Server host to connect to
    #[arg(long, default_value = "localhost")]
    host: String,

    /// Server port to connect to
    #[arg(short, long, default_value_t = 3003)]
    port: u16,

    /// Number of concurrent connections
    #[arg(short, long, default_value_t = 1)]
    connections: usize,

    /// Connect with wss:// instead of ws://
    #[arg(long)]
    tls: bool,

    /// Replace failed connections instead of exiting
    #[arg(long)]
    replace: bool,

    /// trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    telemetry::init(telemetry::parse_level(&args.log_level), args.log_format);

    if args.connections < 1 {
        tracing::warn!(requested = args.connections, "at least one connection is required, using 1");
    }

    let config = ClientConfig::new(args.host, args.port).with_tls(args.tls);
    let client = match WebSocketClient::new(config) {
        Ok(client) => client,
        Err(e) => {
            tracing::error!(error = %e, "invalid server address");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(url = client.url(), connections = args.connections.max(1), "starting");

    let cancel = CancellationToken::new();
    shutdown::spawn_signal_listener(cancel.clone());

    let supervisor = Supervisor::new(client, args.connections).with_replacement(args.replace);
    match supervisor.run(cancel).await {
        Ok(()) => {
            tracing::info!("all connections closed");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "connection failed");
            ExitCode::FAILURE
        }
    }
}
