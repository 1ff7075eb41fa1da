use std::{process::ExitCode, time::Duration};

use clap::Parser;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use ws_soak::{
    Metrics, ServerConfig, ServerError, WebSocketServer, serve_metrics, shutdown,
    telemetry::{self, LogFormat},
};

#[derive(Parser)]
#[command(author, version, about = "WebSocket echo server")]
struct Args {
    /// Address to listen on
    #[arg(long, default_value = "0.0.0.0")]
    host: String,

    /// Port for WebSocket upgrades
    #[arg(short, long, default_value_t = 3003)]
    port: u16,

    /// Port for the Prometheus endpoint
    #[arg(long, default_value_t = 9100)]
    metrics_port: u16,

    /// trace, debug, info, warn, error
    #[arg(long, default_value = "info")]
    log_level: String,

    #[arg(long, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Drop connections silent for this many seconds, 0 disables
    #[arg(long, default_value_t = 60)]
    idle_timeout_secs: u64,
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    telemetry::init(telemetry::parse_level(&args.log_level), args.log_format);

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "server failed");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> Result<(), ServerError> {
    let cancel = CancellationToken::new();
    shutdown::spawn_signal_listener(cancel.clone());

    let config = ServerConfig {
        idle_timeout: (args.idle_timeout_secs > 0)
            .then(|| Duration::from_secs(args.idle_timeout_secs)),
        ..ServerConfig::default()
    };
    let metrics = Metrics::new();

    let metrics_addr = format!("{}:{}", args.host, args.metrics_port);
    let metrics_listener = TcpListener::bind(&metrics_addr)
        .await
        .map_err(|source| ServerError::Bind {
            addr: metrics_addr,
            source,
        })?;
    let server = WebSocketServer::bind(
        &format!("{}:{}", args.host, args.port),
        config,
        metrics.clone(),
    )
    .await?;

    let metrics_task = tokio::spawn(serve_metrics(
        metrics_listener,
        metrics,
        cancel.clone(),
        config.shutdown_grace,
    ));

    server.run(cancel.clone()).await;
    cancel.cancel();
    match metrics_task.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::error!(error = %e, "metrics server failed"),
        Err(e) => tracing::error!(error = %e, "metrics server task failed"),
    }
    tracing::info!("server stopped");
    Ok(())
}
