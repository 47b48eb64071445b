//! Chat server binary.
//!
//! # Usage
//!
//! ```bash
//! # Start on the default port
//! parlor-chat
//!
//! # Explicit bind address and worker count
//! parlor-chat --bind 0.0.0.0:9000 --workers 4
//! ```
//!
//! Connect with any WebSocket client, optionally passing an identity:
//! `ws://host:8080/?client_id=ada`.

use std::sync::Arc;

use clap::Parser;
use parlor_chat::{ChatInterpreter, chat_lobby_factory};
use parlor_server::{ServerConfig, SessionServer, TaskDispatcher, transport::WsTransport};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Chat-room server on the parlor session core
#[derive(Parser, Debug)]
#[command(name = "parlor-chat")]
#[command(about = "WebSocket chat rooms on the parlor session server")]
#[command(version)]
struct Args {
    /// Address to bind to
    #[arg(short, long, default_value = "0.0.0.0:8080")]
    bind: String,

    /// Worker threads (0 = one per hardware thread)
    #[arg(long, default_value = "0")]
    workers: usize,

    /// Maximum concurrent connections
    #[arg(long, default_value = "10000")]
    max_connections: usize,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let dispatcher = if args.workers == 0 {
        TaskDispatcher::with_hardware_parallelism()?
    } else {
        TaskDispatcher::spawn(args.workers)?
    };
    tracing::info!(workers = dispatcher.worker_count(), "worker pool ready");

    let server = SessionServer::new(
        ServerConfig { max_connections: args.max_connections },
        Arc::new(dispatcher),
        chat_lobby_factory(),
        Arc::new(ChatInterpreter),
    )?;

    let transport = WsTransport::bind(&args.bind).await?;
    tracing::info!("chat server listening on {}", transport.local_addr()?);

    transport.run(server).await?;

    Ok(())
}
