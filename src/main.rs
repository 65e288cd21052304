//! bitsd — BITS upload server
//!
//! Accepts Microsoft BITS upload sessions over HTTP and assembles the
//! uploaded files under a temporary directory. The binary wires CLI/env
//! configuration, logging, and graceful shutdown around the protocol
//! engine in the library crate.

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use bitsd::events::EventSink;
use bitsd::protocol::{BITS_METHOD, BITS_PROTOCOL_GUID};
use bitsd::{AppState, Config};

/// CLI arguments and environment configuration for the server.
#[derive(Parser, Debug)]
#[command(name = "bitsd", version, about = "BITS upload server")]
struct Args {
    #[arg(
        short = 'l',
        long,
        env = "BITSD_LISTEN",
        default_value = "0.0.0.0:8080",
        help = "Socket address to listen on"
    )]
    listen: std::net::SocketAddr,
    #[arg(
        short = 't',
        long,
        env = "BITSD_TEMP_ROOT",
        default_value = "./bits-uploads",
        help = "Directory for session data"
    )]
    temp_root: PathBuf,
    #[arg(
        long,
        env = "BITSD_PROTOCOL",
        default_value = BITS_PROTOCOL_GUID,
        help = "BITS protocol GUID to negotiate"
    )]
    protocol: String,
    #[arg(
        long,
        env = "BITSD_METHOD",
        default_value = BITS_METHOD,
        help = "HTTP method accepted for BITS packets"
    )]
    method: String,
    #[arg(
        long,
        env = "BITSD_MAX_SIZE",
        default_value_t = 0,
        help = "Maximum upload file size in bytes, 0 for unlimited"
    )]
    max_size: u64,
    #[arg(
        long = "allow",
        help = "Allow regex for upload filenames (Rust regex syntax), repeatable; \
                at least one must match [default: .*]"
    )]
    allow: Vec<String>,
    #[arg(
        long = "deny",
        help = "Deny regex for upload filenames (Rust regex syntax), repeatable; \
                evaluated before the allow list"
    )]
    deny: Vec<String>,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "bitsd=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let args = Args::parse();

    tracing::info!("Starting bitsd v{}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&args.temp_root).expect("Failed to create temp root");
    let temp_root = args
        .temp_root
        .canonicalize()
        .expect("Failed to resolve temp root");
    tracing::info!(temp_root = %temp_root.display(), "session storage ready");

    let allow_patterns = if args.allow.is_empty() {
        vec![".*".to_string()]
    } else {
        args.allow
    };

    let config = Config {
        listen: args.listen,
        temp_root,
        protocol: args.protocol,
        allowed_method: args.method,
        max_size: args.max_size,
        allow_patterns,
        deny_patterns: args.deny,
    };

    // Default hook: record lifecycle transitions in the log. Embedders of
    // the library crate supply their own.
    let events = EventSink::new(Arc::new(|event, id, path| {
        tracing::info!(session_id = %id, path = %path.display(), %event, "lifecycle event");
    }));

    let state = AppState::new(config.clone(), events).expect("Invalid filter pattern");

    let app = bitsd::routes::app(state).layer(TraceLayer::new_for_http());

    tracing::info!("bitsd listening on {}", config.listen);
    let listener = tokio::net::TcpListener::bind(config.listen)
        .await
        .expect("Failed to bind listener");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("Server error");

    tracing::info!("Server shutdown complete");
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, starting graceful shutdown...");
        },
        _ = terminate => {
            tracing::info!("Received SIGTERM, starting graceful shutdown...");
        },
    }
}
