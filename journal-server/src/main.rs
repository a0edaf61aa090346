use std::net::SocketAddr;

use clap::Parser;
use tracing::{error, info};

use journal_server::{build_router, build_state, db, ServerConfig};

/// journal-server -- collaboration backend for the E2EE journal sync core.
///
/// Terminates TLS upstream (run behind a reverse proxy in production); holds
/// no plaintext journal content or encryption keys, only ciphertext, wrapped
/// keys, and the opaque CRDT state blobs clients merge between themselves.
#[derive(Parser)]
#[command(name = "journal-server")]
struct Args {
    /// Address to bind the server to.
    #[arg(long, default_value = "0.0.0.0", env = "JOURNAL_BIND")]
    bind: String,

    /// Port for the HTTP/WebSocket server.
    #[arg(long, default_value = "8787", env = "JOURNAL_PORT")]
    port: u16,

    /// Sqlite connection string, e.g. "sqlite://journal.db" or "sqlite::memory:".
    #[arg(long, default_value = "sqlite://journal.db", env = "JOURNAL_DATABASE_URL")]
    database_url: String,

    /// Secret used to sign and verify access/refresh JWTs. Must be kept
    /// stable across restarts or all outstanding sessions are invalidated.
    #[arg(long, env = "JOURNAL_JWT_SECRET")]
    jwt_secret: String,

    /// Access token lifetime in seconds.
    #[arg(long, default_value = "900", env = "JOURNAL_ACCESS_TTL_SECONDS")]
    access_ttl_seconds: i64,

    /// Refresh token lifetime in days.
    #[arg(long, default_value = "90", env = "JOURNAL_REFRESH_TTL_DAYS")]
    refresh_ttl_days: i64,

    /// Sliding window, in seconds, over which document-connection attempts
    /// are rate limited per user.
    #[arg(long, default_value = "60", env = "JOURNAL_RATE_LIMIT_WINDOW_SECONDS")]
    rate_limit_window_seconds: u64,

    /// Maximum document connections a single user may open within the
    /// rate-limit window.
    #[arg(long, default_value = "30", env = "JOURNAL_RATE_LIMIT_MAX_CONNECTIONS")]
    rate_limit_max_connections: usize,

    /// Allowed CORS origin for browser clients. Omit to disable CORS.
    #[arg(long, env = "JOURNAL_CORS_ORIGIN")]
    cors_origin: Option<String>,
}

fn configure_logging() {
    use tracing_subscriber::prelude::*;

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_line_number(true)
        .with_target(false)
        .with_file(true);

    tracing_subscriber::registry().with(env_filter).with(fmt_layer).init();
}

#[tokio::main]
async fn main() {
    configure_logging();
    let args = Args::parse();

    info!("journal-server starting");

    let pool = db::connect(&args.database_url).await.unwrap_or_else(|e| {
        error!("Failed to connect to database {}: {e}", args.database_url);
        std::process::exit(1);
    });
    info!("Connected to database and applied migrations");

    let config = ServerConfig {
        jwt_secret: args.jwt_secret,
        access_ttl_seconds: args.access_ttl_seconds,
        refresh_ttl_days: args.refresh_ttl_days,
        rate_limit_window_seconds: args.rate_limit_window_seconds,
        rate_limit_max_connections: args.rate_limit_max_connections,
        cors_origin: args.cors_origin,
    };

    let state = build_state(pool, &config).await;
    let app = build_router(state, config.cors_origin).unwrap_or_else(|e| {
        error!("{e}");
        std::process::exit(1);
    });

    let addr = format!("{}:{}", args.bind, args.port);
    info!("Binding to {addr}");
    let listener = tokio::net::TcpListener::bind(&addr).await.unwrap_or_else(|e| {
        error!("Failed to bind to {addr}: {e}");
        std::process::exit(1);
    });

    info!("journal-server listening on http://{addr}");
    let serve = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>());
    if let Err(e) = serve.await {
        error!("Server error: {e}");
        std::process::exit(1);
    }
}
