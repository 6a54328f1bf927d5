//! LiveSchema API
//!
//! Serves a query API generated from the live PostgreSQL schema and keeps
//! it current as the schema changes:
//! - Fingerprint polling detects drift cheaply, backing off while stable
//! - Snapshots are rebuilt off to the side and published atomically
//! - Calls run under the caller's database role on dedicated connections

mod api;
mod auth;
mod config;
mod db;
mod error;
mod executor;
mod fingerprint;
mod introspection;
mod junction;
mod routes;
mod snapshot;
mod state;

use crate::api::{CatalogCompiler, DefaultNaming, SchemaFilter};
use crate::config::Settings;
use crate::db::{create_pool, verify_pool, SessionSource};
use crate::executor::{ContextRole, QueryExecutor, RolePolicy, RoleSecuredExecutor, UnrestrictedExecutor};
use crate::introspection::PostgresIntrospector;
use crate::routes::create_router;
use crate::snapshot::{SnapshotBuilder, SnapshotManager};
use crate::state::AppState;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// How long shutdown waits for the refresh task
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing subscriber for structured logging
    init_tracing();

    info!("Starting LiveSchema...");

    // Load configuration
    let settings = Settings::load()?;
    info!("Configuration loaded successfully");

    if std::env::var("JWT_SECRET").is_err() {
        warn!("JWT_SECRET not set, using default (INSECURE - set in production!)");
    }

    let pool = create_pool(&settings.database)?;
    verify_pool(&pool).await?;
    let source: Arc<dyn SessionSource> = Arc::new(pool);

    let policy = RolePolicy::new(settings.roles.validate, settings.roles.roles.clone());
    let search_path = settings
        .database
        .select_schema
        .then(|| settings.database.schema.clone());

    let executor: Arc<dyn QueryExecutor> = if settings.roles.role_security {
        info!("Role security enabled: calls run under the caller's database role");
        Arc::new(RoleSecuredExecutor::new(
            source.clone(),
            Arc::new(ContextRole),
            policy.clone(),
            search_path,
        ))
    } else {
        Arc::new(UnrestrictedExecutor::new(source.clone(), search_path))
    };

    let builder = SnapshotBuilder {
        source,
        introspector: Arc::new(PostgresIntrospector),
        compiler: Arc::new(CatalogCompiler),
        naming: Arc::new(DefaultNaming),
        executor,
        filter: SchemaFilter::from_config(&settings.filter)?,
        overrides: settings.overrides.clone(),
        limits: settings.limits,
        schema: settings.database.schema.clone(),
        policy,
    };

    // Blocks until the first snapshot is live
    let manager = SnapshotManager::new(builder, settings.refresh, &settings.roles, None).await?;

    let shutdown = CancellationToken::new();
    manager.start(shutdown.clone()).await;

    let state = Arc::new(AppState::new(
        manager.clone(),
        settings.auth.jwt_secret.clone(),
        shutdown.clone(),
    ));
    let app = create_router(state, &settings.cors);

    let addr = SocketAddr::from((settings.server.host, settings.server.port));
    info!("Server listening on http://{}", addr);
    info!("   GET  /health                 - Health check");
    info!("   GET  /api                    - Catalog of the caller's API");
    info!("   POST /api                    - Read rows of one type");
    info!("   GET  /admin/schema           - Published snapshot (admin)");
    info!("   POST /admin/schema/refresh   - Rebuild now (admin)");

    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown.cancel();
    manager.stop();
    if let Err(e) = manager.wait(SHUTDOWN_GRACE).await {
        warn!("Refresh task did not stop cleanly: {}", e);
    }

    info!("Server shutdown complete");
    Ok(())
}

/// Initialize tracing with structured logging
fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,liveschema=debug,tower_http=debug"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_level(true)
                .with_thread_ids(true)
                .with_file(true)
                .with_line_number(true)
                .compact(),
        )
        .init();
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal, initiating graceful shutdown...");
        },
        _ = terminate => {
            info!("Received terminate signal, initiating graceful shutdown...");
        },
    }
}
