use rootcause::Report;
use social_gate_connect::UsersConnectionRepository;
use social_gate_server::{
    app::{self, AppState},
    config::ServerConfig,
    db::{PgConnectionSignUp, PgSessionStore, PgUserRepository, PgUsersConnectionRepository},
    error::StartupError,
    exchange::UnconfiguredCodeExchange,
    session::SessionStore,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<(), Report<StartupError>> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,social_gate_auth=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().map_err(|e| StartupError::Configuration {
        details: e.to_string(),
    })?;
    tracing::info!("Loaded configuration");

    // Create database connection pool
    let db_pool = PgPoolOptions::new()
        .max_connections(5)
        .connect(&config.database_url)
        .await
        .map_err(|e| StartupError::Database {
            details: e.to_string(),
        })?;

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&db_pool)
        .await
        .map_err(|e| StartupError::Migration {
            details: e.to_string(),
        })?;

    let sessions: Arc<dyn SessionStore> = Arc::new(PgSessionStore::new(db_pool.clone()));
    spawn_session_cleanup(Arc::clone(&sessions), config.session.cleanup_interval_seconds);

    let users = PgUserRepository::new(db_pool.clone());
    let mut connections = PgUsersConnectionRepository::new(db_pool.clone());
    if config.sign_up_enabled {
        connections = connections.with_sign_up(PgConnectionSignUp::new());
    }
    let connections: Arc<dyn UsersConnectionRepository> = Arc::new(connections);

    let gateway_failed = |report: Report<_>| StartupError::Gateway {
        details: report.to_string(),
    };
    let registry = app::build_registry(
        config.provider_settings(),
        Arc::new(UnconfiguredCodeExchange),
    )
    .map_err(gateway_failed)?;
    if registry.is_empty() {
        tracing::warn!("no providers configured, the gateway will pass every request through");
    }
    let gateway = app::build_gateway(
        registry,
        Arc::clone(&connections),
        Arc::new(users),
        config.gateway.clone(),
    )
    .map_err(gateway_failed)?;

    let app_state = Arc::new(AppState::new(
        gateway,
        sessions,
        connections,
        config.session.clone(),
    ));
    let app = app::router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_address)
        .await
        .map_err(|e| StartupError::Bind {
            address: config.bind_address.clone(),
            details: e.to_string(),
        })?;

    tracing::info!("listening on http://{}", config.bind_address);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| StartupError::Serve {
        details: e.to_string(),
    })?;

    Ok(())
}

/// Purges expired sessions now and then every `interval_secs`.
fn spawn_session_cleanup(sessions: Arc<dyn SessionStore>, interval_secs: u64) {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(interval_secs));
        loop {
            interval.tick().await;
            match sessions.delete_expired().await {
                Ok(count) if count > 0 => {
                    tracing::debug!(deleted_sessions = count, "Periodic session cleanup");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to cleanup expired sessions");
                }
            }
        }
    });
}
