mod config;
mod dto;
mod error;
mod handlers;
mod host;
mod models;
mod pipeline;
mod protocol;
mod repositories;
mod services;
mod tokens;
mod utils;
mod workers;

use std::sync::Arc;
use std::time::Duration;

use sqlx::mysql::MySqlPoolOptions;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{AppState, Config, StoreSet};
use crate::dto::descriptors::ScopeDescriptor;
use crate::handlers::default_registry;
use crate::host::{create_router, ApproveLogout, AttachProxiedPrincipal};
use crate::pipeline::{HandlerDescriptor, ORDER_STEP};
use crate::protocol::constants::scopes;
use crate::repositories::mysql::{
    MySqlApplicationStore, MySqlAuthorizationStore, MySqlScopeStore, MySqlTokenStore,
};
use crate::tokens::jwt::JwtTokenSerializer;
use crate::workers::prune_worker::spawn_prune_worker;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "oidc_server=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let config = Config::from_env()?;
    let addr = config.socket_addr();

    let pool = MySqlPoolOptions::new()
        .max_connections(10)
        .min_connections(2)
        .acquire_timeout(Duration::from_secs(5))
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&config.database_url)
        .await?;

    sqlx::migrate!("./migrations").run(&pool).await?;

    let serializer: Arc<dyn crate::tokens::TokenSerializer> = match &config.signing_key_pem {
        Some(pem) => Arc::new(JwtTokenSerializer::from_pem(&config.signing_key_id, pem)?),
        None => {
            tracing::warn!(
                "no signing key configured; using an ephemeral key (tokens die with the process)"
            );
            Arc::new(JwtTokenSerializer::generate(&config.signing_key_id)?)
        }
    };

    let stores = StoreSet {
        applications: Arc::new(MySqlApplicationStore::new(pool.clone())),
        authorizations: Arc::new(MySqlAuthorizationStore::new(pool.clone())),
        tokens: Arc::new(MySqlTokenStore::new(pool.clone())),
        scopes: Arc::new(MySqlScopeStore::new(pool.clone())),
    };

    // The built-in table plus the host's extension points: a principal
    // provider for the authorization endpoint and a logout approver.
    let mut registry = default_registry();
    registry.authorization.handle.push(HandlerDescriptor::new(
        "attach_proxied_principal",
        ORDER_STEP,
        AttachProxiedPrincipal,
    ));
    registry.logout.handle.push(HandlerDescriptor::new(
        "approve_logout",
        ORDER_STEP,
        ApproveLogout,
    ));

    let state = AppState::new(config.options.clone(), stores, serializer, registry)
        .with_pool(pool);

    seed_standard_scopes(&state).await?;

    spawn_prune_worker(state.clone(), config.prune_interval_secs);

    let app = create_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(30)));

    tracing::info!(
        "OIDC server v{} listening on {}",
        env!("CARGO_PKG_VERSION"),
        addr
    );

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("server shutdown complete");
    Ok(())
}

/// Registers the standard OIDC scopes when missing so fresh deployments can
/// serve openid/profile/email requests out of the box.
async fn seed_standard_scopes(state: &AppState) -> anyhow::Result<()> {
    let manager = state.scopes()?;
    for name in [
        scopes::OPENID,
        scopes::PROFILE,
        scopes::EMAIL,
        scopes::PHONE,
        scopes::ADDRESS,
        scopes::OFFLINE_ACCESS,
    ] {
        if manager.find_by_name(name).await?.is_none() {
            manager
                .create(&ScopeDescriptor {
                    name: Some(name.to_string()),
                    ..ScopeDescriptor::default()
                })
                .await?;
        }
    }
    Ok(())
}

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
            tracing::info!("received Ctrl+C, starting graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("received SIGTERM, starting graceful shutdown");
        },
    }
}
