mod config;

use std::sync::Arc;

use axum::http::{HeaderValue, Method, header::{AUTHORIZATION, CONTENT_TYPE}};
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::info;

use vidtube_api::auth::{AppState, AppStateInner};
use vidtube_api::media::MediaStorage;
use vidtube_api::middleware::Authenticator;
use vidtube_api::profile::ProfileAggregator;
use vidtube_api::session::SessionManager;
use vidtube_api::tokens::{TokenCodec, TokenConfig};
use vidtube_db::Database;

use crate::config::Config;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present
    let _ = dotenvy::dotenv();

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "vidtube=debug,vidtube_api=debug,vidtube_db=info,tower_http=debug".into()
            }),
        )
        .init();

    let config = match Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("FATAL: {:#}", e);
            std::process::exit(1);
        }
    };

    let db = Arc::new(Database::open(&config.db_path)?);
    tokio::fs::create_dir_all(&config.upload_tmp_dir).await?;

    let media = match &config.media_upload_url {
        Some(url) => {
            info!("Uploading media to {}", url);
            MediaStorage::remote(url.clone(), config.media_timeout)?
        }
        None => {
            MediaStorage::local(config.media_dir.clone(), config.media_public_url.clone()).await?
        }
    };

    let tokens = TokenCodec::new(
        TokenConfig {
            secret: config.access_token_secret.clone(),
            ttl: config.access_token_ttl,
        },
        TokenConfig {
            secret: config.refresh_token_secret.clone(),
            ttl: config.refresh_token_ttl,
        },
    );

    // Components are built once and shared through the router state.
    let state: AppState = Arc::new(AppStateInner {
        db: db.clone(),
        sessions: SessionManager::new(db.clone(), tokens.clone()),
        authenticator: Authenticator::new(db.clone(), tokens),
        profiles: ProfileAggregator::new(db),
        media,
        upload_tmp_dir: config.upload_tmp_dir.clone(),
        secure_cookies: config.secure_cookies,
    });

    let mut app = vidtube_api::router(state);
    if config.media_upload_url.is_none() {
        app = app.nest_service("/media", ServeDir::new(&config.media_dir));
    }

    let app = app.layer(cors_layer(&config)?).layer(TraceLayer::new_for_http());

    info!("VidTube server listening on {}", config.addr);
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

/// Cookies only travel cross-origin with credentials, which needs an exact origin.
fn cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let layer = match &config.cors_origin {
        Some(origin) => CorsLayer::new()
            .allow_origin(AllowOrigin::exact(HeaderValue::from_str(origin)?))
            .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::OPTIONS])
            .allow_headers([AUTHORIZATION, CONTENT_TYPE])
            .allow_credentials(true),
        None => CorsLayer::permissive(),
    };
    Ok(layer)
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();
    #[cfg(unix)]
    {
        let mut sigterm =
            match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(e) => {
                    tracing::warn!("Failed to install SIGTERM handler: {}", e);
                    ctrl_c.await.ok();
                    return;
                }
            };
        tokio::select! {
            _ = ctrl_c => info!("Received Ctrl+C, shutting down..."),
            _ = sigterm.recv() => info!("Received SIGTERM, shutting down..."),
        }
    }
    #[cfg(not(unix))]
    {
        ctrl_c.await.ok();
        info!("Received Ctrl+C, shutting down...");
    }
}
