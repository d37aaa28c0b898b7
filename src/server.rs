use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::Context;
use axum::Router;
use axum_server::{Handle, tls_rustls::RustlsConfig};
use sqlx::SqlitePool;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tower_sessions::{Expiry, SessionManagerLayer};
use tower_sessions_sqlx_store::SqliteStore;
use tracing::info;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::{
    api::{ApiDoc, api_router},
    config::Config,
};

#[derive(Clone)]
pub struct AppState {
    pub database: SqlitePool,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(database: SqlitePool, config: Config) -> Self {
        Self {
            database,
            config: Arc::new(config),
        }
    }
}

/// Builds the full application: `/api` behind cookie sessions stored in the
/// same database, plus the swagger UI.
pub async fn build_app(state: AppState) -> anyhow::Result<Router> {
    let store = SqliteStore::new(state.database.clone());
    store
        .migrate()
        .await
        .context("failed to migrate session store")?;
    let session_layer = SessionManagerLayer::new(store)
        .with_secure(state.config.session.secure_cookie)
        .with_expiry(Expiry::OnInactivity(time::Duration::days(
            state.config.session.ttl_days,
        )));

    let app = Router::new()
        .nest("/api", api_router().layer(session_layer))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(Duration::from_secs(
            state.config.request_timeout_secs,
        )))
        .with_state(state);
    Ok(app)
}

pub async fn serve(app: Router, config: &Config) -> anyhow::Result<()> {
    let ip: IpAddr = config
        .host
        .parse()
        .with_context(|| format!("invalid host {}", config.host))?;
    let addr = SocketAddr::new(ip, config.port);

    match &config.tls {
        Some(tls) => {
            rustls::crypto::aws_lc_rs::default_provider()
                .install_default()
                .map_err(|e| anyhow::anyhow!("Failed to initialize rustls crypto provider: {:?}", e))?;
            let rustls_config = RustlsConfig::from_pem_file(&tls.cert, &tls.key)
                .await
                .context("failed to load TLS certificate")?;
            let handle = Handle::new();
            tokio::spawn(shutdown_on_ctrl_c(handle.clone()));
            info!("Starting server at https://{}", addr);
            info!("Swagger UI available at https://{}/swagger-ui/", addr);
            axum_server::bind_rustls(addr, rustls_config)
                .handle(handle)
                .serve(app.into_make_service())
                .await?;
        }
        None => {
            let listener = tokio::net::TcpListener::bind(addr)
                .await
                .with_context(|| format!("failed to bind to {}", addr))?;
            info!("Starting server at http://{}", addr);
            info!("Swagger UI available at http://{}/swagger-ui/", addr);
            axum::serve(listener, app)
                .with_graceful_shutdown(async {
                    let _ = tokio::signal::ctrl_c().await;
                })
                .await?;
        }
    }
    info!("server stopped");
    Ok(())
}

async fn shutdown_on_ctrl_c(handle: Handle) {
    let _ = tokio::signal::ctrl_c().await;
    handle.graceful_shutdown(Some(Duration::from_secs(10)));
}
