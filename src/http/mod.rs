pub mod data_sources;
pub mod edit_mode;
pub mod layouts;
pub mod metrics;
pub mod sync;
pub mod widgets;

use std::sync::Arc;

use axum::extract::Request;
use axum::http::{header, HeaderValue};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{delete, get, post, put};
use axum::{Json, Router};
use tokio::sync::watch;
use tower_http::cors::{Any, CorsLayer};

use crate::config::Config;
use crate::crm::CrmApi;
use crate::db::models::DashboardSlug;
use crate::db::DbPool;
use crate::error::AppError;
use crate::sheets::SheetReader;

/// Shared state behind every handler. External clients are `None` when their
/// credentials are not configured; the sync endpoint skips them.
pub struct AppState {
    pub db: DbPool,
    pub config: Config,
    pub crm: Option<Arc<dyn CrmApi>>,
    pub sheets: Option<Arc<dyn SheetReader>>,
}

/// Parse a dashboard slug from the URL path; unknown slugs are a 404.
pub(crate) fn parse_slug(raw: &str) -> Result<DashboardSlug, AppError> {
    raw.parse()
        .map_err(|_| AppError::NotFound(format!("Dashboard {raw}")))
}

pub fn router(state: Arc<AppState>) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/api/health", get(health))
        .route(
            "/api/edit-mode",
            get(edit_mode::status)
                .post(edit_mode::enable)
                .delete(edit_mode::disable),
        )
        .route("/api/data-sources", get(data_sources::list_all))
        .route(
            "/api/data-sources/{id}/restore",
            post(data_sources::restore),
        )
        .route("/api/dashboards/{slug}/layout", get(layouts::get_layout))
        .route(
            "/api/dashboards/{slug}/layout/draft",
            put(layouts::put_draft),
        )
        .route(
            "/api/dashboards/{slug}/layout/publish",
            post(layouts::publish),
        )
        .route("/api/dashboards/{slug}/layout/reset", post(layouts::reset))
        .route("/api/dashboards/{slug}/layout/auto", post(layouts::auto))
        .route(
            "/api/dashboards/{slug}/data-sources",
            get(data_sources::list_for_dashboard).post(data_sources::attach_or_create),
        )
        .route(
            "/api/dashboards/{slug}/data-sources/{id}",
            delete(data_sources::delete),
        )
        .route(
            "/api/dashboards/{slug}/widgets",
            get(widgets::list).post(widgets::create),
        )
        .route(
            "/api/dashboards/{slug}/widgets/{id}",
            axum::routing::patch(widgets::update).delete(widgets::delete),
        )
        .route(
            "/api/dashboards/{slug}/widgets/{id}/data",
            get(widgets::data),
        )
        .route("/api/dashboards/{slug}/metrics", get(metrics::get_metrics))
        .route("/api/sync", post(sync::run_sync))
        .layer(middleware::from_fn(no_store))
        .layer(cors)
        .with_state(state)
}

/// Every response is `Cache-Control: no-store`; dashboards are live state.
async fn no_store(req: Request, next: Next) -> Response {
    let mut resp = next.run(req).await;
    resp.headers_mut().insert(
        header::CACHE_CONTROL,
        HeaderValue::from_static("no-store"),
    );
    resp
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "ok": true, "status": "ok" }))
}

#[cfg(test)]
pub(crate) fn test_state() -> Arc<AppState> {
    let config = Config {
        bind_addr: "127.0.0.1:0".parse().unwrap(),
        data_dir: std::env::temp_dir(),
        edit_secret: "test-secret".to_string(),
        sync_secret: Some("sync-secret".to_string()),
        crm: None,
        sheets: None,
    };
    Arc::new(AppState {
        db: crate::db::init_test_db().unwrap(),
        config,
        crm: None,
        sheets: None,
    })
}

/// Serve the API until the shutdown signal flips.
pub async fn serve(
    state: Arc<AppState>,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), AppError> {
    let addr = state.config.bind_addr;
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!("API server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.changed().await;
            tracing::info!("API server shutting down");
        })
        .await?;

    Ok(())
}
