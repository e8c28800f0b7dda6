use std::sync::Arc;

use axum::extract::{Path, State as AxumState};
use axum::Json;
use serde_json::json;

use super::{parse_slug, AppState};
use crate::db::repos::metrics;
use crate::error::AppError;

/// Cached KPI values for one dashboard. Recomputed on sync and on publish;
/// this endpoint never recomputes.
pub async fn get_metrics(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(slug): Path<String>,
) -> Result<Json<serde_json::Value>, AppError> {
    let slug = parse_slug(&slug)?;
    let metrics = metrics::get_for_dashboard(&state.db, slug)?;
    Ok(Json(json!({ "ok": true, "metrics": metrics })))
}
