//! Canvas layout routes: read, stage, publish, reset and auto-arrange.

use std::sync::Arc;

use axum::extract::{Path, State as AxumState};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::edit_mode::{EditMode, RequireEditMode};
use super::{parse_slug, AppState};
use crate::db::models::{LayoutKind, LayoutUpsert};
use crate::db::repos::{layouts, metrics};
use crate::error::AppError;
use crate::layout::{self, LayoutRect};

/// Edit mode sees the draft canvas (with published fallback per widget);
/// everyone else sees the published canvas.
pub async fn get_layout(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(slug): Path<String>,
    EditMode(edit): EditMode,
) -> Result<Json<serde_json::Value>, AppError> {
    let slug = parse_slug(&slug)?;
    let kind = if edit {
        LayoutKind::Draft
    } else {
        LayoutKind::Published
    };
    let canvas = layouts::get_for_dashboard(&state.db, slug, kind)?;
    Ok(Json(json!({
        "ok": true,
        "editMode": edit,
        "widgets": canvas.widgets,
        "updatedAt": canvas.updated_at,
    })))
}

#[derive(Deserialize)]
pub struct PutDraftBody {
    widgets: Vec<LayoutUpsert>,
}

pub async fn put_draft(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(slug): Path<String>,
    _edit: RequireEditMode,
    Json(body): Json<PutDraftBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let slug = parse_slug(&slug)?;
    let applied = layouts::upsert_draft(&state.db, slug, &body.widgets)?;
    Ok(Json(json!({ "ok": true, "applied": applied })))
}

pub async fn publish(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(slug): Path<String>,
    _edit: RequireEditMode,
) -> Result<Json<serde_json::Value>, AppError> {
    let slug = parse_slug(&slug)?;
    let outcome = layouts::publish(&state.db, slug)?;
    // Publishing changes what counts as live, so the cached metrics move too.
    metrics::compute_for_dashboard(&state.db, slug)?;
    Ok(Json(json!({
        "ok": true,
        "layoutsCopied": outcome.layouts_copied,
        "widgetsPublished": outcome.widgets_published,
        "linksPublished": outcome.links_published,
    })))
}

pub async fn reset(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(slug): Path<String>,
    _edit: RequireEditMode,
) -> Result<Json<serde_json::Value>, AppError> {
    let slug = parse_slug(&slug)?;
    let outcome = layouts::reset(&state.db, slug)?;
    Ok(Json(json!({
        "ok": true,
        "layoutsRestored": outcome.layouts_restored,
        "widgetsDiscarded": outcome.widgets_discarded,
    })))
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutoBody {
    /// Grid size to snap positions and dimensions to. Absent means no snap.
    pub snap: Option<i64>,
    #[serde(default = "default_true")]
    pub resolve_overlaps: bool,
    #[serde(default = "default_true")]
    pub compact: bool,
}

fn default_true() -> bool {
    true
}

impl Default for AutoBody {
    fn default() -> Self {
        Self {
            snap: None,
            resolve_overlaps: true,
            compact: true,
        }
    }
}

/// Auto-arrange the draft canvas: optional snap-to-grid, then overlap
/// resolution, then vertical compaction. Results land in the draft layer
/// like any other staged edit.
pub async fn auto(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(slug): Path<String>,
    _edit: RequireEditMode,
    body: Option<Json<AutoBody>>,
) -> Result<Json<serde_json::Value>, AppError> {
    let slug = parse_slug(&slug)?;
    let Json(body) = body.unwrap_or_default();

    let canvas = layouts::get_for_dashboard(&state.db, slug, LayoutKind::Draft)?;
    let mut rects: Vec<LayoutRect> = canvas
        .widgets
        .iter()
        .map(|w| LayoutRect {
            widget_id: w.widget.id.clone(),
            x: w.x,
            y: w.y,
            w: w.w,
            h: w.h,
            z_index: w.z_index,
        })
        .collect();

    if let Some(grid) = body.snap {
        layout::snap_to_grid(&mut rects, grid);
    }
    if body.resolve_overlaps {
        layout::resolve_overlaps(&mut rects);
    }
    if body.compact {
        layout::compact_vertical(&mut rects);
    }

    let entries: Vec<LayoutUpsert> = rects
        .iter()
        .map(|r| LayoutUpsert {
            widget_id: r.widget_id.clone(),
            x: r.x,
            y: r.y,
            w: r.w,
            h: r.h,
            z_index: r.z_index,
        })
        .collect();
    let applied = layouts::upsert_draft(&state.db, slug, &entries)?;

    tracing::info!(dashboard = %slug, applied, "auto-arranged draft layout");
    Ok(Json(json!({ "ok": true, "applied": applied })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::{CreateWidgetInput, WidgetType};
    use crate::db::repos::widgets;
    use crate::http::test_state;

    fn make_widget(state: &Arc<AppState>, title: &str) -> String {
        let input = CreateWidgetInput {
            widget_type: WidgetType::Table,
            title: title.to_string(),
            data_source_id: None,
            config: None,
        };
        widgets::create(&state.db, crate::db::models::DashboardSlug::Pm, input)
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn test_get_layout_picks_kind_by_edit_mode() {
        let state = test_state();
        let id = make_widget(&state, "Draft only");

        // a draft-only widget is visible in edit mode
        let resp = get_layout(
            AxumState(state.clone()),
            Path("pm".to_string()),
            EditMode(true),
        )
        .await
        .unwrap();
        let widgets = resp.0["widgets"].as_array().unwrap().clone();
        assert_eq!(widgets.len(), 1);
        assert_eq!(widgets[0]["id"].as_str().unwrap(), id);

        // but absent from the published view
        let resp = get_layout(
            AxumState(state.clone()),
            Path("pm".to_string()),
            EditMode(false),
        )
        .await
        .unwrap();
        assert!(resp.0["widgets"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unknown_slug_is_not_found() {
        let state = test_state();
        let err = get_layout(
            AxumState(state.clone()),
            Path("finance".to_string()),
            EditMode(true),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_auto_resolves_overlaps_and_persists() {
        let state = test_state();
        let a = make_widget(&state, "A");
        let b = make_widget(&state, "B");

        // stack both widgets on the same spot
        let body = PutDraftBody {
            widgets: vec![
                LayoutUpsert {
                    widget_id: a.clone(),
                    x: 0,
                    y: 0,
                    w: 200,
                    h: 100,
                    z_index: 0,
                },
                LayoutUpsert {
                    widget_id: b.clone(),
                    x: 10,
                    y: 10,
                    w: 200,
                    h: 100,
                    z_index: 0,
                },
            ],
        };
        put_draft(
            AxumState(state.clone()),
            Path("pm".to_string()),
            RequireEditMode,
            Json(body),
        )
        .await
        .unwrap();

        let resp = auto(
            AxumState(state.clone()),
            Path("pm".to_string()),
            RequireEditMode,
            Some(Json(AutoBody {
                snap: Some(10),
                resolve_overlaps: true,
                compact: true,
            })),
        )
        .await
        .unwrap();
        assert_eq!(resp.0["applied"].as_u64().unwrap(), 2);

        let canvas =
            layouts::get_for_dashboard(&state.db, crate::db::models::DashboardSlug::Pm, LayoutKind::Draft)
                .unwrap();
        let rects: Vec<LayoutRect> = canvas
            .widgets
            .iter()
            .map(|w| LayoutRect {
                widget_id: w.widget.id.clone(),
                x: w.x,
                y: w.y,
                w: w.w,
                h: w.h,
                z_index: w.z_index,
            })
            .collect();
        for i in 0..rects.len() {
            for j in 0..i {
                assert!(!rects[i].intersects(&rects[j]), "{i} overlaps {j}");
            }
            assert_eq!(rects[i].x % 10, 0);
            assert_eq!(rects[i].y % 10, 0);
        }
    }

    #[tokio::test]
    async fn test_publish_reports_counts() {
        let state = test_state();
        make_widget(&state, "A");
        make_widget(&state, "B");

        let resp = publish(
            AxumState(state.clone()),
            Path("pm".to_string()),
            RequireEditMode,
        )
        .await
        .unwrap();
        assert_eq!(resp.0["ok"], true);
        assert_eq!(resp.0["layoutsCopied"].as_u64().unwrap(), 2);
        assert_eq!(resp.0["widgetsPublished"].as_u64().unwrap(), 2);

        // publish also refreshes the metric cache
        let cached =
            metrics::get_for_dashboard(&state.db, crate::db::models::DashboardSlug::Pm).unwrap();
        assert!(cached
            .iter()
            .any(|m| m.metric == "widgets_published" && m.value == serde_json::json!(2)));
    }
}
