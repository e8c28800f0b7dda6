//! Widget routes: CRUD plus the `/data` endpoint that serves shaped rows
//! from the sync cache.

use std::sync::Arc;

use axum::extract::{Path, State as AxumState};
use axum::Json;
use serde_json::json;

use super::edit_mode::{EditMode, RequireEditMode};
use super::{parse_slug, AppState};
use crate::db::models::{
    CreateWidgetInput, EntityStatus, SourceType, UpdateWidgetInput, WidgetType,
};
use crate::db::repos::{data_sources, sync_cache, widgets};
use crate::error::AppError;
use crate::widget_data::{self, TableData, WidgetData};

pub async fn list(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(slug): Path<String>,
    EditMode(edit): EditMode,
) -> Result<Json<serde_json::Value>, AppError> {
    let slug = parse_slug(&slug)?;
    let widgets = widgets::list_for_dashboard(&state.db, slug, edit)?;
    Ok(Json(json!({ "ok": true, "widgets": widgets })))
}

pub async fn create(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(slug): Path<String>,
    _edit: RequireEditMode,
    Json(input): Json<CreateWidgetInput>,
) -> Result<Json<serde_json::Value>, AppError> {
    let slug = parse_slug(&slug)?;
    let widget = widgets::create(&state.db, slug, input)?;
    tracing::info!(dashboard = %slug, widget = %widget.id, "widget created");
    Ok(Json(json!({ "ok": true, "widget": widget })))
}

pub async fn update(
    AxumState(state): AxumState<Arc<AppState>>,
    Path((slug, id)): Path<(String, String)>,
    _edit: RequireEditMode,
    Json(input): Json<UpdateWidgetInput>,
) -> Result<Json<serde_json::Value>, AppError> {
    let slug = parse_slug(&slug)?;
    let widget = widgets::update(&state.db, slug, &id, input)?;
    Ok(Json(json!({ "ok": true, "widget": widget })))
}

pub async fn delete(
    AxumState(state): AxumState<Arc<AppState>>,
    Path((slug, id)): Path<(String, String)>,
    _edit: RequireEditMode,
) -> Result<Json<serde_json::Value>, AppError> {
    let slug = parse_slug(&slug)?;
    widgets::soft_delete(&state.db, slug, &id)?;
    tracing::info!(dashboard = %slug, widget = %id, "widget deleted");
    Ok(Json(json!({ "ok": true })))
}

/// `GET /api/dashboards/{slug}/widgets/{id}/data`. Tables get
/// `{columns, rows}`, charts get `{points}`. Outside edit mode only
/// published widgets serve data.
pub async fn data(
    AxumState(state): AxumState<Arc<AppState>>,
    Path((slug, id)): Path<(String, String)>,
    EditMode(edit): EditMode,
) -> Result<Json<serde_json::Value>, AppError> {
    let slug = parse_slug(&slug)?;
    let widget = widgets::get_for_dashboard(&state.db, slug, &id)?;
    if !edit && widget.status != EntityStatus::Published {
        return Err(AppError::NotFound(format!("Widget {id}")));
    }

    let config = widget_data::parse_config(widget.config.as_ref());
    let Some(source_id) = &widget.data_source_id else {
        // unbound widgets render an empty table rather than erroring
        let data = WidgetData::Table(TableData::empty());
        return Ok(Json(json!({ "ok": true, "data": data })));
    };
    let source = data_sources::get_by_id(&state.db, source_id)?;

    let (table, default_label, default_value) = match source.source_type {
        SourceType::Crm => {
            let deals = sync_cache::deal_rows(&state.db)?;
            let table = widget_data::table_from_deals(&deals, &config.filters);
            (table, Some("Stage"), Some("Amount"))
        }
        SourceType::Spreadsheet => {
            let sheet_title = match config.sheet_title.clone() {
                Some(title) => Some(title),
                None => data_sources::sheets_for(&state.db, source_id)?
                    .first()
                    .map(|s| s.title.clone()),
            };
            let table = match sheet_title {
                Some(title) => {
                    let values = sync_cache::sheet_values(&state.db, source_id, &title)?;
                    widget_data::table_from_sheet(&values, &config.filters)
                }
                None => TableData::empty(),
            };
            (table, None, None)
        }
    };

    let data = match widget.widget_type {
        WidgetType::Table => WidgetData::Table(table),
        WidgetType::Line | WidgetType::Bar | WidgetType::Pie => {
            let label = config.label_field.as_deref().or(default_label);
            let value = config.value_field.as_deref().or(default_value);
            let points = widget_data::points_from_table(&table, label, value);
            WidgetData::Points { points }
        }
    };

    Ok(Json(json!({ "ok": true, "data": data })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crm::types::{Deal, Stage};
    use crate::db::models::{CreateDataSourceInput, DashboardSlug, SheetInput};
    use crate::db::repos::layouts;
    use crate::http::test_state;

    fn sheet_source(state: &Arc<AppState>) -> String {
        let source = data_sources::create(
            &state.db,
            CreateDataSourceInput {
                source_type: SourceType::Spreadsheet,
                spreadsheet_id: Some("sheet-1".to_string()),
                title: "Revenue".to_string(),
                sheets: vec![SheetInput {
                    title: "Q1".to_string(),
                    range: "A1:C100".to_string(),
                }],
            },
        )
        .unwrap();
        sync_cache::replace_sheet_rows(
            &state.db,
            &source.id,
            "Q1",
            &[
                vec!["Region".to_string(), "Revenue".to_string()],
                vec!["EU".to_string(), "100".to_string()],
                vec!["US".to_string(), "250".to_string()],
                vec!["EU".to_string(), "50".to_string()],
            ],
        )
        .unwrap();
        source.id
    }

    #[tokio::test]
    async fn test_create_and_list_through_handlers() {
        let state = test_state();
        let resp = create(
            AxumState(state.clone()),
            Path("ops".to_string()),
            RequireEditMode,
            Json(CreateWidgetInput {
                widget_type: WidgetType::Bar,
                title: "Throughput".to_string(),
                data_source_id: None,
                config: None,
            }),
        )
        .await
        .unwrap();
        let id = resp.0["widget"]["id"].as_str().unwrap().to_string();
        assert_eq!(resp.0["widget"]["status"].as_str().unwrap(), "draft");

        // draft widget: listed in edit mode, hidden in view mode
        let edit_list = list(
            AxumState(state.clone()),
            Path("ops".to_string()),
            EditMode(true),
        )
        .await
        .unwrap();
        assert_eq!(edit_list.0["widgets"].as_array().unwrap().len(), 1);
        let view_list = list(
            AxumState(state.clone()),
            Path("ops".to_string()),
            EditMode(false),
        )
        .await
        .unwrap();
        assert!(view_list.0["widgets"].as_array().unwrap().is_empty());

        delete(
            AxumState(state.clone()),
            Path(("ops".to_string(), id.clone())),
            RequireEditMode,
        )
        .await
        .unwrap();
        let err = update(
            AxumState(state.clone()),
            Path(("ops".to_string(), id)),
            RequireEditMode,
            Json(UpdateWidgetInput::default()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_table_data_from_cached_sheet_rows() {
        let state = test_state();
        let source_id = sheet_source(&state);
        let widget = widgets::create(
            &state.db,
            DashboardSlug::Pm,
            CreateWidgetInput {
                widget_type: WidgetType::Table,
                title: "Q1".to_string(),
                data_source_id: Some(source_id),
                config: Some(json!({ "sheetTitle": "Q1", "filters": { "Region": "EU" } })),
            },
        )
        .unwrap();

        let resp = data(
            AxumState(state.clone()),
            Path(("pm".to_string(), widget.id)),
            EditMode(true),
        )
        .await
        .unwrap();
        let table = &resp.0["data"];
        assert_eq!(
            table["columns"],
            json!(["Region", "Revenue"]),
        );
        assert_eq!(table["rows"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_chart_data_defaults_for_sheet_source() {
        let state = test_state();
        let source_id = sheet_source(&state);
        let widget = widgets::create(
            &state.db,
            DashboardSlug::Pm,
            CreateWidgetInput {
                widget_type: WidgetType::Pie,
                title: "By region".to_string(),
                data_source_id: Some(source_id),
                config: None,
            },
        )
        .unwrap();

        let resp = data(
            AxumState(state.clone()),
            Path(("pm".to_string(), widget.id)),
            EditMode(true),
        )
        .await
        .unwrap();
        let points = resp.0["data"]["points"].as_array().unwrap().clone();
        assert_eq!(points.len(), 2);
        assert_eq!(points[0]["label"], "EU");
        assert_eq!(points[0]["value"], json!(150.0));
    }

    #[tokio::test]
    async fn test_crm_chart_aggregates_deals_by_stage() {
        let state = test_state();
        let source = data_sources::create(
            &state.db,
            CreateDataSourceInput {
                source_type: SourceType::Crm,
                spreadsheet_id: None,
                title: "CRM".to_string(),
                sheets: Vec::new(),
            },
        )
        .unwrap();
        sync_cache::replace_stages(
            &state.db,
            &[
                Stage {
                    id: "s1".to_string(),
                    pipeline_id: Some("p1".to_string()),
                    name: "Won".to_string(),
                    position: Some(1),
                },
                Stage {
                    id: "s2".to_string(),
                    pipeline_id: Some("p1".to_string()),
                    name: "Lost".to_string(),
                    position: Some(2),
                },
            ],
        )
        .unwrap();
        sync_cache::replace_deals(
            &state.db,
            &[
                Deal {
                    id: "d1".to_string(),
                    title: "Acme".to_string(),
                    amount: Some(1000.0),
                    currency: Some("EUR".to_string()),
                    stage_id: Some("s1".to_string()),
                    pipeline_id: Some("p1".to_string()),
                    owner_id: None,
                    status: Some("open".to_string()),
                    closed_at: None,
                    updated_at: None,
                },
                Deal {
                    id: "d2".to_string(),
                    title: "Globex".to_string(),
                    amount: Some(500.0),
                    currency: Some("EUR".to_string()),
                    stage_id: Some("s1".to_string()),
                    pipeline_id: Some("p1".to_string()),
                    owner_id: None,
                    status: Some("open".to_string()),
                    closed_at: None,
                    updated_at: None,
                },
            ],
        )
        .unwrap();

        let widget = widgets::create(
            &state.db,
            DashboardSlug::Sales,
            CreateWidgetInput {
                widget_type: WidgetType::Bar,
                title: "Pipeline".to_string(),
                data_source_id: Some(source.id),
                config: None,
            },
        )
        .unwrap();

        let resp = data(
            AxumState(state.clone()),
            Path(("sales".to_string(), widget.id)),
            EditMode(true),
        )
        .await
        .unwrap();
        let points = resp.0["data"]["points"].as_array().unwrap().clone();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0]["label"], "Won");
        assert_eq!(points[0]["value"], json!(1500.0));
    }

    #[tokio::test]
    async fn test_view_mode_serves_only_published_widget_data() {
        let state = test_state();
        let widget = widgets::create(
            &state.db,
            DashboardSlug::Pm,
            CreateWidgetInput {
                widget_type: WidgetType::Table,
                title: "Draft".to_string(),
                data_source_id: None,
                config: None,
            },
        )
        .unwrap();

        let err = data(
            AxumState(state.clone()),
            Path(("pm".to_string(), widget.id.clone())),
            EditMode(false),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        layouts::publish(&state.db, DashboardSlug::Pm).unwrap();
        let resp = data(
            AxumState(state.clone()),
            Path(("pm".to_string(), widget.id)),
            EditMode(false),
        )
        .await
        .unwrap();
        // no data source bound: empty table, not an error
        assert_eq!(resp.0["data"]["columns"], json!([]));
    }
}
