//! Data-source routes: dashboard-scoped attach/create/list/delete, plus the
//! global listing and restore.

use std::sync::Arc;
use std::sync::OnceLock;

use axum::extract::{Path, Query, State as AxumState};
use axum::Json;
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use super::edit_mode::{EditMode, RequireEditMode};
use super::{parse_slug, AppState};
use crate::db::models::{
    CreateDataSourceInput, CreateWidgetInput, DashboardSlug, LinkedDataSource, SheetInput,
    SourceType, WidgetType,
};
use crate::db::repos::{data_sources, links, widgets};
use crate::db::DbPool;
use crate::error::AppError;

/// Sheets attached without an explicit range read a generous default window.
const DEFAULT_SHEET_RANGE: &str = "A1:Z1000";

pub async fn list_for_dashboard(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(slug): Path<String>,
    EditMode(edit): EditMode,
) -> Result<Json<serde_json::Value>, AppError> {
    let slug = parse_slug(&slug)?;
    let sources = links::list_for_dashboard(&state.db, slug, edit)?;
    Ok(Json(json!({ "ok": true, "dataSources": sources })))
}

pub async fn list_all(
    AxumState(state): AxumState<Arc<AppState>>,
    EditMode(edit): EditMode,
) -> Result<Json<serde_json::Value>, AppError> {
    // edit mode also sees soft-deleted sources, so they can be restored
    let sources = data_sources::list_with_sheets(&state.db, edit)?;
    Ok(Json(json!({ "ok": true, "dataSources": sources })))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SheetBody {
    pub title: String,
    #[serde(default = "default_sheet_range")]
    pub range: String,
}

fn default_sheet_range() -> String {
    DEFAULT_SHEET_RANGE.to_string()
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttachBody {
    /// Attach an existing source by id.
    pub data_source_id: Option<String>,
    /// Or create (or reuse) a spreadsheet source from its URL.
    pub spreadsheet_url: Option<String>,
    /// Or create a source of this type directly; currently only `crm` makes
    /// sense here, spreadsheets come in through `spreadsheet_url`.
    pub source_type: Option<SourceType>,
    pub title: Option<String>,
    #[serde(default)]
    pub sheets: Vec<SheetBody>,
}

/// `POST /api/dashboards/{slug}/data-sources`. Three body shapes:
/// `{dataSourceId}` attaches an existing source, `{spreadsheetUrl, sheets}`
/// creates or reuses a spreadsheet source, `{sourceType: "crm"}` creates a
/// CRM source. Spreadsheet attachment also drops a table widget for the
/// first sheet onto the draft canvas when the dashboard has none for this
/// source yet.
pub async fn attach_or_create(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(slug): Path<String>,
    _edit: RequireEditMode,
    Json(body): Json<AttachBody>,
) -> Result<Json<serde_json::Value>, AppError> {
    let slug = parse_slug(&slug)?;

    let (source_id, newly_linked_spreadsheet) = if let Some(id) = &body.data_source_id {
        links::attach(&state.db, slug, id)?;
        (id.clone(), false)
    } else if let Some(url) = &body.spreadsheet_url {
        let spreadsheet_id = spreadsheet_id_from_url(url).ok_or_else(|| {
            AppError::Validation(format!("Unrecognized spreadsheet URL: {url}"))
        })?;
        let sheets: Vec<SheetInput> = body
            .sheets
            .iter()
            .map(|s| SheetInput {
                title: s.title.clone(),
                range: s.range.clone(),
            })
            .collect();

        let id = match data_sources::find_by_spreadsheet_id(&state.db, &spreadsheet_id)? {
            Some(existing) => {
                // same spreadsheet attached again: reuse the source, take the
                // caller's sheet list as the new truth
                if !sheets.is_empty() {
                    data_sources::replace_sheets(&state.db, &existing.id, &sheets)?;
                }
                existing.id
            }
            None => {
                let title = body
                    .title
                    .clone()
                    .or_else(|| body.sheets.first().map(|s| s.title.clone()))
                    .unwrap_or_else(|| "Spreadsheet".to_string());
                let created = data_sources::create(
                    &state.db,
                    CreateDataSourceInput {
                        source_type: SourceType::Spreadsheet,
                        spreadsheet_id: Some(spreadsheet_id),
                        title,
                        sheets,
                    },
                )?;
                created.id
            }
        };
        links::attach(&state.db, slug, &id)?;
        (id, true)
    } else if let Some(source_type) = body.source_type {
        if source_type != SourceType::Crm {
            return Err(AppError::Validation(
                "Spreadsheet sources are created from spreadsheetUrl".to_string(),
            ));
        }
        let created = data_sources::create(
            &state.db,
            CreateDataSourceInput {
                source_type: SourceType::Crm,
                spreadsheet_id: None,
                title: body.title.clone().unwrap_or_else(|| "CRM".to_string()),
                sheets: Vec::new(),
            },
        )?;
        links::attach(&state.db, slug, &created.id)?;
        (created.id, false)
    } else {
        return Err(AppError::Validation(
            "Provide dataSourceId, spreadsheetUrl or sourceType".to_string(),
        ));
    };

    let companion_widget_id = if newly_linked_spreadsheet {
        ensure_companion_widget(&state.db, slug, &source_id)?
    } else {
        None
    };

    let source = data_sources::get_with_sheets(&state.db, &source_id)?;
    let link = links::get(&state.db, slug, &source_id)?;
    let linked = LinkedDataSource {
        source: source.source,
        sheets: source.sheets,
        link_status: link.status,
    };

    tracing::info!(
        dashboard = %slug,
        data_source = %source_id,
        companion = companion_widget_id.as_deref().unwrap_or("-"),
        "data source attached"
    );
    Ok(Json(json!({
        "ok": true,
        "dataSource": linked,
        "companionWidgetId": companion_widget_id,
    })))
}

/// A spreadsheet source freshly attached to a dashboard gets a starter table
/// widget for its first sheet, unless the dashboard already has a live
/// widget on this source.
fn ensure_companion_widget(
    pool: &DbPool,
    slug: DashboardSlug,
    source_id: &str,
) -> Result<Option<String>, AppError> {
    let in_use = data_sources::widgets_in_use(pool, source_id)?;
    if in_use.iter().any(|w| w.dashboard == slug.as_str()) {
        return Ok(None);
    }

    let sheets = data_sources::sheets_for(pool, source_id)?;
    let Some(first) = sheets.first() else {
        return Ok(None);
    };

    let widget = widgets::create(
        pool,
        slug,
        CreateWidgetInput {
            widget_type: WidgetType::Table,
            title: first.title.clone(),
            data_source_id: Some(source_id.to_string()),
            config: Some(json!({ "sheetTitle": first.title, "range": first.range })),
        },
    )?;
    Ok(Some(widget.id))
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteParams {
    pub force: Option<String>,
    pub hard: Option<String>,
}

fn flag(value: &Option<String>) -> bool {
    matches!(value.as_deref(), Some("1") | Some("true"))
}

pub async fn delete(
    AxumState(state): AxumState<Arc<AppState>>,
    Path((slug, id)): Path<(String, String)>,
    _edit: RequireEditMode,
    Query(params): Query<DeleteParams>,
) -> Result<Json<serde_json::Value>, AppError> {
    parse_slug(&slug)?;
    let outcome = data_sources::delete(&state.db, &id, flag(&params.force), flag(&params.hard))?;
    Ok(Json(json!({
        "ok": true,
        "widgetsAffected": outcome.widgets_affected,
        "hard": outcome.hard,
    })))
}

pub async fn restore(
    AxumState(state): AxumState<Arc<AppState>>,
    Path(id): Path<String>,
    _edit: RequireEditMode,
) -> Result<Json<serde_json::Value>, AppError> {
    data_sources::restore(&state.db, &id)?;
    let source = data_sources::get_with_sheets(&state.db, &id)?;
    Ok(Json(json!({ "ok": true, "dataSource": source })))
}

/// Pull the spreadsheet id out of a share URL, or accept a bare id.
fn spreadsheet_id_from_url(url: &str) -> Option<String> {
    static URL_RE: OnceLock<Regex> = OnceLock::new();
    let re = URL_RE
        .get_or_init(|| Regex::new(r"/spreadsheets/d/([A-Za-z0-9_-]+)").expect("url regex"));
    if let Some(caps) = re.captures(url) {
        return Some(caps[1].to_string());
    }

    static ID_RE: OnceLock<Regex> = OnceLock::new();
    let id_re = ID_RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9_-]{10,}$").expect("id regex"));
    let trimmed = url.trim();
    if id_re.is_match(trimmed) {
        return Some(trimmed.to_string());
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::models::EntityStatus;
    use crate::http::test_state;

    const SHEET_URL: &str =
        "https://docs.google.com/spreadsheets/d/1BxiMVs0XRA5nFMdKvBdBZjgmUUqptlbs74OgvE2upms/edit#gid=0";

    #[test]
    fn test_spreadsheet_id_from_url() {
        assert_eq!(
            spreadsheet_id_from_url(SHEET_URL).as_deref(),
            Some("1BxiMVs0XRA5nFMdKvBdBZjgmUUqptlbs74OgvE2upms")
        );
        // bare id passes through
        assert_eq!(
            spreadsheet_id_from_url("1BxiMVs0XRA5nFMdKvBdBZjgmUUqptlbs74OgvE2upms").as_deref(),
            Some("1BxiMVs0XRA5nFMdKvBdBZjgmUUqptlbs74OgvE2upms")
        );
        assert_eq!(spreadsheet_id_from_url("not a url"), None);
        assert_eq!(spreadsheet_id_from_url("https://example.com/other"), None);
    }

    #[test]
    fn test_delete_flag_parsing() {
        assert!(flag(&Some("1".to_string())));
        assert!(flag(&Some("true".to_string())));
        assert!(!flag(&Some("0".to_string())));
        assert!(!flag(&None));
    }

    #[tokio::test]
    async fn test_create_from_url_attaches_and_adds_companion_widget() {
        let state = test_state();
        let body = AttachBody {
            spreadsheet_url: Some(SHEET_URL.to_string()),
            sheets: vec![SheetBody {
                title: "Deals".to_string(),
                range: "A1:F200".to_string(),
            }],
            ..Default::default()
        };

        let resp = attach_or_create(
            AxumState(state.clone()),
            Path("pm".to_string()),
            RequireEditMode,
            Json(body),
        )
        .await
        .unwrap();

        assert_eq!(resp.0["ok"], true);
        let ds = &resp.0["dataSource"];
        assert_eq!(
            ds["spreadsheetId"].as_str().unwrap(),
            "1BxiMVs0XRA5nFMdKvBdBZjgmUUqptlbs74OgvE2upms"
        );
        assert_eq!(ds["linkStatus"].as_str().unwrap(), "draft");
        assert_eq!(ds["sheets"].as_array().unwrap().len(), 1);

        // the starter widget landed on the draft canvas
        let widget_id = resp.0["companionWidgetId"].as_str().unwrap();
        let widget =
            widgets::get_for_dashboard(&state.db, DashboardSlug::Pm, widget_id).unwrap();
        assert_eq!(widget.widget_type, WidgetType::Table);
        assert_eq!(widget.title, "Deals");
        let config = widget.config.unwrap();
        assert_eq!(config["sheetTitle"], "Deals");
        assert_eq!(config["range"], "A1:F200");
    }

    #[tokio::test]
    async fn test_same_url_reuses_source_across_dashboards() {
        let state = test_state();
        let body = |sheets: Vec<SheetBody>| AttachBody {
            spreadsheet_url: Some(SHEET_URL.to_string()),
            sheets,
            ..Default::default()
        };

        attach_or_create(
            AxumState(state.clone()),
            Path("pm".to_string()),
            RequireEditMode,
            Json(body(vec![SheetBody {
                title: "Sheet1".to_string(),
                range: default_sheet_range(),
            }])),
        )
        .await
        .unwrap();

        let resp = attach_or_create(
            AxumState(state.clone()),
            Path("sales".to_string()),
            RequireEditMode,
            Json(body(vec![SheetBody {
                title: "Sheet1".to_string(),
                range: default_sheet_range(),
            }])),
        )
        .await
        .unwrap();

        // one source, linked twice, each dashboard with its own starter widget
        let all = data_sources::list_all(&state.db, false).unwrap();
        assert_eq!(all.len(), 1);
        assert!(resp.0["companionWidgetId"].is_string());
        let pm = links::list_for_dashboard(&state.db, DashboardSlug::Pm, true).unwrap();
        let sales = links::list_for_dashboard(&state.db, DashboardSlug::Sales, true).unwrap();
        assert_eq!(pm.len(), 1);
        assert_eq!(sales.len(), 1);
    }

    #[tokio::test]
    async fn test_attach_existing_by_id() {
        let state = test_state();
        let created = data_sources::create(
            &state.db,
            CreateDataSourceInput {
                source_type: SourceType::Crm,
                spreadsheet_id: None,
                title: "CRM".to_string(),
                sheets: Vec::new(),
            },
        )
        .unwrap();

        let resp = attach_or_create(
            AxumState(state.clone()),
            Path("sales".to_string()),
            RequireEditMode,
            Json(AttachBody {
                data_source_id: Some(created.id.clone()),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.0["dataSource"]["id"].as_str().unwrap(), created.id);
        assert!(resp.0["companionWidgetId"].is_null());
    }

    #[tokio::test]
    async fn test_create_crm_source() {
        let state = test_state();
        let resp = attach_or_create(
            AxumState(state.clone()),
            Path("sales".to_string()),
            RequireEditMode,
            Json(AttachBody {
                source_type: Some(SourceType::Crm),
                ..Default::default()
            }),
        )
        .await
        .unwrap();
        assert_eq!(resp.0["dataSource"]["sourceType"].as_str().unwrap(), "crm");
        assert_eq!(resp.0["dataSource"]["title"].as_str().unwrap(), "CRM");
        assert!(resp.0["companionWidgetId"].is_null());
    }

    #[tokio::test]
    async fn test_empty_body_is_validation_error() {
        let state = test_state();
        let err = attach_or_create(
            AxumState(state.clone()),
            Path("pm".to_string()),
            RequireEditMode,
            Json(AttachBody::default()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));
    }

    #[tokio::test]
    async fn test_restore_returns_source() {
        let state = test_state();
        let created = data_sources::create(
            &state.db,
            CreateDataSourceInput {
                source_type: SourceType::Crm,
                spreadsheet_id: None,
                title: "CRM".to_string(),
                sheets: Vec::new(),
            },
        )
        .unwrap();
        data_sources::delete(&state.db, &created.id, false, false).unwrap();

        let resp = restore(
            AxumState(state.clone()),
            Path(created.id.clone()),
            RequireEditMode,
        )
        .await
        .unwrap();
        assert_eq!(
            resp.0["dataSource"]["status"].as_str().unwrap(),
            EntityStatus::Draft.as_str()
        );
    }
}
