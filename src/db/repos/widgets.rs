use rusqlite::{params, Row};

use crate::db::models::{
    CreateWidgetInput, DashboardSlug, EntityStatus, UpdateWidgetInput, Widget,
};
use crate::db::repos::data_sources;
use crate::db::DbPool;
use crate::error::AppError;
use crate::validation;

/// Default geometry for a freshly created widget, appended at the bottom of
/// the draft canvas.
pub const DEFAULT_WIDGET_W: i64 = 400;
pub const DEFAULT_WIDGET_H: i64 = 300;

// ============================================================================
// Row mapper
// ============================================================================

pub(crate) fn row_to_widget(row: &Row) -> rusqlite::Result<Widget> {
    let config: Option<String> = row.get("config")?;
    let config = match config {
        Some(raw) => Some(serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?),
        None => None,
    };
    Ok(Widget {
        id: row.get("id")?,
        dashboard_slug: row.get("dashboard_slug")?,
        widget_type: row.get("widget_type")?,
        title: row.get("title")?,
        data_source_id: row.get("data_source_id")?,
        config,
        status: row.get("status")?,
        deleted_at: row.get("deleted_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn require_live_source(pool: &DbPool, data_source_id: &str) -> Result<(), AppError> {
    let source = data_sources::get_by_id(pool, data_source_id)?;
    if source.status == EntityStatus::Deleted {
        return Err(AppError::NotFound(format!("Data source {data_source_id}")));
    }
    Ok(())
}

// ============================================================================
// CRUD (all lookups scoped to the dashboard slug)
// ============================================================================

/// Create a draft widget together with its draft layout row, placed below
/// everything currently on the draft canvas.
pub fn create(
    pool: &DbPool,
    slug: DashboardSlug,
    input: CreateWidgetInput,
) -> Result<Widget, AppError> {
    validation::require_non_empty("Title", &input.title)?;
    if let Some(ref data_source_id) = input.data_source_id {
        require_live_source(pool, data_source_id)?;
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let config_json = input.config.as_ref().map(|v| v.to_string());

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let next_y: i64 = tx.query_row(
        "SELECT COALESCE(MAX(wl.y + wl.h), 0) FROM widget_layouts wl
         JOIN widgets w ON w.id = wl.widget_id
         WHERE w.dashboard_slug = ?1 AND w.status != 'deleted' AND wl.kind = 'draft'",
        params![slug],
        |row| row.get(0),
    )?;
    tx.execute(
        "INSERT INTO widgets
         (id, dashboard_slug, widget_type, title, data_source_id, config, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'draft', ?7, ?7)",
        params![
            id,
            slug,
            input.widget_type,
            input.title,
            input.data_source_id,
            config_json,
            now,
        ],
    )?;
    tx.execute(
        "INSERT INTO widget_layouts (id, widget_id, kind, x, y, w, h, z_index, updated_at)
         VALUES (?1, ?2, 'draft', 0, ?3, ?4, ?5, 0, ?6)",
        params![
            uuid::Uuid::new_v4().to_string(),
            id,
            next_y,
            DEFAULT_WIDGET_W,
            DEFAULT_WIDGET_H,
            now,
        ],
    )?;
    tx.commit()?;

    get_for_dashboard(pool, slug, &id)
}

/// Fetch a non-deleted widget belonging to the given dashboard. Widgets of
/// other dashboards (or deleted ones) are a 404, matching the URL scoping.
pub fn get_for_dashboard(
    pool: &DbPool,
    slug: DashboardSlug,
    id: &str,
) -> Result<Widget, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT * FROM widgets
         WHERE id = ?1 AND dashboard_slug = ?2 AND status != 'deleted'",
        params![id, slug],
        row_to_widget,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Widget {id}")),
        other => AppError::Database(other),
    })
}

/// Visibility per edit mode: view mode shows published widgets only, edit
/// mode shows draft and published.
pub fn list_for_dashboard(
    pool: &DbPool,
    slug: DashboardSlug,
    edit_mode: bool,
) -> Result<Vec<Widget>, AppError> {
    let sql = if edit_mode {
        "SELECT * FROM widgets
         WHERE dashboard_slug = ?1 AND status != 'deleted'
         ORDER BY created_at"
    } else {
        "SELECT * FROM widgets
         WHERE dashboard_slug = ?1 AND status = 'published'
         ORDER BY created_at"
    };
    let conn = pool.get()?;
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![slug], row_to_widget)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

pub fn update(
    pool: &DbPool,
    slug: DashboardSlug,
    id: &str,
    input: UpdateWidgetInput,
) -> Result<Widget, AppError> {
    if let Some(ref title) = input.title {
        validation::require_non_empty("Title", title)?;
    }
    if let Some(Some(ref data_source_id)) = input.data_source_id {
        require_live_source(pool, data_source_id)?;
    }

    // Verify exists (and belongs to this dashboard)
    get_for_dashboard(pool, slug, id)?;

    let now = chrono::Utc::now().to_rfc3339();
    let config_json = input.config.as_ref().map(|v| v.to_string());
    let conn = pool.get()?;

    // Build dynamic SET clause
    let mut sets: Vec<String> = vec!["updated_at = ?1".into()];
    let mut param_idx = 2u32;

    push_field!(input.title, "title", sets, param_idx);
    push_field!(input.widget_type, "widget_type", sets, param_idx);
    push_field!(input.data_source_id, "data_source_id", sets, param_idx);
    push_field!(config_json, "config", sets, param_idx);

    let sql = format!(
        "UPDATE widgets SET {} WHERE id = ?{} AND dashboard_slug = ?{}",
        sets.join(", "),
        param_idx,
        param_idx + 1
    );

    let mut param_values: Vec<Box<dyn rusqlite::types::ToSql>> = vec![Box::new(now)];
    if let Some(ref v) = input.title {
        param_values.push(Box::new(v.clone()));
    }
    if let Some(v) = input.widget_type {
        param_values.push(Box::new(v));
    }
    if let Some(ref v) = input.data_source_id {
        param_values.push(Box::new(v.clone())); // inner None writes NULL
    }
    if let Some(ref v) = config_json {
        param_values.push(Box::new(v.clone()));
    }
    param_values.push(Box::new(id.to_string()));
    param_values.push(Box::new(slug));

    let params_ref: Vec<&dyn rusqlite::types::ToSql> =
        param_values.iter().map(|p| p.as_ref()).collect();
    conn.execute(&sql, params_ref.as_slice())?;
    drop(conn);

    get_for_dashboard(pool, slug, id)
}

/// Soft delete. Takes effect immediately: the widget leaves the published
/// set as well, its layout rows stay behind until the next publish sweep.
pub fn soft_delete(pool: &DbPool, slug: DashboardSlug, id: &str) -> Result<(), AppError> {
    get_for_dashboard(pool, slug, id)?;

    let now = chrono::Utc::now().to_rfc3339();
    let conn = pool.get()?;
    conn.execute(
        "UPDATE widgets SET status = 'deleted', deleted_at = ?3, updated_at = ?3
         WHERE id = ?1 AND dashboard_slug = ?2",
        params![id, slug, now],
    )?;
    Ok(())
}

// ============================================================================
// Publish / reset helpers (run inside the layout transaction)
// ============================================================================

pub(crate) fn publish_all(
    conn: &rusqlite::Connection,
    slug: DashboardSlug,
    now: &str,
) -> rusqlite::Result<usize> {
    conn.execute(
        "UPDATE widgets SET status = 'published', updated_at = ?2
         WHERE dashboard_slug = ?1 AND status = 'draft'",
        params![slug, now],
    )
}

/// Drop widgets that were created as draft and never published. Their layout
/// rows go with them via the FK cascade.
pub(crate) fn discard_drafts(
    conn: &rusqlite::Connection,
    slug: DashboardSlug,
) -> rusqlite::Result<usize> {
    conn.execute(
        "DELETE FROM widgets WHERE dashboard_slug = ?1 AND status = 'draft'",
        params![slug],
    )
}
