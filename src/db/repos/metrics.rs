use rusqlite::params;
use serde_json::json;

use crate::db::models::{DashboardMetric, DashboardSlug};
use crate::db::DbPool;
use crate::error::AppError;

/// Recompute every KPI for one dashboard and upsert the cache rows under a
/// single `computed_at`. CRM aggregates are only produced for dashboards with
/// a live CRM source attached.
pub fn compute_for_dashboard(
    pool: &DbPool,
    slug: DashboardSlug,
) -> Result<Vec<DashboardMetric>, AppError> {
    let mut conn = pool.get()?;
    let now = chrono::Utc::now().to_rfc3339();
    let mut values: Vec<(&'static str, serde_json::Value)> = Vec::new();

    let widgets_published: i64 = conn.query_row(
        "SELECT COUNT(*) FROM widgets WHERE dashboard_slug = ?1 AND status = 'published'",
        params![slug],
        |row| row.get(0),
    )?;
    let widgets_draft: i64 = conn.query_row(
        "SELECT COUNT(*) FROM widgets WHERE dashboard_slug = ?1 AND status = 'draft'",
        params![slug],
        |row| row.get(0),
    )?;
    values.push(("widgets_published", json!(widgets_published)));
    values.push(("widgets_draft", json!(widgets_draft)));

    let has_crm: bool = conn.query_row(
        "SELECT EXISTS(
             SELECT 1 FROM dashboard_links l
             JOIN data_sources ds ON ds.id = l.data_source_id
             WHERE l.dashboard_slug = ?1 AND l.status != 'deleted'
               AND ds.status != 'deleted' AND ds.source_type = 'crm')",
        params![slug],
        |row| row.get(0),
    )?;
    if has_crm {
        let (deal_count, total, open): (i64, f64, f64) = conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(amount), 0),
                    COALESCE(SUM(CASE WHEN closed_at IS NULL THEN amount END), 0)
             FROM crm_deals",
            [],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        values.push(("deal_count", json!(deal_count)));
        values.push(("deal_amount_total", json!(total)));
        values.push(("deal_amount_open", json!(open)));
    }

    let sheet_row_count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM sheet_rows WHERE data_source_id IN (
             SELECT l.data_source_id FROM dashboard_links l
             JOIN data_sources ds ON ds.id = l.data_source_id
             WHERE l.dashboard_slug = ?1 AND l.status != 'deleted'
               AND ds.status != 'deleted' AND ds.source_type = 'spreadsheet')",
        params![slug],
        |row| row.get(0),
    )?;
    values.push(("sheet_row_count", json!(sheet_row_count)));

    let tx = conn.transaction()?;
    {
        let mut upsert = tx.prepare(
            "INSERT INTO dashboard_metrics (dashboard_slug, metric, value, computed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT (dashboard_slug, metric) DO UPDATE SET
                 value = excluded.value, computed_at = excluded.computed_at",
        )?;
        for (metric, value) in &values {
            upsert.execute(params![slug, metric, value.to_string(), now])?;
        }
    }
    tx.commit()?;
    drop(conn);

    tracing::debug!(dashboard = %slug, metrics = values.len(), "metrics recomputed");
    get_for_dashboard(pool, slug)
}

pub fn get_for_dashboard(
    pool: &DbPool,
    slug: DashboardSlug,
) -> Result<Vec<DashboardMetric>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT * FROM dashboard_metrics WHERE dashboard_slug = ?1 ORDER BY metric",
    )?;
    let rows = stmt.query_map(params![slug], |row| {
        let raw: String = row.get("value")?;
        let value = serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })?;
        Ok(DashboardMetric {
            dashboard_slug: row.get("dashboard_slug")?,
            metric: row.get("metric")?,
            value,
            computed_at: row.get("computed_at")?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}
