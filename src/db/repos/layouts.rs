use chrono::DateTime;
use rusqlite::params;
use serde::Serialize;
use ts_rs::TS;

use crate::db::models::{DashboardSlug, LayoutKind, LayoutUpsert, WidgetWithLayout};
use crate::db::repos::links;
use crate::db::repos::widgets::{self, DEFAULT_WIDGET_H, DEFAULT_WIDGET_W};
use crate::db::DbPool;
use crate::error::AppError;

/// Layout read result: resolved geometry per widget plus the newest layout
/// timestamp on the canvas (`None` when the dashboard has no widgets).
#[derive(Debug, Clone)]
pub struct DashboardLayout {
    pub widgets: Vec<WidgetWithLayout>,
    pub updated_at: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct PublishOutcome {
    pub layouts_copied: usize,
    pub widgets_published: usize,
    pub links_published: usize,
}

#[derive(Debug, Clone, Copy, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct ResetOutcome {
    pub layouts_restored: usize,
    pub widgets_discarded: usize,
}

/// Read one kind of the dashboard canvas.
///
/// Draft reads cover the edit-mode widget set (draft and published) and fall
/// back per widget to the published row when no draft row exists yet.
/// Published reads cover published widgets only.
pub fn get_for_dashboard(
    pool: &DbPool,
    slug: DashboardSlug,
    kind: LayoutKind,
) -> Result<DashboardLayout, AppError> {
    let sql = match kind {
        LayoutKind::Draft => {
            "SELECT w.*,
                    COALESCE(d.x, p.x, 0)        AS lx,
                    COALESCE(d.y, p.y, 0)        AS ly,
                    COALESCE(d.w, p.w, ?2)       AS lw,
                    COALESCE(d.h, p.h, ?3)       AS lh,
                    COALESCE(d.z_index, p.z_index, 0) AS lz,
                    COALESCE(d.updated_at, p.updated_at) AS l_updated
             FROM widgets w
             LEFT JOIN widget_layouts d ON d.widget_id = w.id AND d.kind = 'draft'
             LEFT JOIN widget_layouts p ON p.widget_id = w.id AND p.kind = 'published'
             WHERE w.dashboard_slug = ?1 AND w.status != 'deleted'
             ORDER BY ly, lx, w.id"
        }
        LayoutKind::Published => {
            "SELECT w.*,
                    COALESCE(p.x, 0)        AS lx,
                    COALESCE(p.y, 0)        AS ly,
                    COALESCE(p.w, ?2)       AS lw,
                    COALESCE(p.h, ?3)       AS lh,
                    COALESCE(p.z_index, 0)  AS lz,
                    p.updated_at            AS l_updated
             FROM widgets w
             LEFT JOIN widget_layouts p ON p.widget_id = w.id AND p.kind = 'published'
             WHERE w.dashboard_slug = ?1 AND w.status = 'published'
             ORDER BY ly, lx, w.id"
        }
    };

    let conn = pool.get()?;
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(
        params![slug, DEFAULT_WIDGET_W, DEFAULT_WIDGET_H],
        |row| {
            let entry = WidgetWithLayout {
                widget: widgets::row_to_widget(row)?,
                x: row.get("lx")?,
                y: row.get("ly")?,
                w: row.get("lw")?,
                h: row.get("lh")?,
                z_index: row.get("lz")?,
            };
            let stamp: Option<String> = row.get("l_updated")?;
            Ok((entry, stamp))
        },
    )?;

    let mut items = Vec::new();
    let mut updated_at: Option<String> = None;
    for row in rows {
        let (entry, stamp) = row?;
        if let Some(stamp) = stamp {
            updated_at = match updated_at.take() {
                Some(current) if later(&current, &stamp) => Some(current),
                _ => Some(stamp),
            };
        }
        items.push(entry);
    }

    Ok(DashboardLayout {
        widgets: items,
        updated_at,
    })
}

/// True when `a` is a later RFC 3339 instant than `b`. Unparseable stamps
/// lose the comparison.
fn later(a: &str, b: &str) -> bool {
    match (
        DateTime::parse_from_rfc3339(a),
        DateTime::parse_from_rfc3339(b),
    ) {
        (Ok(a), Ok(b)) => a >= b,
        (Ok(_), Err(_)) => true,
        _ => false,
    }
}

/// Bulk-upsert draft geometry. Entries whose widget id does not belong to
/// this dashboard (or is deleted) are silently dropped; returns how many
/// entries were applied.
pub fn upsert_draft(
    pool: &DbPool,
    slug: DashboardSlug,
    entries: &[LayoutUpsert],
) -> Result<usize, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let mut applied = 0usize;
    {
        let mut known = tx.prepare(
            "SELECT 1 FROM widgets
             WHERE id = ?1 AND dashboard_slug = ?2 AND status != 'deleted'",
        )?;
        let mut upsert = tx.prepare(
            "INSERT INTO widget_layouts (id, widget_id, kind, x, y, w, h, z_index, updated_at)
             VALUES (?1, ?2, 'draft', ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (widget_id, kind) DO UPDATE SET
                 x = excluded.x, y = excluded.y, w = excluded.w, h = excluded.h,
                 z_index = excluded.z_index, updated_at = excluded.updated_at",
        )?;
        for entry in entries {
            if !known.exists(params![entry.widget_id, slug])? {
                tracing::debug!(widget_id = %entry.widget_id, dashboard = %slug, "dropping foreign layout entry");
                continue;
            }
            upsert.execute(params![
                uuid::Uuid::new_v4().to_string(),
                entry.widget_id,
                entry.x,
                entry.y,
                entry.w,
                entry.h,
                entry.z_index,
                now,
            ])?;
            applied += 1;
        }
    }
    tx.commit()?;
    Ok(applied)
}

/// Publish the dashboard: copy every draft-kind layout row to its
/// published-kind counterpart with identical geometry, sweep layout rows of
/// deleted widgets, then flip draft widgets, links and their sources to
/// published. One transaction.
pub fn publish(pool: &DbPool, slug: DashboardSlug) -> Result<PublishOutcome, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    let drafts: Vec<(String, i64, i64, i64, i64, i64)> = {
        let mut stmt = tx.prepare(
            "SELECT wl.widget_id, wl.x, wl.y, wl.w, wl.h, wl.z_index
             FROM widget_layouts wl
             JOIN widgets w ON w.id = wl.widget_id
             WHERE w.dashboard_slug = ?1 AND w.status != 'deleted' AND wl.kind = 'draft'",
        )?;
        let rows = stmt.query_map(params![slug], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    {
        let mut upsert = tx.prepare(
            "INSERT INTO widget_layouts (id, widget_id, kind, x, y, w, h, z_index, updated_at)
             VALUES (?1, ?2, 'published', ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (widget_id, kind) DO UPDATE SET
                 x = excluded.x, y = excluded.y, w = excluded.w, h = excluded.h,
                 z_index = excluded.z_index, updated_at = excluded.updated_at",
        )?;
        for (widget_id, x, y, w, h, z_index) in &drafts {
            upsert.execute(params![
                uuid::Uuid::new_v4().to_string(),
                widget_id,
                x,
                y,
                w,
                h,
                z_index,
                now,
            ])?;
        }
    }

    // Deleted widgets keep their tombstone row but lose both layout kinds.
    tx.execute(
        "DELETE FROM widget_layouts WHERE widget_id IN
         (SELECT id FROM widgets WHERE dashboard_slug = ?1 AND status = 'deleted')",
        params![slug],
    )?;

    let widgets_published = widgets::publish_all(&tx, slug, &now)?;
    let links_published = links::publish_all(&tx, slug, &now)?;
    tx.commit()?;

    let outcome = PublishOutcome {
        layouts_copied: drafts.len(),
        widgets_published,
        links_published,
    };
    tracing::info!(
        dashboard = %slug,
        layouts = outcome.layouts_copied,
        widgets = outcome.widgets_published,
        "dashboard published"
    );
    Ok(outcome)
}

/// Discard draft edits: drop never-published draft widgets outright, then
/// copy every published-kind row back over draft-kind. One transaction.
pub fn reset(pool: &DbPool, slug: DashboardSlug) -> Result<ResetOutcome, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;

    let widgets_discarded = widgets::discard_drafts(&tx, slug)?;

    let published: Vec<(String, i64, i64, i64, i64, i64)> = {
        let mut stmt = tx.prepare(
            "SELECT wl.widget_id, wl.x, wl.y, wl.w, wl.h, wl.z_index
             FROM widget_layouts wl
             JOIN widgets w ON w.id = wl.widget_id
             WHERE w.dashboard_slug = ?1 AND w.status = 'published' AND wl.kind = 'published'",
        )?;
        let rows = stmt.query_map(params![slug], |row| {
            Ok((
                row.get(0)?,
                row.get(1)?,
                row.get(2)?,
                row.get(3)?,
                row.get(4)?,
                row.get(5)?,
            ))
        })?;
        rows.collect::<Result<Vec<_>, _>>()?
    };

    {
        let mut upsert = tx.prepare(
            "INSERT INTO widget_layouts (id, widget_id, kind, x, y, w, h, z_index, updated_at)
             VALUES (?1, ?2, 'draft', ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT (widget_id, kind) DO UPDATE SET
                 x = excluded.x, y = excluded.y, w = excluded.w, h = excluded.h,
                 z_index = excluded.z_index, updated_at = excluded.updated_at",
        )?;
        for (widget_id, x, y, w, h, z_index) in &published {
            upsert.execute(params![
                uuid::Uuid::new_v4().to_string(),
                widget_id,
                x,
                y,
                w,
                h,
                z_index,
                now,
            ])?;
        }
    }
    tx.commit()?;

    let outcome = ResetOutcome {
        layouts_restored: published.len(),
        widgets_discarded,
    };
    tracing::info!(
        dashboard = %slug,
        restored = outcome.layouts_restored,
        discarded = outcome.widgets_discarded,
        "draft layout reset"
    );
    Ok(outcome)
}
