use rusqlite::{params, Row};

use crate::db::models::{DashboardLink, DashboardSlug, EntityStatus, LinkedDataSource};
use crate::db::repos::data_sources;
use crate::db::DbPool;
use crate::error::AppError;

fn row_to_link(row: &Row) -> rusqlite::Result<DashboardLink> {
    Ok(DashboardLink {
        id: row.get("id")?,
        dashboard_slug: row.get("dashboard_slug")?,
        data_source_id: row.get("data_source_id")?,
        status: row.get("status")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

pub fn get(
    pool: &DbPool,
    slug: DashboardSlug,
    data_source_id: &str,
) -> Result<DashboardLink, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT * FROM dashboard_links WHERE dashboard_slug = ?1 AND data_source_id = ?2",
        params![slug, data_source_id],
        row_to_link,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!(
            "Data source {data_source_id} on dashboard {slug}"
        )),
        other => AppError::Database(other),
    })
}

/// Attach a source to a dashboard. Upsert by the composite key: a soft-deleted
/// link is re-activated to draft, an existing live link keeps its status.
pub fn attach(
    pool: &DbPool,
    slug: DashboardSlug,
    data_source_id: &str,
) -> Result<DashboardLink, AppError> {
    let source = data_sources::get_by_id(pool, data_source_id)?;
    if source.status == EntityStatus::Deleted {
        return Err(AppError::NotFound(format!("Data source {data_source_id}")));
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    let conn = pool.get()?;
    conn.execute(
        "INSERT INTO dashboard_links (id, dashboard_slug, data_source_id, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, 'draft', ?4, ?4)
         ON CONFLICT (dashboard_slug, data_source_id) DO UPDATE SET
             status = CASE WHEN dashboard_links.status = 'deleted' THEN 'draft'
                           ELSE dashboard_links.status END,
             updated_at = excluded.updated_at",
        params![id, slug, data_source_id, now],
    )?;

    get(pool, slug, data_source_id)
}

/// Sources linked to a dashboard, with sheets and the link's own status.
/// `include_draft` adds draft links on top of published ones (edit mode);
/// deleted links and deleted sources are never returned.
pub fn list_for_dashboard(
    pool: &DbPool,
    slug: DashboardSlug,
    include_draft: bool,
) -> Result<Vec<LinkedDataSource>, AppError> {
    let sql = if include_draft {
        "SELECT ds.*, l.status AS link_status
         FROM dashboard_links l
         JOIN data_sources ds ON ds.id = l.data_source_id
         WHERE l.dashboard_slug = ?1 AND l.status != 'deleted' AND ds.status != 'deleted'
         ORDER BY l.created_at"
    } else {
        "SELECT ds.*, l.status AS link_status
         FROM dashboard_links l
         JOIN data_sources ds ON ds.id = l.data_source_id
         WHERE l.dashboard_slug = ?1 AND l.status = 'published' AND ds.status != 'deleted'
         ORDER BY l.created_at"
    };

    let conn = pool.get()?;
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map(params![slug], |row| {
        Ok((
            data_sources::row_to_source(row)?,
            row.get::<_, EntityStatus>("link_status")?,
        ))
    })?;
    let pairs = rows
        .collect::<Result<Vec<_>, _>>()
        .map_err(AppError::Database)?;
    drop(stmt);
    drop(conn);

    let mut out = Vec::with_capacity(pairs.len());
    for (source, link_status) in pairs {
        let sheets = data_sources::sheets_for(pool, &source.id)?;
        out.push(LinkedDataSource {
            source,
            sheets,
            link_status,
        });
    }
    Ok(out)
}

/// Flip this dashboard's draft links to published, then publish any still-draft
/// sources behind them. Runs inside the caller's publish transaction.
pub(crate) fn publish_all(
    conn: &rusqlite::Connection,
    slug: DashboardSlug,
    now: &str,
) -> rusqlite::Result<usize> {
    let links = conn.execute(
        "UPDATE dashboard_links SET status = 'published', updated_at = ?2
         WHERE dashboard_slug = ?1 AND status = 'draft'",
        params![slug, now],
    )?;
    conn.execute(
        "UPDATE data_sources SET status = 'published', updated_at = ?2
         WHERE status = 'draft' AND id IN (
             SELECT data_source_id FROM dashboard_links
             WHERE dashboard_slug = ?1 AND status = 'published')",
        params![slug, now],
    )?;
    Ok(links)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_test_db;
    use crate::db::models::{CreateDataSourceInput, SourceType};

    fn make_source(pool: &DbPool, title: &str) -> String {
        data_sources::create(
            pool,
            CreateDataSourceInput {
                source_type: SourceType::Crm,
                spreadsheet_id: None,
                title: title.into(),
                sheets: vec![],
            },
        )
        .unwrap()
        .id
    }

    #[test]
    fn test_attach_is_idempotent() {
        let pool = init_test_db().unwrap();
        let source_id = make_source(&pool, "Pipeline");

        let first = attach(&pool, DashboardSlug::Pm, &source_id).unwrap();
        assert_eq!(first.status, EntityStatus::Draft);

        let second = attach(&pool, DashboardSlug::Pm, &source_id).unwrap();
        assert_eq!(second.id, first.id); // same row, no duplicate

        // Same source on another dashboard is a distinct link
        let other = attach(&pool, DashboardSlug::Sales, &source_id).unwrap();
        assert_ne!(other.id, first.id);
    }

    #[test]
    fn test_attach_reactivates_deleted_link() {
        let pool = init_test_db().unwrap();
        let source_id = make_source(&pool, "Pipeline");
        let link = attach(&pool, DashboardSlug::Pm, &source_id).unwrap();

        let conn = pool.get().unwrap();
        conn.execute(
            "UPDATE dashboard_links SET status = 'deleted' WHERE id = ?1",
            params![link.id],
        )
        .unwrap();
        drop(conn);

        let revived = attach(&pool, DashboardSlug::Pm, &source_id).unwrap();
        assert_eq!(revived.id, link.id);
        assert_eq!(revived.status, EntityStatus::Draft);
    }

    #[test]
    fn test_attach_keeps_published_link_published() {
        let pool = init_test_db().unwrap();
        let source_id = make_source(&pool, "Pipeline");
        let link = attach(&pool, DashboardSlug::Pm, &source_id).unwrap();

        let conn = pool.get().unwrap();
        conn.execute(
            "UPDATE dashboard_links SET status = 'published' WHERE id = ?1",
            params![link.id],
        )
        .unwrap();
        drop(conn);

        let again = attach(&pool, DashboardSlug::Pm, &source_id).unwrap();
        assert_eq!(again.status, EntityStatus::Published);
    }

    #[test]
    fn test_attach_deleted_source_is_not_found() {
        let pool = init_test_db().unwrap();
        let source_id = make_source(&pool, "Old");
        data_sources::delete(&pool, &source_id, false, false).unwrap();

        let err = attach(&pool, DashboardSlug::Pm, &source_id).unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
    }

    #[test]
    fn test_list_filters_by_link_status() {
        let pool = init_test_db().unwrap();
        let draft_id = make_source(&pool, "Draft source");
        let published_id = make_source(&pool, "Published source");
        attach(&pool, DashboardSlug::Ops, &draft_id).unwrap();
        let published = attach(&pool, DashboardSlug::Ops, &published_id).unwrap();

        let conn = pool.get().unwrap();
        conn.execute(
            "UPDATE dashboard_links SET status = 'published' WHERE id = ?1",
            params![published.id],
        )
        .unwrap();
        drop(conn);

        let edit_view = list_for_dashboard(&pool, DashboardSlug::Ops, true).unwrap();
        assert_eq!(edit_view.len(), 2);

        let public_view = list_for_dashboard(&pool, DashboardSlug::Ops, false).unwrap();
        assert_eq!(public_view.len(), 1);
        assert_eq!(public_view[0].source.id, published_id);
        assert_eq!(public_view[0].link_status, EntityStatus::Published);
    }
}
