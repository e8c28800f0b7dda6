use rusqlite::{params, Row};

use crate::db::models::{
    CreateDataSourceInput, DataSource, DataSourceSheet, DataSourceWithSheets, EntityStatus,
    SheetInput, SourceType,
};
use crate::db::DbPool;
use crate::error::{AppError, InUseWidget};
use crate::validation;

// ============================================================================
// Row mappers
// ============================================================================

pub(crate) fn row_to_source(row: &Row) -> rusqlite::Result<DataSource> {
    Ok(DataSource {
        id: row.get("id")?,
        source_type: row.get("source_type")?,
        spreadsheet_id: row.get("spreadsheet_id")?,
        title: row.get("title")?,
        status: row.get("status")?,
        deleted_at: row.get("deleted_at")?,
        created_at: row.get("created_at")?,
        updated_at: row.get("updated_at")?,
    })
}

fn row_to_sheet(row: &Row) -> rusqlite::Result<DataSourceSheet> {
    Ok(DataSourceSheet {
        id: row.get("id")?,
        data_source_id: row.get("data_source_id")?,
        title: row.get("title")?,
        range: row.get("range")?,
        position: row.get("position")?,
        created_at: row.get("created_at")?,
    })
}

// ============================================================================
// Validation
// ============================================================================

fn validate_sheets(sheets: &[SheetInput]) -> Result<(), AppError> {
    if sheets.is_empty() {
        return Err(AppError::Validation(
            "Spreadsheet sources need at least one sheet".into(),
        ));
    }
    for sheet in sheets {
        validation::require_non_empty("Sheet title", &sheet.title)?;
        validation::require_a1_range("Sheet range", &sheet.range)?;
    }
    Ok(())
}

// ============================================================================
// CRUD
// ============================================================================

pub fn create(pool: &DbPool, input: CreateDataSourceInput) -> Result<DataSource, AppError> {
    validation::require_non_empty("Title", &input.title)?;
    match input.source_type {
        SourceType::Spreadsheet => {
            let spreadsheet_id = input.spreadsheet_id.as_deref().unwrap_or("");
            validation::require_non_empty("Spreadsheet id", spreadsheet_id)?;
            validate_sheets(&input.sheets)?;
        }
        SourceType::Crm => {}
    }

    let id = uuid::Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();

    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute(
        "INSERT INTO data_sources
         (id, source_type, spreadsheet_id, title, status, created_at, updated_at)
         VALUES (?1, ?2, ?3, ?4, 'draft', ?5, ?5)",
        params![id, input.source_type, input.spreadsheet_id, input.title, now],
    )?;
    insert_sheets(&tx, &id, &input.sheets, &now)?;
    tx.commit()?;

    get_by_id(pool, &id)
}

fn insert_sheets(
    conn: &rusqlite::Connection,
    data_source_id: &str,
    sheets: &[SheetInput],
    now: &str,
) -> rusqlite::Result<()> {
    let mut stmt = conn.prepare(
        "INSERT INTO data_source_sheets (id, data_source_id, title, range, position, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
    )?;
    for (position, sheet) in sheets.iter().enumerate() {
        stmt.execute(params![
            uuid::Uuid::new_v4().to_string(),
            data_source_id,
            sheet.title,
            sheet.range,
            position as i32,
            now,
        ])?;
    }
    Ok(())
}

pub fn get_by_id(pool: &DbPool, id: &str) -> Result<DataSource, AppError> {
    let conn = pool.get()?;
    conn.query_row(
        "SELECT * FROM data_sources WHERE id = ?1",
        params![id],
        row_to_source,
    )
    .map_err(|e| match e {
        rusqlite::Error::QueryReturnedNoRows => AppError::NotFound(format!("Data source {id}")),
        other => AppError::Database(other),
    })
}

pub fn sheets_for(pool: &DbPool, data_source_id: &str) -> Result<Vec<DataSourceSheet>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT * FROM data_source_sheets WHERE data_source_id = ?1 ORDER BY position",
    )?;
    let rows = stmt.query_map(params![data_source_id], row_to_sheet)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

pub fn get_with_sheets(pool: &DbPool, id: &str) -> Result<DataSourceWithSheets, AppError> {
    let source = get_by_id(pool, id)?;
    let sheets = sheets_for(pool, id)?;
    Ok(DataSourceWithSheets { source, sheets })
}

/// Non-deleted source with the given spreadsheet id, if one exists. Used to
/// reuse a source when the same spreadsheet URL is attached again.
pub fn find_by_spreadsheet_id(
    pool: &DbPool,
    spreadsheet_id: &str,
) -> Result<Option<DataSource>, AppError> {
    let conn = pool.get()?;
    let result = conn.query_row(
        "SELECT * FROM data_sources
         WHERE spreadsheet_id = ?1 AND status != 'deleted'
         ORDER BY created_at LIMIT 1",
        params![spreadsheet_id],
        row_to_source,
    );
    match result {
        Ok(source) => Ok(Some(source)),
        Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(AppError::Database(e)),
    }
}

/// Replace the sheet set of an existing source.
pub fn replace_sheets(
    pool: &DbPool,
    data_source_id: &str,
    sheets: &[SheetInput],
) -> Result<Vec<DataSourceSheet>, AppError> {
    get_by_id(pool, data_source_id)?;
    validate_sheets(sheets)?;

    let now = chrono::Utc::now().to_rfc3339();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM data_source_sheets WHERE data_source_id = ?1",
        params![data_source_id],
    )?;
    insert_sheets(&tx, data_source_id, sheets, &now)?;
    tx.execute(
        "UPDATE data_sources SET updated_at = ?2 WHERE id = ?1",
        params![data_source_id, now],
    )?;
    tx.commit()?;

    sheets_for(pool, data_source_id)
}

pub fn list_all(pool: &DbPool, include_deleted: bool) -> Result<Vec<DataSource>, AppError> {
    let conn = pool.get()?;
    let sql = if include_deleted {
        "SELECT * FROM data_sources ORDER BY created_at DESC"
    } else {
        "SELECT * FROM data_sources WHERE status != 'deleted' ORDER BY created_at DESC"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt.query_map([], row_to_source)?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

/// Spreadsheet sources at least one dashboard currently links, neither side
/// deleted. Sync pulls sheet rows for exactly these.
pub fn list_linked_spreadsheets(pool: &DbPool) -> Result<Vec<DataSourceWithSheets>, AppError> {
    let sources = {
        let conn = pool.get()?;
        let mut stmt = conn.prepare(
            "SELECT DISTINCT ds.* FROM data_sources ds
             JOIN dashboard_links l ON l.data_source_id = ds.id AND l.status != 'deleted'
             WHERE ds.status != 'deleted' AND ds.source_type = 'spreadsheet'
             ORDER BY ds.created_at",
        )?;
        let rows = stmt.query_map([], row_to_source)?;
        rows.collect::<Result<Vec<_>, _>>()
            .map_err(AppError::Database)?
    };

    let mut out = Vec::with_capacity(sources.len());
    for source in sources {
        let sheets = sheets_for(pool, &source.id)?;
        out.push(DataSourceWithSheets { source, sheets });
    }
    Ok(out)
}

pub fn list_with_sheets(
    pool: &DbPool,
    include_deleted: bool,
) -> Result<Vec<DataSourceWithSheets>, AppError> {
    let sources = list_all(pool, include_deleted)?;
    let mut out = Vec::with_capacity(sources.len());
    for source in sources {
        let sheets = sheets_for(pool, &source.id)?;
        out.push(DataSourceWithSheets { source, sheets });
    }
    Ok(out)
}

// ============================================================================
// Deletion lifecycle
// ============================================================================

/// Non-deleted widgets (across all dashboards) still referencing the source.
pub fn widgets_in_use(pool: &DbPool, id: &str) -> Result<Vec<InUseWidget>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT id, dashboard_slug, title FROM widgets
         WHERE data_source_id = ?1 AND status != 'deleted'
         ORDER BY dashboard_slug, created_at",
    )?;
    let rows = stmt.query_map(params![id], |row| {
        Ok(InUseWidget {
            id: row.get("id")?,
            dashboard: row.get("dashboard_slug")?,
            title: row.get("title")?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

#[derive(Debug, Clone, Copy)]
pub struct DeleteOutcome {
    pub widgets_affected: usize,
    pub hard: bool,
}

/// Soft-delete (or with `hard` physically remove) a source. Blocked with a
/// 409 conflict while non-deleted widgets reference it, unless `force` is
/// set, in which case the delete cascades to those widgets.
pub fn delete(pool: &DbPool, id: &str, force: bool, hard: bool) -> Result<DeleteOutcome, AppError> {
    get_by_id(pool, id)?;

    let in_use = widgets_in_use(pool, id)?;
    if !in_use.is_empty() && !force {
        return Err(AppError::InUse {
            data_source_id: id.to_string(),
            widgets: in_use,
        });
    }

    let now = chrono::Utc::now().to_rfc3339();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    let widgets_affected = if hard {
        // widgets.data_source_id is ON DELETE SET NULL, so the source delete
        // alone would orphan referencing widgets instead of removing them.
        let n = tx.execute("DELETE FROM widgets WHERE data_source_id = ?1", params![id])?;
        tx.execute("DELETE FROM data_sources WHERE id = ?1", params![id])?;
        n
    } else {
        let n = tx.execute(
            "UPDATE widgets SET status = 'deleted', deleted_at = ?2, updated_at = ?2
             WHERE data_source_id = ?1 AND status != 'deleted'",
            params![id, now],
        )?;
        tx.execute(
            "UPDATE dashboard_links SET status = 'deleted', updated_at = ?2
             WHERE data_source_id = ?1 AND status != 'deleted'",
            params![id, now],
        )?;
        tx.execute(
            "UPDATE data_sources SET status = 'deleted', deleted_at = ?2, updated_at = ?2
             WHERE id = ?1",
            params![id, now],
        )?;
        n
    };
    tx.commit()?;

    tracing::info!(data_source_id = %id, widgets = widgets_affected, hard, "data source deleted");
    Ok(DeleteOutcome {
        widgets_affected,
        hard,
    })
}

/// Clear a soft-deleted source (and its links) back to draft. Widgets that
/// were cascade-deleted stay deleted; recreating them is an explicit edit.
pub fn restore(pool: &DbPool, id: &str) -> Result<DataSource, AppError> {
    let source = get_by_id(pool, id)?;
    if source.status != EntityStatus::Deleted {
        return Ok(source);
    }

    let now = chrono::Utc::now().to_rfc3339();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute(
        "UPDATE data_sources SET status = 'draft', deleted_at = NULL, updated_at = ?2
         WHERE id = ?1",
        params![id, now],
    )?;
    tx.execute(
        "UPDATE dashboard_links SET status = 'draft', updated_at = ?2
         WHERE data_source_id = ?1 AND status = 'deleted'",
        params![id, now],
    )?;
    tx.commit()?;

    get_by_id(pool, id)
}
