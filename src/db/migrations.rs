use rusqlite::Connection;

use crate::error::AppError;

/// Ordered migration steps. `PRAGMA user_version` records how many have been
/// applied; index N in this slice brings the database to version N+1.
const MIGRATIONS: &[&str] = &[V1_CORE_SCHEMA, V2_SYNC_CACHES];

/// Schema version a fully migrated database reports.
pub const SCHEMA_VERSION: i64 = MIGRATIONS.len() as i64;

/// Bring the database up to [`SCHEMA_VERSION`]. Each pending step runs in its
/// own transaction together with the version bump, so a failed step leaves the
/// previous version intact.
pub fn run(conn: &mut Connection) -> Result<(), AppError> {
    let current: i64 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if current >= SCHEMA_VERSION {
        tracing::debug!(version = current, "database schema up to date");
        return Ok(());
    }

    for (idx, sql) in MIGRATIONS.iter().enumerate().skip(current as usize) {
        let version = (idx + 1) as i64;
        let tx = conn.transaction()?;
        tx.execute_batch(sql)?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
        tracing::info!(version, "applied schema migration");
    }

    Ok(())
}

// ============================================================================
// v1: dashboards, data sources, widgets, layouts
// ============================================================================

const V1_CORE_SCHEMA: &str = r#"

CREATE TABLE IF NOT EXISTS data_sources (
    id              TEXT PRIMARY KEY,
    source_type     TEXT NOT NULL CHECK (source_type IN ('spreadsheet', 'crm')),
    spreadsheet_id  TEXT,
    title           TEXT NOT NULL,
    status          TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'published', 'deleted')),
    deleted_at      TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS data_source_sheets (
    id              TEXT PRIMARY KEY,
    data_source_id  TEXT NOT NULL REFERENCES data_sources(id) ON DELETE CASCADE,
    title           TEXT NOT NULL,
    range           TEXT NOT NULL,
    position        INTEGER NOT NULL DEFAULT 0,
    created_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_data_source_sheets_source ON data_source_sheets(data_source_id);

CREATE TABLE IF NOT EXISTS dashboard_links (
    id              TEXT PRIMARY KEY,
    dashboard_slug  TEXT NOT NULL CHECK (dashboard_slug IN ('pm', 'sales', 'ops')),
    data_source_id  TEXT NOT NULL REFERENCES data_sources(id) ON DELETE CASCADE,
    status          TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'published', 'deleted')),
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL,
    UNIQUE (dashboard_slug, data_source_id)
);
CREATE INDEX IF NOT EXISTS idx_dashboard_links_slug ON dashboard_links(dashboard_slug);

CREATE TABLE IF NOT EXISTS widgets (
    id              TEXT PRIMARY KEY,
    dashboard_slug  TEXT NOT NULL CHECK (dashboard_slug IN ('pm', 'sales', 'ops')),
    widget_type     TEXT NOT NULL CHECK (widget_type IN ('table', 'line', 'bar', 'pie')),
    title           TEXT NOT NULL,
    data_source_id  TEXT REFERENCES data_sources(id) ON DELETE SET NULL,
    config          TEXT,
    status          TEXT NOT NULL DEFAULT 'draft' CHECK (status IN ('draft', 'published', 'deleted')),
    deleted_at      TEXT,
    created_at      TEXT NOT NULL,
    updated_at      TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_widgets_slug   ON widgets(dashboard_slug);
CREATE INDEX IF NOT EXISTS idx_widgets_source ON widgets(data_source_id);

CREATE TABLE IF NOT EXISTS widget_layouts (
    id          TEXT PRIMARY KEY,
    widget_id   TEXT NOT NULL REFERENCES widgets(id) ON DELETE CASCADE,
    kind        TEXT NOT NULL CHECK (kind IN ('draft', 'published')),
    x           INTEGER NOT NULL DEFAULT 0,
    y           INTEGER NOT NULL DEFAULT 0,
    w           INTEGER NOT NULL DEFAULT 400,
    h           INTEGER NOT NULL DEFAULT 300,
    z_index     INTEGER NOT NULL DEFAULT 0,
    updated_at  TEXT NOT NULL,
    UNIQUE (widget_id, kind)
);
CREATE INDEX IF NOT EXISTS idx_widget_layouts_widget ON widget_layouts(widget_id);

"#;

// ============================================================================
// v2: sync caches and the metrics table
// ============================================================================

const V2_SYNC_CACHES: &str = r#"

CREATE TABLE IF NOT EXISTS crm_deals (
    id           TEXT PRIMARY KEY,
    title        TEXT NOT NULL DEFAULT '',
    amount       REAL,
    currency     TEXT,
    stage_id     TEXT,
    pipeline_id  TEXT,
    owner_id     TEXT,
    status       TEXT,
    closed_at    TEXT,
    updated_at   TEXT,
    synced_at    TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_crm_deals_stage ON crm_deals(stage_id);

CREATE TABLE IF NOT EXISTS crm_users (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL DEFAULT '',
    email      TEXT,
    synced_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS crm_pipelines (
    id         TEXT PRIMARY KEY,
    name       TEXT NOT NULL DEFAULT '',
    synced_at  TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS crm_stages (
    id           TEXT PRIMARY KEY,
    pipeline_id  TEXT,
    name         TEXT NOT NULL DEFAULT '',
    position     INTEGER NOT NULL DEFAULT 0,
    synced_at    TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS sheet_rows (
    data_source_id  TEXT NOT NULL REFERENCES data_sources(id) ON DELETE CASCADE,
    sheet_title     TEXT NOT NULL,
    row_index       INTEGER NOT NULL,
    cells           TEXT NOT NULL,
    synced_at       TEXT NOT NULL,
    PRIMARY KEY (data_source_id, sheet_title, row_index)
);

CREATE TABLE IF NOT EXISTS dashboard_metrics (
    dashboard_slug  TEXT NOT NULL CHECK (dashboard_slug IN ('pm', 'sales', 'ops')),
    metric          TEXT NOT NULL,
    value           TEXT NOT NULL,
    computed_at     TEXT NOT NULL,
    PRIMARY KEY (dashboard_slug, metric)
);

"#;
