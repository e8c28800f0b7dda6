use rusqlite::params;
use serde::Serialize;
use ts_rs::TS;

use crate::crm::types::{CrmUser, Deal, Pipeline, Stage};
use crate::db::DbPool;
use crate::error::AppError;

// Sync swaps each cache wholesale: delete everything, insert the fresh pull.
// Readers between the two statements are covered by the transaction.

pub fn replace_deals(pool: &DbPool, deals: &[Deal]) -> Result<usize, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM crm_deals", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO crm_deals
             (id, title, amount, currency, stage_id, pipeline_id, owner_id, status, closed_at, updated_at, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
        )?;
        for deal in deals {
            stmt.execute(params![
                deal.id,
                deal.title,
                deal.amount,
                deal.currency,
                deal.stage_id,
                deal.pipeline_id,
                deal.owner_id,
                deal.status,
                deal.closed_at,
                deal.updated_at,
                now,
            ])?;
        }
    }
    tx.commit()?;
    Ok(deals.len())
}

pub fn replace_users(pool: &DbPool, users: &[CrmUser]) -> Result<usize, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM crm_users", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO crm_users (id, name, email, synced_at) VALUES (?1, ?2, ?3, ?4)",
        )?;
        for user in users {
            stmt.execute(params![user.id, user.name, user.email, now])?;
        }
    }
    tx.commit()?;
    Ok(users.len())
}

pub fn replace_pipelines(pool: &DbPool, pipelines: &[Pipeline]) -> Result<usize, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM crm_pipelines", [])?;
    {
        let mut stmt =
            tx.prepare("INSERT INTO crm_pipelines (id, name, synced_at) VALUES (?1, ?2, ?3)")?;
        for pipeline in pipelines {
            stmt.execute(params![pipeline.id, pipeline.name, now])?;
        }
    }
    tx.commit()?;
    Ok(pipelines.len())
}

pub fn replace_stages(pool: &DbPool, stages: &[Stage]) -> Result<usize, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute("DELETE FROM crm_stages", [])?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO crm_stages (id, pipeline_id, name, position, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for stage in stages {
            stmt.execute(params![
                stage.id,
                stage.pipeline_id,
                stage.name,
                stage.position.unwrap_or(0),
                now,
            ])?;
        }
    }
    tx.commit()?;
    Ok(stages.len())
}

/// Swap the cached rows of one sheet. Cells are stored as a JSON array per row.
pub fn replace_sheet_rows(
    pool: &DbPool,
    data_source_id: &str,
    sheet_title: &str,
    rows: &[Vec<String>],
) -> Result<usize, AppError> {
    let now = chrono::Utc::now().to_rfc3339();
    let mut conn = pool.get()?;
    let tx = conn.transaction()?;
    tx.execute(
        "DELETE FROM sheet_rows WHERE data_source_id = ?1 AND sheet_title = ?2",
        params![data_source_id, sheet_title],
    )?;
    {
        let mut stmt = tx.prepare(
            "INSERT INTO sheet_rows (data_source_id, sheet_title, row_index, cells, synced_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
        )?;
        for (index, cells) in rows.iter().enumerate() {
            stmt.execute(params![
                data_source_id,
                sheet_title,
                index as i64,
                serde_json::to_string(cells)?,
                now,
            ])?;
        }
    }
    tx.commit()?;
    Ok(rows.len())
}

/// Cached deal joined with stage, pipeline and owner names, the shape table
/// and chart widgets read.
#[derive(Debug, Clone, Serialize, TS)]
#[ts(export)]
#[serde(rename_all = "camelCase")]
pub struct DealRow {
    pub id: String,
    pub title: String,
    pub amount: Option<f64>,
    pub currency: Option<String>,
    pub stage: Option<String>,
    pub pipeline: Option<String>,
    pub owner: Option<String>,
    pub status: Option<String>,
    pub closed_at: Option<String>,
}

pub fn deal_rows(pool: &DbPool) -> Result<Vec<DealRow>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT d.id, d.title, d.amount, d.currency,
                s.name AS stage, p.name AS pipeline, u.name AS owner,
                d.status, d.closed_at
         FROM crm_deals d
         LEFT JOIN crm_stages s ON s.id = d.stage_id
         LEFT JOIN crm_pipelines p ON p.id = d.pipeline_id
         LEFT JOIN crm_users u ON u.id = d.owner_id
         ORDER BY d.amount DESC, d.id",
    )?;
    let rows = stmt.query_map([], |row| {
        Ok(DealRow {
            id: row.get("id")?,
            title: row.get("title")?,
            amount: row.get("amount")?,
            currency: row.get("currency")?,
            stage: row.get("stage")?,
            pipeline: row.get("pipeline")?,
            owner: row.get("owner")?,
            status: row.get("status")?,
            closed_at: row.get("closed_at")?,
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}

/// Cached rows of one sheet, in sheet order.
pub fn sheet_values(
    pool: &DbPool,
    data_source_id: &str,
    sheet_title: &str,
) -> Result<Vec<Vec<String>>, AppError> {
    let conn = pool.get()?;
    let mut stmt = conn.prepare(
        "SELECT cells FROM sheet_rows
         WHERE data_source_id = ?1 AND sheet_title = ?2
         ORDER BY row_index",
    )?;
    let rows = stmt.query_map(params![data_source_id, sheet_title], |row| {
        let raw: String = row.get("cells")?;
        serde_json::from_str(&raw).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
    })?;
    rows.collect::<Result<Vec<_>, _>>().map_err(AppError::Database)
}
