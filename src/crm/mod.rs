pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::AppError;
use types::{CrmUser, Deal, Pipeline, Stage};

/// Read surface of the CRM REST API the sync job consumes. Trait seam so the
/// sync handler can run against a fake in tests.
#[async_trait]
pub trait CrmApi: Send + Sync {
    async fn list_deals(&self) -> Result<Vec<Deal>, AppError>;
    async fn list_users(&self) -> Result<Vec<CrmUser>, AppError>;
    async fn list_pipelines(&self) -> Result<Vec<Pipeline>, AppError>;
    async fn list_stages(&self) -> Result<Vec<Stage>, AppError>;
}
