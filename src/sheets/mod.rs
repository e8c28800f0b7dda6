pub mod client;
pub mod types;

use async_trait::async_trait;

use crate::error::AppError;

/// Read surface of the spreadsheet service. Trait seam so the sync handler
/// can run against a fake in tests.
#[async_trait]
pub trait SheetReader: Send + Sync {
    /// Cell values for one sheet range, row-major, cells as strings.
    async fn values(
        &self,
        spreadsheet_id: &str,
        sheet_title: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, AppError>;
}
