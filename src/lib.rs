pub mod config;
pub mod crm;
pub mod db;
pub mod error;
pub mod http;
pub mod layout;
pub mod logging;
pub mod sheets;
pub mod validation;
pub mod widget_data;

use std::sync::Arc;

use tokio::sync::watch;

use config::Config;
use crm::client::CrmClient;
use crm::CrmApi;
pub use error::AppError;
use sheets::client::SheetsClient;
use sheets::types::ServiceAccountKey;
use sheets::SheetReader;

pub fn run() {
    logging::init();

    tracing::info!("Starting Gridboard v{}", env!("CARGO_PKG_VERSION"));

    let runtime = tokio::runtime::Runtime::new().expect("failed to start tokio runtime");
    if let Err(e) = runtime.block_on(boot_and_serve()) {
        tracing::error!(error = %e, "Gridboard exited with error");
        std::process::exit(1);
    }
}

async fn boot_and_serve() -> Result<(), AppError> {
    let config = Config::from_env()?;
    let pool = db::init_db(&config.data_dir)?;

    let crm: Option<Arc<dyn CrmApi>> = config.crm.as_ref().map(|c| {
        tracing::info!(base = %c.api_base, "CRM client configured");
        Arc::new(CrmClient::new(c.api_base.clone(), c.token.clone())) as Arc<dyn CrmApi>
    });

    let sheets: Option<Arc<dyn SheetReader>> = match &config.sheets {
        Some(c) => {
            let key = ServiceAccountKey::from_json(&c.service_account_json)?;
            tracing::info!(client_email = %key.client_email, "sheets client configured");
            Some(Arc::new(SheetsClient::new(c.api_base.clone(), key)?) as Arc<dyn SheetReader>)
        }
        None => None,
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("shutdown signal received");
            let _ = shutdown_tx.send(true);
        }
    });

    let state = Arc::new(http::AppState {
        db: pool,
        config,
        crm,
        sheets,
    });
    http::serve(state, shutdown_rx).await
}
