use std::net::SocketAddr;
use std::path::PathBuf;

use crate::error::AppError;

/// Runtime configuration, sourced entirely from environment variables
/// (`.env` is loaded by `main` before this runs). All credentials live here:
/// the shared edit secret, the sync secret, the CRM token and the spreadsheet
/// service-account key.
#[derive(Debug, Clone)]
pub struct Config {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    /// Shared secret gating edit mode (cookie / bearer / query).
    pub edit_secret: String,
    /// Secret gating `POST /api/sync`. When absent the sync endpoint is
    /// effectively disabled.
    pub sync_secret: Option<String>,
    pub crm: Option<CrmConfig>,
    pub sheets: Option<SheetsConfig>,
}

#[derive(Debug, Clone)]
pub struct CrmConfig {
    pub api_base: String,
    pub token: String,
}

#[derive(Debug, Clone)]
pub struct SheetsConfig {
    pub api_base: String,
    /// Service-account key JSON (inline value or read from the path the env
    /// var pointed at).
    pub service_account_json: String,
}

/// Return the first non-empty value from the given environment variable keys.
pub fn env_var_first_nonempty(keys: &[&str]) -> Option<String> {
    for key in keys {
        if let Ok(value) = std::env::var(key) {
            let trimmed = value.trim();
            if !trimmed.is_empty() {
                return Some(trimmed.to_string());
            }
        }
    }
    None
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let bind_addr = env_var_first_nonempty(&["GRIDBOARD_BIND", "BIND_ADDR"])
            .unwrap_or_else(|| "127.0.0.1:8787".to_string())
            .parse::<SocketAddr>()
            .map_err(|e| AppError::Validation(format!("Invalid GRIDBOARD_BIND address: {e}")))?;

        let data_dir = env_var_first_nonempty(&["GRIDBOARD_DATA_DIR"])
            .map(PathBuf::from)
            .unwrap_or_else(default_data_dir);

        let edit_secret = env_var_first_nonempty(&["GRIDBOARD_EDIT_SECRET", "EDIT_SECRET"])
            .ok_or_else(|| {
                AppError::Validation(
                    "GRIDBOARD_EDIT_SECRET is not set; refusing to start without an edit secret"
                        .into(),
                )
            })?;

        let sync_secret = env_var_first_nonempty(&["GRIDBOARD_SYNC_SECRET", "SYNC_SECRET"]);
        if sync_secret.is_none() {
            tracing::warn!("GRIDBOARD_SYNC_SECRET is not set; POST /api/sync will be rejected");
        }

        let crm = match (
            env_var_first_nonempty(&["GRIDBOARD_CRM_BASE", "CRM_API_BASE"]),
            env_var_first_nonempty(&["GRIDBOARD_CRM_TOKEN", "CRM_API_TOKEN"]),
        ) {
            (Some(api_base), Some(token)) => Some(CrmConfig {
                api_base: require_http_url("GRIDBOARD_CRM_BASE", &api_base)?,
                token,
            }),
            (None, None) => None,
            _ => {
                tracing::warn!(
                    "CRM config incomplete (need both GRIDBOARD_CRM_BASE and GRIDBOARD_CRM_TOKEN); CRM disabled"
                );
                None
            }
        };

        let sheets = match env_var_first_nonempty(&["GRIDBOARD_SHEETS_SA_KEY", "SHEETS_SA_KEY"]) {
            Some(raw) => {
                let service_account_json = if looks_like_inline_json(&raw) {
                    raw
                } else {
                    std::fs::read_to_string(&raw).map_err(|e| {
                        AppError::Validation(format!(
                            "Cannot read service-account key file {raw}: {e}"
                        ))
                    })?
                };
                let api_base =
                    env_var_first_nonempty(&["GRIDBOARD_SHEETS_BASE", "SHEETS_API_BASE"])
                        .unwrap_or_else(|| "https://sheets.googleapis.com".to_string());
                Some(SheetsConfig {
                    api_base: require_http_url("GRIDBOARD_SHEETS_BASE", &api_base)?,
                    service_account_json,
                })
            }
            None => None,
        };

        Ok(Self {
            bind_addr,
            data_dir,
            edit_secret,
            sync_secret,
            crm,
            sheets,
        })
    }
}

fn default_data_dir() -> PathBuf {
    dirs::data_dir()
        .map(|d| d.join("gridboard"))
        .unwrap_or_else(|| PathBuf::from("./data"))
}

/// Validate an API base URL from the environment and normalize away the
/// trailing slash.
fn require_http_url(name: &str, value: &str) -> Result<String, AppError> {
    let parsed = url::Url::parse(value)
        .map_err(|e| AppError::Validation(format!("Invalid {name} URL: {e}")))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err(AppError::Validation(format!(
            "Invalid {name} URL: expected http(s), got {}",
            parsed.scheme()
        )));
    }
    Ok(value.trim_end_matches('/').to_string())
}

/// The SA key env var accepts either the key JSON itself or a path to it.
fn looks_like_inline_json(value: &str) -> bool {
    value.trim_start().starts_with('{')
}
