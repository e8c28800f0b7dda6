use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::crm::types::*;
use crate::crm::CrmApi;
use crate::error::AppError;

fn crm_err(e: impl std::fmt::Display) -> AppError {
    AppError::Crm(e.to_string())
}

/// Page size requested from every list endpoint; the fetch loop continues
/// while full pages come back.
const PAGE_LIMIT: usize = 100;

/// HTTP client for the CRM REST API (deals, users, pipelines, stages).
pub struct CrmClient {
    http: reqwest::Client,
    base_url: String,
    token: String,
}

impl CrmClient {
    pub fn new(base_url: String, token: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");

        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        }
    }

    async fn fetch_all<T: DeserializeOwned>(&self, path: &str) -> Result<Vec<T>, AppError> {
        let mut out = Vec::new();
        let mut page = 1usize;
        loop {
            let resp = self
                .http
                .get(format!("{}{}", self.base_url, path))
                .query(&[("page", page.to_string()), ("limit", PAGE_LIMIT.to_string())])
                .bearer_auth(&self.token)
                .send()
                .await
                .map_err(crm_err)?;

            let status = resp.status();
            if !status.is_success() {
                let body = resp.text().await.unwrap_or_default();
                return Err(AppError::Crm(format!("CRM API error ({status}): {body}")));
            }

            let envelope: ListEnvelope<T> = resp.json().await.map_err(crm_err)?;
            let full_page = envelope.data.len() >= PAGE_LIMIT;
            out.extend(envelope.data);
            if !full_page {
                break;
            }
            page += 1;
        }
        tracing::debug!(path, items = out.len(), pages = page, "CRM fetch complete");
        Ok(out)
    }
}

#[async_trait]
impl CrmApi for CrmClient {
    async fn list_deals(&self) -> Result<Vec<Deal>, AppError> {
        self.fetch_all("/api/deals").await
    }

    async fn list_users(&self) -> Result<Vec<CrmUser>, AppError> {
        self.fetch_all("/api/users").await
    }

    async fn list_pipelines(&self) -> Result<Vec<Pipeline>, AppError> {
        self.fetch_all("/api/pipelines").await
    }

    async fn list_stages(&self) -> Result<Vec<Stage>, AppError> {
        self.fetch_all("/api/stages").await
    }
}
