use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rsa::pkcs1v15::SigningKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::signature::{SignatureEncoding, Signer};
use rsa::RsaPrivateKey;
use sha2::Sha256;
use tokio::sync::Mutex;

use crate::error::AppError;
use crate::sheets::types::{ServiceAccountKey, TokenResponse, ValueRange};
use crate::sheets::SheetReader;

fn sheets_err(e: impl std::fmt::Display) -> AppError {
    AppError::Sheets(e.to_string())
}

const SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets.readonly";
const JWT_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
/// Refresh this long before the token actually expires.
const EXPIRY_SLACK: Duration = Duration::from_secs(60);

struct CachedToken {
    value: String,
    expires_at: Instant,
}

/// Client for the spreadsheet values API, authenticating as a service
/// account via an RS256 JWT-bearer grant.
pub struct SheetsClient {
    http: reqwest::Client,
    api_base: String,
    key: ServiceAccountKey,
    signing_key: SigningKey<Sha256>,
    token: Mutex<Option<CachedToken>>,
}

impl SheetsClient {
    pub fn new(api_base: String, key: ServiceAccountKey) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .expect("failed to build reqwest client");

        let private_key = RsaPrivateKey::from_pkcs8_pem(&key.private_key)
            .map_err(|e| AppError::Sheets(format!("invalid service-account key: {e}")))?;

        Ok(Self {
            http,
            api_base: api_base.trim_end_matches('/').to_string(),
            signing_key: SigningKey::<Sha256>::new(private_key),
            key,
            token: Mutex::new(None),
        })
    }

    /// Signed `header.claims.signature` assertion for the token exchange.
    fn build_assertion(&self, now_secs: u64) -> String {
        let header = URL_SAFE_NO_PAD.encode(r#"{"alg":"RS256","typ":"JWT"}"#);
        let claims = URL_SAFE_NO_PAD.encode(
            build_claims(&self.key.client_email, &self.key.token_uri, now_secs).to_string(),
        );
        let signing_input = format!("{header}.{claims}");
        let signature = self.signing_key.sign(signing_input.as_bytes());
        let signature = URL_SAFE_NO_PAD.encode(signature.to_bytes());
        format!("{signing_input}.{signature}")
    }

    async fn exchange_token(&self) -> Result<TokenResponse, AppError> {
        let now_secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(sheets_err)?
            .as_secs();
        let assertion = self.build_assertion(now_secs);

        let resp = self
            .http
            .post(&self.key.token_uri)
            .form(&[("grant_type", JWT_GRANT), ("assertion", &assertion)])
            .send()
            .await
            .map_err(sheets_err)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Sheets(format!(
                "token exchange failed ({status}): {body}"
            )));
        }
        resp.json().await.map_err(sheets_err)
    }

    /// Cached bearer token, refreshed shortly before expiry. The mutex also
    /// collapses concurrent refreshes into one exchange.
    async fn access_token(&self) -> Result<String, AppError> {
        let mut guard = self.token.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.expires_at > Instant::now() {
                return Ok(cached.value.clone());
            }
        }

        let fresh = self.exchange_token().await?;
        let ttl = Duration::from_secs(fresh.expires_in).saturating_sub(EXPIRY_SLACK);
        let value = fresh.access_token;
        *guard = Some(CachedToken {
            value: value.clone(),
            expires_at: Instant::now() + ttl,
        });
        tracing::debug!(ttl_secs = ttl.as_secs(), "sheets access token refreshed");
        Ok(value)
    }
}

#[async_trait]
impl SheetReader for SheetsClient {
    async fn values(
        &self,
        spreadsheet_id: &str,
        sheet_title: &str,
        range: &str,
    ) -> Result<Vec<Vec<String>>, AppError> {
        let token = self.access_token().await?;
        let a1 = format!("{sheet_title}!{range}");
        let url = format!(
            "{}/v4/spreadsheets/{}/values/{}?majorDimension=ROWS",
            self.api_base,
            urlencoding::encode(spreadsheet_id),
            urlencoding::encode(&a1),
        );

        let resp = self
            .http
            .get(url)
            .bearer_auth(token)
            .send()
            .await
            .map_err(sheets_err)?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(AppError::Sheets(format!(
                "values fetch failed ({status}): {body}"
            )));
        }

        let range: ValueRange = resp.json().await.map_err(sheets_err)?;
        Ok(range
            .values
            .into_iter()
            .map(|row| row.iter().map(cell_to_string).collect())
            .collect())
    }
}

fn build_claims(client_email: &str, token_uri: &str, now_secs: u64) -> serde_json::Value {
    serde_json::json!({
        "iss": client_email,
        "scope": SCOPE,
        "aud": token_uri,
        "iat": now_secs,
        "exp": now_secs + 3600,
    })
}

fn cell_to_string(cell: &serde_json::Value) -> String {
    match cell {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_claims_shape() {
        let claims = build_claims(
            "svc@example.iam.gserviceaccount.com",
            "https://oauth2.googleapis.com/token",
            1_700_000_000,
        );
        assert_eq!(claims["iss"], "svc@example.iam.gserviceaccount.com");
        assert_eq!(claims["aud"], "https://oauth2.googleapis.com/token");
        assert_eq!(claims["exp"], 1_700_003_600u64);
        assert_eq!(claims["scope"], SCOPE);
    }

    #[test]
    fn test_cell_to_string_handles_scalars() {
        assert_eq!(cell_to_string(&serde_json::json!("text")), "text");
        assert_eq!(cell_to_string(&serde_json::json!(42)), "42");
        assert_eq!(cell_to_string(&serde_json::json!(3.5)), "3.5");
        assert_eq!(cell_to_string(&serde_json::json!(true)), "true");
        assert_eq!(cell_to_string(&serde_json::Value::Null), "");
    }
}
