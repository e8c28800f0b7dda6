//! Edit-mode gate. A single shared secret unlocks layout mutations; it is
//! presented either as a cookie pair set by `POST /api/edit-mode`, as a
//! `Bearer` token, or as a `?secret=` query parameter.

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{FromRequestParts, State as AxumState};
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use axum::response::{AppendHeaders, IntoResponse};
use axum::Json;
use serde::Deserialize;
use serde_json::json;

use super::AppState;
use crate::error::AppError;

const FLAG_COOKIE: &str = "edit_mode";
const SECRET_COOKIE: &str = "edit_secret";
/// Cookies expire after 12 hours; re-enabling is a single POST.
const COOKIE_MAX_AGE: u32 = 12 * 60 * 60;

/// Whether the request carries valid edit-mode credentials. Never rejects;
/// read-only handlers use it to pick between draft and published views.
pub struct EditMode(pub bool);

impl FromRequestParts<Arc<AppState>> for EditMode {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        Ok(EditMode(granted(parts, &state.config.edit_secret)))
    }
}

/// Rejects with 401 unless the request is in edit mode. Every mutating
/// handler takes this.
pub struct RequireEditMode;

impl FromRequestParts<Arc<AppState>> for RequireEditMode {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        if granted(parts, &state.config.edit_secret) {
            Ok(RequireEditMode)
        } else {
            Err(AppError::EditModeDisabled)
        }
    }
}

fn granted(parts: &Parts, secret: &str) -> bool {
    if let Some(query) = parts.uri.query() {
        if query_secret(query).as_deref() == Some(secret) {
            return true;
        }
    }

    if let Some(auth) = parts
        .headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if auth.strip_prefix("Bearer ") == Some(secret) {
            return true;
        }
    }

    let cookies = cookie_map(&parts.headers);
    cookies.get(FLAG_COOKIE).map(String::as_str) == Some("1")
        && cookies.get(SECRET_COOKIE).map(String::as_str) == Some(secret)
}

fn query_secret(query: &str) -> Option<String> {
    for pair in query.split('&') {
        if let Some((key, value)) = pair.split_once('=') {
            if key == "secret" {
                return urlencoding::decode(value).ok().map(|v| v.into_owned());
            }
        }
    }
    None
}

fn cookie_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map = HashMap::new();
    for header_value in headers.get_all(header::COOKIE) {
        let Ok(raw) = header_value.to_str() else {
            continue;
        };
        for pair in raw.split(';') {
            if let Some((name, value)) = pair.trim().split_once('=') {
                map.insert(name.to_string(), value.to_string());
            }
        }
    }
    map
}

pub async fn status(EditMode(enabled): EditMode) -> Json<serde_json::Value> {
    Json(json!({ "ok": true, "editMode": enabled }))
}

#[derive(Deserialize)]
pub struct EnableBody {
    secret: String,
}

pub async fn enable(
    AxumState(state): AxumState<Arc<AppState>>,
    Json(body): Json<EnableBody>,
) -> Result<impl IntoResponse, AppError> {
    if body.secret != state.config.edit_secret {
        tracing::warn!("edit mode enable rejected: wrong secret");
        return Err(AppError::Forbidden("Invalid edit secret".to_string()));
    }

    tracing::info!("edit mode enabled");
    let headers = AppendHeaders([
        (
            header::SET_COOKIE,
            format!("{FLAG_COOKIE}=1; Path=/; SameSite=Lax; Max-Age={COOKIE_MAX_AGE}"),
        ),
        (
            header::SET_COOKIE,
            format!(
                "{SECRET_COOKIE}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={COOKIE_MAX_AGE}",
                state.config.edit_secret
            ),
        ),
    ]);
    Ok((headers, Json(json!({ "ok": true, "editMode": true }))))
}

pub async fn disable() -> impl IntoResponse {
    let headers = AppendHeaders([
        (
            header::SET_COOKIE,
            format!("{FLAG_COOKIE}=; Path=/; SameSite=Lax; Max-Age=0"),
        ),
        (
            header::SET_COOKIE,
            format!("{SECRET_COOKIE}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0"),
        ),
    ]);
    (headers, Json(json!({ "ok": true, "editMode": false })))
}
