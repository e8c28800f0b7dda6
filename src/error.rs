use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;

/// App-wide error type. Every fallible function returns `Result<T, AppError>`.
/// Maps onto HTTP status codes through `IntoResponse` so handlers can use `?`.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Connection pool error: {0}")]
    Pool(#[from] r2d2::Error),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Edit mode is disabled")]
    EditModeDisabled,

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Data source {data_source_id} is in use by {} widget(s)", widgets.len())]
    InUse {
        data_source_id: String,
        widgets: Vec<InUseWidget>,
    },

    #[error("CRM error: {0}")]
    Crm(String),

    #[error("Spreadsheet service error: {0}")]
    Sheets(String),

    #[error("{0}")]
    Internal(String),
}

/// Widget reference returned in the 409 in-use conflict body so the caller
/// can present the "delete anyway?" flow.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InUseWidget {
    pub id: String,
    pub dashboard: String,
    pub title: String,
}

impl AppError {
    fn status_code(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::EditModeDisabled => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::InUse { .. } => StatusCode::CONFLICT,
            AppError::Crm(_) | AppError::Sheets(_) => StatusCode::BAD_GATEWAY,
            AppError::Database(_)
            | AppError::Pool(_)
            | AppError::Io(_)
            | AppError::Serde(_)
            | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn kind(&self) -> &'static str {
        match self {
            AppError::Database(_) => "database",
            AppError::Pool(_) => "pool",
            AppError::NotFound(_) => "not_found",
            AppError::Validation(_) => "validation",
            AppError::Io(_) => "io",
            AppError::Serde(_) => "serde",
            AppError::EditModeDisabled => "edit_mode_disabled",
            AppError::Forbidden(_) => "forbidden",
            AppError::InUse { .. } => "in_use",
            AppError::Crm(_) => "crm",
            AppError::Sheets(_) => "sheets",
            AppError::Internal(_) => "internal",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(kind = self.kind(), "{}", self);
        }

        let body = match &self {
            AppError::InUse { widgets, .. } => serde_json::json!({
                "ok": false,
                "error": self.to_string(),
                "kind": self.kind(),
                "inUse": widgets,
            }),
            _ => serde_json::json!({
                "ok": false,
                "error": self.to_string(),
                "kind": self.kind(),
            }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(
            AppError::NotFound("x".into()).status_code(),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            AppError::EditModeDisabled.status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            AppError::Forbidden("bad secret".into()).status_code(),
            StatusCode::FORBIDDEN
        );
        assert_eq!(
            AppError::InUse {
                data_source_id: "ds".into(),
                widgets: vec![],
            }
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            AppError::Crm("upstream".into()).status_code(),
            StatusCode::BAD_GATEWAY
        );
        assert_eq!(
            AppError::Internal("boom".into()).status_code(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }

    #[test]
    fn test_in_use_message_counts_widgets() {
        let err = AppError::InUse {
            data_source_id: "ds-1".into(),
            widgets: vec![
                InUseWidget {
                    id: "w1".into(),
                    dashboard: "pm".into(),
                    title: "Pipeline".into(),
                },
                InUseWidget {
                    id: "w2".into(),
                    dashboard: "sales".into(),
                    title: "Deals".into(),
                },
            ],
        };
        assert!(err.to_string().contains("2 widget(s)"));
    }
}
