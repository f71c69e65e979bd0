use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde_json::json;

/// Unified error type for the analytics API.
///
/// Insufficient data is deliberately absent: it is carried as `None` values
/// through the pipeline and rendered as `N/A`, never as an error.
#[derive(Debug)]
pub enum HubError {
    /// Bad or missing parameters, same-instrument pair, unknown instrument.
    InvalidRequest(String),
    /// Uploaded file rejected as a whole.
    MalformedUpload(String),
    Db(String),
    Internal(String),
}

impl std::fmt::Display for HubError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidRequest(msg) => write!(f, "invalid_request: {msg}"),
            Self::MalformedUpload(msg) => write!(f, "malformed_upload: {msg}"),
            Self::Db(msg) => write!(f, "db_error: {msg}"),
            Self::Internal(msg) => write!(f, "internal_error: {msg}"),
        }
    }
}

impl std::error::Error for HubError {}

impl HubError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::InvalidRequest(_) | Self::MalformedUpload(_) => StatusCode::BAD_REQUEST,
            Self::Db(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Client-visible reason, without the variant prefix.
    pub fn detail(&self) -> String {
        match self {
            Self::InvalidRequest(msg) | Self::MalformedUpload(msg) => msg.clone(),
            Self::Db(msg) => format!("db_error:{msg}"),
            Self::Internal(msg) => msg.clone(),
        }
    }
}

impl IntoResponse for HubError {
    fn into_response(self) -> Response {
        let status = self.status();
        if status.is_server_error() {
            tracing::error!("request failed: {self}");
        }
        let body = json!({ "detail": self.detail() });
        (status, axum::Json(body)).into_response()
    }
}

impl From<rusqlite::Error> for HubError {
    fn from(e: rusqlite::Error) -> Self {
        Self::Db(e.to_string())
    }
}

impl From<r2d2::Error> for HubError {
    fn from(e: r2d2::Error) -> Self {
        Self::Db(e.to_string())
    }
}

impl From<csv::Error> for HubError {
    fn from(e: csv::Error) -> Self {
        Self::Internal(format!("csv: {e}"))
    }
}

impl From<std::io::Error> for HubError {
    fn from(e: std::io::Error) -> Self {
        Self::Internal(e.to_string())
    }
}
