use axum::{http::StatusCode, response::IntoResponse};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parse error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Database migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Upstream returned status {status} for {endpoint}")]
    UpstreamStatus { endpoint: String, status: u16 },

    #[error("{operation} failed after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        operation: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Prediction {0} has already been scored")]
    AlreadyScored(String),

    #[error("Malformed upstream payload: {0}")]
    Payload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, AppError>;

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let status = match &self {
            AppError::UpstreamStatus { .. } | AppError::RetriesExhausted { .. } => {
                StatusCode::BAD_GATEWAY
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}
