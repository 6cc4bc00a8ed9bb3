use crate::infrastructure::RepositoryError;
use axum::http::StatusCode;

pub(super) fn map_mail_read_error(err: &RepositoryError) -> (StatusCode, serde_json::Value) {
    match err {
        RepositoryError::NotFound(_) => {
            (StatusCode::NOT_FOUND, serde_json::json!({ "error": "Mail not found" }))
        }
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "Failed to get mail" }),
        ),
    }
}

pub(super) fn map_enqueue_error(err: &RepositoryError) -> (StatusCode, serde_json::Value) {
    match err {
        RepositoryError::InvalidData(msg) => {
            (StatusCode::BAD_REQUEST, serde_json::json!({ "error": msg }))
        }
        _ => (
            StatusCode::INTERNAL_SERVER_ERROR,
            serde_json::json!({ "error": "Failed to queue mail" }),
        ),
    }
}
