//! Error types for the HTTP adapter.
//!
//! [`WebError`] is what transactional handlers return. Its
//! [`IntoResponse`](axum::response::IntoResponse) implementation logs the
//! failure and answers with a JSON body; database failures are reported to
//! the client only as a generic server error.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use tkt_db::DbError;

/// Errors that can occur while handling a transactional request.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    /// The data-access core failed; the transaction has been rolled back.
    #[error(transparent)]
    Database(#[from] DbError),

    /// The request was malformed.
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Any other handler failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl WebError {
    /// HTTP status reported for this error.
    pub const fn status(&self) -> StatusCode {
        match self {
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Database(_) | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for WebError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            Self::Database(_) => String::from("internal server error"),
            Self::BadRequest(msg) | Self::Internal(msg) => msg.clone(),
        };

        if status.is_server_error() {
            tracing::error!(error = %self, "Request failed");
        } else {
            tracing::debug!(error = %self, "Request rejected");
        }

        let body = serde_json::json!({
            "errorMessage": message,
            "status": status.as_u16(),
        });

        (status, axum::Json(body)).into_response()
    }
}
