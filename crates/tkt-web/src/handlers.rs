//! Built-in endpoints.
//!
//! | Method | Path      | Description                                   |
//! |--------|-----------|-----------------------------------------------|
//! | `GET`  | `/health` | `SELECT 1` in a read-only transaction         |

use std::sync::Arc;

use axum::extract::{Request, State};
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::error::WebError;
use crate::intercept::intercept_read_only;
use crate::state::AppState;

/// Report whether a transaction can be opened and queried.
pub async fn health(State(state): State<Arc<AppState>>, request: Request) -> Response {
    intercept_read_only(&state, request, |tx, _request| {
        Box::pin(async move {
            let one: Option<i32> = tx.query_scalar("SELECT 1", &[]).await?;
            if one != Some(1) {
                return Err(WebError::Internal(String::from("unexpected health check result")));
            }
            Ok(Json(serde_json::json!({ "status": "ok" })).into_response())
        })
    })
    .await
}
