//! One transaction per request.
//!
//! [`intercept_transactional`] opens a transaction, hands the handler a
//! [`TxCtx`] along with the request, and commits or rolls back depending on
//! the handler's result. Post-commit callbacks run only after a successful
//! commit. Any failure becomes a [`WebError`] response.
//!
//! ```rust,ignore
//! pub async fn get_person(State(state): State<Arc<AppState>>, request: Request) -> Response {
//!     intercept_read_only(&state, request, |tx, _request| {
//!         Box::pin(async move {
//!             let person: Option<Person> = tx.find_record(SELECT_PERSON, &sql_params![7_i64]).await?;
//!             Ok(Json(person).into_response())
//!         })
//!     })
//!     .await
//! }
//! ```

use axum::extract::Request;
use axum::response::{IntoResponse, Response};
use futures::future::BoxFuture;
use tkt_db::{execute_transactional, TxCtx, TxMode};

use crate::error::WebError;
use crate::state::AppState;

/// Run `handler` inside a fresh transaction of the given `mode`.
///
/// The transaction commits when the handler returns `Ok` and is rolled
/// back otherwise; a failed begin or commit is reported like a handler
/// failure.
pub async fn intercept_transactional<H>(
    state: &AppState,
    mode: TxMode,
    request: Request,
    handler: H,
) -> Response
where
    H: for<'c> FnOnce(&'c mut TxCtx, Request) -> BoxFuture<'c, Result<Response, WebError>>,
{
    let method = request.method().clone();
    let uri = request.uri().clone();
    let result = execute_transactional(&state.db, mode, move |tx| handler(tx, request)).await;
    match result {
        Ok(response) => response,
        Err(err) => {
            tracing::warn!(%method, %uri, "Transactional request failed");
            err.into_response()
        }
    }
}

/// [`intercept_transactional`] with a read-only transaction.
pub async fn intercept_read_only<H>(state: &AppState, request: Request, handler: H) -> Response
where
    H: for<'c> FnOnce(&'c mut TxCtx, Request) -> BoxFuture<'c, Result<Response, WebError>>,
{
    intercept_transactional(state, TxMode::ReadOnly, request, handler).await
}
