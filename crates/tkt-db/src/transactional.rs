//! Run a unit of work inside one transaction.
//!
//! ```text
//! begin(mode) --> TxCtx --> work(&mut TxCtx)
//!                               |
//!                  Ok(value) ---+--- Err(e)
//!                      |              |
//!                   commit         rollback
//!                      |              |
//!            run post-commit      return e
//!            callbacks in order
//!                      |
//!                return value
//! ```

use futures::future::BoxFuture;

use crate::error::DbError;
use crate::postgres::Database;
use crate::tx::{TxCtx, TxMode};

/// Execute `work` in a fresh transaction and finish it according to the
/// result.
///
/// The transaction commits only when `work` returns `Ok`. Post-commit
/// callbacks queued through [`TxCtx::add_future`] run after the commit, in
/// the order they were added. On `Err` the transaction is rolled back, the
/// callbacks are dropped unrun and the error is returned unchanged.
///
/// ```ignore
/// let person = execute_transactional(&db, TxMode::ReadOnly, |tx| {
///     Box::pin(async move {
///         tx.find_record::<Person>("select * from app.person where id = $1", &sql_params![7_i64])
///             .await
///     })
/// })
/// .await?;
/// ```
///
/// # Errors
///
/// Returns the error from `work`, or the begin/commit failure converted
/// into `E`.
pub async fn execute_transactional<F, R, E>(db: &Database, mode: TxMode, work: F) -> Result<R, E>
where
    F: for<'c> FnOnce(&'c mut TxCtx) -> BoxFuture<'c, Result<R, E>>,
    E: From<DbError> + std::fmt::Display,
{
    let mut ctx = db.begin(mode).await?;
    let result = work(&mut ctx).await;
    ctx.complete(result).await
}
