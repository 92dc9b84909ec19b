//! The per-transaction unit of work.
//!
//! A [`TxCtx`] owns one open `PostgreSQL` transaction together with
//! everything scoped to it: four prepared-statement caches, the identifier
//! allocator and the queue of callbacks to run once the transaction has
//! committed. Nothing here outlives the transaction except the shared
//! in-memory sequence manager.
//!
//! | Cache        | Key                          | Statement                            |
//! |--------------|------------------------------|--------------------------------------|
//! | `statements` | raw SQL text                 | whatever the caller wrote            |
//! | `inserts`    | `schema.type` + auto-id flag | `insert into ... values ...`         |
//! | `updates`    | `schema.type`                | `update ... set ... where id = $1`   |
//! | `deletes`    | `schema.type`                | `delete from ... where id = $1`      |

use std::collections::HashMap;
use std::hash::Hash;

use sqlx::postgres::{PgConnection, PgStatement};
use sqlx::{Postgres, Transaction};
use tracing::{debug, warn};

use crate::error::DbError;
use crate::hydrate::{self, prepare, record_values, ExecOutcome};
use crate::record::{flattened, FieldDescriptor, Record};
use crate::sequence::Sequences;
use crate::sql::{qualified_table, render_insert, render_update};
use crate::value::{ColumnValue, SqlValue};

/// A callback queued to run after a successful commit.
pub type PostCommit = Box<dyn FnOnce() + Send + 'static>;

/// Whether a transaction may write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TxMode {
    /// Reads and writes.
    #[default]
    ReadWrite,
    /// `SET TRANSACTION READ ONLY`.
    ReadOnly,
}

/// Unit of work bound to one database transaction.
pub struct TxCtx {
    tx: Transaction<'static, Postgres>,
    mode: TxMode,
    statements: HashMap<String, PgStatement<'static>>,
    inserts: HashMap<(String, bool), PgStatement<'static>>,
    updates: HashMap<String, PgStatement<'static>>,
    deletes: HashMap<String, PgStatement<'static>>,
    sequences: Sequences,
    post_commit: Vec<PostCommit>,
}

impl TxCtx {
    /// Wrap an open transaction.
    pub fn new(tx: Transaction<'static, Postgres>, mode: TxMode, sequences: Sequences) -> Self {
        Self {
            tx,
            mode,
            statements: HashMap::new(),
            inserts: HashMap::new(),
            updates: HashMap::new(),
            deletes: HashMap::new(),
            sequences,
            post_commit: Vec::new(),
        }
    }

    /// The transaction's access mode.
    pub const fn mode(&self) -> TxMode {
        self.mode
    }

    /// The transaction's connection, for statements the context does not cover.
    pub fn connection(&mut self) -> &mut PgConnection {
        &mut self.tx
    }

    /// Hydrate the first row of `sql`, or `None` if it returns no rows.
    ///
    /// # Errors
    ///
    /// See [`hydrate::query_records`].
    pub async fn find_record<T: Record>(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<T>, DbError> {
        let statement = self.resolve_statement(sql).await?;
        hydrate::find_single_record(&mut self.tx, &statement, params).await
    }

    /// Hydrate every row of `sql`.
    ///
    /// # Errors
    ///
    /// See [`hydrate::query_records`].
    pub async fn query_records<T: Record>(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Vec<T>, DbError> {
        let statement = self.resolve_statement(sql).await?;
        hydrate::query_records(&mut self.tx, &statement, params).await
    }

    /// Execute `sql` bound from `record`'s values after the first `offset`.
    ///
    /// # Errors
    ///
    /// See [`hydrate::exec_record`].
    pub async fn exec_record<T: Record>(
        &mut self,
        sql: &str,
        record: &T,
        offset: usize,
    ) -> Result<ExecOutcome, DbError> {
        let statement = self.resolve_statement(sql).await?;
        hydrate::exec_record(&mut self.tx, &statement, record, offset).await
    }

    /// Execute `sql` with positional parameters, returning the rows affected.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Preparation`] or [`DbError::Database`].
    pub async fn exec_sql(&mut self, sql: &str, params: &[SqlValue]) -> Result<u64, DbError> {
        let statement = self.resolve_statement(sql).await?;
        let outcome = hydrate::execute(&mut self.tx, &statement, params.iter().cloned()).await?;
        Ok(outcome.rows_affected)
    }

    /// First column of the first row of `sql`, or `None` for no rows.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Scan`] if the column does not convert into `T`.
    pub async fn query_scalar<T: ColumnValue>(
        &mut self,
        sql: &str,
        params: &[SqlValue],
    ) -> Result<Option<T>, DbError> {
        let statement = self.resolve_statement(sql).await?;
        let mut query = sqlx::Statement::query(&statement);
        for param in params {
            query = param.clone().bind(query);
        }
        let Some(row) = query.fetch_optional(&mut *self.tx).await? else {
            return Ok(None);
        };
        let value = SqlValue::decode(&row, 0, T::KIND)
            .map_err(|e| scalar_scan_error(e.to_string()))?;
        T::from_sql(value)
            .map(Some)
            .map_err(|e| scalar_scan_error(e.to_string()))
    }

    /// Insert `record` into `schema.<type name>`.
    ///
    /// With `has_auto_id` the leading field is left to the store and its
    /// generated value is returned in [`ExecOutcome::generated_id`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidIdentifier`] for an unusable schema or type
    /// name, otherwise see [`hydrate::exec_record`].
    pub async fn insert_entity<T: Record>(
        &mut self,
        schema: &str,
        record: &T,
        has_auto_id: bool,
    ) -> Result<ExecOutcome, DbError> {
        let fields = flattened::<T>();
        let offset = usize::from(has_auto_id);
        let returning = if has_auto_id { fields.fields.first().copied() } else { None };
        let key = (format!("{schema}.{}", fields.record), has_auto_id);

        let statement = resolve(&mut self.inserts, &mut self.tx, key, || {
            let table = qualified_table(schema, fields.record)?;
            let mut sql = format!("insert into {table} {}", render_insert(&fields.fields, offset));
            if let Some(id) = returning {
                sql.push_str(" returning ");
                sql.push_str(id.column_name());
            }
            Ok(sql)
        })
        .await?;

        let values = record_values(record)?.into_iter().skip(offset);
        match returning {
            Some(id) => hydrate::execute_returning(&mut self.tx, &statement, values, id.kind).await,
            None => hydrate::execute(&mut self.tx, &statement, values).await,
        }
    }

    /// Update every non-identifier column of `record`'s row, matched by its
    /// identifier field.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingIdentifierField`] if `T` has no identifier.
    pub async fn update_entity<T: Record>(
        &mut self,
        schema: &str,
        record: &T,
    ) -> Result<ExecOutcome, DbError> {
        let fields = flattened::<T>();
        let id = *fields.identifier_field()?;
        let key = format!("{schema}.{}", fields.record);

        let statement = resolve(&mut self.updates, &mut self.tx, key, || {
            let table = qualified_table(schema, fields.record)?;
            let assigned: Vec<FieldDescriptor> = fields
                .fields
                .iter()
                .filter(|f| f.position != id.position)
                .copied()
                .collect();
            Ok(format!(
                "update {table} set {} where {} = $1",
                render_update(&assigned, 0, 2),
                id.column_name()
            ))
        })
        .await?;

        let mut values = record_values(record)?;
        let id_value = values.remove(id.position);
        let params = std::iter::once(id_value).chain(values);
        hydrate::execute(&mut self.tx, &statement, params).await
    }

    /// Delete `record`'s row, matched by its identifier field.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::MissingIdentifierField`] if `T` has no identifier.
    pub async fn delete_entity<T: Record>(
        &mut self,
        schema: &str,
        record: &T,
    ) -> Result<ExecOutcome, DbError> {
        let fields = flattened::<T>();
        let id = *fields.identifier_field()?;
        let key = format!("{schema}.{}", fields.record);

        let statement = resolve(&mut self.deletes, &mut self.tx, key, || {
            let table = qualified_table(schema, fields.record)?;
            Ok(format!("delete from {table} where {} = $1", id.column_name()))
        })
        .await?;

        let id_value = record_values(record)?.swap_remove(id.position);
        hydrate::execute(&mut self.tx, &statement, [id_value]).await
    }

    /// Allocate the next identifier of sequence `name`.
    ///
    /// # Errors
    ///
    /// Propagates the configured allocator's error.
    pub async fn next_id(&mut self, name: &str) -> Result<i64, DbError> {
        self.sequences.next(&mut self.tx, name).await
    }

    /// Queue `callback` to run after this transaction commits.
    ///
    /// Callbacks run in the order they were added and are dropped unrun if
    /// the transaction rolls back.
    pub fn add_future(&mut self, callback: impl FnOnce() + Send + 'static) {
        self.post_commit.push(Box::new(callback));
    }

    /// Number of queued post-commit callbacks.
    pub fn pending_futures(&self) -> usize {
        self.post_commit.len()
    }

    /// Commit, releasing the cached statements, and hand back the queued
    /// callbacks for the caller to run.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Database`] if the commit fails; the callbacks are
    /// dropped in that case.
    pub async fn commit(self) -> Result<Vec<PostCommit>, DbError> {
        let Self {
            tx,
            statements,
            inserts,
            updates,
            deletes,
            post_commit,
            ..
        } = self;
        debug!(
            statements = statements.len(),
            inserts = inserts.len(),
            updates = updates.len(),
            deletes = deletes.len(),
            callbacks = post_commit.len(),
            "Committing transaction"
        );
        tx.commit().await?;
        Ok(post_commit)
    }

    /// Roll back, discarding queued callbacks.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Database`] if the rollback itself fails.
    pub async fn rollback(self) -> Result<(), DbError> {
        if !self.post_commit.is_empty() {
            debug!(
                callbacks = self.post_commit.len(),
                "Discarding post-commit callbacks"
            );
        }
        self.tx.rollback().await?;
        Ok(())
    }

    /// Finish the unit of work according to `result`.
    ///
    /// `Ok` commits and then runs the queued callbacks in order; `Err`
    /// rolls back and returns the original error. A failed commit is
    /// returned instead of the value and no callback runs.
    ///
    /// # Errors
    ///
    /// Returns `result`'s error, or the commit error converted into `E`.
    pub async fn complete<R, E>(self, result: Result<R, E>) -> Result<R, E>
    where
        E: From<DbError> + std::fmt::Display,
    {
        match result {
            Ok(value) => {
                let callbacks = self.commit().await?;
                run_post_commit(callbacks);
                Ok(value)
            }
            Err(err) => {
                warn!(error = %err, "Rolling back transaction");
                if let Err(rollback) = self.rollback().await {
                    warn!(error = %rollback, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    async fn resolve_statement(&mut self, sql: &str) -> Result<PgStatement<'static>, DbError> {
        resolve(&mut self.statements, &mut self.tx, sql.to_owned(), || Ok(sql.to_owned())).await
    }
}

impl std::fmt::Debug for TxCtx {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TxCtx")
            .field("mode", &self.mode)
            .field("statements", &self.statements.len())
            .field("inserts", &self.inserts.len())
            .field("updates", &self.updates.len())
            .field("deletes", &self.deletes.len())
            .field("sequences", &self.sequences)
            .field("post_commit", &self.post_commit.len())
            .finish_non_exhaustive()
    }
}

/// Run committed callbacks in queue order.
pub fn run_post_commit(callbacks: Vec<PostCommit>) {
    for callback in callbacks {
        callback();
    }
}

/// Look `key` up in `cache`, preparing and storing the SQL from `build` on a miss.
async fn resolve<K: Eq + Hash>(
    cache: &mut HashMap<K, PgStatement<'static>>,
    conn: &mut PgConnection,
    key: K,
    build: impl FnOnce() -> Result<String, DbError>,
) -> Result<PgStatement<'static>, DbError> {
    if let Some(statement) = cache.get(&key) {
        return Ok(statement.clone());
    }
    let sql = build()?;
    let statement = prepare(conn, &sql).await?;
    cache.insert(key, statement.clone());
    Ok(statement)
}

fn scalar_scan_error(reason: String) -> DbError {
    DbError::Scan {
        column: 0,
        field: "scalar",
        reason,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};

    use super::*;

    #[test]
    fn post_commit_runs_in_order() {
        let log = Arc::new(Mutex::new(Vec::new()));
        let callbacks: Vec<PostCommit> = (1..=3)
            .map(|n| {
                let log = Arc::clone(&log);
                Box::new(move || log.lock().unwrap().push(n)) as PostCommit
            })
            .collect();
        run_post_commit(callbacks);
        assert_eq!(*log.lock().unwrap(), vec![1, 2, 3]);
    }

    #[test]
    fn default_mode_is_read_write() {
        assert_eq!(TxMode::default(), TxMode::ReadWrite);
    }
}
