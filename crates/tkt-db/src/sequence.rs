//! Identifier allocation.
//!
//! Two interchangeable backends, chosen by [`SequenceBackend`]:
//!
//! - [`NativeSequences`] asks `PostgreSQL` for `nextval('<name>seq')`. One per
//!   transaction; uniqueness across transactions is the store's guarantee.
//! - [`InMemorySequenceManager`] keeps a counter per sequence name, seeded
//!   once from the highest stored identifier. One per data source for the
//!   life of the process, shared through a [`SequenceRegistry`].
//!
//! The in-memory backend never re-reads the store after seeding. Running it
//! next to another writer of the same identifier range (including the
//! native backend) can hand out duplicates.
//!
//! [`SequenceBackend`]: crate::config::SequenceBackend

use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use futures::future::BoxFuture;
use sqlx::postgres::{PgConnectOptions, PgConnection, PgStatement};
use sqlx::{Connection, Row};
use tracing::debug;

use crate::error::DbError;
use crate::hydrate::prepare;
use crate::sql::validate_identifier;

/// A named, strictly increasing identifier source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Sequence {
    /// Sequence name.
    pub name: String,
    /// Last value handed out.
    pub last_id: i64,
}

/// Reads the highest identifier already stored for a sequence.
pub trait SeedSource: Send + Sync {
    /// Highest stored identifier for `sequence`, or 0 when none exist.
    fn max_stored<'a>(&'a self, sequence: &'a str) -> BoxFuture<'a, Result<i64, DbError>>;
}

/// Seeds from `select max(id) from <sequence>` in a short-lived transaction
/// of its own.
///
/// Runs on a dedicated connection opened on first use, outside the request
/// pool, so seeding never waits on connections held by open transactions.
/// A connection that fails a seed query is dropped and reopened next time.
#[derive(Debug)]
pub struct PgSeedSource {
    options: PgConnectOptions,
    conn: tokio::sync::Mutex<Option<PgConnection>>,
}

impl PgSeedSource {
    /// Seed from the database described by `options`.
    pub fn new(options: PgConnectOptions) -> Self {
        Self {
            options,
            conn: tokio::sync::Mutex::new(None),
        }
    }
}

impl SeedSource for PgSeedSource {
    fn max_stored<'a>(&'a self, sequence: &'a str) -> BoxFuture<'a, Result<i64, DbError>> {
        Box::pin(async move {
            let table = validate_identifier(sequence)?;
            let sql = format!("select max(id)::bigint from {table}");

            let mut slot = self.conn.lock().await;
            let mut conn = match slot.take() {
                Some(conn) => conn,
                None => {
                    debug!("Opening sequence seed connection");
                    PgConnection::connect_with(&self.options).await?
                }
            };

            let mut tx = conn.begin().await?;
            let row = sqlx::query(&sql).fetch_one(&mut *tx).await?;
            let max: Option<i64> = row.try_get(0)?;
            tx.commit().await?;

            *slot = Some(conn);
            Ok(max.unwrap_or(0))
        })
    }
}

/// Process-local allocator for one data source.
///
/// A single lock covers every sequence of the manager, so allocations for
/// different names serialize too.
pub struct InMemorySequenceManager {
    datasource: String,
    seed: Box<dyn SeedSource>,
    sequences: tokio::sync::Mutex<HashMap<String, Sequence>>,
}

impl InMemorySequenceManager {
    /// Create a manager for `datasource` seeded from `seed`.
    pub fn new(datasource: &str, seed: impl SeedSource + 'static) -> Self {
        Self {
            datasource: datasource.to_owned(),
            seed: Box::new(seed),
            sequences: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// The data source this manager allocates for.
    pub fn datasource(&self) -> &str {
        &self.datasource
    }

    /// Allocate the next identifier of `name`.
    ///
    /// The first call for a name seeds its counter; a failed seed is not
    /// cached and is retried by the next call.
    ///
    /// # Errors
    ///
    /// Returns the seed source's error, or [`DbError::Sequence`] if the
    /// counter would overflow.
    pub async fn next(&self, name: &str) -> Result<i64, DbError> {
        let mut sequences = self.sequences.lock().await;
        let sequence = match sequences.entry(name.to_owned()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                let last_id = self.seed.max_stored(name).await?;
                debug!(
                    datasource = self.datasource.as_str(),
                    sequence = name,
                    last_id,
                    "Seeded in-memory sequence"
                );
                entry.insert(Sequence {
                    name: name.to_owned(),
                    last_id,
                })
            }
        };
        sequence.last_id = sequence
            .last_id
            .checked_add(1)
            .ok_or_else(|| DbError::Sequence {
                name: name.to_owned(),
                reason: "identifier overflow".to_owned(),
            })?;
        Ok(sequence.last_id)
    }

    /// Snapshot of a sequence's state, if it has been seeded.
    pub async fn sequence(&self, name: &str) -> Option<Sequence> {
        self.sequences.lock().await.get(name).cloned()
    }
}

impl std::fmt::Debug for InMemorySequenceManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemorySequenceManager")
            .field("datasource", &self.datasource)
            .finish_non_exhaustive()
    }
}

/// One [`InMemorySequenceManager`] per data source, created on first use.
#[derive(Debug, Default)]
pub struct SequenceRegistry {
    managers: Mutex<HashMap<String, Arc<InMemorySequenceManager>>>,
}

impl SequenceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// The manager for `datasource`, seeded over its own connection built
    /// from `options`.
    pub fn in_memory(
        &self,
        datasource: &str,
        options: &PgConnectOptions,
    ) -> Arc<InMemorySequenceManager> {
        self.get_or_insert_with(datasource, || PgSeedSource::new(options.clone()))
    }

    /// The manager for `datasource`, building its seed source on first use.
    pub fn get_or_insert_with<S, F>(&self, datasource: &str, seed: F) -> Arc<InMemorySequenceManager>
    where
        S: SeedSource + 'static,
        F: FnOnce() -> S,
    {
        let mut managers = self.managers.lock().unwrap_or_else(PoisonError::into_inner);
        let manager = managers
            .entry(datasource.to_owned())
            .or_insert_with(|| Arc::new(InMemorySequenceManager::new(datasource, seed())));
        Arc::clone(manager)
    }

    /// Number of data sources with a manager.
    pub fn len(&self) -> usize {
        self.managers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether no manager has been created yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

const NEXTVAL_SQL: &str = "select nextval($1::text::regclass)";

/// Per-transaction allocator backed by `PostgreSQL` sequences.
#[derive(Debug, Default)]
pub struct NativeSequences {
    statement: Option<PgStatement<'static>>,
}

impl NativeSequences {
    /// Create an allocator with nothing prepared yet.
    pub const fn new() -> Self {
        Self { statement: None }
    }

    /// `nextval('<name>seq')` on the transaction's connection.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidIdentifier`] for an unusable name,
    /// [`DbError::Preparation`] if the statement cannot be prepared, or
    /// [`DbError::Database`] if the sequence does not exist.
    pub async fn next(&mut self, conn: &mut PgConnection, name: &str) -> Result<i64, DbError> {
        let sequence = format!("{}seq", validate_identifier(name)?);
        let statement = match &self.statement {
            Some(statement) => statement.clone(),
            None => {
                let statement = prepare(conn, NEXTVAL_SQL).await?;
                self.statement = Some(statement.clone());
                statement
            }
        };
        let row = sqlx::Statement::query(&statement)
            .bind(sequence)
            .fetch_one(&mut *conn)
            .await?;
        Ok(row.try_get(0)?)
    }
}

/// The allocator attached to one transaction context.
#[derive(Debug)]
pub enum Sequences {
    /// `PostgreSQL` sequences through the context's own transaction.
    Native(NativeSequences),
    /// The data source's shared in-process allocator.
    InMemory(Arc<InMemorySequenceManager>),
}

impl Sequences {
    /// Allocate the next identifier of `name`.
    ///
    /// # Errors
    ///
    /// Propagates the backend's error.
    pub async fn next(&mut self, conn: &mut PgConnection, name: &str) -> Result<i64, DbError> {
        match self {
            Self::Native(native) => native.next(conn, name).await,
            Self::InMemory(manager) => manager.next(name).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    struct FixedSeed {
        max: i64,
        calls: Arc<AtomicUsize>,
    }

    impl FixedSeed {
        fn new(max: i64) -> Self {
            Self {
                max,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    impl SeedSource for FixedSeed {
        fn max_stored<'a>(&'a self, _sequence: &'a str) -> BoxFuture<'a, Result<i64, DbError>> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Box::pin(async move { Ok(self.max) })
        }
    }

    struct FailingSeed;

    impl SeedSource for FailingSeed {
        fn max_stored<'a>(&'a self, sequence: &'a str) -> BoxFuture<'a, Result<i64, DbError>> {
            Box::pin(async move {
                Err(DbError::Sequence {
                    name: sequence.to_owned(),
                    reason: "store unavailable".to_owned(),
                })
            })
        }
    }

    #[tokio::test]
    async fn seeds_once_then_increments() {
        let seed = FixedSeed::new(41);
        let calls = Arc::clone(&seed.calls);
        let manager = InMemorySequenceManager::new("db://a", seed);

        assert_eq!(manager.next("orders").await.unwrap(), 42);
        assert_eq!(manager.next("orders").await.unwrap(), 43);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let state = manager.sequence("orders").await.unwrap();
        assert_eq!(state.last_id, 43);
    }

    #[tokio::test]
    async fn names_are_independent() {
        let manager = InMemorySequenceManager::new("db://a", FixedSeed::new(0));
        assert_eq!(manager.next("orders").await.unwrap(), 1);
        assert_eq!(manager.next("invoices").await.unwrap(), 1);
        assert_eq!(manager.next("orders").await.unwrap(), 2);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_allocations_are_distinct_and_contiguous() {
        const TASKS: i64 = 64;
        let manager = Arc::new(InMemorySequenceManager::new("db://a", FixedSeed::new(100)));

        let handles: Vec<_> = (0..TASKS)
            .map(|_| {
                let manager = Arc::clone(&manager);
                tokio::spawn(async move { manager.next("orders").await })
            })
            .collect();

        let mut ids = BTreeSet::new();
        for handle in handles {
            ids.insert(handle.await.unwrap().unwrap());
        }
        let expected: BTreeSet<i64> = (101..=100 + TASKS).collect();
        assert_eq!(ids, expected);
    }

    #[tokio::test]
    async fn failed_seed_is_retried() {
        let manager = InMemorySequenceManager::new("db://a", FailingSeed);
        assert!(manager.next("orders").await.is_err());
        assert!(manager.sequence("orders").await.is_none());
    }

    #[tokio::test]
    async fn overflow_is_an_error() {
        let manager = InMemorySequenceManager::new("db://a", FixedSeed::new(i64::MAX));
        let err = manager.next("orders").await.unwrap_err();
        assert!(matches!(err, DbError::Sequence { .. }));
    }

    #[test]
    fn registry_shares_one_manager_per_datasource() {
        let registry = SequenceRegistry::new();
        let a = registry.get_or_insert_with("db://a", || FixedSeed::new(0));
        let again = registry.get_or_insert_with("db://a", || FixedSeed::new(99));
        let b = registry.get_or_insert_with("db://b", || FixedSeed::new(0));

        assert!(Arc::ptr_eq(&a, &again));
        assert!(!Arc::ptr_eq(&a, &b));
        assert_eq!(registry.len(), 2);
        assert_eq!(b.datasource(), "db://b");
    }
}
