//! `PostgreSQL` connection pool and transaction entry point.
//!
//! Uses [`sqlx`] with runtime query construction (not compile-time checked)
//! so no live database is needed at build time.

use std::sync::Arc;

use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::PgPool;

use crate::config::{DatabaseConfig, SequenceBackend};
use crate::error::DbError;
use crate::sequence::{NativeSequences, SequenceRegistry, Sequences};
use crate::tx::{TxCtx, TxMode};

/// Connection pool handle for one data source.
///
/// Cheap to clone; clones share the pool and the sequence registry.
#[derive(Debug, Clone)]
pub struct Database {
    pool: PgPool,
    connect: PgConnectOptions,
    config: Arc<DatabaseConfig>,
    registry: Arc<SequenceRegistry>,
}

impl Database {
    /// Connect to `PostgreSQL` using the provided configuration.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the settings or URL are invalid, or
    /// [`DbError::Database`] if the connection fails.
    pub async fn connect(
        config: DatabaseConfig,
        registry: Arc<SequenceRegistry>,
    ) -> Result<Self, DbError> {
        let options = pool_options(&config)?;
        let pool = options.pool.connect_with(options.connect.clone()).await?;

        tracing::info!(
            max_connections = config.max_connections,
            sequence_manager = ?config.sequence_manager,
            "Connected to PostgreSQL"
        );

        Ok(Self {
            pool,
            connect: options.connect,
            config: Arc::new(config),
            registry,
        })
    }

    /// Build the pool without opening a connection; connections are
    /// established on first use.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Config`] if the settings or URL are invalid.
    pub fn connect_lazy(
        config: DatabaseConfig,
        registry: Arc<SequenceRegistry>,
    ) -> Result<Self, DbError> {
        let options = pool_options(&config)?;
        let pool = options.pool.connect_lazy_with(options.connect.clone());
        Ok(Self {
            pool,
            connect: options.connect,
            config: Arc::new(config),
            registry,
        })
    }

    /// Return a reference to the underlying [`PgPool`].
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// The configuration this handle was built from.
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The registry holding this process's in-memory sequence managers.
    pub fn registry(&self) -> &SequenceRegistry {
        &self.registry
    }

    /// The identifier allocator for a new transaction context.
    ///
    /// The in-memory manager is keyed by the connection URL, so every
    /// handle to the same data source shares one. It seeds over a connection
    /// of its own rather than one from the pool.
    pub fn sequences(&self) -> Sequences {
        match self.config.sequence_manager {
            SequenceBackend::PgSequence => Sequences::Native(NativeSequences::new()),
            SequenceBackend::InMemory => {
                Sequences::InMemory(self.registry.in_memory(&self.config.url, &self.connect))
            }
        }
    }

    /// Begin a transaction and wrap it in a fresh [`TxCtx`].
    ///
    /// # Errors
    ///
    /// Returns [`DbError::Database`] if no connection can be acquired or the
    /// access mode cannot be set.
    pub async fn begin(&self, mode: TxMode) -> Result<TxCtx, DbError> {
        let mut tx = self.pool.begin().await?;
        if mode == TxMode::ReadOnly {
            sqlx::query("SET TRANSACTION READ ONLY")
                .execute(&mut *tx)
                .await?;
        }
        tracing::debug!(?mode, "Began transaction");
        Ok(TxCtx::new(tx, mode, self.sequences()))
    }

    /// Close all connections in the pool gracefully.
    pub async fn close(&self) {
        self.pool.close().await;
        tracing::info!("PostgreSQL pool closed");
    }
}

struct PoolSetup {
    pool: PgPoolOptions,
    connect: PgConnectOptions,
}

fn pool_options(config: &DatabaseConfig) -> Result<PoolSetup, DbError> {
    config.validate()?;
    let connect: PgConnectOptions = config
        .url
        .parse()
        .map_err(|e: sqlx::Error| DbError::Config(format!("Invalid database URL: {e}")))?;

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .max_lifetime(config.max_lifetime())
        .acquire_timeout(config.acquire_timeout());

    Ok(PoolSetup { pool, connect })
}
