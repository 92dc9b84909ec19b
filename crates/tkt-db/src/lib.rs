//! Record mapping and request-scoped transactions over `PostgreSQL`.
//!
//! Application code describes its row types once (as [`Record`]s) and then
//! works entirely through a [`TxCtx`]: hydrated queries, entity
//! insert/update/delete with generated SQL, identifier allocation and
//! post-commit callbacks. Every context owns one transaction and its own
//! prepared-statement caches.
//!
//! # Architecture
//!
//! ```text
//! Database (pool + SequenceRegistry)
//!     |
//!     +-- begin(mode) --> TxCtx
//!         |-- statements / inserts / updates / deletes   (prepared caches)
//!         |-- Sequences   (native nextval, or shared in-memory manager)
//!         +-- post-commit callbacks
//!
//! Record --flatten--> FlattenedFields --> sql fragments
//!                                     --> ParamWriter (bind)
//!                                     --> RowReader   (hydrate)
//! ```
//!
//! # Modules
//!
//! - [`record`] -- Record descriptors and field flattening
//! - [`value`] -- Typed scalar values and their column conversions
//! - [`sql`] -- INSERT/UPDATE/SELECT fragment rendering
//! - [`hydrate`] -- Row scanning, record binding and statement execution
//! - [`sequence`] -- Native and in-memory identifier allocation
//! - [`tx`] -- The per-transaction context
//! - [`transactional`] -- Commit-or-rollback wrapper around a unit of work
//! - [`postgres`] -- Connection pool handle
//! - [`config`] -- Database configuration
//! - [`error`] -- Shared error types

pub mod config;
pub mod error;
pub mod hydrate;
pub mod postgres;
pub mod record;
pub mod sequence;
pub mod sql;
pub mod transactional;
pub mod tx;
pub mod value;

#[cfg(test)]
mod fixtures;

// Re-export primary types for convenience.
pub use config::{DatabaseConfig, SequenceBackend};
pub use error::{DbError, ValueError};
pub use hydrate::{ExecOutcome, ParamWriter, RowReader};
pub use postgres::Database;
pub use record::{flattened, FieldDescriptor, FlattenedFields, Record, RecordDescriptor};
pub use sequence::{InMemorySequenceManager, SeedSource, Sequence, SequenceRegistry};
pub use sql::{insert_fragment, select_fragment, update_fragment};
pub use transactional::execute_transactional;
pub use tx::{PostCommit, TxCtx, TxMode};
pub use value::{ColumnValue, ScalarKind, SqlValue};
