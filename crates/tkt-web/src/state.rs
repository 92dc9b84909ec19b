//! Shared application state.

use tkt_db::Database;

/// State handed to every handler.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Pool handle each request opens its transaction on.
    pub db: Database,
}

impl AppState {
    /// Wrap a database handle.
    pub const fn new(db: Database) -> Self {
        Self { db }
    }
}
