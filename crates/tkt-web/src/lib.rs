//! HTTP adapter for the `tkt-db` transaction core.
//!
//! Every request routed through [`intercept_transactional`] runs in its own
//! `PostgreSQL` transaction with its own [`TxCtx`](tkt_db::TxCtx):
//!
//! ```text
//! request --> begin(mode) --> handler(&mut TxCtx, Request)
//!                                  |
//!                   Ok(Response) --+-- Err(WebError)
//!                        |                  |
//!              commit + callbacks      rollback
//!                        |                  |
//!                    response        500 {"errorMessage", "status"}
//! ```

pub mod error;
pub mod handlers;
pub mod intercept;
pub mod router;
pub mod server;
pub mod state;

// Re-export primary types for convenience.
pub use error::WebError;
pub use intercept::{intercept_read_only, intercept_transactional};
pub use router::{build_router, build_router_with};
pub use server::{start_server, ServerConfig, ServerError};
pub use state::AppState;
