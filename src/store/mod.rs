//! Persistence layer: thread, settings, decision, and audit storage.

pub mod libsql_backend;
pub mod memory;
pub mod migrations;
pub mod traits;

pub use libsql_backend::LibSqlBackend;
pub use memory::{MemoryStore, StaticDirectory};
pub use traits::{CounterpartyDirectory, NegotiationStore};
