//! HTTP API.

pub mod routes;
pub mod types;

pub use routes::{AppState, negotiation_routes};
