//! HTTP surface of the registry

pub mod routes;

pub use routes::{router, AppState};
