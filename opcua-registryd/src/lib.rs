//! OPC UA application and endpoint registry.
//!
//! Discoverers report what they find on their network; the registry
//! reconciles those reports with the twins it keeps in its store, handling
//! ownership between discoverers and the enable/disable lifecycle of
//! applications and their endpoints.

pub mod api;
pub mod config;
pub mod error;
pub mod maintenance;
pub mod registration;
pub mod registry;
pub mod twin;
