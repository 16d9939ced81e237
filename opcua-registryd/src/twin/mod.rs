//! Twin store: flat tag/property records with etag-guarded writes.

pub mod db;
pub mod handle;
pub mod model;
pub mod query;
pub mod store;

pub use db::TwinDb;
pub use handle::TwinStoreHandle;
pub use model::{PropertyBag, Twin, TwinKey};
pub use query::TwinPredicate;
pub use store::{StoreError, TwinPage, TwinStore};
