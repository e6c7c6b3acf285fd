//! Alert records and their durable store.
//!
//! Workers raise alerts through a shared [`AlertStore`]; the review commands
//! read, annotate and delete them through the same store.

pub mod store;
pub mod types;

// Re-export commonly used types
pub use store::{open_shared_store, AlertStore, SharedAlertStore, StoreError};
pub use types::{Alert, AlertFilter, AlertKind, NewAlert};
