//! SQLite backend for the Croquis document store.
//!
//! The relational state lives in an in-memory SQLite database; the history
//! log lives beside the connection in plain memory and is rebuilt empty every
//! time a document is opened. All access is synchronous and single-threaded —
//! the store belongs to the document's owning thread.

mod encode;
mod schema;
mod store;
mod undo;

pub mod error;

pub use error::{Error, Result};
pub use store::SqliteStore;

#[cfg(test)]
mod tests;
