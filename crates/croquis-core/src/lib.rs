//! Core types and trait definitions for the Croquis document store.
//!
//! This crate is deliberately free of database dependencies. It defines the
//! relational record model (values, rows, table schemas), the undo/redo
//! history log, the structural-change events consumed by list views, and the
//! [`store::DocumentStore`] trait implemented by storage backends.

pub mod error;
pub mod events;
pub mod history;
pub mod schema;
pub mod store;
pub mod value;

pub use error::{Error, Result};
